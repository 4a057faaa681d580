//! Glue between the codec, the opcode registry, and the group service.

use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use crate::codec::{self, MethodCall};
use crate::group::{
    Address, CallOptions, GroupService, Reply, RequestHandler, RspList,
};
use crate::registry::OpcodeRegistry;
use crate::utils::RpcDistError;

/// Request handler installed into the group service: decodes an incoming
/// payload, looks up its opcode, and invokes the handler.
pub(crate) struct RegistryHandler {
    me: Address,
    registry: OpcodeRegistry,
}

impl RegistryHandler {
    pub(crate) fn new(me: Address, registry: OpcodeRegistry) -> Self {
        RegistryHandler { me, registry }
    }

    /// Decode + lookup + invoke.
    pub(crate) async fn dispatch(
        &self,
        payload: &[u8],
    ) -> Result<Reply, RpcDistError> {
        let call = codec::decode(payload)?;
        self.registry.dispatch(call).await
    }
}

#[async_trait]
impl RequestHandler for RegistryHandler {
    async fn handle(
        &self,
        sender: &Address,
        payload: Bytes,
    ) -> Result<Reply, RpcDistError> {
        let result = self.dispatch(&payload).await;
        if let Err(ref e) = result {
            pf_debug!(self.me; "request from {} failed: {}", sender, e);
        }
        result
    }
}

/// Calling side: encodes method calls and hands them to the group service.
pub(crate) struct RpcDispatcher {
    group: Arc<dyn GroupService>,
}

impl RpcDispatcher {
    pub(crate) fn new(group: Arc<dyn GroupService>) -> Self {
        RpcDispatcher { group }
    }

    #[inline]
    pub(crate) fn group(&self) -> &Arc<dyn GroupService> {
        &self.group
    }

    /// Connects to the group with the given registry serving incoming calls.
    pub(crate) async fn start(
        &self,
        registry: OpcodeRegistry,
    ) -> Result<(), RpcDistError> {
        let me = self.group.local_addr().clone();
        pf_debug!(me; "serving opcodes {:?}", registry);
        let handler = RegistryHandler::new(me, registry);
        self.group.connect(Arc::new(handler)).await
    }

    pub(crate) async fn stop(&self) -> Result<(), RpcDistError> {
        self.group.disconnect().await
    }

    /// Invokes a method on one member.
    pub(crate) async fn call_remote_method(
        &self,
        target: &Address,
        call: &MethodCall,
        opts: CallOptions,
    ) -> Result<Option<Reply>, RpcDistError> {
        let payload = codec::encode(call)?;
        self.group.call(target, payload, opts).await
    }

    /// Invokes a method on several members at once.
    pub(crate) async fn call_remote_methods(
        &self,
        targets: &[Address],
        call: &MethodCall,
        opts: CallOptions,
    ) -> Result<Option<RspList>, RpcDistError> {
        let payload = codec::encode(call)?;
        self.group.call_multi(targets, payload, opts).await
    }
}

#[cfg(test)]
mod dispatcher_tests {
    use super::*;
    use crate::codec::{CodecError, Opcode};
    use crate::group::LocalHub;
    use crate::registry::handler_fn;
    use futures::FutureExt;

    fn doubling_registry() -> Result<OpcodeRegistry, RpcDistError> {
        let mut registry = OpcodeRegistry::new();
        registry.register(
            Opcode::Receive,
            handler_fn(|call: MethodCall| {
                async move {
                    let value = call.arg_int(0)?;
                    Ok::<_, RpcDistError>(Reply::Long(value as i64 * 2))
                }
                .boxed()
            }),
        )?;
        Ok(registry)
    }

    #[tokio::test]
    async fn dispatch_payloads() -> Result<(), RpcDistError> {
        let handler =
            RegistryHandler::new("a".into(), doubling_registry()?);
        let payload = codec::encode(&MethodCall::receive(21))?;
        assert_eq!(handler.dispatch(&payload).await?, Reply::Long(42));

        let unregistered = codec::encode(&MethodCall::put(1))?;
        assert_eq!(
            handler.dispatch(&unregistered).await,
            Err(CodecError::UnknownOpcode(Opcode::Put.tag()).into())
        );
        assert!(handler.dispatch(&[0xEE]).await.is_err());
        assert!(handler.dispatch(&[]).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_calls() -> Result<(), RpcDistError> {
        let hub = LocalHub::new();
        let a = RpcDispatcher::new(Arc::new(hub.member("a")));
        let b = RpcDispatcher::new(Arc::new(hub.member("b")));
        a.start(doubling_registry()?).await?;
        b.start(doubling_registry()?).await?;
        assert_eq!(a.group().view().size(), 2);
        assert_eq!(a.group().connections(), vec!["b".to_string()]);

        let reply = a
            .call_remote_method(
                &"b".into(),
                &MethodCall::receive(5),
                CallOptions::sync(None),
            )
            .await?;
        assert_eq!(reply, Some(Reply::Long(10)));

        let targets = a.group().view().members().to_vec();
        let rsps = a
            .call_remote_methods(
                &targets,
                &MethodCall::put(3),
                CallOptions::sync(None),
            )
            .await?
            .unwrap_or_default();
        assert_eq!(rsps.len(), 2);
        assert!(rsps.iter().all(|(_, rsp)| rsp.is_err()));

        b.stop().await?;
        assert_eq!(a.group().view().size(), 1);
        Ok(())
    }
}
