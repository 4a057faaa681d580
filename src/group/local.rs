//! In-process group service: any number of members living in the same
//! process, connected through tokio channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use bytes::Bytes;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

use crate::group::{
    Address, CallOptions, GroupService, Reply, RequestHandler, View,
};
use crate::utils::RpcDistError;

/// A request travelling through the hub.
struct Envelope {
    from: Address,
    payload: Bytes,
    oob: bool,
    reply_tx: Option<oneshot::Sender<Result<Reply, RpcDistError>>>,
}

/// Per-member bookkeeping inside the hub.
struct HubMember {
    inbox: mpsc::UnboundedSender<Envelope>,
    view_tx: watch::Sender<Arc<View>>,
}

#[derive(Default)]
struct HubState {
    last_view_id: u64,

    /// Connected members in join order.
    order: Vec<Address>,

    members: HashMap<Address, HubMember>,
}

impl HubState {
    /// Installs a fresh view reflecting current membership to every member.
    fn install_view(&mut self) {
        self.last_view_id += 1;
        let view = Arc::new(View::new(self.last_view_id, self.order.clone()));
        for member in self.members.values() {
            member.view_tx.send_replace(view.clone());
        }
    }
}

/// Shared in-process hub that members join. Cloning gives another handle to
/// the same hub.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Creates a new empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a member handle with the given address. The member becomes
    /// visible in views once it connects.
    pub fn member(&self, name: impl Into<String>) -> LocalGroup {
        let (view_tx, _) = watch::channel(Arc::new(View::default()));
        LocalGroup {
            me: Address::new(name),
            hub: self.clone(),
            view_tx,
            tasks: Mutex::new(vec![]),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>, RpcDistError> {
        self.state
            .lock()
            .map_err(|_| RpcDistError::msg("local hub state poisoned"))
    }

    fn inbox_of(
        &self,
        addr: &Address,
    ) -> Result<mpsc::UnboundedSender<Envelope>, RpcDistError> {
        self.lock()?
            .members
            .get(addr)
            .map(|m| m.inbox.clone())
            .ok_or_else(|| {
                RpcDistError::msg(format!("member {} not in group", addr))
            })
    }
}

/// One member's handle on a `LocalHub`.
pub struct LocalGroup {
    me: Address,
    hub: LocalHub,
    view_tx: watch::Sender<Arc<View>>,

    /// Receive loop and regular request worker.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalGroup {
    /// Receive loop of one member: regular requests are forwarded to the
    /// regular worker, OOB requests get their own task. Never waits on a
    /// handler itself.
    async fn recv_loop_task(
        me: Address,
        mut rx_inbox: mpsc::UnboundedReceiver<Envelope>,
        tx_regular: mpsc::UnboundedSender<Envelope>,
        handler: Arc<dyn RequestHandler>,
    ) {
        pf_debug!(me; "recv_loop task spawned");

        while let Some(envelope) = rx_inbox.recv().await {
            if envelope.oob {
                tokio::spawn(Self::deliver(
                    me.clone(),
                    handler.clone(),
                    envelope,
                ));
            } else if tx_regular.send(envelope).is_err() {
                pf_error!(me; "regular worker gone");
                break;
            }
        }

        pf_debug!(me; "recv_loop task exitted");
    }

    /// Handles regular requests one by one in arrival order.
    async fn regular_worker_task(
        me: Address,
        mut rx_regular: mpsc::UnboundedReceiver<Envelope>,
        handler: Arc<dyn RequestHandler>,
    ) {
        while let Some(envelope) = rx_regular.recv().await {
            Self::deliver(me.clone(), handler.clone(), envelope).await;
        }
    }

    async fn deliver(
        me: Address,
        handler: Arc<dyn RequestHandler>,
        envelope: Envelope,
    ) {
        let result = handler.handle(&envelope.from, envelope.payload).await;
        match envelope.reply_tx {
            Some(reply_tx) => {
                // caller may have timed out already
                let _ = reply_tx.send(result);
            }
            None => {
                if let Err(e) = result {
                    pf_warn!(me; "async request from {} failed: {}",
                                 envelope.from, e);
                }
            }
        }
    }
}

#[async_trait]
impl GroupService for LocalGroup {
    fn local_addr(&self) -> &Address {
        &self.me
    }

    async fn connect(
        &self,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RpcDistError> {
        let (tx_inbox, rx_inbox) = mpsc::unbounded_channel();
        {
            let mut state = self.hub.lock()?;
            if state.members.contains_key(&self.me) {
                return logged_err!(self.me; "already connected");
            }
            state.members.insert(
                self.me.clone(),
                HubMember {
                    inbox: tx_inbox,
                    view_tx: self.view_tx.clone(),
                },
            );
            state.order.push(self.me.clone());
            state.install_view();
        }

        let (tx_regular, rx_regular) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::regular_worker_task(
            self.me.clone(),
            rx_regular,
            handler.clone(),
        ));
        let recv_loop = tokio::spawn(Self::recv_loop_task(
            self.me.clone(),
            rx_inbox,
            tx_regular,
            handler,
        ));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(worker);
            tasks.push(recv_loop);
        }

        pf_debug!(self.me; "connected to local hub");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RpcDistError> {
        {
            let mut state = self.hub.lock()?;
            if state.members.remove(&self.me).is_none() {
                return Ok(());
            }
            state.order.retain(|m| m != &self.me);
            state.install_view();
        }
        self.view_tx.send_replace(Arc::new(View::default()));

        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }

        pf_debug!(self.me; "disconnected from local hub");
        Ok(())
    }

    fn view_watch(&self) -> watch::Receiver<Arc<View>> {
        self.view_tx.subscribe()
    }

    async fn call(
        &self,
        target: &Address,
        payload: Bytes,
        opts: CallOptions,
    ) -> Result<Option<Reply>, RpcDistError> {
        let inbox = self.hub.inbox_of(target)?;

        if !opts.is_sync() {
            inbox.send(Envelope {
                from: self.me.clone(),
                payload,
                oob: opts.oob,
                reply_tx: None,
            })?;
            return Ok(None);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        inbox.send(Envelope {
            from: self.me.clone(),
            payload,
            oob: opts.oob,
            reply_tx: Some(reply_tx),
        })?;

        let result = match opts.timeout {
            Some(timeout) => time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| {
                    RpcDistError::msg(format!(
                        "call to {} timed out after {} ms",
                        target,
                        timeout.as_millis()
                    ))
                })??,
            None => reply_rx.await?,
        };
        result.map(Some)
    }
}

#[cfg(test)]
mod local_tests {
    use super::*;
    use crate::group::ResponseMode;
    use tokio::time::Duration;

    /// Echoes the payload back, sleeping for as many millisecs as the first
    /// payload byte says.
    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(
            &self,
            _sender: &Address,
            payload: Bytes,
        ) -> Result<Reply, RpcDistError> {
            if let Some(&ms) = payload.first() {
                time::sleep(Duration::from_millis(ms as u64)).await;
            }
            if payload.is_empty() {
                Err(RpcDistError::msg("empty payload"))
            } else {
                Ok(Reply::Bytes(payload))
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn views_follow_membership() -> Result<(), RpcDistError> {
        let hub = LocalHub::new();
        let a = hub.member("a");
        let b = hub.member("b");
        let watch_a = a.view_watch();
        a.connect(Arc::new(EchoHandler)).await?;
        b.connect(Arc::new(EchoHandler)).await?;
        assert!(watch_a.has_changed().unwrap_or(false));
        let view = a.view();
        assert_eq!(view.members(), &[Address::from("a"), "b".into()]);
        assert_eq!(b.view().id(), view.id());
        assert!(a.connect(Arc::new(EchoHandler)).await.is_err());

        b.disconnect().await?;
        assert_eq!(a.view().members(), &[Address::from("a")]);
        assert!(a.view().id() > view.id());
        assert_eq!(b.view().size(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_async_calls() -> Result<(), RpcDistError> {
        let hub = LocalHub::new();
        let a = hub.member("a");
        let b = hub.member("b");
        a.connect(Arc::new(EchoHandler)).await?;
        b.connect(Arc::new(EchoHandler)).await?;

        let payload = Bytes::from_static(&[0, 1, 2]);
        let reply = a
            .call(&"b".into(), payload.clone(), CallOptions::sync(None))
            .await?;
        assert_eq!(reply, Some(Reply::Bytes(payload.clone())));
        let reply = a
            .call(&"a".into(), payload.clone(), CallOptions::asynchronous())
            .await?;
        assert_eq!(reply, None);

        // remote handler error surfaces to the caller
        assert!(a
            .call(&"b".into(), Bytes::new(), CallOptions::sync(None))
            .await
            .is_err());
        // unknown target
        assert!(a
            .call(&"z".into(), payload, CallOptions::sync(None))
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn call_timeout() -> Result<(), RpcDistError> {
        let hub = LocalHub::new();
        let a = hub.member("a");
        a.connect(Arc::new(EchoHandler)).await?;
        let slow = Bytes::from_static(&[200]);
        let opts = CallOptions::sync(Some(Duration::from_millis(50)));
        assert!(a.call(&"a".into(), slow, opts).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_target_calls() -> Result<(), RpcDistError> {
        let hub = LocalHub::new();
        let members: Vec<LocalGroup> =
            ["a", "b", "c"].iter().map(|&n| hub.member(n)).collect();
        for m in &members {
            m.connect(Arc::new(EchoHandler)).await?;
        }
        let targets = members[0].view().members().to_vec();

        let rsps = members[0]
            .call_multi(
                &targets,
                Bytes::from_static(&[1]),
                CallOptions::sync(None),
            )
            .await?
            .unwrap_or_default();
        assert_eq!(rsps.len(), 3);
        for (addr, (target, rsp)) in targets.iter().zip(rsps) {
            assert_eq!(addr, &target);
            assert_eq!(rsp, Ok(Reply::Bytes(Bytes::from_static(&[1]))));
        }

        let opts = CallOptions::asynchronous();
        assert_eq!(opts.mode, ResponseMode::GetNone);
        assert!(members[0]
            .call_multi(&targets, Bytes::from_static(&[1]), opts)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oob_overtakes_regular() -> Result<(), RpcDistError> {
        let hub = LocalHub::new();
        let a = hub.member("a");
        a.connect(Arc::new(EchoHandler)).await?;

        // a slow regular request holds up later regular ones, but an OOB
        // one is dispatched right away
        a.call(
            &"a".into(),
            Bytes::from_static(&[250]),
            CallOptions::asynchronous(),
        )
        .await?;
        let opts = CallOptions::sync(Some(Duration::from_millis(150)))
            .with_oob(true);
        let reply = a.call(&"a".into(), Bytes::from_static(&[0]), opts).await?;
        assert_eq!(reply, Some(Reply::Bytes(Bytes::from_static(&[0]))));
        let opts = CallOptions::sync(Some(Duration::from_millis(100)));
        assert!(a
            .call(&"a".into(), Bytes::from_static(&[0]), opts)
            .await
            .is_err());
        Ok(())
    }
}
