//! Opcode -> handler table consulted when dispatching incoming calls.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use futures::future::BoxFuture;

use crate::codec::{CodecError, MethodCall, Opcode, NUM_OPCODES};
use crate::group::Reply;
use crate::utils::RpcDistError;

/// A locally invocable method.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn invoke(&self, call: MethodCall) -> Result<Reply, RpcDistError>;
}

/// Adapts a closure returning a boxed future into an `RpcHandler`.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> RpcHandler for FnHandler<F>
where
    F: Fn(MethodCall) -> BoxFuture<'static, Result<Reply, RpcDistError>>
        + Send
        + Sync,
{
    async fn invoke(&self, call: MethodCall) -> Result<Reply, RpcDistError> {
        (self.0)(call).await
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(MethodCall) -> BoxFuture<'static, Result<Reply, RpcDistError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

/// Fixed-size handler table indexed by opcode tag. Filled once at startup;
/// there is no removal.
pub struct OpcodeRegistry {
    table: [Option<Arc<dyn RpcHandler>>; NUM_OPCODES],
}

impl Default for OpcodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        OpcodeRegistry {
            table: std::array::from_fn(|_| None),
        }
    }

    /// Registers the handler of an opcode. Registering the same opcode
    /// twice is an error.
    pub fn register(
        &mut self,
        opcode: Opcode,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<(), RpcDistError> {
        let slot = &mut self.table[opcode.tag() as usize];
        if slot.is_some() {
            return Err(RpcDistError::msg(format!(
                "opcode {} registered twice",
                opcode
            )));
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Finds the handler of a tag.
    pub fn lookup(&self, tag: u8) -> Result<&Arc<dyn RpcHandler>, CodecError> {
        self.table
            .get(tag as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(CodecError::UnknownOpcode(tag))
    }

    #[inline]
    pub fn is_registered(&self, opcode: Opcode) -> bool {
        self.table[opcode.tag() as usize].is_some()
    }

    /// Number of opcodes with a handler.
    pub fn len(&self) -> usize {
        self.table.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes the handler of an already decoded call.
    pub async fn dispatch(
        &self,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        call.check_signature()?;
        let handler = self.lookup(call.opcode().tag())?;
        handler.invoke(call).await
    }
}

impl fmt::Debug for OpcodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(
                Opcode::ALL
                    .iter()
                    .filter(|&&opcode| self.is_registered(opcode)),
            )
            .finish()
    }
}
