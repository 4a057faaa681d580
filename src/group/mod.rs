//! Group communication service contract: membership views plus
//! point-to-point and multi-target request delivery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use futures::future::join_all;

use serde::{Deserialize, Serialize};

use tokio::sync::watch;
use tokio::time::Duration;

use crate::bench::RunResult;
use crate::utils::RpcDistError;

mod local;
mod tcp;
mod view;

#[cfg(test)]
pub(crate) mod mock;

pub use local::{LocalGroup, LocalHub};
pub use tcp::{GroupSpec, MemberSpec, TcpGroup};
pub use view::{Address, View};

/// Whether a call waits for replies.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ResponseMode {
    /// Block until every target replied (or the timeout elapsed).
    GetAll,

    /// Fire-and-forget.
    GetNone,
}

/// Per-call delivery options.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CallOptions {
    pub mode: ResponseMode,

    /// Reply timeout; `None` waits forever.
    pub timeout: Option<Duration>,

    /// Out-of-band hint: the receiver may dispatch this request
    /// concurrently instead of in arrival order.
    pub oob: bool,
}

impl CallOptions {
    pub fn sync(timeout: Option<Duration>) -> Self {
        CallOptions {
            mode: ResponseMode::GetAll,
            timeout,
            oob: false,
        }
    }

    pub fn asynchronous() -> Self {
        CallOptions {
            mode: ResponseMode::GetNone,
            timeout: None,
            oob: false,
        }
    }

    pub fn with_oob(mut self, oob: bool) -> Self {
        self.oob = oob;
        self
    }

    #[inline]
    pub fn is_sync(&self) -> bool {
        self.mode == ResponseMode::GetAll
    }
}

/// Return value of a remotely invoked method.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Reply {
    Void,
    Long(i64),
    Bytes(Bytes),
    Results(RunResult),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reply::Void => write!(f, "void"),
            Reply::Long(v) => write!(f, "{}", v),
            Reply::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Reply::Results(r) => write!(f, "{}", r),
        }
    }
}

/// Per-target replies of a multi-target call, in target order.
pub type RspList = Vec<(Address, Result<Reply, RpcDistError>)>;

/// Receiving side of the group service: turns an incoming request payload
/// into a reply.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        sender: &Address,
        payload: Bytes,
    ) -> Result<Reply, RpcDistError>;
}

/// Group communication service consumed by the benchmark harness.
#[async_trait]
pub trait GroupService: Send + Sync {
    /// My own address.
    fn local_addr(&self) -> &Address;

    /// Joins the group; incoming requests get dispatched to `handler` until
    /// `disconnect()`.
    async fn connect(
        &self,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RpcDistError>;

    /// Leaves the group and releases the request handler.
    async fn disconnect(&self) -> Result<(), RpcDistError>;

    /// Receiver side of view-change notifications. Always holds the latest
    /// installed view.
    fn view_watch(&self) -> watch::Receiver<Arc<View>>;

    /// Snapshot of the current view.
    fn view(&self) -> Arc<View> {
        self.view_watch().borrow().clone()
    }

    /// One line per point-to-point connection to another member.
    fn connections(&self) -> Vec<String> {
        let me = self.local_addr();
        self.view()
            .members()
            .iter()
            .filter(|&m| m != me)
            .map(|m| m.to_string())
            .collect()
    }

    /// Sends a request to one member. Returns `Ok(None)` for asynchronous
    /// calls.
    async fn call(
        &self,
        target: &Address,
        payload: Bytes,
        opts: CallOptions,
    ) -> Result<Option<Reply>, RpcDistError>;

    /// Sends a request to all given members simultaneously. Synchronous
    /// calls wait for every target and report each target's outcome;
    /// asynchronous calls return `Ok(None)` once all requests are handed to
    /// the transport.
    async fn call_multi(
        &self,
        targets: &[Address],
        payload: Bytes,
        opts: CallOptions,
    ) -> Result<Option<RspList>, RpcDistError> {
        match opts.mode {
            ResponseMode::GetNone => {
                for target in targets {
                    self.call(target, payload.clone(), opts).await?;
                }
                Ok(None)
            }

            ResponseMode::GetAll => {
                let rsps = join_all(targets.iter().map(|target| {
                    let payload = payload.clone();
                    async move {
                        let rsp = self
                            .call(target, payload, opts)
                            .await
                            .map(|r| r.unwrap_or(Reply::Void));
                        (target.clone(), rsp)
                    }
                }))
                .await;
                Ok(Some(rsps))
            }
        }
    }
}
