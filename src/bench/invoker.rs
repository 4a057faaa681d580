//! Load-generating worker: issues a weighted mix of reads and writes.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tokio::time::Duration;

use crate::bench::BenchConfig;
use crate::codec::MethodCall;
use crate::dispatcher::RpcDispatcher;
use crate::group::{Address, CallOptions, Reply};
use crate::utils::RpcDistError;

/// Per-invoker call counters.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub(crate) struct InvokerStats {
    pub(crate) gets: u64,
    pub(crate) puts: u64,
    pub(crate) failures: u64,
}

/// One benchmark worker. Runs a fixed number of iterations against a single
/// configuration snapshot.
pub(crate) struct Invoker {
    name: String,
    dispatcher: Arc<RpcDispatcher>,
    config: Arc<BenchConfig>,
    num_iters: usize,
}

impl Invoker {
    pub(crate) fn new(
        index: usize,
        dispatcher: Arc<RpcDispatcher>,
        config: Arc<BenchConfig>,
        num_iters: usize,
    ) -> Self {
        Invoker {
            name: format!("invoker-{}", index),
            dispatcher,
            config,
            num_iters,
        }
    }

    /// Runs all iterations. A failed call is logged and counted; it never
    /// ends the loop.
    pub(crate) async fn run(self) -> InvokerStats {
        let me = self.dispatcher.group().local_addr().clone();
        let prefix = format!("{}/{}", me, self.name);
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        let print_interval = self.config.print_interval();
        let mut rng = StdRng::from_entropy();
        let mut stats = InvokerStats::default();
        pf_debug!(prefix; "running {} iterations", self.num_iters);

        for i in 0..self.num_iters {
            let result = if rng.gen_bool(self.config.read_percentage) {
                stats.gets += 1;
                self.read(&me, timeout).await
            } else {
                stats.puts += 1;
                self.write(&me, i, timeout).await
            };
            if let Err(e) = result {
                stats.failures += 1;
                pf_warn!(prefix; "iteration {} failed: {}", i, e);
            }

            if (i + 1) % print_interval == 0 {
                pf_debug!(prefix; "{} / {} done", i + 1, self.num_iters);
            }
        }

        pf_debug!(prefix; "finished {:?}", stats);
        stats
    }

    /// Synchronous GET on the member right after me.
    async fn read(
        &self,
        me: &Address,
        timeout: Duration,
    ) -> Result<(), RpcDistError> {
        let view = self.dispatcher.group().view();
        let target = view.next_after(me).ok_or_else(|| {
            RpcDistError::msg(format!("{} not in view {}", me, view))
        })?;

        let opts =
            CallOptions::sync(Some(timeout)).with_oob(self.config.out_of_band);
        match self
            .dispatcher
            .call_remote_method(target, &MethodCall::get(), opts)
            .await?
        {
            Some(Reply::Bytes(_)) => Ok(()),
            Some(reply) => Err(RpcDistError::msg(format!(
                "unexpected get reply {} from {}",
                reply, target
            ))),
            None => Err(RpcDistError::msg(format!("no reply from {}", target))),
        }
    }

    /// PUT to the `anycast_count` members following me.
    async fn write(
        &self,
        me: &Address,
        index: usize,
        timeout: Duration,
    ) -> Result<(), RpcDistError> {
        let view = self.dispatcher.group().view();
        let targets = view
            .following(me, self.config.anycast_count as usize)
            .ok_or_else(|| {
                RpcDistError::msg(format!("{} not in view {}", me, view))
            })?;
        let call = MethodCall::put(index as i32);

        if !self.config.synchronous {
            let opts =
                CallOptions::asynchronous().with_oob(self.config.out_of_band);
            self.dispatcher
                .call_remote_methods(&targets, &call, opts)
                .await?;
            return Ok(());
        }

        let opts =
            CallOptions::sync(Some(timeout)).with_oob(self.config.out_of_band);
        let rsps = self
            .dispatcher
            .call_remote_methods(&targets, &call, opts)
            .await?
            .unwrap_or_default();
        for (target, rsp) in rsps {
            if let Err(e) = rsp {
                return Err(RpcDistError::msg(format!(
                    "put to {} failed: {}",
                    target, e
                )));
            }
        }
        Ok(())
    }
}
