//! Per-node benchmark coordinator: owns the run configuration, serves the
//! benchmark opcodes, runs the local invokers, and drives cluster-wide runs.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use futures::future::{self, FutureExt};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::bench::config::{
    check_anycast_count, check_msg_size, check_num_msgs, check_num_threads,
};
use crate::bench::invoker::Invoker;
use crate::bench::{BenchConfig, RunResult};
use crate::codec::{MethodCall, Opcode};
use crate::dispatcher::RpcDispatcher;
use crate::group::{Address, CallOptions, GroupService, Reply, View};
use crate::registry::{handler_fn, OpcodeRegistry, RpcHandler};
use crate::utils::RpcDistError;

/// Benchmark coordinator of one group member.
pub struct Coordinator {
    me: Address,

    dispatcher: Arc<RpcDispatcher>,

    /// Current configuration snapshot.
    config_tx: watch::Sender<Arc<BenchConfig>>,

    /// Pre-built GET reply of `msg_size` bytes.
    get_rsp: Mutex<Bytes>,

    num_received: AtomicU64,
    num_puts_served: AtomicU64,

    next_run_id: AtomicI64,

    view_logger: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Creates a coordinator on top of a (not yet connected) group service.
    pub fn new(
        group: Arc<dyn GroupService>,
        config: BenchConfig,
    ) -> Result<Arc<Self>, RpcDistError> {
        config.validate()?;
        let me = group.local_addr().clone();
        let get_rsp = Bytes::from(vec![0u8; config.msg_size as usize]);
        let (config_tx, _) = watch::channel(Arc::new(config));

        Ok(Arc::new(Coordinator {
            me,
            dispatcher: Arc::new(RpcDispatcher::new(group)),
            config_tx,
            get_rsp: Mutex::new(get_rsp),
            num_received: AtomicU64::new(0),
            num_puts_served: AtomicU64::new(0),
            next_run_id: AtomicI64::new(1),
            view_logger: Mutex::new(None),
        }))
    }

    /// Joins the group and starts serving the benchmark opcodes.
    pub async fn join(self: &Arc<Self>) -> Result<(), RpcDistError> {
        let registry = self.build_registry()?;
        let mut view_rx = self.dispatcher.group().view_watch();
        self.dispatcher.start(registry).await?;

        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                let view = view_rx.borrow_and_update().clone();
                pf_info!(me; "** view: {}", view);
                if view_rx.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Ok(mut view_logger) = self.view_logger.lock() {
            if let Some(old) = view_logger.replace(handle) {
                old.abort();
            }
        }

        pf_info!(self.me; "joined group with config {:?}", self.config());
        Ok(())
    }

    /// Leaves the group.
    pub async fn leave(&self) -> Result<(), RpcDistError> {
        if let Ok(mut view_logger) = self.view_logger.lock() {
            if let Some(handle) = view_logger.take() {
                handle.abort();
            }
        }
        self.dispatcher.stop().await?;
        pf_info!(self.me; "left group");
        Ok(())
    }

    #[inline]
    pub fn local_addr(&self) -> &Address {
        &self.me
    }

    /// Current membership view snapshot.
    pub fn view(&self) -> Arc<View> {
        self.dispatcher.group().view()
    }

    /// Connections to the other members, one line each.
    pub fn connections(&self) -> Vec<String> {
        self.dispatcher.group().connections()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<BenchConfig> {
        self.config_tx.borrow().clone()
    }

    /// Number of RECEIVE calls served so far.
    pub fn num_received(&self) -> u64 {
        self.num_received.load(Ordering::Relaxed)
    }

    /// Number of PUT calls served so far.
    pub fn num_puts_served(&self) -> u64 {
        self.num_puts_served.load(Ordering::Relaxed)
    }

    /// Wraps a coordinator method as a registry handler. Handlers only keep a
    /// weak reference, as the group service holds them.
    fn bind<F, Fut>(self: &Arc<Self>, f: F) -> Arc<dyn RpcHandler>
    where
        F: Fn(Arc<Coordinator>, MethodCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, RpcDistError>> + Send + 'static,
    {
        let coordinator = Arc::downgrade(self);
        handler_fn(move |call| match coordinator.upgrade() {
            Some(c) => f(c, call).boxed(),
            None => future::ready(Err(RpcDistError::msg(
                "coordinator already dropped",
            )))
            .boxed(),
        })
    }

    fn build_registry(
        self: &Arc<Self>,
    ) -> Result<OpcodeRegistry, RpcDistError> {
        let mut registry = OpcodeRegistry::new();
        registry.register(Opcode::Receive, self.bind(Self::handle_receive))?;
        registry.register(Opcode::Start, self.bind(Self::handle_start))?;
        registry.register(Opcode::SetOob, self.bind(Self::handle_set_oob))?;
        registry.register(Opcode::SetSync, self.bind(Self::handle_set_sync))?;
        registry.register(
            Opcode::SetNumMsgs,
            self.bind(Self::handle_set_num_msgs),
        )?;
        registry.register(
            Opcode::SetNumThreads,
            self.bind(Self::handle_set_num_threads),
        )?;
        registry.register(
            Opcode::SetMsgSize,
            self.bind(Self::handle_set_msg_size),
        )?;
        registry.register(
            Opcode::SetAnycastCount,
            self.bind(Self::handle_set_anycast_count),
        )?;
        registry.register(Opcode::Get, self.bind(Self::handle_get))?;
        registry.register(Opcode::Put, self.bind(Self::handle_put))?;
        Ok(registry)
    }

    async fn handle_receive(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        Ok(Reply::Long(self.receive(call.arg_int(0)?)))
    }

    async fn handle_start(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        let run_id = call.arg_long(0)?;
        let label = String::from_utf8_lossy(call.arg_bytes(1)?).into_owned();
        pf_info!(self.me; "run {} requested by {}", run_id, label);
        Ok(Reply::Results(self.start().await?))
    }

    async fn handle_set_oob(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.set_out_of_band(call.arg_bool(0)?);
        Ok(Reply::Void)
    }

    async fn handle_set_sync(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.set_synchronous(call.arg_bool(0)?);
        Ok(Reply::Void)
    }

    async fn handle_set_num_msgs(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.set_num_msgs(call.arg_int(0)?)?;
        Ok(Reply::Void)
    }

    async fn handle_set_num_threads(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.set_num_threads(call.arg_int(0)?)?;
        Ok(Reply::Void)
    }

    async fn handle_set_msg_size(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.set_msg_size(call.arg_int(0)?)?;
        Ok(Reply::Void)
    }

    async fn handle_set_anycast_count(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.set_anycast_count(call.arg_int(0)?)?;
        Ok(Reply::Void)
    }

    /// GET carries an optional key, which is ignored.
    async fn handle_get(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        let key = match call.args().len() {
            0 => None,
            _ => Some(call.arg_long(0)?),
        };
        Ok(Reply::Bytes(self.get(key)?))
    }

    async fn handle_put(
        self: Arc<Self>,
        call: MethodCall,
    ) -> Result<Reply, RpcDistError> {
        self.put(call.arg_int(0)?);
        Ok(Reply::Void)
    }

    /// Counts a received value; returns my local time in millisecs.
    pub fn receive(&self, value: i32) -> i64 {
        self.num_received.fetch_add(1, Ordering::Relaxed);
        pf_trace!(self.me; "received {}", value);
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Returns a `msg_size`-byte buffer; the key is ignored.
    pub fn get(&self, _key: Option<i64>) -> Result<Bytes, RpcDistError> {
        self.get_rsp
            .lock()
            .map(|rsp| rsp.clone())
            .map_err(|_| RpcDistError::msg("get reply buffer poisoned"))
    }

    /// Accepts a write.
    pub fn put(&self, index: i32) {
        self.num_puts_served.fetch_add(1, Ordering::Relaxed);
        pf_trace!(self.me; "put {}", index);
    }

    pub fn set_out_of_band(&self, oob: bool) {
        self.config_tx
            .send_modify(|config| Arc::make_mut(config).out_of_band = oob);
        pf_info!(self.me; "out_of_band set to {}", oob);
    }

    pub fn set_synchronous(&self, sync: bool) {
        self.config_tx
            .send_modify(|config| Arc::make_mut(config).synchronous = sync);
        pf_info!(self.me; "synchronous set to {}", sync);
    }

    pub fn set_num_msgs(&self, num: i32) -> Result<(), RpcDistError> {
        check_num_msgs(num)?;
        self.config_tx
            .send_modify(|config| Arc::make_mut(config).num_msgs = num);
        pf_info!(self.me; "num_msgs set to {}", num);
        Ok(())
    }

    pub fn set_num_threads(&self, num: i32) -> Result<(), RpcDistError> {
        check_num_threads(num)?;
        self.config_tx
            .send_modify(|config| Arc::make_mut(config).num_threads = num);
        pf_info!(self.me; "num_threads set to {}", num);
        Ok(())
    }

    /// Also rebuilds the GET reply buffer.
    pub fn set_msg_size(&self, size: i32) -> Result<(), RpcDistError> {
        check_msg_size(size)?;
        let mut get_rsp = self
            .get_rsp
            .lock()
            .map_err(|_| RpcDistError::msg("get reply buffer poisoned"))?;
        *get_rsp = Bytes::from(vec![0u8; size as usize]);
        self.config_tx
            .send_modify(|config| Arc::make_mut(config).msg_size = size);
        pf_info!(self.me; "msg_size set to {}", size);
        Ok(())
    }

    pub fn set_anycast_count(&self, count: i32) -> Result<(), RpcDistError> {
        check_anycast_count(count)?;
        self.config_tx
            .send_modify(|config| Arc::make_mut(config).anycast_count = count);
        pf_info!(self.me; "anycast_count set to {}", count);
        Ok(())
    }

    /// Runs the local benchmark: `num_threads` invokers splitting `num_msgs`
    /// calls, all joined before returning.
    pub async fn start(&self) -> Result<RunResult, RpcDistError> {
        let config = self.config();
        let num_iters = config.msgs_per_invoker()?;
        let num_invokers = config.num_threads as usize;
        pf_info!(self.me; "starting {} invokers x {} calls", num_invokers,
                          num_iters);

        let begin = Instant::now();
        let handles: Vec<_> = (0..num_invokers)
            .map(|i| {
                let invoker = Invoker::new(
                    i,
                    self.dispatcher.clone(),
                    config.clone(),
                    num_iters,
                );
                tokio::spawn(invoker.run())
            })
            .collect();

        let mut result = RunResult {
            num_invokers: num_invokers as u64,
            ..Default::default()
        };
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(stats) => {
                    result.num_gets += stats.gets;
                    result.num_puts += stats.puts;
                    result.num_failures += stats.failures;
                }
                Err(e) => {
                    pf_error!(self.me; "invoker-{} died: {}", i, e);
                    result.num_failures += num_iters as u64;
                }
            }
        }
        result.time_ms = begin.elapsed().as_millis() as u64;

        pf_info!(self.me; "run done: {}", result);
        Ok(result)
    }

    /// Starts a run on every current member and collects their results.
    /// Rejects an uneven workload split before sending anything.
    pub async fn start_benchmark(
        &self,
    ) -> Result<Vec<(Address, Result<RunResult, RpcDistError>)>, RpcDistError>
    {
        let config = self.config();
        config.msgs_per_invoker()?;

        let view = self.view();
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let call = MethodCall::start(run_id, self.me.to_string());
        pf_info!(self.me; "starting run {} on {}", run_id, view);

        // START must not wait behind regular requests on the receivers
        let opts = CallOptions::sync(None).with_oob(true);
        let rsps = self
            .dispatcher
            .call_remote_methods(view.members(), &call, opts)
            .await?
            .unwrap_or_default();

        let results: Vec<_> = rsps
            .into_iter()
            .map(|(addr, rsp)| {
                let result = match rsp {
                    Ok(Reply::Results(r)) => Ok(r),
                    Ok(reply) => Err(RpcDistError::msg(format!(
                        "unexpected start reply {}",
                        reply
                    ))),
                    Err(e) => Err(e),
                };
                (addr, result)
            })
            .collect();

        pf_info!(self.me; "Results:");
        for (addr, result) in &results {
            match result {
                Ok(r) => pf_info!(self.me; "  {}: {}", addr, r),
                Err(e) => pf_warn!(self.me; "  {}: failed: {}", addr, e),
            }
        }
        let succeeded: Vec<&RunResult> =
            results.iter().filter_map(|(_, r)| r.as_ref().ok()).collect();
        if !succeeded.is_empty() {
            pf_info!(self.me; "  total: {}", RunResult::aggregate(succeeded));
        }

        Ok(results)
    }

    /// Applies a SET_* call on every current member, me included.
    async fn broadcast(&self, call: MethodCall) -> Result<(), RpcDistError> {
        let view = self.view();
        let timeout = Duration::from_millis(self.config().call_timeout_ms);
        let rsps = self
            .dispatcher
            .call_remote_methods(
                view.members(),
                &call,
                CallOptions::sync(Some(timeout)),
            )
            .await?
            .unwrap_or_default();

        let mut num_failed = 0;
        for (addr, rsp) in &rsps {
            if let Err(e) = rsp {
                pf_warn!(self.me; "{} failed on {}: {}", call, addr, e);
                num_failed += 1;
            }
        }
        if num_failed > 0 {
            return logged_err!(self.me; "{} failed on {} of {} members",
                                        call, num_failed, rsps.len());
        }
        Ok(())
    }

    pub async fn broadcast_out_of_band(
        &self,
        oob: bool,
    ) -> Result<(), RpcDistError> {
        self.broadcast(MethodCall::set_oob(oob)).await
    }

    pub async fn broadcast_synchronous(
        &self,
        sync: bool,
    ) -> Result<(), RpcDistError> {
        self.broadcast(MethodCall::set_sync(sync)).await
    }

    pub async fn broadcast_num_msgs(
        &self,
        num: i32,
    ) -> Result<(), RpcDistError> {
        check_num_msgs(num)?;
        self.broadcast(MethodCall::set_num_msgs(num)).await
    }

    pub async fn broadcast_num_threads(
        &self,
        num: i32,
    ) -> Result<(), RpcDistError> {
        check_num_threads(num)?;
        self.broadcast(MethodCall::set_num_threads(num)).await
    }

    pub async fn broadcast_msg_size(
        &self,
        size: i32,
    ) -> Result<(), RpcDistError> {
        check_msg_size(size)?;
        self.broadcast(MethodCall::set_msg_size(size)).await
    }

    /// Rejected locally if `count` exceeds the current view size.
    pub async fn broadcast_anycast_count(
        &self,
        count: i32,
    ) -> Result<(), RpcDistError> {
        check_anycast_count(count)?;
        let view_size = self.view().size();
        if count as usize > view_size {
            return Err(RpcDistError::msg(format!(
                "anycast_count {} exceeds view size {}",
                count, view_size
            )));
        }
        self.broadcast(MethodCall::set_anycast_count(count)).await
    }

    /// Flips the out-of-band flag group-wide.
    pub async fn toggle_oob(&self) -> Result<bool, RpcDistError> {
        let oob = !self.config().out_of_band;
        self.broadcast_out_of_band(oob).await?;
        Ok(oob)
    }

    /// Flips the synchronous flag group-wide.
    pub async fn toggle_sync(&self) -> Result<bool, RpcDistError> {
        let sync = !self.config().synchronous;
        self.broadcast_synchronous(sync).await?;
        Ok(sync)
    }
}
