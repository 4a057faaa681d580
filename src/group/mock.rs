//! Scriptable group service double for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bytes::Bytes;

use tokio::sync::watch;
use tokio::time::{self, Duration};

use crate::codec::{self, Opcode};
use crate::group::{
    Address, CallOptions, GroupService, Reply, RequestHandler, View,
};
use crate::utils::RpcDistError;

/// Records every call it sees and answers without any real delivery.
/// Calls whose sequence number is in `stalls` sleep for `stall` and then
/// fail as if they timed out.
pub(crate) struct MockGroup {
    me: Address,
    view_tx: watch::Sender<Arc<View>>,
    calls: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
    targets: Mutex<Vec<Address>>,
    stalls: HashSet<usize>,
    stall: Duration,
}

impl MockGroup {
    pub(crate) fn new(me: &str, members: &[&str]) -> Self {
        let view = View::new(
            1,
            members.iter().map(|&m| Address::from(m)).collect(),
        );
        let (view_tx, _) = watch::channel(Arc::new(view));
        MockGroup {
            me: me.into(),
            view_tx,
            calls: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            targets: Mutex::new(vec![]),
            stalls: HashSet::new(),
            stall: Duration::ZERO,
        }
    }

    pub(crate) fn with_stalls(
        mut self,
        stalls: impl IntoIterator<Item = usize>,
        stall: Duration,
    ) -> Self {
        self.stalls = stalls.into_iter().collect();
        self.stall = stall;
        self
    }

    pub(crate) fn install_view(&self, members: &[&str]) {
        let id = self.view_tx.borrow().id() + 1;
        self.view_tx.send_replace(Arc::new(View::new(
            id,
            members.iter().map(|&m| Address::from(m)).collect(),
        )));
    }

    pub(crate) fn num_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn num_gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn num_puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub(crate) fn targets(&self) -> Vec<Address> {
        self.targets.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GroupService for MockGroup {
    fn local_addr(&self) -> &Address {
        &self.me
    }

    async fn connect(
        &self,
        _handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RpcDistError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RpcDistError> {
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
        let seq = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut targets) = self.targets.lock() {
            targets.push(target.clone());
        }

        let call = codec::decode(&payload)?;
        match call.opcode() {
            Opcode::Get => self.gets.fetch_add(1, Ordering::SeqCst),
            Opcode::Put => self.puts.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };

        if self.stalls.contains(&seq) {
            time::sleep(self.stall).await;
            return Err(RpcDistError::msg(format!(
                "call to {} timed out",
                target
            )));
        }

        if !opts.is_sync() {
            return Ok(None);
        }
        match call.opcode() {
            Opcode::Get => Ok(Some(Reply::Bytes(Bytes::from_static(b"v")))),
            _ => Ok(Some(Reply::Void)),
        }
    }
}
