//! Static-membership TCP group service.
//!
//! Members are listed up front in a `GroupSpec`. Every member listens on its
//! configured address, actively connects to the members listed before it and
//! waits for the ones listed after it. The view is the configured member list
//! filtered down to myself plus the peers currently connected. Messages are
//! MessagePack-encoded `PeerMsg`s prefixed by a u64 length.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use bytes::Bytes;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use serde::{Deserialize, Serialize};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::group::{
    Address, CallOptions, GroupService, Reply, RequestHandler, View,
};
use crate::utils::RpcDistError;

/// Interval between attempts to (re)connect to a peer.
const RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Frames larger than this are treated as a corrupted stream.
const MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

/// One configured group member.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MemberSpec {
    pub name: String,
    pub addr: SocketAddr,
}

/// Static group membership, parsed from TOML of the form:
/// ```toml
/// [[members]]
/// name = "a"
/// addr = "127.0.0.1:52700"
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Default, Deserialize)]
pub struct GroupSpec {
    pub members: Vec<MemberSpec>,
}

impl GroupSpec {
    /// Parses and sanity checks a membership spec.
    pub fn parse(spec_str: &str) -> Result<Self, RpcDistError> {
        let spec = parsed_config!(Some(spec_str) => GroupSpec; members)?;
        if spec.members.is_empty() {
            return Err(RpcDistError::msg("group spec lists no members"));
        }
        let mut names = HashSet::new();
        let mut addrs = HashSet::new();
        for m in &spec.members {
            if !names.insert(&m.name) {
                return Err(RpcDistError::msg(format!(
                    "duplicate member name '{}'",
                    m.name
                )));
            }
            if !addrs.insert(m.addr) {
                return Err(RpcDistError::msg(format!(
                    "duplicate member address {}",
                    m.addr
                )));
            }
        }
        Ok(spec)
    }

    pub fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.members.iter().find(|m| m.name == name).map(|m| m.addr)
    }
}

/// Peer-to-peer wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum PeerMsg {
    /// First message on a fresh connection, from the connecting side.
    Hello { from: Address },

    Request {
        req_id: u64,
        oob: bool,
        want_reply: bool,
        payload: Bytes,
    },

    Reply {
        req_id: u64,
        result: Result<Reply, String>,
    },
}

/// Writes a length-prefixed message.
async fn write_msg<W>(
    conn_write: &mut W,
    msg: &PeerMsg,
) -> Result<(), RpcDistError>
where
    W: AsyncWrite + Unpin,
{
    let msg_bytes = encode_to_vec(msg)?;
    conn_write.write_u64(msg_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&msg_bytes[..]).await?;
    Ok(())
}

/// Reads a length-prefixed message.
async fn read_msg<R>(conn_read: &mut R) -> Result<PeerMsg, RpcDistError>
where
    R: AsyncRead + Unpin,
{
    let msg_len = conn_read.read_u64().await?; // receive length first
    if msg_len > MAX_FRAME_LEN {
        return Err(RpcDistError::msg(format!(
            "frame length {} too large",
            msg_len
        )));
    }
    let mut msg_buf: Vec<u8> = vec![0; msg_len as usize];
    conn_read.read_exact(&mut msg_buf[..]).await?;
    let msg = decode_from_slice(&msg_buf)?;
    Ok(msg)
}

fn locked<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RpcDistError> {
    mutex
        .lock()
        .map_err(|_| RpcDistError::msg("tcp group state poisoned"))
}

type ReplySender = oneshot::Sender<Result<Reply, RpcDistError>>;

/// A regular request queued for a connection's serving task.
struct QueuedRequest {
    req_id: u64,
    want_reply: bool,
    payload: Bytes,
}

/// State shared between the group handle and its background tasks.
struct TcpShared {
    me: Address,

    /// Configured member order.
    order: Vec<Address>,

    last_view_id: AtomicU64,
    view_tx: watch::Sender<Arc<View>>,

    /// Map from connected peer -> its outgoing message channel.
    peers: Mutex<HashMap<Address, mpsc::UnboundedSender<PeerMsg>>>,

    /// Map from request ID -> (target, waiting caller).
    pending: Mutex<HashMap<u64, (Address, ReplySender)>>,

    next_req: AtomicU64,

    handler: Mutex<Option<Arc<dyn RequestHandler>>>,

    /// Acceptor, connector, and connection tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpShared {
    /// Installs a new view made of myself plus connected peers. Must be
    /// called with the peers map locked.
    fn install_view(
        &self,
        peers: &HashMap<Address, mpsc::UnboundedSender<PeerMsg>>,
    ) {
        let members = self
            .order
            .iter()
            .filter(|&m| m == &self.me || peers.contains_key(m))
            .cloned()
            .collect();
        let id = self.last_view_id.fetch_add(1, Ordering::SeqCst) + 1;
        let view = View::new(id, members);
        pf_debug!(self.me; "installed view {}", view);
        self.view_tx.send_replace(Arc::new(view));
    }

    fn add_peer(
        &self,
        peer: &Address,
        tx_send: mpsc::UnboundedSender<PeerMsg>,
    ) -> Result<(), RpcDistError> {
        let mut peers = locked(&self.peers)?;
        peers.insert(peer.clone(), tx_send);
        self.install_view(&peers);
        Ok(())
    }

    /// Removes a peer if it is still served by the given channel, failing
    /// all requests waiting on it.
    fn remove_peer(
        &self,
        peer: &Address,
        tx_send: &mpsc::UnboundedSender<PeerMsg>,
    ) -> Result<(), RpcDistError> {
        {
            let mut peers = locked(&self.peers)?;
            match peers.get(peer) {
                Some(current) if current.same_channel(tx_send) => {
                    peers.remove(peer);
                    self.install_view(&peers);
                }
                _ => return Ok(()),
            }
        }
        // dropping the reply senders wakes up the callers
        locked(&self.pending)?.retain(|_, (target, _)| target != peer);
        Ok(())
    }

    fn sender_of(
        &self,
        peer: &Address,
    ) -> Result<mpsc::UnboundedSender<PeerMsg>, RpcDistError> {
        locked(&self.peers)?.get(peer).cloned().ok_or_else(|| {
            RpcDistError::msg(format!("peer {} not connected", peer))
        })
    }

    fn handler(&self) -> Result<Arc<dyn RequestHandler>, RpcDistError> {
        locked(&self.handler)?
            .clone()
            .ok_or_else(|| RpcDistError::msg("group not connected"))
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
    }

    /// Runs one established peer connection until it breaks.
    async fn run_connection(
        self: Arc<Self>,
        peer: Address,
        stream: TcpStream,
    ) {
        let (mut conn_read, mut conn_write) = stream.into_split();
        let (tx_send, mut rx_send) = mpsc::unbounded_channel::<PeerMsg>();
        if let Err(e) = self.add_peer(&peer, tx_send.clone()) {
            pf_error!(self.me; "error adding peer {}: {}", peer, e);
            return;
        }

        let me = self.me.clone();
        let writer_peer = peer.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx_send.recv().await {
                if let Err(e) = write_msg(&mut conn_write, &msg).await {
                    pf_error!(me; "error sending to {}: {}", writer_peer, e);
                    break;
                }
            }
        });

        let (tx_regular, mut rx_regular) =
            mpsc::unbounded_channel::<QueuedRequest>();
        let shared = self.clone();
        let server_peer = peer.clone();
        let server_tx_send = tx_send.clone();
        let server = tokio::spawn(async move {
            while let Some(req) = rx_regular.recv().await {
                Self::serve_request(
                    shared.clone(),
                    server_peer.clone(),
                    server_tx_send.clone(),
                    req.req_id,
                    req.want_reply,
                    req.payload,
                )
                .await;
            }
        });

        loop {
            match read_msg(&mut conn_read).await {
                Ok(msg) => {
                    pf_trace!(self.me; "recv from {} msg {:?}", peer, msg);
                    self.handle_msg(&peer, &tx_send, &tx_regular, msg);
                }
                Err(e) => {
                    pf_debug!(self.me; "connection to {} closed: {}", peer, e);
                    break;
                }
            }
        }

        server.abort();
        writer.abort();
        if let Err(e) = self.remove_peer(&peer, &tx_send) {
            pf_error!(self.me; "error removing peer {}: {}", peer, e);
        }
    }

    /// Handles one message from a peer. Regular requests go to the
    /// connection's serving task, so requests from one peer are dispatched
    /// in arrival order; OOB requests are served on their own task.
    fn handle_msg(
        self: &Arc<Self>,
        peer: &Address,
        tx_send: &mpsc::UnboundedSender<PeerMsg>,
        tx_regular: &mpsc::UnboundedSender<QueuedRequest>,
        msg: PeerMsg,
    ) {
        match msg {
            PeerMsg::Request {
                req_id,
                oob,
                want_reply,
                payload,
            } => {
                if oob {
                    tokio::spawn(Self::serve_request(
                        self.clone(),
                        peer.clone(),
                        tx_send.clone(),
                        req_id,
                        want_reply,
                        payload,
                    ));
                } else if tx_regular
                    .send(QueuedRequest {
                        req_id,
                        want_reply,
                        payload,
                    })
                    .is_err()
                {
                    pf_error!(self.me; "serving task for {} gone", peer);
                }
            }

            PeerMsg::Reply { req_id, result } => {
                let waiter = locked(&self.pending)
                    .ok()
                    .and_then(|mut pending| pending.remove(&req_id));
                if let Some((_, reply_tx)) = waiter {
                    // caller may have timed out already
                    let _ = reply_tx.send(result.map_err(RpcDistError::msg));
                }
            }

            PeerMsg::Hello { from } => {
                pf_warn!(self.me; "unexpected hello from {} via {}",
                                  from, peer);
            }
        }
    }

    async fn serve_request(
        self: Arc<Self>,
        peer: Address,
        tx_send: mpsc::UnboundedSender<PeerMsg>,
        req_id: u64,
        want_reply: bool,
        payload: Bytes,
    ) {
        let result = match self.handler() {
            Ok(handler) => handler.handle(&peer, payload).await,
            Err(e) => Err(e),
        };
        if want_reply {
            let reply = PeerMsg::Reply {
                req_id,
                result: result.map_err(|e| e.to_string()),
            };
            if tx_send.send(reply).is_err() {
                pf_debug!(self.me; "peer {} gone before reply", peer);
            }
        } else if let Err(e) = result {
            pf_warn!(self.me; "async request from {} failed: {}", peer, e);
        }
    }

    async fn acceptor_task(self: Arc<Self>, listener: TcpListener) {
        pf_debug!(self.me; "acceptor task spawned");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let handle =
                        tokio::spawn(self.clone().accepted_task(stream, addr));
                    self.track(handle);
                }
                Err(e) => {
                    pf_warn!(self.me; "error accepting connection: {}", e);
                    time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        }
    }

    async fn accepted_task(
        self: Arc<Self>,
        mut stream: TcpStream,
        addr: SocketAddr,
    ) {
        let _ = stream.set_nodelay(true);
        match read_msg(&mut stream).await {
            Ok(PeerMsg::Hello { from })
                if from != self.me && self.order.contains(&from) =>
            {
                self.run_connection(from, stream).await;
            }
            Ok(msg) => {
                pf_warn!(self.me; "unexpected first msg from {}: {:?}",
                                  addr, msg);
            }
            Err(e) => {
                pf_warn!(self.me; "error reading hello from {}: {}", addr, e);
            }
        }
    }

    async fn connector_task(self: Arc<Self>, peer: Address, addr: SocketAddr) {
        pf_debug!(self.me; "connector task for {} ({}) spawned", peer, addr);

        loop {
            match TcpStream::connect(addr).await {
                Ok(mut stream) => {
                    let _ = stream.set_nodelay(true);
                    let hello = PeerMsg::Hello {
                        from: self.me.clone(),
                    };
                    match write_msg(&mut stream, &hello).await {
                        Ok(()) => {
                            let shared = self.clone();
                            shared.run_connection(peer.clone(), stream).await
                        }
                        Err(e) => {
                            pf_warn!(self.me; "error greeting {}: {}", peer, e)
                        }
                    }
                }
                Err(e) => {
                    pf_trace!(self.me; "connecting to {} failed: {}", peer, e);
                }
            }
            time::sleep(RECONNECT_INTERVAL).await;
        }
    }
}

/// Binds a listener with address reuse enabled.
fn bind_listener(bind_addr: SocketAddr) -> Result<TcpListener, RpcDistError> {
    let socket = if bind_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(bind_addr)?;
    Ok(socket.listen(1024)?)
}

/// One member's handle on a static TCP group.
pub struct TcpGroup {
    me: Address,
    spec: GroupSpec,
    shared: Arc<TcpShared>,
}

impl TcpGroup {
    /// Creates a handle for member `me`, which must be listed in `spec`.
    pub fn new(
        me: impl Into<String>,
        spec: GroupSpec,
    ) -> Result<Self, RpcDistError> {
        let me = Address::new(me);
        if spec.addr_of(me.as_str()).is_none() {
            return Err(RpcDistError::msg(format!(
                "member '{}' not found in group spec",
                me
            )));
        }
        let order = spec
            .members
            .iter()
            .map(|m| Address::new(m.name.clone()))
            .collect();
        let (view_tx, _) = watch::channel(Arc::new(View::default()));

        Ok(TcpGroup {
            me: me.clone(),
            spec,
            shared: Arc::new(TcpShared {
                me,
                order,
                last_view_id: AtomicU64::new(0),
                view_tx,
                peers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_req: AtomicU64::new(0),
                handler: Mutex::new(None),
                tasks: Mutex::new(vec![]),
            }),
        })
    }

    /// Serves a request addressed to myself without touching the network.
    async fn call_self(
        &self,
        payload: Bytes,
        opts: CallOptions,
    ) -> Result<Option<Reply>, RpcDistError> {
        let handler = self.shared.handler()?;
        if !opts.is_sync() {
            let me = self.me.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(&me, payload).await {
                    pf_warn!(me; "async request to self failed: {}", e);
                }
            });
            return Ok(None);
        }

        let reply = handler.handle(&self.me, payload);
        match opts.timeout {
            Some(timeout) => time::timeout(timeout, reply)
                .await
                .map_err(|_| {
                    RpcDistError::msg(format!(
                        "call to {} timed out after {} ms",
                        self.me,
                        timeout.as_millis()
                    ))
                })?
                .map(Some),
            None => reply.await.map(Some),
        }
    }

    fn forget(&self, req_id: u64) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.remove(&req_id);
        }
    }
}

#[async_trait]
impl GroupService for TcpGroup {
    fn local_addr(&self) -> &Address {
        &self.me
    }

    async fn connect(
        &self,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RpcDistError> {
        {
            let mut slot = locked(&self.shared.handler)?;
            if slot.is_some() {
                return logged_err!(self.me; "already connected");
            }
            *slot = Some(handler);
        }

        let bind_addr = match self.spec.addr_of(self.me.as_str()) {
            Some(addr) => addr,
            None => return logged_err!(self.me; "no address configured"),
        };
        let listener = match bind_listener(bind_addr) {
            Ok(listener) => listener,
            Err(e) => {
                *locked(&self.shared.handler)? = None;
                return logged_err!(self.me; "binding {} failed: {}",
                                            bind_addr, e);
            }
        };

        {
            let peers = locked(&self.shared.peers)?;
            self.shared.install_view(&peers);
        }

        let acceptor =
            tokio::spawn(self.shared.clone().acceptor_task(listener));
        self.shared.track(acceptor);

        // connect actively to members listed before me
        for member in &self.spec.members {
            if member.name == self.me.as_str() {
                break;
            }
            let connector = tokio::spawn(self.shared.clone().connector_task(
                Address::new(member.name.clone()),
                member.addr,
            ));
            self.shared.track(connector);
        }

        pf_info!(self.me; "listening on {}", bind_addr);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RpcDistError> {
        for handle in locked(&self.shared.tasks)?.drain(..) {
            handle.abort();
        }
        locked(&self.shared.peers)?.clear();
        locked(&self.shared.pending)?.clear();
        *locked(&self.shared.handler)? = None;
        self.shared.view_tx.send_replace(Arc::new(View::default()));

        pf_info!(self.me; "disconnected from group");
        Ok(())
    }

    fn connections(&self) -> Vec<String> {
        let connected: Vec<Address> = match self.shared.peers.lock() {
            Ok(peers) => self
                .shared
                .order
                .iter()
                .filter(|&m| peers.contains_key(m))
                .cloned()
                .collect(),
            Err(_) => return vec![],
        };
        let mut in_flight: HashMap<Address, usize> = HashMap::new();
        if let Ok(pending) = self.shared.pending.lock() {
            for (target, _) in pending.values() {
                *in_flight.entry(target.clone()).or_default() += 1;
            }
        }

        connected
            .into_iter()
            .map(|peer| {
                let addr = self
                    .spec
                    .addr_of(peer.as_str())
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                let num = in_flight.get(&peer).copied().unwrap_or(0);
                format!("{} ({}): {} in flight", peer, addr, num)
            })
            .collect()
    }

    fn view_watch(&self) -> watch::Receiver<Arc<View>> {
        self.shared.view_tx.subscribe()
    }

    async fn call(
        &self,
        target: &Address,
        payload: Bytes,
        opts: CallOptions,
    ) -> Result<Option<Reply>, RpcDistError> {
        if target == &self.me {
            return self.call_self(payload, opts).await;
        }

        let tx_send = self.shared.sender_of(target)?;
        if !opts.is_sync() {
            tx_send.send(PeerMsg::Request {
                req_id: 0,
                oob: opts.oob,
                want_reply: false,
                payload,
            })?;
            return Ok(None);
        }

        let req_id = self.shared.next_req.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        locked(&self.shared.pending)?
            .insert(req_id, (target.clone(), reply_tx));
        if let Err(e) = tx_send.send(PeerMsg::Request {
            req_id,
            oob: opts.oob,
            want_reply: true,
            payload,
        }) {
            self.forget(req_id);
            return Err(e.into());
        }

        let result = match opts.timeout {
            Some(timeout) => match time::timeout(timeout, reply_rx).await {
                Ok(result) => result,
                Err(_) => {
                    self.forget(req_id);
                    return Err(RpcDistError::msg(format!(
                        "call to {} timed out after {} ms",
                        target,
                        timeout.as_millis()
                    )));
                }
            },
            None => reply_rx.await,
        };
        result
            .map_err(|_| {
                RpcDistError::msg(format!("connection to {} lost", target))
            })?
            .map(Some)
    }
}

#[cfg(test)]
mod tcp_tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(
            &self,
            _sender: &Address,
            payload: Bytes,
        ) -> Result<Reply, RpcDistError> {
            if payload.is_empty() {
                Err(RpcDistError::msg("empty payload"))
            } else {
                Ok(Reply::Bytes(payload))
            }
        }
    }

    /// Sleeps for as many millisecs as the first payload byte says.
    struct SleepyHandler;

    #[async_trait]
    impl RequestHandler for SleepyHandler {
        async fn handle(
            &self,
            _sender: &Address,
            payload: Bytes,
        ) -> Result<Reply, RpcDistError> {
            if let Some(&ms) = payload.first() {
                time::sleep(Duration::from_millis(ms as u64)).await;
            }
            Ok(Reply::Bytes(payload))
        }
    }

    fn spec_str(base_port: u16) -> String {
        format!(
            "[[members]]\nname = 'a'\naddr = '127.0.0.1:{}'\n\
             [[members]]\nname = 'b'\naddr = '127.0.0.1:{}'\n",
            base_port,
            base_port + 1
        )
    }

    async fn wait_view_size(
        group: &TcpGroup,
        size: usize,
    ) -> Result<(), RpcDistError> {
        let mut view_rx = group.view_watch();
        time::timeout(Duration::from_secs(10), async {
            while view_rx.borrow_and_update().size() != size {
                if view_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|_| RpcDistError::msg("view never reached expected size"))
    }

    #[test]
    fn parse_group_spec() -> Result<(), RpcDistError> {
        let spec = GroupSpec::parse(&spec_str(52700))?;
        assert_eq!(spec.members.len(), 2);
        let addr_b: SocketAddr = "127.0.0.1:52701".parse()?;
        assert_eq!(spec.addr_of("b"), Some(addr_b));
        assert_eq!(spec.addr_of("c"), None);

        assert!(GroupSpec::parse("").is_err());
        assert!(GroupSpec::parse("nodes = 3").is_err());
        let dup = "[[members]]\nname = 'a'\naddr = '127.0.0.1:1'\n\
                   [[members]]\nname = 'a'\naddr = '127.0.0.1:2'\n";
        assert!(GroupSpec::parse(dup).is_err());
        assert!(TcpGroup::new("c", spec).is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_member_group() -> Result<(), RpcDistError> {
        let spec = GroupSpec::parse(&spec_str(52710))?;
        let a = TcpGroup::new("a", spec.clone())?;
        let b = TcpGroup::new("b", spec)?;
        a.connect(Arc::new(EchoHandler)).await?;
        b.connect(Arc::new(EchoHandler)).await?;
        wait_view_size(&a, 2).await?;
        wait_view_size(&b, 2).await?;
        assert_eq!(
            a.view().members(),
            &[Address::from("a"), Address::from("b")]
        );
        let conns = a.connections();
        assert_eq!(conns.len(), 1);
        assert!(conns[0].starts_with("b (127.0.0.1:52711)"));

        let payload = Bytes::from_static(b"ping");
        let opts = CallOptions::sync(Some(Duration::from_secs(5)));
        assert_eq!(
            a.call(&"b".into(), payload.clone(), opts).await?,
            Some(Reply::Bytes(payload.clone()))
        );
        assert_eq!(
            b.call(&"b".into(), payload.clone(), opts).await?,
            Some(Reply::Bytes(payload.clone()))
        );
        assert!(b.call(&"a".into(), Bytes::new(), opts).await.is_err());
        assert_eq!(
            a.call(&"b".into(), payload.clone(), CallOptions::asynchronous())
                .await?,
            None
        );

        let targets = a.view().members().to_vec();
        let rsps = a
            .call_multi(&targets, payload.clone(), opts.with_oob(true))
            .await?
            .unwrap_or_default();
        assert_eq!(rsps.len(), 2);
        assert!(rsps.iter().all(|(_, rsp)| rsp.is_ok()));

        b.disconnect().await?;
        wait_view_size(&a, 1).await?;
        assert!(a.call(&"b".into(), payload, opts).await.is_err());
        a.disconnect().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oob_overtakes_regular() -> Result<(), RpcDistError> {
        let spec = GroupSpec::parse(&spec_str(52720))?;
        let a = TcpGroup::new("a", spec.clone())?;
        let b = TcpGroup::new("b", spec)?;
        a.connect(Arc::new(SleepyHandler)).await?;
        b.connect(Arc::new(SleepyHandler)).await?;
        wait_view_size(&a, 2).await?;

        // slow regular request from a occupies b's serving task for a
        a.call(
            &"b".into(),
            Bytes::from_static(&[250]),
            CallOptions::asynchronous(),
        )
        .await?;
        let opts = CallOptions::sync(Some(Duration::from_millis(150)))
            .with_oob(true);
        let reply = a.call(&"b".into(), Bytes::from_static(&[0]), opts).await?;
        assert_eq!(reply, Some(Reply::Bytes(Bytes::from_static(&[0]))));
        let opts = CallOptions::sync(Some(Duration::from_millis(100)));
        assert!(a
            .call(&"b".into(), Bytes::from_static(&[0]), opts)
            .await
            .is_err());

        // regular order is kept once the slow one is done
        let opts = CallOptions::sync(Some(Duration::from_secs(5)));
        let reply = a.call(&"b".into(), Bytes::from_static(&[1]), opts).await?;
        assert_eq!(reply, Some(Reply::Bytes(Bytes::from_static(&[1]))));

        a.disconnect().await?;
        b.disconnect().await?;
        Ok(())
    }
}
