use super::announce::{AnnounceEvent, AnnounceSink};
use super::crawler::Crawler;
use super::error::DhtError;
use super::message::{
    DhtBody, DhtMessage, DhtQuery, DhtResponse, TransactionId, ERROR_METHOD_UNKNOWN,
    ERROR_PROTOCOL,
};
use super::node::{Node, NodeId};
use super::routing::{RoutingTable, K};
use super::token::TokenSecrets;
use super::transaction::{Pending, ReplySender, Transactions};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

const COMMAND_INBOX: usize = 256;
const BOOTSTRAP_MIN_INTERVAL: Duration = Duration::from_secs(30);
const MAX_DATAGRAM: usize = 65535;
/// Floor for the periodic ticks; `interval` panics on a zero period.
const MIN_TICK: Duration = Duration::from_millis(100);

/// Settings for the DHT transport and crawl loop.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    pub bind: SocketAddr,
    /// `host:port` strings, resolved at every bootstrap.
    pub bootstrap: Vec<String>,
    pub node_id: Option<NodeId>,
    pub query_timeout: Duration,
    /// Unanswered queries tolerated before a contact is evicted.
    pub ping_retries: u8,
    pub refresh_interval: Duration,
    pub find_node_per_tick: usize,
    pub pings_per_tick: usize,
    /// Below this many contacts the bootstrap routers are queried again.
    pub min_nodes: usize,
    pub questionable_after: Duration,
    pub token_rotation: Duration,
    pub max_pending: usize,
    /// Present an id close to each remote node instead of our own.
    pub neighbor_mode: bool,
    /// Require a token we issued before accepting an `announce_peer`.
    pub verify_tokens: bool,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 6881)),
            bootstrap: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
            node_id: None,
            query_timeout: Duration::from_secs(5),
            ping_retries: 2,
            refresh_interval: Duration::from_secs(3),
            find_node_per_tick: 8,
            pings_per_tick: 8,
            min_nodes: 8,
            questionable_after: Duration::from_secs(15 * 60),
            token_rotation: Duration::from_secs(5 * 60),
            max_pending: 4096,
            neighbor_mode: false,
            verify_tokens: true,
        }
    }
}

/// Counters kept by the DHT loop.
#[derive(Debug, Clone, Default)]
pub struct DhtStats {
    pub nodes: usize,
    pub verified_nodes: usize,
    pub pending_queries: usize,
    pub datagrams_in: u64,
    pub malformed: u64,
    pub queries_answered: u64,
    pub queries_sent: u64,
    pub replies_matched: u64,
    pub timeouts: u64,
    pub evicted: u64,
    pub announces: u64,
    pub announces_dropped: u64,
    pub bad_tokens: u64,
}

enum Command {
    Ping {
        addr: SocketAddr,
        reply: ReplySender,
    },
    FindNode {
        addr: SocketAddr,
        target: NodeId,
        reply: ReplySender,
    },
    AddContact(SocketAddr),
    Bootstrapped(Vec<SocketAddr>),
    Closest {
        target: NodeId,
        count: usize,
        reply: oneshot::Sender<Vec<Node>>,
    },
    Stats(oneshot::Sender<DhtStats>),
    Shutdown,
}

/// Cloneable front door to a running [`DhtServer`].
///
/// Every call is a message to the loop's inbox; the routing table and the
/// transaction table are never touched from outside the loop.
#[derive(Clone)]
pub struct DhtHandle {
    commands: mpsc::Sender<Command>,
    local_addr: SocketAddr,
    id: NodeId,
}

impl DhtHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub async fn ping(&self, addr: SocketAddr) -> Result<DhtResponse, DhtError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Ping { addr, reply }).await?;
        rx.await.map_err(|_| DhtError::Shutdown)?
    }

    pub async fn find_node(
        &self,
        addr: SocketAddr,
        target: NodeId,
    ) -> Result<DhtResponse, DhtError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FindNode {
            addr,
            target,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DhtError::Shutdown)?
    }

    /// Pings `addr`; if it answers it enters the table as verified.
    pub async fn add_contact(&self, addr: SocketAddr) -> Result<(), DhtError> {
        self.send(Command::AddContact(addr)).await
    }

    pub async fn closest(&self, target: NodeId, count: usize) -> Result<Vec<Node>, DhtError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Closest {
            target,
            count,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DhtError::Shutdown)
    }

    pub async fn stats(&self) -> Result<DhtStats, DhtError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        rx.await.map_err(|_| DhtError::Shutdown)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> Result<(), DhtError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DhtError::Shutdown)
    }
}

/// The DHT node: one UDP socket and everything that depends on it.
///
/// `run` is a single task that owns the routing table, the outstanding
/// transactions and the token secrets. It answers incoming queries, matches
/// replies, expires unanswered queries, executes the [`Crawler`]'s plan on
/// every tick and hands valid `announce_peer` events to the sink.
///
/// ```no_run
/// use dhtharvest::dht::{AnnounceEvent, DhtConfig, DhtServer};
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (tx, mut rx) = mpsc::channel::<AnnounceEvent>(1024);
/// let (server, handle) = DhtServer::bind(DhtConfig::default(), tx).await?;
/// tokio::spawn(server.run());
///
/// while let Some(event) = rx.recv().await {
///     println!("{} announced by {}", event.info_hash, event.peer);
/// }
/// # handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct DhtServer {
    socket: UdpSocket,
    config: DhtConfig,
    our_id: NodeId,
    table: RoutingTable,
    transactions: Transactions,
    tokens: TokenSecrets,
    crawler: Crawler,
    announces: Box<dyn AnnounceSink>,
    commands: mpsc::Receiver<Command>,
    loopback: mpsc::WeakSender<Command>,
    last_bootstrap: Option<Instant>,
    stats: DhtStats,
}

impl DhtServer {
    pub async fn bind(
        config: DhtConfig,
        announces: impl AnnounceSink,
    ) -> Result<(Self, DhtHandle), DhtError> {
        let socket = UdpSocket::bind(config.bind).await?;
        let local_addr = socket.local_addr()?;
        let our_id = config.node_id.unwrap_or_else(NodeId::generate);

        info!("DHT bound to {} with id {}", local_addr, our_id);

        let (tx, commands) = mpsc::channel(COMMAND_INBOX);
        let handle = DhtHandle {
            commands: tx.clone(),
            local_addr,
            id: our_id,
        };

        let server = Self {
            socket,
            our_id,
            table: RoutingTable::new(our_id),
            transactions: Transactions::new(config.query_timeout, config.max_pending),
            tokens: TokenSecrets::new(),
            crawler: Crawler::new(
                config.find_node_per_tick,
                config.pings_per_tick,
                config.min_nodes,
                config.questionable_after,
            ),
            announces: Box::new(announces),
            commands,
            loopback: tx.downgrade(),
            last_bootstrap: None,
            stats: DhtStats::default(),
            config,
        };

        Ok((server, handle))
    }

    pub fn spawn(self) -> JoinHandle<Result<(), DhtError>> {
        tokio::spawn(self.run())
    }

    /// Runs until [`DhtHandle::shutdown`] is called or every handle is
    /// dropped.
    pub async fn run(mut self) -> Result<(), DhtError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        let mut crawl_interval = interval(self.config.refresh_interval.max(MIN_TICK));
        let mut token_interval = interval(self.config.token_rotation.max(MIN_TICK));
        crawl_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        token_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        token_interval.tick().await;

        self.start_bootstrap();

        loop {
            let next_expiry = self.transactions.next_deadline();
            let expiry_at =
                tokio::time::Instant::from_std(next_expiry.unwrap_or_else(Instant::now));

            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, addr)) => self.handle_datagram(&buf[..n], addr).await,
                        Err(e) => debug!("DHT recv error: {}", e),
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                _ = sleep_until(expiry_at), if next_expiry.is_some() => {
                    self.expire_queries();
                }
                _ = crawl_interval.tick() => {
                    self.crawl_tick().await;
                }
                _ = token_interval.tick() => {
                    self.tokens.rotate();
                    trace!("DHT token secret rotated");
                }
            }
        }

        for pending in self.transactions.expire(Instant::now() + self.config.query_timeout) {
            pending.fail(DhtError::Shutdown);
        }
        info!(
            "DHT loop stopped with {} nodes in routing table",
            self.table.len()
        );
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Ping { addr, reply } => {
                self.send_query(addr, None, DhtQuery::Ping, Some(reply))
                    .await;
            }
            Command::FindNode {
                addr,
                target,
                reply,
            } => {
                self.send_query(addr, None, DhtQuery::FindNode { target }, Some(reply))
                    .await;
            }
            Command::AddContact(addr) => {
                self.send_query(addr, None, DhtQuery::Ping, None).await;
            }
            Command::Bootstrapped(addrs) => {
                debug!("Querying {} bootstrap nodes", addrs.len());
                let target = self.our_id;
                for addr in addrs {
                    self.send_query(addr, None, DhtQuery::FindNode { target }, None)
                        .await;
                }
            }
            Command::Closest {
                target,
                count,
                reply,
            } => {
                let _ = reply.send(self.table.closest(&target, count));
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn snapshot(&self) -> DhtStats {
        DhtStats {
            nodes: self.table.len(),
            verified_nodes: self.table.verified_len(),
            pending_queries: self.transactions.len(),
            ..self.stats.clone()
        }
    }

    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        self.stats.datagrams_in += 1;

        let msg = match DhtMessage::parse(data) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.malformed += 1;
                trace!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        match msg.body {
            DhtBody::Query { id, query } => {
                self.table.insert(Node::new(id, addr), false);
                self.handle_query(msg.transaction_id, addr, id, query)
                    .await;
            }
            DhtBody::Response(response) => {
                self.handle_response(&msg.transaction_id, addr, response);
            }
            DhtBody::Error { code, message } => {
                if let Some(pending) = self.transactions.resolve(&msg.transaction_id, addr) {
                    trace!("{} to {} failed: {} {}", pending.method, addr, code, message);
                    pending.fail(DhtError::Remote { code, message });
                }
            }
            DhtBody::InvalidQuery { reason } => {
                self.stats.malformed += 1;
                let reply = DhtMessage {
                    transaction_id: msg.transaction_id,
                    body: DhtBody::InvalidQuery { reason },
                };
                self.send(addr, &reply).await;
            }
        }
    }

    fn handle_response(&mut self, tid: &[u8], addr: SocketAddr, response: DhtResponse) {
        let Some(pending) = self.transactions.resolve(tid, addr) else {
            trace!("Ignoring unmatched reply from {}", addr);
            return;
        };
        self.stats.replies_matched += 1;

        if let Some(expected) = pending.node_id {
            if expected != response.id {
                self.table.remove(&expected);
            }
        }

        self.table.insert(Node::new(response.id, addr), true);
        if let Some(nodes) = &response.nodes {
            for node in nodes {
                self.table.insert(node.clone(), false);
            }
        }

        if let Some(reply) = pending.reply {
            let _ = reply.send(Ok(response));
        }
    }

    async fn handle_query(
        &mut self,
        tid: TransactionId,
        addr: SocketAddr,
        sender: NodeId,
        query: DhtQuery,
    ) {
        let our_id = self.id_for(&sender);

        let reply = match query {
            DhtQuery::Ping => DhtMessage::response(tid, DhtResponse::new(our_id)),
            DhtQuery::FindNode { target } => DhtMessage::response(
                tid,
                DhtResponse::new(our_id).with_nodes(self.table.closest(&target, K)),
            ),
            DhtQuery::GetPeers { info_hash } => {
                let nodes = self.table.closest(&NodeId(info_hash.0), K);
                DhtMessage::response(
                    tid,
                    DhtResponse::new(our_id)
                        .with_token(self.tokens.issue(addr.ip()))
                        .with_nodes(nodes),
                )
            }
            DhtQuery::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            } => {
                let port = if implied_port { addr.port() } else { port };

                if self.config.verify_tokens && !self.tokens.validate(addr.ip(), &token) {
                    self.stats.bad_tokens += 1;
                    trace!("Rejecting announce_peer from {}: bad token", addr);
                    DhtMessage::error(tid, ERROR_PROTOCOL, "bad token")
                } else if port == 0 {
                    DhtMessage::error(tid, ERROR_PROTOCOL, "invalid port")
                } else {
                    let event = AnnounceEvent {
                        info_hash,
                        peer: SocketAddr::new(addr.ip(), port),
                    };
                    if self.announces.offer(event) {
                        self.stats.announces += 1;
                    } else {
                        self.stats.announces_dropped += 1;
                    }
                    DhtMessage::response(tid, DhtResponse::new(our_id))
                }
            }
            DhtQuery::Unknown { method } => {
                trace!("Unknown DHT method {:?} from {}", method, addr);
                DhtMessage::error(tid, ERROR_METHOD_UNKNOWN, "Method Unknown")
            }
        };

        self.stats.queries_answered += 1;
        self.send(addr, &reply).await;
    }

    async fn send_query(
        &mut self,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        query: DhtQuery,
        reply: Option<ReplySender>,
    ) {
        let method = query.known_method().unwrap_or("unknown");

        let pending = Pending {
            addr,
            node_id,
            method,
            reply,
        };

        let tid = match self.transactions.register(pending) {
            Ok(tid) => tid,
            Err(pending) => {
                trace!("Dropping {} to {}: too many queries in flight", method, addr);
                pending.fail(DhtError::TooManyPending);
                return;
            }
        };

        let our_id = match node_id {
            Some(remote) => self.id_for(&remote),
            None => self.our_id,
        };
        let msg = DhtMessage::query(tid.clone(), our_id, query);

        match self.socket.send_to(&msg.encode(), addr).await {
            Ok(_) => self.stats.queries_sent += 1,
            Err(e) => {
                debug!("Failed to send {} to {}: {}", method, addr, e);
                if let Some(pending) = self.transactions.cancel(&tid) {
                    pending.fail(DhtError::Io(e));
                }
            }
        }
    }

    async fn send(&self, addr: SocketAddr, msg: &DhtMessage) {
        if let Err(e) = self.socket.send_to(&msg.encode(), addr).await {
            trace!("Failed to reply to {}: {}", addr, e);
        }
    }

    fn expire_queries(&mut self) {
        for pending in self.transactions.expire(Instant::now()) {
            self.stats.timeouts += 1;

            if let Some(id) = pending.node_id {
                if self.table.mark_failed(&id, self.config.ping_retries) {
                    self.stats.evicted += 1;
                    debug!("Evicted unresponsive node {} at {}", id, pending.addr);
                }
            }

            pending.fail(DhtError::Timeout);
        }
    }

    async fn crawl_tick(&mut self) {
        let plan = self.crawler.plan(&self.table);

        if plan.bootstrap {
            self.start_bootstrap();
        }

        for probe in plan.probes {
            self.send_query(
                probe.node.addr,
                Some(probe.node.id),
                DhtQuery::FindNode {
                    target: probe.target,
                },
                None,
            )
            .await;
        }

        for node in plan.pings {
            self.send_query(node.addr, Some(node.id), DhtQuery::Ping, None)
                .await;
        }
    }

    /// Resolves the bootstrap routers off-loop; the addresses come back
    /// through the inbox as [`Command::Bootstrapped`].
    fn start_bootstrap(&mut self) {
        if self.config.bootstrap.is_empty() {
            return;
        }
        if let Some(at) = self.last_bootstrap {
            if at.elapsed() < BOOTSTRAP_MIN_INTERVAL {
                return;
            }
        }
        self.last_bootstrap = Some(Instant::now());

        let hosts = self.config.bootstrap.clone();
        let loopback = self.loopback.clone();

        tokio::spawn(async move {
            let addrs = resolve_bootstrap(&hosts).await;
            if addrs.is_empty() {
                warn!("No bootstrap node could be resolved");
                return;
            }
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::Bootstrapped(addrs)).await;
            }
        });
    }

    fn id_for(&self, remote: &NodeId) -> NodeId {
        if self.config.neighbor_mode {
            self.our_id.neighbor(remote)
        } else {
            self.our_id
        }
    }
}

async fn resolve_bootstrap(hosts: &[String]) -> Vec<SocketAddr> {
    let lookups = hosts.iter().map(|host| async move {
        match tokio::net::lookup_host(host.as_str()).await {
            Ok(addrs) => addrs.filter(SocketAddr::is_ipv4).collect::<Vec<_>>(),
            Err(e) => {
                warn!("Failed to resolve bootstrap node {}: {}", host, e);
                Vec::new()
            }
        }
    });

    futures::future::join_all(lookups)
        .await
        .into_iter()
        .flatten()
        .collect()
}
