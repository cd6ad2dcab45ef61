// Simulated cluster for integration tests.
//
// Routes RPCs between in-process peers over a lossy, partitionable network
// and collects every peer's apply stream for assertions.

use async_trait::async_trait;
use conclave::config::RaftConfig;
use conclave::error::{ConclaveError, Result};
use conclave::raft::{
    AppendEntriesRequest, AppendEntriesResponse, MemoryPersister, Persister, RaftPeer,
    RaftTransport, RequestVoteRequest, RequestVoteResponse,
};
use conclave::types::{Committed, LogIndex, NodeId, Term};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// A transport into a dead network: every call is dropped.
pub struct DeadTransport;

#[async_trait]
impl RaftTransport for DeadTransport {
    async fn request_vote(
        &self,
        _target: NodeId,
        _request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        Err(ConclaveError::Transport("dropped".into()))
    }

    async fn append_entries(
        &self,
        _target: NodeId,
        _request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        Err(ConclaveError::Transport("dropped".into()))
    }
}

/// The simulated network: per-node reachability plus the live peer handles.
struct Net {
    connected: Mutex<Vec<bool>>,
    peers: Mutex<Vec<Option<Arc<RaftPeer>>>>,
    reliable: AtomicBool,
}

impl Net {
    fn new(n: usize) -> Self {
        Self {
            connected: Mutex::new(vec![true; n]),
            peers: Mutex::new((0..n).map(|_| None).collect()),
            reliable: AtomicBool::new(true),
        }
    }

    fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        let connected = self.connected.lock();
        connected[from] && connected[to]
    }

    fn peer(&self, id: NodeId) -> Option<Arc<RaftPeer>> {
        self.peers.lock()[id].clone()
    }
}

/// Transport endpoint for one peer. Messages are dropped while either side
/// is disconnected; unreliable mode adds random delay and loss.
struct SimTransport {
    net: Arc<Net>,
    from: NodeId,
}

impl SimTransport {
    /// Simulated propagation of one message. False means it was lost.
    async fn propagate(&self) -> bool {
        if self.net.reliable.load(Ordering::Relaxed) {
            return true;
        }
        let (delay_ms, lost) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..=27u64), rng.gen_bool(0.1))
        };
        sleep(Duration::from_millis(delay_ms)).await;
        !lost
    }

    fn target(&self, target: NodeId) -> Result<Arc<RaftPeer>> {
        if !self.net.can_communicate(self.from, target) {
            return Err(ConclaveError::Transport("unreachable".into()));
        }
        let peer = self
            .net
            .peer(target)
            .ok_or_else(|| ConclaveError::Transport("peer down".into()))?;
        if peer.is_killed() {
            return Err(ConclaveError::Transport("peer down".into()));
        }
        Ok(peer)
    }
}

#[async_trait]
impl RaftTransport for SimTransport {
    async fn request_vote(
        &self,
        target: NodeId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse> {
        if !self.propagate().await {
            return Err(ConclaveError::Transport("request lost".into()));
        }
        let peer = self.target(target)?;
        let reply = peer.handle_request_vote(request);
        if !self.propagate().await || !self.net.can_communicate(self.from, target) {
            return Err(ConclaveError::Transport("reply lost".into()));
        }
        Ok(reply)
    }

    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        if !self.propagate().await {
            return Err(ConclaveError::Transport("request lost".into()));
        }
        let peer = self.target(target)?;
        let reply = peer.handle_append_entries(request);
        if !self.propagate().await || !self.net.can_communicate(self.from, target) {
            return Err(ConclaveError::Transport("reply lost".into()));
        }
        Ok(reply)
    }
}

/// Applied commands of one peer incarnation; position k holds index k + 1.
#[derive(Default)]
struct AppliedLog {
    entries: Vec<Vec<u8>>,
    violation: Option<String>,
}

/// A cluster of in-process peers wired through the simulated network.
pub struct Cluster {
    n: usize,
    net: Arc<Net>,
    persisters: Mutex<Vec<Arc<MemoryPersister>>>,
    applied: Mutex<Vec<Arc<Mutex<AppliedLog>>>>,
    /// Every (index, command) any peer ever applied; all peers must agree.
    committed: Arc<Mutex<HashMap<LogIndex, Vec<u8>>>>,
}

impl Cluster {
    /// Start `n` connected peers. Must run inside a tokio runtime.
    pub fn new(n: usize) -> Arc<Self> {
        // First caller in the process wins; later calls are no-ops.
        let _ = conclave::observability::init("warn", false);

        let cluster = Arc::new(Self {
            n,
            net: Arc::new(Net::new(n)),
            persisters: Mutex::new((0..n).map(|_| Arc::new(MemoryPersister::new())).collect()),
            applied: Mutex::new((0..n).map(|_| Arc::new(Mutex::new(AppliedLog::default()))).collect()),
            committed: Arc::new(Mutex::new(HashMap::new())),
        });
        for i in 0..n {
            cluster.boot(i);
        }
        cluster
    }

    /// Start (or restart) peer `i` with its current persister and a fresh
    /// apply collector.
    fn boot(&self, i: NodeId) {
        let (tx, rx) = mpsc::channel(256);
        let applied = Arc::new(Mutex::new(AppliedLog::default()));
        self.applied.lock()[i] = Arc::clone(&applied);
        tokio::spawn(Self::collect(rx, applied, Arc::clone(&self.committed), i));

        let transport = Arc::new(SimTransport {
            net: Arc::clone(&self.net),
            from: i,
        });
        let persister = self.persisters.lock()[i].clone();
        let peer = RaftPeer::spawn(RaftConfig::new(i, self.n), transport, persister, tx)
            .expect("spawn peer");
        self.net.peers.lock()[i] = Some(peer);
    }

    /// Drain one incarnation's apply channel, asserting contiguous indices
    /// and cross-peer agreement.
    async fn collect(
        mut rx: mpsc::Receiver<Committed>,
        applied: Arc<Mutex<AppliedLog>>,
        committed: Arc<Mutex<HashMap<LogIndex, Vec<u8>>>>,
        node: NodeId,
    ) {
        while let Some(msg) = rx.recv().await {
            let mut log = applied.lock();
            let expected = log.entries.len() as LogIndex + 1;
            if msg.index != expected {
                log.violation = Some(format!(
                    "peer {} applied index {} but expected {}",
                    node, msg.index, expected
                ));
                continue;
            }
            let command = msg.command_bytes().to_vec();
            let mut global = committed.lock();
            match global.get(&msg.index) {
                Some(existing) if existing != &command => {
                    log.violation = Some(format!(
                        "peer {} disagrees with committed history at index {}",
                        node, msg.index
                    ));
                    continue;
                }
                Some(_) => {}
                None => {
                    global.insert(msg.index, command.clone());
                }
            }
            log.entries.push(command);
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn peer(&self, i: NodeId) -> Option<Arc<RaftPeer>> {
        self.net.peer(i)
    }

    pub fn is_connected(&self, i: NodeId) -> bool {
        self.net.connected.lock()[i]
    }

    pub fn disconnect(&self, i: NodeId) {
        self.net.connected.lock()[i] = false;
    }

    pub fn connect(&self, i: NodeId) {
        self.net.connected.lock()[i] = true;
    }

    /// Toggle random delay and loss on every link.
    pub fn set_unreliable(&self, unreliable: bool) {
        self.net.reliable.store(!unreliable, Ordering::Relaxed);
    }

    /// Kill peer `i` and forget it, keeping only what it persisted.
    pub fn crash(&self, i: NodeId) {
        self.disconnect(i);
        if let Some(peer) = self.net.peers.lock()[i].take() {
            peer.kill();
        }
        // The restarted peer sees only the blob that made it to stable
        // storage before the crash.
        let mut persisters = self.persisters.lock();
        let blob = persisters[i].read().expect("read persisted state");
        persisters[i] = Arc::new(MemoryPersister::with_state(blob));
    }

    /// Restart a crashed peer from its persisted state and reconnect it.
    pub fn restart(&self, i: NodeId) {
        self.boot(i);
        self.connect(i);
    }

    pub fn kill_all(&self) {
        let mut peers = self.net.peers.lock();
        for slot in peers.iter_mut() {
            if let Some(peer) = slot.take() {
                peer.kill();
            }
        }
    }

    /// Commands applied by peer `i`'s current incarnation, index 1 first.
    /// Panics on any recorded ordering or agreement violation.
    pub fn applied(&self, i: NodeId) -> Vec<Vec<u8>> {
        let log = self.applied.lock()[i].clone();
        let log = log.lock();
        if let Some(violation) = &log.violation {
            panic!("{}", violation);
        }
        log.entries.clone()
    }

    /// How many current incarnations have applied `index`, and the agreed
    /// command at that index, if any.
    pub fn n_committed(&self, index: LogIndex) -> (usize, Option<Vec<u8>>) {
        let mut count = 0;
        for i in 0..self.n {
            let log = self.applied.lock()[i].clone();
            let log = log.lock();
            if let Some(violation) = &log.violation {
                panic!("{}", violation);
            }
            if log.entries.len() as LogIndex >= index {
                count += 1;
            }
        }
        let command = self.committed.lock().get(&index).cloned();
        (count, command)
    }

    /// Check that at most one connected peer reports leadership per term,
    /// and return the leader of the newest term. Panics when no leader
    /// emerges within a bounded number of election timeouts.
    pub async fn check_one_leader(&self) -> NodeId {
        for _ in 0..10 {
            let wait_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(450..=550u64)
            };
            sleep(Duration::from_millis(wait_ms)).await;

            let mut leaders: HashMap<Term, Vec<NodeId>> = HashMap::new();
            for i in 0..self.n {
                if !self.is_connected(i) {
                    continue;
                }
                if let Some(peer) = self.peer(i) {
                    let (term, is_leader) = peer.get_state();
                    if is_leader {
                        leaders.entry(term).or_default().push(i);
                    }
                }
            }

            let mut newest: Option<(Term, NodeId)> = None;
            for (&term, ids) in &leaders {
                assert!(
                    ids.len() <= 1,
                    "term {} has {} (>1) leaders",
                    term,
                    ids.len()
                );
                if newest.map_or(true, |(t, _)| term > t) {
                    newest = Some((term, ids[0]));
                }
            }
            if let Some((_, leader)) = newest {
                return leader;
            }
        }
        panic!("expected one leader, got none");
    }

    /// All connected peers agree on the current term; returns it.
    pub fn check_terms(&self) -> Term {
        let mut term = None;
        for i in 0..self.n {
            if !self.is_connected(i) {
                continue;
            }
            if let Some(peer) = self.peer(i) {
                let (t, _) = peer.get_state();
                match term {
                    None => term = Some(t),
                    Some(existing) => assert_eq!(existing, t, "peers disagree on term"),
                }
            }
        }
        term.expect("no connected peers")
    }

    /// Submit `cmd` until a leader accepts it and at least `expected`
    /// incarnations apply it; returns the index it committed at.
    pub async fn one(&self, cmd: &[u8], expected: usize, retry: bool) -> LogIndex {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut cursor = 0;
        while Instant::now() < deadline {
            let mut started = None;
            for _ in 0..self.n {
                cursor = (cursor + 1) % self.n;
                if !self.is_connected(cursor) {
                    continue;
                }
                if let Some(peer) = self.peer(cursor) {
                    if let Ok((index, _term)) = peer.start(cmd.to_vec()) {
                        started = Some(index);
                        break;
                    }
                }
            }

            let Some(index) = started else {
                sleep(Duration::from_millis(50)).await;
                continue;
            };

            let wait_until = Instant::now() + Duration::from_secs(2);
            while Instant::now() < wait_until {
                let (count, committed) = self.n_committed(index);
                if count >= expected && committed.as_deref() == Some(cmd) {
                    return index;
                }
                sleep(Duration::from_millis(20)).await;
            }
            if !retry {
                panic!("one({:?}) failed to reach agreement", cmd);
            }
        }
        panic!("one({:?}) failed to reach agreement", cmd);
    }

    /// Wait until peer `i`'s current incarnation has applied at least
    /// `want` entries, returning them.
    pub async fn wait_applied(&self, i: NodeId, want: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let entries = self.applied(i);
            if entries.len() >= want {
                return entries;
            }
            assert!(
                Instant::now() < deadline,
                "peer {} applied {} of {} expected entries",
                i,
                entries.len(),
                want
            );
            sleep(Duration::from_millis(20)).await;
        }
    }
}
