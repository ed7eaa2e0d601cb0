//! In-process mesh engine: routes whisper/shout between nodes created on the
//! same mesh, with instant discovery on start and a blocking inbox per node.
//! Every resource it hands out (envelope, frame, list, string) is tracked in
//! a slab until the matching destroy call, so tests can assert that bridge
//! operations release everything they claimed.
//!
//! Delivery format: a received envelope contains exactly the sender's payload
//! frames; the engine never adds framing of its own.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{errcode, Engine, RawFrame, RawList, RawMsg, RawNode, RawStr};

const DEFAULT_PORT: u16 = 5670;
const DEFAULT_INTERVAL_MS: u64 = 1000;

/// One node's blocking receive queue. Shared between the mesh state and a
/// receiver thread, so a pending `recv` can be woken without the state lock.
struct Inbox {
    queue: Mutex<InboxQueue>,
    ready: Condvar,
}

struct InboxQueue {
    messages: VecDeque<Vec<Vec<u8>>>,
    closed: bool,
}

impl Inbox {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(InboxQueue {
                messages: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, InboxQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, message: Vec<Vec<u8>>) {
        self.lock().messages.push_back(message);
        self.ready.notify_one();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn open(&self) {
        self.lock().closed = false;
    }

    /// Block until a message or close. Remaining queued messages are drained
    /// before the close takes effect.
    fn pop_blocking(&self) -> Option<Vec<Vec<u8>>> {
        let mut q = self.lock();
        loop {
            if let Some(m) = q.messages.pop_front() {
                return Some(m);
            }
            if q.closed {
                return None;
            }
            q = self.ready.wait(q).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct NodeSlot {
    uuid: String,
    name: String,
    headers: BTreeMap<String, String>,
    groups: BTreeSet<String>,
    running: bool,
    verbose: bool,
    port: u16,
    interval_ms: u64,
    interface: Option<String>,
    endpoint: Option<String>,
    gossip_bind: Option<String>,
    gossip_connect: Option<String>,
    inbox: Arc<Inbox>,
}

impl NodeSlot {
    fn address(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("tcp://127.0.0.1:{}", self.port),
        }
    }
}

#[derive(Default)]
struct MeshState {
    next_token: u64,
    nodes: HashMap<u64, NodeSlot>,
    msgs: HashMap<u64, VecDeque<u64>>,
    frames: HashMap<u64, Vec<u8>>,
    lists: HashMap<u64, VecDeque<u64>>,
    strs: HashMap<u64, String>,
}

impl MeshState {
    fn alloc(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn new_list(&mut self, items: Vec<String>) -> RawList {
        let tokens = items
            .into_iter()
            .map(|s| {
                let t = self.alloc();
                self.strs.insert(t, s);
                t
            })
            .collect();
        let list = self.alloc();
        self.lists.insert(list, tokens);
        RawList(list)
    }

    fn new_str(&mut self, s: String) -> RawStr {
        let t = self.alloc();
        self.strs.insert(t, s);
        RawStr(t)
    }

    /// Consume an envelope: remove it and its frames, returning the bytes.
    fn take_msg(&mut self, msg: RawMsg) -> Vec<Vec<u8>> {
        let frames = self.msgs.remove(&msg.0).unwrap_or_default();
        frames
            .into_iter()
            .filter_map(|t| self.frames.remove(&t))
            .collect()
    }
}

/// Process-local mesh. Implements [`Engine`]; all nodes created on one mesh
/// can discover and message each other.
pub struct LoopbackMesh {
    state: Mutex<MeshState>,
    err: AtomicI32,
}

impl LoopbackMesh {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MeshState::default()),
            err: AtomicI32::new(0),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_err(&self, code: i32) {
        self.err.store(code, Ordering::Release);
    }

    /// Envelopes, frames, lists, and strings currently allocated and not yet
    /// destroyed. Zero after every well-behaved bridge operation.
    pub fn outstanding_resources(&self) -> usize {
        let st = self.lock();
        st.msgs.len() + st.frames.len() + st.lists.len() + st.strs.len()
    }

    /// Nodes currently allocated on this mesh.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }
}

impl Default for LoopbackMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LoopbackMesh {
    fn node_new(&self, name: Option<&str>) -> Option<RawNode> {
        let uuid = Uuid::new_v4().simple().to_string().to_uppercase();
        let name = match name {
            Some(n) => n.to_string(),
            None => uuid[..6].to_string(),
        };
        let mut st = self.lock();
        let token = st.alloc();
        st.nodes.insert(
            token,
            NodeSlot {
                uuid,
                name,
                headers: BTreeMap::new(),
                groups: BTreeSet::new(),
                running: false,
                verbose: false,
                port: DEFAULT_PORT,
                interval_ms: DEFAULT_INTERVAL_MS,
                interface: None,
                endpoint: None,
                gossip_bind: None,
                gossip_connect: None,
                inbox: Inbox::new(),
            },
        );
        Some(RawNode(token))
    }

    fn node_destroy(&self, node: RawNode) {
        let slot = self.lock().nodes.remove(&node.0);
        if let Some(slot) = slot {
            slot.inbox.close();
            debug!(uuid = %slot.uuid, "loopback node destroyed");
        }
    }

    fn start(&self, node: RawNode) -> i32 {
        let mut st = self.lock();
        match st.nodes.get_mut(&node.0) {
            Some(slot) => {
                slot.running = true;
                slot.inbox.open();
                info!(uuid = %slot.uuid, name = %slot.name, "loopback node online");
                0
            }
            None => {
                self.set_err(errcode::INVALID);
                -1
            }
        }
    }

    fn stop(&self, node: RawNode) {
        let mut st = self.lock();
        if let Some(slot) = st.nodes.get_mut(&node.0) {
            slot.running = false;
            slot.inbox.close();
        }
    }

    fn uuid(&self, node: RawNode) -> String {
        self.lock()
            .nodes
            .get(&node.0)
            .map(|s| s.uuid.clone())
            .unwrap_or_default()
    }

    fn name(&self, node: RawNode) -> String {
        self.lock()
            .nodes
            .get(&node.0)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn set_header(&self, node: RawNode, key: &str, value: &str) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.headers.insert(key.to_string(), value.to_string());
        }
    }

    fn set_verbose(&self, node: RawNode) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.verbose = true;
        }
    }

    fn set_port(&self, node: RawNode, port: u16) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.port = port;
        }
    }

    fn set_interval(&self, node: RawNode, millis: u64) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.interval_ms = millis;
        }
    }

    fn set_interface(&self, node: RawNode, interface: &str) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.interface = Some(interface.to_string());
        }
    }

    fn set_endpoint(&self, node: RawNode, endpoint: &str) -> i32 {
        let mut st = self.lock();
        match st.nodes.get_mut(&node.0) {
            Some(slot) => {
                slot.endpoint = Some(endpoint.to_string());
                0
            }
            None => {
                self.set_err(errcode::INVALID);
                -1
            }
        }
    }

    fn gossip_bind(&self, node: RawNode, endpoint: &str) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.gossip_bind = Some(endpoint.to_string());
        }
    }

    fn gossip_connect(&self, node: RawNode, endpoint: &str) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.gossip_connect = Some(endpoint.to_string());
        }
    }

    fn print(&self, node: RawNode) {
        let st = self.lock();
        if let Some(slot) = st.nodes.get(&node.0) {
            info!(
                uuid = %slot.uuid,
                name = %slot.name,
                running = slot.running,
                groups = ?slot.groups,
                headers = ?slot.headers,
                "node state"
            );
        }
    }

    fn join(&self, node: RawNode, group: &str) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.groups.insert(group.to_string());
        }
    }

    fn leave(&self, node: RawNode, group: &str) {
        if let Some(slot) = self.lock().nodes.get_mut(&node.0) {
            slot.groups.remove(group);
        }
    }

    fn msg_new(&self) -> Option<RawMsg> {
        let mut st = self.lock();
        let token = st.alloc();
        st.msgs.insert(token, VecDeque::new());
        Some(RawMsg(token))
    }

    fn msg_append(&self, msg: RawMsg, frame: &[u8]) -> i32 {
        let mut st = self.lock();
        if !st.msgs.contains_key(&msg.0) {
            self.set_err(errcode::INVALID);
            return -1;
        }
        let frame_token = st.alloc();
        st.frames.insert(frame_token, frame.to_vec());
        if let Some(frames) = st.msgs.get_mut(&msg.0) {
            frames.push_back(frame_token);
        }
        0
    }

    fn msg_size(&self, msg: RawMsg) -> usize {
        self.lock().msgs.get(&msg.0).map(|f| f.len()).unwrap_or(0)
    }

    fn msg_pop(&self, msg: RawMsg) -> Option<RawFrame> {
        self.lock()
            .msgs
            .get_mut(&msg.0)
            .and_then(|f| f.pop_front())
            .map(RawFrame)
    }

    fn msg_destroy(&self, msg: RawMsg) {
        let mut st = self.lock();
        if let Some(frames) = st.msgs.remove(&msg.0) {
            for t in frames {
                st.frames.remove(&t);
            }
        }
    }

    fn frame_copy(&self, frame: RawFrame) -> Vec<u8> {
        self.lock().frames.get(&frame.0).cloned().unwrap_or_default()
    }

    fn frame_destroy(&self, frame: RawFrame) {
        self.lock().frames.remove(&frame.0);
    }

    fn whisper(&self, node: RawNode, peer: &str, msg: RawMsg) -> i32 {
        let mut st = self.lock();
        // Ownership of the envelope transfers here, success or not.
        let frames = st.take_msg(msg);
        let (sender_uuid, running, verbose) = match st.nodes.get(&node.0) {
            Some(s) => (s.uuid.clone(), s.running, s.verbose),
            None => {
                self.set_err(errcode::INVALID);
                return -1;
            }
        };
        if !running {
            self.set_err(errcode::NOT_ACTIVE);
            return -1;
        }
        if verbose {
            debug!(from = %sender_uuid, to = %peer, frames = frames.len(), "whisper");
        }
        // Unknown peers are a routing miss, not a send failure.
        if let Some(target) = st
            .nodes
            .values()
            .find(|s| s.running && s.uuid == peer && s.uuid != sender_uuid)
        {
            target.inbox.push(frames);
        }
        0
    }

    fn shout(&self, node: RawNode, group: &str, msg: RawMsg) -> i32 {
        let mut st = self.lock();
        let frames = st.take_msg(msg);
        let Some(sender) = st.nodes.get(&node.0) else {
            self.set_err(errcode::INVALID);
            return -1;
        };
        if !sender.running {
            self.set_err(errcode::NOT_ACTIVE);
            return -1;
        }
        let sender_uuid = sender.uuid.clone();
        if sender.verbose {
            debug!(from = %sender_uuid, group = %group, frames = frames.len(), "shout");
        }
        for slot in st.nodes.values() {
            if slot.running && slot.uuid != sender_uuid && slot.groups.contains(group) {
                slot.inbox.push(frames.clone());
            }
        }
        0
    }

    fn recv(&self, node: RawNode) -> Option<RawMsg> {
        let inbox = {
            let st = self.lock();
            match st.nodes.get(&node.0) {
                Some(slot) => Arc::clone(&slot.inbox),
                None => {
                    self.set_err(errcode::INVALID);
                    return None;
                }
            }
        };
        // Block without holding the mesh state, so stop/destroy can run.
        let Some(frames) = inbox.pop_blocking() else {
            self.set_err(errcode::INTERRUPTED);
            return None;
        };
        let mut st = self.lock();
        let frame_tokens: VecDeque<u64> = frames
            .into_iter()
            .map(|bytes| {
                let t = st.alloc();
                st.frames.insert(t, bytes);
                t
            })
            .collect();
        let msg = st.alloc();
        st.msgs.insert(msg, frame_tokens);
        Some(RawMsg(msg))
    }

    fn peers(&self, node: RawNode) -> Option<RawList> {
        let mut st = self.lock();
        let (me_uuid, running) = match st.nodes.get(&node.0) {
            Some(s) => (s.uuid.clone(), s.running),
            None => return None,
        };
        let mut uuids: Vec<String> = if running {
            st.nodes
                .values()
                .filter(|s| s.running && s.uuid != me_uuid)
                .map(|s| s.uuid.clone())
                .collect()
        } else {
            Vec::new()
        };
        uuids.sort();
        Some(st.new_list(uuids))
    }

    fn peers_by_group(&self, node: RawNode, group: &str) -> Option<RawList> {
        let mut st = self.lock();
        let me_uuid = st.nodes.get(&node.0)?.uuid.clone();
        let known = st
            .nodes
            .values()
            .any(|s| s.running && s.groups.contains(group));
        if !known {
            self.set_err(0);
            return None;
        }
        let mut uuids: Vec<String> = st
            .nodes
            .values()
            .filter(|s| s.running && s.uuid != me_uuid && s.groups.contains(group))
            .map(|s| s.uuid.clone())
            .collect();
        uuids.sort();
        Some(st.new_list(uuids))
    }

    fn own_groups(&self, node: RawNode) -> Option<RawList> {
        let mut st = self.lock();
        let groups: Vec<String> = st
            .nodes
            .get(&node.0)?
            .groups
            .iter()
            .cloned()
            .collect();
        Some(st.new_list(groups))
    }

    fn peer_groups(&self, node: RawNode) -> Option<RawList> {
        let mut st = self.lock();
        let me_uuid = st.nodes.get(&node.0)?.uuid.clone();
        let mut groups: BTreeSet<String> = BTreeSet::new();
        for slot in st.nodes.values() {
            if slot.running && slot.uuid != me_uuid {
                groups.extend(slot.groups.iter().cloned());
            }
        }
        let groups: Vec<String> = groups.into_iter().collect();
        Some(st.new_list(groups))
    }

    fn list_size(&self, list: RawList) -> usize {
        self.lock().lists.get(&list.0).map(|l| l.len()).unwrap_or(0)
    }

    fn list_pop(&self, list: RawList) -> Option<RawStr> {
        self.lock()
            .lists
            .get_mut(&list.0)
            .and_then(|l| l.pop_front())
            .map(RawStr)
    }

    fn list_destroy(&self, list: RawList) {
        let mut st = self.lock();
        if let Some(items) = st.lists.remove(&list.0) {
            for t in items {
                st.strs.remove(&t);
            }
        }
    }

    fn str_copy(&self, s: RawStr) -> String {
        self.lock().strs.get(&s.0).cloned().unwrap_or_default()
    }

    fn str_destroy(&self, s: RawStr) {
        self.lock().strs.remove(&s.0);
    }

    fn peer_address(&self, node: RawNode, peer: &str) -> Option<RawStr> {
        let mut st = self.lock();
        if !st.nodes.contains_key(&node.0) {
            self.set_err(errcode::INVALID);
            return None;
        }
        let addr = st
            .nodes
            .values()
            .find(|s| s.running && s.uuid == peer)
            .map(|s| s.address());
        match addr {
            Some(addr) => Some(st.new_str(addr)),
            None => {
                self.set_err(errcode::NO_SUCH_PEER);
                None
            }
        }
    }

    fn peer_header_value(&self, node: RawNode, peer: &str, key: &str) -> Option<RawStr> {
        let mut st = self.lock();
        if !st.nodes.contains_key(&node.0) {
            self.set_err(errcode::INVALID);
            return None;
        }
        let found = st
            .nodes
            .values()
            .find(|s| s.running && s.uuid == peer)
            .map(|s| s.headers.get(key).cloned());
        match found {
            None => {
                self.set_err(errcode::NO_SUCH_PEER);
                None
            }
            Some(None) => {
                // Known peer, absent key: not an error.
                self.set_err(0);
                None
            }
            Some(Some(value)) => Some(st.new_str(value)),
        }
    }

    fn socket(&self, node: RawNode) -> usize {
        // Opaque, stable per node. The loopback transport has no descriptor
        // to multiplex; a real engine returns its inbound socket here.
        node.0 as usize
    }

    fn last_error(&self) -> i32 {
        self.err.load(Ordering::Acquire)
    }
}
