//! Node handle: owns exactly one native node resource and its lifecycle
//! (uninitialized -> active -> stopped -> destroyed). Explicit `destroy` and
//! the `Drop` finalizer converge on one idempotent teardown routine; every
//! other operation fails fast once the resource is gone.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::directory::{drain_string_list, take_string};
use crate::engine::{Engine, RawNode};
use crate::envelope;
use crate::error::NodeError;

/// Grace period between stop and destroy on teardown, so the departure
/// announcement can propagate before the resource goes away.
const TEARDOWN_GRACE: Duration = Duration::from_millis(100);

const STATE_CREATED: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_STOPPED: u8 = 2;
const STATE_DESTROYED: u8 = 3;

/// Handle to one mesh participant.
///
/// Calls on one handle must be serialized by the embedder: the bridge adds no
/// locking of its own and is not reentrant-safe across threads. In
/// particular, `destroy` (or the last drop) must not race other calls, or a
/// dead token could reach the engine. The one sanctioned overlap is `stop` or
/// `destroy` against a blocked `recv`, which the engine unblocks. Handle
/// state lives in atomics only so the fail-fast check after teardown needs no
/// lock.
pub struct Node {
    engine: Arc<dyn Engine>,
    /// Raw node token, zero once destroyed.
    raw: AtomicU64,
    state: AtomicU8,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("raw", &self.raw)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Allocate a node on `engine`. `None` selects an engine-generated
    /// identity name.
    pub fn new(engine: Arc<dyn Engine>, name: Option<&str>) -> Result<Self, NodeError> {
        let raw = engine.node_new(name).ok_or_else(|| NodeError::AllocationFailed {
            errno: engine.last_error(),
        })?;
        debug!(uuid = %engine.uuid(raw), "node allocated");
        Ok(Self {
            engine,
            raw: AtomicU64::new(raw.0),
            state: AtomicU8::new(STATE_CREATED),
        })
    }

    fn live(&self) -> Result<RawNode, NodeError> {
        match self.raw.load(Ordering::Acquire) {
            0 => Err(NodeError::UseAfterFree),
            token => Ok(RawNode(token)),
        }
    }

    // --- identity ---

    pub fn uuid(&self) -> Result<String, NodeError> {
        Ok(self.engine.uuid(self.live()?))
    }

    pub fn name(&self) -> Result<String, NodeError> {
        Ok(self.engine.name(self.live()?))
    }

    /// Dump node state to the engine's log.
    pub fn print(&self) -> Result<(), NodeError> {
        self.engine.print(self.live()?);
        Ok(())
    }

    // --- configuration (meaningful before `start`) ---

    pub fn set_header(&self, key: &str, value: &str) -> Result<(), NodeError> {
        self.engine.set_header(self.live()?, key, value);
        Ok(())
    }

    pub fn set_verbose(&self) -> Result<(), NodeError> {
        self.engine.set_verbose(self.live()?);
        Ok(())
    }

    pub fn set_port(&self, port: u16) -> Result<(), NodeError> {
        self.engine.set_port(self.live()?, port);
        Ok(())
    }

    /// Beacon interval.
    pub fn set_interval(&self, interval: Duration) -> Result<(), NodeError> {
        self.engine.set_interval(self.live()?, interval.as_millis() as u64);
        Ok(())
    }

    pub fn set_interface(&self, interface: &str) -> Result<(), NodeError> {
        self.engine.set_interface(self.live()?, interface);
        Ok(())
    }

    /// Bind the overlay transport to an explicit endpoint instead of an
    /// ephemeral beacon-advertised one.
    pub fn set_endpoint(&self, endpoint: &str) -> Result<(), NodeError> {
        if self.engine.set_endpoint(self.live()?, endpoint) < 0 {
            return Err(NodeError::EndpointFailed {
                errno: self.engine.last_error(),
            });
        }
        Ok(())
    }

    pub fn gossip_bind(&self, endpoint: &str) -> Result<(), NodeError> {
        self.engine.gossip_bind(self.live()?, endpoint);
        Ok(())
    }

    pub fn gossip_connect(&self, endpoint: &str) -> Result<(), NodeError> {
        self.engine.gossip_connect(self.live()?, endpoint);
        Ok(())
    }

    // --- lifecycle ---

    /// Begin discovery and transport.
    pub fn start(&self) -> Result<(), NodeError> {
        let raw = self.live()?;
        let rc = self.engine.start(raw);
        if rc < 0 {
            return Err(NodeError::StartFailed { code: rc });
        }
        self.state.store(STATE_ACTIVE, Ordering::Release);
        info!(uuid = %self.engine.uuid(raw), "node started");
        Ok(())
    }

    /// Announce departure and halt discovery. Fire-and-forget; also unblocks
    /// a pending `recv`.
    pub fn stop(&self) -> Result<(), NodeError> {
        let raw = self.live()?;
        self.engine.stop(raw);
        let _ = self.state.compare_exchange(
            STATE_ACTIVE,
            STATE_STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!(uuid = %self.engine.uuid(raw), "node stopped");
        Ok(())
    }

    /// Explicit teardown. Idempotent: the second call (or a later `Drop`) is
    /// a no-op, so host finalization after an explicit destroy is safe.
    pub fn destroy(&self) {
        self.teardown();
    }

    /// Single teardown routine shared by `destroy` and `Drop`. Claims the raw
    /// token exactly once; stops first if the node reached active, waits the
    /// grace period, then destroys. Must never panic: a panic on the host's
    /// finalization path is not recoverable, so engine panics are suppressed
    /// and logged.
    fn teardown(&self) {
        let token = self.raw.swap(0, Ordering::AcqRel);
        if token == 0 {
            return;
        }
        let raw = RawNode(token);
        let was_active = self.state.swap(STATE_DESTROYED, Ordering::AcqRel) == STATE_ACTIVE;
        let result = catch_unwind(AssertUnwindSafe(|| {
            if was_active {
                self.engine.stop(raw);
                thread::sleep(TEARDOWN_GRACE);
            }
            self.engine.node_destroy(raw);
        }));
        if result.is_err() {
            warn!("engine panicked during node teardown; resource abandoned");
        }
    }

    // --- group membership ---

    pub fn join(&self, group: &str) -> Result<(), NodeError> {
        self.engine.join(self.live()?, group);
        Ok(())
    }

    pub fn leave(&self, group: &str) -> Result<(), NodeError> {
        self.engine.leave(self.live()?, group);
        Ok(())
    }

    // --- messaging ---

    /// Send a multi-frame message to a single peer, one frame per payload
    /// element, in order. The envelope is handed to the engine on success;
    /// a partial envelope is freed if an append fails.
    pub fn whisper(&self, peer: &str, frames: &[&[u8]]) -> Result<(), NodeError> {
        let raw = self.live()?;
        let msg = envelope::pack(&*self.engine, "whisper", frames)?;
        if self.engine.whisper(raw, peer, msg) < 0 {
            return Err(NodeError::SendFailed {
                op: "whisper",
                errno: self.engine.last_error(),
            });
        }
        Ok(())
    }

    /// Broadcast a multi-frame message to a group. Same contract as
    /// [`Node::whisper`].
    pub fn shout(&self, group: &str, frames: &[&[u8]]) -> Result<(), NodeError> {
        let raw = self.live()?;
        let msg = envelope::pack(&*self.engine, "shout", frames)?;
        if self.engine.shout(raw, group, msg) < 0 {
            return Err(NodeError::SendFailed {
                op: "shout",
                errno: self.engine.last_error(),
            });
        }
        Ok(())
    }

    /// Block until a message arrives, then demarshal every frame in sender
    /// order. Stop or destroy unblocks a pending call with `ReceiveFailed`.
    /// Native frames and the envelope are released even if materializing a
    /// frame panics mid-drain.
    pub fn recv(&self) -> Result<Vec<Vec<u8>>, NodeError> {
        let raw = self.live()?;
        let msg = self.engine.recv(raw).ok_or_else(|| NodeError::ReceiveFailed {
            errno: self.engine.last_error(),
        })?;
        Ok(envelope::drain(&*self.engine, msg))
    }

    // --- peer directory ---

    /// Uuids of currently connected peers. Fresh snapshot per call.
    pub fn peers(&self) -> Result<Vec<String>, NodeError> {
        let raw = self.live()?;
        Ok(match self.engine.peers(raw) {
            Some(list) => drain_string_list(&*self.engine, list),
            None => Vec::new(),
        })
    }

    /// Uuids of connected peers that joined `group`, or `None` when no
    /// current member of the mesh has joined it. A group only this node
    /// joined yields `Some` with an empty list.
    pub fn peers_by_group(&self, group: &str) -> Result<Option<Vec<String>>, NodeError> {
        let raw = self.live()?;
        Ok(self
            .engine
            .peers_by_group(raw, group)
            .map(|list| drain_string_list(&*self.engine, list)))
    }

    /// Groups this node has joined.
    pub fn own_groups(&self) -> Result<Vec<String>, NodeError> {
        let raw = self.live()?;
        Ok(match self.engine.own_groups(raw) {
            Some(list) => drain_string_list(&*self.engine, list),
            None => Vec::new(),
        })
    }

    /// Groups known to be joined by connected peers.
    pub fn peer_groups(&self) -> Result<Vec<String>, NodeError> {
        let raw = self.live()?;
        Ok(match self.engine.peer_groups(raw) {
            Some(list) => drain_string_list(&*self.engine, list),
            None => Vec::new(),
        })
    }

    /// Transport address of a connected peer.
    pub fn peer_address(&self, peer: &str) -> Result<String, NodeError> {
        let raw = self.live()?;
        match self.engine.peer_address(raw, peer) {
            Some(s) => Ok(take_string(&*self.engine, s)),
            None => Err(NodeError::LookupFailed {
                op: "peer_address",
                errno: self.engine.last_error(),
            }),
        }
    }

    /// Header value published by a connected peer. `Ok(None)` means the peer
    /// is known but the key is absent; that is not an error. The distinction
    /// comes from the engine's error side channel, inspected immediately
    /// after the primary call.
    pub fn peer_header_value(&self, peer: &str, key: &str) -> Result<Option<String>, NodeError> {
        let raw = self.live()?;
        match self.engine.peer_header_value(raw, peer, key) {
            Some(s) => Ok(Some(take_string(&*self.engine, s))),
            None => match self.engine.last_error() {
                0 => Ok(None),
                errno => Err(NodeError::LookupFailed {
                    op: "peer_header_value",
                    errno,
                }),
            },
        }
    }

    // --- embedder integration ---

    /// Opaque handle to the node's inbound transport socket, for external
    /// readiness loops. Borrowed: the engine keeps ownership, and the handle
    /// dies with the node.
    pub fn socket(&self) -> Result<usize, NodeError> {
        Ok(self.engine.socket(self.live()?))
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackMesh;

    fn node(mesh: &Arc<LoopbackMesh>, name: Option<&str>) -> Node {
        Node::new(mesh.clone() as Arc<dyn Engine>, name).unwrap()
    }

    #[test]
    fn named_and_generated_identity() {
        let mesh = LoopbackMesh::new_shared();
        let named = node(&mesh, Some("alpha"));
        assert_eq!(named.name().unwrap(), "alpha");

        let anon = node(&mesh, None);
        let uuid = anon.uuid().unwrap();
        assert_eq!(uuid.len(), 32);
        assert_eq!(anon.name().unwrap(), uuid[..6].to_string());
    }

    #[test]
    fn empty_payload_is_rejected_without_native_send() {
        let mesh = LoopbackMesh::new_shared();
        let n = node(&mesh, Some("sender"));
        n.start().unwrap();
        assert_eq!(n.whisper("nobody", &[]), Err(NodeError::EmptyPayload));
        assert_eq!(n.shout("room", &[]), Err(NodeError::EmptyPayload));
        assert_eq!(mesh.outstanding_resources(), 0);
    }

    #[test]
    fn send_before_start_fails() {
        let mesh = LoopbackMesh::new_shared();
        let n = node(&mesh, Some("early"));
        let err = n.shout("room", &[b"hi".as_ref()]).unwrap_err();
        assert!(matches!(err, NodeError::SendFailed { op: "shout", .. }));
        // The envelope was consumed by the engine either way.
        assert_eq!(mesh.outstanding_resources(), 0);
    }

    #[test]
    fn whisper_to_unknown_peer_is_dropped_silently() {
        let mesh = LoopbackMesh::new_shared();
        let n = node(&mesh, Some("sender"));
        n.start().unwrap();
        n.whisper("no-such-uuid", &[b"hello".as_ref()]).unwrap();
        assert_eq!(mesh.outstanding_resources(), 0);
    }

    #[test]
    fn operations_after_destroy_fail_fast() {
        let mesh = LoopbackMesh::new_shared();
        let n = node(&mesh, Some("gone"));
        n.destroy();
        assert_eq!(n.uuid(), Err(NodeError::UseAfterFree));
        assert_eq!(n.start(), Err(NodeError::UseAfterFree));
        assert_eq!(n.join("room"), Err(NodeError::UseAfterFree));
        assert_eq!(n.recv(), Err(NodeError::UseAfterFree));
        assert_eq!(n.peers(), Err(NodeError::UseAfterFree));
        assert_eq!(n.socket(), Err(NodeError::UseAfterFree));
    }

    #[test]
    fn destroy_is_idempotent_and_converges_with_drop() {
        let mesh = LoopbackMesh::new_shared();
        let n = node(&mesh, Some("twice"));
        n.destroy();
        n.destroy();
        drop(n);
        assert_eq!(mesh.node_count(), 0);
        assert_eq!(mesh.outstanding_resources(), 0);
    }

    #[test]
    fn drop_tears_down_an_active_node() {
        let mesh = LoopbackMesh::new_shared();
        {
            let n = node(&mesh, Some("active"));
            n.start().unwrap();
        }
        assert_eq!(mesh.node_count(), 0);
    }

    #[test]
    fn configuration_setters_reach_the_engine() {
        let mesh = LoopbackMesh::new_shared();
        let a = node(&mesh, Some("cfg"));
        a.set_port(7100).unwrap();
        a.set_interval(Duration::from_millis(250)).unwrap();
        a.set_interface("lo").unwrap();
        a.set_header("X-ROLE", "probe").unwrap();
        a.set_verbose().unwrap();
        a.gossip_bind("tcp://127.0.0.1:9000").unwrap();
        a.start().unwrap();

        let b = node(&mesh, Some("observer"));
        b.start().unwrap();
        let addr = b.peer_address(&a.uuid().unwrap()).unwrap();
        assert_eq!(addr, "tcp://127.0.0.1:7100");
        assert_eq!(
            b.peer_header_value(&a.uuid().unwrap(), "X-ROLE").unwrap(),
            Some("probe".to_string())
        );
    }

    #[test]
    fn explicit_endpoint_overrides_port_address() {
        let mesh = LoopbackMesh::new_shared();
        let a = node(&mesh, Some("bound"));
        a.set_endpoint("inproc://overlay-a").unwrap();
        a.start().unwrap();
        let b = node(&mesh, Some("peer"));
        b.start().unwrap();
        assert_eq!(
            b.peer_address(&a.uuid().unwrap()).unwrap(),
            "inproc://overlay-a"
        );
    }

    #[test]
    fn socket_export_is_stable_and_opaque() {
        let mesh = LoopbackMesh::new_shared();
        let n = node(&mesh, Some("sock"));
        n.start().unwrap();
        let first = n.socket().unwrap();
        assert_ne!(first, 0);
        assert_eq!(n.socket().unwrap(), first);
    }
}
