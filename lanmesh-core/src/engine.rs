//! Contract for the native mesh engine: the opaque collaborator that owns peer
//! discovery, group gossip, and the overlay transport. The bridge never looks
//! inside it; it only calls this operation set and manages resource lifetimes.

/// Error codes reported through [`Engine::last_error`]. Values follow the
/// usual system conventions so a real engine can pass `errno` through as-is.
pub mod errcode {
    /// A blocking call was interrupted by stop or destroy.
    pub const INTERRUPTED: i32 = 4;
    /// The named peer is not connected.
    pub const NO_SUCH_PEER: i32 = 3;
    /// Native allocation failed.
    pub const NO_MEMORY: i32 = 12;
    /// The operation was handed an invalid or dead resource token.
    pub const INVALID: i32 = 22;
    /// The node is not active.
    pub const NOT_ACTIVE: i32 = 107;
}

/// Token for one native node. Exclusively owned by one handle; never zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RawNode(pub u64);

/// Token for a native multi-frame envelope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RawMsg(pub u64);

/// Token for one frame popped off an envelope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RawFrame(pub u64);

/// Token for a native string list returned by a directory query.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RawList(pub u64);

/// Token for one native string (list element, address, or header value).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RawStr(pub u64);

/// The native engine operation set.
///
/// Every resource handed out by an engine has a manual lifecycle: whoever
/// holds the token must call the matching destroy operation exactly once,
/// except where an operation documents that it consumes the token. Tokens are
/// never zero. Individual calls are thread-safe; ordering across calls on one
/// node is the caller's concern.
pub trait Engine: Send + Sync {
    // --- node lifecycle ---

    /// Allocate a node. `None` selects an engine-generated identity name.
    /// Returns `None` on allocation failure; `last_error` holds the cause.
    fn node_new(&self, name: Option<&str>) -> Option<RawNode>;
    /// Release the node. The token is dead afterwards.
    fn node_destroy(&self, node: RawNode);
    /// Begin discovery and transport. Negative on failure.
    fn start(&self, node: RawNode) -> i32;
    /// Announce departure and stop discovery. Fire-and-forget.
    fn stop(&self, node: RawNode);

    // --- identity and configuration (meaningful before `start`) ---

    fn uuid(&self, node: RawNode) -> String;
    fn name(&self, node: RawNode) -> String;
    fn set_header(&self, node: RawNode, key: &str, value: &str);
    fn set_verbose(&self, node: RawNode);
    fn set_port(&self, node: RawNode, port: u16);
    fn set_interval(&self, node: RawNode, millis: u64);
    fn set_interface(&self, node: RawNode, interface: &str);
    /// Bind the overlay socket to an explicit endpoint. Negative on failure.
    fn set_endpoint(&self, node: RawNode, endpoint: &str) -> i32;
    fn gossip_bind(&self, node: RawNode, endpoint: &str);
    fn gossip_connect(&self, node: RawNode, endpoint: &str);
    /// Dump node state to the engine's log.
    fn print(&self, node: RawNode);

    // --- group membership (idempotent pass-throughs) ---

    fn join(&self, node: RawNode, group: &str);
    fn leave(&self, node: RawNode, group: &str);

    // --- envelopes and messaging ---

    /// Allocate an empty envelope. `None` on allocation failure.
    fn msg_new(&self) -> Option<RawMsg>;
    /// Append one frame. Negative on failure; the envelope stays alive.
    fn msg_append(&self, msg: RawMsg, frame: &[u8]) -> i32;
    fn msg_size(&self, msg: RawMsg) -> usize;
    /// Pop the next frame in sender order. Ownership of the frame transfers
    /// to the caller; `None` once the envelope is drained.
    fn msg_pop(&self, msg: RawMsg) -> Option<RawFrame>;
    /// Release the envelope and any frames still inside it.
    fn msg_destroy(&self, msg: RawMsg);
    /// Materialize the frame's bytes. The frame stays alive.
    fn frame_copy(&self, frame: RawFrame) -> Vec<u8>;
    fn frame_destroy(&self, frame: RawFrame);
    /// Directed send. Consumes the envelope whether or not it succeeds.
    fn whisper(&self, node: RawNode, peer: &str, msg: RawMsg) -> i32;
    /// Group broadcast. Consumes the envelope whether or not it succeeds.
    fn shout(&self, node: RawNode, group: &str, msg: RawMsg) -> i32;
    /// Block until an envelope arrives or the node is stopped/destroyed.
    /// `None` means interrupted; `last_error` holds the cause.
    fn recv(&self, node: RawNode) -> Option<RawMsg>;

    // --- peer directory (fresh snapshot per call) ---

    fn peers(&self, node: RawNode) -> Option<RawList>;
    /// `None` when no current member of the mesh has joined `group`.
    fn peers_by_group(&self, node: RawNode, group: &str) -> Option<RawList>;
    fn own_groups(&self, node: RawNode) -> Option<RawList>;
    fn peer_groups(&self, node: RawNode) -> Option<RawList>;
    fn list_size(&self, list: RawList) -> usize;
    /// Pop the next element; ownership of the string transfers to the caller.
    fn list_pop(&self, list: RawList) -> Option<RawStr>;
    /// Release the list and any elements still inside it.
    fn list_destroy(&self, list: RawList);
    /// Materialize the string. The native string stays alive.
    fn str_copy(&self, s: RawStr) -> String;
    fn str_destroy(&self, s: RawStr);
    /// Transport address of a connected peer. `None` + `last_error` on failure.
    fn peer_address(&self, node: RawNode, peer: &str) -> Option<RawStr>;
    /// Header value of a connected peer. Three outcomes: `Some` when present;
    /// `None` with `last_error() == 0` when the key is absent; `None` with a
    /// nonzero `last_error()` when the lookup itself failed. Callers must
    /// inspect the side channel immediately after the call.
    fn peer_header_value(&self, node: RawNode, peer: &str, key: &str) -> Option<RawStr>;

    // --- embedder integration ---

    /// Address-valued handle to the node's inbound transport socket, for
    /// registration in an external readiness loop. Borrowed, never owned or
    /// interpreted by the caller.
    fn socket(&self, node: RawNode) -> usize;
    /// Error code recorded by the most recent fallible operation.
    fn last_error(&self) -> i32;
}
