//! LAN mesh group-messaging node bridge.
//!
//! The peer-to-peer engine (beacon discovery, group gossip, overlay
//! transport) is an opaque collaborator behind the [`engine::Engine`] trait.
//! This crate owns the safe side of the boundary: one handle per native node
//! with an idempotent, finalizer-safe teardown, leak-proof envelope and
//! directory marshaling, and a C ABI for managed-runtime hosts.

pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod loopback;
pub mod node;

mod directory;
mod envelope;
mod guard;

pub use config::NodeConfig;
pub use engine::{Engine, RawFrame, RawList, RawMsg, RawNode, RawStr};
pub use error::NodeError;
pub use loopback::LoopbackMesh;
pub use node::Node;
