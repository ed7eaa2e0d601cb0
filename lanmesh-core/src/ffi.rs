//! C ABI for linking lanmesh-core as a static library from managed-runtime
//! hosts (JNI, Ruby/Python extensions) or plain C embedders. Handles are
//! opaque [`Node`] pointers on a process-global loopback mesh; every entry
//! point is null-safe and reports failure with a negative return.
//!
//! Variable-length results use one framed layout: 4 bytes LE item count, then
//! per item 4 bytes LE length + bytes. Directory queries write into a
//! caller-supplied buffer and return total bytes written, -1 on error, and -2
//! where an absent (not failed) result is distinct; an undersized buffer is a
//! plain -1 and the query can be retried. `lanmesh_recv` is consuming, so it
//! hands back an owned buffer instead (released with `lanmesh_free`) and can
//! never drop a message over a sizing error.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::engine::Engine;
use crate::loopback::LoopbackMesh;
use crate::node::Node;

/// Mesh shared by every node created through this ABI.
static MESH: Lazy<Arc<LoopbackMesh>> = Lazy::new(LoopbackMesh::new_shared);

const ABI_VERSION: u8 = 1;

/// Returns the ABI version. Also keeps the staticlib linkable from C.
#[no_mangle]
pub extern "C" fn lanmesh_abi_version() -> u8 {
    ABI_VERSION
}

unsafe fn node_ref<'a>(h: *mut c_void) -> Option<&'a Node> {
    (h as *const Node).as_ref()
}

unsafe fn str_arg<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    std::ffi::CStr::from_ptr(p).to_str().ok()
}

fn write_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || out_buf_len < bytes.len() {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

/// Little-endian length prefix; `None` when the length does not fit the
/// 4-byte field.
fn len_prefix(len: usize) -> Option<[u8; 4]> {
    u32::try_from(len).ok().map(u32::to_le_bytes)
}

/// Serialize items in the framed layout.
fn framed_bytes(items: &[Vec<u8>]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + items.iter().map(|i| 4 + i.len()).sum::<usize>());
    out.extend_from_slice(&len_prefix(items.len())?);
    for item in items {
        out.extend_from_slice(&len_prefix(item.len())?);
        out.extend_from_slice(item);
    }
    Some(out)
}

/// Write items in the framed layout. Returns bytes written, or -1 on error
/// (null or undersized buffer, or an unframeable length).
fn write_framed(items: &[Vec<u8>], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    match framed_bytes(items) {
        Some(bytes) => write_out(&bytes, out_buf, out_buf_len),
        None => -1,
    }
}

fn write_framed_strings(items: &[String], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    let bytes: Vec<Vec<u8>> = items.iter().map(|s| s.as_bytes().to_vec()).collect();
    write_framed(&bytes, out_buf, out_buf_len)
}

/// Create a node on the process-global mesh. Null name selects an
/// engine-generated identity. Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn lanmesh_new(name: *const c_char) -> *mut c_void {
    let name = unsafe { str_arg(name) };
    match Node::new(Arc::clone(&MESH) as Arc<dyn Engine>, name) {
        Ok(node) => Box::into_raw(Box::new(node)) as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy the handle and its node. No-op if h is null. Safe to call after
/// `lanmesh_destroy_node`; the teardown itself is idempotent.
#[no_mangle]
pub extern "C" fn lanmesh_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(h as *mut Node) });
}

/// Explicit teardown without freeing the handle.
#[no_mangle]
pub extern "C" fn lanmesh_destroy_node(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) } {
        Some(node) => {
            node.destroy();
            0
        }
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_start(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.start()) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_stop(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.stop()) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_print(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.print()) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

/// Write the node uuid. Returns bytes written or -1.
#[no_mangle]
pub extern "C" fn lanmesh_uuid(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.uuid()) {
        Some(Ok(uuid)) => write_out(uuid.as_bytes(), out_buf, out_buf_len),
        _ => -1,
    }
}

/// Write the node name. Returns bytes written or -1.
#[no_mangle]
pub extern "C" fn lanmesh_name(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.name()) {
        Some(Ok(name)) => write_out(name.as_bytes(), out_buf, out_buf_len),
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_set_header(
    h: *mut c_void,
    key: *const c_char,
    value: *const c_char,
) -> c_int {
    let (node, key, value) = unsafe {
        match (node_ref(h), str_arg(key), str_arg(value)) {
            (Some(n), Some(k), Some(v)) => (n, k, v),
            _ => return -1,
        }
    };
    match node.set_header(key, value) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_set_verbose(h: *mut c_void) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.set_verbose()) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_set_port(h: *mut c_void, port: u16) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.set_port(port)) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_set_interval(h: *mut c_void, millis: u64) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.set_interval(Duration::from_millis(millis))) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_set_interface(h: *mut c_void, interface: *const c_char) -> c_int {
    let (node, interface) = unsafe {
        match (node_ref(h), str_arg(interface)) {
            (Some(n), Some(i)) => (n, i),
            _ => return -1,
        }
    };
    match node.set_interface(interface) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_set_endpoint(h: *mut c_void, endpoint: *const c_char) -> c_int {
    let (node, endpoint) = unsafe {
        match (node_ref(h), str_arg(endpoint)) {
            (Some(n), Some(e)) => (n, e),
            _ => return -1,
        }
    };
    match node.set_endpoint(endpoint) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_gossip_bind(h: *mut c_void, endpoint: *const c_char) -> c_int {
    let (node, endpoint) = unsafe {
        match (node_ref(h), str_arg(endpoint)) {
            (Some(n), Some(e)) => (n, e),
            _ => return -1,
        }
    };
    match node.gossip_bind(endpoint) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_gossip_connect(h: *mut c_void, endpoint: *const c_char) -> c_int {
    let (node, endpoint) = unsafe {
        match (node_ref(h), str_arg(endpoint)) {
            (Some(n), Some(e)) => (n, e),
            _ => return -1,
        }
    };
    match node.gossip_connect(endpoint) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_join(h: *mut c_void, group: *const c_char) -> c_int {
    let (node, group) = unsafe {
        match (node_ref(h), str_arg(group)) {
            (Some(n), Some(g)) => (n, g),
            _ => return -1,
        }
    };
    match node.join(group) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_leave(h: *mut c_void, group: *const c_char) -> c_int {
    let (node, group) = unsafe {
        match (node_ref(h), str_arg(group)) {
            (Some(n), Some(g)) => (n, g),
            _ => return -1,
        }
    };
    match node.leave(group) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

unsafe fn frames_arg<'a>(
    frames: *const *const u8,
    lens: *const usize,
    count: usize,
) -> Option<Vec<&'a [u8]>> {
    if count == 0 {
        return Some(Vec::new());
    }
    if frames.is_null() || lens.is_null() {
        return None;
    }
    let ptrs = slice::from_raw_parts(frames, count);
    let lens = slice::from_raw_parts(lens, count);
    let mut out = Vec::with_capacity(count);
    for (&p, &len) in ptrs.iter().zip(lens) {
        if p.is_null() && len != 0 {
            return None;
        }
        out.push(if len == 0 {
            &[] as &[u8]
        } else {
            slice::from_raw_parts(p, len)
        });
    }
    Some(out)
}

/// Directed send: one frame per (pointer, length) pair, in order. Returns 0,
/// -1 on failure (including an empty frame list).
#[no_mangle]
pub extern "C" fn lanmesh_whisper(
    h: *mut c_void,
    peer: *const c_char,
    frames: *const *const u8,
    lens: *const usize,
    count: usize,
) -> c_int {
    let (node, peer, frames) = unsafe {
        match (node_ref(h), str_arg(peer), frames_arg(frames, lens, count)) {
            (Some(n), Some(p), Some(f)) => (n, p, f),
            _ => return -1,
        }
    };
    match node.whisper(peer, &frames) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Group broadcast; same contract as `lanmesh_whisper`.
#[no_mangle]
pub extern "C" fn lanmesh_shout(
    h: *mut c_void,
    group: *const c_char,
    frames: *const *const u8,
    lens: *const usize,
    count: usize,
) -> c_int {
    let (node, group, frames) = unsafe {
        match (node_ref(h), str_arg(group), frames_arg(frames, lens, count)) {
            (Some(n), Some(g), Some(f)) => (n, g, f),
            _ => return -1,
        }
    };
    match node.shout(group, &frames) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Block until a message arrives, then hand its frames back in the framed
/// layout as an owned heap buffer (`*out_buf`, `*out_len`), to be released
/// with `lanmesh_free`. Receiving consumes the message, so the result is
/// owned rather than copied into a caller-sized buffer: there is no buffer
/// size the caller can get wrong and lose the message to. Returns 0, or -1
/// on interrupt/stop or null arguments.
#[no_mangle]
pub extern "C" fn lanmesh_recv(h: *mut c_void, out_buf: *mut *mut u8, out_len: *mut usize) -> c_int {
    if out_buf.is_null() || out_len.is_null() {
        return -1;
    }
    let frames = match unsafe { node_ref(h) }.map(|n| n.recv()) {
        Some(Ok(frames)) => frames,
        _ => return -1,
    };
    let Some(bytes) = framed_bytes(&frames) else {
        return -1;
    };
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    unsafe {
        *out_buf = Box::into_raw(boxed) as *mut u8;
        *out_len = len;
    }
    0
}

/// Release a buffer returned by `lanmesh_recv`. No-op on null.
#[no_mangle]
pub extern "C" fn lanmesh_free(buf: *mut u8, len: usize) {
    if buf.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(slice::from_raw_parts_mut(buf, len) as *mut [u8]) });
}

#[no_mangle]
pub extern "C" fn lanmesh_peers(h: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.peers()) {
        Some(Ok(peers)) => write_framed_strings(&peers, out_buf, out_buf_len),
        _ => -1,
    }
}

/// Returns bytes written, -1 on error, -2 when no current member of the mesh
/// has joined the group.
#[no_mangle]
pub extern "C" fn lanmesh_peers_by_group(
    h: *mut c_void,
    group: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (node, group) = unsafe {
        match (node_ref(h), str_arg(group)) {
            (Some(n), Some(g)) => (n, g),
            _ => return -1,
        }
    };
    match node.peers_by_group(group) {
        Ok(Some(peers)) => write_framed_strings(&peers, out_buf, out_buf_len),
        Ok(None) => -2,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_own_groups(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.own_groups()) {
        Some(Ok(groups)) => write_framed_strings(&groups, out_buf, out_buf_len),
        _ => -1,
    }
}

#[no_mangle]
pub extern "C" fn lanmesh_peer_groups(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    match unsafe { node_ref(h) }.map(|n| n.peer_groups()) {
        Some(Ok(groups)) => write_framed_strings(&groups, out_buf, out_buf_len),
        _ => -1,
    }
}

/// Write the peer's transport address. Returns bytes written or -1.
#[no_mangle]
pub extern "C" fn lanmesh_peer_address(
    h: *mut c_void,
    peer: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (node, peer) = unsafe {
        match (node_ref(h), str_arg(peer)) {
            (Some(n), Some(p)) => (n, p),
            _ => return -1,
        }
    };
    match node.peer_address(peer) {
        Ok(addr) => write_out(addr.as_bytes(), out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Write the peer's header value. Returns bytes written, -2 when the key is
/// absent (not an error), -1 on lookup failure.
#[no_mangle]
pub extern "C" fn lanmesh_peer_header_value(
    h: *mut c_void,
    peer: *const c_char,
    key: *const c_char,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (node, peer, key) = unsafe {
        match (node_ref(h), str_arg(peer), str_arg(key)) {
            (Some(n), Some(p), Some(k)) => (n, p, k),
            _ => return -1,
        }
    };
    match node.peer_header_value(peer, key) {
        Ok(Some(value)) => write_out(value.as_bytes(), out_buf, out_buf_len),
        Ok(None) => -2,
        Err(_) => -1,
    }
}

/// Opaque borrowed handle to the node's transport socket, or null once the
/// node is destroyed.
#[no_mangle]
pub extern "C" fn lanmesh_socket(h: *mut c_void) -> *mut c_void {
    match unsafe { node_ref(h) }.map(|n| n.socket()) {
        Some(Ok(sock)) => sock as *mut c_void,
        _ => std::ptr::null_mut(),
    }
}
