//! Envelope marshaling between host byte sequences and native multi-frame
//! envelopes. Both directions hold release guards, so a failed append or a
//! panic mid-materialization never leaks a partial envelope.

use crate::engine::{Engine, RawMsg};
use crate::error::NodeError;
use crate::guard::{FrameGuard, MsgGuard};

/// Build a native envelope from host frames, one frame per element, in order.
/// On success the returned envelope is owned by the caller (the send call will
/// consume it). On any failure the partial envelope has already been freed.
pub(crate) fn pack(
    engine: &dyn Engine,
    op: &'static str,
    frames: &[&[u8]],
) -> Result<RawMsg, NodeError> {
    if frames.is_empty() {
        return Err(NodeError::EmptyPayload);
    }
    let msg = engine.msg_new().ok_or_else(|| NodeError::AllocationFailed {
        errno: engine.last_error(),
    })?;
    let guard = MsgGuard::new(engine, msg);
    for frame in frames {
        if engine.msg_append(guard.get(), frame) < 0 {
            return Err(NodeError::SendFailed {
                op,
                errno: engine.last_error(),
            });
        }
    }
    Ok(guard.release())
}

/// Drain a received envelope into host byte strings, preserving frame order.
/// Takes ownership of the envelope; every frame and the container are
/// released even if materializing one frame panics.
pub(crate) fn drain(engine: &dyn Engine, msg: RawMsg) -> Vec<Vec<u8>> {
    let guard = MsgGuard::new(engine, msg);
    let mut frames = Vec::with_capacity(engine.msg_size(guard.get()));
    while let Some(frame) = engine.msg_pop(guard.get()) {
        let frame = FrameGuard::new(engine, frame);
        frames.push(engine.frame_copy(frame.get()));
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackMesh;

    #[test]
    fn pack_rejects_empty_payload() {
        let mesh = LoopbackMesh::new();
        assert_eq!(pack(&mesh, "whisper", &[]), Err(NodeError::EmptyPayload));
        assert_eq!(mesh.outstanding_resources(), 0);
    }

    #[test]
    fn pack_then_drain_preserves_order_and_empty_frames() {
        let mesh = LoopbackMesh::new();
        let payload: [&[u8]; 3] = [b"first", b"", b"third"];
        let msg = pack(&mesh, "whisper", &payload).unwrap();
        let frames = drain(&mesh, msg);
        assert_eq!(frames, vec![b"first".to_vec(), vec![], b"third".to_vec()]);
        assert_eq!(mesh.outstanding_resources(), 0);
    }
}
