//! Scoped release guards for native resources. Each guard releases its
//! resource when dropped, so a panic raised mid-marshal (for example while
//! allocating a host buffer for a frame) still releases every envelope,
//! frame, list, and string already claimed from the engine.

use crate::engine::{Engine, RawFrame, RawList, RawMsg, RawStr};

/// Owns a native envelope until released to the engine or dropped.
pub(crate) struct MsgGuard<'a> {
    engine: &'a dyn Engine,
    msg: RawMsg,
    armed: bool,
}

impl<'a> MsgGuard<'a> {
    pub(crate) fn new(engine: &'a dyn Engine, msg: RawMsg) -> Self {
        Self { engine, msg, armed: true }
    }

    pub(crate) fn get(&self) -> RawMsg {
        self.msg
    }

    /// Hand ownership to the engine (send path). The guard no longer frees.
    pub(crate) fn release(mut self) -> RawMsg {
        self.armed = false;
        self.msg
    }
}

impl Drop for MsgGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.msg_destroy(self.msg);
        }
    }
}

/// Owns one frame popped off an envelope.
pub(crate) struct FrameGuard<'a> {
    engine: &'a dyn Engine,
    frame: RawFrame,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn new(engine: &'a dyn Engine, frame: RawFrame) -> Self {
        Self { engine, frame }
    }

    pub(crate) fn get(&self) -> RawFrame {
        self.frame
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.engine.frame_destroy(self.frame);
    }
}

/// Owns a native string list and whatever elements remain inside it.
pub(crate) struct ListGuard<'a> {
    engine: &'a dyn Engine,
    list: RawList,
}

impl<'a> ListGuard<'a> {
    pub(crate) fn new(engine: &'a dyn Engine, list: RawList) -> Self {
        Self { engine, list }
    }

    pub(crate) fn get(&self) -> RawList {
        self.list
    }
}

impl Drop for ListGuard<'_> {
    fn drop(&mut self) {
        self.engine.list_destroy(self.list);
    }
}

/// Owns one native string popped off a list or returned by a lookup.
pub(crate) struct StrGuard<'a> {
    engine: &'a dyn Engine,
    s: RawStr,
}

impl<'a> StrGuard<'a> {
    pub(crate) fn new(engine: &'a dyn Engine, s: RawStr) -> Self {
        Self { engine, s }
    }

    pub(crate) fn get(&self) -> RawStr {
        self.s
    }
}

impl Drop for StrGuard<'_> {
    fn drop(&mut self) {
        self.engine.str_destroy(self.s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackMesh;

    #[test]
    fn msg_guard_frees_unless_released() {
        let mesh = LoopbackMesh::new();
        let msg = mesh.msg_new().unwrap();
        {
            let _g = MsgGuard::new(&mesh, msg);
        }
        assert_eq!(mesh.outstanding_resources(), 0);

        let msg = mesh.msg_new().unwrap();
        let g = MsgGuard::new(&mesh, msg);
        let msg = g.release();
        assert_eq!(mesh.outstanding_resources(), 1);
        mesh.msg_destroy(msg);
        assert_eq!(mesh.outstanding_resources(), 0);
    }
}
