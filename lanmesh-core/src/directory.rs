//! Peer directory drains: convert native string lists and single native
//! strings into host strings, destroying the native side on every exit path.

use crate::engine::{Engine, RawList, RawStr};
use crate::guard::{ListGuard, StrGuard};

/// Convert a native string list into host strings, then destroy the list.
/// A panic while materializing one element still releases the popped string,
/// the remaining elements, and the container.
pub(crate) fn drain_string_list(engine: &dyn Engine, list: RawList) -> Vec<String> {
    let guard = ListGuard::new(engine, list);
    let mut out = Vec::with_capacity(engine.list_size(guard.get()));
    while let Some(s) = engine.list_pop(guard.get()) {
        let s = StrGuard::new(engine, s);
        out.push(engine.str_copy(s.get()));
    }
    out
}

/// Materialize one owned native string and release it.
pub(crate) fn take_string(engine: &dyn Engine, s: RawStr) -> String {
    let s = StrGuard::new(engine, s);
    engine.str_copy(s.get())
}
