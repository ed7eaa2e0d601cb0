//! Bridge error taxonomy. Every variant carries the operation name or the
//! native error code captured at the call site; cleanup on unwind is internal
//! and never surfaces as its own error kind.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node allocation failed (errno {errno})")]
    AllocationFailed { errno: i32 },
    #[error("start failed (code {code})")]
    StartFailed { code: i32 },
    #[error("endpoint bind failed (errno {errno})")]
    EndpointFailed { errno: i32 },
    #[error("{op} failed (errno {errno})")]
    SendFailed { op: &'static str, errno: i32 },
    #[error("receive failed (errno {errno})")]
    ReceiveFailed { errno: i32 },
    #[error("{op} failed (errno {errno})")]
    LookupFailed { op: &'static str, errno: i32 },
    #[error("message payload must contain at least one frame")]
    EmptyPayload,
    #[error("operation on a destroyed node handle")]
    UseAfterFree,
}
