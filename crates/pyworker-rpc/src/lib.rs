//! JSON-RPC boundary for a pyworker session.
//!
//! The host talks to the worker over a byte stream carrying Content-Length
//! framed JSON-RPC 2.0 messages. Requests map one-to-one onto the engine
//! operations (`init`, `run`, `clearBuffer`, `readFile`, `writeFile`, `mkdir`,
//! `rmdir`, `unlink`). The engine callbacks travel the other way as
//! notifications:
//!
//! - `stdout` with `{"text": ...}` once per stdout flush
//! - `ready` with the session info once `init` succeeds
//! - `returnValue` with a `ReturnResult` or `null` (script mode only)
//!
//! [`serve`] runs the whole loop on a current-thread runtime until the input
//! stream ends.

pub mod handler;
mod server;
mod transport;

pub use crate::{
    handler::{RpcError, WorkerHandler},
    server::{serve, serve_loop},
    transport::{Transport, read_framed_message, write_framed_message},
};
