//! adventure-pty: pseudo-terminal sessions for driving interactive programs.
//!
//! This crate runs a child program (typically a text adventure) on a PTY,
//! keeps a background reader draining its output, and hands accumulated
//! output to whoever asks for it.
//!
//! # Architecture
//!
//! - [`PtyHandle`] — Low-level PTY process management (spawn in raw mode,
//!   write, liveness, terminate).
//! - [`drain`] — The background read loop and the lock-protected
//!   [`OutputBuffer`] it appends to.
//! - [`Session`] — Pairs a `PtyHandle` with a running drain loop and a
//!   UTF-8 decoder; the unit a chat room talks to.
//! - [`Registry`] — At most one `Session` per room key.

pub mod decode;
pub mod drain;
pub mod pty;
pub mod registry;
pub mod session;

pub use decode::Utf8Decoder;
pub use drain::{DrainLoop, OutputBuffer};
pub use pty::{PtyError, PtyHandle};
pub use registry::Registry;
pub use session::{Session, SessionConfig};
