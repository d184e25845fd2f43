//! Typed socket handles over the BSD-socket API.
//!
//! A thin wrapper around the OS socket surface: each [`Socket`] owns exactly
//! one descriptor and every operation either returns a value or fails with a
//! typed [`SocketError`] carrying the OS error code and rendered message.
//! This crate implements socket operations using Rust's standard library and
//! the `socket2` crate, with `libc` for the calls socket2 does not expose.
//!
//! ## Overview
//!
//! The crate provides:
//! - **Socket handles**: create, bind, listen, accept, connect, pair
//!   creation, stream import; exclusive descriptor ownership with
//!   deterministic release on drop
//! - **Data transfer**: blocking and flag-aware send/recv, datagram
//!   send-to/recv-from, scatter/gather message I/O with ancillary data
//! - **Readiness multiplexing**: timeout-bounded wait for readable/
//!   writable/exceptional descriptors, and timed I/O built on it
//! - **Urgent data**: out-of-band send flags and the read-pointer
//!   at-mark query
//!
//! Blocking is the default; `set_nonblock` switches a handle to short
//! returns. There is no retry, buffering, or protocol logic here; those
//! belong to the layers above.

pub mod error;
pub mod message;
pub mod select;
pub mod socket;

pub use error::{clear_error, last_error, str_error, ErrorContext, ErrorLookup, OsErrorLookup, SocketError};
pub use message::{cmsg_space, Message};
pub use select::select;
pub use socket::{
    AddressFamily, OptionValue, ReadMode, RecvFrom, Socket, SocketKind, SocketName, TimedRead,
};
