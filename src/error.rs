//! Error translation for socket operations.
//!
//! Every failing OS call is converted at the call site into a typed
//! [`SocketError`] carrying an [`ErrorContext`]: the raw error code and a
//! rendered message. The message is the caller-supplied context, suffixed
//! with the OS error text in brackets when a nonzero code was captured.
//!
//! Error codes are obtained through the [`ErrorLookup`] capability so tests
//! can substitute a fake source; the OS-backed default reads errno for the
//! global slot, `SO_ERROR` for a specific descriptor, and renders codes via
//! `strerror(3)`.

use std::ffi::CStr;
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

#[cfg(test)]
use mockall::automock;

/// Source of OS error codes and their text renderings.
#[cfg_attr(test, automock)]
pub trait ErrorLookup {
    /// Pending error code for `fd`, or the global errno slot when `None`.
    fn last_error(&self, fd: Option<RawFd>) -> i32;

    /// Clear the pending error for `fd`, or the global errno slot when `None`.
    fn clear_error(&self, fd: Option<RawFd>);

    /// Render an error code to human-readable text.
    fn str_error(&self, code: i32) -> String;
}

/// The real error source: errno, `SO_ERROR`, and `strerror(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsErrorLookup;

impl ErrorLookup for OsErrorLookup {
    fn last_error(&self, fd: Option<RawFd>) -> i32 {
        match fd {
            Some(fd) => so_error(fd),
            None => io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }

    fn clear_error(&self, fd: Option<RawFd>) {
        match fd {
            // The kernel resets SO_ERROR once it has been read.
            Some(fd) => {
                so_error(fd);
            }
            None => unsafe {
                *errno_location() = 0;
            },
        }
    }

    fn str_error(&self, code: i32) -> String {
        let ptr = unsafe { libc::strerror(code) };
        if ptr.is_null() {
            return format!("Unknown error {code}");
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Pending error code in the global errno slot.
pub fn last_error() -> i32 {
    OsErrorLookup.last_error(None)
}

/// Clear the global errno slot.
pub fn clear_error() {
    OsErrorLookup.clear_error(None);
}

/// Render an error code to text.
pub fn str_error(code: i32) -> String {
    OsErrorLookup.str_error(code)
}

fn so_error(fd: RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 {
        err
    } else {
        0
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "emscripten"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

#[cfg(any(target_os = "openbsd", target_os = "netbsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno()
}

/// Error code and rendered message captured at the moment of failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub code: i32,
    pub message: String,
}

impl ErrorContext {
    /// Capture from the failing call's own error. This is the primary path:
    /// the code travels with the failure instead of being re-read from a
    /// global slot after the fact.
    pub fn from_io(context: impl Into<String>, err: &io::Error) -> Self {
        Self::with_code(context, err.raw_os_error().unwrap_or(0), &OsErrorLookup)
    }

    /// Capture by querying a pending-error slot through `lookup`. Exposed for
    /// parity with the last-error API; prefer [`ErrorContext::from_io`].
    pub fn capture(context: impl Into<String>, fd: Option<RawFd>, lookup: &dyn ErrorLookup) -> Self {
        let code = lookup.last_error(fd);
        Self::with_code(context, code, lookup)
    }

    fn with_code(context: impl Into<String>, code: i32, lookup: &dyn ErrorLookup) -> Self {
        let context = context.into();
        let message = if code == 0 {
            context
        } else if context.is_empty() {
            lookup.str_error(code)
        } else {
            format!("{} [{}]", context, lookup.str_error(code))
        };
        ErrorContext { code, message }
    }

    pub(crate) fn plain(context: impl Into<String>) -> Self {
        ErrorContext {
            code: 0,
            message: context.into(),
        }
    }
}

/// Typed failure produced by socket operations.
///
/// The variants exist so callers can discriminate the failure category
/// without string matching; all share the same message contract.
#[derive(Debug)]
pub enum SocketError {
    /// A descriptor could not be allocated.
    Creation(ErrorContext),
    /// bind, connect, accept, or shutdown failed.
    Connection(ErrorContext),
    /// A data-transfer read failed.
    Read(ErrorContext),
    /// A data-transfer write failed.
    Write(ErrorContext),
    /// Everything else: options, readiness waits, address queries, message I/O.
    General(ErrorContext),
    /// Logic misuse with no OS error involved, e.g. asking a portless
    /// address family for a port.
    InvalidUsage(String),
}

impl SocketError {
    pub(crate) fn creation(context: impl Into<String>, err: &io::Error) -> Self {
        SocketError::Creation(ErrorContext::from_io(context, err))
    }

    pub(crate) fn connection(context: impl Into<String>, err: &io::Error) -> Self {
        SocketError::Connection(ErrorContext::from_io(context, err))
    }

    pub(crate) fn read(context: impl Into<String>, err: &io::Error) -> Self {
        SocketError::Read(ErrorContext::from_io(context, err))
    }

    pub(crate) fn write(context: impl Into<String>, err: &io::Error) -> Self {
        SocketError::Write(ErrorContext::from_io(context, err))
    }

    pub(crate) fn general(context: impl Into<String>, err: &io::Error) -> Self {
        SocketError::General(ErrorContext::from_io(context, err))
    }

    pub(crate) fn invalid_usage(message: impl Into<String>) -> Self {
        SocketError::InvalidUsage(message.into())
    }

    /// The captured OS error code, 0 when none was involved.
    pub fn code(&self) -> i32 {
        match self {
            SocketError::Creation(ctx)
            | SocketError::Connection(ctx)
            | SocketError::Read(ctx)
            | SocketError::Write(ctx)
            | SocketError::General(ctx) => ctx.code,
            SocketError::InvalidUsage(_) => 0,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SocketError::Creation(ctx)
            | SocketError::Connection(ctx)
            | SocketError::Read(ctx)
            | SocketError::Write(ctx)
            | SocketError::General(ctx) => &ctx.message,
            SocketError::InvalidUsage(message) => message,
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for SocketError {}
