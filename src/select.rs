//! Readiness multiplexing over `select(2)`.
//!
//! Given up to three collections of handles (read/write/exceptional
//! interest) and a timeout, block until at least one descriptor is ready or
//! the timeout elapses. Each collection is retained in place down to the
//! subset that became ready; membership is decided by raw descriptor
//! identity, so distinct entries wrapping the same descriptor are tolerated.

use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::error::SocketError;
use crate::socket::Socket;

/// Wait until a watched descriptor is ready or `timeout` elapses.
///
/// A zero timeout polls and returns immediately. Returns the count of ready
/// descriptors across all three categories; an elapsed timeout is not an
/// error and yields 0 with all collections emptied.
pub fn select(
    mut read: Option<&mut Vec<&Socket>>,
    mut write: Option<&mut Vec<&Socket>>,
    mut except: Option<&mut Vec<&Socket>>,
    timeout: Duration,
) -> Result<usize, SocketError> {
    let mut nfds: libc::c_int = 0;
    let mut read_set = new_fd_set();
    let mut write_set = new_fd_set();
    let mut except_set = new_fd_set();

    fill_fd_set(&mut read_set, read.as_deref(), &mut nfds)?;
    fill_fd_set(&mut write_set, write.as_deref(), &mut nfds)?;
    fill_fd_set(&mut except_set, except.as_deref(), &mut nfds)?;

    let mut tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };

    let rc = unsafe {
        libc::select(
            nfds,
            &mut read_set as *mut libc::fd_set,
            &mut write_set as *mut libc::fd_set,
            &mut except_set as *mut libc::fd_set,
            &mut tv as *mut libc::timeval,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        let watched = set_len(&read) + set_len(&write) + set_len(&except);
        return Err(SocketError::general(
            format!("select({watched} descriptors, {timeout:?}) failed"),
            &err,
        ));
    }

    retain_ready(&read_set, read.as_deref_mut());
    retain_ready(&write_set, write.as_deref_mut());
    retain_ready(&except_set, except.as_deref_mut());

    log::trace!("select: {rc} of {nfds} watched descriptors ready");
    Ok(rc as usize)
}

fn new_fd_set() -> libc::fd_set {
    let mut set: libc::fd_set = unsafe { mem::zeroed() };
    unsafe { libc::FD_ZERO(&mut set as *mut libc::fd_set) };
    set
}

fn fill_fd_set(
    set: &mut libc::fd_set,
    handles: Option<&Vec<&Socket>>,
    nfds: &mut libc::c_int,
) -> Result<(), SocketError> {
    let Some(handles) = handles else {
        return Ok(());
    };
    for sock in handles {
        let fd = sock.as_raw_fd();
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(SocketError::invalid_usage(format!(
                "descriptor {fd} cannot be watched (FD_SETSIZE is {})",
                libc::FD_SETSIZE
            )));
        }
        unsafe { libc::FD_SET(fd, set as *mut libc::fd_set) };
        if fd >= *nfds {
            *nfds = fd + 1;
        }
    }
    Ok(())
}

fn retain_ready(set: &libc::fd_set, handles: Option<&mut Vec<&Socket>>) {
    if let Some(handles) = handles {
        handles.retain(|sock| unsafe { libc::FD_ISSET(sock.as_raw_fd(), set as *const libc::fd_set) });
    }
}

fn set_len(handles: &Option<&mut Vec<&Socket>>) -> usize {
    handles.as_ref().map_or(0, |h| h.len())
}
