//! Scatter/gather message structures and ancillary-data sizing.
//!
//! A [`Message`] carries a list of data segments (vector I/O), an optional
//! address/name field, and an ancillary control buffer. For receives the
//! buffers are pre-sized by the caller; `Socket::recv_msg` truncates them to
//! what actually arrived. For sends the segment list goes out as one logical
//! payload.

use std::mem;
use std::os::unix::io::RawFd;

use crate::error::SocketError;
use crate::socket::SocketName;

/// One scatter/gather message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Data segments, transferred in order within a single system call.
    pub segments: Vec<Vec<u8>>,
    /// Peer name: destination for sends on unconnected datagram sockets,
    /// source as reported by the OS after a receive.
    pub address: Option<SocketName>,
    /// Ancillary (control) data buffer; size receive capacity with
    /// [`cmsg_space`].
    pub control: Vec<u8>,
}

impl Message {
    pub fn new() -> Self {
        Message::default()
    }

    /// Append one data segment.
    pub fn with_segment(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.segments.push(data.into());
        self
    }

    /// Set the destination name for a send.
    pub fn to(mut self, address: impl Into<String>, port: Option<u16>) -> Self {
        self.address = Some(SocketName {
            address: address.into(),
            port,
        });
        self
    }

    /// Pre-sized buffers for a receive: one zeroed segment per requested
    /// length plus `control_space` bytes of ancillary capacity.
    pub fn for_recv(segment_sizes: &[usize], control_space: usize) -> Self {
        Message {
            segments: segment_sizes.iter().map(|&len| vec![0u8; len]).collect(),
            address: None,
            control: vec![0u8; control_space],
        }
    }

    /// Total payload bytes across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Control-message buffer space needed for one ancillary item of the given
/// `(level, cmsg_type)` pair, `count` elements for the counted kinds.
///
/// Unknown pairs are an invalid-usage failure rather than a guess: the
/// payload size depends on the kind, and a wrong size silently truncates
/// ancillary data.
pub fn cmsg_space(level: i32, cmsg_type: i32, count: u32) -> Result<usize, SocketError> {
    let payload = match (level, cmsg_type) {
        (libc::SOL_SOCKET, libc::SCM_RIGHTS) => {
            mem::size_of::<RawFd>() * count.max(1) as usize
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        (libc::SOL_SOCKET, libc::SCM_CREDENTIALS) => mem::size_of::<libc::ucred>(),
        (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => mem::size_of::<libc::in6_pktinfo>(),
        (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) | (libc::IPPROTO_IPV6, libc::IPV6_TCLASS) => {
            mem::size_of::<libc::c_int>()
        }
        _ => {
            return Err(SocketError::invalid_usage(format!(
                "cmsg_space({level}, {cmsg_type}, {count}): unsupported control message kind"
            )));
        }
    };
    Ok(unsafe { libc::CMSG_SPACE(payload as libc::c_uint) } as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmsg_space_scm_rights_grows_with_count() {
        let one = cmsg_space(libc::SOL_SOCKET, libc::SCM_RIGHTS, 1).unwrap();
        let four = cmsg_space(libc::SOL_SOCKET, libc::SCM_RIGHTS, 4).unwrap();
        assert!(one > 0);
        assert!(four > one);
    }

    #[test]
    fn test_cmsg_space_zero_count_means_one_element() {
        let zero = cmsg_space(libc::SOL_SOCKET, libc::SCM_RIGHTS, 0).unwrap();
        let one = cmsg_space(libc::SOL_SOCKET, libc::SCM_RIGHTS, 1).unwrap();
        assert_eq!(zero, one);
    }

    #[test]
    fn test_cmsg_space_hop_limit() {
        let space = cmsg_space(libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT, 0).unwrap();
        assert!(space >= mem::size_of::<libc::c_int>());
    }

    #[test]
    fn test_cmsg_space_rejects_unknown_pair() {
        let err = cmsg_space(libc::SOL_SOCKET, 424_242, 0).unwrap_err();
        assert!(matches!(err, SocketError::InvalidUsage(_)));
    }

    #[test]
    fn test_for_recv_pre_sizes_buffers() {
        let msg = Message::for_recv(&[3, 5], 32);
        assert_eq!(msg.segments.len(), 2);
        assert_eq!(msg.segments[0].len(), 3);
        assert_eq!(msg.segments[1].len(), 5);
        assert_eq!(msg.control.len(), 32);
        assert_eq!(msg.len(), 8);
        assert!(msg.address.is_none());
    }

    #[test]
    fn test_builder_segments() {
        let msg = Message::new()
            .with_segment(&b"Hel"[..])
            .with_segment(&b"lo"[..])
            .to("127.0.0.1", Some(4242));
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.address.as_ref().unwrap().port, Some(4242));
    }
}
