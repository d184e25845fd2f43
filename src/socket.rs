//! Socket handle.
//!
//! A [`Socket`] owns exactly one OS socket descriptor and exposes operations
//! that either return a value or fail with a typed [`SocketError`]. All
//! socket state (bound address, blocking mode, options) lives in the OS and
//! is queried on demand; the handle itself carries nothing but the
//! descriptor. The descriptor is released when the handle drops, and close
//! errors are suppressed.
//!
//! Built on the `socket2` crate for the portable call surface, with `libc`
//! for the parts it does not expose (urgent-data mark, raw scatter/gather
//! message I/O, structured option values).

use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket as Socket2, Type};

use crate::error::{ErrorContext, ErrorLookup, OsErrorLookup, SocketError};
use crate::message::Message;
use crate::select;

// `libc` only exposes `SIOCATMARK` for Apple targets; on Linux it is the
// same ioctl request number defined by the kernel's `asm-generic/sockios.h`.
#[cfg(target_os = "linux")]
const SIOCATMARK: libc::c_ulong = 0x8905;
#[cfg(not(target_os = "linux"))]
use libc::SIOCATMARK;

/// Address family. Inferred from address syntax by the `*_by_address`
/// factories: a literal containing `:` is IPv6, a leading `/` is a Unix
/// path, anything else is IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unix,
}

impl From<AddressFamily> for Domain {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
            AddressFamily::Unix => Domain::UNIX,
        }
    }
}

/// Socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Stream socket (connection-oriented).
    Stream,
    /// Datagram socket (message-oriented).
    Datagram,
}

impl From<SocketKind> for Type {
    fn from(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Stream => Type::STREAM,
            SocketKind::Datagram => Type::DGRAM,
        }
    }
}

/// How `read` delimits its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Return whatever a single receive yields, up to the requested length.
    #[default]
    Binary,
    /// Read bytewise and stop after a `\n` or `\r` (terminator included).
    Line,
}

/// Local or remote name of a socket. `port` is `None` for address families
/// that do not use ports (Unix domain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketName {
    pub address: String,
    pub port: Option<u16>,
}

impl SocketName {
    pub(crate) fn from_sock_addr(addr: &SockAddr) -> Self {
        if let Some(inet) = addr.as_socket() {
            return SocketName {
                address: inet.ip().to_string(),
                port: Some(inet.port()),
            };
        }
        // Unix domain: pathname, or empty for unnamed/abstract sockets.
        let path = addr
            .as_pathname()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        SocketName {
            address: path,
            port: None,
        }
    }
}

/// Result of a timed exact-length read. `complete` is authoritative: a
/// timeout yields whatever was accumulated with `complete == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedRead {
    pub data: Vec<u8>,
    pub complete: bool,
}

/// Result of a datagram receive: payload plus the peer it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvFrom {
    pub data: Vec<u8>,
    pub address: String,
    pub port: Option<u16>,
}

/// Value for `set_option`. Scalars and the structured records the common
/// option levels expect.
#[derive(Debug, Clone)]
pub enum OptionValue {
    Int(i32),
    Linger { on: bool, seconds: u16 },
    Time(Duration),
    Raw(Vec<u8>),
}

/// An exclusively owned socket descriptor.
///
/// At most one `Socket` owns a given descriptor; ownership is Rust
/// ownership, and the descriptor closes when the handle drops. Adopting the
/// same raw descriptor into two handles is a caller error (double close).
#[derive(Debug)]
pub struct Socket {
    inner: Socket2,
}

impl Socket {
    fn wrap(inner: Socket2) -> Self {
        Socket { inner }
    }

    /// Create a new unbound socket.
    ///
    /// `protocol` is the raw protocol number, 0 for the family default;
    /// unsupported numbers fail here with the creation error kind.
    pub fn create(family: AddressFamily, kind: SocketKind, protocol: i32) -> Result<Self, SocketError> {
        let proto = (protocol != 0).then(|| Protocol::from(protocol));
        let inner = Socket2::new(family.into(), kind.into(), proto).map_err(|e| {
            SocketError::creation(format!("create({family:?}, {kind:?}, {protocol}) failed"), &e)
        })?;
        log::trace!("created {family:?} {kind:?} socket fd {}", inner.as_raw_fd());
        Ok(Socket::wrap(inner))
    }

    /// Create an IPv4 TCP socket bound to the wildcard address and already
    /// listening. Pass `libc::SOMAXCONN` for the OS default backlog.
    pub fn create_listen(port: u16, backlog: i32) -> Result<Self, SocketError> {
        let sock = Self::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP)?;
        sock.bind("0.0.0.0", port)?;
        sock.listen(backlog)?;
        Ok(sock)
    }

    /// Create a socket whose family is inferred from the address syntax.
    pub fn create_by_address(address: &str, kind: SocketKind, protocol: i32) -> Result<Self, SocketError> {
        Self::create(infer_family(address), kind, protocol)
    }

    /// Infer the family from `address`, create, bind, and listen for stream
    /// kinds.
    pub fn create_bound(
        address: &str,
        port: u16,
        kind: SocketKind,
        protocol: i32,
    ) -> Result<Self, SocketError> {
        let sock = Self::create_by_address(address, kind, protocol)?;
        sock.bind(address, port)?;
        if kind == SocketKind::Stream {
            sock.listen(libc::SOMAXCONN)?;
        }
        Ok(sock)
    }

    /// Create two connected sockets sharing a kernel pipe. Fails as a unit;
    /// no partial pair is ever returned.
    pub fn create_pair(
        family: AddressFamily,
        kind: SocketKind,
        protocol: i32,
    ) -> Result<(Self, Self), SocketError> {
        let proto = (protocol != 0).then(|| Protocol::from(protocol));
        let (first, second) = Socket2::pair(family.into(), kind.into(), proto).map_err(|e| {
            SocketError::creation(
                format!("create_pair({family:?}, {kind:?}, {protocol}) failed"),
                &e,
            )
        })?;
        log::trace!(
            "created {family:?} {kind:?} pair fds {} / {}",
            first.as_raw_fd(),
            second.as_raw_fd()
        );
        Ok((Socket::wrap(first), Socket::wrap(second)))
    }

    /// Adopt a pre-existing std stream as a socket handle. The type system
    /// already guarantees the stream is a socket, so this cannot fail.
    pub fn from_stream<S: Into<Socket2>>(stream: S) -> Self {
        Socket::wrap(stream.into())
    }

    /// Block (subject to the blocking mode) until a pending connection
    /// exists, then return a handle for it. Calling this on anything but a
    /// listening socket is a designed failure.
    pub fn accept(&self) -> Result<Self, SocketError> {
        let (sock, peer) = self
            .inner
            .accept()
            .map_err(|e| SocketError::connection("accept() failed", &e))?;
        log::trace!("fd {} accepted connection from {:?}", self.as_raw_fd(), peer);
        Ok(Socket::wrap(sock))
    }

    /// Bind to an address whose family matches this socket. A syntactically
    /// invalid address fails here without reaching the OS.
    pub fn bind(&self, address: &str, port: u16) -> Result<(), SocketError> {
        let addr = resolve_addr(address, Some(port)).ok_or_else(|| {
            SocketError::Connection(ErrorContext::plain(format!(
                "bind({address}, {port}) failed: unresolvable address"
            )))
        })?;
        self.inner
            .bind(&addr)
            .map_err(|e| SocketError::connection(format!("bind({address}, {port}) failed"), &e))
    }

    /// Connect to a peer. `port` is `None` for portless families.
    pub fn connect(&self, address: &str, port: Option<u16>) -> Result<(), SocketError> {
        let addr = resolve_addr(address, port).ok_or_else(|| {
            SocketError::Connection(ErrorContext::plain(format!(
                "connect({address}, {port:?}) failed: unresolvable address"
            )))
        })?;
        self.inner
            .connect(&addr)
            .map_err(|e| SocketError::connection(format!("connect({address}, {port:?}) failed"), &e))
    }

    /// Start listening for connections.
    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        self.inner
            .listen(backlog)
            .map_err(|e| SocketError::general(format!("listen({backlog}) failed"), &e))
    }

    /// Read up to `max_len` bytes. Blocks until data is available unless the
    /// handle is non-blocking.
    pub fn read(&self, max_len: usize, mode: ReadMode) -> Result<Vec<u8>, SocketError> {
        match mode {
            ReadMode::Binary => self
                .recv_bytes(max_len, 0)
                .map_err(|e| SocketError::read(format!("read({max_len}, {mode:?}) failed"), &e)),
            ReadMode::Line => self.read_line(max_len),
        }
    }

    /// Write `data`, returning the number of bytes accepted by the OS.
    /// Slice the buffer to write less than its full length.
    pub fn write(&self, data: &[u8]) -> Result<usize, SocketError> {
        self.inner
            .send(data)
            .map_err(|e| SocketError::write(format!("write({} bytes) failed", data.len()), &e))
    }

    /// Flag-aware receive (`libc::MSG_OOB` and friends).
    pub fn recv(&self, len: usize, flags: i32) -> Result<Vec<u8>, SocketError> {
        self.recv_bytes(len, flags)
            .map_err(|e| SocketError::read(format!("recv({len}, {flags}) failed"), &e))
    }

    /// Flag-aware send.
    pub fn send(&self, data: &[u8], flags: i32) -> Result<usize, SocketError> {
        self.inner.send_with_flags(data, flags).map_err(|e| {
            SocketError::write(format!("send({} bytes, {flags}) failed", data.len()), &e)
        })
    }

    /// Datagram receive: payload plus the peer it came from.
    pub fn recv_from(&self, len: usize, flags: i32) -> Result<RecvFrom, SocketError> {
        let mut buf = vec![MaybeUninit::<u8>::uninit(); len];
        let (count, addr) = self
            .inner
            .recv_from_with_flags(&mut buf, flags)
            .map_err(|e| SocketError::read(format!("recv_from({len}, {flags}) failed"), &e))?;
        let name = SocketName::from_sock_addr(&addr);
        Ok(RecvFrom {
            data: init_bytes(&buf[..count]),
            address: name.address,
            port: name.port,
        })
    }

    /// Datagram send to an explicit peer.
    pub fn send_to(
        &self,
        data: &[u8],
        address: &str,
        port: Option<u16>,
        flags: i32,
    ) -> Result<usize, SocketError> {
        let addr = resolve_addr(address, port).ok_or_else(|| {
            SocketError::Write(ErrorContext::plain(format!(
                "send_to({address}, {port:?}) failed: unresolvable address"
            )))
        })?;
        self.inner
            .send_to_with_flags(data, &addr, flags)
            .map_err(|e| {
                SocketError::write(format!("send_to({address}, {port:?}, {flags}) failed"), &e)
            })
    }

    /// Scatter receive into `message`'s pre-sized segments (see
    /// [`Message::for_recv`]). Returns total bytes across segments;
    /// segments, control buffer, and peer name are truncated/populated to
    /// what actually arrived.
    pub fn recv_msg(&self, message: &mut Message, flags: i32) -> Result<usize, SocketError> {
        let mut iovs: Vec<libc::iovec> = message
            .segments
            .iter_mut()
            .map(|seg| libc::iovec {
                iov_base: seg.as_mut_ptr() as *mut libc::c_void,
                iov_len: seg.len(),
            })
            .collect();

        let mut name: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
        hdr.msg_name = &mut name as *mut libc::sockaddr_storage as *mut libc::c_void;
        hdr.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        if !iovs.is_empty() {
            hdr.msg_iov = iovs.as_mut_ptr();
            hdr.msg_iovlen = iovs.len() as _;
        }
        if !message.control.is_empty() {
            hdr.msg_control = message.control.as_mut_ptr() as *mut libc::c_void;
            hdr.msg_controllen = message.control.len() as _;
        }

        let rc = unsafe { libc::recvmsg(self.as_raw_fd(), &mut hdr, flags) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return Err(SocketError::read(
                format!("recv_msg({} segments, {flags}) failed", message.segments.len()),
                &err,
            ));
        }
        let total = rc as usize;

        // The kernel fills segments in order; trim each to its share.
        let mut remaining = total;
        for seg in &mut message.segments {
            let filled = remaining.min(seg.len());
            seg.truncate(filled);
            remaining -= filled;
        }
        message.control.truncate(hdr.msg_controllen as usize);
        message.address = parse_storage(&name, hdr.msg_namelen);
        Ok(total)
    }

    /// Gather send: `message`'s segments go out as one logical payload,
    /// addressed to `message.address` when set.
    pub fn send_msg(&self, message: &Message, flags: i32) -> Result<usize, SocketError> {
        let mut iovs: Vec<libc::iovec> = message
            .segments
            .iter()
            .map(|seg| libc::iovec {
                iov_base: seg.as_ptr() as *mut libc::c_void,
                iov_len: seg.len(),
            })
            .collect();

        let dest = match &message.address {
            Some(name) => Some(resolve_addr(&name.address, name.port).ok_or_else(|| {
                SocketError::Write(ErrorContext::plain(format!(
                    "send_msg to {} failed: unresolvable address",
                    name.address
                )))
            })?),
            None => None,
        };

        let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
        if let Some(addr) = &dest {
            hdr.msg_name = addr.as_ptr() as *mut libc::c_void;
            hdr.msg_namelen = addr.len();
        }
        if !iovs.is_empty() {
            hdr.msg_iov = iovs.as_mut_ptr();
            hdr.msg_iovlen = iovs.len() as _;
        }
        if !message.control.is_empty() {
            hdr.msg_control = message.control.as_ptr() as *mut libc::c_void;
            hdr.msg_controllen = message.control.len() as _;
        }

        let rc = unsafe { libc::sendmsg(self.as_raw_fd(), &hdr, flags) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return Err(SocketError::write(
                format!("send_msg({} segments, {flags}) failed", message.segments.len()),
                &err,
            ));
        }
        Ok(rc as usize)
    }

    /// True when the next unread byte is the one immediately following
    /// out-of-band data, i.e. the read pointer sits at the urgent mark.
    pub fn at_mark(&self) -> Result<bool, SocketError> {
        let mut mark: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.as_raw_fd(), SIOCATMARK as _, &mut mark) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return Err(SocketError::general("at_mark() failed", &err));
        }
        Ok(mark != 0)
    }

    /// Disable further receives, sends, or both on the connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        self.inner
            .shutdown(how)
            .map_err(|e| SocketError::connection(format!("shutdown({how:?}) failed"), &e))
    }

    /// Explicitly release the descriptor. Dropping the handle has the same
    /// effect; close errors are suppressed either way.
    pub fn close(self) {
        log::trace!("closing fd {}", self.as_raw_fd());
    }

    /// True iff this handle becomes readable within `timeout`.
    pub fn select_for_read(&self, timeout: Duration) -> Result<bool, SocketError> {
        let mut read = vec![self];
        let ready = select::select(Some(&mut read), None, None, timeout)?;
        Ok(ready > 0 && !read.is_empty())
    }

    /// True iff this handle becomes writable within `timeout`.
    pub fn select_for_write(&self, timeout: Duration) -> Result<bool, SocketError> {
        let mut write = vec![self];
        let ready = select::select(None, Some(&mut write), None, timeout)?;
        Ok(ready > 0 && !write.is_empty())
    }

    /// Accumulate exactly `exact_len` bytes, waiting up to `timeout` before
    /// each read. A stream delivers in arbitrary chunks, so this loops
    /// wait-then-read until the length is met or a wait times out; the
    /// result's `complete` flag is authoritative, not the byte count.
    pub fn read_timed(
        &self,
        exact_len: usize,
        timeout: Duration,
        mode: ReadMode,
    ) -> Result<TimedRead, SocketError> {
        let mut data = Vec::with_capacity(exact_len);
        while data.len() < exact_len {
            if !self.select_for_read(timeout)? {
                return Ok(TimedRead {
                    data,
                    complete: false,
                });
            }
            let chunk = self.read(exact_len - data.len(), mode)?;
            if chunk.is_empty() {
                // Peer closed: the descriptor stays readable but yields
                // nothing, which would otherwise loop forever.
                return Ok(TimedRead {
                    data,
                    complete: false,
                });
            }
            data.extend_from_slice(&chunk);
        }
        Ok(TimedRead {
            data,
            complete: true,
        })
    }

    /// Single wait-then-receive cycle: not readable within `timeout` yields
    /// an empty result without attempting the receive.
    pub fn recv_timed(&self, len: usize, timeout: Duration, flags: i32) -> Result<Vec<u8>, SocketError> {
        if !self.select_for_read(timeout)? {
            return Ok(Vec::new());
        }
        self.recv(len, flags)
    }

    /// Single wait-then-send cycle: not writable within `timeout` yields 0
    /// without attempting the send.
    pub fn send_timed(&self, data: &[u8], timeout: Duration, flags: i32) -> Result<usize, SocketError> {
        if !self.select_for_write(timeout)? {
            return Ok(0);
        }
        self.send(data, flags)
    }

    /// Local name of this socket, queried from the OS.
    pub fn sock_name(&self) -> Result<SocketName, SocketError> {
        let addr = self
            .inner
            .local_addr()
            .map_err(|e| SocketError::general("sock_name() failed", &e))?;
        Ok(SocketName::from_sock_addr(&addr))
    }

    /// Remote name of the connected peer, queried from the OS.
    pub fn peer_name(&self) -> Result<SocketName, SocketError> {
        let addr = self
            .inner
            .peer_addr()
            .map_err(|e| SocketError::general("peer_name() failed", &e))?;
        Ok(SocketName::from_sock_addr(&addr))
    }

    pub fn local_address(&self) -> Result<String, SocketError> {
        Ok(self.sock_name()?.address)
    }

    pub fn local_port(&self) -> Result<u16, SocketError> {
        self.sock_name()?.port.ok_or_else(|| {
            SocketError::invalid_usage("asked for local port on a family that does not use ports")
        })
    }

    pub fn remote_address(&self) -> Result<String, SocketError> {
        Ok(self.peer_name()?.address)
    }

    pub fn remote_port(&self) -> Result<u16, SocketError> {
        self.peer_name()?.port.ok_or_else(|| {
            SocketError::invalid_usage("asked for remote port on a family that does not use ports")
        })
    }

    /// Set a socket option at the given level. The failure message carries
    /// the value that was rejected.
    pub fn set_option(&self, level: i32, option: i32, value: OptionValue) -> Result<(), SocketError> {
        let rc = match &value {
            OptionValue::Int(v) => unsafe {
                libc::setsockopt(
                    self.as_raw_fd(),
                    level,
                    option,
                    v as *const libc::c_int as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            },
            OptionValue::Linger { on, seconds } => {
                let linger = libc::linger {
                    l_onoff: *on as libc::c_int,
                    l_linger: *seconds as libc::c_int,
                };
                unsafe {
                    libc::setsockopt(
                        self.as_raw_fd(),
                        level,
                        option,
                        &linger as *const libc::linger as *const libc::c_void,
                        mem::size_of::<libc::linger>() as libc::socklen_t,
                    )
                }
            }
            OptionValue::Time(duration) => {
                let tv = libc::timeval {
                    tv_sec: duration.as_secs() as libc::time_t,
                    tv_usec: duration.subsec_micros() as libc::suseconds_t,
                };
                unsafe {
                    libc::setsockopt(
                        self.as_raw_fd(),
                        level,
                        option,
                        &tv as *const libc::timeval as *const libc::c_void,
                        mem::size_of::<libc::timeval>() as libc::socklen_t,
                    )
                }
            }
            OptionValue::Raw(bytes) => unsafe {
                libc::setsockopt(
                    self.as_raw_fd(),
                    level,
                    option,
                    bytes.as_ptr() as *const libc::c_void,
                    bytes.len() as libc::socklen_t,
                )
            },
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            return Err(SocketError::general(
                format!("set_option({level}, {option}, {value:?}) failed"),
                &err,
            ));
        }
        Ok(())
    }

    /// Put the descriptor into blocking mode.
    pub fn set_block(&self) -> Result<(), SocketError> {
        self.inner
            .set_nonblocking(false)
            .map_err(|e| SocketError::general("set_block() failed", &e))
    }

    /// Put the descriptor into non-blocking mode: I/O returns short results
    /// or designed failures instead of suspending.
    pub fn set_nonblock(&self) -> Result<(), SocketError> {
        self.inner
            .set_nonblocking(true)
            .map_err(|e| SocketError::general("set_nonblock() failed", &e))
    }

    /// Pending error code in this descriptor's `SO_ERROR` slot.
    pub fn last_error(&self) -> i32 {
        OsErrorLookup.last_error(Some(self.as_raw_fd()))
    }

    /// Clear this descriptor's pending error.
    pub fn clear_error(&self) {
        OsErrorLookup.clear_error(Some(self.as_raw_fd()));
    }

    /// The underlying socket2 handle.
    pub fn inner(&self) -> &Socket2 {
        &self.inner
    }

    fn recv_bytes(&self, len: usize, flags: i32) -> io::Result<Vec<u8>> {
        let mut buf = vec![MaybeUninit::<u8>::uninit(); len];
        let count = self.inner.recv_with_flags(&mut buf, flags)?;
        Ok(init_bytes(&buf[..count]))
    }

    fn read_line(&self, max_len: usize) -> Result<Vec<u8>, SocketError> {
        let mut out = Vec::with_capacity(max_len);
        while out.len() < max_len {
            let mut byte = [MaybeUninit::<u8>::uninit()];
            let count = self
                .inner
                .recv_with_flags(&mut byte, 0)
                .map_err(|e| SocketError::read(format!("read({max_len}, Line) failed"), &e))?;
            if count == 0 {
                break;
            }
            let b = unsafe { byte[0].assume_init() };
            out.push(b);
            if b == b'\n' || b == b'\r' {
                break;
            }
        }
        Ok(out)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl FromRawFd for Socket {
    /// Adopt a raw descriptor. The caller warrants that `fd` is an open
    /// socket not owned elsewhere; the handle takes exclusive ownership and
    /// closes it on drop.
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Socket::wrap(Socket2::from_raw_fd(fd))
    }
}

fn infer_family(address: &str) -> AddressFamily {
    if address.contains(':') {
        AddressFamily::Ipv6
    } else if address.starts_with('/') {
        AddressFamily::Unix
    } else {
        AddressFamily::Ipv4
    }
}

fn resolve_addr(address: &str, port: Option<u16>) -> Option<SockAddr> {
    if address.starts_with('/') {
        return SockAddr::unix(address).ok();
    }
    if address.contains(':') {
        let ip: Ipv6Addr = address.parse().ok()?;
        return Some(SockAddr::from(SocketAddrV6::new(ip, port.unwrap_or(0), 0, 0)));
    }
    let ip: Ipv4Addr = address.parse().ok()?;
    Some(SockAddr::from(SocketAddrV4::new(ip, port.unwrap_or(0))))
}

fn init_bytes(buf: &[MaybeUninit<u8>]) -> Vec<u8> {
    buf.iter().map(|b| unsafe { b.assume_init() }).collect()
}

fn parse_storage(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketName> {
    if len == 0 {
        return None;
    }
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketName {
                address: Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)).to_string(),
                port: Some(u16::from_be(sin.sin_port)),
            })
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketName {
                address: Ipv6Addr::from(sin6.sin6_addr.s6_addr).to_string(),
                port: Some(u16::from_be(sin6.sin6_port)),
            })
        }
        libc::AF_UNIX => {
            let sun = unsafe { &*(storage as *const _ as *const libc::sockaddr_un) };
            let path_len = (len as usize)
                .saturating_sub(mem::size_of::<libc::sa_family_t>())
                .min(sun.sun_path.len());
            let bytes: Vec<u8> = sun.sun_path[..path_len]
                .iter()
                .map(|&c| c as u8)
                .take_while(|&c| c != 0)
                .collect();
            Some(SocketName {
                address: String::from_utf8_lossy(&bytes).into_owned(),
                port: None,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unix_pair() -> (Socket, Socket) {
        Socket::create_pair(AddressFamily::Unix, SocketKind::Stream, 0).unwrap()
    }

    /// Accepted/client pair over loopback TCP, the cross-checkable setup
    /// used by most connection tests.
    fn inet_pair() -> (Socket, Socket) {
        let server = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        server
            .set_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, OptionValue::Int(1))
            .unwrap();
        server.bind("127.0.0.1", 0).unwrap();
        server.listen(libc::SOMAXCONN).unwrap();
        let port = server.local_port().unwrap();

        let client = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        client.connect("127.0.0.1", Some(port)).unwrap();

        let accepted = server.accept().unwrap();
        (accepted, client)
    }

    fn bound_udp() -> (Socket, u16) {
        let sock = Socket::create(AddressFamily::Ipv4, SocketKind::Datagram, libc::IPPROTO_UDP).unwrap();
        sock.bind("127.0.0.1", 0).unwrap();
        let port = sock.local_port().unwrap();
        (sock, port)
    }

    #[test]
    fn test_create() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP);
        assert!(socket.is_ok());
    }

    #[test]
    fn test_create_invalid_protocol() {
        let result = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, 9999);
        let err = result.unwrap_err();
        assert!(matches!(err, SocketError::Creation(_)));
        assert_ne!(err.code(), 0);
        assert!(err.message().contains("create"));
    }

    #[test]
    fn test_local_name_before_and_after_bind() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        // Unbound: the OS reports the wildcard address and no port yet.
        assert_eq!(socket.local_address().unwrap(), "0.0.0.0");
        assert_eq!(socket.local_port().unwrap(), 0);

        socket.bind("127.0.0.1", 0).unwrap();
        assert_eq!(socket.local_address().unwrap(), "127.0.0.1");
        assert!(socket.local_port().unwrap() > 0);
    }

    #[test]
    fn test_bind_invalid_address() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        let err = socket.bind("256.256.256.256", 0).unwrap_err();
        assert!(matches!(err, SocketError::Connection(_)));
        assert_eq!(err.code(), 0);
        assert!(err.message().contains("256.256.256.256"));
    }

    #[test]
    fn test_connect_invalid_address() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        let err = socket.connect("256.256.256.256", Some(12345)).unwrap_err();
        assert!(matches!(err, SocketError::Connection(_)));
    }

    #[test]
    fn test_create_listen_and_port_conflict() {
        let listener = Socket::create_listen(0, libc::SOMAXCONN).unwrap();
        let name = listener.sock_name().unwrap();
        assert_eq!(name.address, "0.0.0.0");
        let port = name.port.unwrap();
        assert!(port > 0);

        let err = Socket::create_listen(port, libc::SOMAXCONN).unwrap_err();
        assert!(matches!(err, SocketError::Connection(_)));
    }

    #[test]
    fn test_create_pair_round_trip() {
        let (sock1, sock2) = unix_pair();
        let msg = b"Ping";
        sock1.write(msg).unwrap();
        let received = sock2.read(msg.len(), ReadMode::Binary).unwrap();
        assert_eq!(received, msg);
    }

    #[test]
    fn test_create_pair_invalid_protocol() {
        let err = Socket::create_pair(AddressFamily::Unix, SocketKind::Datagram, 9999).unwrap_err();
        assert!(matches!(err, SocketError::Creation(_)));
    }

    #[test]
    fn test_accept_on_connected_client() {
        let (_accepted, client) = inet_pair();
        let err = client.accept().unwrap_err();
        assert!(matches!(err, SocketError::Connection(_)));
        assert_ne!(err.code(), 0);
    }

    #[test]
    fn test_remote_name_cross_check() {
        let (accepted, client) = inet_pair();
        assert_eq!(accepted.remote_port().unwrap(), client.local_port().unwrap());
        assert_eq!(accepted.remote_address().unwrap(), client.local_address().unwrap());
        assert_eq!(accepted.remote_address().unwrap(), "127.0.0.1");
    }

    #[test]
    fn test_peer_name_not_connected() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        let err = socket.peer_name().unwrap_err();
        assert!(matches!(err, SocketError::General(_)));
    }

    #[test]
    fn test_unix_pair_has_no_port() {
        let (sock1, _sock2) = unix_pair();
        assert_eq!(sock1.sock_name().unwrap().port, None);
        let err = sock1.local_port().unwrap_err();
        assert!(matches!(err, SocketError::InvalidUsage(_)));
    }

    #[test]
    fn test_connect_send_receive() {
        let (accepted, client) = inet_pair();
        let msg = b"Hello";
        client.write(msg).unwrap();
        let received = accepted.read(msg.len(), ReadMode::Binary).unwrap();
        assert_eq!(received, msg);
    }

    #[test]
    fn test_read_line_mode() {
        let (sock1, sock2) = unix_pair();
        sock1.write(b"first\nsecond").unwrap();
        let line = sock2.read(64, ReadMode::Line).unwrap();
        assert_eq!(line, b"first\n");
        let rest = sock2.read(6, ReadMode::Binary).unwrap();
        assert_eq!(rest, b"second");
    }

    #[test]
    fn test_at_mark_boundary() {
        let (accepted, client) = inet_pair();
        assert!(!accepted.at_mark().unwrap());

        client.send(b"Hello", 0).unwrap();
        client.send(b"!", libc::MSG_OOB).unwrap();
        client.send(b"Hello", 0).unwrap();
        // Let all three segments reach the receive queue.
        thread::sleep(Duration::from_millis(50));

        // A normal receive stops at the urgent mark.
        let head = accepted.recv(100, 0).unwrap();
        assert_eq!(head, b"Hello");
        assert!(accepted.at_mark().unwrap());

        let urgent = accepted.recv(100, libc::MSG_OOB).unwrap();
        assert_eq!(urgent, b"!");

        let tail = accepted.recv(100, 0).unwrap();
        assert_eq!(tail, b"Hello");
    }

    #[test]
    fn test_read_timed_complete() {
        let (sock1, sock2) = unix_pair();
        sock1.write(b"Hel").unwrap();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            sock1.write(b"lo").unwrap();
            sock1
        });

        let result = sock2.read_timed(5, Duration::from_secs(1), ReadMode::Binary).unwrap();
        assert!(result.complete);
        assert_eq!(result.data, b"Hello");

        writer.join().unwrap();
    }

    #[test]
    fn test_read_timed_partial_on_timeout() {
        let (sock1, sock2) = unix_pair();
        sock1.write(b"Hel").unwrap();

        let result = sock2
            .read_timed(5, Duration::from_millis(200), ReadMode::Binary)
            .unwrap();
        assert!(!result.complete);
        assert_eq!(result.data, b"Hel");
    }

    #[test]
    fn test_recv_timed_single_cycle() {
        let (sock1, sock2) = unix_pair();

        // Nothing pending: the timeout elapses without attempting the receive.
        let empty = sock2.recv_timed(16, Duration::from_millis(100), 0).unwrap();
        assert!(empty.is_empty());

        sock1.write(b"late").unwrap();
        let data = sock2.recv_timed(16, Duration::from_secs(1), 0).unwrap();
        assert_eq!(data, b"late");
    }

    #[test]
    fn test_send_timed_when_writable() {
        let (sock1, _sock2) = unix_pair();
        let sent = sock1.send_timed(b"now", Duration::from_secs(1), 0).unwrap();
        assert_eq!(sent, 3);
    }

    #[test]
    fn test_shutdown_write_signals_eof() {
        let (sock1, sock2) = unix_pair();
        sock1.shutdown(Shutdown::Write).unwrap();
        let received = sock2.read(16, ReadMode::Binary).unwrap();
        assert!(received.is_empty());

        let err = sock1.write(b"more").unwrap_err();
        assert!(matches!(err, SocketError::Write(_)));
    }

    #[test]
    fn test_nonblocking_read_fails_fast() {
        let (_sock1, sock2) = unix_pair();
        sock2.set_nonblock().unwrap();

        let err = sock2.read(16, ReadMode::Binary).unwrap_err();
        assert!(matches!(err, SocketError::Read(_)));
        assert!(err.code() == libc::EAGAIN || err.code() == libc::EWOULDBLOCK);

        sock2.set_block().unwrap();
    }

    #[test]
    fn test_set_option_linger() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        socket
            .set_option(
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                OptionValue::Linger { on: true, seconds: 1 },
            )
            .unwrap();
    }

    #[test]
    fn test_set_option_invalid_reports_value() {
        let socket = Socket::create(AddressFamily::Ipv4, SocketKind::Stream, libc::IPPROTO_TCP).unwrap();
        let err = socket
            .set_option(-1, -1, OptionValue::Int(7))
            .unwrap_err();
        assert!(matches!(err, SocketError::General(_)));
        assert!(err.message().contains("Int(7)"));
    }

    #[test]
    fn test_from_stream() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = Socket::from_stream(listener);
        assert_eq!(socket.local_port().unwrap(), port);
    }

    #[test]
    fn test_create_by_address_inference() {
        assert_eq!(infer_family("127.0.0.1"), AddressFamily::Ipv4);
        assert_eq!(infer_family("::1"), AddressFamily::Ipv6);
        assert_eq!(infer_family("/tmp/test.sock"), AddressFamily::Unix);
    }

    #[test]
    fn test_udp_send_to_recv_from() {
        let (sender, sender_port) = bound_udp();
        let (receiver, receiver_port) = bound_udp();

        let sent = sender
            .send_to(b"ping", "127.0.0.1", Some(receiver_port), 0)
            .unwrap();
        assert_eq!(sent, 4);

        let received = receiver.recv_from(16, 0).unwrap();
        assert_eq!(received.data, b"ping");
        assert_eq!(received.address, "127.0.0.1");
        assert_eq!(received.port, Some(sender_port));
    }

    #[test]
    fn test_message_scatter_gather() {
        let (sender, sender_port) = bound_udp();
        let (receiver, receiver_port) = bound_udp();

        let out = Message::new()
            .with_segment(&b"Hel"[..])
            .with_segment(&b"lo "[..])
            .with_segment(&b"UDP"[..])
            .to("127.0.0.1", Some(receiver_port));
        let sent = sender.send_msg(&out, 0).unwrap();
        assert_eq!(sent, 9);

        let mut incoming = Message::for_recv(&[3, 6], 0);
        let total = receiver.recv_msg(&mut incoming, 0).unwrap();
        assert_eq!(total, 9);
        assert_eq!(incoming.segments[0], b"Hel");
        assert_eq!(incoming.segments[1], b"lo UDP");
        let from = incoming.address.unwrap();
        assert_eq!(from.address, "127.0.0.1");
        assert_eq!(from.port, Some(sender_port));
    }

    #[test]
    fn test_recv_msg_short_datagram_trims_segments() {
        let (sender, _) = bound_udp();
        let (receiver, receiver_port) = bound_udp();

        sender.send_to(b"hi", "127.0.0.1", Some(receiver_port), 0).unwrap();

        let mut incoming = Message::for_recv(&[4, 4], 0);
        let total = receiver.recv_msg(&mut incoming, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(incoming.segments[0], b"hi");
        assert!(incoming.segments[1].is_empty());
    }

    #[test]
    fn test_descriptor_error_slot() {
        let (sock1, _sock2) = unix_pair();
        sock1.clear_error();
        assert_eq!(sock1.last_error(), 0);
    }
}
