//! `read`/`write` and `send{,to,msg}`/`recv{,from,msg}` (§4.3).
//!
//! `read`/`write` only produce a semantic event when the fd is already
//! tracked as a network descriptor; otherwise they pass through unobserved,
//! matching the source's behavior of folding file-descriptor I/O and socket
//! I/O through the same two syscalls on POSIX.

use std::os::raw::{c_int, c_void};
use std::os::unix::io::RawFd;

use libc::{iovec, msghdr, sockaddr, socklen_t, size_t, ssize_t};

use crate::context::{self, Context};
use crate::dns::extract_query_name;
use crate::errno_guard::ErrnoGuard;
use crate::fdtable::{Direction, SockKind};
use crate::interceptors::common::{emit_byte_metric, emit_data_event, emit_dns_metric};
use crate::resolver::real_fn;
use crate::sockaddr::SockAddr;

const DNS_PORT: u16 = 53;

type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
type SendtoFn =
    unsafe extern "C" fn(c_int, *const c_void, size_t, c_int, *const sockaddr, socklen_t) -> ssize_t;
type SendmsgFn = unsafe extern "C" fn(c_int, *const msghdr, c_int) -> ssize_t;
type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;
type RecvfromFn =
    unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int, *mut sockaddr, *mut socklen_t) -> ssize_t;
type RecvmsgFn = unsafe extern "C" fn(c_int, *mut msghdr, c_int) -> ssize_t;

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let Some(real) = real_fn!(read, ReadFn) else {
        return -1;
    };
    let n = real(fd, buf, count);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            if ctx.fds.is_tracked(fd) {
                let _guard = ErrnoGuard::save();
                let payload = std::slice::from_raw_parts(buf as *const u8, n as usize);
                on_rx(ctx, fd, n as u64, None, "read", payload);
            }
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    let Some(real) = real_fn!(write, WriteFn) else {
        return -1;
    };
    let n = real(fd, buf, count);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            if ctx.fds.is_tracked(fd) {
                let _guard = ErrnoGuard::save();
                let payload = std::slice::from_raw_parts(buf as *const u8, n as usize);
                on_tx(ctx, fd, n as u64, None, "write", payload);
            }
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn send(fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
    let Some(real) = real_fn!(send, SendFn) else {
        return -1;
    };
    let n = real(fd, buf, len, flags);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let payload = std::slice::from_raw_parts(buf as *const u8, n as usize);
            on_tx(ctx, fd, n as u64, None, "send", payload);
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn sendto(
    fd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
    dest_addr: *const sockaddr,
    addrlen: socklen_t,
) -> ssize_t {
    let Some(real) = real_fn!(sendto, SendtoFn) else {
        return -1;
    };
    let n = real(fd, buf, len, flags, dest_addr, addrlen);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let remote = SockAddr::from_raw(dest_addr, addrlen);
            let payload = std::slice::from_raw_parts(buf as *const u8, n as usize);
            on_tx(ctx, fd, n as u64, remote, "sendto", payload);
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn sendmsg(fd: c_int, msg: *const msghdr, flags: c_int) -> ssize_t {
    let Some(real) = real_fn!(sendmsg, SendmsgFn) else {
        return -1;
    };
    let n = real(fd, msg, flags);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let kind = ctx.fds.kind(fd);
            let remote = if kind != Some(SockKind::Tcp) {
                msg_name_addr(msg)
            } else {
                None
            };
            let payload = msg_payload(msg, n as usize);
            on_tx(ctx, fd, n as u64, remote, "sendmsg", &payload);
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn recv(fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
    let Some(real) = real_fn!(recv, RecvFn) else {
        return -1;
    };
    let n = real(fd, buf, len, flags);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let payload = std::slice::from_raw_parts(buf as *const u8, n as usize);
            on_rx(ctx, fd, n as u64, None, "recv", payload);
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn recvfrom(
    fd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
    src_addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> ssize_t {
    let Some(real) = real_fn!(recvfrom, RecvfromFn) else {
        return -1;
    };
    let n = real(fd, buf, len, flags, src_addr, addrlen);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let remote = if !src_addr.is_null() && !addrlen.is_null() {
                SockAddr::from_raw(src_addr, *addrlen)
            } else {
                None
            };
            let payload = std::slice::from_raw_parts(buf as *const u8, n as usize);
            on_rx(ctx, fd, n as u64, remote, "recvfrom", payload);
        }
    }
    n
}

#[no_mangle]
pub unsafe extern "C" fn recvmsg(fd: c_int, msg: *mut msghdr, flags: c_int) -> ssize_t {
    let Some(real) = real_fn!(recvmsg, RecvmsgFn) else {
        return -1;
    };
    let n = real(fd, msg, flags);
    if n > 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let kind = ctx.fds.kind(fd);
            let remote = if kind == Some(SockKind::Udp) {
                msg_name_addr(msg as *const msghdr)
            } else {
                None
            };
            let payload = msg_payload(msg as *const msghdr, n as usize);
            on_rx(ctx, fd, n as u64, remote, "recvmsg", &payload);
        }
    }
    n
}

/// §4.3 `send{,to,msg}`: bump `net_tx`, adopt/resolve the fd if needed,
/// apply any address carried by the call itself, check the payload for an
/// outbound DNS query, then (§10) emit a data-path event when configured to.
unsafe fn on_tx(ctx: &Context, fd: RawFd, n: u64, remote: Option<SockAddr>, src: &'static str, payload: &[u8]) {
    if !ctx.fds.is_tracked(fd) {
        ctx.fds.adopt_unknown(fd);
    }
    ctx.fds.ensure_addrs(fd);
    if let Some(remote) = remote {
        ctx.fds.set_endpoint(fd, Some(remote), Direction::Remote);
    }

    ctx.counters.net_tx.add(n);
    if let Some(snap) = ctx.fds.snapshot(fd) {
        if !ctx.periodic_net_bytes {
            emit_byte_metric(ctx, "net.tx", n as i64, &snap);
        }
        if snap.remote.port() == Some(DNS_PORT) {
            if let Some(domain) = extract_query_name(payload) {
                ctx.fds.set_dns_name(fd, domain.clone());
                let value = ctx.counters.dns.increment() as i64;
                emit_dns_metric(ctx, value, &domain);
            }
        }
    }
    emit_data_event(ctx, src, payload);
}

/// §4.3 `recv{,from,msg}`: bump `net_rx`, adopt/resolve the fd if needed,
/// apply any address carried by the call, then emit (including, per §10,
/// the data-path event when configured to).
unsafe fn on_rx(ctx: &Context, fd: RawFd, n: u64, remote: Option<SockAddr>, src: &'static str, payload: &[u8]) {
    if !ctx.fds.is_tracked(fd) {
        ctx.fds.adopt_unknown(fd);
    }
    ctx.fds.ensure_addrs(fd);
    if let Some(remote) = remote {
        ctx.fds.set_endpoint(fd, Some(remote), Direction::Remote);
    }

    ctx.counters.net_rx.add(n);
    if !ctx.periodic_net_bytes {
        if let Some(snap) = ctx.fds.snapshot(fd) {
            emit_byte_metric(ctx, "net.rx", n as i64, &snap);
        }
    }
    emit_data_event(ctx, src, payload);
}

unsafe fn msg_name_addr(msg: *const msghdr) -> Option<SockAddr> {
    if msg.is_null() {
        return None;
    }
    let name = (*msg).msg_name as *const c_void;
    let namelen = (*msg).msg_namelen as socklen_t;
    if name.is_null() || namelen == 0 {
        return None;
    }
    crate::sockaddr::from_raw_void(name, namelen)
}

/// Copy up to `n` bytes out of a `msghdr`'s iovec array, stopping at the
/// first gather buffer boundary that would take us past `n` — enough to
/// hand the DNS parser a contiguous view of a single-iovec UDP datagram
/// (the overwhelmingly common case for `sendmsg` on a DNS query).
unsafe fn msg_payload(msg: *const msghdr, n: usize) -> Vec<u8> {
    if msg.is_null() {
        return Vec::new();
    }
    let iov = (*msg).msg_iov;
    let iovlen = (*msg).msg_iovlen as usize;
    if iov.is_null() || iovlen == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n.min(4096));
    for i in 0..iovlen {
        if out.len() >= n {
            break;
        }
        let entry = &*(iov.add(i) as *const iovec);
        let take = entry.iov_len.min(n - out.len());
        let slice = std::slice::from_raw_parts(entry.iov_base as *const u8, take);
        out.extend_from_slice(slice);
    }
    out
}
