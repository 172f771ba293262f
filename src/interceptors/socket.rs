//! `socket`/`bind`/`listen`/`accept{,4}`/`connect` (§4.3).

use std::os::raw::c_int;
use std::os::unix::io::RawFd;

use libc::{sockaddr, socklen_t};

use crate::context;
use crate::errno_guard::ErrnoGuard;
use crate::fdtable::{Direction, SockKind};
use crate::interceptors::common::{emit_conn_metric, local_port, proto_str};
use crate::metrics::MetricKind;
use crate::resolver::real_fn;
use crate::sockaddr::SockAddr;

type SocketFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
type BindFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
type ListenFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type AcceptFn = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int;
type Accept4Fn = unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t, c_int) -> c_int;
type ConnectFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;

#[no_mangle]
pub unsafe extern "C" fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    let Some(real) = real_fn!(socket, SocketFn) else {
        return -1;
    };
    let fd = real(domain, ty, protocol);
    if fd >= 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let kind = SockKind::from_socket_type(domain, ty);
            ctx.fds.add(fd, kind, &ctx.counters);

            let masked_type = ty & !(libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC);
            let is_udp_inet = matches!(domain, libc::AF_INET | libc::AF_INET6)
                && masked_type == libc::SOCK_DGRAM;
            if is_udp_inet {
                ctx.fds.mark_listen(fd, true);
                let value = ctx.counters.open_ports.increment() as i64;
                let port = local_port(ctx, fd);
                emit_conn_metric(ctx, "net.port", value, MetricKind::Current, fd, "UDP", port);
            }
        }
    }
    fd
}

#[no_mangle]
pub unsafe extern "C" fn bind(fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
    let Some(real) = real_fn!(bind, BindFn) else {
        return -1;
    };
    let rc = real(fd, addr, len);
    if rc == 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            let parsed = SockAddr::from_raw(addr, len);
            ctx.fds.set_endpoint(fd, parsed, Direction::Local);
        }
    }
    rc
}

#[no_mangle]
pub unsafe extern "C" fn listen(fd: c_int, backlog: c_int) -> c_int {
    let Some(real) = real_fn!(listen, ListenFn) else {
        return -1;
    };
    let rc = real(fd, backlog);
    if rc == 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            ctx.fds.mark_listen(fd, true);
            let kind = ctx.fds.kind(fd).unwrap_or(SockKind::Other);
            let value = ctx.counters.open_ports.increment() as i64;
            let port = local_port(ctx, fd);
            emit_conn_metric(ctx, "net.port", value, MetricKind::Current, fd, proto_str(kind), port);
            if kind == SockKind::Tcp {
                ctx.fds.mark_accept(fd, true);
                let value = ctx.counters.tcp_connections.increment() as i64;
                emit_conn_metric(ctx, "net.tcp", value, MetricKind::Current, fd, "TCP", port);
            }
        }
    }
    rc
}

#[no_mangle]
pub unsafe extern "C" fn accept(fd: c_int, addr: *mut sockaddr, len: *mut socklen_t) -> c_int {
    let Some(real) = real_fn!(accept, AcceptFn) else {
        return -1;
    };
    let sd = real(fd, addr, len);
    if sd >= 0 && !addr.is_null() && !len.is_null() {
        on_accept(sd, addr, len);
    }
    sd
}

#[no_mangle]
pub unsafe extern "C" fn accept4(
    fd: c_int,
    addr: *mut sockaddr,
    len: *mut socklen_t,
    flags: c_int,
) -> c_int {
    let Some(real) = real_fn!(accept4, Accept4Fn) else {
        return -1;
    };
    let sd = real(fd, addr, len, flags);
    if sd >= 0 && !addr.is_null() && !len.is_null() {
        on_accept(sd, addr, len);
    }
    sd
}

/// §4.3 "`accept{,4}(fd,…) → sd`": "on success with non-null addr" — a caller
/// that declines the peer address (`accept(fd, NULL, NULL)`, which POSIX
/// explicitly allows) gets no tracking and no counter/metric activity at all,
/// matching the source's `doAccept`, which only runs when `addr && addrlen`.
unsafe fn on_accept(sd: RawFd, addr: *mut sockaddr, len: *mut socklen_t) {
    let Some(ctx) = context::ctx() else { return };
    let _guard = ErrnoGuard::save();

    ctx.fds.add(sd, SockKind::Tcp, &ctx.counters);
    ctx.fds.mark_listen(sd, true);
    ctx.fds.mark_accept(sd, true);
    ctx.fds.mark_active(sd, true);

    if let Some(remote) = SockAddr::from_raw(addr, *len) {
        ctx.fds.set_endpoint(sd, Some(remote), Direction::Remote);
    }
    let port = local_port(ctx, sd);

    let open_ports = ctx.counters.open_ports.increment() as i64;
    let tcp_connections = ctx.counters.tcp_connections.increment() as i64;
    let active_connections = ctx.counters.active_connections.increment() as i64;
    emit_conn_metric(ctx, "net.port", open_ports, MetricKind::Current, sd, "TCP", port);
    emit_conn_metric(ctx, "net.tcp", tcp_connections, MetricKind::Current, sd, "TCP", port);
    emit_conn_metric(
        ctx,
        "net.conn",
        active_connections,
        MetricKind::Current,
        sd,
        "TCP",
        port,
    );
}

#[no_mangle]
pub unsafe extern "C" fn connect(fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
    let Some(real) = real_fn!(connect, ConnectFn) else {
        return -1;
    };
    let rc = real(fd, addr, len);
    if rc == 0 {
        if let Some(ctx) = context::ctx() {
            if ctx.fds.is_tracked(fd) {
                let _guard = ErrnoGuard::save();
                if let Some(remote) = SockAddr::from_raw(addr, len) {
                    ctx.fds.set_endpoint(fd, Some(remote), Direction::Remote);
                }
                ctx.fds.mark_accept(fd, true);
                ctx.fds.mark_active(fd, true);
                let kind = ctx.fds.kind(fd).unwrap_or(SockKind::Other);
                let port = local_port(ctx, fd);

                let active_connections = ctx.counters.active_connections.increment() as i64;
                emit_conn_metric(
                    ctx,
                    "net.conn",
                    active_connections,
                    MetricKind::Current,
                    fd,
                    proto_str(kind),
                    port,
                );
                if kind == SockKind::Tcp {
                    let tcp_connections = ctx.counters.tcp_connections.increment() as i64;
                    emit_conn_metric(
                        ctx,
                        "net.tcp",
                        tcp_connections,
                        MetricKind::Current,
                        fd,
                        "TCP",
                        port,
                    );
                }
            }
        }
    }
    rc
}
