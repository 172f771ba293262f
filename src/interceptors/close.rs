//! `close`/`shutdown` (§4.3) plus the platform-specific names the dynamic
//! linker may resolve instead of plain `close` on some libcs (§6): they
//! share this module's teardown logic but only resolve to a real symbol on
//! their native OS, per the resolver's per-slot null check.

use std::os::raw::c_int;

use crate::context::{self, Context};
use crate::errno_guard::ErrnoGuard;
use crate::interceptors::common::{emit_conn_metric, proto_str};
use crate::lifecycle;
use crate::metrics::MetricKind;
use crate::resolver::real_fn;

type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type ShutdownFn = unsafe extern "C" fn(c_int, c_int) -> c_int;

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    let Some(real) = real_fn!(close, CloseFn) else {
        return -1;
    };
    let rc = real(fd);
    if rc == 0 {
        on_closed(fd);
    }
    maybe_start_reporter();
    rc
}

#[no_mangle]
pub unsafe extern "C" fn shutdown(fd: c_int, how: c_int) -> c_int {
    let Some(real) = real_fn!(shutdown, ShutdownFn) else {
        return -1;
    };
    let rc = real(fd, how);
    if rc == 0 {
        on_closed(fd);
    }
    rc
}

/// §4.3 "if tracked... `close`/`shutdown`": unwind whatever counters this
/// fd was contributing to, then drop the slot.
unsafe fn on_closed(fd: c_int) {
    let Some(ctx) = context::ctx() else { return };
    let _guard = ErrnoGuard::save();
    let Some(snap) = ctx.fds.remove(fd) else {
        return;
    };

    let proto = proto_str(snap.kind);
    // The fd is already closed by the time we get here, so this is the last
    // local address the table captured, not a fresh `getsockname` (§4.3,
    // matching the source's `GET_PORT` read of its own `netinfo` table
    // rather than re-querying the kernel at close time).
    let port = snap.local.port().unwrap_or(0);
    if snap.listen {
        let value = ctx.counters.open_ports.decrement() as i64;
        emit_conn_metric(ctx, "net.port", value, MetricKind::Current, fd, proto, port);
    }
    if snap.accept {
        let value = ctx.counters.tcp_connections.decrement() as i64;
        emit_conn_metric(ctx, "net.tcp", value, MetricKind::Current, fd, proto, port);
    }
    // `active` is set only by `accept`/`connect`, never by `listen` alone,
    // so a bare listening socket's close doesn't spuriously decrement
    // active_connections (see the `Slot::active` doc comment).
    if snap.active {
        let value = ctx.counters.active_connections.decrement() as i64;
        emit_conn_metric(ctx, "net.conn", value, MetricKind::Current, fd, proto, port);
    }
}

fn maybe_start_reporter() {
    if let Some(ctx) = context_static() {
        lifecycle::maybe_start_reporter(ctx);
    }
}

/// The reporter gate needs a `&'static Context`: `context::ctx()` already
/// hands one back (the context lives for the life of the process), so this
/// is just a convenience rename for readability at the call site.
fn context_static() -> Option<&'static Context> {
    context::ctx()
}

/// macOS libsystem exports several names that resolve to `close` depending
/// on cancellation-point semantics. Intercepting them keeps the shim's
/// counters correct on a host that calls these directly instead of the
/// plain `close` the dynamic linker would otherwise route through. On
/// Linux, the resolver never finds a real symbol for these and every call
/// here degrades to the resolver's standard "symbol unresolved" path.
#[no_mangle]
pub unsafe extern "C" fn close_nocancel(fd: c_int) -> c_int {
    close(fd)
}

#[cfg(target_os = "macos")]
#[no_mangle]
#[export_name = "close$NOCANCEL"]
pub unsafe extern "C" fn close_dollar_nocancel(fd: c_int) -> c_int {
    close(fd)
}

#[no_mangle]
pub unsafe extern "C" fn guarded_close_np(fd: c_int, guard: *const libc::c_void) -> c_int {
    let _ = guard;
    close(fd)
}

#[cfg(target_os = "macos")]
#[no_mangle]
#[export_name = "accept$NOCANCEL"]
pub unsafe extern "C" fn accept_dollar_nocancel(
    fd: c_int,
    addr: *mut libc::sockaddr,
    len: *mut libc::socklen_t,
) -> c_int {
    crate::interceptors::socket::accept(fd, addr, len)
}
