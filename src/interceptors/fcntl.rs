//! `fcntl(fd, F_DUPFD[,_CLOEXEC], …) → nfd` (§4.3).
//!
//! `fcntl` is variadic in libc; Rust's stable FFI has no variadic function
//! pointer type. Every command this crate cares about (`F_DUPFD` and its
//! `_CLOEXEC` sibling) takes exactly one extra `int` argument, and the
//! System V calling convention places it in the same register regardless of
//! how many arguments the real prototype declares, so a fixed three-argument
//! shim is ABI-compatible with the commands we act on and harmless for the
//! ones we don't.

use std::os::raw::c_int;

use crate::context;
use crate::errno_guard::ErrnoGuard;
use crate::resolver::real_fn;

type FcntlFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;

#[no_mangle]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: c_int) -> c_int {
    let Some(real) = real_fn!(fcntl, FcntlFn) else {
        return -1;
    };
    let nfd = real(fd, cmd, arg);
    if nfd >= 0 && matches!(cmd, libc::F_DUPFD | libc::F_DUPFD_CLOEXEC) {
        if let Some(ctx) = context::ctx() {
            if ctx.fds.is_tracked(fd) {
                let _guard = ErrnoGuard::save();
                ctx.fds.adopt_unknown(nfd);
            }
        }
    }
    nfd
}
