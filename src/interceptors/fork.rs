//! `fork()` (§4.3, §5). The parent's return path is a pure no-op; the
//! child resets counters and the reporter-start gate since the kernel does
//! not carry the parent's threads — including the reporter thread, if it
//! was already running — across the call.

use libc::pid_t;

use crate::context;
use crate::errno_guard::ErrnoGuard;
use crate::lifecycle;
use crate::resolver::real_fn;

type ForkFn = unsafe extern "C" fn() -> pid_t;

#[no_mangle]
pub unsafe extern "C" fn fork() -> pid_t {
    let Some(real) = real_fn!(fork, ForkFn) else {
        return -1;
    };
    let pid = real();
    if pid == 0 {
        if let Some(ctx) = context::ctx() {
            let _guard = ErrnoGuard::save();
            lifecycle::handle_fork_child(ctx);
        }
    }
    pid
}
