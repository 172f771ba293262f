//! Symbol Resolver (§4.1): locate the next-in-chain address of every
//! intercepted libc symbol at load time, via `dlsym(RTLD_NEXT, name)`.
//!
//! The resolver never calls the real symbol; it only records pointers. Every
//! interceptor checks its slot before use and falls back to "symbol
//! unresolved" (§7 `SymbolUnresolved`: return `-1`, leave `errno` alone)
//! rather than dereferencing a null function pointer.

use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_void as raw_void};
use std::sync::atomic::{AtomicPtr, Ordering};

macro_rules! real_symbols {
    ($($field:ident : $name:literal),+ $(,)?) => {
        pub struct RealSymbols {
            $(pub $field: AtomicPtr<raw_void>,)+
        }

        impl RealSymbols {
            const fn empty() -> RealSymbols {
                RealSymbols {
                    $($field: AtomicPtr::new(std::ptr::null_mut()),)+
                }
            }

            /// Resolve every slot via `dlsym(RTLD_NEXT, ..)`. Idempotent:
            /// safe to call again (e.g. after `fork()`'s `exec`-less child
            /// path, where the dynamic linker's state is inherited as-is
            /// and re-resolving is simply a cheap no-op lookup).
            fn resolve_all(&self) {
                $(
                    self.$field.store(resolve_one($name), Ordering::Release);
                )+
            }
        }
    };
}

real_symbols! {
    close: "close",
    read: "read",
    write: "write",
    fcntl: "fcntl",
    socket: "socket",
    bind: "bind",
    listen: "listen",
    accept: "accept",
    accept4: "accept4",
    connect: "connect",
    shutdown: "shutdown",
    send: "send",
    sendto: "sendto",
    sendmsg: "sendmsg",
    recv: "recv",
    recvfrom: "recvfrom",
    recvmsg: "recvmsg",
    fork: "fork",
}

fn resolve_one(name: &'static str) -> *mut raw_void {
    let cname = CString::new(name).expect("symbol name has no interior NUL");
    let ptr = unsafe { libc::dlsym(libc::RTLD_NEXT, cname.as_ptr() as *const c_char) };
    ptr as *mut raw_void
}

static REAL: RealSymbols = RealSymbols::empty();

/// Populate the table. Called once from the constructor (§4.6 step 2).
pub fn resolve() {
    REAL.resolve_all();
}

/// Fetch a resolved slot, already cast to its libc function-pointer type.
/// Every interceptor calls this immediately before invoking the real
/// symbol, so a null pointer here never gets called through.
macro_rules! real_fn {
    ($field:ident, $ty:ty) => {{
        let ptr = REAL.$field.load(std::sync::atomic::Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: non-null only after a successful `dlsym` for a
            // symbol whose libc signature matches `$ty` by construction
            // (each call site names the exact libc prototype it shims).
            Some(unsafe { std::mem::transmute::<*mut c_void, $ty>(ptr) })
        }
    }};
}

pub(crate) use real_fn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_finds_real_close_in_test_process() {
        resolve();
        let ptr = REAL.close.load(Ordering::Acquire);
        assert!(!ptr.is_null());
    }
}
