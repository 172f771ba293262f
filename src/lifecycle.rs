//! Startup, the deferred thread-start gate, and `fork()` handling (§4.3, §4.6,
//! §5). Library-load-time initialization runs exactly once, via the `ctor`
//! crate's constructor attribute rather than an exported `_init` symbol: the
//! source relies on a GCC/clang `__attribute__((constructor))`, and `ctor`
//! is that pattern's idiomatic Rust equivalent.

use std::sync::atomic::Ordering;

use ctor::ctor;

use crate::config::Config;
use crate::context::{self, Context};
use crate::log;
use crate::metrics::ProcessIdentity;
use crate::os;
use crate::reporter;
use crate::resolver;

/// Runs once, before `main`, in every process that loads this shared object.
#[ctor]
fn constructor() {
    resolver::resolve();

    let path = Config::path(crate::config::CFG_FILE_NAME);
    let (config, config_err) = Config::read(&path);

    log::init(&config.log);
    if let Some(err) = config_err {
        log::report(&err);
    }

    let identity = build_identity();
    context::init(config, identity);
}

fn build_identity() -> ProcessIdentity {
    let proc = os::procname().unwrap_or_else(|e| {
        log::report(&e);
        "unknown".to_string()
    });
    let host = os::hostname().unwrap_or_else(|e| {
        log::report(&e);
        "unknown".to_string()
    });
    ProcessIdentity {
        proc,
        pid: os::pid(),
        host,
    }
}

/// Called from the `close` interceptor (§4.3 "Deferred thread start"): on
/// the first `close` after `DELAY_START` seconds have elapsed since load,
/// spawn the reporter and release the config snapshot. A no-op on every
/// call before that, and idempotent afterwards.
pub fn maybe_start_reporter(ctx: &'static Context) {
    if ctx.reporter_started.load(Ordering::Acquire) {
        return;
    }

    let delay_start_seconds = ctx
        .config
        .lock()
        .as_ref()
        .map(|c| c.delay_start_seconds)
        .unwrap_or(5);

    if !ctx.delay_start_elapsed(delay_start_seconds) {
        return;
    }

    // Only one caller wins the race to actually spawn; everyone else
    // observes `true` and returns above on their next call.
    if ctx
        .reporter_started
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let taken = ctx.config.lock().take();
    let (period_seconds, periodic_net_bytes) = taken
        .map(|c| (c.period_seconds, c.periodic_net_bytes))
        .unwrap_or((10, true));

    reporter::spawn(ctx, period_seconds, periodic_net_bytes);
}

/// Called from the `fork` interceptor's child branch (§5 "Fork"): counters
/// reset, startup clock rebased, and the reporter-started flag cleared so
/// the child's first post-fork `close` can lazily restart its own copy of
/// the thread (the parent's reporter thread does not survive `fork`, since
/// `fork` only duplicates the calling thread).
pub fn handle_fork_child(ctx: &Context) {
    ctx.reset_for_child();
}
