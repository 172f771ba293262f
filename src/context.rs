//! The single library-owned context object (§9 "Global mutable state"):
//! FD table, counters, config-derived formatting/output settings, and the
//! bookkeeping the deferred thread-start gate needs. Everything else in the
//! crate reaches this through [`ctx()`] rather than threading references
//! through every interceptor call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use spin::Mutex;

use crate::config::Config;
use crate::counters::Counters;
use crate::fdtable::FdTable;
use crate::formatter::FormatContext;
use crate::log;
use crate::metrics::ProcessIdentity;
use crate::output::Output;

pub struct Context {
    pub fds: FdTable,
    pub counters: Counters,
    pub identity: ProcessIdentity,
    pub output: Output,
    pub format: FormatContext,
    pub config: Mutex<Option<Config>>,
    pub startup_time: AtomicU64,
    pub reporter_started: AtomicBool,
    /// Copied out of `Config` at init time rather than read through `config`:
    /// interceptors consult this on every `send`/`recv`, including long
    /// after the snapshot itself has been consumed and released (§5
    /// "Config snapshot: mutated only once... then released").
    pub periodic_net_bytes: bool,
    /// Same reasoning as `periodic_net_bytes`: gates the JSON data-path
    /// event emitted from every `read`/`write`/`send{,to,msg}`/`recv{,from,msg}`
    /// call, and is checked long after the `Config` snapshot is gone.
    pub log_data_path: bool,
}

static CONTEXT: OnceCell<Context> = OnceCell::new();

/// Build the context from a freshly-read config. Called once from the
/// constructor (§4.6); never reachable from an interceptor directly.
pub fn init(config: Config, identity: ProcessIdentity) {
    let format = FormatContext {
        prefix: config.statsd_prefix.clone(),
        max_len: Some(config.statsd_max_len),
        field_filter: config
            .statsd_field_filter
            .as_deref()
            .and_then(|pat| regex::Regex::new(pat).ok()),
        custom_tags: Vec::new(),
    };

    let output = match Output::init(&config.transport) {
        Ok(out) => out,
        Err(e) => {
            log::report(&e);
            // A sink that silently drops everything: the shim stays
            // transparent even when its own transport can't be built.
            Output::init(&crate::config::TransportConfig {
                kind: crate::config::TransportKind::File,
                destination: "/dev/null".to_string(),
            })
            .expect("/dev/null always opens")
        }
    };

    let periodic_net_bytes = config.periodic_net_bytes;
    let log_data_path = config.log_data_path;
    let ctx = Context {
        fds: FdTable::new(),
        counters: Counters::new(),
        identity,
        output,
        format,
        startup_time: AtomicU64::new(now_secs()),
        reporter_started: AtomicBool::new(false),
        periodic_net_bytes,
        log_data_path,
        config: Mutex::new(Some(config)),
    };

    // `init` runs at most once per process image; a second call (there
    // isn't one in normal operation) would be a logic error, not something
    // to recover from silently.
    let _ = CONTEXT.set(ctx);
}

pub fn ctx() -> Option<&'static Context> {
    CONTEXT.get()
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Context {
    /// `now - startup_time >= delay_start` (§4.3 "Deferred thread start").
    pub fn delay_start_elapsed(&self, delay_start_seconds: u64) -> bool {
        now_secs().saturating_sub(self.startup_time.load(Ordering::Relaxed)) >= delay_start_seconds
    }

    /// `fork()` in the child (§5 "Fork"): counters reset, time-base reset,
    /// reporter-started flag cleared so the next `close` can lazily restart
    /// it in the child's own address space.
    pub fn reset_for_child(&self) {
        self.counters.reset_all();
        self.startup_time.store(now_secs(), Ordering::Relaxed);
        self.reporter_started.store(false, Ordering::Relaxed);
    }
}
