//! Periodic Reporter (§4.5): the shim's one long-lived background thread.
//! Everything else in this crate runs synchronously on the caller's own
//! thread inside an interceptor; this is the sole owned thread, started
//! lazily (§4.3, [`crate::lifecycle`]).

use std::thread;
use std::time::Duration;

use crate::context::Context;
use crate::formatter::format_statsd;
use crate::log;
use crate::metrics::{Metric, MetricKind};
use crate::os;

/// Spawn the reporter loop. Takes `period_seconds` by value rather than
/// re-reading `Config` each tick: the snapshot is released once this thread
/// starts (§4.3), so the loop carries its own copy of the settings it needs.
pub fn spawn(ctx: &'static Context, period_seconds: u64, periodic_net_bytes: bool) {
    thread::Builder::new()
        .name("tapagent-reporter".to_string())
        .spawn(move || run(ctx, period_seconds, periodic_net_bytes))
        .expect("spawning the reporter thread should not fail under normal load");
}

fn run(ctx: &'static Context, period_seconds: u64, periodic_net_bytes: bool) {
    let pid = os::pid();
    loop {
        tick(ctx, pid, periodic_net_bytes);
        thread::sleep(Duration::from_secs(period_seconds.max(1)));
    }
}

fn tick(ctx: &Context, pid: libc::pid_t, periodic_net_bytes: bool) {
    let base = ctx.identity.base_fields();

    match os::cpu_time_micros() {
        Ok(micros) => emit(ctx, "proc.cpu", micros, MetricKind::Current, base.clone()),
        Err(e) => log::report(&e),
    }

    match os::rss_kb() {
        Ok(kb) => emit(ctx, "proc.mem", kb, MetricKind::Current, base.clone()),
        Err(e) => log::report(&e),
    }

    match os::num_threads(pid) {
        Ok(n) => emit(ctx, "proc.thread", n as i64, MetricKind::Current, base.clone()),
        Err(e) => log::report(&e),
    }

    match os::num_fds(pid) {
        Ok(n) => emit(ctx, "proc.fd", n as i64, MetricKind::Current, base.clone()),
        Err(e) => log::report(&e),
    }

    match os::num_child_procs(pid) {
        Ok(n) => emit(ctx, "proc.child", n as i64, MetricKind::Current, base.clone()),
        Err(e) => log::report(&e),
    }

    // Process-level rx/tx totals, with no per-fd labels: only when the
    // config opts into periodic accounting, to avoid double-counting
    // against the per-event net.rx/net.tx already emitted by the
    // interceptors in event-based mode (§4.3 suppression).
    if periodic_net_bytes {
        let rx = ctx.counters.net_rx.get() as i64;
        let tx = ctx.counters.net_tx.get() as i64;
        emit(ctx, "net.rx", rx, MetricKind::Current, base.clone());
        emit(ctx, "net.tx", tx, MetricKind::Current, base);
    }
}

fn emit(
    ctx: &Context,
    name: &'static str,
    value: i64,
    kind: MetricKind,
    fields: Vec<crate::metrics::Field>,
) {
    let metric = Metric::new(name, value, kind).with_fields(fields);
    if let Some(line) = format_statsd(&metric, &ctx.format) {
        if let Err(e) = ctx.output.send(&line) {
            log::report(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TransportConfig, TransportKind};
    use crate::context::Context as TapContext;
    use crate::counters::Counters;
    use crate::fdtable::FdTable;
    use crate::formatter::FormatContext;
    use crate::metrics::ProcessIdentity;
    use crate::output::Output;
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use spin::Mutex;

    fn test_context(destination: String) -> TapContext {
        let cfg = TransportConfig {
            kind: TransportKind::File,
            destination,
        };
        TapContext {
            fds: FdTable::new(),
            counters: Counters::new(),
            identity: ProcessIdentity {
                proc: "testproc".to_string(),
                pid: os::pid(),
                host: "testhost".to_string(),
            },
            output: Output::init(&cfg).unwrap(),
            format: FormatContext::default(),
            config: Mutex::new(None),
            startup_time: AtomicU64::new(0),
            reporter_started: AtomicBool::new(false),
            periodic_net_bytes: true,
            log_data_path: false,
        }
    }

    #[test]
    fn a_single_tick_emits_every_proc_metric() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ctx = test_context(file.path().to_string_lossy().into_owned());
        tick(&ctx, os::pid(), true);
        let contents = std::fs::read_to_string(file.path()).unwrap();
        for name in ["proc.cpu", "proc.mem", "proc.thread", "proc.fd", "proc.child", "net.rx", "net.tx"] {
            assert!(contents.contains(name), "missing {name} in:\n{contents}");
        }
    }

    #[test]
    fn periodic_net_bytes_false_suppresses_net_rx_tx() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ctx = test_context(file.path().to_string_lossy().into_owned());
        tick(&ctx, os::pid(), false);
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(!contents.contains("net.rx"));
        assert!(!contents.contains("net.tx"));
    }
}
