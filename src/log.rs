//! The shim's own diagnostic channel — `scopeLog` in the original.
//!
//! Deliberately independent of [`crate::output`]: a congested or unreachable
//! metrics destination must never starve our own error reporting, and
//! writing to our own log file must never re-enter an interceptor (the log
//! sink is opened once, directly against a real `File`, bypassing the
//! libc wrappers this crate shims).

use std::str::FromStr;

use log::LevelFilter;

use crate::config::LogConfig;
use crate::error::ShimError;

/// Wire up `log`/`fern` once, per §10's ambient-stack requirement. Safe to
/// call more than once in a process that `fork()`s and re-execs its own
/// constructor logic; later calls are no-ops if a logger is already set.
pub fn init(cfg: &LogConfig) {
    let level = LevelFilter::from_str(&cfg.level).unwrap_or(LevelFilter::Warn);
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} tapagent] {}",
                unix_timestamp(),
                record.level(),
                message
            ))
        })
        .level(level);

    let dispatch = match fern::log_file(&cfg.path) {
        Ok(file) => dispatch.chain(file),
        Err(_) => dispatch.chain(std::io::stderr()),
    };

    // `apply()` fails if a global logger is already installed (e.g. a second
    // constructor run after `fork()` + re-exec of a statically linked copy);
    // that's fine, the existing logger keeps working.
    let _ = dispatch.apply();
}

/// A dependency-free wall-clock stamp; avoids pulling in a full time-zone
/// database just to prefix log lines inside an injected shim.
fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Record a [`ShimError`] at the severity appropriate to its kind (§10):
/// routine/expected failures (`OsQueryFailed`, `EmitFailed`, `ConfigMissing`)
/// log at `warn`; failures that indicate a broken host environment
/// (`SymbolUnresolved`, `AllocFailed`) log at `error`.
pub fn report(err: &ShimError) {
    match err {
        ShimError::SymbolUnresolved(_) | ShimError::AllocFailed => {
            log::error!("{err}");
        }
        ShimError::OsQueryFailed(_) | ShimError::EmitFailed | ShimError::ConfigMissing(_) => {
            log::warn!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_does_not_panic_for_any_variant() {
        report(&ShimError::SymbolUnresolved("socket"));
        report(&ShimError::AllocFailed);
        report(&ShimError::OsQueryFailed("getsockname"));
        report(&ShimError::EmitFailed);
        report(&ShimError::ConfigMissing("no file".to_string()));
    }
}
