//! `Os` (§6): host OS queries the Periodic Reporter and the constructor need
//! — hostname, process name, and the `/proc`-derived counts the source gets
//! from its own platform-specific `os.c`. Every query here is best-effort:
//! failures are `OsQueryFailed` and the caller just skips that sample.

use std::fs;

use crate::error::{ShimError, ShimResult};

pub fn hostname() -> ShimResult<String> {
    let mut buf = vec![0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return Err(ShimError::OsQueryFailed("gethostname"));
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..nul]).into_owned())
}

/// `Os.procname` — the process's own executable name, read from
/// `/proc/self/comm` (kernel-truncated to 15 bytes, matching `prctl`'s
/// `PR_GET_NAME`/the source's `os_procname`).
pub fn procname() -> ShimResult<String> {
    fs::read_to_string("/proc/self/comm")
        .map(|s| s.trim_end().to_string())
        .map_err(|_| ShimError::OsQueryFailed("procname"))
}

pub fn pid() -> libc::pid_t {
    unsafe { libc::getpid() }
}

/// `Os.num_threads(pid)` — count entries under `/proc/<pid>/task`.
pub fn num_threads(pid: libc::pid_t) -> ShimResult<u64> {
    count_dir_entries(&format!("/proc/{pid}/task"))
}

/// `Os.num_fds(pid)` — count entries under `/proc/<pid>/fd`.
pub fn num_fds(pid: libc::pid_t) -> ShimResult<u64> {
    count_dir_entries(&format!("/proc/{pid}/fd"))
}

/// `Os.num_child_procs(pid)` — count of `/proc/<pid>/task/*/children` PIDs,
/// summed across threads (a process's children are reachable from any of
/// its threads' `children` file under Linux's thread-group accounting).
pub fn num_child_procs(pid: libc::pid_t) -> ShimResult<u64> {
    let task_dir = format!("/proc/{pid}/task");
    let entries = fs::read_dir(&task_dir).map_err(|_| ShimError::OsQueryFailed("num_child_procs"))?;
    let mut total = 0u64;
    for entry in entries.flatten() {
        let children_path = entry.path().join("children");
        if let Ok(text) = fs::read_to_string(children_path) {
            total += text.split_whitespace().count() as u64;
        }
    }
    Ok(total)
}

fn count_dir_entries(path: &str) -> ShimResult<u64> {
    fs::read_dir(path)
        .map(|entries| entries.count() as u64)
        .map_err(|_| ShimError::OsQueryFailed("count_dir_entries"))
}

/// CPU time (user + sys), in microseconds, from `getrusage(RUSAGE_SELF)`.
pub fn cpu_time_micros() -> ShimResult<i64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if ret != 0 {
        return Err(ShimError::OsQueryFailed("getrusage"));
    }
    let user = usage.ru_utime.tv_sec as i64 * 1_000_000 + usage.ru_utime.tv_usec as i64;
    let sys = usage.ru_stime.tv_sec as i64 * 1_000_000 + usage.ru_stime.tv_usec as i64;
    Ok(user + sys)
}

/// Resident set size, in kB, from `getrusage(RUSAGE_SELF).ru_maxrss`
/// (already kB on Linux).
pub fn rss_kb() -> ShimResult<i64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if ret != 0 {
        return Err(ShimError::OsQueryFailed("getrusage"));
    }
    Ok(usage.ru_maxrss)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_nonempty_in_test_process() {
        assert!(!hostname().unwrap().is_empty());
    }

    #[test]
    fn self_pid_has_at_least_one_thread_and_fd() {
        let pid = pid();
        assert!(num_threads(pid).unwrap() >= 1);
        assert!(num_fds(pid).unwrap() >= 1);
    }

    #[test]
    fn cpu_and_rss_queries_succeed() {
        assert!(cpu_time_micros().unwrap() >= 0);
        assert!(rss_kb().unwrap() >= 0);
    }
}
