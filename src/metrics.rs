//! Metric Builder (§4.4): typed metric/event records handed to
//! `Formatter` → `Output`.

use std::os::unix::io::RawFd;

/// How a numeric value should be interpreted by the formatter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// Instantaneous value (StatsD gauge, `g`).
    Current,
    /// Change since last emission (StatsD counter, `c`).
    Delta,
    /// Timing delta in milliseconds (StatsD timer, `ms`).
    DeltaMs,
    /// StatsD histogram (`h`).
    Histogram,
    /// StatsD set membership (`s`).
    Set,
}

impl MetricKind {
    pub fn statsd_suffix(self) -> &'static str {
        match self {
            MetricKind::Current => "g",
            MetricKind::Delta => "c",
            MetricKind::DeltaMs => "ms",
            MetricKind::Histogram => "h",
            MetricKind::Set => "s",
        }
    }
}

/// A single labeled `name: value` pair, rendered as `name:value` in the
/// StatsD tag section (and filterable by name via the configured regex).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub value: String,
}

impl Field {
    pub fn new(name: &'static str, value: impl Into<String>) -> Field {
        Field {
            name,
            value: value.into(),
        }
    }
}

/// One metric/event ready for `Formatter::format`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metric {
    pub name: &'static str,
    pub value: i64,
    pub kind: MetricKind,
    pub fields: Vec<Field>,
}

impl Metric {
    pub fn new(name: &'static str, value: i64, kind: MetricKind) -> Metric {
        Metric {
            name,
            value,
            kind,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Metric {
        self.fields = fields;
        self
    }
}

/// Labels common to every record (§4.4: `proc, pid, host` on every record).
#[derive(Clone, Debug)]
pub struct ProcessIdentity {
    pub proc: String,
    pub pid: libc::pid_t,
    pub host: String,
}

impl ProcessIdentity {
    pub fn base_fields(&self) -> Vec<Field> {
        vec![
            Field::new("proc", self.proc.clone()),
            Field::new("pid", self.pid.to_string()),
            Field::new("host", self.host.clone()),
        ]
    }
}

/// Port/connection event fields: `fd, proto, port`.
pub fn conn_fields(fd: RawFd, proto: &'static str, port: u16) -> Vec<Field> {
    vec![
        Field::new("fd", fd.to_string()),
        Field::new("proto", proto),
        Field::new("port", port.to_string()),
    ]
}

/// Byte-event fields: `localip, localp, remoteip, remotep, data`.
/// `ssl` is inferred purely from port 443 on either end; Unix sockets emit
/// blank addresses.
pub fn byte_fields(
    local_ip: &str,
    local_port: Option<u16>,
    remote_ip: &str,
    remote_port: Option<u16>,
) -> Vec<Field> {
    let is_ssl = local_port == Some(443) || remote_port == Some(443);
    vec![
        Field::new("localip", local_ip),
        Field::new("localp", local_port.map(|p| p.to_string()).unwrap_or_default()),
        Field::new("remoteip", remote_ip),
        Field::new(
            "remotep",
            remote_port.map(|p| p.to_string()).unwrap_or_default(),
        ),
        Field::new("data", if is_ssl { "ssl" } else { "clear" }),
    ]
}

pub fn dns_fields(domain: &str) -> Vec<Field> {
    vec![Field::new("domain", domain)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_fields_flags_ssl_on_443() {
        let f = byte_fields("10.0.0.1", Some(5000), "93.184.216.34", Some(443));
        assert!(f.iter().any(|field| field.name == "data" && field.value == "ssl"));
    }

    #[test]
    fn byte_fields_defaults_to_clear() {
        let f = byte_fields("10.0.0.1", Some(5000), "93.184.216.34", Some(80));
        assert!(f.iter().any(|field| field.name == "data" && field.value == "clear"));
    }
}
