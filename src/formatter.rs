//! Formatter: renders a [`Metric`] as a StatsD line, and a raw log line as a
//! JSON event-message. Both shapes are exercised literally in §8 against the
//! `format.c`/`formattest.c` test corpus this crate reproduces in
//! `#[cfg(test)]`.

use regex::Regex;
use serde::Serialize;

use crate::metrics::Metric;

/// Settings that shape rendering: these come from [`crate::config::Config`]
/// but are split out so the formatter has no dependency on config parsing.
#[derive(Clone, Debug)]
pub struct FormatContext {
    pub prefix: String,
    pub max_len: Option<usize>,
    pub field_filter: Option<Regex>,
    pub custom_tags: Vec<(String, String)>,
}

impl Default for FormatContext {
    fn default() -> Self {
        FormatContext {
            prefix: String::new(),
            max_len: Some(512),
            field_filter: None,
            custom_tags: Vec::new(),
        }
    }
}

/// Render `metric` as a StatsD line (`name:value|type[|#tag:val,...]\n`).
///
/// Returns `None` when even the bare `name:value|type` core exceeds
/// `max_len` — there is nothing left to drop. Otherwise, tags are dropped
/// from the end (trailing fields first) until the line fits; the name,
/// value, and type suffix are never touched (§8 invariant 6).
pub fn format_statsd(metric: &Metric, ctx: &FormatContext) -> Option<String> {
    let core = format!(
        "{}{}:{}|{}",
        ctx.prefix,
        metric.name,
        metric.value,
        metric.kind.statsd_suffix()
    );

    let mut tags: Vec<String> = metric
        .fields
        .iter()
        .map(|f| (f.name.to_string(), f.value.clone()))
        .chain(ctx.custom_tags.iter().cloned())
        .filter(|(name, _)| {
            ctx.field_filter
                .as_ref()
                .map(|re| re.is_match(name))
                .unwrap_or(true)
        })
        .map(|(name, value)| format!("{name}:{value}"))
        .collect();

    let max_len = ctx.max_len.unwrap_or(usize::MAX);
    loop {
        let line = render_line(&core, &tags);
        if line.len() <= max_len {
            return Some(line);
        }
        if tags.is_empty() {
            return None;
        }
        tags.pop();
    }
}

fn render_line(core: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        format!("{core}\n")
    } else {
        format!("{core}|#{}\n", tags.join(","))
    }
}

/// A structured event record (distinct from a numeric metric): used for the
/// shim's own diagnostic/data-path log lines, not the per-call network
/// metrics. Mirrors the `formattest.c` JSON scenario in §8.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub src: &'static str,
    pub host: String,
    pub proc: String,
    pub cmd: String,
    pub data: Option<Vec<u8>>,
    /// `Some(n)` for an explicit length, `None` to treat `data` as
    /// NUL-terminated (the source's `datasize == 0` convention).
    pub datasize: Option<usize>,
    pub ts: f64,
}

#[derive(Serialize)]
struct JsonEvent {
    ty: &'static str,
    id: String,
    #[serde(rename = "_time")]
    time: f64,
    source: &'static str,
    #[serde(rename = "_raw")]
    raw: String,
    host: String,
    #[serde(rename = "_channel")]
    channel: String,
}

/// Render an [`EventMessage`] as the JSON line the source emits for
/// non-metric events (stdin/stdout/stderr capture, file writes it has been
/// configured to watch, etc).
pub fn format_json_event(msg: &EventMessage) -> String {
    let raw = match &msg.data {
        None => String::new(),
        Some(bytes) => {
            let slice = match msg.datasize {
                Some(0) | None => {
                    let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                    &bytes[..nul]
                }
                Some(n) => &bytes[..n.min(bytes.len())],
            };
            escape_embedded_nuls(slice)
        }
    };

    let channel = channel_id(&msg.host, &msg.proc, &msg.cmd, msg.ts);

    let event = JsonEvent {
        ty: "ev",
        id: format!("{}-{}-{}", msg.host, msg.proc, msg.cmd),
        time: msg.ts,
        source: msg.src,
        raw,
        host: msg.host.clone(),
        channel,
    };
    serde_json::to_string(&event).expect("JsonEvent always serializes")
}

/// Decode as UTF-8 (lossy), escaping any interior NUL byte to the two
/// characters ` ` so the rendered JSON string stays one line and a
/// NUL can't truncate a downstream consumer that treats it as a terminator.
fn escape_embedded_nuls(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.replace('\0', "\\u0000")
}

/// The source derives a channel id deterministically from the event's
/// identity so related events can be correlated downstream without a
/// shared sequence counter. We reproduce it as a stable hash of
/// `host/proc/cmd`, rendered as a decimal string.
fn channel_id(host: &str, proc: &str, cmd: &str, _ts: f64) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    host.hash(&mut hasher);
    proc.hash(&mut hasher);
    cmd.hash(&mut hasher);
    hasher.finish().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Field, MetricKind};

    #[test]
    fn plain_gauge_with_no_fields() {
        let m = Metric::new("useful.apps", 1, MetricKind::Current);
        let ctx = FormatContext::default();
        assert_eq!(format_statsd(&m, &ctx).unwrap(), "useful.apps:1|g\n");
    }

    #[test]
    fn net_port_with_all_fields() {
        let m = Metric::new("net.port", 2, MetricKind::Current).with_fields(vec![
            Field::new("proc", "testapp"),
            Field::new("pid", "666"),
            Field::new("fd", "3"),
            Field::new("host", "myhost"),
            Field::new("proto", "TCP"),
            Field::new("port", "8125"),
        ]);
        let ctx = FormatContext::default();
        assert_eq!(
            format_statsd(&m, &ctx).unwrap(),
            "net.port:2|g|#proc:testapp,pid:666,fd:3,host:myhost,proto:TCP,port:8125\n"
        );
    }

    #[test]
    fn field_filter_keeps_only_matching_names() {
        let m = Metric::new("net.port", 2, MetricKind::Current).with_fields(vec![
            Field::new("proc", "testapp"),
            Field::new("pid", "666"),
            Field::new("fd", "3"),
            Field::new("host", "myhost"),
            Field::new("proto", "TCP"),
            Field::new("port", "8125"),
        ]);
        let mut ctx = FormatContext::default();
        ctx.field_filter = Some(Regex::new("^[p]").unwrap());
        assert_eq!(
            format_statsd(&m, &ctx).unwrap(),
            "net.port:2|g|#proc:testapp,pid:666,proto:TCP,port:8125\n"
        );
    }

    #[test]
    fn truncation_drops_trailing_fields_only() {
        let m = Metric::new("A", -1234567890123456789, MetricKind::DeltaMs);
        let mut ctx = FormatContext::default();
        ctx.prefix = "98".to_string();
        ctx.max_len = Some(28);
        let out = format_statsd(&m, &ctx).unwrap();
        assert_eq!(out, "98A:-1234567890123456789|ms\n");
        assert_eq!(out.len(), 28);
    }

    #[test]
    fn core_line_over_max_len_yields_none() {
        let m = Metric::new("AB", -1234567890123456789, MetricKind::DeltaMs);
        let mut ctx = FormatContext::default();
        ctx.prefix = "98".to_string();
        ctx.max_len = Some(28);
        assert_eq!(format_statsd(&m, &ctx), None);
    }

    #[test]
    fn every_metric_kind_suffix() {
        let ctx = FormatContext::default();
        let cases = [
            (MetricKind::Delta, "c"),
            (MetricKind::Current, "g"),
            (MetricKind::DeltaMs, "ms"),
            (MetricKind::Histogram, "h"),
            (MetricKind::Set, "s"),
        ];
        for (kind, suffix) in cases {
            let m = Metric::new("A", 1, kind);
            assert_eq!(format_statsd(&m, &ctx).unwrap(), format!("A:1|{suffix}\n"));
        }
    }

    #[test]
    fn custom_tags_render_without_fields() {
        let m = Metric::new("statsd.metric", 3, MetricKind::Current);
        let mut ctx = FormatContext::default();
        ctx.custom_tags = vec![
            ("name1".to_string(), "value1".to_string()),
            ("name2".to_string(), "value2".to_string()),
        ];
        assert_eq!(
            format_statsd(&m, &ctx).unwrap(),
            "statsd.metric:3|g|#name1:value1,name2:value2\n"
        );
    }

    #[test]
    fn json_event_matches_corpus_scenario() {
        let msg = EventMessage {
            src: "stdin",
            host: "earl".to_string(),
            proc: "formattest".to_string(),
            cmd: "cmd".to_string(),
            data: Some("поспехаў".as_bytes().to_vec()),
            datasize: Some(0),
            ts: 1573058085.991,
        };
        let rendered = format_json_event(&msg);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["ty"], "ev");
        assert_eq!(value["id"], "earl-formattest-cmd");
        assert_eq!(value["_time"], 1573058085.991);
        assert_eq!(value["source"], "stdin");
        assert_eq!(value["_raw"], "поспехаў");
        assert_eq!(value["host"], "earl");
        assert!(value["_channel"].is_string());
    }

    #[test]
    fn null_data_yields_empty_raw() {
        let msg = EventMessage {
            src: "stdin",
            host: "earl".to_string(),
            proc: "formattest".to_string(),
            cmd: "cmd".to_string(),
            data: None,
            datasize: None,
            ts: 0.0,
        };
        let rendered = format_json_event(&msg);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["_raw"], "");
    }

    #[test]
    fn embedded_nul_is_escaped() {
        let msg = EventMessage {
            src: "stdin",
            host: "earl".to_string(),
            proc: "formattest".to_string(),
            cmd: "cmd".to_string(),
            data: Some(b"abc\0def".to_vec()),
            datasize: Some(7),
            ts: 0.0,
        };
        let rendered = format_json_event(&msg);
        assert!(rendered.contains("abc\\u0000def"));
    }
}
