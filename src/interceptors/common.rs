//! Shared helpers for the interceptor entry points (§4.3, §4.4): label
//! construction and emission. Kept out of `metrics`/`formatter` because
//! these helpers know about the FD table and `Context`, which those two
//! modules deliberately do not depend on.

use std::os::unix::io::RawFd;

use crate::context::{self, Context};
use crate::fdtable::{FdSnapshot, SockKind};
use crate::formatter::{format_json_event, format_statsd, EventMessage};
use crate::log;
use crate::metrics::{byte_fields, conn_fields, dns_fields, Metric, MetricKind};
use crate::sockaddr::SockAddr;

pub fn proto_str(kind: SockKind) -> &'static str {
    match kind {
        SockKind::Tcp => "TCP",
        SockKind::Udp => "UDP",
        SockKind::Unix => "UNIX",
        SockKind::Raw => "RAW",
        SockKind::Rdm => "RDM",
        SockKind::SeqPacket => "SEQPACKET",
        SockKind::Other => "OTHER",
    }
}

/// The local port to stamp on every port/connection event (§4.4's `port`
/// field), resolved the way the source's `GET_PORT(fd, family, LOCAL)` does:
/// always the bound *local* address, never the peer's, for `net.port`,
/// `net.tcp`, and `net.conn` alike.
pub fn local_port(ctx: &Context, fd: RawFd) -> u16 {
    ctx.fds.ensure_addrs(fd);
    ctx.fds
        .snapshot(fd)
        .and_then(|s| s.local.port())
        .unwrap_or(0)
}

pub fn emit(ctx: &Context, metric: Metric) {
    if let Some(line) = format_statsd(&metric, &ctx.format) {
        if let Err(e) = ctx.output.send(&line) {
            log::report(&e);
        }
    }
}

/// Port/connection event (§4.4): `proc, pid, host, fd, proto, port`.
pub fn emit_conn_metric(
    ctx: &Context,
    name: &'static str,
    value: i64,
    kind: MetricKind,
    fd: RawFd,
    proto: &'static str,
    port: u16,
) {
    let mut fields = ctx.identity.base_fields();
    fields.extend(conn_fields(fd, proto, port));
    emit(ctx, Metric::new(name, value, kind).with_fields(fields));
}

/// Byte event (§4.4): conn fields plus `localip, localp, remoteip, remotep,
/// data`. Unix sockets contribute blank addresses, matching the source.
pub fn emit_byte_metric(ctx: &Context, name: &'static str, value: i64, snap: &FdSnapshot) {
    let mut fields = ctx.identity.base_fields();
    let (local_ip, local_port) = addr_parts(&snap.local);
    let (remote_ip, remote_port) = addr_parts(&snap.remote);
    fields.extend(byte_fields(&local_ip, local_port, &remote_ip, remote_port));
    emit(
        ctx,
        Metric::new(name, value, MetricKind::Delta).with_fields(fields),
    );
}

fn addr_parts(addr: &SockAddr) -> (String, Option<u16>) {
    match addr {
        SockAddr::Unix { .. } | SockAddr::Unspecified => (String::new(), None),
        _ => (addr.ip_string(), addr.port()),
    }
}

/// `log_data_path` (§10): the source's `dataLog`, gated on the same toggle
/// and fired from the same eight call sites (`write`/`read`/`send{,to,msg}`/
/// `recv{,from,msg}`), but carrying the actual payload through the formatter's
/// JSON event shape instead of a fixed diagnostic string, since this crate's
/// own diagnostic channel (`log.rs`) is kept separate from data captured
/// about the host process.
pub fn emit_data_event(ctx: &Context, src: &'static str, payload: &[u8]) {
    if !ctx.log_data_path {
        return;
    }
    let msg = EventMessage {
        src,
        host: ctx.identity.host.clone(),
        proc: ctx.identity.proc.clone(),
        cmd: ctx.identity.proc.clone(),
        data: Some(payload.to_vec()),
        datasize: Some(payload.len()),
        ts: context::now_secs() as f64,
    };
    let line = format_json_event(&msg);
    if let Err(e) = ctx.output.send_event(&line) {
        log::report(&e);
    }
}

pub fn emit_dns_metric(ctx: &Context, value: i64, domain: &str) {
    let mut fields = ctx.identity.base_fields();
    fields.extend(dns_fields(domain));
    emit(
        ctx,
        Metric::new("net.dns", value, MetricKind::Delta).with_fields(fields),
    );
}
