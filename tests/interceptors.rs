//! Exercises the exported `extern "C"` interceptors directly against real
//! sockets in this process, the way the corpus's own `formattest.c` drives
//! its formatter directly rather than through an actual injected library
//! (§10 "Test tooling"; §8 "End-to-end scenarios").
//!
//! These tests serialize on `LOCK`: they all observe the one process-wide
//! `Context` the `ctor` constructor installs, so running them concurrently
//! would make each other's counter deltas unreliable.

use std::mem::size_of;
use std::os::raw::c_void;
use std::sync::Mutex;
use std::thread;

use tapagent::context;
use tapagent::interceptors::close::close;
use tapagent::interceptors::io::{read, recvfrom, sendto, write};
use tapagent::interceptors::socket::{accept, bind, connect, listen, socket};

static LOCK: Mutex<()> = Mutex::new(());

fn loopback(port: u16) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = u32::from(std::net::Ipv4Addr::LOCALHOST).to_be();
    addr
}

unsafe fn port_of(fd: libc::c_int) -> u16 {
    let mut addr: libc::sockaddr_in = std::mem::zeroed();
    let mut len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let rc = libc::getsockname(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len);
    assert_eq!(rc, 0);
    u16::from_be(addr.sin_port)
}

#[test]
fn tcp_listen_accept_exchange_close_updates_counters() {
    let _guard = LOCK.lock().unwrap();
    let ctx = context::ctx().expect("constructor installs the context before any test runs");

    let open_ports_before = ctx.counters.open_ports.get();
    let tcp_before = ctx.counters.tcp_connections.get();
    let active_before = ctx.counters.active_connections.get();
    let tx_before = ctx.counters.net_tx.get();
    let rx_before = ctx.counters.net_rx.get();

    unsafe {
        let server = socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        assert!(server >= 0);
        let any = loopback(0);
        assert_eq!(
            bind(server, &any as *const _ as *const libc::sockaddr, size_of::<libc::sockaddr_in>() as u32),
            0
        );
        assert_eq!(listen(server, 1), 0);
        let port = port_of(server);

        let client_thread = thread::spawn(move || unsafe {
            let client = socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            let target = loopback(port);
            let rc = connect(
                client,
                &target as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_in>() as u32,
            );
            assert_eq!(rc, 0);
            let mut buf = [0u8; 2];
            let n = read(client, buf.as_mut_ptr() as *mut c_void, 2);
            assert_eq!(n, 2);
            assert_eq!(&buf, b"hi");
            let n = write(client, b"ok".as_ptr() as *const c_void, 2);
            assert_eq!(n, 2);
            close(client);
        });

        let mut peer_len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let mut peer: libc::sockaddr_in = std::mem::zeroed();
        let conn = accept(
            server,
            &mut peer as *mut _ as *mut libc::sockaddr,
            &mut peer_len,
        );
        assert!(conn >= 0);
        let n = write(conn, b"hi".as_ptr() as *const c_void, 2);
        assert_eq!(n, 2);
        let mut buf = [0u8; 2];
        let n = read(conn, buf.as_mut_ptr() as *mut c_void, 2);
        assert_eq!(n, 2);
        assert_eq!(&buf, b"ok");

        client_thread.join().unwrap();
        close(conn);
        close(server);
    }

    assert_eq!(ctx.counters.open_ports.get(), open_ports_before);
    assert_eq!(ctx.counters.tcp_connections.get(), tcp_before);
    assert_eq!(ctx.counters.active_connections.get(), active_before);
    assert!(ctx.counters.net_tx.get() >= tx_before + 4);
    assert!(ctx.counters.net_rx.get() >= rx_before + 4);
}

#[test]
fn udp_socket_opens_a_port_and_counts_datagram_bytes() {
    let _guard = LOCK.lock().unwrap();
    let ctx = context::ctx().expect("constructor installs the context before any test runs");
    let open_ports_before = ctx.counters.open_ports.get();
    let tx_before = ctx.counters.net_tx.get();
    let rx_before = ctx.counters.net_rx.get();

    unsafe {
        let server = socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        assert!(server >= 0);
        let any = loopback(0);
        assert_eq!(
            bind(server, &any as *const _ as *const libc::sockaddr, size_of::<libc::sockaddr_in>() as u32),
            0
        );
        let port = port_of(server);

        let client = socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        assert!(client >= 0);
        let target = loopback(port);
        let payload = b"hello";
        let n = sendto(
            client,
            payload.as_ptr() as *const c_void,
            payload.len(),
            0,
            &target as *const _ as *const libc::sockaddr,
            size_of::<libc::sockaddr_in>() as u32,
        );
        assert_eq!(n as usize, payload.len());

        let mut buf = vec![0u8; payload.len()];
        let mut from: libc::sockaddr_in = std::mem::zeroed();
        let mut from_len = size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let n = recvfrom(
            server,
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            0,
            &mut from as *mut _ as *mut libc::sockaddr,
            &mut from_len,
        );
        assert_eq!(n as usize, payload.len());

        close(client);
        close(server);
    }

    // Both UDP sockets bump open_ports at socket() and give it back on
    // close(), same as the TCP invariant above.
    assert_eq!(ctx.counters.open_ports.get(), open_ports_before);
    assert!(ctx.counters.net_tx.get() >= tx_before + 5);
    assert!(ctx.counters.net_rx.get() >= rx_before + 5);
}
