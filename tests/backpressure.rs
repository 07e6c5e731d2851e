mod common;

use std::net::TcpStream as StdTcpStream;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reactor_net::config::Config;
use reactor_net::connection::Connection;
use reactor_net::tcp_server::TcpServer;

/// Shrinks the client's receive window so the server's kernel send buffer
/// fills up quickly once the client stops reading, forcing the overflow
/// into `Connection`'s own output buffer.
fn starve_receive_window(stream: &StdTcpStream) {
    let fd = stream.as_raw_fd();
    let bufsize: libc::c_int = 2048;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &bufsize as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[test]
fn high_water_mark_fires_once_while_peer_is_not_reading() {
    let mut config = Config::default();
    config.high_water_mark = 1024;

    let (event_loop, handle) = common::spawn_event_loop(config.clone());

    let addr = "127.0.0.1:0".parse().unwrap();
    let server = TcpServer::new(event_loop.clone(), addr, "backpressure-test", config).unwrap();

    let conn_slot: Arc<Mutex<Option<Arc<Connection>>>> = Arc::new(Mutex::new(None));
    let hwm_events: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let conn_slot = conn_slot.clone();
        server.set_connection_callback(move |conn| {
            if conn.is_connected() {
                *conn_slot.lock().unwrap() = Some(conn);
            }
        });
    }

    {
        let hwm_events = hwm_events.clone();
        server.set_high_water_mark_callback(move |_conn, size| {
            hwm_events.lock().unwrap().push(size);
        });
    }

    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let client = StdTcpStream::connect(addr).unwrap();
    starve_receive_window(&client);

    let conn = loop {
        if let Some(c) = conn_slot.lock().unwrap().clone() {
            break c;
        }
        thread::sleep(Duration::from_millis(5));
    };

    // The client never reads, so once the kernel's send buffer (throttled
    // by its shrunken receive window) is exhausted, the remainder backs up
    // into the connection's own output buffer and should cross the 1 KiB
    // high-water mark exactly once.
    let chunk = vec![0xABu8; 1024 * 1024];
    for _ in 0..8 {
        conn.send(&chunk);
    }

    thread::sleep(Duration::from_millis(300));

    let events = hwm_events.lock().unwrap().clone();
    assert_eq!(events.len(), 1, "expected exactly one high-water-mark callback, got {:?}", events);
    assert!(events[0] >= 1024, "reported buffered size {} should be at least the high-water mark", events[0]);

    drop(client);
    event_loop.quit();
    handle.join().unwrap();
}
