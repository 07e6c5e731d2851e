mod common;

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::net::TcpStream as StdTcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactor_net::config::Config;
use reactor_net::tcp_server::TcpServer;

/// Four worker loops; each accepted connection records which worker loop
/// (by `Arc` pointer identity against `TcpServer::worker_loops()`) it landed
/// on, then greets the client so the test can serialize connection order.
#[test]
fn connections_fan_out_round_robin_across_worker_loops() {
    let (event_loop, handle) = common::spawn_event_loop(Config::default());

    let addr = "127.0.0.1:0".parse().unwrap();
    let server = TcpServer::new(event_loop.clone(), addr, "fanout-test", Config::default()).unwrap();

    server.set_thread_num(4, |_| {}).unwrap();
    server.start().unwrap();

    let addr = server.local_addr().unwrap();
    let loops = server.worker_loops();
    assert_eq!(loops.len(), 4);

    let assignments: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let assignments = assignments.clone();
        let loops = loops.clone();
        server.set_connection_callback(move |conn| {
            if conn.is_connected() {
                let idx = loops
                    .iter()
                    .position(|l| Arc::ptr_eq(l, conn.event_loop()))
                    .expect("connection assigned to an unknown loop");
                assignments.lock().unwrap().push(idx);
                conn.send(b"ready\n");
            }
        });
    }

    for _ in 0..4 {
        let stream = StdTcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "ready\n");
    }

    let indices = assignments.lock().unwrap().clone();
    assert_eq!(indices, vec![0, 1, 2, 3], "expected strict round-robin assignment");

    let unique: HashSet<_> = indices.iter().collect();
    assert_eq!(unique.len(), 4, "each connection should land on a distinct worker loop");

    event_loop.quit();
    handle.join().unwrap();
}
