mod common;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactor_net::config::Config;
use reactor_net::tcp_server::TcpServer;

type EchoServer = (Arc<TcpServer>, std::net::SocketAddr, thread::JoinHandle<()>);

/// Greets every new connection, echoes whole lines back, and on the line
/// `exit\n` sends `bye\n` and half-closes its write side.
fn spawn_echo_server() -> EchoServer {
    let (event_loop, handle) = common::spawn_event_loop(Config::default());

    let addr = "127.0.0.1:0".parse().unwrap();
    let server = TcpServer::new(event_loop.clone(), addr, "echo-test", Config::default()).unwrap();

    server.set_connection_callback(|conn| {
        if conn.is_connected() {
            conn.send(b"hello\n");
        }
    });

    server.set_message_callback(|conn, _now| {
        let data = conn.input_buffer().lock().unwrap().to_vec();
        conn.input_buffer().lock().unwrap().clear();

        if data == b"exit\n" {
            conn.send(b"bye\n");
            conn.shutdown();
        } else {
            conn.send(&data);
        }
    });

    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    (server, addr, handle)
}

#[test]
fn echo_greets_echoes_and_says_bye() {
    let (server, addr, handle) = spawn_echo_server();

    let stream = StdTcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "hello\n");

    writer.write_all(b"hello\n").unwrap();
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "hello\n");

    writer.write_all(b"exit\n").unwrap();
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "bye\n");

    let mut rest = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut rest).unwrap();
    assert!(rest.is_empty(), "expected half-close, got trailing bytes: {:?}", rest);

    server.event_loop().quit();
    handle.join().unwrap();
}
