mod common;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream as StdTcpStream;
use std::time::Duration;

use reactor_net::config::Config;
use reactor_net::http::HttpServer;

struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

fn read_response(reader: &mut BufReader<StdTcpStream>) -> RawResponse {
    let mut status_line = String::new();
    reader.read_line(&mut status_line).unwrap();
    let status: u16 = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        let (k, v) = line.split_once(':').unwrap();
        headers.push((k.trim().to_ascii_lowercase(), v.trim().to_string()));
    }

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    std::io::Read::read_exact(reader, &mut body).unwrap();

    RawResponse {
        status,
        headers,
        body: String::from_utf8(body).unwrap(),
    }
}

fn spawn_http_server() -> (std::sync::Arc<HttpServer>, std::net::SocketAddr, std::thread::JoinHandle<()>) {
    let (event_loop, handle) = common::spawn_event_loop(Config::default());

    let addr = "127.0.0.1:0".parse().unwrap();
    let server = HttpServer::new(event_loop.clone(), addr, "http-test", Config::default()).unwrap();

    server.dispatch().add_function("/hi", "hi", |_req, resp| {
        resp.set_header("content-type", "text/plain");
        resp.set_body("ok");
    });

    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    (server, addr, handle)
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    let (server, addr, handle) = spawn_http_server();

    let stream = StdTcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    for _ in 0..2 {
        writer
            .write_all(b"GET /hi HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();

        let resp = read_response(&mut reader);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");
        assert!(resp.headers.iter().any(|(k, v)| k == "connection" && v.eq_ignore_ascii_case("keep-alive")));
    }

    server.tcp_server().event_loop().quit();
    handle.join().unwrap();
}

#[test]
fn unmatched_path_returns_default_404() {
    let (server, addr, handle) = spawn_http_server();

    let stream = StdTcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    writer.write_all(b"GET /missing HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();

    let resp = read_response(&mut reader);
    assert_eq!(resp.status, 404);
    assert!(resp.headers.iter().any(|(k, v)| k == "content-type" && v.contains("text/html")));
    assert!(resp.body.contains("reactor_net"));

    server.tcp_server().event_loop().quit();
    handle.join().unwrap();
}
