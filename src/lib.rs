//! A multi-reactor TCP/HTTP server framework: a fixed pool of single-thread
//! event loops (epoll-backed pollers, a lazy-cancellation timer heap, and a
//! cross-thread task queue) underneath `TcpServer`/`HttpServer` convenience
//! layers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reactor_net::config::Config;
//! use reactor_net::reactor::EventLoop;
//! use reactor_net::tcp_server::TcpServer;
//!
//! let event_loop = Arc::new(EventLoop::new(Config::default()).unwrap());
//! let addr = "127.0.0.1:0".parse().unwrap();
//! let server = TcpServer::new(event_loop.clone(), addr, "echo", Config::default()).unwrap();
//!
//! server.set_message_callback(|conn, _now| {
//!     let data = conn.input_buffer().lock().unwrap().to_vec();
//!     conn.input_buffer().lock().unwrap().clear();
//!     conn.send(&data);
//! });
//!
//! server.set_thread_num(4, |_loop| {}).unwrap();
//! server.start().unwrap();
//! event_loop.run();
//! ```

pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod epoll;
pub mod error;
pub mod http;
pub mod net;
pub mod reactor;
pub mod sys;
pub mod tcp_server;

pub use acceptor::Acceptor;
pub use buffer::Buffer;
pub use config::Config;
pub use connection::{ConnState, Connection};
pub use error::{Error, Result};
pub use reactor::{Channel, ChannelHandle, EventLoop, LoopPool, Poller, TimerId, TimerService};
pub use tcp_server::TcpServer;
