use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::config::Config;
use crate::error::Result;
use crate::reactor::event_loop::EventLoop;
use crate::tcp_server::TcpServer;

use super::servlet::ServletDispatch;
use super::session::HttpSession;

/// `TcpServer` specialized to speak HTTP/1.x: a `HttpSession` per connection
/// drives `ServletDispatch` from the connection's message callback.
pub struct HttpServer {
    tcp_server: Arc<TcpServer>,
    dispatch: Arc<ServletDispatch>,
}

impl HttpServer {
    pub fn new(
        event_loop: Arc<EventLoop>,
        addr: SocketAddr,
        name: impl Into<String>,
        config: Config,
    ) -> Result<Arc<HttpServer>> {
        let tcp_server = TcpServer::new(event_loop, addr, name, config.clone())?;
        let dispatch = Arc::new(ServletDispatch::new());
        let sessions: Arc<Mutex<IndexMap<String, Arc<HttpSession>>>> = Arc::new(Mutex::new(IndexMap::new()));

        {
            let sessions = sessions.clone();
            let dispatch = dispatch.clone();
            let config = config.clone();
            tcp_server.set_connection_callback(move |conn| {
                if conn.is_connected() {
                    let session = HttpSession::new(conn.clone(), dispatch.clone(), config.clone());
                    sessions.lock().unwrap().insert(conn.name().to_string(), session);
                } else {
                    sessions.lock().unwrap().shift_remove(conn.name());
                }
            });
        }

        {
            let sessions = sessions.clone();
            tcp_server.set_message_callback(move |conn, _now| {
                let session = sessions.lock().unwrap().get(conn.name()).cloned();
                if let Some(session) = session {
                    session.on_readable();
                }
            });
        }

        Ok(Arc::new(HttpServer { tcp_server, dispatch }))
    }

    pub fn tcp_server(&self) -> &Arc<TcpServer> {
        &self.tcp_server
    }

    pub fn dispatch(&self) -> &Arc<ServletDispatch> {
        &self.dispatch
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp_server.local_addr()
    }

    pub fn set_thread_num(
        &self,
        num_threads: usize,
        init: impl Fn(&Arc<EventLoop>) + Send + Sync + 'static,
    ) -> Result<()> {
        self.tcp_server.set_thread_num(num_threads, init)
    }

    pub fn start(&self) -> Result<()> {
        self.tcp_server.start()
    }
}
