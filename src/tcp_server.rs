use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use indexmap::IndexMap;
use log::info;

use crate::acceptor::Acceptor;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::net::tcp::TcpListener;
use crate::reactor::event_loop::EventLoop;
use crate::reactor::loop_pool::LoopPool;

type ConnCallback = Arc<dyn Fn(Arc<Connection>) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(Arc<Connection>, Instant) + Send + Sync>;
type HighWaterMarkCallback = Arc<dyn Fn(Arc<Connection>, usize) + Send + Sync>;

fn default_connection_callback(conn: Arc<Connection>) {
    info!(
        "connection [{}] is {}",
        conn.name(),
        if conn.is_connected() { "UP" } else { "DOWN" }
    );
}

/// Owns the listening Acceptor on the base loop plus a LoopPool of worker
/// loops; each accepted connection is handed to the next worker loop
/// round-robin and tracked in a name-keyed connection map.
pub struct TcpServer {
    event_loop: Arc<EventLoop>,
    name: String,
    config: Config,
    acceptor: Arc<Acceptor>,
    loop_pool: Mutex<LoopPool>,
    connections: Mutex<IndexMap<String, Arc<Connection>>>,
    started: AtomicBool,
    next_conn_id: AtomicUsize,

    connection_cb: RwLock<ConnCallback>,
    message_cb: RwLock<Option<MessageCallback>>,
    write_complete_cb: RwLock<Option<ConnCallback>>,
    high_water_mark_cb: RwLock<Option<HighWaterMarkCallback>>,
}

impl TcpServer {
    pub fn new(
        event_loop: Arc<EventLoop>,
        addr: SocketAddr,
        name: impl Into<String>,
        config: Config,
    ) -> Result<Arc<TcpServer>> {
        let name = name.into();
        let listener = TcpListener::bind(addr)?;
        let loop_pool = LoopPool::new(event_loop.clone(), format!("{}-", name));
        let acceptor = Acceptor::new(event_loop.clone(), listener);

        let server = Arc::new_cyclic(|weak: &Weak<TcpServer>| {
            let weak_for_accept = weak.clone();
            acceptor.set_new_connection_callback(move |stream, peer| {
                if let Some(server) = weak_for_accept.upgrade() {
                    server.new_connection(stream, peer);
                }
            });

            TcpServer {
                event_loop,
                name,
                config,
                acceptor,
                loop_pool: Mutex::new(loop_pool),
                connections: Mutex::new(IndexMap::new()),
                started: AtomicBool::new(false),
                next_conn_id: AtomicUsize::new(1),
                connection_cb: RwLock::new(Arc::new(default_connection_callback)),
                message_cb: RwLock::new(None),
                write_complete_cb: RwLock::new(None),
                high_water_mark_cb: RwLock::new(None),
            }
        });

        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// The worker loops backing round-robin connection assignment, in
    /// assignment order. Exposed for tests asserting fan-out behavior;
    /// degenerates to `[event_loop]` if `set_thread_num` was never called.
    pub fn worker_loops(&self) -> Vec<Arc<EventLoop>> {
        self.loop_pool.lock().unwrap().all_loops()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.acceptor.local_addr()?)
    }

    pub fn set_thread_num(
        &self,
        num_threads: usize,
        init: impl Fn(&Arc<EventLoop>) + Send + Sync + 'static,
    ) -> Result<()> {
        assert!(!self.started.load(Ordering::Acquire), "thread pool size must be set before start");
        self.loop_pool.lock().unwrap().start(num_threads, self.config.clone(), init)
    }

    pub fn set_connection_callback(&self, cb: impl Fn(Arc<Connection>) + Send + Sync + 'static) {
        *self.connection_cb.write().unwrap() = Arc::new(cb);
    }

    pub fn set_message_callback(&self, cb: impl Fn(Arc<Connection>, Instant) + Send + Sync + 'static) {
        *self.message_cb.write().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_write_complete_callback(&self, cb: impl Fn(Arc<Connection>) + Send + Sync + 'static) {
        *self.write_complete_cb.write().unwrap() = Some(Arc::new(cb));
    }

    pub fn set_high_water_mark_callback(&self, cb: impl Fn(Arc<Connection>, usize) + Send + Sync + 'static) {
        *self.high_water_mark_cb.write().unwrap() = Some(Arc::new(cb));
    }

    pub fn start(self: &Arc<TcpServer>) -> Result<()> {
        if self.started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            if !self.loop_pool.lock().unwrap().started() {
                self.loop_pool.lock().unwrap().start(0, self.config.clone(), |_| {})?;
            }

            debug_assert!(!self.acceptor.is_listening());
            let acceptor = self.acceptor.clone();

            self.event_loop.run_in_loop(move || {
                if let Err(e) = acceptor.listen() {
                    log::error!("acceptor failed to start listening: {}", e);
                }
            });
        }

        Ok(())
    }

    fn new_connection(self: &Arc<TcpServer>, stream: crate::net::tcp::TcpStream, peer: SocketAddr) {
        self.event_loop.assert_in_loop_thread();

        let io_loop = self.loop_pool.lock().unwrap().next();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let conn_name = format!("{}-{}-{}", self.name, peer, conn_id).to_lowercase();

        info!("TcpServer[{}] - new connection [{}] from {}", self.name, conn_name, peer);

        let conn = Connection::new(io_loop.clone(), conn_name.clone(), stream, &self.config);

        let connection_cb = self.connection_cb.read().unwrap().clone();
        conn.set_connection_callback(move |c| connection_cb(c));

        if let Some(message_cb) = self.message_cb.read().unwrap().clone() {
            conn.set_message_callback(move |c, t| message_cb(c, t));
        }

        if let Some(write_complete_cb) = self.write_complete_cb.read().unwrap().clone() {
            conn.set_write_complete_callback(move |c| write_complete_cb(c));
        }

        if let Some(high_water_mark_cb) = self.high_water_mark_cb.read().unwrap().clone() {
            conn.set_high_water_mark_callback(move |c, size| high_water_mark_cb(c, size));
        }

        self.connections.lock().unwrap().insert(conn_name, conn.clone());

        let this = self.clone();
        conn.set_close_callback(move |c| this.remove_connection(c));

        io_loop.run_in_loop(move || conn.connect_established());
    }

    fn remove_connection(self: &Arc<TcpServer>, conn: Arc<Connection>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.remove_connection_in_loop(conn));
    }

    fn remove_connection_in_loop(&self, conn: Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        info!("TcpServer[{}] - removing connection [{}]", self.name, conn.name());
        self.connections.lock().unwrap().shift_remove(conn.name());

        let io_loop = conn.event_loop().clone();
        io_loop.queue_in_loop(move || conn.connect_destroyed());
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        info!("TcpServer[{}] destructing", self.name);

        for (_, conn) in self.connections.lock().unwrap().drain(..) {
            let io_loop = conn.event_loop().clone();
            io_loop.run_in_loop(move || conn.connect_destroyed());
        }
    }
}
