use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::buffer::Buffer;
use crate::config::Config;
use crate::net::tcp::TcpStream;
use crate::reactor::channel::{Channel, ChannelHandle};
use crate::reactor::event_loop::EventLoop;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

type ConnCallback = Box<dyn Fn(Arc<Connection>) + Send + Sync>;
type MessageCallback = Box<dyn Fn(Arc<Connection>, Instant) + Send + Sync>;
type HighWaterMarkCallback = Box<dyn Fn(Arc<Connection>, usize) + Send + Sync>;

/// Per-socket state machine: Connecting -> Connected -> Disconnecting ->
/// Disconnected. Owns the Channel over its socket and its input/output
/// Buffers; shared via `Arc` across asynchronous callbacks queued on its
/// owning loop.
pub struct Connection {
    name: String,
    event_loop: Arc<EventLoop>,
    stream: Mutex<TcpStream>,
    channel: ChannelHandle,
    state: Mutex<ConnState>,
    input_buffer: Mutex<Buffer>,
    output_buffer: Mutex<Buffer>,
    high_water_mark: usize,
    reading: AtomicBool,

    connection_cb: Mutex<Option<ConnCallback>>,
    message_cb: Mutex<Option<MessageCallback>>,
    write_complete_cb: Mutex<Option<ConnCallback>>,
    high_water_mark_cb: Mutex<Option<HighWaterMarkCallback>>,
    close_cb: Mutex<Option<ConnCallback>>,
}

impl Connection {
    pub fn new(
        event_loop: Arc<EventLoop>,
        name: String,
        stream: TcpStream,
        config: &Config,
    ) -> Arc<Connection> {
        let fd = stream.as_raw_fd();
        let channel = Channel::new(fd);
        let high_water_mark = config.high_water_mark;
        let chunk_size = config.chunk_base_size;

        Arc::new_cyclic(|weak: &Weak<Connection>| {
            Self::wire_channel_callbacks(&channel, weak.clone());

            Connection {
                name,
                event_loop,
                stream: Mutex::new(stream),
                channel,
                state: Mutex::new(ConnState::Connecting),
                input_buffer: Mutex::new(Buffer::new(chunk_size)),
                output_buffer: Mutex::new(Buffer::new(chunk_size)),
                high_water_mark,
                reading: AtomicBool::new(false),
                connection_cb: Mutex::new(None),
                message_cb: Mutex::new(None),
                write_complete_cb: Mutex::new(None),
                high_water_mark_cb: Mutex::new(None),
                close_cb: Mutex::new(None),
            }
        })
    }

    fn wire_channel_callbacks(channel: &ChannelHandle, weak: Weak<Connection>) {
        let mut ch = channel.lock().unwrap();

        let w = weak.clone();
        ch.set_read_callback(move |now| {
            if let Some(conn) = w.upgrade() {
                conn.handle_read(now);
            }
        });

        let w = weak.clone();
        ch.set_write_callback(move || {
            if let Some(conn) = w.upgrade() {
                conn.handle_write();
            }
        });

        let w = weak.clone();
        ch.set_close_callback(move || {
            if let Some(conn) = w.upgrade() {
                conn.handle_close();
            }
        });

        let w = weak;
        ch.set_error_callback(move || {
            if let Some(conn) = w.upgrade() {
                conn.handle_error();
            }
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnState::Connected
    }

    pub fn input_buffer(&self) -> &Mutex<Buffer> {
        &self.input_buffer
    }

    pub fn output_buffer(&self) -> &Mutex<Buffer> {
        &self.output_buffer
    }

    pub fn set_connection_callback(&self, cb: impl Fn(Arc<Connection>) + Send + Sync + 'static) {
        *self.connection_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_message_callback(&self, cb: impl Fn(Arc<Connection>, Instant) + Send + Sync + 'static) {
        *self.message_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_write_complete_callback(&self, cb: impl Fn(Arc<Connection>) + Send + Sync + 'static) {
        *self.write_complete_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_high_water_mark_callback(&self, cb: impl Fn(Arc<Connection>, usize) + Send + Sync + 'static) {
        *self.high_water_mark_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_close_callback(&self, cb: impl Fn(Arc<Connection>) + Send + Sync + 'static) {
        *self.close_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn connect_established(self: &Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();
        debug_assert_eq!(*self.state.lock().unwrap(), ConnState::Connecting);

        *self.state.lock().unwrap() = ConnState::Connected;

        {
            let owner: Arc<dyn std::any::Any + Send + Sync> = self.clone();
            self.channel.lock().unwrap().tie(&owner);
        }

        self.channel.lock().unwrap().enable_reading();
        let _ = self.event_loop.update_channel(&self.channel);
        self.reading.store(true, Ordering::Relaxed);

        if let Some(cb) = self.connection_cb.lock().unwrap().as_ref() {
            cb(self.clone());
        }
    }

    pub fn connect_destroyed(self: &Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        if *self.state.lock().unwrap() == ConnState::Connected {
            *self.state.lock().unwrap() = ConnState::Disconnected;
            self.channel.lock().unwrap().disable_all();
            let _ = self.event_loop.update_channel(&self.channel);
        }

        let _ = self.event_loop.remove_channel(&self.channel);
    }

    pub fn send(self: &Arc<Connection>, data: &[u8]) {
        if self.state() != ConnState::Connected {
            warn!("connection[{}] not connected, dropping send of {} bytes", self.name, data.len());
            return;
        }

        if self.event_loop.is_in_loop_thread() {
            self.send_in_loop(data);
        } else {
            let this = self.clone();
            let data = data.to_vec();
            self.event_loop.run_in_loop(move || this.send_in_loop(&data));
        }
    }

    /// Sends a Buffer's readable bytes without an intermediate `Vec` copy
    /// when already on the owning loop thread: the initial write attempt
    /// goes straight out via `write_vectored` over the buffer's own chunks.
    pub fn send_buffer(self: &Arc<Connection>, buf: &mut Buffer) {
        if self.state() != ConnState::Connected {
            warn!("connection[{}] not connected, dropping send of {} bytes", self.name, buf.readable_size());
            buf.clear();
            return;
        }

        if self.event_loop.is_in_loop_thread() {
            self.send_buffer_in_loop(buf);
        } else {
            let this = self.clone();
            let data = buf.to_vec();
            buf.clear();
            self.event_loop.run_in_loop(move || this.send_in_loop(&data));
        }
    }

    fn send_in_loop(self: &Arc<Connection>, data: &[u8]) {
        self.event_loop.assert_in_loop_thread();

        if self.state() == ConnState::Disconnected {
            warn!("connection[{}] disconnected, give up writing", self.name);
            return;
        }

        let mut wrote = 0usize;
        let mut fault = false;
        let already_writing = self.channel.lock().unwrap().is_writing();
        let output_empty = self.output_buffer.lock().unwrap().is_empty();

        if !already_writing && output_empty {
            match self.stream.lock().unwrap().write(data) {
                Ok(n) => wrote = n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    error!("connection[{}] write failed: {}", self.name, e);
                    if matches!(e.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET)) {
                        fault = true;
                    }
                }
            }
        }

        if fault {
            self.force_close();
            return;
        }

        self.finish_write(wrote == data.len(), &data[wrote..]);
    }

    fn send_buffer_in_loop(self: &Arc<Connection>, buf: &mut Buffer) {
        self.event_loop.assert_in_loop_thread();

        if self.state() == ConnState::Disconnected {
            warn!("connection[{}] disconnected, give up writing", self.name);
            buf.clear();
            return;
        }

        let total = buf.readable_size();
        let mut wrote = 0usize;
        let mut fault = false;
        let already_writing = self.channel.lock().unwrap().is_writing();
        let output_empty = self.output_buffer.lock().unwrap().is_empty();

        if !already_writing && output_empty {
            let slices = buf.gather_read(total);
            match self.stream.lock().unwrap().write_vectored(&slices) {
                Ok(n) => wrote = n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    error!("connection[{}] write failed: {}", self.name, e);
                    if matches!(e.raw_os_error(), Some(libc::EPIPE) | Some(libc::ECONNRESET)) {
                        fault = true;
                    }
                }
            }
        }

        buf.skip(wrote).ok();

        if fault {
            buf.clear();
            self.force_close();
            return;
        }

        let remaining = buf.to_vec();
        buf.clear();
        self.finish_write(wrote == total, &remaining);
    }

    /// Buffers whatever the initial write attempt didn't take, firing the
    /// write-complete and high-water-mark callbacks as appropriate.
    fn finish_write(self: &Arc<Connection>, fully_written: bool, remaining: &[u8]) {
        if fully_written && self.write_complete_cb.lock().unwrap().is_some() {
            let this = self.clone();
            self.event_loop.queue_in_loop(move || {
                if let Some(cb) = this.write_complete_cb.lock().unwrap().as_ref() {
                    cb(this.clone());
                }
            });
        }

        if !remaining.is_empty() {
            let old_len = self.output_buffer.lock().unwrap().readable_size();
            let new_len = old_len + remaining.len();

            if new_len >= self.high_water_mark && old_len < self.high_water_mark {
                if self.high_water_mark_cb.lock().unwrap().is_some() {
                    let this = self.clone();
                    self.event_loop.queue_in_loop(move || {
                        if let Some(cb) = this.high_water_mark_cb.lock().unwrap().as_ref() {
                            cb(this.clone(), new_len);
                        }
                    });
                }
            }

            self.output_buffer.lock().unwrap().write(remaining);
            self.channel.lock().unwrap().enable_writing();
            let _ = self.event_loop.update_channel(&self.channel);
        }
    }

    pub fn shutdown(self: &Arc<Connection>) {
        if self.state() == ConnState::Connected {
            *self.state.lock().unwrap() = ConnState::Disconnecting;
            let this = self.clone();
            self.event_loop.run_in_loop(move || this.shutdown_in_loop());
        }
    }

    fn shutdown_in_loop(self: &Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        if !self.channel.lock().unwrap().is_writing() {
            let _ = self.stream.lock().unwrap().shutdown(std::net::Shutdown::Write);
        }
    }

    pub fn force_close(self: &Arc<Connection>) {
        let state = self.state();
        if state == ConnState::Connected || state == ConnState::Disconnecting {
            *self.state.lock().unwrap() = ConnState::Disconnecting;
            let this = self.clone();
            self.event_loop.queue_in_loop(move || this.force_close_in_loop());
        }
    }

    fn force_close_in_loop(self: &Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        let state = self.state();
        if state == ConnState::Connected || state == ConnState::Disconnecting {
            self.handle_close();
        }
    }

    pub fn force_close_with_delay(self: &Arc<Connection>, delay: Duration) {
        let state = self.state();
        if state == ConnState::Connected || state == ConnState::Disconnecting {
            *self.state.lock().unwrap() = ConnState::Disconnecting;
            let weak = Arc::downgrade(self);
            self.event_loop.run_after(delay, move || {
                if let Some(conn) = weak.upgrade() {
                    conn.force_close();
                }
            });
        }
    }

    pub fn start_read(self: &Arc<Connection>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.start_read_in_loop());
    }

    fn start_read_in_loop(self: &Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        if !self.reading.load(Ordering::Relaxed) || !self.channel.lock().unwrap().is_reading() {
            self.channel.lock().unwrap().enable_reading();
            let _ = self.event_loop.update_channel(&self.channel);
            self.reading.store(true, Ordering::Relaxed);
        }
    }

    pub fn stop_read(self: &Arc<Connection>) {
        let this = self.clone();
        self.event_loop.run_in_loop(move || this.stop_read_in_loop());
    }

    fn stop_read_in_loop(self: &Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        if self.channel.lock().unwrap().is_reading() {
            self.channel.lock().unwrap().disable_reading();
            let _ = self.event_loop.update_channel(&self.channel);
            self.reading.store(false, Ordering::Relaxed);
        }
    }

    fn handle_read(self: Arc<Connection>, now: Instant) {
        self.event_loop.assert_in_loop_thread();

        let mut scratch = [0u8; 4096];
        let mut read_any = false;

        loop {
            match self.stream.lock().unwrap().read(&mut scratch) {
                Ok(0) => {
                    if read_any {
                        break;
                    }
                    self.handle_close();
                    return;
                }
                Ok(n) => {
                    self.input_buffer.lock().unwrap().write(&scratch[..n]);
                    read_any = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("connection[{}] read failed: {}", self.name, e);
                    self.handle_error();
                    return;
                }
            }
        }

        if read_any {
            if let Some(cb) = self.message_cb.lock().unwrap().as_ref() {
                cb(self.clone(), now);
            }
        }

        self.channel.lock().unwrap().enable_reading();
        let _ = self.event_loop.update_channel(&self.channel);
    }

    fn handle_write(self: Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        if !self.channel.lock().unwrap().is_writing() {
            info!("connection[{}] fd is down, no more writing", self.name);
            return;
        }

        let to_write = self.output_buffer.lock().unwrap().to_vec();

        match self.stream.lock().unwrap().write(&to_write) {
            Ok(n) if n > 0 => {
                let mut scratch = vec![0u8; n];
                let mut out = self.output_buffer.lock().unwrap();
                out.read(&mut scratch).ok();

                if out.is_empty() {
                    drop(out);
                    self.channel.lock().unwrap().disable_writing();
                    let _ = self.event_loop.update_channel(&self.channel);

                    if let Some(cb) = self.write_complete_cb.lock().unwrap().as_ref() {
                        cb(self.clone());
                    }

                    if self.state() == ConnState::Disconnecting {
                        self.shutdown_in_loop();
                    }
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => error!("connection[{}] write failed: {}", self.name, e),
        }
    }

    fn handle_close(self: Arc<Connection>) {
        self.event_loop.assert_in_loop_thread();

        let state = self.state();
        debug_assert!(state == ConnState::Connected || state == ConnState::Disconnecting);

        *self.state.lock().unwrap() = ConnState::Disconnected;
        self.channel.lock().unwrap().disable_all();
        let _ = self.event_loop.update_channel(&self.channel);

        if let Some(cb) = self.close_cb.lock().unwrap().as_ref() {
            cb(self.clone());
        }
    }

    fn handle_error(self: Arc<Connection>) {
        if let Ok(Some(e)) = self.stream.lock().unwrap().take_error() {
            error!("connection[{}] socket error: {}", self.name, e);
        }
    }
}
