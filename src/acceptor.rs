use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use log::{error, info, warn};

use crate::error::Result;
use crate::net::tcp::{TcpListener, TcpStream};
use crate::reactor::channel::{Channel, ChannelHandle};
use crate::reactor::event_loop::EventLoop;

type NewConnectionCallback = Box<dyn Fn(TcpStream, std::net::SocketAddr) + Send + Sync>;

/// Listening socket on the base loop. Accepts in a loop on every readable
/// event (the listening fd is level-triggered) until `accept` reports
/// WouldBlock, handing each accepted stream to the new-connection callback.
pub struct Acceptor {
    event_loop: Arc<EventLoop>,
    listener: TcpListener,
    channel: ChannelHandle,
    listening: std::sync::atomic::AtomicBool,
    new_connection_cb: std::sync::Mutex<Option<NewConnectionCallback>>,
}

impl Acceptor {
    pub fn new(event_loop: Arc<EventLoop>, listener: TcpListener) -> Arc<Acceptor> {
        let channel = Channel::new(listener.as_raw_fd());

        let acceptor = Arc::new(Acceptor {
            event_loop,
            listener,
            channel,
            listening: std::sync::atomic::AtomicBool::new(false),
            new_connection_cb: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&acceptor);
        acceptor.channel.lock().unwrap().set_read_callback(move |_now| {
            if let Some(this) = weak.upgrade() {
                this.handle_read();
            }
        });

        acceptor
    }

    pub fn set_new_connection_callback(
        &self,
        cb: impl Fn(TcpStream, std::net::SocketAddr) + Send + Sync + 'static,
    ) {
        *self.new_connection_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn listen(&self) -> Result<()> {
        self.event_loop.assert_in_loop_thread();
        self.listening.store(true, std::sync::atomic::Ordering::Release);

        self.channel.lock().unwrap().enable_reading();
        self.event_loop.update_channel(&self.channel)?;

        info!("acceptor listening on {:?}", self.listener.local_addr());

        Ok(())
    }

    fn handle_read(&self) {
        self.event_loop.assert_in_loop_thread();

        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Some(cb) = self.new_connection_cb.lock().unwrap().as_ref() {
                        cb(stream, addr);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.channel.lock().unwrap().disable_all();
        if let Err(e) = self.event_loop.remove_channel(&self.channel) {
            error!("failed to remove acceptor channel: {}", e);
        }
    }
}
