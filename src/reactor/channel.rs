use std::any::Any;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use crate::epoll::{EpollOpt, Ready, Token};

/// Poller-tracked lifecycle state of a Channel's epoll registration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChannelState {
    New,
    Added,
    Deleted,
}

pub type ChannelHandle = Arc<Mutex<Channel>>;

/// Binds one descriptor to its interested-event mask and callbacks.
///
/// Shared via `Arc<Mutex<_>>` (rather than the teacher's loop-owned raw
/// pointer) so the same Channel can be reached both from the Poller's
/// registration map and from the Connection that owns it, while still
/// being `Send`/`Sync` for `Arc<Connection>`.
pub struct Channel {
    fd: RawFd,
    token: Token,
    interest: Ready,
    revents: Ready,
    state: ChannelState,
    tie: Option<Weak<dyn Any + Send + Sync>>,
    event_handling: bool,
    read_cb: Option<Box<dyn FnMut(Instant) + Send>>,
    write_cb: Option<Box<dyn FnMut() + Send>>,
    close_cb: Option<Box<dyn FnMut() + Send>>,
    error_cb: Option<Box<dyn FnMut() + Send>>,
}

impl Channel {
    pub fn new(fd: RawFd) -> ChannelHandle {
        Arc::new(Mutex::new(Channel {
            fd,
            token: Token(fd as usize),
            interest: Ready::empty(),
            revents: Ready::empty(),
            state: ChannelState::New,
            tie: None,
            event_handling: false,
            read_cb: None,
            write_cb: None,
            close_cb: None,
            error_cb: None,
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn interest(&self) -> Ready {
        self.interest
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    pub fn set_revents(&mut self, revents: Ready) {
        self.revents = revents;
    }

    /// Read interest is always edge-triggered; a fd with no write interest
    /// registered gets level-triggered mode instead (epoll has no way to
    /// pick the trigger mode per event kind on one registration).
    pub fn opts(&self) -> EpollOpt {
        if self.interest.is_readable() {
            EpollOpt::edge()
        } else {
            EpollOpt::level()
        }
    }

    pub fn set_read_callback(&mut self, cb: impl FnMut(Instant) + Send + 'static) {
        self.read_cb = Some(Box::new(cb));
    }

    pub fn set_write_callback(&mut self, cb: impl FnMut() + Send + 'static) {
        self.write_cb = Some(Box::new(cb));
    }

    pub fn set_close_callback(&mut self, cb: impl FnMut() + Send + 'static) {
        self.close_cb = Some(Box::new(cb));
    }

    pub fn set_error_callback(&mut self, cb: impl FnMut() + Send + 'static) {
        self.error_cb = Some(Box::new(cb));
    }

    pub fn tie(&mut self, owner: &Arc<dyn Any + Send + Sync>) {
        self.tie = Some(Arc::downgrade(owner));
    }

    pub fn enable_reading(&mut self) {
        self.interest.insert(Ready::readable());
    }

    pub fn disable_reading(&mut self) {
        self.interest.remove(Ready::readable());
    }

    pub fn enable_writing(&mut self) {
        self.interest.insert(Ready::writable());
    }

    pub fn disable_writing(&mut self) {
        self.interest.remove(Ready::writable());
    }

    pub fn disable_all(&mut self) {
        self.interest = Ready::empty();
    }

    pub fn is_writing(&self) -> bool {
        self.interest.is_writable()
    }

    pub fn is_reading(&self) -> bool {
        self.interest.is_readable()
    }

    pub fn is_none_event(&self) -> bool {
        self.interest.is_empty()
    }

    pub fn handle_event(&mut self, now: Instant) {
        if let Some(tie) = &self.tie {
            if tie.upgrade().is_none() {
                return;
            }
        }

        self.handle_event_with_guard(now);
    }

    fn handle_event_with_guard(&mut self, now: Instant) {
        debug_assert!(!self.event_handling, "Channel::handle_event called re-entrantly");
        self.event_handling = true;

        if self.revents.is_hup() && !self.revents.is_readable() {
            if let Some(cb) = &mut self.close_cb {
                cb();
            }
        }

        if self.revents.is_error() {
            if let Some(cb) = &mut self.error_cb {
                cb();
            }
        }

        if self.revents.is_readable() {
            if let Some(cb) = &mut self.read_cb {
                cb(now);
            }
        }

        if self.revents.is_writable() {
            if let Some(cb) = &mut self.write_cb {
                cb();
            }
        }

        self.event_handling = false;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        debug_assert!(!self.event_handling);
        debug_assert!(self.state != ChannelState::Added);
    }
}
