use std::time::Duration;

use indexmap::IndexMap;
use log::error;

use crate::epoll::{Epoll, Events, Token};
use crate::error::Result;

use super::channel::{ChannelHandle, ChannelState};

const INITIAL_EVENTS_CAPACITY: usize = 64;

/// Thin stateful layer over the raw epoll wrapper: owns the fd-to-Channel
/// map and the per-Channel poller-state tag the wrapper itself doesn't
/// track.
pub struct Poller {
    epoll: Epoll,
    events: Events,
    channels: IndexMap<Token, ChannelHandle>,
}

impl Poller {
    pub fn new() -> Result<Poller> {
        Ok(Poller {
            epoll: Epoll::new()?,
            events: Events::with_capacity(INITIAL_EVENTS_CAPACITY),
            channels: IndexMap::new(),
        })
    }

    pub fn update_channel(&mut self, handle: &ChannelHandle) -> Result<()> {
        let (fd, token, interest, opts, state) = {
            let ch = handle.lock().unwrap();
            (ch.fd(), ch.token(), ch.interest(), ch.opts(), ch.state())
        };

        match state {
            ChannelState::New => {
                if !interest.is_empty() {
                    self.epoll.add(&fd, token, interest, opts)?;
                    handle.lock().unwrap().set_state(ChannelState::Added);
                    self.channels.insert(token, handle.clone());
                }
            }
            ChannelState::Added => {
                if interest.is_empty() {
                    self.epoll.delete(&fd)?;
                    handle.lock().unwrap().set_state(ChannelState::Deleted);
                } else {
                    self.epoll.modify(&fd, token, interest, opts)?;
                }
            }
            ChannelState::Deleted => {
                self.epoll.add(&fd, token, interest, opts)?;
                handle.lock().unwrap().set_state(ChannelState::Added);
            }
        }

        Ok(())
    }

    pub fn remove_channel(&mut self, handle: &ChannelHandle) -> Result<()> {
        let (fd, token, state) = {
            let ch = handle.lock().unwrap();
            (ch.fd(), ch.token(), ch.state())
        };

        if state == ChannelState::Added {
            self.epoll.delete(&fd)?;
        }

        handle.lock().unwrap().set_state(ChannelState::New);
        self.channels.swap_remove(&token);

        Ok(())
    }

    pub fn has_channel(&self, token: Token) -> bool {
        self.channels.contains_key(&token)
    }

    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<ChannelHandle>> {
        let n = self.epoll.wait(&mut self.events, timeout)?;

        let mut active = Vec::with_capacity(n);

        for event in self.events.iter() {
            match self.channels.get(&event.token()) {
                Some(handle) => {
                    handle.lock().unwrap().set_revents(event.kind());
                    active.push(handle.clone());
                }
                None => {
                    error!("poller reported unknown token {:?}", event.token());
                }
            }
        }

        // amortize growth: a fully-used event array likely means more fds
        // were ready than fit, so grow it for the next iteration.
        if n == self.events.capacity() {
            self.events = Events::with_capacity(self.events.capacity() * 2);
        }

        Ok(active)
    }
}
