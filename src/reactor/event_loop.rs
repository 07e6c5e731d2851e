use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;
use log::{error, warn};

use crate::config::Config;
use crate::error::Result;
use crate::sys::eventfd::EventFd;

use super::channel::{Channel, ChannelHandle};
use super::poller::Poller;
use super::timer::{TimerId, TimerService};

type Task = Box<dyn FnOnce() + Send>;

/// Single-thread reactor: owns a Poller, a TimerService, a wakeup
/// descriptor and a pending-task queue. Exactly one EventLoop runs per
/// thread; cross-thread entry is only safe through `run_in_loop` and
/// `queue_in_loop`.
pub struct EventLoop {
    thread_id: ThreadId,
    poller: Mutex<Poller>,
    timer_service: Mutex<TimerService>,
    wakeup_fd: EventFd,
    wakeup_channel: ChannelHandle,
    timer_channel: ChannelHandle,
    pending: ConcurrentQueue<Task>,
    draining: AtomicBool,
    quit: AtomicBool,
    iteration: AtomicI64,
    config: Config,
}

impl EventLoop {
    pub fn new(config: Config) -> Result<EventLoop> {
        let mut poller = Poller::new()?;

        let wakeup_fd = EventFd::new()?;
        let wakeup_channel = Channel::new(wakeup_fd.as_raw_fd());
        {
            let mut ch = wakeup_channel.lock().unwrap();
            ch.enable_reading();
        }
        poller.update_channel(&wakeup_channel)?;

        let timer_service = TimerService::new()?;
        let timer_channel = Channel::new(timer_service.timerfd().as_raw_fd());
        {
            let mut ch = timer_channel.lock().unwrap();
            ch.enable_reading();
        }
        poller.update_channel(&timer_channel)?;

        Ok(EventLoop {
            thread_id: std::thread::current().id(),
            poller: Mutex::new(poller),
            timer_service: Mutex::new(timer_service),
            wakeup_fd,
            wakeup_channel,
            timer_channel,
            pending: ConcurrentQueue::unbounded(),
            draining: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            iteration: AtomicI64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn assert_in_loop_thread(&self) {
        debug_assert!(self.is_in_loop_thread(), "called from outside the owning loop thread");
    }

    pub fn iteration(&self) -> i64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn run(&self) {
        while !self.quit.load(Ordering::Acquire) {
            let active = match self.poller.lock().unwrap().poll(Some(self.config.poll_timeout)) {
                Ok(active) => active,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::Interrupted {
                        error!("poller error: {}", e);
                    }
                    Vec::new()
                }
            };

            let now = Instant::now();

            for handle in &active {
                if Arc::ptr_eq(handle, &self.wakeup_channel) {
                    self.drain_wakeup();
                } else if Arc::ptr_eq(handle, &self.timer_channel) {
                    self.timer_service.lock().unwrap().handle_expiration();
                } else {
                    handle.lock().unwrap().handle_event(now);
                }
            }

            self.run_pending_tasks();

            self.iteration.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn drain_wakeup(&self) {
        if let Err(e) = self.wakeup_fd.read() {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                warn!("failed to drain wakeup eventfd: {}", e);
            }
        }
    }

    fn run_pending_tasks(&self) {
        self.draining.store(true, Ordering::Release);

        let mut batch = Vec::new();
        while let Ok(task) = self.pending.pop() {
            batch.push(task);
        }

        for task in batch {
            task();
        }

        self.draining.store(false, Ordering::Release);
    }

    pub fn run_in_loop(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            f();
        } else {
            self.queue_in_loop(f);
        }
    }

    pub fn queue_in_loop(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.pending.push(Box::new(f));

        if !self.is_in_loop_thread() || self.draining.load(Ordering::Acquire) {
            if let Err(e) = self.wakeup_fd.write(1) {
                warn!("failed to wake loop: {}", e);
            }
        }
    }

    pub fn run_after(&self, delay: Duration, cb: impl FnMut() + Send + 'static) -> TimerId {
        let id = self.timer_service.lock().unwrap().add_timer(delay, None, cb);
        self.rearm_timer_wake();
        id
    }

    pub fn run_every(&self, period: Duration, cb: impl FnMut() + Send + 'static) -> TimerId {
        let id = self.timer_service.lock().unwrap().add_timer(period, Some(period), cb);
        self.rearm_timer_wake();
        id
    }

    pub fn run_at(&self, deadline: Instant, cb: impl FnMut() + Send + 'static) -> TimerId {
        let delay = deadline.saturating_duration_since(Instant::now());
        self.run_after(delay, cb)
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.timer_service.lock().unwrap().cancel(id);
    }

    fn rearm_timer_wake(&self) {
        if !self.is_in_loop_thread() {
            if let Err(e) = self.wakeup_fd.write(1) {
                warn!("failed to wake loop after scheduling timer: {}", e);
            }
        }
    }

    pub fn update_channel(&self, handle: &ChannelHandle) -> Result<()> {
        self.assert_in_loop_thread();
        self.poller.lock().unwrap().update_channel(handle)
    }

    pub fn remove_channel(&self, handle: &ChannelHandle) -> Result<()> {
        self.assert_in_loop_thread();
        self.poller.lock().unwrap().remove_channel(handle)
    }

    pub fn has_channel(&self, token: crate::epoll::Token) -> bool {
        self.poller.lock().unwrap().has_channel(token)
    }

    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);

        if !self.is_in_loop_thread() {
            let _ = self.wakeup_fd.write(1);
        }
    }
}
