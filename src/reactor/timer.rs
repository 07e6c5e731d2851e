use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use log::error;
use slab::Slab;

use crate::sys::timerfd::{SetTimeFlags, TimerFd, TimerSpec};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerId(usize);

struct TimerData {
    callback: Box<dyn FnMut() + Send>,
    period: Option<Duration>,
    cancelled: bool,
}

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    key: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap; reverse so the earliest deadline (and, on a
    // tie, the lowest sequence number) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

const CLOCK_ROLLBACK_THRESHOLD: Duration = Duration::from_secs(3600);

/// Min-heap of timers keyed by monotonic deadline, driven by a single
/// `TimerFd` registered as a Channel on the owning loop. Cancellation is
/// lazy: `cancel` only flips a flag, the heap entry is discarded when it
/// rises to the top.
pub struct TimerService {
    timerfd: TimerFd,
    timers: Slab<TimerData>,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    previous_now: Instant,
}

impl TimerService {
    pub fn new() -> std::io::Result<TimerService> {
        Ok(TimerService {
            timerfd: TimerFd::new()?,
            timers: Slab::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
            previous_now: Instant::now(),
        })
    }

    pub fn timerfd(&self) -> &TimerFd {
        &self.timerfd
    }

    pub fn add_timer(
        &mut self,
        delay: Duration,
        recurring: Option<Duration>,
        callback: impl FnMut() + Send + 'static,
    ) -> TimerId {
        let deadline = Instant::now() + delay;
        let key = self.timers.insert(TimerData {
            callback: Box::new(callback),
            period: recurring,
            cancelled: false,
        });

        let seq = self.next_seq;
        self.next_seq += 1;

        let is_new_min = self
            .heap
            .peek()
            .map(|top| deadline < top.deadline)
            .unwrap_or(true);

        self.heap.push(HeapEntry { deadline, seq, key });

        if is_new_min {
            self.rearm(deadline);
        }

        TimerId(key)
    }

    pub fn cancel(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(id.0) {
            timer.cancelled = true;
        }
    }

    /// Called from the timer Channel's read callback once the fd is readable.
    pub fn handle_expiration(&mut self) {
        if let Err(e) = self.timerfd.read() {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                error!("timerfd read failed: {}", e);
            }
        }

        let now = Instant::now();

        let rolled_back = self.previous_now > now && self.previous_now.duration_since(now) > CLOCK_ROLLBACK_THRESHOLD;
        if rolled_back {
            error!("detected clock rollback, firing all scheduled timers");
        }

        self.previous_now = now;

        let mut expired = Vec::new();

        if rolled_back {
            while let Some(top) = self.heap.pop() {
                expired.push(top);
            }
        } else {
            while let Some(top) = self.heap.peek() {
                if top.deadline > now {
                    break;
                }
                expired.push(self.heap.pop().unwrap());
            }
        }

        for entry in expired {
            let recurring = {
                let timer = match self.timers.get(entry.key) {
                    Some(t) => t,
                    None => continue,
                };

                if timer.cancelled {
                    self.timers.remove(entry.key);
                    continue;
                }

                timer.period
            };

            if let Some(timer) = self.timers.get_mut(entry.key) {
                (timer.callback)();
            }

            match recurring {
                Some(period) => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.heap.push(HeapEntry {
                        deadline: now + period,
                        seq,
                        key: entry.key,
                    });
                }
                None => {
                    self.timers.remove(entry.key);
                }
            }
        }

        match self.heap.peek() {
            Some(top) => self.rearm(top.deadline),
            None => self.disarm(),
        }
    }

    fn rearm(&self, deadline: Instant) {
        let value = deadline.saturating_duration_since(Instant::now());
        let spec = TimerSpec {
            interval: Duration::new(0, 0),
            value: value.max(Duration::from_nanos(1)),
        };

        if let Err(e) = self.timerfd.settime(spec, SetTimeFlags::Default) {
            error!("failed to arm timerfd: {}", e);
        }
    }

    fn disarm(&self) {
        let spec = TimerSpec {
            interval: Duration::new(0, 0),
            value: Duration::new(0, 0),
        };

        if let Err(e) = self.timerfd.settime(spec, SetTimeFlags::Default) {
            error!("failed to disarm timerfd: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn timers_fire_in_deadline_order() {
        let mut svc = TimerService::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, delay) in [("a", 30), ("b", 10), ("c", 20)] {
            let order = order.clone();
            svc.add_timer(Duration::from_millis(delay), None, move || {
                order.lock().unwrap().push(label);
            });
        }

        std::thread::sleep(Duration::from_millis(40));
        svc.handle_expiration();

        assert_eq!(*order.lock().unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut svc = TimerService::new().unwrap();
        let fired = Arc::new(Mutex::new(false));

        let fired_clone = fired.clone();
        let id = svc.add_timer(Duration::from_millis(10), None, move || {
            *fired_clone.lock().unwrap() = true;
        });

        svc.cancel(id);

        std::thread::sleep(Duration::from_millis(20));
        svc.handle_expiration();

        assert!(!*fired.lock().unwrap());
    }
}
