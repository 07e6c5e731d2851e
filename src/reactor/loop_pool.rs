use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use log::error;

use crate::config::Config;
use crate::error::Result;

use super::event_loop::EventLoop;

/// Fixed set of worker EventLoops, each on its own thread, fanned out
/// to round-robin or by a caller-supplied hash. Degenerates to the base
/// loop with zero workers.
pub struct LoopPool {
    base_loop: Arc<EventLoop>,
    name: String,
    started: AtomicBool,
    threads: Vec<JoinHandle<()>>,
    loops: Vec<Arc<EventLoop>>,
    next: AtomicUsize,
}

impl LoopPool {
    pub fn new(base_loop: Arc<EventLoop>, name: impl Into<String>) -> LoopPool {
        LoopPool {
            base_loop,
            name: name.into(),
            started: AtomicBool::new(false),
            threads: Vec::new(),
            loops: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn start(
        &mut self,
        thread_num: usize,
        config: Config,
        init: impl Fn(&Arc<EventLoop>) + Send + Sync + 'static,
    ) -> Result<()> {
        assert!(!self.started.load(Ordering::Acquire), "LoopPool already started");
        self.base_loop.assert_in_loop_thread();

        let init = Arc::new(init);
        let barrier = Arc::new(Barrier::new(thread_num + 1));
        let slots: Arc<Vec<std::sync::Mutex<Option<Arc<EventLoop>>>>> =
            Arc::new((0..thread_num).map(|_| std::sync::Mutex::new(None)).collect());

        for i in 0..thread_num {
            let barrier = barrier.clone();
            let slots = slots.clone();
            let init = init.clone();
            let config = config.clone();
            let thread_name = format!("{}{}", self.name, i);

            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    let event_loop = match EventLoop::new(config) {
                        Ok(l) => Arc::new(l),
                        Err(e) => {
                            error!("worker loop failed to start: {}", e);
                            barrier.wait();
                            return;
                        }
                    };

                    init(&event_loop);
                    *slots[i].lock().unwrap() = Some(event_loop.clone());

                    barrier.wait();

                    event_loop.run();
                })
                .expect("failed to spawn worker thread");

            self.threads.push(handle);
        }

        if thread_num == 0 {
            init(&self.base_loop);
        }

        barrier.wait();

        for slot in slots.iter() {
            if let Some(l) = slot.lock().unwrap().take() {
                self.loops.push(l);
            }
        }

        self.started.store(true, Ordering::Release);

        Ok(())
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn next(&self) -> Arc<EventLoop> {
        self.base_loop.assert_in_loop_thread();

        if self.loops.is_empty() {
            return self.base_loop.clone();
        }

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[idx].clone()
    }

    pub fn for_hash(&self, hash: usize) -> Arc<EventLoop> {
        self.base_loop.assert_in_loop_thread();

        if self.loops.is_empty() {
            return self.base_loop.clone();
        }

        self.loops[hash % self.loops.len()].clone()
    }

    pub fn all_loops(&self) -> Vec<Arc<EventLoop>> {
        if self.loops.is_empty() {
            vec![self.base_loop.clone()]
        } else {
            self.loops.clone()
        }
    }
}
