use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use reactor_net::config::Config;
use reactor_net::reactor::EventLoop;

/// `EventLoop::new` records the constructing thread as its owner, so the
/// loop must be both built and run on the same spawned thread rather than
/// constructed here and handed off afterward.
pub fn spawn_event_loop(config: Config) -> (Arc<EventLoop>, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let event_loop = Arc::new(EventLoop::new(config).expect("event loop construction"));
        tx.send(event_loop.clone()).expect("send event loop handle");
        event_loop.run();
    });

    let event_loop = rx.recv().expect("receive event loop handle");
    (event_loop, handle)
}
