mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reactor_net::config::Config;

#[test]
fn timers_fire_in_deadline_order_and_respect_cancellation() {
    let (event_loop, handle) = common::spawn_event_loop(Config::default());

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let order_a = order.clone();
    event_loop.run_after(Duration::from_millis(30), move || {
        order_a.lock().unwrap().push("a-30ms");
    });

    let order_b = order.clone();
    event_loop.run_after(Duration::from_millis(10), move || {
        order_b.lock().unwrap().push("b-10ms");
    });

    let order_c = order.clone();
    let cancel_me = event_loop.run_after(Duration::from_millis(20), move || {
        order_c.lock().unwrap().push("c-20ms");
    });

    event_loop.cancel_timer(cancel_me);

    std::thread::sleep(Duration::from_millis(60));

    assert_eq!(*order.lock().unwrap(), vec!["b-10ms", "a-30ms"]);

    event_loop.quit();
    handle.join().unwrap();
}
