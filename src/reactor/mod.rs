pub mod channel;
pub mod event_loop;
pub mod loop_pool;
pub mod poller;
pub mod timer;

pub use channel::{Channel, ChannelHandle, ChannelState};
pub use event_loop::EventLoop;
pub use loop_pool::LoopPool;
pub use poller::Poller;
pub use timer::{TimerId, TimerService};
