mod errors;
mod event_loop;
mod scoped_deadline;
mod stream_handler;
mod timer;

pub use {
    errors::ReactorError,
    event_loop::EventLoop,
    scoped_deadline::ScopedDeadline,
    stream_handler::{StreamCallback, StreamInterest},
    timer::{TimerCallback, TimerId, TimerType},
};
