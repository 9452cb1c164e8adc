use std::{
    fmt::Display,
    time::{Duration, Instant},
};

use crate::event_loop::EventLoop;

pub type TimerId = usize;

/// Invoked with the driving loop and the id of the firing timer.
pub type TimerCallback = Box<dyn FnMut(&mut EventLoop, TimerId)>;

// Iterated in id order, which is arming order: timers due within the same
// pass fire first-armed-first-fired.
pub(crate) type TimerCollection = std::collections::BTreeMap<TimerId, Timer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    Periodic,
    FireOnce,
}

pub(crate) struct Timer {
    id: TimerId,
    pub(crate) delta: Duration,
    pub(crate) timer_type: TimerType,
    pub(crate) deadline: Instant,
    pub(crate) callback: Option<TimerCallback>,
}

impl Timer {
    pub(crate) fn new(
        id: TimerId,
        delta: Duration,
        timer_type: TimerType,
        callback: TimerCallback,
    ) -> Self {
        Self {
            id,
            delta,
            timer_type,
            // measured from scheduling time, not from loop start
            deadline: Instant::now() + delta,
            callback: Some(callback),
        }
    }

    pub(crate) fn rearm(&mut self) {
        self.deadline = Instant::now() + self.delta;
    }
}

impl Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(id:{} type:'{}' period:{:?})",
            self.id,
            match self.timer_type {
                TimerType::FireOnce => "FireOnce",
                TimerType::Periodic => "Periodic",
            },
            self.delta,
        )
    }
}
