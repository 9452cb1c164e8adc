use std::time;

pub struct ScopedDeadline {
    tag: String,
    start: time::Instant,
    deadline: time::Duration,
}

impl ScopedDeadline {
    pub fn new<T: AsRef<str>>(tag: T, deadline: time::Duration) -> Self {
        Self {
            tag: tag.as_ref().to_owned(),
            start: time::Instant::now(),
            deadline,
        }
    }
}

impl Drop for ScopedDeadline {
    fn drop(&mut self) {
        let dur = self.start.elapsed();
        if dur > self.deadline {
            tracing::warn!(
                "{} overran its {}ms deadline by {}ms",
                self.tag,
                self.deadline.as_millis(),
                (dur - self.deadline).as_millis()
            );
        } else {
            tracing::debug!("{} completed in {}us", self.tag, dur.as_micros());
        }
    }
}
