use std::{
    io,
    os::fd::RawFd,
    time::{Duration, Instant},
};

use mio::{Token, unix::SourceFd};

use crate::{
    errors::ReactorError,
    scoped_deadline::ScopedDeadline,
    stream_handler::{
        StreamCallback, StreamCollection, StreamInterest, StreamRegistration, stream_at_eof,
    },
    timer::{Timer, TimerCallback, TimerCollection, TimerId, TimerType},
};

const EVENTS_CAPACITY: usize = 1024;
const DISPATCH_DEADLINE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
    Stopping,
}

// Readiness snapshot for one pass, taken before any callback runs. Serials
// pin each dispatch to the registration live at snapshot time, so an entry
// removed or replaced by an earlier callback in the same pass is skipped.
struct ReadyStream {
    fd: RawFd,
    read_serial: Option<u64>,
    write_serial: Option<u64>,
}

pub struct EventLoop {
    poll: mio::Poll,
    events: mio::Events,
    streams: StreamCollection,
    timers: TimerCollection,
    next_timer_id: TimerId,
    next_serial: u64,
    state: LoopState,
}

impl EventLoop {
    pub fn new() -> Result<Self, ReactorError> {
        Ok(Self {
            poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(EVENTS_CAPACITY),
            streams: StreamCollection::new(),
            timers: TimerCollection::new(),
            next_timer_id: 0,
            next_serial: 0,
            state: LoopState::Idle,
        })
    }

    // streams

    pub fn add_read_stream(
        &mut self,
        fd: RawFd,
        callback: StreamCallback,
    ) -> Result<(), ReactorError> {
        self.add_stream(fd, StreamInterest::Read, callback)
    }

    pub fn add_write_stream(
        &mut self,
        fd: RawFd,
        callback: StreamCallback,
    ) -> Result<(), ReactorError> {
        self.add_stream(fd, StreamInterest::Write, callback)
    }

    pub fn remove_read_stream(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        self.remove_interest(fd, StreamInterest::Read)
    }

    pub fn remove_write_stream(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        self.remove_interest(fd, StreamInterest::Write)
    }

    /// Removes both interests if present. Never fails, registered or not.
    pub fn remove_stream(&mut self, fd: RawFd) {
        for interest in [StreamInterest::Read, StreamInterest::Write] {
            match self.remove_interest(fd, interest) {
                Ok(()) | Err(ReactorError::NotRegistered { .. }) => {}
                Err(e) => tracing::warn!("failed to remove {} interest for fd={}. {}", interest, fd, e),
            }
        }
    }

    fn add_stream(
        &mut self,
        fd: RawFd,
        interest: StreamInterest,
        callback: StreamCallback,
    ) -> Result<(), ReactorError> {
        if fd < 0 {
            return Err(ReactorError::InvalidHandle(fd));
        }

        let serial = self.next_serial;
        self.next_serial += 1;

        let entry = self.streams.entry(fd).or_default();
        let prior_interests = entry.mio_interests();

        // one live registration per (fd, interest): re-adding releases the
        // previous callback before the new one is installed
        if let Some(replaced) = entry.slot_mut(interest).replace(StreamRegistration {
            serial,
            callback: Some(callback),
        }) {
            tracing::debug!(
                "replacing {} registration serial={} for fd={}",
                interest,
                replaced.serial,
                fd
            );
        }

        let wanted = match interest {
            StreamInterest::Read => mio::Interest::READABLE,
            StreamInterest::Write => mio::Interest::WRITABLE,
        };

        let result = match prior_interests {
            None => self
                .poll
                .registry()
                .register(&mut SourceFd(&fd), Token(fd as usize), wanted),
            Some(existing) => self.poll.registry().reregister(
                &mut SourceFd(&fd),
                Token(fd as usize),
                existing | wanted,
            ),
        };

        if let Err(e) = result {
            // do not keep a callback the poller will never notify
            if let Some(entry) = self.streams.get_mut(&fd) {
                entry.slot_mut(interest).take();
                if entry.mio_interests().is_none() {
                    self.streams.remove(&fd);
                }
            }
            return Err(Self::registration_error(fd, e));
        }

        tracing::debug!("added {} registration serial={} for fd={}", interest, serial, fd);
        Ok(())
    }

    fn remove_interest(
        &mut self,
        fd: RawFd,
        interest: StreamInterest,
    ) -> Result<(), ReactorError> {
        let Some(entry) = self.streams.get_mut(&fd) else {
            return Err(ReactorError::NotRegistered { fd, interest });
        };

        if entry.slot_mut(interest).take().is_none() {
            return Err(ReactorError::NotRegistered { fd, interest });
        }

        let remaining = entry.mio_interests();
        match remaining {
            Some(interests) => self
                .poll
                .registry()
                .reregister(&mut SourceFd(&fd), Token(fd as usize), interests)
                .map_err(|e| Self::registration_error(fd, e))?,
            None => {
                self.streams.remove(&fd);
                self.poll
                    .registry()
                    .deregister(&mut SourceFd(&fd))
                    .map_err(|e| Self::registration_error(fd, e))?;
            }
        }

        tracing::debug!("removed {} registration for fd={}", interest, fd);
        Ok(())
    }

    fn registration_error(fd: RawFd, e: io::Error) -> ReactorError {
        if e.raw_os_error() == Some(libc::EBADF) {
            ReactorError::InvalidHandle(fd)
        } else {
            ReactorError::Io(e)
        }
    }

    // timers

    pub fn add_timer(&mut self, delta: Duration, callback: TimerCallback) -> TimerId {
        self.schedule_timer(delta, TimerType::FireOnce, callback)
    }

    pub fn add_periodic_timer(&mut self, delta: Duration, callback: TimerCallback) -> TimerId {
        self.schedule_timer(delta, TimerType::Periodic, callback)
    }

    /// No-op for ids that are unknown or already cancelled.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.remove(&id) {
            tracing::debug!("cancelled timer:{}", timer);
        }
    }

    pub fn is_timer_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    fn schedule_timer(
        &mut self,
        delta: Duration,
        timer_type: TimerType,
        callback: TimerCallback,
    ) -> TimerId {
        let id = self.next_timer_id;
        self.next_timer_id += 1;

        let timer = Timer::new(id, delta, timer_type, callback);
        tracing::debug!("scheduled timer:{}", timer);
        self.timers.insert(id, timer);

        id
    }

    // driver

    pub fn is_running(&self) -> bool {
        self.state != LoopState::Idle
    }

    /// One wait-then-dispatch pass. Returns immediately when nothing is
    /// registered; never loops internally.
    pub fn tick(&mut self) -> Result<(), ReactorError> {
        if self.streams.is_empty() && self.timers.is_empty() {
            return Ok(());
        }

        let was_idle = self.state == LoopState::Idle;
        if was_idle {
            self.state = LoopState::Running;
        }

        let result = self.pass();

        // a stop requested inside a nested tick is left for the outer run
        if was_idle {
            self.state = LoopState::Idle;
        }

        result
    }

    /// Repeats passes until `stop()` is observed or no registrations remain.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        tracing::debug!("event loop running");
        self.state = LoopState::Running;

        let mut result = Ok(());
        while self.state == LoopState::Running {
            if self.streams.is_empty() && self.timers.is_empty() {
                tracing::debug!("no registrations left to wait on");
                break;
            }

            if let Err(e) = self.pass() {
                result = Err(e);
                break;
            }
        }

        self.state = LoopState::Idle;
        tracing::debug!("event loop stopped");

        result
    }

    /// Requests the current or next pass to be the last. Safe to call from
    /// within a dispatched callback; no-op while the loop is idle.
    pub fn stop(&mut self) {
        if self.state == LoopState::Running {
            self.state = LoopState::Stopping;
        }
    }

    fn pass(&mut self) -> Result<(), ReactorError> {
        // wait bound: nearest timer deadline, or block on streams alone
        let timeout = self
            .timers
            .values()
            .map(|timer| timer.deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e.into());
            }
            self.events.clear();
        }

        // snapshot everything due before any callback runs; callbacks mutate
        // the live tables and dispatch re-validates against them by identity
        let ready: Vec<ReadyStream> = self
            .events
            .iter()
            .map(|event| {
                let fd = event.token().0 as RawFd;
                let entry = self.streams.get(&fd);
                let read_ready = event.is_readable() || event.is_read_closed();
                let write_ready = event.is_writable() || event.is_write_closed();
                ReadyStream {
                    fd,
                    read_serial: entry
                        .filter(|_| read_ready)
                        .and_then(|entry| entry.registration(StreamInterest::Read))
                        .map(|registration| registration.serial),
                    write_serial: entry
                        .filter(|_| write_ready)
                        .and_then(|entry| entry.registration(StreamInterest::Write))
                        .map(|registration| registration.serial),
                }
            })
            .collect();

        let now = Instant::now();
        let due: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        self.dispatch_streams(ready);
        self.dispatch_timers(due);

        Ok(())
    }

    fn dispatch_streams(&mut self, ready: Vec<ReadyStream>) {
        for stream in ready {
            if let Some(serial) = stream.read_serial {
                self.dispatch_stream_interest(stream.fd, StreamInterest::Read, serial);
            }
            if let Some(serial) = stream.write_serial {
                self.dispatch_stream_interest(stream.fd, StreamInterest::Write, serial);
            }
        }
    }

    fn dispatch_stream_interest(&mut self, fd: RawFd, interest: StreamInterest, serial: u64) {
        let Some(mut callback) = self
            .streams
            .get_mut(&fd)
            .and_then(|entry| entry.slot_mut(interest).as_mut())
            .filter(|registration| registration.serial == serial)
            .and_then(|registration| registration.callback.take())
        else {
            return;
        };

        // a stream past end-of-stream is never surfaced as ready: the
        // interest is dropped instead of invoking user code on it
        if stream_at_eof(fd) {
            tracing::debug!("fd={} reached end-of-stream. dropping {} interest", fd, interest);
            match self.remove_interest(fd, interest) {
                Ok(()) | Err(ReactorError::NotRegistered { .. }) => {}
                Err(e) => {
                    tracing::warn!("failed to drop {} interest for fd={}. {}", interest, fd, e)
                }
            }
            return;
        }

        {
            let _dl = ScopedDeadline::new(
                format!("stream-cb-dl-{}-{}", interest, fd),
                DISPATCH_DEADLINE,
            );
            callback(self, fd);
        }

        // hand the callback back unless it removed or replaced its own
        // registration
        if let Some(registration) = self
            .streams
            .get_mut(&fd)
            .and_then(|entry| entry.slot_mut(interest).as_mut())
            .filter(|registration| registration.serial == serial)
        {
            registration.callback = Some(callback);
        }
    }

    fn dispatch_timers(&mut self, due: Vec<TimerId>) {
        for id in due {
            // a timer cancelled earlier in this pass must not fire
            let Some(mut callback) = self
                .timers
                .get_mut(&id)
                .and_then(|timer| timer.callback.take())
            else {
                continue;
            };

            {
                let _dl = ScopedDeadline::new(format!("timer-cb-dl-{}", id), DISPATCH_DEADLINE);
                callback(self, id);
            }

            let mut fired_once = false;
            if let Some(timer) = self.timers.get_mut(&id) {
                match timer.timer_type {
                    TimerType::FireOnce => fired_once = true,
                    TimerType::Periodic => {
                        timer.rearm();
                        timer.callback = Some(callback);
                    }
                }
            }

            // one-shot timers cancel themselves after firing
            if fired_once {
                self.timers.remove(&id);
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let fds: Vec<RawFd> = self.streams.keys().copied().collect();
        for fd in fds {
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                tracing::warn!("failed to deregister fd={} during teardown. {}", fd, e);
            }
        }
    }
}
