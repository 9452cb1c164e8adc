use std::{fmt, io, os::fd::RawFd};

use crate::event_loop::EventLoop;

/// Invoked with the driving loop and the ready stream handle, once per
/// readiness notification.
pub type StreamCallback = Box<dyn FnMut(&mut EventLoop, RawFd)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamInterest {
    Read,
    Write,
}

impl fmt::Display for StreamInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

pub(crate) struct StreamRegistration {
    // pins dispatch to the registration live at snapshot time
    pub(crate) serial: u64,
    pub(crate) callback: Option<StreamCallback>,
}

/// Table entry for one stream handle. The fd carries a single native
/// registration holding the union of whichever interests are present.
#[derive(Default)]
pub(crate) struct StreamEntry {
    pub(crate) read: Option<StreamRegistration>,
    pub(crate) write: Option<StreamRegistration>,
}

impl StreamEntry {
    pub(crate) fn slot_mut(
        &mut self,
        interest: StreamInterest,
    ) -> &mut Option<StreamRegistration> {
        match interest {
            StreamInterest::Read => &mut self.read,
            StreamInterest::Write => &mut self.write,
        }
    }

    pub(crate) fn registration(&self, interest: StreamInterest) -> Option<&StreamRegistration> {
        match interest {
            StreamInterest::Read => self.read.as_ref(),
            StreamInterest::Write => self.write.as_ref(),
        }
    }

    pub(crate) fn mio_interests(&self) -> Option<mio::Interest> {
        let mut interests = None;
        if self.read.is_some() {
            interests = Some(mio::Interest::READABLE);
        }
        if self.write.is_some() {
            interests = Some(match interests {
                Some(existing) => existing | mio::Interest::WRITABLE,
                None => mio::Interest::WRITABLE,
            });
        }
        interests
    }
}

pub(crate) type StreamCollection = std::collections::HashMap<RawFd, StreamEntry>;

/// Observes whether the handle is at end-of-stream right now, without
/// consuming buffered data. Sockets report end-of-stream once the peer has
/// shut down and pending bytes are drained; non-socket handles are never
/// reported as ended here.
pub(crate) fn stream_at_eof(fd: RawFd) -> bool {
    let mut probe = [0u8; 1];
    loop {
        let n = unsafe {
            libc::recv(
                fd,
                probe.as_mut_ptr() as *mut libc::c_void,
                probe.len(),
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };
        match n {
            0 => return true,
            1.. => return false,
            _ => {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // EAGAIN, ENOTSOCK and friends: nothing observable yet
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Write,
        os::{fd::AsRawFd, unix::net::UnixStream},
    };

    #[test]
    fn eof_probe_observes_peer_shutdown() {
        let (a, b) = UnixStream::pair().expect("failed to create stream pair");
        assert!(!stream_at_eof(a.as_raw_fd()), "open stream reported as ended");

        drop(b);
        assert!(
            stream_at_eof(a.as_raw_fd()),
            "closed peer not observed as end-of-stream"
        );
    }

    #[test]
    fn eof_probe_sees_buffered_data_before_shutdown() {
        let (a, mut b) = UnixStream::pair().expect("failed to create stream pair");
        b.write_all(b"x").expect("failed to write probe byte");
        drop(b);

        assert!(
            !stream_at_eof(a.as_raw_fd()),
            "buffered data must win over peer shutdown"
        );
    }
}
