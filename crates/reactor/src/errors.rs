use std::{error, fmt, io, os::fd::RawFd};

use crate::stream_handler::StreamInterest;

#[derive(Debug)]
pub enum ReactorError {
    /// Removal of an interest that was never added. Recoverable.
    NotRegistered { fd: RawFd, interest: StreamInterest },
    /// Operation on a handle the OS does not recognize.
    InvalidHandle(RawFd),
    Io(io::Error),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered { fd, interest } => {
                write!(f, "no {interest} registration exists for fd={fd}")
            }
            Self::InvalidHandle(fd) => write!(f, "invalid stream handle fd={fd}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ReactorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
