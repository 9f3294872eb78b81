use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bus transport fault at {addr:#x}: {reason}")]
    Transport { addr: u32, reason: String },
    #[error("register {field} at {addr:#x}: wrote {expected:#x}, read back {actual:#x}")]
    RegisterMismatch {
        field: &'static str,
        addr: u32,
        expected: u32,
        actual: u32,
    },
    #[error("cannot decode capture {}: {reason}", path.display())]
    CaptureDecode { path: PathBuf, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("link transmit on {iface}: {reason}")]
    Link { iface: String, reason: String },
}

/// Coarse classification of an [`Error`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Io,
    Transport,
    RegisterMismatch,
    CaptureDecode,
    InvalidArgument,
    Link,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::RegisterMismatch { .. } => ErrorKind::RegisterMismatch,
            Error::CaptureDecode { .. } => ErrorKind::CaptureDecode,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Link { .. } => ErrorKind::Link,
        }
    }

    pub(crate) fn transport(addr: u32, reason: impl Into<String>) -> Self {
        Error::Transport {
            addr,
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CaptureDecode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
