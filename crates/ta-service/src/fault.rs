//! Fault taxonomy for the service loop.
//!
//! Every command failure falls into one of two buckets. A [`SoftFault`] is a
//! request the service refuses without changing any state: wrong parameter
//! layout, a command issued out of sequence, a bad file name. The message is
//! still echoed back so the peer stays in sync. A [`FatalFault`] means the
//! exchange itself can no longer be trusted (stream I/O failure, a breached
//! size cap, a session-store failure) and the loop must stop.

use thiserror::Error;

use ta_proto::ProtocolError;

use crate::session::SessionError;

/// A rejected request. The service logs it, leaves state untouched, and
/// echoes the message back.
#[derive(Debug, Error)]
pub enum SoftFault {
    #[error("no active session")]
    NoSession,

    #[error("a file is already open in this session")]
    FileAlreadyOpen,

    #[error("no file is open in this session")]
    FileNotOpen,

    #[error("parameter layout {found:#06x} does not match the command's shape")]
    BadParamTypes { found: u16 },

    #[error("file name is empty, not UTF-8, or contains a path component")]
    BadFileName,
}

/// A failure after which the service loop cannot continue.
#[derive(Debug, Error)]
pub enum FatalFault {
    #[error("transport failure: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store failure: {0}")]
    Session(#[from] SessionError),
}

/// Either kind of fault, as returned by the per-command handlers.
#[derive(Debug, Error)]
pub enum Fault {
    #[error(transparent)]
    Soft(#[from] SoftFault),
    #[error(transparent)]
    Fatal(#[from] FatalFault),
}

impl From<ProtocolError> for Fault {
    fn from(err: ProtocolError) -> Self {
        Fault::Fatal(FatalFault::Protocol(err))
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Fault::Fatal(FatalFault::Io(err))
    }
}

impl From<SessionError> for Fault {
    fn from(err: SessionError) -> Self {
        Fault::Fatal(FatalFault::Session(err))
    }
}
