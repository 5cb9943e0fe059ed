use crate::deps::thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("an io error occurred: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("a remote-memory read failed: {reason}")]
    RemoteRead { reason: String },

    #[error("malformed chain file {path:?}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("out of memory while growing a spill queue: {reason}")]
    OutOfMemory { reason: String },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("parsing {typename} from {value:?}, reason: {reason:}")]
    Parse {
        value:    String,
        typename: &'static str,
        reason:   String,
    },

    #[error("an error occurred casting between integer types: {source}")]
    Number {
        #[from]
        source: std::num::TryFromIntError,
    },

    #[error("a system call failed: {source}")]
    Errno {
        #[from]
        source: nix::Error,
    },
}

impl Error {
    pub fn remote_read(reason: impl Into<String>) -> Self {
        Error::RemoteRead { reason: reason.into() }
    }

    pub fn malformed(
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Malformed {
            path:   path.into(),
            reason: reason.into(),
        }
    }

    pub fn out_of_memory(reason: impl Into<String>) -> Self {
        Error::OutOfMemory { reason: reason.into() }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument { reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
