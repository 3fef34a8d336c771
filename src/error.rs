use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Module decode error: {0}")]
    Decode(String),

    #[error("Unsupported module format")]
    UnsupportedFormat,

    #[error("Allocation of {0} bytes failed")]
    Allocation(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::Decode(message.into())
    }

    /// True for every error that means "the input is not a module we can read"
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::UnsupportedFormat)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
