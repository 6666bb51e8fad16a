use std::io;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Corruption: {0}")]
    Corruption(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("IO error: {0}")]
    Io(#[source] Box<io::Error>),
    #[error("NotFound")]
    NotFound,
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(e: io::Error) -> Error {
        Error::Io(Box::new(e))
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Corruption(e) => Error::Corruption(e.clone()),
            Error::InvalidArgument(e) => Error::InvalidArgument(e.clone()),
            Error::Io(e) => Error::Other(format!("IO error: {:?}", e)),
            Error::NotFound => Error::NotFound,
            Error::Other(e) => Error::Other(e.clone()),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
