use thiserror::Error;

/// Result type returned from functions that can have our `Error`s.
pub type Result<T, E = BrightdockError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrightdockError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("{0}")]
    X11Connect(#[from] x11rb::errors::ConnectError),

    #[error("{0}")]
    X11Connection(#[from] x11rb::errors::ConnectionError),

    #[error("{0}")]
    X11Reply(#[from] x11rb::errors::ReplyError),

    #[error("No monitor matches {0:?}")]
    NoMatchingMonitor(String),

    #[error("Gamma table size {0} is not usable")]
    InvalidGammaSize(usize),

    #[error("{0}")]
    Other(String),
}

/// Attach a short description to a foreign error.
pub trait ResultExt<T> {
    fn error(self, message: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn error(self, message: &str) -> Result<T> {
        self.map_err(|e| BrightdockError::Other(format!("{message}: {e}")))
    }
}
