use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("device not registered: {0}")]
    UnknownDevice(String),
}

pub type PollResult<T> = Result<T, PollerError>;
