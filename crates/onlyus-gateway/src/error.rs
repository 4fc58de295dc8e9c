use thiserror::Error;

/// Why a gateway command failed. `Display` is the text the caller sees in
/// `operation-failed`; persistence details only go to the log.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("PIN not valid")]
    InvalidPin,

    #[error("Declare your PIN first")]
    NotIdentified,

    #[error("PIN does not match this connection")]
    PinMismatch,

    #[error("Message too long")]
    MessageTooLong,

    #[error("Server error")]
    Persistence(anyhow::Error),
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}
