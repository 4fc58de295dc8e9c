use thiserror::Error;

pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Input rejected by the store. Travels inside `anyhow::Error`; callers
/// recover it with `downcast_ref::<DbError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("Username required")]
    EmptyDisplayName,

    #[error("Username must be at most {MAX_DISPLAY_NAME_LEN} characters")]
    DisplayNameTooLong,
}
