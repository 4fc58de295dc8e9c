pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod session;
