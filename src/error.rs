//! Grepable error codes for errors that surface to clients or logs.

pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}
