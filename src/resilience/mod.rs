//! Recovery from transient backend failures.

pub mod retry;
