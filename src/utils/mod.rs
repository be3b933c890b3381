//! Shared helpers.

pub mod bootstrap;
pub mod dispatch;
pub mod retry;
