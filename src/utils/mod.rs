//! Shared utilities: decimal arithmetic, task boundaries and cancellable waits.

pub mod decimal;
pub mod task;
pub mod wait;

pub use decimal::*;
pub use task::{describe_join_error, guarded_call, with_deadline};
pub use wait::{poll_until, sleep_or_shutdown, PollPolicy, Shutdown, WaitError};
