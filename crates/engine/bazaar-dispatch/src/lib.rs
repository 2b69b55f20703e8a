#![forbid(unsafe_code)]
//! Dispatching units of work onto marketplace activities.
//!
//! [`PoolDispatcher`] runs one unit of work on one pooled activity. The
//! [`Retry`] and [`Redundancy`] decorators compose over any dispatcher.
//! [`ConsensusDispatcher`] provides task-level redundancy: every task is
//! executed by several independent providers and retires once a majority
//! agrees on its result.

mod consensus;
mod dowork;
mod redundancy;
mod result;
mod retry;
#[cfg(test)]
mod testing_support;

pub use consensus::{ConsensusDispatcher, TaskExecutor};
pub use dowork::{work, DoWork, PoolDispatcher, Work, WorkContext};
pub use redundancy::Redundancy;
pub use result::{WorkError, WorkResult};
pub use retry::Retry;
