#![forbid(unsafe_code)]
//! Channel combinators for proposal pipelines.
//!
//! Values move through `tokio::sync::mpsc` channels. End-of-stream is a
//! closed channel; each combinator spawns its own worker task(s) and hands
//! back the downstream receiver. Dropping a downstream receiver tears the
//! stage (and transitively its upstream) down.

mod buffered;
mod limit;
mod map;
mod sort;
mod zip;

pub use buffered::buffered;
pub use limit::limit;
pub use map::map;
pub use sort::sort;
pub use zip::zip;

/// Capacity of the channel each combinator creates for its output.
pub(crate) const STAGE_CAPACITY: usize = 32;
