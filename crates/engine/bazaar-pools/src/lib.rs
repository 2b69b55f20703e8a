#![forbid(unsafe_code)]
//! Agreement and activity lifecycle pooling.
//!
//! [`AgreementPool`] turns negotiated proposals into approved agreements.
//! [`SingleUseActivityPool`] layers activity creation and preparation on
//! top, retiring each activity after one use. [`ActivityPool`] keeps a
//! configured number of prepared activities warm behind an idle queue.

mod agreement;
mod metrics;
mod pool;
mod single_use;

pub use agreement::AgreementPool;
pub use pool::ActivityPool;
pub use single_use::{default_prepare, ActivityRoutine, SingleUseActivityPool};
