#![forbid(unsafe_code)]
//! Proposal scoring and best-first selection.
//!
//! Scorers rate whole batches of proposals so relative measures
//! (normalization across the batch) are possible. Two selection policies
//! reorder the negotiated-proposal stream: a deadline/size buffer and a
//! sliding admission-controlled window.

mod buffer;
mod scorer;
mod scorers;
mod window;

pub use buffer::ScoringBuffer;
pub use scorer::{combine_scores, ProposalScorer, WeightedScorer};
pub use scorers::{LinearCostScorer, NormalizingScorer, PropertyLerpScorer, RandomScorer};
pub use window::{Candidate, SlidingScoringWindow};
