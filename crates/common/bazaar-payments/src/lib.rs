#![forbid(unsafe_code)]
//! Requestor-side payment safety.
//!
//! The linear cost model bounds what a provider may legitimately charge,
//! the [`PaymentGuard`] validates and accepts incoming cost documents
//! against that bound, and the mid-agreement negotiator converges the
//! debit-note cadence during proposal negotiation.

pub mod costs;
mod guard;
mod mid_agreement;

pub use costs::{validate_max_cost, InfraProps, LinearCoeffs};
pub use guard::PaymentGuard;
pub use mid_agreement::MidAgreementPaymentsNegotiator;
