#![forbid(unsafe_code)]
//! Plugin-driven proposal negotiation.
//!
//! The engine runs a chain of [`NegotiationPlugin`]s over every incoming
//! offer, counter-proposing until the demand stops changing or a plugin
//! vetoes the provider. Each proposal negotiates independently; one failed
//! negotiation never blocks the rest.

mod engine;
mod plugin;
mod plugins;

pub use engine::NegotiationEngine;
pub use plugin::{NegotiationPlugin, ProposalRejection};
pub use plugins::{BlacklistProvider, PropertyOverride};
