#![forbid(unsafe_code)]

pub mod activity;
pub mod agreement;
pub mod api;
pub mod demand;
pub mod error;
pub mod events;
pub mod payment;
pub mod proposal;
pub mod registry;
pub mod settings;
pub mod testing;

pub use activity::{Activity, ActivityId, Batch};
pub use agreement::{Agreement, AgreementId};
pub use api::{
    ActivityHandle, ActivitySource, AgreementHandle, BatchHandle, Command, CommandResult,
    PaymentApi, ProposalHandle,
};
pub use demand::DemandState;
pub use error::MarketError;
pub use events::{EventBus, MarketEvent};
pub use payment::{DebitNote, Invoice};
pub use proposal::{Offer, Properties, ProposalData, ProposalId, ProposalState, ProviderId};
pub use registry::ResourceRegistry;
pub use settings::{
    DispatchSettings, EngineSettings, NegotiationSettings, PaymentSettings, PoolSettings,
};
