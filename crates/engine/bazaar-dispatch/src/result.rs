use thiserror::Error;

use bazaar_types::MarketError;

/// Why a unit of work failed.
#[derive(Debug, Clone, Error)]
pub enum WorkError {
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error("execution failed: {0}")]
    Execution(String),
}

/// Outcome of one dispatched unit of work. Decorators annotate `extras`
/// (the retry decorator records its attempt history there, for instance).
#[derive(Debug, Clone, Default)]
pub struct WorkResult {
    pub result: Option<serde_json::Value>,
    pub error: Option<WorkError>,
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl WorkResult {
    pub fn ok(value: serde_json::Value) -> Self {
        Self {
            result: Some(value),
            ..Self::default()
        }
    }

    pub fn failed(error: WorkError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
