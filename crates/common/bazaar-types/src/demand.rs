use serde::{Deserialize, Serialize};

use crate::proposal::Properties;

/// The requestor's declared property/constraint set describing acceptable
/// providers.
///
/// Negotiation plugins mutate a copy of this state each round; equality with
/// the pre-plugin snapshot is the convergence detector, so `PartialEq` here
/// must cover every negotiable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandState {
    pub properties: Properties,
    pub constraints: String,
}

impl DemandState {
    pub fn new(properties: Properties, constraints: impl Into<String>) -> Self {
        Self {
            properties,
            constraints: constraints.into(),
        }
    }

    pub fn property_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(|v| v.as_i64())
    }

    pub fn set_property(&mut self, key: &str, value: serde_json::Value) {
        self.properties.insert(key.to_string(), value);
    }
}
