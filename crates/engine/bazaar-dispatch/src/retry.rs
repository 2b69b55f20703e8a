use async_trait::async_trait;
use serde_json::json;

use bazaar_types::DispatchSettings;

use crate::dowork::{DoWork, Work};
use crate::result::WorkResult;

/// Invokes the inner dispatcher up to `tries + 1` times, stopping at the
/// first success. The full error history lands in
/// `extras["retry"] = {"attempts": n, "errors": [..]}`; the last attempt's
/// outcome is what comes back.
pub struct Retry<D> {
    inner: D,
    tries: u32,
}

impl<D> Retry<D> {
    pub fn new(inner: D, tries: u32) -> Self {
        Self { inner, tries }
    }

    pub fn from_settings(inner: D, settings: &DispatchSettings) -> Self {
        Self::new(inner, settings.retries)
    }
}

#[async_trait]
impl<D: DoWork> DoWork for Retry<D> {
    async fn do_work(&self, work: &Work) -> WorkResult {
        let mut errors: Vec<String> = Vec::new();

        for attempt in 1..=self.tries + 1 {
            let mut result = self.inner.do_work(work).await;
            if let Some(error) = &result.error {
                tracing::debug!(attempt, error = %error, "work attempt failed");
                errors.push(error.to_string());
            }

            if result.is_ok() || attempt == self.tries + 1 {
                result.extras.insert(
                    "retry".into(),
                    json!({ "attempts": attempt, "errors": errors }),
                );
                return result;
            }
        }
        unreachable!("the loop returns on the last attempt")
    }
}
