use std::sync::Arc;
use std::time::Duration;

use insight_core::domain::customer::CustomerProfile;
use insight_core::errors::AnalysisError;
use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::LlmClient;

/// Request body appended to the instruction template.
#[derive(Debug, Serialize)]
struct EngineRequest<'a> {
    name: &'a str,
    orders: Vec<String>,
}

/// Adapter between a customer profile and the external text-generation call.
///
/// No retries happen here: a transport failure or a timeout surfaces as
/// [`AnalysisError::EngineUnavailable`] and the caller decides what to do.
pub struct AnalysisEngineClient {
    llm: Arc<dyn LlmClient>,
    instruction_template: String,
    timeout: Duration,
}

impl AnalysisEngineClient {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        instruction_template: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self { llm, instruction_template: instruction_template.into(), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Template, a newline, then `{"name": .., "orders": [..]}` with one
    /// `"orderRef productName optionValue"` entry per fact in insertion order.
    pub fn build_prompt(&self, profile: &CustomerProfile) -> Result<String, AnalysisError> {
        let request = EngineRequest {
            name: &profile.name,
            orders: profile.purchase_history.descriptions(),
        };
        let payload = serde_json::to_string(&request).map_err(|error| {
            AnalysisError::EngineUnavailable(format!("failed to encode engine request: {error}"))
        })?;
        Ok(format!("{}\n{}", self.instruction_template, payload))
    }

    pub async fn analyze(&self, profile: &CustomerProfile) -> Result<String, AnalysisError> {
        let prompt = self.build_prompt(profile)?;

        let outcome = tokio::time::timeout(self.timeout, self.llm.complete(&prompt)).await;
        match outcome {
            Ok(Ok(raw)) => {
                debug!(
                    event_name = "analysis.engine.completed",
                    customer_id = %profile.id,
                    response_len = raw.len(),
                    raw = %raw,
                    "analysis engine returned"
                );
                Ok(raw)
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "analysis.engine.failed",
                    customer_id = %profile.id,
                    error = %error,
                    "analysis engine call failed"
                );
                Err(AnalysisError::EngineUnavailable(format!("{error:#}")))
            }
            Err(_) => {
                warn!(
                    event_name = "analysis.engine.timeout",
                    customer_id = %profile.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "analysis engine call timed out"
                );
                Err(AnalysisError::EngineUnavailable(format!(
                    "engine call exceeded {}s timeout",
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}
