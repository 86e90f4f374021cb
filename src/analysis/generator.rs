use crate::analysis::prompts;
use crate::config::Settings;
use crate::domain::model::{ImprovedProtocol, Suggestion};
use crate::domain::ports::{CompletionRequest, ModelClient};
use crate::utils::error::{ProtocolError, Result};
use std::sync::Arc;
use tracing::info;

/// Rewrites a protocol so that it incorporates a set of accepted suggestions.
pub struct ProtocolGenerator {
    client: Arc<dyn ModelClient>,
    max_tokens: u32,
    temperature: f32,
}

impl ProtocolGenerator {
    pub fn new(client: Arc<dyn ModelClient>, settings: &Settings) -> Self {
        Self {
            client,
            max_tokens: settings.max_tokens(),
            temperature: settings.improve_temperature(),
        }
    }

    /// With no accepted suggestions the original text is returned as-is and the
    /// model is not called.
    pub async fn generate(
        &self,
        original_text: &str,
        accepted: &[Suggestion],
    ) -> Result<ImprovedProtocol> {
        if accepted.is_empty() {
            return Ok(ImprovedProtocol {
                text: original_text.to_string(),
                suggestions_applied: 0,
            });
        }

        info!("✍️ Generating improved protocol with {} suggestions", accepted.len());

        let completion = self
            .client
            .complete(&CompletionRequest {
                prompt: prompts::improvement_prompt(original_text, accepted),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;

        let text = completion.text.trim();
        if text.is_empty() {
            return Err(ProtocolError::MalformedResponse {
                message: "model returned an empty protocol".to_string(),
            });
        }

        Ok(ImprovedProtocol {
            text: text.to_string(),
            suggestions_applied: accepted.len(),
        })
    }
}
