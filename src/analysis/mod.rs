//! Hosted-model integration: the Messages API client, the protocol analyzer and
//! the improved-protocol generator.

pub mod analyzer;
pub mod client;
pub mod generator;
pub mod prompts;

pub use analyzer::{parse_analysis_response, ProtocolAnalyzer};
pub use client::AnthropicClient;
pub use generator::ProtocolGenerator;

#[cfg(test)]
pub(crate) mod testing {
    use crate::domain::model::{Category, Priority, Suggestion};
    use crate::domain::ports::{Completion, CompletionRequest, ModelClient};
    use crate::utils::error::{ProtocolError, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type ErrorFactory = Box<dyn Fn() -> ProtocolError + Send + Sync>;

    /// Model stand-in that replays canned replies in order and records prompts.
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
        error: Option<ErrorFactory>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
                error: None,
            }
        }

        pub fn failing(error: impl Fn() -> ProtocolError + Send + Sync + 'static) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(Vec::new()),
                error: Some(Box::new(error)),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            self.prompts.lock().unwrap().push(request.prompt.clone());

            if let Some(error) = &self.error {
                return Err(error());
            }

            let text = self.replies.lock().unwrap().pop_front().ok_or_else(|| {
                ProtocolError::ModelApi {
                    status: 500,
                    message: "no scripted reply left".to_string(),
                }
            })?;

            Ok(Completion {
                text,
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

    pub fn sample_suggestion(priority: Priority, location: &str, suggestion: &str) -> Suggestion {
        Suggestion {
            category: Category::Safety,
            priority,
            location: location.to_string(),
            description: format!("Issue at {}", location),
            suggestion: suggestion.to_string(),
            example: None,
        }
    }
}
