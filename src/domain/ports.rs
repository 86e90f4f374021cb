use crate::domain::model::ExtractedText;
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn list_files(&self) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
}

/// A single-turn request to the hosted language model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    pub fn tokens_used(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Name of the model requests are sent to.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Cheap round trip used by health checks.
    async fn quick_check(&self) -> bool {
        let request = CompletionRequest {
            prompt: "Respond with 'OK' if you can read this.".to_string(),
            max_tokens: 50,
            temperature: 0.0,
        };
        match self.complete(&request).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Model API connection failed: {}", e);
                false
            }
        }
    }
}

/// The three stages the offline report run goes through.
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Outcome: Send;

    async fn extract(&self) -> Result<ExtractedText>;
    async fn transform(&self, text: ExtractedText) -> Result<Self::Outcome>;
    async fn load(&self, outcome: Self::Outcome) -> Result<String>;
}
