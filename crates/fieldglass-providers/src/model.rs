use async_trait::async_trait;
use fieldglass_types::ErrorRecord;

/// Options forwarded to the model backend on each `Reason` node call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: None,
        }
    }
}

/// The LLM collaborator contract: `generate(prompt) -> text | Err(ModelFailure)`.
/// The core never constructs an HTTP client directly — this trait is the only
/// seam, so a scripted double can stand in for tests.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ErrorRecord>;
}
