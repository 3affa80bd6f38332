use async_trait::async_trait;
use fieldglass_types::ErrorRecord;

/// Opaque screen capture payload. The core never interprets image bytes; it
/// only forwards them to `analyze`.
#[derive(Debug, Clone)]
pub struct CapturedImage(pub Vec<u8>);

/// The screen perception collaborator: `capture() -> image`,
/// `analyze(image, query) -> text`.
#[async_trait]
pub trait PerceptionBackend: Send + Sync {
    async fn capture(&self) -> Result<CapturedImage, ErrorRecord>;
    async fn analyze(&self, image: &CapturedImage, query: &str) -> Result<String, ErrorRecord>;
}
