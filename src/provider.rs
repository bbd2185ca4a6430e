use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::ImagePage;

/// Seam to the external image-search backend. Implementations own their
/// timeouts and must surface failure as a `ProviderError`, never a hang.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Fetch one page of results (1-based page number). Returned item
    /// order is preserved by the controller.
    async fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ImagePage, ProviderError>;
}
