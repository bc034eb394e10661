use async_trait::async_trait;

use crate::domains::downloadable::DownloadableItem;
use crate::error::Result;

/// Materializes one downloaded item (a message, an update, ...).
///
/// A failure is reported for that item only; the rest of the poll cycle goes on.
#[async_trait]
pub trait DownloadableHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, item: &DownloadableItem) -> Result<()>;
}
