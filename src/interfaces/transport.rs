use async_trait::async_trait;
use http::StatusCode;

use crate::error::Result;

/// Raw outcome of a pending-items request, before classification.
#[derive(Debug, Clone)]
pub struct ListResponse {
    pub status: StatusCode,
    pub body: String,
}

#[async_trait]
pub trait DownloadSource: Send + Sync {
    async fn fetch_pending(&self, device_id: &str, patient_id: &str) -> Result<ListResponse>;
}
