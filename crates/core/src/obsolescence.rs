use crate::traits::SearchBackend;
use crate::SearchError;
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Active,
    Obsolete,
}

impl ChunkStatus {
    pub fn from_obsolete(obsolete: bool) -> Self {
        if obsolete {
            ChunkStatus::Obsolete
        } else {
            ChunkStatus::Active
        }
    }

    pub fn is_obsolete(&self) -> bool {
        matches!(self, ChunkStatus::Obsolete)
    }
}

pub struct ObsolescenceController<'a, B: ?Sized> {
    backend: &'a B,
    index: &'a str,
}

impl<'a, B: SearchBackend + ?Sized> ObsolescenceController<'a, B> {
    pub fn new(backend: &'a B, index: &'a str) -> Self {
        Self { backend, index }
    }

    pub async fn set_obsolete(
        &self,
        chunk_id: &str,
        obsolete: bool,
    ) -> Result<ChunkStatus, SearchError> {
        self.backend
            .update_fields(self.index, chunk_id, json!({ "obsolete": obsolete }))
            .await?;
        self.backend.refresh(self.index).await?;

        let status = ChunkStatus::from_obsolete(obsolete);
        info!(index = self.index, chunk_id, ?status, "chunk status updated");
        Ok(status)
    }

    pub async fn retire(&self, chunk_id: &str) -> Result<ChunkStatus, SearchError> {
        self.set_obsolete(chunk_id, true).await
    }

    pub async fn restore(&self, chunk_id: &str) -> Result<ChunkStatus, SearchError> {
        self.set_obsolete(chunk_id, false).await
    }
}
