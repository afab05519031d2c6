use crate::backend::{
    BackendStats, BackfillReport, ObservationSync, PromptSync, QueryFilters, QueryHit,
    SharedStore, SummarySync, VectorBackend,
};
use crate::Result;
use async_trait::async_trait;

/// No-op backend for `vector.backend = "none"`. The store keeps accepting
/// observations; semantic search returns nothing.
#[derive(Debug, Default)]
pub struct DisabledBackend;

#[async_trait]
impl VectorBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn sync_observation(&self, _record: &ObservationSync) -> Result<()> {
        Ok(())
    }

    async fn sync_summary(&self, _record: &SummarySync) -> Result<()> {
        Ok(())
    }

    async fn sync_user_prompt(&self, _record: &PromptSync) -> Result<()> {
        Ok(())
    }

    async fn query(
        &self,
        _text: &str,
        _limit: usize,
        _filters: &QueryFilters,
    ) -> Result<Vec<QueryHit>> {
        Ok(Vec::new())
    }

    async fn ensure_backfilled(&self, _store: &SharedStore) -> Result<BackfillReport> {
        Ok(BackfillReport::default())
    }

    async fn stats(&self) -> Result<BackendStats> {
        Ok(BackendStats {
            backend: self.name().to_string(),
            document_count: 0,
            collection: String::new(),
            dimensions: None,
            last_sync_epoch: None,
        })
    }
}
