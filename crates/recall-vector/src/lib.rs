// Vector indexing layer.
//
// One backend instance per worker. Mutating syncs for a session are issued by
// that session's single generator; the query path is safe for concurrent
// reads. The relational store never holds vector data and this layer never
// owns relational rows: the only pointer between the two is `sqlite_id`.

pub mod adapter;
mod backend;
mod collection;
mod disabled;
mod document;
mod embedded;
pub mod embedding;
pub mod encoding;
pub mod federation;
mod error;

pub use backend::{
    BackendStats, BackfillReport, DocType, FederationOps, MaintenanceOps, ObservationSync,
    PromptSync, QueryFilters, QueryHit, RemoteInfo, SharedStore, SummarySync, VectorBackend,
};
pub use collection::CollectionServiceBackend;
pub use disabled::DisabledBackend;
pub use document::{DocumentSeed, observation_documents, prompt_documents, summary_documents};
pub use embedded::EmbeddedVecBackend;
pub use embedding::{Embedder, EmbeddingBatch, HashEmbedder, HttpEmbedder};
pub use error::{Error, Result};
pub use federation::{DecaySchedule, FederatedHit, FederationConfig};
