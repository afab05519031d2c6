// Worker runtime: composes the store, vector backend, session manager,
// subprocess supervisor, and HTTP surface into the single long-lived
// process that owns all mutable state.

mod error;
mod hooks;
mod logging;
mod manager;
pub mod ops;
mod paths;
mod reaper;
mod server;
mod settings;
mod supervisor;
mod worker;

pub use error::{Error, Result};
pub use logging::init_tracing;
pub use manager::{GeneratorExit, SessionManager};
pub use paths::ServiceDirs;
pub use reaper::{REAP_INTERVAL, Reaper};
pub use server::{router, serve};
pub use settings::{
    ContextSettings, EmbeddingSettings, FederationSettings, ReplicationSettings, Settings,
    VectorSettings, WorkerSettings,
};
pub use supervisor::ObserverRegistry;
pub use worker::{Worker, build_vector_backend};
