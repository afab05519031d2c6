// Relational store for the recall worker.
// Single long-lived writer connection; all other components read and mutate
// through the named operations on Database.

mod db;
mod error;
mod records;
mod queries;

pub use db::Database;
pub use error::{Error, Result};
pub use records::{
    NewObservation, NewUserPrompt, ObservationRow, PendingMessageRow, ProjectStat, SessionRow,
    StoreStats, StoredId, SummaryRow, UserPromptRow,
};
