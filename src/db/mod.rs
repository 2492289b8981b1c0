//! The index database: schema management and the CRUD surface the
//! classifier, registration pipeline, and recovery subsystem build on.

pub mod schema;
pub mod store;

pub use schema::SCHEMA_VERSION;
pub use store::{IndexCounts, IndexStore, JournalEntry, JournalPhase, OrphanRecord};
