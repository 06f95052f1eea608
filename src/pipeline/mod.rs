//! Ingestion pipeline and the entity stores it feeds.

mod ingestion;
mod store;

pub use ingestion::{IngestionPipeline, DATASET_PROGRESS_LABEL};
pub use store::{
    read_journal, EntityStore, EventRecord, JournalStore, MemoryStore, Mutation, ProjectRecord,
    SpanRecord, SpanStats,
};
