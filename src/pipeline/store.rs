//! Entity mutations and the stores that receive them.
//!
//! The pipeline never reads back from a store: it emits [`Mutation`]
//! values in arrival order and forgets them. A store failure is reported
//! to the caller but does not stop the connection.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::MsgPackCodec;
use crate::dataset::Dataset;
use crate::error::{Result, SpanwireError};
use crate::protocol::{Duration, Level, Metadata, Project};

/// Rolling statistics of a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanStats {
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub average: Option<Duration>,
}

/// A log event attached to a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Connection-scoped arrival order.
    pub sequence: u64,
    /// Unix seconds.
    pub timestamp: i64,
    pub level: Level,
    pub message: String,
    pub module: String,
    pub target: String,
    pub variables: Vec<String>,
}

/// One intent toward the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    CreateProject {
        project: Project,
    },
    CreateSpan {
        id: u32,
        path: String,
        metadata: Metadata,
    },
    RelocateSpan {
        id: u32,
        path: String,
    },
    AppendEvent {
        span: u32,
        event: EventRecord,
    },
    UpdateSpanStats {
        span: u32,
        stats: SpanStats,
    },
    AppendDataset {
        span: u32,
        dataset: Dataset,
    },
}

/// Receiver of entity mutations.
pub trait EntityStore: Send {
    fn apply(&mut self, mutation: Mutation) -> Result<()>;

    /// Push buffered state to the backing medium, if any.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: EntityStore + ?Sized> EntityStore for Box<S> {
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        (**self).apply(mutation)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// A span and everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRecord {
    pub id: u32,
    pub path: String,
    pub metadata: Metadata,
    pub stats: SpanStats,
    pub events: Vec<EventRecord>,
    pub datasets: Vec<Dataset>,
}

/// A project and its spans, keyed by span id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub project: Project,
    pub spans: BTreeMap<u32, SpanRecord>,
}

impl ProjectRecord {
    pub fn span(&self, id: u32) -> Option<&SpanRecord> {
        self.spans.get(&id)
    }
}

/// In-memory materialization of the mutation stream.
///
/// Cloning yields another handle to the same data, so an observer can keep
/// one while the pipeline owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    projects: Arc<Mutex<Vec<ProjectRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a journal written by [`JournalStore`].
    pub fn replay(journal: &[u8]) -> Result<Self> {
        let mut store = Self::new();
        for mutation in read_journal(journal)? {
            store.apply(mutation)?;
        }
        Ok(store)
    }

    pub fn projects(&self) -> Vec<ProjectRecord> {
        self.projects.lock().clone()
    }

    /// The project receiving mutations.
    pub fn current_project(&self) -> Option<ProjectRecord> {
        self.projects.lock().last().cloned()
    }

    pub fn span(&self, id: u32) -> Option<SpanRecord> {
        self.projects
            .lock()
            .last()
            .and_then(|p| p.spans.get(&id).cloned())
    }
}

fn active(projects: &mut [ProjectRecord]) -> Result<&mut ProjectRecord> {
    projects
        .last_mut()
        .ok_or_else(|| SpanwireError::Store("no active project".into()))
}

fn span_mut(projects: &mut [ProjectRecord], id: u32) -> Result<&mut SpanRecord> {
    active(projects)?
        .spans
        .get_mut(&id)
        .ok_or_else(|| SpanwireError::Store(format!("span {id} does not exist")))
}

impl EntityStore for MemoryStore {
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        let mut projects = self.projects.lock();
        match mutation {
            Mutation::CreateProject { project } => projects.push(ProjectRecord {
                project,
                spans: BTreeMap::new(),
            }),
            Mutation::CreateSpan { id, path, metadata } => {
                // A re-allocated span keeps its recorded history.
                let record = active(&mut projects)?
                    .spans
                    .entry(id)
                    .or_insert_with(|| SpanRecord {
                        id,
                        path: String::new(),
                        metadata: metadata.clone(),
                        stats: SpanStats::default(),
                        events: Vec::new(),
                        datasets: Vec::new(),
                    });
                record.path = path;
                record.metadata = metadata;
            }
            Mutation::RelocateSpan { id, path } => span_mut(&mut projects, id)?.path = path,
            Mutation::AppendEvent { span, event } => {
                span_mut(&mut projects, span)?.events.push(event)
            }
            Mutation::UpdateSpanStats { span, stats } => {
                span_mut(&mut projects, span)?.stats = stats
            }
            Mutation::AppendDataset { span, dataset } => {
                span_mut(&mut projects, span)?.datasets.push(dataset)
            }
        }
        Ok(())
    }
}

// ============================================================================
// JournalStore
// ============================================================================

/// Appends every mutation as a length-prefixed MsgPack record.
///
/// Record layout: `u32` LE length, then the `to_vec_named` encoding.
pub struct JournalStore<W: Write + Send> {
    writer: W,
    records: u64,
}

impl<W: Write + Send> JournalStore<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EntityStore for JournalStore<W> {
    fn apply(&mut self, mutation: Mutation) -> Result<()> {
        let bytes = MsgPackCodec::encode(&mutation)?;
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        self.records += 1;
        trace!(records = self.records, size = bytes.len(), "journal record written");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Decode every record of a journal.
pub fn read_journal(mut bytes: &[u8]) -> Result<Vec<Mutation>> {
    let mut mutations = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return Err(SpanwireError::Store("truncated journal record header".into()));
        }
        let (prefix, rest) = bytes.split_at(4);
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if rest.len() < len {
            return Err(SpanwireError::Store(format!(
                "truncated journal record: need {len} bytes, {} available",
                rest.len()
            )));
        }
        let (record, rest) = rest.split_at(len);
        mutations.push(MsgPackCodec::decode(record)?);
        bytes = rest;
    }
    Ok(mutations)
}
