//! Ingestion pipeline: decoded messages → span tree, datasets, mutations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::store::{EntityStore, EventRecord, Mutation, SpanStats};
use crate::dataset::{DatasetIngestor, RowParser, MIN_ROW_FIELDS};
use crate::error::{Result, SpanwireError};
use crate::observe::ProgressList;
use crate::protocol::{
    Duration, Message, Project, SpanAlloc, SpanDataset, SpanEvent, SpanFollows, SpanParent,
    SpanUpdate,
};
use crate::span_tree::SpanTree;

/// Label of the progress tracker opened per dataset import.
pub const DATASET_PROGRESS_LABEL: &str = "Importing dataset...";

/// Per-span bookkeeping kept between messages.
#[derive(Debug, Default)]
struct SpanState {
    runs: u64,
    dataset_count: u64,
    dataset_average_sum: u128,
    stats: SpanStats,
}

impl SpanState {
    /// Fold a finished dataset into the rolling statistics.
    ///
    /// The average becomes the mean of every dataset average so far; min
    /// and max only ever widen.
    fn roll_up(&mut self, min: Duration, max: Duration, average: Duration) -> SpanStats {
        self.dataset_count += 1;
        self.dataset_average_sum += u128::from(average.nanoseconds);
        let mean = (self.dataset_average_sum / u128::from(self.dataset_count)) as u64;

        self.stats.average = Some(Duration::from_nanos(mean));
        self.stats.min = Some(self.stats.min.map_or(min, |m| m.min(min)));
        self.stats.max = Some(self.stats.max.map_or(max, |m| m.max(max)));
        self.stats
    }
}

/// Applies messages in arrival order. Owned by a single worker.
pub struct IngestionPipeline {
    tree: SpanTree,
    ingestor: DatasetIngestor,
    parser: RowParser,
    store: Box<dyn EntityStore>,
    progress: Arc<ProgressList>,
    spans: HashMap<u32, SpanState>,
    next_event: u64,
    has_project: bool,
}

impl IngestionPipeline {
    pub fn new(store: Box<dyn EntityStore>, progress: Arc<ProgressList>) -> Self {
        Self::with_parser(store, progress, RowParser::default())
    }

    /// Use `parser` for both event rows and dataset rows.
    pub fn with_parser(
        store: Box<dyn EntityStore>,
        progress: Arc<ProgressList>,
        parser: RowParser,
    ) -> Self {
        Self {
            tree: SpanTree::new(),
            ingestor: DatasetIngestor::new(parser),
            parser,
            store,
            progress,
            spans: HashMap::new(),
            next_event: 0,
            has_project: false,
        }
    }

    pub fn tree(&self) -> &SpanTree {
        &self.tree
    }

    /// Sequence number the next accepted event will get.
    pub fn next_event_sequence(&self) -> u64 {
        self.next_event
    }

    pub fn has_project(&self) -> bool {
        self.has_project
    }

    /// Abandon the current project: tree, counters and span state.
    pub fn reset(&mut self) {
        self.tree.reset();
        self.spans.clear();
        self.next_event = 0;
        self.has_project = false;
    }

    /// Apply one message.
    ///
    /// Errors are store failures only; the message was handled as far as
    /// the store allowed and the next message may still be applied.
    pub fn handle(&mut self, message: &Message) -> Result<()> {
        match message {
            Message::ServerConfig(_) => Ok(()),
            Message::Project(project) => self.on_project(project),
            _ if !self.has_project => {
                debug!(kind = ?message.kind(), "no active project, message skipped");
                Ok(())
            }
            Message::SpanAlloc(alloc) => self.on_span_alloc(alloc),
            Message::SpanParent(parent) => self.on_span_parent(parent),
            Message::SpanFollows(follows) => self.on_span_follows(follows),
            Message::SpanEvent(event) => self.on_span_event(event),
            Message::SpanUpdate(update) => self.on_span_update(update),
            Message::SpanDataset(dataset) => self.on_span_dataset(dataset),
        }
    }

    /// Flush the underlying store.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush().map_err(into_store_error)
    }

    fn emit(&mut self, mutation: Mutation) -> Result<()> {
        self.store.apply(mutation).map_err(into_store_error)
    }

    fn known(&self, id: u32) -> bool {
        let known = self.spans.contains_key(&id);
        if !known {
            debug!(id, "message references unknown span, skipped");
        }
        known
    }

    fn on_project(&mut self, project: &Project) -> Result<()> {
        debug!(app = %project.app_name, version = %project.version, "new project");
        self.reset();
        self.has_project = true;
        self.emit(Mutation::CreateProject {
            project: project.clone(),
        })
    }

    fn on_span_alloc(&mut self, alloc: &SpanAlloc) -> Result<()> {
        self.tree.insert_root_child(alloc.id, alloc.metadata.name.as_str());
        self.spans.entry(alloc.id).or_default();
        let path = self.path_of(alloc.id);
        self.emit(Mutation::CreateSpan {
            id: alloc.id,
            path,
            metadata: alloc.metadata.clone(),
        })
    }

    fn on_span_parent(&mut self, msg: &SpanParent) -> Result<()> {
        if !self.known(msg.id) {
            return Ok(());
        }
        if self.tree.relocate(msg.id, msg.parent) {
            self.emit_paths(msg.id)?;
        }
        Ok(())
    }

    fn on_span_follows(&mut self, msg: &SpanFollows) -> Result<()> {
        if !self.known(msg.id) {
            return Ok(());
        }
        if self.tree.follows(msg.id, msg.follows) {
            self.emit_paths(msg.id)?;
        }
        Ok(())
    }

    /// Persist the new path of `id` and of every span below it.
    ///
    /// A store failure does not stop the walk; the first one is returned.
    fn emit_paths(&mut self, id: u32) -> Result<()> {
        let mut first_error = None;
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            pending.extend_from_slice(self.tree.children_of(current));
            let path = self.path_of(current);
            if let Err(e) = self.emit(Mutation::RelocateSpan { id: current, path }) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn on_span_event(&mut self, msg: &SpanEvent) -> Result<()> {
        if !self.known(msg.id) {
            return Ok(());
        }
        let mut fields = self.parser.parse(&msg.message);
        if fields.len() < MIN_ROW_FIELDS {
            return Ok(());
        }

        let target = fields.pop().unwrap_or_default();
        let module = fields.pop().unwrap_or_default();
        let mut fields = fields.into_iter();
        let message = fields.next().unwrap_or_default();

        let sequence = self.next_event;
        self.next_event += 1;
        self.emit(Mutation::AppendEvent {
            span: msg.id,
            event: EventRecord {
                sequence,
                timestamp: msg.timestamp,
                level: msg.level,
                message,
                module,
                target,
                variables: fields.collect(),
            },
        })
    }

    fn on_span_update(&mut self, msg: &SpanUpdate) -> Result<()> {
        let Some(state) = self.spans.get_mut(&msg.id) else {
            debug!(id = msg.id, "update for unknown span, skipped");
            return Ok(());
        };
        state.stats = SpanStats {
            min: Some(msg.min),
            max: Some(msg.max),
            average: Some(msg.average),
        };
        let stats = state.stats;
        self.emit(Mutation::UpdateSpanStats { span: msg.id, stats })
    }

    fn on_span_dataset(&mut self, msg: &SpanDataset) -> Result<()> {
        if msg.run_count == 0 {
            return Ok(());
        }
        let Some(first_index) = self.spans.get(&msg.id).map(|s| s.runs) else {
            debug!(id = msg.id, "dataset for unknown span, skipped");
            return Ok(());
        };

        let progress = self
            .progress
            .begin(DATASET_PROGRESS_LABEL, u64::from(msg.run_count));
        let dataset = self
            .ingestor
            .ingest(&msg.content, msg.run_count, first_index, Some(&*progress));
        self.progress.end(&progress);

        let Some(dataset) = dataset else {
            warn!(id = msg.id, run_count = msg.run_count, "dataset had no usable rows");
            return Ok(());
        };
        debug!(
            id = msg.id,
            runs = dataset.runs.len(),
            median_ns = dataset.median.nanoseconds,
            "dataset ingested"
        );

        let stats = match self.spans.get_mut(&msg.id) {
            Some(state) => {
                state.runs += dataset.runs.len() as u64;
                state.roll_up(dataset.min, dataset.max, dataset.average)
            }
            None => return Ok(()),
        };
        self.emit(Mutation::AppendDataset {
            span: msg.id,
            dataset,
        })?;
        self.emit(Mutation::UpdateSpanStats { span: msg.id, stats })
    }

    fn path_of(&self, id: u32) -> String {
        self.tree.path_of(id).unwrap_or_default()
    }
}

fn into_store_error(err: SpanwireError) -> SpanwireError {
    match err {
        SpanwireError::Store(_) => err,
        other => SpanwireError::Store(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MemoryStore;
    use crate::protocol::{Level, Metadata, Target};

    const SECOND: u64 = Duration::NANOS_PER_SEC;

    fn pipeline() -> (IngestionPipeline, MemoryStore, Arc<ProgressList>) {
        let store = MemoryStore::new();
        let progress = Arc::new(ProgressList::new());
        let pipeline = IngestionPipeline::new(Box::new(store.clone()), Arc::clone(&progress));
        (pipeline, store, progress)
    }

    fn project() -> Message {
        Message::Project(Project {
            app_name: "app".into(),
            name: "app".into(),
            version: "0.1.0".into(),
            command_line: "app".into(),
            target: Target {
                os: "linux".into(),
                family: "unix".into(),
                arch: "x86_64".into(),
            },
            cpu: None,
        })
    }

    fn alloc(id: u32, name: &str) -> Message {
        Message::SpanAlloc(SpanAlloc {
            id,
            metadata: Metadata {
                level: Level::Info,
                line: None,
                name: name.into(),
                target: "app".into(),
                module_path: None,
                file: None,
            },
        })
    }

    fn event(id: u32, text: &str) -> Message {
        Message::SpanEvent(SpanEvent {
            id,
            timestamp: 100,
            level: Level::Info,
            message: text.into(),
        })
    }

    fn dataset(id: u32, run_count: u32, content: &str) -> Message {
        Message::SpanDataset(SpanDataset {
            id,
            run_count,
            content: content.into(),
        })
    }

    fn feed(pipeline: &mut IngestionPipeline, messages: &[Message]) {
        for message in messages {
            pipeline.handle(message).unwrap();
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let (mut pipeline, store, progress) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "work"),
                alloc(2, "sub"),
                Message::SpanParent(SpanParent { id: 2, parent: 1 }),
                dataset(2, 3, "r1,1,0\nr2,2,0\nr3,3,0\n"),
            ],
        );

        let span = store.span(2).unwrap();
        assert_eq!(span.path, "work/sub");
        let ds = &span.datasets[0];
        assert_eq!(ds.min.nanoseconds, SECOND);
        assert_eq!(ds.max.nanoseconds, 3 * SECOND);
        assert_eq!(ds.median.nanoseconds, 2 * SECOND);
        assert_eq!(ds.average.nanoseconds, 2 * SECOND);
        assert!(progress.is_empty());
    }

    #[test]
    fn test_initial_path_is_name() {
        let (mut pipeline, store, _) = pipeline();
        feed(&mut pipeline, &[project(), alloc(1, "work")]);
        assert_eq!(store.span(1).unwrap().path, "work");
    }

    #[test]
    fn test_relocation_updates_descendant_paths() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "a"),
                alloc(2, "b"),
                alloc(3, "c"),
                Message::SpanParent(SpanParent { id: 3, parent: 2 }),
                Message::SpanParent(SpanParent { id: 2, parent: 1 }),
            ],
        );
        assert_eq!(store.span(3).unwrap().path, "a/b/c");
    }

    #[test]
    fn test_follows_makes_sibling() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "a"),
                alloc(2, "b"),
                alloc(3, "c"),
                Message::SpanParent(SpanParent { id: 2, parent: 1 }),
                Message::SpanFollows(SpanFollows { id: 3, follows: 2 }),
            ],
        );
        assert_eq!(store.span(3).unwrap().path, "a/c");
    }

    #[test]
    fn test_event_row_mapping_and_sequence() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "work"),
                event(1, "opened,path=/tmp,app::fs,app"),
                event(1, "too,short"),
                event(1, "closed,app::fs,app"),
            ],
        );

        let events = store.span(1).unwrap().events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "opened");
        assert_eq!(events[0].variables, vec!["path=/tmp"]);
        assert_eq!(events[0].module, "app::fs");
        assert_eq!(events[0].target, "app");
        assert_eq!(events[0].timestamp, 100);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[1].sequence, 1);
        assert!(events[1].variables.is_empty());
    }

    #[test]
    fn test_sequence_follows_feed_order() {
        let (mut pipeline, store, _) = pipeline();
        feed(&mut pipeline, &[project(), alloc(1, "a"), alloc(2, "b")]);
        for (i, id) in [2u32, 1, 2, 2, 1].iter().enumerate() {
            pipeline
                .handle(&event(*id, &format!("e{i},m,t")))
                .unwrap();
        }

        let mut all: Vec<_> = store
            .span(1)
            .unwrap()
            .events
            .into_iter()
            .chain(store.span(2).unwrap().events)
            .map(|e| (e.sequence, e.message))
            .collect();
        all.sort();
        let order: Vec<_> = all.into_iter().map(|(_, m)| m).collect();
        assert_eq!(order, vec!["e0", "e1", "e2", "e3", "e4"]);
    }

    #[test]
    fn test_project_resets_counters() {
        let (mut pipeline, _, _) = pipeline();
        feed(
            &mut pipeline,
            &[project(), alloc(1, "a"), event(1, "x,m,t"), project()],
        );
        assert_eq!(pipeline.next_event_sequence(), 0);
        assert!(pipeline.tree().is_empty());
    }

    #[test]
    fn test_unknown_span_skipped() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[project(), event(9, "x,m,t"), dataset(9, 1, "r,1,0")],
        );
        assert!(store.current_project().unwrap().spans.is_empty());
        assert_eq!(pipeline.next_event_sequence(), 0);
    }

    #[test]
    fn test_messages_before_project_skipped() {
        let (mut pipeline, store, _) = pipeline();
        feed(&mut pipeline, &[alloc(1, "a")]);
        assert!(store.projects().is_empty());
    }

    #[test]
    fn test_zero_run_dataset_ignored() {
        let (mut pipeline, store, progress) = pipeline();
        feed(
            &mut pipeline,
            &[project(), alloc(1, "a"), dataset(1, 0, "r,1,0\n")],
        );
        assert!(store.span(1).unwrap().datasets.is_empty());
        assert!(progress.is_empty());
    }

    #[test]
    fn test_span_update_overwrites_stats() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "a"),
                Message::SpanUpdate(SpanUpdate {
                    id: 1,
                    run_count: 4,
                    average: Duration::from_nanos(20),
                    min: Duration::from_nanos(10),
                    max: Duration::from_nanos(30),
                }),
            ],
        );
        let stats = store.span(1).unwrap().stats;
        assert_eq!(stats.min, Some(Duration::from_nanos(10)));
        assert_eq!(stats.max, Some(Duration::from_nanos(30)));
        assert_eq!(stats.average, Some(Duration::from_nanos(20)));
    }

    #[test]
    fn test_dataset_rollup() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "a"),
                // average 2s over 3 runs
                dataset(1, 3, "r,1,0\nr,2,0\nr,3,0\n"),
                // average 6s over 1 run
                dataset(1, 1, "r,6,0\n"),
            ],
        );

        let span = store.span(1).unwrap();
        // Mean of dataset averages, not of all runs
        assert_eq!(span.stats.average, Some(Duration::from_nanos(4 * SECOND)));
        assert_eq!(span.stats.min, Some(Duration::from_nanos(SECOND)));
        assert_eq!(span.stats.max, Some(Duration::from_nanos(6 * SECOND)));
        // Run numbering continues across datasets
        assert_eq!(span.datasets[1].runs[0].index, 3);
    }

    #[test]
    fn test_store_error_is_not_fatal() {
        struct Failing;
        impl EntityStore for Failing {
            fn apply(&mut self, _: Mutation) -> Result<()> {
                Err(SpanwireError::Io(std::io::Error::other("disk gone")))
            }
        }

        let mut pipeline = IngestionPipeline::new(Box::new(Failing), Arc::new(ProgressList::new()));
        let err = pipeline.handle(&project()).unwrap_err();
        assert!(matches!(err, SpanwireError::Store(_)));
        assert!(!err.is_fatal());
        // The pipeline still moved on
        assert!(pipeline.has_project());
    }

    #[test]
    fn test_realloc_keeps_span_history() {
        let (mut pipeline, store, _) = pipeline();
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "a"),
                dataset(1, 2, "r,1,0\nr,3,0\n"),
                event(1, "x,m,t"),
                alloc(1, "a"),
                dataset(1, 1, "r,6,0\n"),
            ],
        );

        let span = store.span(1).unwrap();
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.datasets.len(), 2);
        assert_eq!(span.datasets[1].runs[0].index, 2);
        // Mean of the 2s and 6s dataset averages
        assert_eq!(span.stats.average, Some(Duration::from_nanos(4 * SECOND)));
    }

    #[test]
    fn test_relocation_continues_past_store_error() {
        struct RejectRelocate {
            inner: MemoryStore,
            reject: u32,
        }
        impl EntityStore for RejectRelocate {
            fn apply(&mut self, mutation: Mutation) -> Result<()> {
                if matches!(mutation, Mutation::RelocateSpan { id, .. } if id == self.reject) {
                    return Err(SpanwireError::Io(std::io::Error::other("rejected")));
                }
                self.inner.apply(mutation)
            }
        }

        let store = MemoryStore::new();
        let mut pipeline = IngestionPipeline::new(
            Box::new(RejectRelocate {
                inner: store.clone(),
                reject: 2,
            }),
            Arc::new(ProgressList::new()),
        );
        feed(
            &mut pipeline,
            &[
                project(),
                alloc(1, "a"),
                alloc(2, "b"),
                alloc(3, "c"),
                alloc(4, "d"),
                Message::SpanParent(SpanParent { id: 3, parent: 2 }),
                Message::SpanParent(SpanParent { id: 4, parent: 2 }),
            ],
        );

        let err = pipeline
            .handle(&Message::SpanParent(SpanParent { id: 2, parent: 1 }))
            .unwrap_err();
        assert!(matches!(err, SpanwireError::Store(_)));
        assert_eq!(store.span(2).unwrap().path, "b");
        assert_eq!(store.span(3).unwrap().path, "a/b/c");
        assert_eq!(store.span(4).unwrap().path, "a/b/d");
    }
}
