//! Dataset ingestion: run-log blob → runs plus aggregate statistics.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::line_reader::LineReader;
use super::row_parser::RowParser;
use crate::observe::Progress;
use crate::protocol::Duration;

/// Minimum number of fields in a usable row: message, seconds, nanoseconds.
pub const MIN_ROW_FIELDS: usize = 3;

const MIN_ROW_BYTES: usize = 6;

/// One timed execution sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Per-span index, continuing across datasets.
    pub index: u64,
    pub message: String,
    pub variables: Vec<String>,
    pub duration: Duration,
}

/// All runs of one `SpanDataset` message and their statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub runs: Vec<Run>,
    pub min: Duration,
    pub max: Duration,
    pub average: Duration,
    pub median: Duration,
}

/// Median of an ascending slice. Even length: mean of the two central values.
pub fn median(sorted: &[u64]) -> Option<u64> {
    let len = sorted.len();
    if len == 0 {
        return None;
    }
    let mid = len / 2;
    if len % 2 == 1 {
        Some(sorted[mid])
    } else {
        let sum = u128::from(sorted[mid - 1]) + u128::from(sorted[mid]);
        Some((sum / 2) as u64)
    }
}

/// Build a run from parsed fields; `None` for rows with too few fields.
///
/// Unparsable seconds or nanoseconds count as `0`.
pub fn parse_run(mut fields: Vec<String>, index: u64) -> Option<Run> {
    if fields.len() < MIN_ROW_FIELDS {
        return None;
    }
    let nanos = fields.pop().and_then(|f| f.trim().parse::<u32>().ok());
    let secs = fields.pop().and_then(|f| f.trim().parse::<u32>().ok());
    let mut fields = fields.into_iter();
    let message = fields.next().unwrap_or_default();
    Some(Run {
        index,
        message,
        variables: fields.collect(),
        duration: Duration::from_parts(secs.unwrap_or(0), nanos.unwrap_or(0)),
    })
}

/// Streams a dataset blob into a [`Dataset`].
#[derive(Debug, Clone, Default)]
pub struct DatasetIngestor {
    parser: RowParser,
}

impl DatasetIngestor {
    pub fn new(parser: RowParser) -> Self {
        Self { parser }
    }

    pub fn parser(&self) -> &RowParser {
        &self.parser
    }

    /// Parse `blob` and compute its statistics.
    ///
    /// Returns `None` when `declared_run_count` is zero or no row is usable.
    /// Runs are numbered from `first_index`. `progress` is advanced once per
    /// consumed row.
    pub fn ingest(
        &self,
        blob: &str,
        declared_run_count: u32,
        first_index: u64,
        progress: Option<&Progress>,
    ) -> Option<Dataset> {
        if declared_run_count == 0 {
            return None;
        }

        // The declared count is untrusted. A usable row is at least `a,0,0\n`.
        let capacity = (declared_run_count as usize).min(blob.len() / MIN_ROW_BYTES + 1);
        let mut runs = Vec::with_capacity(capacity);
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut sum = 0u128;
        let mut skipped = 0usize;

        for line in LineReader::new(blob) {
            let index = first_index + runs.len() as u64;
            let Some(run) = parse_run(self.parser.parse(line), index) else {
                skipped += 1;
                continue;
            };
            let nanos = run.duration.nanoseconds;
            min = min.min(nanos);
            max = max.max(nanos);
            sum += u128::from(nanos);
            runs.push(run);
            if let Some(progress) = progress {
                progress.advance(1);
            }
        }

        if runs.is_empty() {
            debug!(declared_run_count, skipped, "dataset has no usable rows");
            return None;
        }
        if skipped > 0 {
            debug!(skipped, parsed = runs.len(), "skipped malformed dataset rows");
        }

        let mut sorted: Vec<u64> = runs.iter().map(|r| r.duration.nanoseconds).collect();
        sorted.sort_unstable();
        let median = median(&sorted).unwrap_or_default();
        let average = (sum / runs.len() as u128) as u64;

        Some(Dataset {
            runs,
            min: Duration::from_nanos(min),
            max: Duration::from_nanos(max),
            average: Duration::from_nanos(average),
            median: Duration::from_nanos(median),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::ProgressList;

    const SECOND: u64 = Duration::NANOS_PER_SEC;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[1, 3, 5]), Some(3));
        assert_eq!(median(&[1, 2, 3, 4]), Some(2));
        assert_eq!(
            median(&[SECOND, 2 * SECOND, 3 * SECOND, 4 * SECOND]),
            Some(2_500_000_000)
        );
        assert_eq!(median(&[7]), Some(7));
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[u64::MAX, u64::MAX]), Some(u64::MAX));
    }

    #[test]
    fn test_basic_dataset() {
        let ingestor = DatasetIngestor::default();
        let dataset = ingestor
            .ingest("r1,1,0\nr2,2,0\nr3,3,0\n", 3, 0, None)
            .unwrap();

        assert_eq!(dataset.runs.len(), 3);
        assert_eq!(dataset.min.nanoseconds, SECOND);
        assert_eq!(dataset.max.nanoseconds, 3 * SECOND);
        assert_eq!(dataset.average.nanoseconds, 2 * SECOND);
        assert_eq!(dataset.median.nanoseconds, 2 * SECOND);
        assert_eq!(dataset.runs[2].message, "r3");
        assert_eq!(dataset.runs[2].index, 2);
    }

    #[test]
    fn test_zero_declared_runs() {
        let ingestor = DatasetIngestor::default();
        assert!(ingestor.ingest("r1,1,0\n", 0, 0, None).is_none());
    }

    #[test]
    fn test_no_usable_rows() {
        let ingestor = DatasetIngestor::default();
        assert!(ingestor.ingest("garbage\nx,y\n", 2, 0, None).is_none());
    }

    #[test]
    fn test_variables_and_bad_numbers() {
        let ingestor = DatasetIngestor::default();
        let dataset = ingestor
            .ingest("\"load, cold\",path=/a,size=3,abc,500\n", 1, 10, None)
            .unwrap();

        let run = &dataset.runs[0];
        assert_eq!(run.index, 10);
        assert_eq!(run.message, "load, cold");
        assert_eq!(run.variables, vec!["path=/a", "size=3"]);
        assert_eq!(run.duration.nanoseconds, 500);
    }

    #[test]
    fn test_statistics_use_parsed_rows() {
        let ingestor = DatasetIngestor::default();
        // Declared 4, only 2 usable
        let dataset = ingestor.ingest("a,2,0\nbad\nb,4,0\n", 4, 0, None).unwrap();
        assert_eq!(dataset.runs.len(), 2);
        assert_eq!(dataset.average.nanoseconds, 3 * SECOND);
        assert_eq!(dataset.median.nanoseconds, 3 * SECOND);
    }

    #[test]
    fn test_progress_advanced_per_row() {
        let list = ProgressList::new();
        let progress = list.begin("Importing dataset...", 3);
        let ingestor = DatasetIngestor::default();
        ingestor.ingest("a,1,0\nb,1,0\nc,1,0", 3, 0, Some(&progress));
        assert_eq!(progress.current(), 3);
    }

    #[test]
    fn test_custom_delimiter() {
        let ingestor = DatasetIngestor::new(RowParser::new(';'));
        let dataset = ingestor.ingest("a,b;0;250\r\n", 1, 0, None).unwrap();
        assert_eq!(dataset.runs[0].message, "a,b");
        assert_eq!(dataset.max.nanoseconds, 250);
    }

    #[test]
    fn test_huge_declared_run_count() {
        let ingestor = DatasetIngestor::default();
        let dataset = ingestor.ingest("r1,1,0\n", u32::MAX, 0, None).unwrap();
        assert_eq!(dataset.runs.len(), 1);
        assert_eq!(dataset.average.nanoseconds, SECOND);
    }
}
