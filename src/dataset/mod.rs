//! Dataset ingestion: line reading, row splitting and run statistics.

mod ingest;
mod line_reader;
mod row_parser;

pub use ingest::{median, parse_run, Dataset, DatasetIngestor, Run, MIN_ROW_FIELDS};
pub use line_reader::LineReader;
pub use row_parser::{RowParser, DEFAULT_DELIMITER};
