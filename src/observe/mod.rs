//! Observer-facing state shared with the worker: progress and errors.

mod errors;
mod progress;

pub use errors::{ErrorNotice, ErrorQueue};
pub use progress::{Progress, ProgressList, ProgressSnapshot};
