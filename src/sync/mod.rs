//! Mail ingestion.
//!
//! Moves mail from a source into the search index:
//!
//! - **`source`**: IMAP mailboxes, mbox archive trees and the Mailspring
//!   store, each a lazy iterator of raw messages tagged with a folder.
//! - **`parser`**: normalizes raw messages into [`MailRecord`]s, using
//!   **`address`** for recipient headers and **`text`** for HTML bodies.
//! - **`batcher`**: groups records into fixed-size batches.
//! - **`sink`**: pushes batches to the backend with bounded concurrency.
//! - **`pipeline`**: drives one source through all of the above.
//!
//! ## Data Flow
//!
//! 1. The pipeline pulls items from the source on a blocking thread
//! 2. Each item is normalized; failures are logged and skipped
//! 3. Full batches (and the final partial one) are submitted to the sink
//! 4. The sink spawns the push, waiting for a free slot when at capacity
//! 5. The caller waits for the sink to drain before exiting
//!
//! [`MailRecord`]: crate::models::MailRecord

pub mod address;
pub mod batcher;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod text;

pub use batcher::{Batcher, DEFAULT_BATCH_SIZE};
pub use parser::{ParseMailError, normalize};
pub use pipeline::{Pipeline, PipelineError, PipelineStats};
pub use sink::{DocumentBackend, PushSink, SinkError, SinkStats};
pub use source::{RawMessage, SourceError, SourceItem};
