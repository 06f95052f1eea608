//! # spanwire-client
//!
//! Rust client for the BP3D span-profiler wire protocol.
//!
//! A profiled application runs a small debug server; this crate connects
//! to it, validates the 40-byte handshake, decodes the length-prefixed
//! message stream and turns it into a span tree, timestamped events and
//! run datasets delivered to an [`EntityStore`](pipeline::EntityStore).
//!
//! ## Architecture
//!
//! - **Reader task**: socket bytes → [`WireCodec`](protocol::WireCodec) →
//!   [`MessageCodec`](protocol::MessageCodec)
//! - **Worker task**: [`SessionController`] + [`IngestionPipeline`](pipeline::IngestionPipeline)
//!   applied strictly in arrival order
//! - **Writer task**: batched outbound frames (hello echo, client config,
//!   record toggles)
//!
//! ## Example
//!
//! ```ignore
//! use spanwire_client::pipeline::MemoryStore;
//! use spanwire_client::{SessionBuilder, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> spanwire_client::error::Result<()> {
//!     let manager = SessionManager::default();
//!     let store = MemoryStore::new();
//!     let mut session = SessionBuilder::new()
//!         .endpoint("localhost:4026".parse()?)
//!         .connect(&manager, Box::new(store.clone()))
//!         .await?;
//!
//!     session.wait_for_close().await;
//!     println!("{} projects recorded", store.projects().len());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod dataset;
pub mod error;
pub mod observe;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod span_tree;
pub mod transport;
pub mod writer;

pub use error::SpanwireError;
pub use session::{
    Session, SessionBuilder, SessionConfig, SessionController, SessionManager, SessionState,
    StreamPhase,
};
pub use span_tree::SpanTree;
