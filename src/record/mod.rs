//! Audit records.
//!
//! # Data Flow
//! ```text
//! request arrives
//!     → pool.get() (PooledRecord, owned by the handler)
//!     → capture_request / capture_outbound / capture_response
//!     → publish() hands ownership to one blocking task
//!     → derive() + sink.publish() + cleanup()
//!     → back on the free list
//! ```
//!
//! # Design Decisions
//! - Publishing never blocks the request handler
//! - A record dropped without publishing (client went away) is still
//!   published, annotated as canceled
//! - Captured bodies are bounded by the buffer pool's default capacity

pub mod capture;
pub mod derive;
pub mod model;
pub mod pool;
pub mod sink;

pub use model::{Outcome, Record};
pub use pool::{PooledRecord, RecordPool};
pub use sink::{build_sink, Sink, SinkError};
