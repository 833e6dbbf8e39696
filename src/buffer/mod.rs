//! Byte buffer pooling.
//!
//! # Data Flow
//! ```text
//! request arrives
//!     → pool.get() (capture buffer, copy buffer)
//!     → streaming copy fills them
//!     → pool.put() once the response is done
//! ```
//!
//! # Design Decisions
//! - One pool per gateway, injected at construction
//! - Oversized buffers are dropped instead of retained

pub mod pool;

pub use pool::BufferPool;
