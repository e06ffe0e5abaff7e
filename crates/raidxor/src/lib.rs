//! Cache-line engine for arrays protected by a generalized XOR erasure code.
//!
//! Member devices ("units") hold either data or redundant content. Redundant
//! content is an XOR combination of data units (and shared temporaries) and
//! is used to rebuild data when a unit fails. Application I/O is staged in a
//! fixed pool of cache lines driven by a single worker.
#![allow(clippy::cargo_common_metadata)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod retention;
pub mod transport;
pub mod xor;

pub use cache::{Direction, LineState, Request};
pub use engine::{ArrayStatus, Engine, EngineConfig};
pub use error::{Error, Result};
pub use layout::geometry::Geometry;
pub use layout::model::{Equation, LayoutModel, Role, Source};
pub use retention::DiskArray;
pub use transport::Transport;
