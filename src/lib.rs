//! MemoryMesh - embeddable AI memory
//!
//! A local-first, single-process library that persistently stores short
//! textual memories and retrieves them by semantic relevance:
//!
//! ```no_run
//! use memorymesh::{MemoryMesh, MeshConfig, RecallOptions, RememberOptions};
//!
//! let mesh = MemoryMesh::open(MeshConfig::default())?;
//! mesh.remember("The user prefers dark mode.", RememberOptions::default())?;
//! let results = mesh.recall("What theme does the user like?", RecallOptions::default())?;
//! # Ok::<(), memorymesh::MemoryMeshError>(())
//! ```

pub mod embedding;
pub mod error;
pub mod intelligence;
pub mod mesh;
pub mod search;
pub mod storage;
pub mod types;

pub use embedding::{Embedder, EmbeddingSelector};
pub use error::{MemoryMeshError, Result};
pub use mesh::{MemoryMesh, MeshConfig};
pub use search::{RelevanceEngine, RelevanceWeights};
pub use storage::{MemoryBackend, MemoryStore};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
