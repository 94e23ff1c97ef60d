//! mien-store — SQLite persistence for enrolled identities.
//!
//! Persons and their embedding records live in two tables linked by a
//! cascading foreign key. Embeddings are stored as raw little-endian `f32`
//! blobs.

pub mod codec;
pub mod sqlite;

pub use sqlite::SqliteStore;
