//! Storage backends implementing the data port traits
//!
//! - [`memory`]: tables held in process memory (feature `memory`)
//! - [`sql`]: PostgreSQL rendering of the query model
//! - [`postgres`]: `sqlx` adapter executing that SQL (feature `database`)

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
pub mod sql;

#[cfg(feature = "memory")]
pub use memory::{MemoryStore, MemoryStoreBuilder, MemoryStoreError};
#[cfg(feature = "database")]
pub use postgres::PgDataPort;
