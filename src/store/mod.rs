//! `Model` implementations: PostgreSQL for serving, in-memory for tests and prototypes.

mod memory;
mod pg;

pub use memory::{MemoryModel, MemoryStore};
pub use pg::PgModel;
