// crates/db/src/queries/mod.rs
// Job CRUD operations for the ferry SQLite database.

pub mod jobs;
mod row_types;
