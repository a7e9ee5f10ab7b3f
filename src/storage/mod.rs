//! Operational-state store: a single `(namespace, key) -> value` table.
mod db;
mod ops;

pub use db::{OpStateStore, DB_FILE_NAME};
pub use ops::OpStateEntry;
