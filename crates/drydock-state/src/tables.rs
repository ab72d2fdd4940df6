//! redb table definitions for the attempt store.
//!
//! Values are JSON-serialized domain types in `&[u8]` columns.

use redb::TableDefinition;

/// Terminal deployment attempts keyed by attempt id.
pub const ATTEMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attempts");

/// Insertion order: monotonic sequence number → attempt id. Keeps
/// history listable in the order attempts finished.
pub const ATTEMPT_ORDER: TableDefinition<u64, &str> = TableDefinition::new("attempt_order");
