//! AttemptStore — append-only deployment history.
//!
//! Terminal `DeploymentAttempt` records are JSON-serialized into redb.
//! A record is written exactly once; re-recording an id is an error,
//! which is what makes the history append-only rather than mutable.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use drydock_core::DeploymentAttempt;

use crate::error::{StateError, StateResult};
use crate::tables::{ATTEMPTS, ATTEMPT_ORDER};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe attempt history backed by redb.
#[derive(Clone)]
pub struct AttemptStore {
    db: Arc<Database>,
}

impl AttemptStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "attempt store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory attempt store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        txn.open_table(ATTEMPT_ORDER).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Record a terminal attempt. Insert-only: an id that already
    /// exists is refused, never overwritten.
    pub fn record_attempt(&self, attempt: &DeploymentAttempt) -> StateResult<()> {
        let value = serde_json::to_vec(attempt).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
            if table
                .get(attempt.id.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyRecorded(attempt.id.clone()));
            }
            table
                .insert(attempt.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut order = txn.open_table(ATTEMPT_ORDER).map_err(map_err!(Table))?;
            let next_seq = order
                .last()
                .map_err(map_err!(Read))?
                .map(|(k, _)| k.value() + 1)
                .unwrap_or(0);
            order
                .insert(next_seq, attempt.id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(attempt_id = %attempt.id, outcome = attempt.outcome.label(), "attempt recorded");
        Ok(())
    }

    /// Get a terminal attempt by id.
    pub fn get_attempt(&self, id: &str) -> StateResult<Option<DeploymentAttempt>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let attempt: DeploymentAttempt =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(attempt))
            }
            None => Ok(None),
        }
    }

    /// List all attempts in the order they were recorded.
    pub fn list_attempts(&self) -> StateResult<Vec<DeploymentAttempt>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let order = txn.open_table(ATTEMPT_ORDER).map_err(map_err!(Table))?;
        let attempts = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;

        let mut results = Vec::new();
        for entry in order.iter().map_err(map_err!(Read))? {
            let (_, id) = entry.map_err(map_err!(Read))?;
            if let Some(guard) = attempts.get(id.value()).map_err(map_err!(Read))? {
                let attempt: DeploymentAttempt =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                results.push(attempt);
            }
        }
        Ok(results)
    }
}
