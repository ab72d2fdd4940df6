//! drydock-state — local orchestrator state.
//!
//! Two concerns live here, both scoped to the machine the orchestrator
//! runs on (never the deployment target):
//!
//! - **`store`** — append-only attempt history backed by
//!   [redb](https://docs.rs/redb). Terminal attempt records are written
//!   once and never mutated.
//! - **`lock`** — the per-(environment, host) advisory file lock that
//!   enforces one deployment attempt at a time. The controller assumes
//!   this exclusion; it does not implement it.

pub mod error;
pub mod lock;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use lock::EnvironmentLock;
pub use store::AttemptStore;
