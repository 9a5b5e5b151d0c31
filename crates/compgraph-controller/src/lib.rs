//! compgraph-controller: verified dependency-graph resolution
//!
//! Fetches a root component version, verifies it, and persists it and every
//! component it references as owned descriptor records. The repository, the
//! signature check and the store are traits; the reconciler is code that
//! strings them together.

pub mod config;
pub mod graph;
pub mod intents;
pub mod queue;
pub mod reconcile;
pub mod repository;
pub mod status;
pub mod store;
pub mod upsert;
pub mod verify;

pub use config::{ControllerConfig, QueueConfig};
pub use graph::{BuildStats, GraphBuilder};
pub use intents::{load_intents, parse_intents};
pub use queue::{Controller, ControllerQueue, ControllerStats, Reconcile, WorkQueue};
pub use reconcile::{Action, ReconcileError, Reconciler};
pub use repository::{ComponentRepository, LocalFsRepository, MemoryRepository};
pub use status::{commit, StatusPatch};
pub use store::{MemoryStore, ObjectStore};
pub use upsert::{upsert_descriptor, UpsertOp};
pub use verify::{
    sign, verify_component, Ed25519Verifier, KeyDirectory, PublicKeySource, SignatureVerifier,
    StaticKeys,
};
