//! Bidirectional replication engine for document-oriented REST APIs:
//! keeps a "cloud" and a "local" Frappe/ERPNext-shaped instance
//! converged, doctype by doctype, document by document.

pub mod adapter;
pub mod config;
pub mod conflict;
pub mod direction;
pub mod document;
pub mod engine;
pub mod error;
pub mod ingress;
pub mod signature;
pub mod store;
pub mod sweeper;
pub mod timestamp;
pub mod worker;

pub use adapter::{HttpRemoteAdapter, ListOptions, RemoteAdapter};
pub use config::{ConflictResolutionPolicy, ReplicationConfig, SideConfig, SyncRules, WebhookConfig};
pub use direction::{Direction, DirectionHint};
pub use document::Document;
pub use engine::{SyncEngine, SyncOutcome};
pub use error::{EngineError, Result};
pub use ingress::IngressState;
pub use store::{SqliteStore, StateStore};
pub use sweeper::{SweepStats, Sweeper};
pub use worker::Worker;
