//! Core of a single-user site visit tracker.
//!
//! A site table is loaded from a working copy (or, on first run, the pristine
//! spreadsheet), filtered into views, edited through those views, reconciled
//! back by key and written out again.

pub mod about;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod filter;
pub mod map_view;
pub mod persistence;
pub mod progress;
pub mod reconcile;
pub mod schema;

pub use config::{ColumnNames, EXPORT_FILE_NAME, TrackerConfig};
pub use dataset::{Dataset, Record};
pub use engine::{Engine, Operation, OpResult, RowEdit, TrackerEngine, Workflow};
pub use error::{ErrorCode, TrackerError};
pub use filter::{ALL_SENTINEL, Predicates, Selection, View, ViewRow};
pub use map_view::{MapLayer, MapPoint};
pub use persistence::{LoadCache, LoadOrigin, PersistenceGateway};
pub use progress::Progress;
pub use reconcile::{ReconcileReport, reconcile};
pub use schema::{Schema, SchemaFlags};
