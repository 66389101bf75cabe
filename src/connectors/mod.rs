//! Connectors module
//!
//! This module provides the connector pieces the host talks to:
//! - The host contract (`DataSink`, `ConnectionData`) and refresh adapter
//! - Table schema declarations
//! - The Travis CI sync engine

pub mod host;
pub mod schema;
pub mod trait_;
pub mod travis;

pub use host::{
    RefreshOutcome, RefreshRequest, parse_last_record, refresh_builds, refresh_commits,
    refresh_jobs, refresh_table,
};
pub use schema::{ColumnHeader, ColumnType, TableId, TableSchema, all_schemas, table_schema};
pub use trait_::{ConnectionData, DataSink, RecordingSink};
