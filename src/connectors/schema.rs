//! Table schema declarations
//!
//! Column headers the host uses to build its extract for each table.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Column data type understood by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    String,
    Date,
    Datetime,
}

/// A single column declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ColumnHeader {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    /// Whether the host may pass this column's last value back as the
    /// incremental refresh watermark.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incremental_refresh: bool,
}

impl ColumnHeader {
    pub fn new(name: &str, data_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            incremental_refresh: false,
        }
    }

    pub fn incremental(mut self) -> Self {
        self.incremental_refresh = true;
        self
    }
}

/// Tables exposed by the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableId {
    Builds,
    Commits,
    Jobs,
}

impl TableId {
    pub const ALL: [TableId; 3] = [TableId::Builds, TableId::Commits, TableId::Jobs];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableId::Builds => "builds",
            TableId::Commits => "commits",
            TableId::Jobs => "jobs",
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TableId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "builds" => Ok(TableId::Builds),
            "commits" => Ok(TableId::Commits),
            "jobs" => Ok(TableId::Jobs),
            other => Err(format!("unknown table '{other}'")),
        }
    }
}

/// Schema of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TableSchema {
    pub id: TableId,
    pub alias: String,
    pub columns: Vec<ColumnHeader>,
}

impl TableSchema {
    /// Column the host should use for incremental refresh, if any.
    pub fn incremental_column(&self) -> Option<&ColumnHeader> {
        self.columns.iter().find(|c| c.incremental_refresh)
    }
}

/// Schema for a single table
pub fn table_schema(table: TableId) -> TableSchema {
    use ColumnType::{Bool, Datetime, Int};
    let text = ColumnType::String;

    let columns = match table {
        TableId::Builds => vec![
            ColumnHeader::new("id", Int),
            ColumnHeader::new("repository_id", Int),
            ColumnHeader::new("commit_id", Int),
            ColumnHeader::new("number", Int).incremental(),
            ColumnHeader::new("pull_request", Bool),
            ColumnHeader::new("pull_request_title", text),
            ColumnHeader::new("pull_request_number", Int),
            ColumnHeader::new("state", text),
            ColumnHeader::new("started_at", Datetime),
            ColumnHeader::new("finished_at", Datetime),
            ColumnHeader::new("duration", Int),
        ],
        TableId::Commits => vec![
            ColumnHeader::new("id", Int),
            ColumnHeader::new("sha", text),
            ColumnHeader::new("branch", text),
            ColumnHeader::new("message", text),
            ColumnHeader::new("committed_at", Datetime),
            ColumnHeader::new("author_name", text),
            ColumnHeader::new("author_email", text),
            ColumnHeader::new("committer_name", text),
            ColumnHeader::new("committer_email", text),
            ColumnHeader::new("compare_url", text),
            ColumnHeader::new("pull_request_number", Int),
        ],
        TableId::Jobs => vec![
            ColumnHeader::new("id", Int),
            ColumnHeader::new("build_id", Int),
            ColumnHeader::new("repository_id", Int),
            ColumnHeader::new("commit_id", Int),
            ColumnHeader::new("number", text),
            ColumnHeader::new("state", text),
            ColumnHeader::new("started_at", Datetime),
            ColumnHeader::new("finished_at", Datetime),
            ColumnHeader::new("allow_failure", Bool),
            ColumnHeader::new("queue", text),
        ],
    };

    let alias = match table {
        TableId::Builds => "Travis CI Builds",
        TableId::Commits => "Travis CI Commits",
        TableId::Jobs => "Travis CI Jobs",
    };

    TableSchema {
        id: table,
        alias: alias.to_string(),
        columns,
    }
}

/// Schemas for every table, builds first
pub fn all_schemas() -> Vec<TableSchema> {
    TableId::ALL.into_iter().map(table_schema).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_columns_and_incremental_key() {
        let schema = table_schema(TableId::Builds);
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "repository_id",
                "commit_id",
                "number",
                "pull_request",
                "pull_request_title",
                "pull_request_number",
                "state",
                "started_at",
                "finished_at",
                "duration",
            ]
        );
        let incremental = schema.incremental_column().unwrap();
        assert_eq!(incremental.name, "number");
        assert_eq!(incremental.data_type, ColumnType::Int);
    }

    #[test]
    fn test_only_builds_supports_incremental_refresh() {
        assert!(table_schema(TableId::Commits).incremental_column().is_none());
        assert!(table_schema(TableId::Jobs).incremental_column().is_none());
    }

    #[test]
    fn test_column_header_serialization() {
        let json = serde_json::to_value(ColumnHeader::new("number", ColumnType::Int).incremental())
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "name": "number", "type": "int", "incremental_refresh": true })
        );

        let plain = serde_json::to_value(ColumnHeader::new("state", ColumnType::String)).unwrap();
        assert!(plain.get("incremental_refresh").is_none());
    }

    #[test]
    fn test_table_id_parsing() {
        assert_eq!("Builds".parse::<TableId>(), Ok(TableId::Builds));
        assert_eq!(" jobs ".parse::<TableId>(), Ok(TableId::Jobs));
        assert!("artifacts".parse::<TableId>().is_err());
        assert_eq!(all_schemas().len(), 3);
    }
}
