//! Capability seam between the import pipeline and data source backends.
//!
//! Copy strategies and cancellation only use [`BackendConnection`]; the
//! Postgres/Greenplum adapter lives in [`crate::postgres`].

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use conduit_core::types::UserId;

use crate::{
    error::BackendError,
    types::{DataSource, Vendor},
};

/// A server-side session or process visible to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: i64,
    /// Session name the process was started under.
    pub name: String,
}

/// Column definition read from the backend catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
        }
    }
}

/// An open connection to one physical database.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    fn vendor(&self) -> Vendor;

    /// Run one or more statements, optionally under a named session so the
    /// work can be found by [`list_processes`](Self::list_processes).
    ///
    /// Returns the number of rows affected by the last statement.
    async fn execute(&self, sql: &str, session_name: Option<&str>) -> Result<u64, BackendError>;

    /// Sessions whose name matches a LIKE-style `pattern` (`%` = any run,
    /// `_` = any single character).
    async fn list_processes(&self, pattern: &str) -> Result<Vec<ProcessHandle>, BackendError>;

    /// Terminate a session. Killing a session that already ended is not an error.
    async fn kill(&self, process: &ProcessHandle) -> Result<(), BackendError>;

    async fn table_names(&self, schema: &str) -> Result<Vec<String>, BackendError>;

    /// Columns of `schema.table` in ordinal order; empty when the table is missing.
    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<Column>, BackendError>;

    /// Stream the rows of `query` into the pipe at `pipe`.
    async fn export_to_pipe(
        &self,
        query: &str,
        pipe: &Path,
        session_name: &str,
    ) -> Result<u64, BackendError> {
        let sql = format!("COPY ({query}) TO {}", quote_literal(&pipe.to_string_lossy()));
        self.execute(&sql, Some(session_name)).await
    }

    /// Load rows from the pipe at `pipe` into `qualified_table`.
    async fn import_from_pipe(
        &self,
        qualified_table: &str,
        pipe: &Path,
        session_name: &str,
    ) -> Result<u64, BackendError> {
        let sql = format!(
            "COPY {qualified_table} FROM {}",
            quote_literal(&pipe.to_string_lossy())
        );
        self.execute(&sql, Some(session_name)).await
    }

    async fn running(&self, pattern: &str) -> Result<bool, BackendError> {
        Ok(!self.list_processes(pattern).await?.is_empty())
    }
}

/// Opens connections to data sources on behalf of a user.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(
        &self,
        data_source: &DataSource,
        database: &str,
        user: &UserId,
    ) -> Result<Arc<dyn BackendConnection>, BackendError>;
}

/// Quote an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Quote a string literal with single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
