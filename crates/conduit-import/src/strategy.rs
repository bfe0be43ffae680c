//! Copy strategies: how rows physically move from a source dataset to the
//! destination sandbox table.
//!
//! The executor resolves a [`CopyStrategy`] once, with the connections it
//! needs, and then only ever calls [`CopyStrategy::start`].

use std::sync::Arc;

use conduit_core::types::UserId;
use tracing::{debug, info};

use crate::{
    backend::{qualified, quote_ident, BackendConnection, Column},
    error::{ImportError, Result},
    pipe::{TransferChannel, TransferDir},
    types::{Dataset, SchemaRef, Vendor},
};

/// Everything a strategy needs to know about one copy.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: Dataset,
    pub destination_schema: SchemaRef,
    pub destination_table: String,
    pub actor: UserId,
    pub sample_count: Option<u64>,
    pub truncate: bool,
    pub channel: TransferChannel,
}

impl CopyRequest {
    fn destination(&self) -> String {
        qualified(&self.destination_schema.schema, &self.destination_table)
    }

    fn source_table(&self) -> String {
        qualified(&self.source.schema.schema, &self.source.name)
    }
}

/// Which strategy a source/destination pair calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    SameDatabase,
    CrossDatabase,
    Vendor,
}

impl StrategyKind {
    /// Foreign vendors always take the vendor path; otherwise the physical
    /// database decides.
    pub fn select(source_vendor: Vendor, source: &SchemaRef, destination: &SchemaRef) -> Self {
        if source_vendor.is_foreign() {
            StrategyKind::Vendor
        } else if !source.same_database(destination) {
            StrategyKind::CrossDatabase
        } else {
            StrategyKind::SameDatabase
        }
    }
}

pub enum CopyStrategy {
    SameDatabase(SameDatabaseCopy),
    CrossDatabase(CrossDatabaseCopy),
    Vendor(VendorCopy),
}

impl CopyStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            CopyStrategy::SameDatabase(_) => StrategyKind::SameDatabase,
            CopyStrategy::CrossDatabase(_) => StrategyKind::CrossDatabase,
            CopyStrategy::Vendor(_) => StrategyKind::Vendor,
        }
    }

    /// Run the copy. Returns the number of rows written when the backend
    /// reports it.
    pub async fn start(&self, request: &CopyRequest) -> Result<u64> {
        match self {
            CopyStrategy::SameDatabase(s) => s.start(request).await,
            CopyStrategy::CrossDatabase(s) => s.start(request).await,
            CopyStrategy::Vendor(s) => s.start(request).await,
        }
    }
}

/// Source and destination share a database: one transactional statement batch.
pub struct SameDatabaseCopy {
    connection: Arc<dyn BackendConnection>,
}

impl SameDatabaseCopy {
    pub fn new(connection: Arc<dyn BackendConnection>) -> Self {
        Self { connection }
    }

    async fn start(&self, request: &CopyRequest) -> Result<u64> {
        let exists = destination_exists(self.connection.as_ref(), request).await?;
        let limit = request
            .sample_count
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        let select = format!("SELECT * FROM {}{limit}", request.source_table());
        let destination = request.destination();

        // Multiple statements in one simple query run as one transaction.
        let sql = if !exists {
            format!("CREATE TABLE {destination} AS {select}")
        } else if request.truncate {
            format!("TRUNCATE TABLE {destination}; INSERT INTO {destination} {select}")
        } else {
            format!("INSERT INTO {destination} {select}")
        };

        debug!(%sql, "same-database copy");
        let rows = self.connection.execute(&sql, None).await?;
        info!(rows, destination = %destination, "same-database copy finished");
        Ok(rows)
    }
}

/// Different databases of the same vendor family: stream through a named pipe.
pub struct CrossDatabaseCopy {
    source: Arc<dyn BackendConnection>,
    destination: Arc<dyn BackendConnection>,
    transfer: TransferDir,
}

impl CrossDatabaseCopy {
    pub fn new(
        source: Arc<dyn BackendConnection>,
        destination: Arc<dyn BackendConnection>,
        transfer: TransferDir,
    ) -> Self {
        Self {
            source,
            destination,
            transfer,
        }
    }

    async fn start(&self, request: &CopyRequest) -> Result<u64> {
        let columns = source_columns(self.source.as_ref(), request).await?;
        let limit = request
            .sample_count
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        let query = format!("SELECT * FROM {}{limit}", request.source_table());
        pipe_transfer(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.transfer,
            request,
            &query,
            &columns,
        )
        .await
    }
}

/// Source on a foreign vendor: vendor dialect on the way out, mapped column
/// types on the way in.
pub struct VendorCopy {
    source: Arc<dyn BackendConnection>,
    destination: Arc<dyn BackendConnection>,
    transfer: TransferDir,
}

impl VendorCopy {
    pub fn new(
        source: Arc<dyn BackendConnection>,
        destination: Arc<dyn BackendConnection>,
        transfer: TransferDir,
    ) -> Self {
        Self {
            source,
            destination,
            transfer,
        }
    }

    async fn start(&self, request: &CopyRequest) -> Result<u64> {
        let columns: Vec<Column> = source_columns(self.source.as_ref(), request)
            .await?
            .into_iter()
            .map(|c| Column {
                data_type: map_foreign_type(&c.data_type).to_string(),
                name: c.name,
            })
            .collect();
        // Unquoted Oracle identifiers are stored upper-case.
        let select_list = columns
            .iter()
            .map(|c| quote_ident(&c.name.to_ascii_uppercase()))
            .collect::<Vec<_>>()
            .join(", ");
        let filter = request
            .sample_count
            .map(|n| format!(" WHERE ROWNUM <= {n}"))
            .unwrap_or_default();
        let source_table = qualified(
            &request.source.schema.schema.to_ascii_uppercase(),
            &request.source.name.to_ascii_uppercase(),
        );
        let query = format!("SELECT {select_list} FROM {source_table}{filter}");
        pipe_transfer(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.transfer,
            request,
            &query,
            &columns,
        )
        .await
    }
}

async fn destination_exists(conn: &dyn BackendConnection, request: &CopyRequest) -> Result<bool> {
    let tables = conn
        .table_names(&request.destination_schema.schema)
        .await?;
    Ok(tables.iter().any(|t| t == &request.destination_table))
}

async fn source_columns(conn: &dyn BackendConnection, request: &CopyRequest) -> Result<Vec<Column>> {
    let columns = conn
        .columns(&request.source.schema.schema, &request.source.name)
        .await?;
    if columns.is_empty() {
        return Err(ImportError::Copy(format!(
            "source table {} has no columns",
            request.source.scoped_name()
        )));
    }
    Ok(columns)
}

/// Shared pipe path of the cross-database and vendor strategies.
///
/// Prepares the destination table, then runs the writer (source side) and
/// reader (destination side) concurrently over a FIFO. The FIFO is removed
/// when this returns, whatever the outcome.
async fn pipe_transfer(
    source: &dyn BackendConnection,
    destination: &dyn BackendConnection,
    transfer: &TransferDir,
    request: &CopyRequest,
    query: &str,
    columns: &[Column],
) -> Result<u64> {
    if transfer.path().is_none() {
        return Err(ImportError::TransferNotConfigured);
    }

    let target = request.destination();
    if !destination_exists(destination, request).await? {
        let defs = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), destination_type(&c.data_type)))
            .collect::<Vec<_>>()
            .join(", ");
        destination
            .execute(&format!("CREATE TABLE {target} ({defs})"), None)
            .await?;
    } else if request.truncate {
        destination
            .execute(&format!("TRUNCATE TABLE {target}"), None)
            .await?;
    }

    if destination.running(&request.channel.reader_pattern()).await? {
        return Err(ImportError::TransferActive(request.channel.to_string()));
    }

    let pipe = transfer.create_pipe(&request.channel)?;
    info!(channel = %request.channel, "pipe transfer started");

    let writer_name = request.channel.writer_name();
    let reader_name = request.channel.reader_name();
    let writer = source.export_to_pipe(query, pipe.path(), &writer_name);
    let reader = destination.import_from_pipe(&target, pipe.path(), &reader_name);
    let (_, rows) = tokio::try_join!(writer, reader)?;

    info!(rows, channel = %request.channel, "pipe transfer finished");
    Ok(rows)
}

/// Types information_schema reports that cannot be used in a column definition.
fn destination_type(data_type: &str) -> &str {
    match data_type {
        "USER-DEFINED" | "ARRAY" => "text",
        other => other,
    }
}

/// Map a foreign (Oracle) column type onto a Postgres-family type.
pub fn map_foreign_type(data_type: &str) -> &'static str {
    let upper = data_type.to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "NUMBER" | "DECIMAL" | "INTEGER" | "INT" | "SMALLINT" => "numeric",
        "FLOAT" | "BINARY_FLOAT" | "BINARY_DOUBLE" => "double precision",
        "DATE" => "timestamp",
        b if b.starts_with("TIMESTAMP") => "timestamp",
        "BLOB" | "RAW" | "LONG RAW" => "bytea",
        _ => "text",
    }
}
