//! Postgres / Greenplum adapter over `sqlx`.
//!
//! Sessions are named through `application_name`, so the reader and writer
//! of a transfer show up in `pg_stat_activity` and can be terminated with
//! `pg_terminate_backend`.

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use conduit_core::{config::ConduitConfig, types::UserId};
use dashmap::DashMap;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Executor, PgPool,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendConnection, BackendConnector, Column, ProcessHandle},
    error::BackendError,
    types::{DataSource, Vendor},
};

/// Builds and caches one lazy pool per (data source, database).
pub struct PgConnector {
    config: ConduitConfig,
    pools: DashMap<(String, String), PgPool>,
}

impl PgConnector {
    pub fn new(config: ConduitConfig) -> Self {
        Self {
            config,
            pools: DashMap::new(),
        }
    }

    fn pool_for(&self, data_source: &DataSource, database: &str) -> Result<PgPool, BackendError> {
        let key = (data_source.name.clone(), database.to_string());
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.clone());
        }

        let settings = self.config.data_source(&data_source.name).ok_or_else(|| {
            BackendError::NotConfigured {
                name: data_source.name.clone(),
            }
        })?;
        let options = PgConnectOptions::from_str(&settings.url)
            .map_err(|e| BackendError::Connection(e.to_string()))?
            .database(database);
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_lazy_with(options);

        info!(data_source = %data_source.name, database, "backend pool created");
        // Another worker may have raced us here; keep whichever landed first.
        Ok(self.pools.entry(key).or_insert(pool).clone())
    }
}

#[async_trait]
impl BackendConnector for PgConnector {
    async fn connect(
        &self,
        data_source: &DataSource,
        database: &str,
        user: &UserId,
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        if data_source.vendor.is_foreign() {
            return Err(BackendError::UnsupportedVendor(data_source.vendor));
        }
        debug!(data_source = %data_source.name, database, user = %user, "connecting");
        let pool = self.pool_for(data_source, database)?;
        Ok(Arc::new(PgConnection {
            pool,
            vendor: data_source.vendor,
        }))
    }
}

/// A pooled connection handle to one Postgres-family database.
pub struct PgConnection {
    pool: PgPool,
    vendor: Vendor,
}

#[async_trait]
impl BackendConnection for PgConnection {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn execute(&self, sql: &str, session_name: Option<&str>) -> Result<u64, BackendError> {
        let mut pooled = self.pool.acquire().await?;
        let conn: &mut sqlx::PgConnection = &mut pooled;

        if let Some(name) = session_name {
            sqlx::query("SELECT set_config('application_name', $1, false)")
                .bind(name)
                .execute(&mut *conn)
                .await?;
        }

        let result = (&mut *conn).execute(sqlx::raw_sql(sql)).await;

        if session_name.is_some() {
            // A terminated session cannot be reset; the pool discards it.
            if let Err(e) = sqlx::query("RESET application_name")
                .execute(&mut *conn)
                .await
            {
                debug!("could not reset application_name: {e}");
            }
        }

        match result {
            Ok(done) => Ok(done.rows_affected()),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("57P01") => {
                Err(BackendError::Terminated(
                    session_name.unwrap_or("anonymous").to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_processes(&self, pattern: &str) -> Result<Vec<ProcessHandle>, BackendError> {
        let rows: Vec<(i32, String)> = sqlx::query_as(
            "SELECT pid, application_name FROM pg_stat_activity
             WHERE application_name LIKE $1 AND pid <> pg_backend_pid()",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(pid, name)| ProcessHandle {
                pid: i64::from(pid),
                name,
            })
            .collect())
    }

    async fn kill(&self, process: &ProcessHandle) -> Result<(), BackendError> {
        let pid = i32::try_from(process.pid)
            .map_err(|_| BackendError::Query(format!("invalid backend pid {}", process.pid)))?;
        let terminated: bool = sqlx::query_scalar("SELECT pg_terminate_backend($1)")
            .bind(pid)
            .fetch_one(&self.pool)
            .await?;
        if !terminated {
            warn!(pid, name = %process.name, "backend process was already gone");
        }
        Ok(())
    }

    async fn table_names(&self, schema: &str) -> Result<Vec<String>, BackendError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = $1 ORDER BY table_name",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<Column>, BackendError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type)| Column { name, data_type })
            .collect())
    }
}
