//! Destination database handle + HTTP fetch utilities for DDS.
//!
//! The destination connection is a single `PgConnection` owned by
//! [`Database`] and passed `&mut` for the lifetime of one ingestion run:
//! no pool, no process-wide singleton, no concurrent writers. A dropped
//! connection is fatal to the run.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use dds_core::{ColumnSpec, IngestError, RowBatch, Scalar};
use reqwest::StatusCode;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, Postgres, Row};
use thiserror::Error;
use tracing::info_span;

pub const CRATE_NAME: &str = "dds-storage";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl From<FetchError> for IngestError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Request(e) => IngestError::UpstreamRequest {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                status: None,
                message: e.to_string(),
            },
            FetchError::HttpStatus { status, url } => IngestError::UpstreamRequest {
                url,
                status: Some(status),
                message: "non-success status".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Thin wrapper over `reqwest`. Requests are issued exactly once: a
/// non-2xx or transport failure surfaces immediately to the caller, which
/// aborts the current dataset. The only timeout is the client timeout.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET a JSON document. Any non-2xx status is a hard failure.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let span = info_span!("http_get", url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.json().await?)
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let span = info_span!("http_post", url);
        let _guard = span.enter();

        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.json().await?)
    }

    /// GET a text resource where 404 means expected absence, not error.
    /// Used for the per-quarter employment CSV files.
    pub async fn get_text_optional(&self, url: &str) -> Result<Option<String>, FetchError> {
        let span = info_span!("http_get", url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(Some(resp.text().await?))
    }
}

/// The single destination connection for one ingestion run.
pub struct Database {
    conn: PgConnection,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, IngestError> {
        let conn = PgConnection::connect(database_url).await.map_err(|e| {
            IngestError::Configuration(format!("connecting to destination database: {e}"))
        })?;
        Ok(Self { conn })
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    pub async fn close(self) -> Result<(), IngestError> {
        self.conn.close().await.map_err(|e| {
            IngestError::Configuration(format!("closing destination connection: {e}"))
        })
    }
}

/// Attach one scalar as the next bind parameter, keeping NULLs typed.
pub fn bind_scalar<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: Scalar,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Scalar::Text(v) => query.bind(v),
        Scalar::Int(v) => query.bind(v),
        Scalar::Float(v) => query.bind(v),
    }
}

/// Identifier hygiene for dynamically assembled DDL/DML. Table and column
/// names come from the manifest; anything outside `[A-Za-z_][A-Za-z0-9_]*`
/// is rejected before it can reach an interpolated statement.
pub fn validate_identifier(name: &str) -> Result<(), IngestError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(IngestError::Configuration(format!(
            "unsafe SQL identifier: {name:?}"
        )))
    }
}

fn validate_sql_type(sql_type: &str) -> Result<(), IngestError> {
    let valid = !sql_type.is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '(' | ')' | ','));
    if valid {
        Ok(())
    } else {
        Err(IngestError::Configuration(format!(
            "unsafe SQL type: {sql_type:?}"
        )))
    }
}

/// SchemaManager: drop-and-recreate of destination tables. The table's
/// only schema version is whatever the manifest currently says.
pub mod schema {
    use super::*;

    /// Assemble the CREATE TABLE statement for a rebuilt dataset table:
    /// fixed identity columns first, then the manifest-driven dynamic
    /// columns, then the composite primary key.
    pub fn create_table_sql(
        table: &str,
        columns: &[ColumnSpec],
        primary_key: &[&str],
    ) -> Result<String, IngestError> {
        validate_identifier(table)?;
        if columns.is_empty() {
            return Err(IngestError::Configuration(format!(
                "table {table} has no columns"
            )));
        }
        let mut defs = Vec::with_capacity(columns.len() + 1);
        for col in columns {
            validate_identifier(&col.name)?;
            validate_sql_type(&col.sql_type)?;
            let not_null = if primary_key.contains(&col.name.as_str()) {
                " NOT NULL"
            } else {
                ""
            };
            defs.push(format!("{} {}{}", col.name, col.sql_type, not_null));
        }
        for key in primary_key {
            validate_identifier(key)?;
        }
        if !primary_key.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
        }
        Ok(format!("CREATE TABLE {} ({})", table, defs.join(", ")))
    }

    /// Destructive rebuild: unconditionally drops the destination table if
    /// present, then recreates it empty. All previously ingested rows for
    /// this dataset are lost; re-running the dataset is the recovery path.
    pub async fn rebuild(
        db: &mut Database,
        table: &str,
        columns: &[ColumnSpec],
        primary_key: &[&str],
    ) -> Result<(), IngestError> {
        let create = create_table_sql(table, columns, primary_key)?;
        let drop = format!("DROP TABLE IF EXISTS {table}");

        sqlx::query(&drop)
            .execute(db.conn())
            .await
            .map_err(|e| IngestError::SchemaRebuild {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        sqlx::query(&create)
            .execute(db.conn())
            .await
            .map_err(|e| IngestError::SchemaRebuild {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// UpsertEngine: batch inserts for rebuilt-empty tables plus the
/// column-merge upsert required by the regional-accounts fan-in.
pub mod upsert {
    use super::*;

    pub fn insert_sql(table: &str, columns: &[String]) -> Result<String, IngestError> {
        validate_identifier(table)?;
        for col in columns {
            validate_identifier(col)?;
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        ))
    }

    /// Column-merge upsert: insert the row if its composite key is new,
    /// otherwise overwrite only the single touched column. Previously
    /// populated sibling columns on the same key are preserved.
    pub fn upsert_column_sql(
        table: &str,
        key_columns: &[&str],
        column: &str,
    ) -> Result<String, IngestError> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        for key in key_columns {
            validate_identifier(key)?;
        }
        let all: Vec<&str> = key_columns.iter().copied().chain([column]).collect();
        let placeholders = (1..=all.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
             ON CONFLICT ({keys}) DO UPDATE SET {col} = EXCLUDED.{col}",
            cols = all.join(", "),
            keys = key_columns.join(", "),
            col = column,
        ))
    }

    pub fn ensure_row_sql(
        table: &str,
        columns: &[&str],
        conflict_key: &[&str],
    ) -> Result<String, IngestError> {
        validate_identifier(table)?;
        for col in columns {
            validate_identifier(col)?;
        }
        for key in conflict_key {
            validate_identifier(key)?;
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            table,
            columns.join(", "),
            placeholders,
            conflict_key.join(", "),
        ))
    }

    /// Write one normalized batch inside a single transaction. Any failed
    /// row aborts the batch and the dataset; no partial commit.
    pub async fn insert_batch(
        db: &mut Database,
        table: &str,
        batch: &RowBatch,
    ) -> Result<u64, IngestError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let sql = insert_sql(table, &batch.columns)?;
        let write_err = |e: sqlx::Error| IngestError::Write {
            table: table.to_string(),
            message: e.to_string(),
        };

        let mut tx = db.conn().begin().await.map_err(write_err)?;
        let mut written = 0u64;
        for row in &batch.rows {
            let mut query = sqlx::query(&sql);
            for value in row {
                query = bind_scalar(query, value.clone());
            }
            query.execute(&mut *tx).await.map_err(write_err)?;
            written += 1;
        }
        tx.commit().await.map_err(write_err)?;
        Ok(written)
    }

    /// Merge a single dynamic column value into the row identified by the
    /// composite key, inserting the row when absent. Not concurrency-safe;
    /// the run model guarantees a single writer.
    pub async fn upsert_column(
        db: &mut Database,
        table: &str,
        key: &[(&str, Scalar)],
        column: &str,
        value: Scalar,
    ) -> Result<(), IngestError> {
        let key_columns: Vec<&str> = key.iter().map(|(name, _)| *name).collect();
        let sql = upsert_column_sql(table, &key_columns, column)?;
        let mut query = sqlx::query(&sql);
        for (_, key_value) in key {
            query = bind_scalar(query, key_value.clone());
        }
        query = bind_scalar(query, value);
        query
            .execute(db.conn())
            .await
            .map_err(|e| IngestError::Write {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Insert-if-absent, used for the per-pair description rows that must
    /// exist before the corresponding data rows.
    pub async fn ensure_row(
        db: &mut Database,
        table: &str,
        columns: &[&str],
        conflict_key: &[&str],
        values: Vec<Scalar>,
    ) -> Result<(), IngestError> {
        let sql = ensure_row_sql(table, columns, conflict_key)?;
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_scalar(query, value);
        }
        query
            .execute(db.conn())
            .await
            .map_err(|e| IngestError::Write {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// GeoRegistry: the states/counties reference tables that parameterize
/// every downstream request. Ingestion must abort when a geography lookup
/// comes back empty; silently dropping a geography is worse than failing.
pub mod geo {
    use super::*;

    pub const STATES_TABLE: &str = "states";
    pub const COUNTIES_TABLE: &str = "counties";

    /// Read a delimited reference file, checking the per-record width.
    /// The header row is skipped.
    pub fn read_reference_file(
        path: impl AsRef<Path>,
        expected_fields: usize,
    ) -> Result<Vec<Vec<String>>, IngestError> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| {
                IngestError::Configuration(format!(
                    "opening reference file {}: {e}",
                    path.display()
                ))
            })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                IngestError::Configuration(format!(
                    "reading reference file {}: {e}",
                    path.display()
                ))
            })?;
            if record.len() != expected_fields {
                return Err(IngestError::Configuration(format!(
                    "reference file {}: expected {} fields, got {}",
                    path.display(),
                    expected_fields,
                    record.len()
                )));
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    /// Rebuild and load the states reference table from its file
    /// (columns: fip, state abbreviation).
    pub async fn load_states(
        db: &mut Database,
        path: impl AsRef<Path>,
    ) -> Result<u64, IngestError> {
        let columns = vec![
            ColumnSpec::new("fip", "CHAR(2)"),
            ColumnSpec::new("state", "CHAR(2)"),
        ];
        schema::rebuild(db, STATES_TABLE, &columns, &["fip"]).await?;

        let mut batch = RowBatch::new(vec!["fip".into(), "state".into()]);
        for row in read_reference_file(path, 2)? {
            batch.push(row.into_iter().map(|v| Scalar::Text(Some(v))).collect());
        }
        upsert::insert_batch(db, STATES_TABLE, &batch).await
    }

    /// Rebuild and load the counties reference table from its file
    /// (columns: county, state, area_name, county_state).
    pub async fn load_counties(
        db: &mut Database,
        path: impl AsRef<Path>,
    ) -> Result<u64, IngestError> {
        let columns = vec![
            ColumnSpec::new("state", "CHAR(2)"),
            ColumnSpec::new("county", "CHAR(3)"),
            ColumnSpec::new("area_name", "VARCHAR(80)"),
            ColumnSpec::new("county_state", "VARCHAR(80)"),
        ];
        schema::rebuild(db, COUNTIES_TABLE, &columns, &["state", "county"]).await?;

        let mut batch = RowBatch::new(vec![
            "state".into(),
            "county".into(),
            "area_name".into(),
            "county_state".into(),
        ]);
        for row in read_reference_file(path, 4)? {
            // file order is county,state,area_name,county_state
            let mut row = row.into_iter();
            let county = row.next().unwrap_or_default();
            let state = row.next().unwrap_or_default();
            let area_name = row.next().unwrap_or_default();
            let county_state = row.next().unwrap_or_default();
            batch.push(vec![
                Scalar::Text(Some(state)),
                Scalar::Text(Some(county)),
                Scalar::Text(Some(area_name)),
                Scalar::Text(Some(county_state)),
            ]);
        }
        upsert::insert_batch(db, COUNTIES_TABLE, &batch).await
    }

    /// Ordered state FIPS codes, excluding the "00" sentinel.
    pub async fn all_states(db: &mut Database) -> Result<Vec<String>, IngestError> {
        let rows: Vec<PgRow> =
            sqlx::query("SELECT fip FROM states WHERE fip <> $1 ORDER BY fip")
                .bind(dds_core::STATE_SENTINEL)
                .fetch_all(db.conn())
                .await
                .map_err(|e| IngestError::GeoNotFound(format!("querying states: {e}")))?;
        if rows.is_empty() {
            return Err(IngestError::GeoNotFound(
                "states reference table is empty; run the states dataset first".to_string(),
            ));
        }
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>(0)
                    .map(|s| s.trim().to_string())
                    .map_err(|e| IngestError::GeoNotFound(format!("decoding state fip: {e}")))
            })
            .collect()
    }

    /// Ordered county FIPS codes for one state, excluding the "000"
    /// sentinel. A state with no county entries aborts ingestion.
    pub async fn all_counties(
        db: &mut Database,
        state: &str,
    ) -> Result<Vec<String>, IngestError> {
        let rows: Vec<PgRow> = sqlx::query(
            "SELECT county FROM counties WHERE state = $1 AND county <> $2 ORDER BY county",
        )
        .bind(state)
        .bind(dds_core::COUNTY_SENTINEL)
        .fetch_all(db.conn())
        .await
        .map_err(|e| IngestError::GeoNotFound(format!("querying counties: {e}")))?;
        if rows.is_empty() {
            return Err(IngestError::GeoNotFound(format!(
                "no county reference entries for state {state}"
            )));
        }
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>(0)
                    .map(|s| s.trim().to_string())
                    .map_err(|e| IngestError::GeoNotFound(format!("decoding county fip: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn create_table_sql_orders_fixed_then_dynamic_columns() {
        let columns = vec![
            ColumnSpec::new("state", "CHAR(2)"),
            ColumnSpec::new("year", "INT"),
            ColumnSpec::new("DP03_0062E", "BIGINT"),
        ];
        let sql = schema::create_table_sql("census_state_data", &columns, &["state", "year"])
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE census_state_data (state CHAR(2) NOT NULL, year INT NOT NULL, \
             DP03_0062E BIGINT, PRIMARY KEY (state, year))"
        );
    }

    #[test]
    fn create_table_sql_is_deterministic_for_repeated_rebuilds() {
        let columns = vec![
            ColumnSpec::new("state", "CHAR(2)"),
            ColumnSpec::new("year", "INT"),
            ColumnSpec::new("value", "DOUBLE PRECISION"),
        ];
        let first =
            schema::create_table_sql("state_unemployment_rate", &columns, &["state", "year"])
                .unwrap();
        let second =
            schema::create_table_sql("state_unemployment_rate", &columns, &["state", "year"])
                .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hostile_identifiers_are_rejected() {
        assert!(validate_identifier("total_qtrly_wages").is_ok());
        assert!(validate_identifier("DP03_0062E").is_ok());
        assert!(validate_identifier("bad; DROP TABLE states").is_err());
        assert!(validate_identifier("1leading_digit").is_err());
        assert!(validate_identifier("").is_err());

        let columns = vec![ColumnSpec::new("x", "BIGINT; DROP TABLE y")];
        assert!(schema::create_table_sql("t", &columns, &[]).is_err());
    }

    #[test]
    fn upsert_column_sql_merges_only_the_touched_column() {
        let sql = upsert::upsert_column_sql("state_gdp", &["state", "year"], "SAGDP2N_1").unwrap();
        assert_eq!(
            sql,
            "INSERT INTO state_gdp (state, year, SAGDP2N_1) VALUES ($1, $2, $3) \
             ON CONFLICT (state, year) DO UPDATE SET SAGDP2N_1 = EXCLUDED.SAGDP2N_1"
        );
        // The merge never references any sibling dynamic column, so a
        // second write to the same key cannot clobber an earlier one.
        assert!(!sql.contains("SAGDP2N_2"));
    }

    #[test]
    fn insert_sql_numbers_placeholders() {
        let sql = upsert::insert_sql(
            "county_workers",
            &[
                "state".to_string(),
                "county".to_string(),
                "year".to_string(),
                "period".to_string(),
                "value".to_string(),
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO county_workers (state, county, year, period, value) \
             VALUES ($1, $2, $3, $4, $5)"
        );
    }

    #[test]
    fn ensure_row_sql_ignores_conflicts() {
        let sql = upsert::ensure_row_sql(
            "gdp_table_description",
            &["table_linecode", "cl_unit", "unit_mult"],
            &["table_linecode"],
        )
        .unwrap();
        assert!(sql.ends_with("ON CONFLICT (table_linecode) DO NOTHING"));
    }

    /// Serve exactly one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write response");
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/area/01001.csv")
    }

    #[tokio::test]
    async fn absent_quarter_file_yields_none_without_error() {
        let url = serve_once("404 Not Found", "").await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("fetcher");
        let fetched = fetcher.get_text_optional(&url).await.expect("no error");
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn present_quarter_file_yields_its_text() {
        let url = serve_once("200 OK", "area_fips,own_code\n01001,5\n").await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("fetcher");
        let fetched = fetcher.get_text_optional(&url).await.expect("no error");
        assert_eq!(fetched.as_deref(), Some("area_fips,own_code\n01001,5\n"));
    }

    #[tokio::test]
    async fn non_absence_status_is_a_hard_failure() {
        let url = serve_once("500 Internal Server Error", "").await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("fetcher");
        match fetcher.get_text_optional(&url).await {
            Err(FetchError::HttpStatus { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected a status error, got {other:?}"),
        }
    }

    // Needs a reachable Postgres; run with
    // `DATABASE_URL=... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn column_merge_preserves_sibling_columns_across_writes() {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return,
        };
        let mut db = Database::connect(&url).await.expect("connect");

        let table = "state_gdp_merge_check";
        let columns = vec![
            ColumnSpec::new("state", "CHAR(2)"),
            ColumnSpec::new("year", "INT"),
            ColumnSpec::new("SAGDP2N_1", "BIGINT"),
            ColumnSpec::new("SAGDP2N_2", "BIGINT"),
        ];
        schema::rebuild(&mut db, table, &columns, &["state", "year"])
            .await
            .expect("first rebuild");
        // rebuild is idempotent: same manifest, same empty table
        schema::rebuild(&mut db, table, &columns, &["state", "year"])
            .await
            .expect("second rebuild");

        let key = [
            ("state", Scalar::Text(Some("06".into()))),
            ("year", Scalar::Int(Some(2024))),
        ];
        upsert::upsert_column(&mut db, table, &key, "SAGDP2N_1", Scalar::Int(Some(5)))
            .await
            .expect("first column write");
        upsert::upsert_column(&mut db, table, &key, "SAGDP2N_2", Scalar::Int(Some(7)))
            .await
            .expect("second column write");

        let row = sqlx::query("SELECT SAGDP2N_1, SAGDP2N_2 FROM state_gdp_merge_check")
            .fetch_one(db.conn())
            .await
            .expect("one merged row");
        assert_eq!(row.try_get::<Option<i64>, _>(0).expect("colA"), Some(5));
        assert_eq!(row.try_get::<Option<i64>, _>(1).expect("colB"), Some(7));

        sqlx::query("DROP TABLE state_gdp_merge_check")
            .execute(db.conn())
            .await
            .expect("cleanup");
        db.close().await.expect("close");
    }

    #[test]
    fn reference_file_reader_skips_header_and_checks_width() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "FIP,State").unwrap();
        writeln!(file, "01,AL").unwrap();
        writeln!(file, "02,AK").unwrap();
        file.flush().unwrap();

        let rows = geo::read_reference_file(file.path(), 2).unwrap();
        assert_eq!(rows, vec![vec!["01", "AL"], vec!["02", "AK"]]);

        assert!(geo::read_reference_file(file.path(), 4).is_err());
    }
}
