//! Core domain model, manifest contract and error taxonomy for DDS.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "dds-core";

/// State-level FIPS sentinel meaning "all states"; excluded from iteration.
pub const STATE_SENTINEL: &str = "00";
/// County-level FIPS sentinel meaning "whole state"; excluded from iteration.
pub const COUNTY_SENTINEL: &str = "000";

/// Error taxonomy shared by every crate in the workspace.
///
/// Nothing here is retried: each variant aborts the current dataset and
/// propagates to the runner. Expected upstream absence (a QCEW quarter file
/// that does not exist) is modelled as `Option`, not as an error.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream request failed ({url}): {message}")]
    UpstreamRequest {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("schema rebuild failed for table {table}: {message}")]
    SchemaRebuild { table: String, message: String },
    #[error("write failed for table {table}: {message}")]
    Write { table: String, message: String },
    #[error("geography reference missing: {0}")]
    GeoNotFound(String),
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
}

/// Composite geographic identity: 2-digit state FIPS plus optional
/// 3-digit county FIPS. A county code is only meaningful with its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoCode {
    pub state: String,
    pub county: Option<String>,
}

impl GeoCode {
    pub fn state(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            county: None,
        }
    }

    pub fn county(state: impl Into<String>, county: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            county: Some(county.into()),
        }
    }

    /// Split a 5-digit combined FIPS ("01001") into state + county parts.
    /// The county sentinel collapses to a state-level code.
    pub fn from_fips5(fips: &str) -> Result<Self, IngestError> {
        if fips.len() != 5 {
            return Err(IngestError::Configuration(format!(
                "expected 5-digit FIPS, got {fips:?}"
            )));
        }
        let (state, county) = fips.split_at(2);
        if county == COUNTY_SENTINEL {
            Ok(Self::state(state))
        } else {
            Ok(Self::county(state, county))
        }
    }
}

/// One observation from a labor time-series source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub geo: GeoCode,
    pub year: i32,
    /// Quarterly/monthly period code as reported upstream, e.g. "M01", or
    /// "M13" for the annual average.
    pub period: String,
    /// None when upstream reports a disclosure-suppressed placeholder.
    pub value: Option<f64>,
}

/// Scalar cell destined for a destination column. The variant is chosen
/// from the manifest SQL type so NULLs stay typed all the way to the bind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Text(Option<String>),
    Int(Option<i64>),
    Float(Option<f64>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Scalar::Text(None) | Scalar::Int(None) | Scalar::Float(None)
        )
    }
}

/// One destination column: name plus the SQL type used in the rebuild DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }

    /// Parse a manifest entry of the form `"NAME TYPE..."`, e.g.
    /// `"DP03_0062E BIGINT"` or `"value DOUBLE PRECISION"`.
    pub fn parse(entry: &str) -> Result<Self, IngestError> {
        let mut parts = entry.split_whitespace();
        let name = parts.next().ok_or_else(|| {
            IngestError::Configuration(format!("empty column entry {entry:?}"))
        })?;
        let sql_type = parts.collect::<Vec<_>>().join(" ");
        if sql_type.is_empty() {
            return Err(IngestError::Configuration(format!(
                "column entry {entry:?} is missing a SQL type"
            )));
        }
        Ok(Self::new(name, sql_type))
    }

    /// Whether cells for this column should be coerced to a numeric scalar.
    pub fn is_numeric(&self) -> bool {
        let upper = self.sql_type.to_ascii_uppercase();
        upper.starts_with("BIGINT")
            || upper.starts_with("INT")
            || upper.starts_with("SMALLINT")
            || upper.starts_with("DOUBLE")
            || upper.starts_with("FLOAT")
            || upper.starts_with("REAL")
            || upper.starts_with("NUMERIC")
    }

    pub fn is_integer(&self) -> bool {
        let upper = self.sql_type.to_ascii_uppercase();
        upper.starts_with("BIGINT") || upper.starts_with("INT") || upper.starts_with("SMALLINT")
    }

    /// Coerce one raw upstream cell into a typed scalar for this column.
    /// Non-numeric placeholders ("-", "", "(D)") become typed NULLs.
    pub fn coerce(&self, raw: Option<&str>) -> Scalar {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty() && *s != "-");
        if self.is_integer() {
            Scalar::Int(raw.and_then(|s| s.parse::<i64>().ok()))
        } else if self.is_numeric() {
            Scalar::Float(raw.and_then(|s| s.parse::<f64>().ok()))
        } else {
            Scalar::Text(raw.map(str::to_string))
        }
    }
}

/// Normalized tabular handoff from adapters into the upsert path: a column
/// list shared by every row plus the row cells in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl RowBatch {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Scalar>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Which upstream family a dataset is harvested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Reference,
    LaborSeries,
    CensusProfile,
    CensusTimeseries,
    RegionalAccounts,
    EmploymentSeries,
}

/// Geography enumeration scope for a dataset's requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoScope {
    Us,
    States,
    Counties,
    ZipCodes,
    SchoolDistricts,
}

impl GeoScope {
    /// Sub-state scopes require the `&in=state:*` containing-geography
    /// qualifier on census requests.
    pub fn is_sub_state(self) -> bool {
        matches!(
            self,
            GeoScope::Counties | GeoScope::ZipCodes | GeoScope::SchoolDistricts
        )
    }
}

/// Static unit of work scheduled by the ingestion catalog.
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub source: SourceKind,
    pub scope: GeoScope,
    /// Manifest entry supplying the dynamic column list. Empty for
    /// reference datasets whose columns are fixed.
    pub manifest_key: &'static str,
    /// Fixed identity columns created ahead of the dynamic ones.
    pub fixed_columns: &'static [(&'static str, &'static str)],
    pub primary_key: &'static [&'static str],
}

impl DatasetDescriptor {
    pub fn fixed_column_specs(&self) -> Vec<ColumnSpec> {
        self.fixed_columns
            .iter()
            .map(|(name, sql_type)| ColumnSpec::new(*name, *sql_type))
            .collect()
    }
}

/// API credentials supplied by the request manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeys {
    pub labor_key: String,
    pub census_key: String,
    pub bea_user_id: String,
}

/// Regional-accounts request plan: parallel lists of table names and the
/// line codes requested from each table.
#[derive(Debug, Clone, Deserialize)]
pub struct BeaGdpSection {
    pub tables: Vec<String>,
    pub line_codes: Vec<Vec<String>>,
}

impl BeaGdpSection {
    /// Flatten into the ordered `(table, line_code)` request pairs.
    pub fn pairs(&self) -> Result<Vec<(String, String)>, IngestError> {
        if self.tables.len() != self.line_codes.len() {
            return Err(IngestError::Configuration(format!(
                "bea_gdp tables ({}) and line_codes ({}) lists differ in length",
                self.tables.len(),
                self.line_codes.len()
            )));
        }
        let mut pairs = Vec::new();
        for (table, codes) in self.tables.iter().zip(&self.line_codes) {
            for code in codes {
                pairs.push((table.clone(), code.clone()));
            }
        }
        Ok(pairs)
    }

    /// Destination column name for a `(table, line_code)` pair.
    pub fn column_name(table: &str, line_code: &str) -> String {
        format!("{table}_{line_code}")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestTables {
    pub bea_gdp: BeaGdpSection,
    /// Every other manifest key: ordered `"NAME TYPE"` column entries.
    #[serde(flatten)]
    pub columns: BTreeMap<String, Vec<String>>,
}

/// The external request manifest (`request_info.json`): per-dataset column
/// definitions plus the three upstream API credentials. The engine treats
/// column count and names as fully dynamic; the manifest, not code,
/// determines table width.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub tables: ManifestTables,
    pub keys: ApiKeys,
}

impl Manifest {
    pub fn from_json(text: &str) -> Result<Self, IngestError> {
        serde_json::from_str(text)
            .map_err(|e| IngestError::Configuration(format!("parsing manifest: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            IngestError::Configuration(format!("reading manifest {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Ordered dynamic columns for a manifest key.
    pub fn columns(&self, key: &str) -> Result<Vec<ColumnSpec>, IngestError> {
        let entries = self.tables.columns.get(key).ok_or_else(|| {
            IngestError::Configuration(format!("manifest has no column list for key {key:?}"))
        })?;
        entries.iter().map(|e| ColumnSpec::parse(e)).collect()
    }

    /// Destination columns for the GDP tables: one wide integer column per
    /// configured `(table, line_code)` pair, in request order.
    pub fn gdp_columns(&self) -> Result<Vec<ColumnSpec>, IngestError> {
        Ok(self
            .tables
            .bea_gdp
            .pairs()?
            .iter()
            .map(|(t, l)| ColumnSpec::new(BeaGdpSection::column_name(t, l), "BIGINT"))
            .collect())
    }
}
