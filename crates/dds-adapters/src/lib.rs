//! Source adapters: per-upstream request batching, pagination-by-year and
//! payload normalization.
//!
//! Each adapter owns its source's decode logic and never leaks upstream
//! field names past its boundary; everything leaves as
//! [`TimeSeriesPoint`]s or [`RowBatch`]es. Request construction is kept in
//! pure functions so the batching and encoding rules are testable without
//! a network.

use dds_core::{ColumnSpec, GeoCode, GeoScope, IngestError, RowBatch, Scalar, TimeSeriesPoint};
use dds_storage::HttpFetcher;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

pub const CRATE_NAME: &str = "dds-adapters";

/// The labor time-series API rejects requests carrying more than 50
/// series identifiers.
pub const MAX_SERIES_PER_REQUEST: usize = 50;

pub const LABOR_TIMESERIES_URL: &str = "https://api.bls.gov/publicAPI/v2/timeseries/data/";
pub const CENSUS_PROFILE_BASE: &str = "https://api.census.gov/data";
pub const CENSUS_SAIPE_URL: &str = "https://api.census.gov/data/timeseries/poverty/saipe";
pub const REGIONAL_ACCOUNTS_URL: &str = "https://apps.bea.gov/api/data/";
pub const EMPLOYMENT_FILES_BASE: &str = "http://data.bls.gov/cew/data/api";

/// Employment CSV files are truncated to this many leading columns;
/// anything upstream appends beyond them is ignored.
pub const EMPLOYMENT_COLUMN_COUNT: usize = 16;

// ---------------------------------------------------------------------------
// Labor time-series (LAUS)
// ---------------------------------------------------------------------------

/// Metric selector for the labor series source. The metric picks the
/// ten-digit measure suffix of the series identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaborMetric {
    UnemploymentRate,
    Workers,
}

impl LaborMetric {
    fn measure_suffix(self) -> &'static str {
        match self {
            LaborMetric::UnemploymentRate => "0000000003",
            LaborMetric::Workers => "0000000006",
        }
    }
}

/// Series id for a state-level request: `LAU` + `ST` scope suffix +
/// state FIPS + county sentinel + measure suffix.
pub fn state_series_id(metric: LaborMetric, state: &str) -> String {
    format!("LAUST{state}000{}", metric.measure_suffix())
}

/// Series id for a county-level request: `LAU` + `CN` scope suffix.
pub fn county_series_id(metric: LaborMetric, state: &str, county: &str) -> String {
    format!("LAUCN{state}{county}{}", metric.measure_suffix())
}

/// Recover the geography from a series identifier's fixed character
/// offsets (chars 5–7 = state, 7–10 = county). Echoed response metadata
/// is never trusted for geography.
pub fn decode_series_id(series_id: &str) -> Result<GeoCode, IngestError> {
    if series_id.len() < 10 || !series_id.is_ascii() {
        return Err(IngestError::Configuration(format!(
            "series id too short to carry a geography: {series_id:?}"
        )));
    }
    let state = &series_id[5..7];
    let county = &series_id[7..10];
    if county == dds_core::COUNTY_SENTINEL {
        Ok(GeoCode::state(state))
    } else {
        Ok(GeoCode::county(state, county))
    }
}

/// One POST to the labor time-series endpoint: at most
/// [`MAX_SERIES_PER_REQUEST`] identifiers plus the year window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub series_ids: Vec<String>,
    pub start_year: i32,
    pub end_year: i32,
}

impl SeriesRequest {
    pub fn payload(&self, registration_key: &str) -> JsonValue {
        json!({
            "seriesid": self.series_ids,
            "startyear": self.start_year.to_string(),
            "endyear": self.end_year.to_string(),
            "catalog": false,
            "calculations": false,
            "annualaverage": false,
            "aspects": false,
            "registrationkey": registration_key,
        })
    }
}

/// Partition identifiers into `ceil(N/50)` requests, preserving input
/// order across the chunk boundary.
pub fn series_requests(
    series_ids: Vec<String>,
    start_year: i32,
    end_year: i32,
) -> Vec<SeriesRequest> {
    series_ids
        .chunks(MAX_SERIES_PER_REQUEST)
        .map(|chunk| SeriesRequest {
            series_ids: chunk.to_vec(),
            start_year,
            end_year,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct LaborEnvelope {
    #[serde(rename = "Results")]
    results: LaborResults,
}

#[derive(Debug, Deserialize)]
struct LaborResults {
    #[serde(default)]
    series: Vec<LaborSeries>,
}

#[derive(Debug, Deserialize)]
struct LaborSeries {
    #[serde(rename = "seriesID")]
    series_id: String,
    #[serde(default)]
    data: Vec<LaborDataPoint>,
}

#[derive(Debug, Deserialize)]
struct LaborDataPoint {
    year: String,
    period: String,
    value: String,
}

/// Decode one response envelope into normalized points. The placeholder
/// value `"-"` (disclosure suppression) becomes a NULL value.
pub fn parse_series_response(
    payload: &JsonValue,
    url: &str,
) -> Result<Vec<TimeSeriesPoint>, IngestError> {
    let envelope: LaborEnvelope =
        serde_json::from_value(payload.clone()).map_err(|e| IngestError::UpstreamRequest {
            url: url.to_string(),
            status: None,
            message: format!("undecodable labor series response: {e}"),
        })?;

    let mut points = Vec::new();
    for series in envelope.results.series {
        let geo = decode_series_id(&series.series_id)?;
        for point in series.data {
            let year = point.year.parse::<i32>().map_err(|e| {
                IngestError::UpstreamRequest {
                    url: url.to_string(),
                    status: None,
                    message: format!("bad year {:?} in series {}: {e}", point.year, series.series_id),
                }
            })?;
            let value = match point.value.as_str() {
                "-" => None,
                other => other.parse::<f64>().ok(),
            };
            points.push(TimeSeriesPoint {
                geo: geo.clone(),
                year,
                period: point.period,
                value,
            });
        }
    }
    Ok(points)
}

/// Adapter for the labor-statistics time-series POST endpoint.
pub struct LaborSeriesAdapter<'a> {
    http: &'a HttpFetcher,
    registration_key: &'a str,
}

impl<'a> LaborSeriesAdapter<'a> {
    pub fn new(http: &'a HttpFetcher, registration_key: &'a str) -> Self {
        Self {
            http,
            registration_key,
        }
    }

    /// State-level series for every listed state.
    pub async fn fetch_states(
        &self,
        metric: LaborMetric,
        states: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<TimeSeriesPoint>, IngestError> {
        let ids = states
            .iter()
            .map(|s| state_series_id(metric, s))
            .collect::<Vec<_>>();
        self.fetch_ids(ids, start_year, end_year).await
    }

    /// County-level series for one state's counties.
    pub async fn fetch_counties(
        &self,
        metric: LaborMetric,
        state: &str,
        counties: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<TimeSeriesPoint>, IngestError> {
        let ids = counties
            .iter()
            .map(|c| county_series_id(metric, state, c))
            .collect::<Vec<_>>();
        self.fetch_ids(ids, start_year, end_year).await
    }

    async fn fetch_ids(
        &self,
        series_ids: Vec<String>,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<TimeSeriesPoint>, IngestError> {
        let requests = series_requests(series_ids, start_year, end_year);
        let mut points = Vec::new();
        for request in requests {
            debug!(series = request.series_ids.len(), "labor series request");
            let payload = self
                .http
                .post_json(LABOR_TIMESERIES_URL, &request.payload(self.registration_key))
                .await?;
            points.extend(parse_series_response(&payload, LABOR_TIMESERIES_URL)?);
        }
        Ok(points)
    }
}

// ---------------------------------------------------------------------------
// Census (ACS profile snapshots + SAIPE timeseries)
// ---------------------------------------------------------------------------

/// Upstream geography path segment for a census request scope.
fn census_geo_segment(scope: GeoScope) -> Result<&'static str, IngestError> {
    match scope {
        GeoScope::States => Ok("state"),
        GeoScope::Counties => Ok("county"),
        GeoScope::ZipCodes => Ok("zip%20code%20tabulation%20area"),
        GeoScope::SchoolDistricts => Ok("school%20district%20(unified)"),
        GeoScope::Us => Err(IngestError::Configuration(
            "census requests have no national scope".to_string(),
        )),
    }
}

/// Header name upstream uses for the sub-state geography column, and the
/// destination column it maps to.
fn census_geo_columns(scope: GeoScope) -> Vec<(&'static str, &'static str)> {
    match scope {
        GeoScope::States | GeoScope::Us => vec![("state", "state")],
        GeoScope::Counties => vec![("state", "state"), ("county", "county")],
        GeoScope::ZipCodes => vec![
            ("state", "state"),
            ("zip code tabulation area", "zipcode_tab_area"),
        ],
        GeoScope::SchoolDistricts => vec![
            ("state", "state"),
            ("school district (unified)", "sd_unified"),
        ],
    }
}

fn columns_query(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// One ACS profile request covers a single year; there are no time-range
/// semantics inside a call. Sub-state scopes must declare the containing
/// geography wildcard (`&in=state:*`).
pub fn profile_url(
    year: i32,
    columns: &[ColumnSpec],
    scope: GeoScope,
    api_key: &str,
) -> Result<String, IngestError> {
    let geo = census_geo_segment(scope)?;
    let in_qualifier = if scope.is_sub_state() { "&in=state:*" } else { "" };
    Ok(format!(
        "{CENSUS_PROFILE_BASE}/{year}/acs/acs5/profile?get={cols},NAME&for={geo}:*{in_qualifier}&key={api_key}",
        cols = columns_query(columns),
    ))
}

/// SAIPE poverty request for a single year, via the explicit `time=`
/// parameter.
pub fn saipe_url(
    year: i32,
    columns: &[ColumnSpec],
    scope: GeoScope,
    api_key: &str,
) -> Result<String, IngestError> {
    let geo = census_geo_segment(scope)?;
    let in_qualifier = if scope.is_sub_state() { "&in=state:*" } else { "" };
    Ok(format!(
        "{CENSUS_SAIPE_URL}?get={cols},YEAR,NAME&for={geo}:*&time={year}{in_qualifier}&key={api_key}",
        cols = columns_query(columns),
    ))
}

fn census_cell(row: &[JsonValue], index: usize) -> Option<String> {
    match row.get(index) {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_census_grid(payload: &JsonValue, url: &str) -> Result<Vec<Vec<JsonValue>>, IngestError> {
    serde_json::from_value(payload.clone()).map_err(|e| IngestError::UpstreamRequest {
        url: url.to_string(),
        status: None,
        message: format!("census response is not a row grid: {e}"),
    })
}

fn header_index(header: &[JsonValue], name: &str, url: &str) -> Result<usize, IngestError> {
    header
        .iter()
        .position(|cell| cell.as_str() == Some(name))
        .ok_or_else(|| IngestError::UpstreamRequest {
            url: url.to_string(),
            status: None,
            message: format!("census response header is missing column {name:?}"),
        })
}

/// Normalize one census array-of-arrays response (header row first) into
/// a row batch. `NAME` is always dropped before storage. For snapshot
/// responses the year is synthetic (supplied by the caller); for SAIPE
/// responses it is read from the upstream `YEAR` column and the `time`
/// echo column is dropped.
pub fn normalize_census_rows(
    payload: &JsonValue,
    url: &str,
    columns: &[ColumnSpec],
    scope: GeoScope,
    snapshot_year: Option<i32>,
) -> Result<RowBatch, IngestError> {
    let grid = decode_census_grid(payload, url)?;
    let (header, data_rows) = match grid.split_first() {
        Some(split) => split,
        None => {
            return Err(IngestError::UpstreamRequest {
                url: url.to_string(),
                status: None,
                message: "census response is missing its header row".to_string(),
            })
        }
    };

    let geo_columns = census_geo_columns(scope);
    let mut geo_indexes = Vec::with_capacity(geo_columns.len());
    for (upstream_name, _) in &geo_columns {
        geo_indexes.push(header_index(header, upstream_name, url)?);
    }
    let mut field_indexes = Vec::with_capacity(columns.len());
    for column in columns {
        field_indexes.push(header_index(header, &column.name, url)?);
    }
    let year_index = match snapshot_year {
        Some(_) => None,
        None => Some(header_index(header, "YEAR", url)?),
    };

    let mut batch_columns: Vec<String> = geo_columns
        .iter()
        .map(|(_, dest)| dest.to_string())
        .collect();
    batch_columns.push("year".to_string());
    batch_columns.extend(columns.iter().map(|c| c.name.clone()));

    let mut batch = RowBatch::new(batch_columns);
    for row in data_rows {
        let mut cells = Vec::with_capacity(batch.columns.len());
        for index in &geo_indexes {
            cells.push(Scalar::Text(census_cell(row, *index)));
        }
        let year = match (snapshot_year, year_index) {
            (Some(year), _) => Some(year as i64),
            (None, Some(index)) => {
                census_cell(row, index).and_then(|raw| raw.parse::<i64>().ok())
            }
            (None, None) => None,
        };
        cells.push(Scalar::Int(year));
        for (column, index) in columns.iter().zip(&field_indexes) {
            let raw = census_cell(row, *index);
            cells.push(column.coerce(raw.as_deref()));
        }
        batch.push(cells);
    }
    Ok(batch)
}

/// Adapter for the census GET endpoints: snapshot (ACS profile) and
/// timeseries (SAIPE poverty) sub-modes.
pub struct CensusAdapter<'a> {
    http: &'a HttpFetcher,
    api_key: &'a str,
}

impl<'a> CensusAdapter<'a> {
    pub fn new(http: &'a HttpFetcher, api_key: &'a str) -> Self {
        Self { http, api_key }
    }

    /// Fetch one year of current-structure profile data. The returned
    /// batch carries a synthetic `year` column (the response itself has
    /// no temporal axis).
    pub async fn fetch_snapshot(
        &self,
        scope: GeoScope,
        columns: &[ColumnSpec],
        year: i32,
    ) -> Result<RowBatch, IngestError> {
        let url = profile_url(year, columns, scope, self.api_key)?;
        let payload = self.http.get_json(&url).await?;
        normalize_census_rows(&payload, &url, columns, scope, Some(year))
    }

    /// Fetch one year of poverty timeseries data.
    pub async fn fetch_timeseries(
        &self,
        scope: GeoScope,
        columns: &[ColumnSpec],
        year: i32,
    ) -> Result<RowBatch, IngestError> {
        let url = saipe_url(year, columns, scope, self.api_key)?;
        let payload = self.http.get_json(&url).await?;
        normalize_census_rows(&payload, &url, columns, scope, None)
    }
}

// ---------------------------------------------------------------------------
// Regional accounts (BEA)
// ---------------------------------------------------------------------------

/// The regional-accounts window is source-dictated: every request returns
/// the most recent five years regardless of any lookback configured for
/// other datasets.
pub const REGIONAL_ACCOUNTS_YEAR_WINDOW: &str = "LAST5";

pub fn regional_accounts_url(
    user_id: &str,
    table: &str,
    line_code: &str,
    scope: GeoScope,
) -> Result<String, IngestError> {
    let geo_fips = match scope {
        GeoScope::States => "STATE",
        GeoScope::Counties => "COUNTY",
        other => {
            return Err(IngestError::Configuration(format!(
                "regional accounts scope must be states or counties, got {other:?}"
            )))
        }
    };
    Ok(format!(
        "{REGIONAL_ACCOUNTS_URL}?&UserID={user_id}&method=GetData&datasetname=Regional\
         &TableName={table}&LineCode={line_code}&GeoFIPS={geo_fips}&Year={REGIONAL_ACCOUNTS_YEAR_WINDOW}"
    ))
}

/// Strip thousands separators; anything not purely numeric afterwards
/// (disclosure markers like "(D)") becomes NULL.
pub fn parse_accounts_value(raw: &str) -> Option<i64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

/// Data row from one `(table, line_code)` request, keyed on decoded
/// geography and year, valued for exactly one destination column.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountsObservation {
    pub column: String,
    pub geo: GeoCode,
    pub year: i32,
    pub value: Option<i64>,
}

/// Side-channel metadata record for the description table, emitted once
/// per distinct `(table, line_code)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountsDescription {
    pub table_linecode: String,
    pub cl_unit: Option<String>,
    pub unit_mult: Option<i16>,
}

#[derive(Debug, Deserialize)]
struct BeaEnvelope {
    #[serde(rename = "BEAAPI")]
    beaapi: BeaApi,
}

#[derive(Debug, Deserialize)]
struct BeaApi {
    #[serde(rename = "Results")]
    results: BeaResults,
}

#[derive(Debug, Deserialize)]
struct BeaResults {
    #[serde(rename = "Data", default)]
    data: Vec<BeaRecord>,
}

#[derive(Debug, Deserialize)]
struct BeaRecord {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "GeoFips")]
    geo_fips: String,
    #[serde(rename = "TimePeriod")]
    time_period: String,
    #[serde(rename = "DataValue")]
    data_value: String,
    #[serde(rename = "CL_UNIT")]
    cl_unit: Option<String>,
    #[serde(rename = "UNIT_MULT")]
    unit_mult: Option<String>,
}

/// Upstream codes like `SAGDP2N-1` become destination column names like
/// `SAGDP2N_1`.
pub fn accounts_column_name(code: &str) -> String {
    code.replace('-', "_")
}

/// Decode one regional-accounts response. The description is taken from
/// the first record; every record contributes one observation.
pub fn parse_accounts_response(
    payload: &JsonValue,
    url: &str,
) -> Result<(Option<AccountsDescription>, Vec<AccountsObservation>), IngestError> {
    let envelope: BeaEnvelope =
        serde_json::from_value(payload.clone()).map_err(|e| IngestError::UpstreamRequest {
            url: url.to_string(),
            status: None,
            message: format!("undecodable regional accounts response: {e}"),
        })?;

    let mut description = None;
    let mut observations = Vec::new();
    for record in envelope.beaapi.results.data {
        let column = accounts_column_name(&record.code);
        if description.is_none() {
            description = Some(AccountsDescription {
                table_linecode: column.clone(),
                cl_unit: record.cl_unit.clone(),
                unit_mult: record
                    .unit_mult
                    .as_deref()
                    .and_then(|m| m.parse::<i16>().ok()),
            });
        }
        let geo = GeoCode::from_fips5(&record.geo_fips)?;
        let year = record
            .time_period
            .parse::<i32>()
            .map_err(|e| IngestError::UpstreamRequest {
                url: url.to_string(),
                status: None,
                message: format!("bad time period {:?}: {e}", record.time_period),
            })?;
        observations.push(AccountsObservation {
            column,
            geo,
            year,
            value: parse_accounts_value(&record.data_value),
        });
    }
    Ok((description, observations))
}

/// Adapter for the regional-economic-accounts GET endpoint; one request
/// per configured `(table, line_code)` pair.
pub struct RegionalAccountsAdapter<'a> {
    http: &'a HttpFetcher,
    user_id: &'a str,
}

impl<'a> RegionalAccountsAdapter<'a> {
    pub fn new(http: &'a HttpFetcher, user_id: &'a str) -> Self {
        Self { http, user_id }
    }

    pub async fn fetch_pair(
        &self,
        table: &str,
        line_code: &str,
        scope: GeoScope,
    ) -> Result<(Option<AccountsDescription>, Vec<AccountsObservation>), IngestError> {
        let url = regional_accounts_url(self.user_id, table, line_code, scope)?;
        let payload = self.http.get_json(&url).await?;
        parse_accounts_response(&payload, &url)
    }
}

// ---------------------------------------------------------------------------
// Employment flat files (QCEW)
// ---------------------------------------------------------------------------

/// Area file identifiers for one employment scope: `US000`, one
/// `{state}000` per state, or the full `{state}{county}` product.
pub fn employment_area_files(
    scope: GeoScope,
    states: &[String],
    counties_by_state: &[(String, Vec<String>)],
) -> Result<Vec<String>, IngestError> {
    match scope {
        GeoScope::Us => Ok(vec!["US000".to_string()]),
        GeoScope::States => Ok(states.iter().map(|s| format!("{s}000")).collect()),
        GeoScope::Counties => Ok(counties_by_state
            .iter()
            .flat_map(|(state, counties)| {
                counties
                    .iter()
                    .map(move |county| format!("{state}{county}"))
            })
            .collect()),
        other => Err(IngestError::Configuration(format!(
            "employment files have no {other:?} scope"
        ))),
    }
}

pub fn employment_quarter_url(year: i32, quarter: u8, area_file: &str) -> String {
    format!("{EMPLOYMENT_FILES_BASE}/{year}/{quarter}/area/{area_file}.csv")
}

/// Parse one quarter CSV into a row batch. The table is truncated to its
/// first [`EMPLOYMENT_COLUMN_COUNT`] columns; the leading `area_fips`
/// column (zero-padded to five digits) is decoded into identity columns
/// per scope; any missing or non-numeric cell normalizes to NULL.
pub fn parse_employment_csv(
    text: &str,
    url: &str,
    columns: &[ColumnSpec],
    scope: GeoScope,
) -> Result<RowBatch, IngestError> {
    let identity: &[&str] = match scope {
        GeoScope::Us => &[],
        GeoScope::States => &["state"],
        GeoScope::Counties => &["state", "county"],
        other => {
            return Err(IngestError::Configuration(format!(
                "employment files have no {other:?} scope"
            )))
        }
    };

    let mut batch_columns: Vec<String> = identity.iter().map(|c| c.to_string()).collect();
    batch_columns.extend(columns.iter().map(|c| c.name.clone()));
    let mut batch = RowBatch::new(batch_columns);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::UpstreamRequest {
            url: url.to_string(),
            status: None,
            message: format!("undecodable employment csv: {e}"),
        })?;

        let mut fips = record.get(0).unwrap_or_default().trim().to_string();
        while fips.len() < 5 {
            fips.insert(0, '0');
        }
        let mut cells = Vec::with_capacity(batch.columns.len());
        match scope {
            GeoScope::Us => {}
            GeoScope::States => {
                cells.push(Scalar::Text(Some(fips[..2].to_string())));
            }
            GeoScope::Counties => {
                cells.push(Scalar::Text(Some(fips[..2].to_string())));
                cells.push(Scalar::Text(Some(fips[2..5].to_string())));
            }
            _ => unreachable!(),
        }
        for (offset, column) in columns.iter().enumerate() {
            // field 0 is area_fips; the manifest columns follow it, and
            // everything past the truncation point is ignored.
            let index = offset + 1;
            let raw = if index < EMPLOYMENT_COLUMN_COUNT {
                record.get(index)
            } else {
                None
            };
            cells.push(column.coerce(raw));
        }
        batch.push(cells);
    }
    Ok(batch)
}

/// Adapter for the flat-file-per-year-quarter-geography employment
/// resources. A missing file is absence, not an error.
pub struct EmploymentFilesAdapter<'a> {
    http: &'a HttpFetcher,
}

impl<'a> EmploymentFilesAdapter<'a> {
    pub fn new(http: &'a HttpFetcher) -> Self {
        Self { http }
    }

    /// Fetch one `(area, year, quarter)` combination. `Ok(None)` means the
    /// resource does not exist upstream (skip and continue); any other
    /// failure is fatal to the dataset.
    pub async fn fetch_quarter(
        &self,
        area_file: &str,
        year: i32,
        quarter: u8,
        scope: GeoScope,
        columns: &[ColumnSpec],
    ) -> Result<Option<RowBatch>, IngestError> {
        let url = employment_quarter_url(year, quarter, area_file);
        match self.http.get_text_optional(&url).await? {
            Some(text) => Ok(Some(parse_employment_csv(&text, &url, columns, scope)?)),
            None => {
                debug!(area_file, year, quarter, "employment file absent; skipping");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:03}")).collect()
    }

    #[test]
    fn chunking_issues_ceil_n_over_50_requests_in_order() {
        for (n, expected) in [(1usize, 1usize), (50, 1), (51, 2), (120, 3), (150, 3)] {
            let ids: Vec<String> = (0..n)
                .map(|i| county_series_id(LaborMetric::UnemploymentRate, "01", &format!("{i:03}")))
                .collect();
            let requests = series_requests(ids.clone(), 2023, 2025);
            assert_eq!(requests.len(), expected, "n={n}");
            assert!(requests.iter().all(|r| r.series_ids.len() <= 50));
            let concatenated: Vec<String> = requests
                .into_iter()
                .flat_map(|r| r.series_ids)
                .collect();
            assert_eq!(concatenated, ids);
        }
    }

    #[test]
    fn county_request_split_is_50_50_20_for_120_counties() {
        let counties = codes(120);
        let ids: Vec<String> = counties
            .iter()
            .map(|c| county_series_id(LaborMetric::UnemploymentRate, "06", c))
            .collect();
        let requests = series_requests(ids, 2023, 2025);
        let sizes: Vec<usize> = requests.iter().map(|r| r.series_ids.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }

    #[test]
    fn series_id_round_trips_through_fixed_offsets() {
        let id = county_series_id(LaborMetric::Workers, "48", "201");
        assert_eq!(id, "LAUCN482010000000006");
        assert_eq!(decode_series_id(&id).unwrap(), GeoCode::county("48", "201"));

        let id = state_series_id(LaborMetric::UnemploymentRate, "06");
        assert_eq!(id, "LAUST060000000000003");
        assert_eq!(decode_series_id(&id).unwrap(), GeoCode::state("06"));
    }

    #[test]
    fn labor_payload_carries_year_window_and_key() {
        let requests = series_requests(
            vec![state_series_id(LaborMetric::UnemploymentRate, "01")],
            2023,
            2025,
        );
        let payload = requests[0].payload("secret");
        assert_eq!(payload["startyear"], "2023");
        assert_eq!(payload["endyear"], "2025");
        assert_eq!(payload["registrationkey"], "secret");
        assert_eq!(payload["seriesid"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn suppressed_labor_values_normalize_to_null() {
        let payload = json!({
            "Results": {
                "series": [{
                    "seriesID": "LAUCN010010000000003",
                    "data": [
                        {"year": "2024", "period": "M03", "value": "3.1"},
                        {"year": "2024", "period": "M02", "value": "-"}
                    ]
                }]
            }
        });
        let points = parse_series_response(&payload, "test").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].geo, GeoCode::county("01", "001"));
        assert_eq!(points[0].value, Some(3.1));
        assert_eq!(points[1].value, None);
    }

    #[test]
    fn sub_state_census_urls_declare_the_containing_geography() {
        let columns = vec![ColumnSpec::new("DP03_0062E", "BIGINT")];
        let county = profile_url(2024, &columns, GeoScope::Counties, "k").unwrap();
        assert!(county.contains("&for=county:*"));
        assert!(county.contains("&in=state:*"));
        assert!(county.contains("get=DP03_0062E,NAME"));

        let state = profile_url(2024, &columns, GeoScope::States, "k").unwrap();
        assert!(state.contains("&for=state:*"));
        assert!(!state.contains("&in=state:*"));

        let districts = profile_url(2024, &columns, GeoScope::SchoolDistricts, "k").unwrap();
        assert!(districts.contains("for=school%20district%20(unified):*"));
        assert!(districts.contains("&in=state:*"));
    }

    #[test]
    fn saipe_url_uses_explicit_time_parameter() {
        let columns = vec![ColumnSpec::new("SAEPOVRTALL_PT", "DOUBLE PRECISION")];
        let url = saipe_url(2023, &columns, GeoScope::States, "k").unwrap();
        assert!(url.contains("get=SAEPOVRTALL_PT,YEAR,NAME"));
        assert!(url.contains("&time=2023"));
    }

    #[test]
    fn snapshot_rows_get_synthetic_year_and_drop_name() {
        let columns = vec![
            ColumnSpec::new("DP03_0062E", "BIGINT"),
            ColumnSpec::new("DP03_0119PE", "DOUBLE PRECISION"),
        ];
        let payload = json!([
            ["DP03_0062E", "DP03_0119PE", "NAME", "state", "county"],
            ["52035", "11.2", "Autauga County, Alabama", "01", "001"],
            ["-", "9.0", "Baldwin County, Alabama", "01", "003"]
        ]);
        let batch =
            normalize_census_rows(&payload, "test", &columns, GeoScope::Counties, Some(2024))
                .unwrap();
        assert_eq!(
            batch.columns,
            vec!["state", "county", "year", "DP03_0062E", "DP03_0119PE"]
        );
        assert_eq!(
            batch.rows[0],
            vec![
                Scalar::Text(Some("01".into())),
                Scalar::Text(Some("001".into())),
                Scalar::Int(Some(2024)),
                Scalar::Int(Some(52035)),
                Scalar::Float(Some(11.2)),
            ]
        );
        // census "-" placeholder stores as NULL
        assert_eq!(batch.rows[1][3], Scalar::Int(None));
    }

    #[test]
    fn timeseries_rows_take_year_from_upstream_and_drop_time_echo() {
        let columns = vec![ColumnSpec::new("SAEPOVRTALL_PT", "DOUBLE PRECISION")];
        let payload = json!([
            ["SAEPOVRTALL_PT", "YEAR", "NAME", "time", "state"],
            ["14.9", "2023", "Alabama", "2023", "01"]
        ]);
        let batch =
            normalize_census_rows(&payload, "test", &columns, GeoScope::States, None).unwrap();
        assert_eq!(batch.columns, vec!["state", "year", "SAEPOVRTALL_PT"]);
        assert_eq!(
            batch.rows[0],
            vec![
                Scalar::Text(Some("01".into())),
                Scalar::Int(Some(2023)),
                Scalar::Float(Some(14.9)),
            ]
        );
    }

    #[test]
    fn accounts_url_always_requests_the_last5_window() {
        let url = regional_accounts_url("uid", "SAGDP2N", "1", GeoScope::States).unwrap();
        assert!(url.contains("TableName=SAGDP2N"));
        assert!(url.contains("LineCode=1"));
        assert!(url.contains("GeoFIPS=STATE"));
        assert!(url.contains("Year=LAST5"));
    }

    #[test]
    fn accounts_values_strip_separators_and_null_non_digits() {
        assert_eq!(parse_accounts_value("1,234,567"), Some(1_234_567));
        assert_eq!(parse_accounts_value("42"), Some(42));
        assert_eq!(parse_accounts_value("(D)"), None);
        assert_eq!(parse_accounts_value(""), None);
        assert_eq!(parse_accounts_value("12.5"), None);
    }

    #[test]
    fn accounts_response_yields_one_description_and_per_record_observations() {
        let payload = json!({
            "BEAAPI": {
                "Results": {
                    "Data": [
                        {"Code": "SAGDP2N-1", "GeoFips": "01000", "TimePeriod": "2023",
                         "DataValue": "281,569", "CL_UNIT": "Millions of current dollars",
                         "UNIT_MULT": "6"},
                        {"Code": "SAGDP2N-1", "GeoFips": "02000", "TimePeriod": "2023",
                         "DataValue": "(D)", "CL_UNIT": "Millions of current dollars",
                         "UNIT_MULT": "6"}
                    ]
                }
            }
        });
        let (description, observations) = parse_accounts_response(&payload, "test").unwrap();
        let description = description.unwrap();
        assert_eq!(description.table_linecode, "SAGDP2N_1");
        assert_eq!(description.unit_mult, Some(6));
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].geo, GeoCode::state("01"));
        assert_eq!(observations[0].value, Some(281_569));
        assert_eq!(observations[1].value, None);
    }

    #[test]
    fn employment_area_files_cover_the_requested_scope() {
        assert_eq!(
            employment_area_files(GeoScope::Us, &[], &[]).unwrap(),
            vec!["US000"]
        );
        let states = vec!["01".to_string(), "02".to_string()];
        assert_eq!(
            employment_area_files(GeoScope::States, &states, &[]).unwrap(),
            vec!["01000", "02000"]
        );
        let by_state = vec![
            ("01".to_string(), vec!["001".to_string(), "003".to_string()]),
            ("02".to_string(), vec!["013".to_string()]),
        ];
        assert_eq!(
            employment_area_files(GeoScope::Counties, &[], &by_state).unwrap(),
            vec!["01001", "01003", "02013"]
        );
    }

    fn employment_columns() -> Vec<ColumnSpec> {
        [
            ("own_code", "INT"),
            ("industry_code", "VARCHAR(6)"),
            ("agglvl_code", "INT"),
            ("size_code", "INT"),
            ("year", "SMALLINT"),
            ("qtr", "SMALLINT"),
            ("disclosure_code", "VARCHAR(5)"),
            ("qtrly_estabs", "BIGINT"),
            ("month1_emplvl", "BIGINT"),
            ("month2_emplvl", "BIGINT"),
            ("month3_emplvl", "BIGINT"),
            ("total_qtrly_wages", "BIGINT"),
            ("taxable_qtrly_wages", "BIGINT"),
            ("qtrly_contributions", "BIGINT"),
            ("avg_wkly_wage", "BIGINT"),
        ]
        .into_iter()
        .map(|(name, sql_type)| ColumnSpec::new(name, sql_type))
        .collect()
    }

    #[test]
    fn employment_csv_truncates_to_sixteen_columns_and_pads_fips() {
        let text = "\
area_fips,own_code,industry_code,agglvl_code,size_code,year,qtr,disclosure_code,qtrly_estabs,month1_emplvl,month2_emplvl,month3_emplvl,total_qtrly_wages,taxable_qtrly_wages,qtrly_contributions,avg_wkly_wage,extra_col_a,extra_col_b
1001,5,10,70,0,2024,1,,1393,11226,11283,11321,135062886,5812007,364795,997,ignored,ignored
";
        let batch = parse_employment_csv(
            text,
            "test",
            &employment_columns(),
            GeoScope::Counties,
        )
        .unwrap();
        // identity + 15 manifest columns, never the upstream extras
        assert_eq!(batch.columns.len(), 17);
        assert_eq!(batch.rows[0][0], Scalar::Text(Some("01".into())));
        assert_eq!(batch.rows[0][1], Scalar::Text(Some("001".into())));
        // disclosure_code empty -> NULL
        assert_eq!(batch.rows[0][8], Scalar::Text(None));
        assert_eq!(batch.rows[0][16], Scalar::Int(Some(997)));
    }

    #[test]
    fn employment_quarter_url_is_per_year_quarter_area() {
        assert_eq!(
            employment_quarter_url(2024, 3, "US000"),
            "http://data.bls.gov/cew/data/api/2024/3/area/US000.csv"
        );
    }
}
