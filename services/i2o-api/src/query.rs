//! Relational-query collaborator and the queries behind the time series and
//! vector endpoints.
//!
//! Request values are always bound as parameters. Selected columns are cast
//! to text in SQL so a result is a plain table of optional strings.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Column, PgPool, Row};
use tracing::{debug, instrument};

use i2o_common::{I2oError, I2oResult, RequestParams};

/// SQL text plus positional text binds (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub text: String,
    pub binds: Vec<String>,
}

impl SqlQuery {
    fn new(text: impl Into<String>, binds: Vec<String>) -> Self {
        Self {
            text: text.into(),
            binds,
        }
    }
}

/// Tabular query result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// CSV with a header row. NULL cells are empty.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_row(&mut out, self.columns.iter().map(|c| Some(c.as_str())));
        for row in &self.rows {
            push_csv_row(&mut out, row.iter().map(|c| c.as_deref()));
        }
        out
    }
}

fn push_csv_row<'a>(out: &mut String, cells: impl Iterator<Item = Option<&'a str>>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        let cell = cell.unwrap_or("");
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

/// Runs a query and returns its rows.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn fetch_table(&self, query: &SqlQuery) -> I2oResult<Table>;
}

/// PostgreSQL/PostGIS query runner.
pub struct PgQueryRunner {
    pool: PgPool,
}

impl PgQueryRunner {
    pub async fn connect(database_url: &str) -> I2oResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| I2oError::unreachable(format!("Database connection failed: {}", e)))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl QueryRunner for PgQueryRunner {
    #[instrument(skip(self, query), fields(binds = query.binds.len()))]
    async fn fetch_table(&self, query: &SqlQuery) -> I2oResult<Table> {
        let mut q = sqlx::query(&query.text);
        for bind in &query.binds {
            q = q.bind(bind.as_str());
        }
        let rows = q.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;

        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<Option<String>, _>(i).map_err(map_sqlx_error))
                    .collect::<I2oResult<Vec<_>>>()
            })
            .collect::<I2oResult<Vec<_>>>()?;

        debug!(rows = rows.len(), "Query returned");
        Ok(Table { columns, rows })
    }
}

fn map_sqlx_error(e: sqlx::Error) -> I2oError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            I2oError::unreachable(format!("Database unavailable: {}", e))
        }
        other => I2oError::internal(format!("Query failed: {}", other)),
    }
}

/// Query for `/api/timeseries`, chosen by the `table` parameter.
///
/// - GRACE tables: mass change per date for a `mascon` or a `region`, at `version`
/// - stream gauges: discharge for gauges whose name matches `location`
/// - point balances: stake balances for `glacier`
pub fn timeseries_query(params: &RequestParams) -> I2oResult<SqlQuery> {
    let table = params.required_str("table")?;

    if table.contains("GRACE") {
        let version = params.required_str("version")?;
        let (filter, value) = match params.optional_str("mascon") {
            Some(mascon) => ("mascon", mascon),
            None => ("region", params.required_str("region")?),
        };
        let text = format!(
            "SELECT to_char(main.date, 'MM/DD/YYYY') AS date, \
             SUM(main.values_filter1d * cf.correction)::text AS mass \
             FROM (SELECT mascon, (area_km2 / 1e5) AS correction FROM mascon_fit \
                   WHERE {}::text = $1) AS cf \
             LEFT JOIN (SELECT mascon, date, values_filter1d FROM mascon_solution \
                        WHERE version::text = $2) AS main \
             ON cf.mascon = main.mascon GROUP BY main.date ORDER BY main.date",
            filter
        );
        return Ok(SqlQuery::new(text, vec![value, version]));
    }

    if table.contains("streamgauges") {
        let location = params.required_str("location")?;
        return Ok(SqlQuery::new(
            "SELECT date::text AS date, gaugeid::text AS gaugeid, discharge::text AS discharge \
             FROM streamgauge_data \
             WHERE gaugeid IN (SELECT gaugeid FROM streamgauges WHERE name ~ $1) \
             ORDER BY date",
            vec![location],
        ));
    }

    if table.contains("pointbalances") {
        let glacier = params.required_str("glacier")?;
        return Ok(SqlQuery::new(
            "SELECT start_date::text AS start_date, end_date::text AS end_date, \
             stake::text AS stake, elevation::text AS elevation, balance::text AS balance, \
             ST_AsText(ST_Transform(geom, 4246)) AS geom \
             FROM point_balances WHERE name = $1 ORDER BY start_date",
            vec![glacier],
        ));
    }

    Err(I2oError::invalid(
        "table",
        format!("'{}' is not a time series table", table),
    ))
}

/// Query for `/api/vector`: WKT geometry of the glacier called `{name} Glacier`.
pub fn vector_query(params: &RequestParams) -> I2oResult<SqlQuery> {
    let table = params.required_str("table")?;
    let name = params.required_str("name")?;

    // Table names cannot be bound
    if !table
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(I2oError::invalid("table", format!("'{}' is not a table name", table)));
    }

    let filter = if table.contains("moderncenterlines") {
        "glimsid IN (SELECT glimsid FROM modern WHERE name = $1)"
    } else {
        "name = $1"
    };
    Ok(SqlQuery::new(
        format!(
            "SELECT ST_AsText(ST_Transform(geom, 4246)) AS wkt FROM {} WHERE {}",
            table, filter
        ),
        vec![format!("{} Glacier", name)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grace_prefers_mascon_over_region() {
        let p = RequestParams::from_query([
            ("table", "GRACE_solution"),
            ("mascon", "1204"),
            ("region", "gulf"),
            ("version", "2"),
        ]);
        let q = timeseries_query(&p).unwrap();
        assert!(q.text.contains("WHERE mascon::text = $1"));
        assert_eq!(q.binds, vec!["1204", "2"]);

        let p = RequestParams::from_query([("table", "GRACE"), ("region", "gulf"), ("version", "2")]);
        let q = timeseries_query(&p).unwrap();
        assert!(q.text.contains("WHERE region::text = $1"));
    }

    #[test]
    fn test_timeseries_requires_table_specific_params() {
        let p = RequestParams::from_query([("table", "GRACE"), ("mascon", "1")]);
        assert!(matches!(
            timeseries_query(&p).unwrap_err(),
            I2oError::MissingParameter(ref n) if n == "version"
        ));

        let p = RequestParams::from_query([("table", "pointbalances")]);
        assert!(matches!(
            timeseries_query(&p).unwrap_err(),
            I2oError::MissingParameter(ref n) if n == "glacier"
        ));

        let p = RequestParams::from_query([("table", "weather")]);
        assert!(matches!(
            timeseries_query(&p).unwrap_err(),
            I2oError::InvalidParameter { .. }
        ));
    }

    #[test]
    fn test_vector_query_binds_glacier_name() {
        let p = RequestParams::from_query([("table", "moderncenterlines"), ("name", "Columbia")]);
        let q = vector_query(&p).unwrap();
        assert!(q.text.contains("FROM moderncenterlines WHERE glimsid IN"));
        assert_eq!(q.binds, vec!["Columbia Glacier"]);
    }

    #[test]
    fn test_vector_query_rejects_odd_table_names() {
        let p = RequestParams::from_query([("table", "outlines; DROP TABLE x"), ("name", "a")]);
        assert!(matches!(
            vector_query(&p).unwrap_err(),
            I2oError::InvalidParameter { .. }
        ));
    }

    #[test]
    fn test_csv_quotes_when_needed() {
        let table = Table {
            columns: vec!["date".into(), "geom".into()],
            rows: vec![
                vec![Some("03/10/2014".into()), Some("POINT(1 2)".into())],
                vec![Some("03/11/2014".into()), None],
                vec![Some("a,b".into()), Some("say \"hi\"".into())],
            ],
        };
        assert_eq!(
            table.to_csv(),
            "date,geom\n03/10/2014,POINT(1 2)\n03/11/2014,\n\"a,b\",\"say \"\"hi\"\"\"\n"
        );
    }
}
