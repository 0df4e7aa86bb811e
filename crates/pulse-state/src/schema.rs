//! SQL statements for the relational backend.
//!
//! Written in the dialect shared by PostgreSQL and SQLite (`$n`
//! placeholders, `ON CONFLICT ... DO UPDATE`, `RETURNING`).

/// Gauge values keyed by metric name.
pub const CREATE_GAUGE: &str = "CREATE TABLE IF NOT EXISTS gauge (
    metric_name TEXT PRIMARY KEY,
    metric_value DOUBLE PRECISION NOT NULL
)";

/// Counter totals keyed by metric name.
///
/// PostgreSQL raises `numeric_value_out_of_range` when a BIGINT sum overflows.
pub const CREATE_COUNTER: &str = "CREATE TABLE IF NOT EXISTS counter (
    metric_name TEXT PRIMARY KEY,
    metric_value BIGINT NOT NULL
)";

/// SQLite turns an overflowing integer sum into a REAL instead of failing,
/// so the column rejects anything that is not an integer.
pub const CREATE_COUNTER_SQLITE: &str = "CREATE TABLE IF NOT EXISTS counter (
    metric_name TEXT PRIMARY KEY,
    metric_value BIGINT NOT NULL CHECK (typeof(metric_value) = 'integer')
)";

/// SQL dialects the store talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Pick the dialect from a connection string.
    pub fn from_dsn(dsn: &str) -> Self {
        if dsn.starts_with("sqlite:") {
            Dialect::Sqlite
        } else {
            Dialect::Postgres
        }
    }

    pub fn create_counter(self) -> &'static str {
        match self {
            Dialect::Postgres => CREATE_COUNTER,
            Dialect::Sqlite => CREATE_COUNTER_SQLITE,
        }
    }
}

pub const UPSERT_GAUGE: &str = "INSERT INTO gauge (metric_name, metric_value) VALUES ($1, $2)
    ON CONFLICT (metric_name) DO UPDATE SET metric_value = excluded.metric_value";

/// The increment is evaluated by the database, so concurrent upserts never lose a delta.
pub const UPSERT_COUNTER: &str = "INSERT INTO counter (metric_name, metric_value) VALUES ($1, $2)
    ON CONFLICT (metric_name)
    DO UPDATE SET metric_value = counter.metric_value + excluded.metric_value
    RETURNING metric_value";

pub const SELECT_GAUGE: &str = "SELECT metric_value FROM gauge WHERE metric_name = $1";

pub const SELECT_COUNTER: &str = "SELECT metric_value FROM counter WHERE metric_name = $1";

pub const SELECT_ALL_GAUGES: &str = "SELECT metric_name, metric_value FROM gauge";

pub const SELECT_ALL_COUNTERS: &str = "SELECT metric_name, metric_value FROM counter";

pub const PING: &str = "SELECT 1";
