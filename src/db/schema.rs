//! Database schema definitions
//!
//! Table and column names follow the Screen Squid reporting layout so an existing
//! report front-end can read the warehouse directly.

use super::Dialect;
use crate::model::DimensionKind;

pub const STAGING_TABLE: &str = "scsq_temptraffic";
pub const FACT_TABLE: &str = "scsq_traffic";
pub const ROLLUP_TABLE: &str = "scsq_quicktraffic";
pub const RUN_LOG_TABLE: &str = "scsq_logtable";

pub fn dimension_table(kind: DimensionKind) -> &'static str {
    match kind {
        DimensionKind::IpAddress => "scsq_ipaddress",
        DimensionKind::Login => "scsq_logins",
        DimensionKind::HttpStatus => "scsq_httpstatus",
    }
}

impl Dialect {
    fn id_column(self) -> &'static str {
        match self {
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::MySql => "id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        }
    }

    /// Natural-key text; MySQL needs a binary collation so `Alice` and `alice` stay apart.
    fn name_type(self) -> &'static str {
        match self {
            Dialect::MySql => "VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin",
            _ => "VARCHAR(255)",
        }
    }

    fn double(self) -> &'static str {
        match self {
            Dialect::Sqlite => "REAL",
            Dialect::MySql => "DOUBLE",
            Dialect::Postgres => "DOUBLE PRECISION",
        }
    }
}

/// Statements creating every table and index the pipeline touches, in order.
pub fn create_statements(dialect: Dialect) -> Vec<String> {
    let id = dialect.id_column();
    let double = dialect.double();
    let name = dialect.name_type();

    let mut statements = vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {STAGING_TABLE} (
                {id},
                date {double} NOT NULL,
                ipaddress {name} NOT NULL,
                httpstatus {name} NOT NULL,
                sizeinbytes BIGINT NOT NULL,
                site TEXT NOT NULL,
                login {name} NOT NULL,
                method VARCHAR(32) NOT NULL,
                mime VARCHAR(255) NOT NULL,
                numproxy BIGINT NOT NULL
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {FACT_TABLE} (
                {id},
                date {double} NOT NULL,
                ipaddress BIGINT NOT NULL,
                login BIGINT NOT NULL,
                httpstatus BIGINT NOT NULL,
                sizeinbytes BIGINT NOT NULL,
                site TEXT NOT NULL,
                method VARCHAR(32) NOT NULL,
                mime VARCHAR(255) NOT NULL,
                numproxy BIGINT NOT NULL{fact_index}
            )
            "#,
            fact_index = inline_index(dialect, "idx_traffic_proxy_date"),
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {ROLLUP_TABLE} (
                {id},
                date BIGINT NOT NULL,
                login BIGINT NOT NULL,
                ipaddress BIGINT NOT NULL,
                sizeinbytes BIGINT NOT NULL,
                site TEXT NOT NULL,
                httpstatus BIGINT,
                par BIGINT NOT NULL,
                numproxy BIGINT NOT NULL{rollup_index}
            )
            "#,
            rollup_index = inline_index(dialect, "idx_quicktraffic_proxy_date"),
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {RUN_LOG_TABLE} (
                {id},
                datestart BIGINT NOT NULL,
                dateend BIGINT NOT NULL,
                message TEXT NOT NULL
            )
            "#
        ),
    ];

    for kind in DimensionKind::ALL {
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, name {} NOT NULL UNIQUE)",
            dimension_table(kind),
            id,
            name
        ));
    }

    // MySQL has no CREATE INDEX IF NOT EXISTS, its indexes are declared inline above
    if dialect != Dialect::MySql {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_traffic_proxy_date ON {FACT_TABLE}(numproxy, date)"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_quicktraffic_proxy_date ON {ROLLUP_TABLE}(numproxy, date)"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_temptraffic_proxy ON {STAGING_TABLE}(numproxy)"
        ));
    }

    statements
}

fn inline_index(dialect: Dialect, name: &str) -> String {
    match dialect {
        Dialect::MySql => format!(",\n                INDEX {}(numproxy, date)", name),
        _ => String::new(),
    }
}
