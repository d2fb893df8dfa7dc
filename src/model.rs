//! Records moving through the pipeline

use std::fmt;

use crate::error::ParseError;
use crate::parser::LogLine;

/// Numeric proxy identifier, scopes every table row to one log source.
pub type ProxyId = i64;

/// A parsed line accepted for staging.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRecord {
    /// Unix seconds with millisecond fraction, as Squid writes it
    pub date: f64,
    pub ipaddress: String,
    pub httpstatus: String,
    pub size_in_bytes: i64,
    pub method: String,
    pub site: String,
    pub login: String,
    pub mime: String,
    pub proxy_id: ProxyId,
}

impl StagingRecord {
    /// Converts the text fields of a parsed line into storage types.
    pub fn from_line(line: LogLine, proxy_id: ProxyId) -> Result<Self, ParseError> {
        let date = parse_date(&line.date)?;
        let size_in_bytes = line
            .size_in_bytes
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidField {
                field: "size",
                value: line.size_in_bytes.clone(),
            })?;

        Ok(Self {
            date,
            ipaddress: line.ipaddress,
            httpstatus: line.httpstatus,
            size_in_bytes,
            method: line.method,
            site: line.site,
            login: line.login,
            mime: line.mime,
            proxy_id,
        })
    }
}

/// Parses a Squid timestamp (`1600000000.123`).
pub fn parse_date(text: &str) -> Result<f64, ParseError> {
    match text.parse::<f64>() {
        Ok(date) if date.is_finite() && date >= 0.0 => Ok(date),
        _ => Err(ParseError::InvalidField {
            field: "date",
            value: text.to_string(),
        }),
    }
}

/// The three lookup tables keyed by natural text value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    IpAddress,
    Login,
    HttpStatus,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 3] = [
        DimensionKind::HttpStatus,
        DimensionKind::IpAddress,
        DimensionKind::Login,
    ];

    /// Column in the staging table holding this dimension's natural key.
    pub fn staging_column(self) -> &'static str {
        match self {
            Self::IpAddress => "ipaddress",
            Self::Login => "login",
            Self::HttpStatus => "httpstatus",
        }
    }

    pub fn staged_value(self, record: &StagingRecord) -> &str {
        match self {
            Self::IpAddress => &record.ipaddress,
            Self::Login => &record.login,
            Self::HttpStatus => &record.httpstatus,
        }
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.staging_column())
    }
}

/// Merged traffic row with surrogate keys.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub date: f64,
    pub ipaddress_id: i64,
    pub login_id: i64,
    pub httpstatus_id: i64,
    pub size_in_bytes: i64,
    pub site: String,
    pub method: String,
    pub mime: String,
    pub proxy_id: ProxyId,
}

/// Rollup row discriminator, stored as `par`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Detailed = 1,
    DomainTotal = 2,
}

impl Partition {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Login/ipaddress value written on domain-total rows.
pub const ROLLUP_SENTINEL_ID: i64 = 0;

/// Hourly aggregate of fact rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RollupRecord {
    /// Unix seconds at the start of the hour
    pub date_bucket: i64,
    pub login_id: i64,
    pub ipaddress_id: i64,
    pub size_in_bytes: i64,
    pub site: String,
    pub httpstatus_id: Option<i64>,
    pub partition: Partition,
    pub proxy_id: ProxyId,
}

/// One audit row per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogRecord {
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

impl RunLogRecord {
    pub fn new(
        start_time: chrono::DateTime<chrono::Utc>,
        end_time: chrono::DateTime<chrono::Utc>,
        lines_read: u64,
        lines_added: u64,
    ) -> Self {
        Self {
            start_time,
            end_time,
            message: format!("{} read, {} added", lines_read, lines_added),
        }
    }
}
