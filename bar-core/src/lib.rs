use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Maximum number of bars kept per request. Longer input is tail-truncated
/// so the most recent bars survive.
pub const MAX_BARS: usize = 400;

/// Epoch values at or above this are interpreted as milliseconds,
/// below as seconds (the cutoff is ~March 1973 in ms, ~5138 AD in s).
const EPOCH_MS_CUTOFF: i64 = 100_000_000_000;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("bar table is empty")]
    Empty,
    #[error("unparsable timestamp: {0}")]
    BadTimestamp(String),
    #[error("duplicate or out-of-order timestamp at {0}")]
    NonMonotonic(Timestamp),
}

/// One OHLCV interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub ts: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Timestamp as supplied by a caller: integer epoch (seconds or
/// milliseconds) or a date/datetime string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(i64),
    Text(String),
}

impl RawTimestamp {
    pub fn to_millis(&self) -> Result<Timestamp, DataError> {
        match self {
            RawTimestamp::Epoch(v) => {
                if v.abs() >= EPOCH_MS_CUTOFF {
                    Ok(*v)
                } else {
                    Ok(v * 1_000)
                }
            }
            RawTimestamp::Text(s) => {
                parse_timestamp_text(s).ok_or_else(|| DataError::BadTimestamp(s.clone()))
            }
        }
    }
}

fn parse_timestamp_text(s: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let dt = d.and_hms_opt(0, 0, 0)?;
        return Some(dt.and_utc().timestamp_millis());
    }
    None
}

/// One bar row as supplied over the input boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
    #[serde(alias = "timestamp")]
    pub ts: RawTimestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Validated, time-ordered OHLCV series. Immutable once built; every
/// computed series stays aligned 1:1 with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarTable {
    bars: Vec<Bar>,
}

impl BarTable {
    /// Build from caller-supplied rows: parse timestamps, sort ascending,
    /// reject duplicates, keep only the most recent `MAX_BARS`.
    pub fn from_rows(rows: &[RawBar]) -> Result<Self, DataError> {
        if rows.is_empty() {
            return Err(DataError::Empty);
        }
        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            bars.push(Bar {
                ts: row.ts.to_millis()?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        bars.sort_by_key(|b| b.ts);
        for pair in bars.windows(2) {
            if pair[1].ts <= pair[0].ts {
                return Err(DataError::NonMonotonic(pair[1].ts));
            }
        }
        if bars.len() > MAX_BARS {
            bars = bars.split_off(bars.len() - MAX_BARS);
        }
        Ok(Self { bars })
    }

    /// Build from already-validated bars (strictly increasing timestamps).
    pub fn from_bars(bars: Vec<Bar>) -> Result<Self, DataError> {
        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        for pair in bars.windows(2) {
            if pair[1].ts <= pair[0].ts {
                return Err(DataError::NonMonotonic(pair[1].ts));
            }
        }
        Ok(Self { bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

/// How the price panel is drawn. Unrecognized input falls back to candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Candle,
    Line,
    Ohlc,
    #[serde(rename = "hollow_and_filled")]
    HollowAndFilled,
}

impl Default for ChartType {
    fn default() -> Self {
        ChartType::Candle
    }
}

impl ChartType {
    /// Lenient parse used at the request boundary: unknown or missing
    /// selectors mean candlesticks.
    pub fn from_name(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(ChartType::Candle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Candle => "candle",
            ChartType::Line => "line",
            ChartType::Ohlc => "ohlc",
            ChartType::HollowAndFilled => "hollow_and_filled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChartTypeError;

impl fmt::Display for ParseChartTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown chart type")
    }
}

impl std::error::Error for ParseChartTypeError {}

impl FromStr for ChartType {
    type Err = ParseChartTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "candle" | "candlestick" => Ok(ChartType::Candle),
            "line" => Ok(ChartType::Line),
            "ohlc" => Ok(ChartType::Ohlc),
            "hollow_and_filled" | "hollow" => Ok(ChartType::HollowAndFilled),
            _ => Err(ParseChartTypeError),
        }
    }
}
