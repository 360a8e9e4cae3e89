use bar_core::{BarTable, ChartType, DataError, RawBar};
use indicator_engine::{compute, IndicatorKind, IndicatorSeries, ParamMap};
use panel_layout::{allocate, LayoutError, LayoutPlan};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// At most this many indicator requests are honored per chart; extras are
/// silently dropped to bound panel count and rendering cost.
pub const MAX_INDICATORS: usize = 8;

const DEFAULT_WIDTH: u32 = 1200;
const DEFAULT_HEIGHT: u32 = 800;

#[derive(Debug, Error)]
pub enum ChartError {
    /// Bar data itself is unusable; surfaced to the caller as a request
    /// failure. Individual indicator problems never end up here.
    #[error(transparent)]
    Data(#[from] DataError),
    /// Allocator invariant broke; a programming fault, not bad input.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// One requested indicator: a name plus raw parameters. Unknown names and
/// unknown parameter keys degrade gracefully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorRequest {
    pub name: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl IndicatorRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: ParamMap::new(),
        }
    }

    pub fn with_params(name: &str, params: ParamMap) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }
}

/// Presentation options forwarded to the renderer alongside the plan.
/// The chart-type selector is kept as supplied text so unrecognized
/// values can fall back to candlesticks instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartOptions {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: bool,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_volume() -> bool {
    true
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            chart_type: None,
            volume: true,
        }
    }
}

impl ChartOptions {
    pub fn resolved_chart_type(&self) -> ChartType {
        ChartType::from_name(self.chart_type.as_deref())
    }
}

/// The layout plan plus the metadata callers get back: how many bars were
/// actually used and which requested indicators made it onto the chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartResponse {
    pub plan: LayoutPlan,
    pub bars_used: usize,
    pub indicators_applied: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub chart_type: ChartType,
}

/// Orchestrates one chart build: validate bars, compute each requested
/// indicator independently, allocate panels, emit the plan. Stateless;
/// every request is computed from scratch with no shared mutable state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartService;

impl ChartService {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        rows: &[RawBar],
        requests: &[IndicatorRequest],
        options: &ChartOptions,
    ) -> Result<ChartResponse, ChartError> {
        let bars = BarTable::from_rows(rows)?;

        if requests.len() > MAX_INDICATORS {
            debug!(
                dropped = requests.len() - MAX_INDICATORS,
                "indicator requests over the cap dropped"
            );
        }

        let mut series: Vec<IndicatorSeries> = Vec::new();
        let mut applied: Vec<String> = Vec::new();
        let mut seen: Vec<IndicatorKind> = Vec::new();

        for request in requests.iter().take(MAX_INDICATORS) {
            let kind = match request.name.parse::<IndicatorKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!(name = %request.name, "unknown indicator requested, skipping");
                    continue;
                }
            };
            if seen.contains(&kind) {
                debug!(name = %request.name, "duplicate indicator request, skipping");
                continue;
            }
            seen.push(kind);

            let computed = compute(&bars, kind, &request.params);
            if computed.is_empty() {
                debug!(
                    indicator = kind.as_str(),
                    bars = bars.len(),
                    "indicator skipped: insufficient history"
                );
                continue;
            }
            applied.push(kind.as_str().to_string());
            series.extend(computed);
        }

        let plan = allocate(series, options.volume)?;
        info!(
            bars = bars.len(),
            panels = plan.panel_count,
            applied = applied.len(),
            "chart layout built"
        );

        Ok(ChartResponse {
            bars_used: bars.len(),
            indicators_applied: applied,
            width: options.width,
            height: options.height,
            chart_type: options.resolved_chart_type(),
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bar_core::RawTimestamp;

    fn rising_rows(n: usize) -> Vec<RawBar> {
        (0..n)
            .map(|i| RawBar {
                ts: RawTimestamp::Epoch(1_700_000_000 + i as i64 * 86_400),
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.0 + i as f64,
                volume: 1_000.0,
            })
            .collect()
    }

    fn request(name: &str, pairs: &[(&str, i64)]) -> IndicatorRequest {
        let params: ParamMap = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect();
        IndicatorRequest::with_params(name, params)
    }

    #[test]
    fn rising_bars_with_sma_and_rsi() {
        let service = ChartService::new();
        let response = service
            .build(
                &rising_rows(30),
                &[request("sma", &[("period", 20)]), request("rsi", &[("period", 14)])],
                &ChartOptions::default(),
            )
            .unwrap();

        assert_eq!(response.bars_used, 30);
        assert_eq!(response.indicators_applied, vec!["sma", "rsi"]);
        assert_eq!(response.plan.panel_count, 3); // main, volume, rsi
        assert_eq!(response.plan.panel_ratios, vec![4, 1, 1]);

        let sma = response
            .plan
            .placements
            .iter()
            .find(|p| p.series.label == "SMA")
            .unwrap();
        assert_eq!(sma.panel, 0);
        assert_eq!(sma.series.valid_points(), 11);

        let rsi = response
            .plan
            .placements
            .iter()
            .find(|p| p.series.label == "RSI")
            .unwrap();
        assert_eq!(rsi.panel, 2);
        for v in rsi.series.values.iter().filter(|v| !v.is_nan()) {
            assert_eq!(*v, 100.0); // monotonic rise: no losses
        }
    }

    #[test]
    fn macd_on_three_bars_is_skipped_entirely() {
        let service = ChartService::new();
        let response = service
            .build(
                &rising_rows(3),
                &[IndicatorRequest::new("macd")],
                &ChartOptions::default(),
            )
            .unwrap();
        assert!(response.indicators_applied.is_empty());
        assert_eq!(response.plan.panel_count, 2); // main + volume only
        assert_eq!(response.plan.panel_ratios, vec![4, 1]);
        assert!(response.plan.placements.is_empty());
    }

    #[test]
    fn requests_beyond_the_cap_are_dropped() {
        let service = ChartService::new();
        // Eight filler requests, then a kind that only appears ninth.
        let mut requests: Vec<IndicatorRequest> =
            (0..8).map(|_| IndicatorRequest::new("sma")).collect();
        requests.push(IndicatorRequest::new("rsi"));

        let response = service
            .build(&rising_rows(60), &requests, &ChartOptions::default())
            .unwrap();
        assert_eq!(response.indicators_applied, vec!["sma"]);
        assert!(!response
            .plan
            .placements
            .iter()
            .any(|p| p.series.label == "RSI"));
    }

    #[test]
    fn unknown_indicator_names_are_tolerated() {
        let service = ChartService::new();
        let response = service
            .build(
                &rising_rows(30),
                &[IndicatorRequest::new("ichimoku"), IndicatorRequest::new("ema")],
                &ChartOptions::default(),
            )
            .unwrap();
        assert_eq!(response.indicators_applied, vec!["ema"]);
    }

    #[test]
    fn empty_bars_fail_the_request() {
        let service = ChartService::new();
        let err = service
            .build(&[], &[IndicatorRequest::new("sma")], &ChartOptions::default())
            .unwrap_err();
        assert!(matches!(err, ChartError::Data(DataError::Empty)));
    }

    #[test]
    fn chart_type_falls_back_on_unrecognized_selector() {
        let options = ChartOptions {
            chart_type: Some("renko".to_string()),
            ..ChartOptions::default()
        };
        assert_eq!(options.resolved_chart_type(), ChartType::Candle);

        let options = ChartOptions {
            chart_type: Some("ohlc".to_string()),
            ..ChartOptions::default()
        };
        assert_eq!(options.resolved_chart_type(), ChartType::Ohlc);
    }

    #[test]
    fn volume_disabled_shifts_oscillators_down() {
        let service = ChartService::new();
        let options = ChartOptions {
            volume: false,
            ..ChartOptions::default()
        };
        let response = service
            .build(&rising_rows(30), &[IndicatorRequest::new("rsi")], &options)
            .unwrap();
        assert_eq!(response.plan.panel_count, 2);
        assert_eq!(response.plan.panel_ratios, vec![4, 1]);
        assert_eq!(response.plan.placements[0].panel, 1);
        assert!(response.plan.volume_panel.is_none());
    }
}
