use bar_core::BarTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Floor for RS loss denominators; avoids division by zero on all-gain windows.
const LOSS_EPSILON: f64 = 1e-10;

/// Floor for stochastic high/low ranges on flat windows.
const RANGE_EPSILON: f64 = 1e-12;

/// Supported indicator kinds.
///
/// Outputs:
/// - Sma/Ema: single line (main panel)
/// - Bbands: upper/middle/lower (main panel)
/// - Rsi/Atr: single line (own oscillator panel)
/// - Macd: line, signal, histogram (shared macd panel)
/// - Stoch: %K, %D (shared stochastic panel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Macd,
    Bbands,
    Atr,
    Stoch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIndicatorKindError;

impl fmt::Display for ParseIndicatorKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown indicator kind")
    }
}

impl std::error::Error for ParseIndicatorKindError {}

impl FromStr for IndicatorKind {
    type Err = ParseIndicatorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sma" | "ma" | "simple_ma" => Ok(IndicatorKind::Sma),
            "ema" => Ok(IndicatorKind::Ema),
            "rsi" => Ok(IndicatorKind::Rsi),
            "macd" => Ok(IndicatorKind::Macd),
            "bbands" | "bollinger" | "bollinger_bands" => Ok(IndicatorKind::Bbands),
            "atr" => Ok(IndicatorKind::Atr),
            "stoch" | "stochastic" => Ok(IndicatorKind::Stoch),
            _ => Err(ParseIndicatorKindError),
        }
    }
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Bbands => "bbands",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Stoch => "stoch",
        }
    }
}

/// Oscillator family: all series of one family share one panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OscillatorFamily {
    Rsi,
    Macd,
    Atr,
    Stochastic,
}

impl OscillatorFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OscillatorFamily::Rsi => "rsi",
            OscillatorFamily::Macd => "macd",
            OscillatorFamily::Atr => "atr",
            OscillatorFamily::Stochastic => "stochastic",
        }
    }
}

/// Where a computed series is drawn: overlaid on the price panel or in
/// its family's oscillator panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelClass {
    Main,
    Oscillator(OscillatorFamily),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawStyle {
    Line,
    Histogram,
}

/// Render hint for one series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineStyle {
    pub color: String,
    pub width: f64,
    pub draw: DrawStyle,
}

impl LineStyle {
    fn line(color: &str, width: f64) -> Self {
        Self {
            color: color.to_string(),
            width,
            draw: DrawStyle::Line,
        }
    }

    fn histogram(color: &str) -> Self {
        Self {
            color: color.to_string(),
            width: 1.0,
            draw: DrawStyle::Histogram,
        }
    }
}

/// One computed series, aligned 1:1 with its `BarTable`. NaN marks
/// positions without enough trailing history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub label: String,
    pub panel_class: PanelClass,
    pub values: Vec<f64>,
    pub style: LineStyle,
}

impl IndicatorSeries {
    fn new(label: &str, panel_class: PanelClass, values: Vec<f64>, style: LineStyle) -> Self {
        Self {
            label: label.to_string(),
            panel_class,
            values,
            style,
        }
    }

    pub fn valid_points(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Raw caller-supplied parameters, name → JSON value. Unknown keys are
/// ignored; missing keys take per-indicator defaults.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

fn param_usize(params: &ParamMap, key: &str, default: usize) -> usize {
    match params.get(key) {
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize))
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(default),
        None => default,
    }
}

fn param_f64(params: &ParamMap, key: &str, default: f64) -> f64 {
    match params.get(key) {
        Some(v) => v
            .as_f64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(default),
        None => default,
    }
}

/// Resolved parameters for one indicator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndicatorParams {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Bbands { period: usize, std_dev: f64 },
    Atr { period: usize },
    Stoch { k_period: usize, d_period: usize },
}

impl IndicatorParams {
    /// Apply per-indicator defaults over whatever the caller supplied.
    pub fn resolve(kind: IndicatorKind, params: &ParamMap) -> Self {
        match kind {
            IndicatorKind::Sma => IndicatorParams::Sma {
                period: param_usize(params, "period", 20),
            },
            IndicatorKind::Ema => IndicatorParams::Ema {
                period: param_usize(params, "period", 20),
            },
            IndicatorKind::Rsi => IndicatorParams::Rsi {
                period: param_usize(params, "period", 14),
            },
            IndicatorKind::Macd => IndicatorParams::Macd {
                fast: param_usize(params, "fast", 12),
                slow: param_usize(params, "slow", 26),
                signal: param_usize(params, "signal", 9),
            },
            IndicatorKind::Bbands => IndicatorParams::Bbands {
                period: param_usize(params, "period", 20),
                std_dev: param_f64(params, "std_dev", 2.0),
            },
            IndicatorKind::Atr => IndicatorParams::Atr {
                period: param_usize(params, "period", 14),
            },
            IndicatorKind::Stoch => IndicatorParams::Stoch {
                k_period: param_usize(params, "k_period", 14),
                d_period: param_usize(params, "d_period", 3),
            },
        }
    }
}

/// Adapt a nominal window to the available history:
/// `min(nominal, max(floor, n - 1))`.
fn effective_window(nominal: usize, floor: usize, n: usize) -> usize {
    nominal.min(floor.max(n.saturating_sub(1)))
}

/// Trailing arithmetic mean over `window` points. Positions whose window
/// is incomplete or contains NaN stay NaN.
fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[i] = slice.iter().sum::<f64>() / window as f64;
    }
    out
}

/// Recursive EMA with smoothing 2/(window+1), seeded with the simple mean
/// of the first `window` valid points (no bias adjustment). Leading NaNs
/// in the input are passed over, which lets this run on derived series
/// like the MACD line.
fn ema_series(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    let Some(start) = values.iter().position(|v| !v.is_nan()) else {
        return out;
    };
    let valid = &values[start..];
    if valid.len() < window {
        return out;
    }
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut ema = valid[..window].iter().sum::<f64>() / window as f64;
    out[start + window - 1] = ema;
    for (i, v) in valid.iter().enumerate().skip(window) {
        ema = alpha * v + (1.0 - alpha) * ema;
        out[start + i] = ema;
    }
    out
}

type ComputeFn = fn(&BarTable, &IndicatorParams) -> Vec<IndicatorSeries>;

/// Registry dispatch: indicator kind → computation function with a
/// uniform signature. Each formula stays independently testable.
fn registry(kind: IndicatorKind) -> ComputeFn {
    match kind {
        IndicatorKind::Sma => compute_sma,
        IndicatorKind::Ema => compute_ema,
        IndicatorKind::Rsi => compute_rsi,
        IndicatorKind::Macd => compute_macd,
        IndicatorKind::Bbands => compute_bbands,
        IndicatorKind::Atr => compute_atr,
        IndicatorKind::Stoch => compute_stoch,
    }
}

/// Compute one requested indicator. An empty result means "skip": the
/// effective window cannot fit the available history, so this indicator
/// is omitted and the rest of the chart proceeds.
pub fn compute(
    bars: &BarTable,
    kind: IndicatorKind,
    params: &ParamMap,
) -> Vec<IndicatorSeries> {
    let resolved = IndicatorParams::resolve(kind, params);
    let series = registry(kind)(bars, &resolved);
    if series.iter().all(|s| s.valid_points() == 0) {
        return Vec::new();
    }
    series
}

fn compute_sma(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Sma { period } = params else {
        return Vec::new();
    };
    let n = bars.len();
    let window = effective_window(*period, 1, n);
    if window == 0 || window > n {
        return Vec::new();
    }
    let values = rolling_mean(&bars.closes(), window);
    vec![IndicatorSeries::new(
        "SMA",
        PanelClass::Main,
        values,
        LineStyle::line("#7ee0ff", 1.8),
    )]
}

fn compute_ema(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Ema { period } = params else {
        return Vec::new();
    };
    let window = effective_window(*period, 1, bars.len());
    if window == 0 {
        return Vec::new();
    }
    let values = ema_series(&bars.closes(), window);
    vec![IndicatorSeries::new(
        "EMA",
        PanelClass::Main,
        values,
        LineStyle::line("#ff8ba7", 1.8),
    )]
}

fn compute_rsi(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Rsi { period } = params else {
        return Vec::new();
    };
    let n = bars.len();
    let window = effective_window(*period, 2, n);
    let closes = bars.closes();
    let mut values = vec![f64::NAN; n];
    // delta j belongs to bar j + 1; bar i needs the trailing `window` deltas.
    if window > 0 && n > window {
        let gains: Vec<f64> = closes
            .windows(2)
            .map(|w| (w[1] - w[0]).max(0.0))
            .collect();
        let losses: Vec<f64> = closes
            .windows(2)
            .map(|w| (w[0] - w[1]).max(0.0))
            .collect();
        for i in window..n {
            let avg_gain = gains[i - window..i].iter().sum::<f64>() / window as f64;
            let avg_loss = losses[i - window..i].iter().sum::<f64>() / window as f64;
            values[i] = if avg_loss <= LOSS_EPSILON {
                // Flooring the denominator sends all-gain windows to 100,
                // but a flat window (no gains either) has RS = 0.
                if avg_gain > 0.0 {
                    100.0
                } else {
                    0.0
                }
            } else {
                let rs = avg_gain / avg_loss;
                100.0 - 100.0 / (1.0 + rs)
            };
        }
    }
    vec![IndicatorSeries::new(
        "RSI",
        PanelClass::Oscillator(OscillatorFamily::Rsi),
        values,
        LineStyle::line("#7dd3fc", 1.6),
    )]
}

fn compute_macd(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Macd { fast, slow, signal } = params else {
        return Vec::new();
    };
    let n = bars.len();
    // Heuristic length caps so short histories degrade instead of
    // failing; a policy choice, not a numerical requirement.
    let fast = (*fast).min(n / 4);
    let slow = (*slow).min(n / 3);
    let signal = (*signal).min(n / 5);
    if fast < 2 || slow < 2 || signal < 1 {
        return Vec::new();
    }

    let closes = bars.closes();
    let ema_fast = ema_series(&closes, fast);
    let ema_slow = ema_series(&closes, slow);
    let line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&line, signal);
    let histogram: Vec<f64> = line
        .iter()
        .zip(&signal_line)
        .map(|(l, s)| l - s)
        .collect();
    if histogram.iter().all(|v| v.is_nan()) {
        return Vec::new();
    }

    let family = PanelClass::Oscillator(OscillatorFamily::Macd);
    vec![
        IndicatorSeries::new("MACD_line", family, line, LineStyle::line("#4ade80", 1.8)),
        IndicatorSeries::new(
            "MACD_signal",
            family,
            signal_line,
            LineStyle::line("#f472b6", 1.6),
        ),
        IndicatorSeries::new(
            "MACD_histogram",
            family,
            histogram,
            LineStyle::histogram("#94a3b8"),
        ),
    ]
}

fn compute_bbands(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Bbands { period, std_dev } = params else {
        return Vec::new();
    };
    let n = bars.len();
    let window = effective_window(*period, 1, n);
    if window == 0 || window > n {
        return Vec::new();
    }
    let closes = bars.closes();
    let middle = rolling_mean(&closes, window);
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    for i in (window - 1)..n {
        let slice = &closes[i + 1 - window..=i];
        let mean = middle[i];
        let var = slice.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / window as f64;
        let sd = var.max(0.0).sqrt();
        upper[i] = mean + std_dev * sd;
        lower[i] = mean - std_dev * sd;
    }
    vec![
        IndicatorSeries::new(
            "BB_upper",
            PanelClass::Main,
            upper,
            LineStyle::line("#93c5fd", 1.0),
        ),
        IndicatorSeries::new(
            "BB_middle",
            PanelClass::Main,
            middle,
            LineStyle::line("#60a5fa", 1.2),
        ),
        IndicatorSeries::new(
            "BB_lower",
            PanelClass::Main,
            lower,
            LineStyle::line("#93c5fd", 1.0),
        ),
    ]
}

fn compute_atr(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Atr { period } = params else {
        return Vec::new();
    };
    let n = bars.len();
    let window = effective_window(*period, 2, n);
    if window == 0 || window > n {
        return Vec::new();
    }
    let slice = bars.as_slice();
    let mut true_ranges = Vec::with_capacity(n);
    for (i, bar) in slice.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = slice[i - 1].close;
            let h_l = bar.high - bar.low;
            let h_pc = (bar.high - prev_close).abs();
            let l_pc = (bar.low - prev_close).abs();
            h_l.max(h_pc).max(l_pc)
        };
        true_ranges.push(tr);
    }
    let values = rolling_mean(&true_ranges, window);
    vec![IndicatorSeries::new(
        "ATR",
        PanelClass::Oscillator(OscillatorFamily::Atr),
        values,
        LineStyle::line("#fbbf24", 1.6),
    )]
}

fn compute_stoch(bars: &BarTable, params: &IndicatorParams) -> Vec<IndicatorSeries> {
    let IndicatorParams::Stoch { k_period, d_period } = params else {
        return Vec::new();
    };
    let n = bars.len();
    let k_window = effective_window(*k_period, 2, n);
    let d_window = effective_window(*d_period, 1, n);
    if k_window == 0 || k_window > n {
        return Vec::new();
    }
    let slice = bars.as_slice();
    let mut k_values = vec![f64::NAN; n];
    for i in (k_window - 1)..n {
        let window = &slice[i + 1 - k_window..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = (highest - lowest).max(RANGE_EPSILON);
        k_values[i] = ((slice[i].close - lowest) / range * 100.0).clamp(0.0, 100.0);
    }
    let d_values = rolling_mean(&k_values, d_window);

    let family = PanelClass::Oscillator(OscillatorFamily::Stochastic);
    vec![
        IndicatorSeries::new("STOCH_K", family, k_values, LineStyle::line("#c084fc", 1.4)),
        IndicatorSeries::new("STOCH_D", family, d_values, LineStyle::line("#facc15", 1.2)),
    ]
}
