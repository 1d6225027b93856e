//! Incremental indicator evaluators.
//!
//! Every evaluator advances one closed bar at a time and publishes into a
//! flat `FeatureMap`. Values at bar `t` depend only on bars `0..=t`; an
//! evaluator publishes nothing until its own warmup is satisfied.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::error::Result;
use crate::features::registry::{FeatureId, FeatureMap, FeatureRegistry};
use crate::features::structure::{FibRetracement, PivotDetector, PivotKind, ZoneDetector};
use crate::timeframe::Role;

/// Indicator family plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorKind {
    Ema { period: usize },
    Sma { period: usize },
    Rsi { period: usize },
    Atr { period: usize },
    Bollinger { period: usize, std_mult: f64 },
    Supertrend { atr_period: usize, multiplier: f64 },
    Donchian { lookback: usize },
    Adx { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Keltner { ema_period: usize, atr_period: usize, multiplier: f64 },
    Obv,
    Vwap,
    SwingHigh { left: usize, right: usize },
    SwingLow { left: usize, right: usize },
    FibRetracement { left: usize, right: usize },
    ZoneDemand { left: usize, right: usize },
    ZoneSupply { left: usize, right: usize },
}

impl IndicatorKind {
    /// Bars required before this indicator publishes a value. This feeds
    /// the warmup resolver, so it is a pure function of the parameters.
    pub fn warmup_bars(&self) -> usize {
        match self {
            IndicatorKind::Ema { period } | IndicatorKind::Sma { period } => *period,
            IndicatorKind::Rsi { period } => period + 1,
            IndicatorKind::Atr { period } => *period,
            IndicatorKind::Bollinger { period, .. } => *period,
            IndicatorKind::Supertrend { atr_period, .. } => *atr_period,
            IndicatorKind::Donchian { lookback } => lookback + 1,
            IndicatorKind::Adx { period } => 2 * period,
            IndicatorKind::Macd { slow, signal, .. } => slow + signal - 1,
            IndicatorKind::Keltner {
                ema_period,
                atr_period,
                ..
            } => *ema_period.max(atr_period),
            IndicatorKind::Obv | IndicatorKind::Vwap => 1,
            IndicatorKind::SwingHigh { left, right }
            | IndicatorKind::SwingLow { left, right }
            | IndicatorKind::ZoneDemand { left, right }
            | IndicatorKind::ZoneSupply { left, right } => left + right + 1,
            IndicatorKind::FibRetracement { left, right } => 2 * (left + right + 1),
        }
    }

    /// Feature keys this indicator publishes, derived from the declared
    /// base key.
    pub fn output_keys(&self, key: &str) -> Vec<String> {
        match self {
            IndicatorKind::Bollinger { .. } | IndicatorKind::Keltner { .. } => vec![
                format!("{key}_upper"),
                format!("{key}_mid"),
                format!("{key}_lower"),
            ],
            IndicatorKind::Donchian { .. } => {
                vec![format!("{key}_upper"), format!("{key}_lower")]
            }
            IndicatorKind::Supertrend { .. } => vec![key.to_string(), format!("{key}_dir")],
            IndicatorKind::Adx { .. } => vec![
                key.to_string(),
                format!("{key}_di_plus"),
                format!("{key}_di_minus"),
            ],
            IndicatorKind::Macd { .. } => vec![
                key.to_string(),
                format!("{key}_signal"),
                format!("{key}_hist"),
            ],
            IndicatorKind::FibRetracement { .. } => vec![
                format!("{key}_382"),
                format!("{key}_500"),
                format!("{key}_618"),
            ],
            IndicatorKind::ZoneDemand { .. } | IndicatorKind::ZoneSupply { .. } => {
                vec![format!("{key}_upper"), format!("{key}_lower")]
            }
            _ => vec![key.to_string()],
        }
    }
}

/// A declared feature: which role's stream feeds it, its base key, and the
/// indicator computing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub role: Role,
    pub key: String,
    pub kind: IndicatorKind,
}

impl IndicatorSpec {
    pub fn new(role: Role, key: impl Into<String>, kind: IndicatorKind) -> Self {
        Self {
            role,
            key: key.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming primitives
// ---------------------------------------------------------------------------

/// EMA seeded with the SMA of the first `period` values.
#[derive(Debug, Clone)]
struct EmaState {
    period: usize,
    k: f64,
    seed_sum: f64,
    count: usize,
    value: Option<f64>,
}

impl EmaState {
    fn new(period: usize) -> Self {
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            count: 0,
            value: None,
        }
    }

    fn update(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        match self.value {
            None => {
                self.seed_sum += x;
                if self.count == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
            Some(prev) => {
                self.value = Some(x * self.k + prev * (1.0 - self.k));
            }
        }
        self.value
    }
}

/// Rolling SMA over a fixed window.
#[derive(Debug, Clone)]
struct SmaState {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl SmaState {
    fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        }
    }

    fn update(&mut self, x: f64) -> Option<f64> {
        self.window.push_back(x);
        self.sum += x;
        if self.window.len() > self.period {
            self.sum -= self.window.pop_front().expect("window non-empty");
        }
        (self.window.len() == self.period).then(|| self.sum / self.period as f64)
    }
}

/// Wilder-smoothed mean (alpha = 1/period), seeded with a plain average.
#[derive(Debug, Clone)]
struct WilderState {
    period: usize,
    seed_sum: f64,
    count: usize,
    value: Option<f64>,
}

impl WilderState {
    fn new(period: usize) -> Self {
        Self {
            period,
            seed_sum: 0.0,
            count: 0,
            value: None,
        }
    }

    fn update(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        match self.value {
            None => {
                self.seed_sum += x;
                if self.count == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
            Some(prev) => {
                let alpha = 1.0 / self.period as f64;
                self.value = Some(prev * (1.0 - alpha) + x * alpha);
            }
        }
        self.value
    }
}

/// True range with the previous close carried across bars.
#[derive(Debug, Clone, Default)]
struct TrueRangeState {
    prev_close: Option<f64>,
}

impl TrueRangeState {
    fn update(&mut self, bar: &Bar) -> f64 {
        let tr = match self.prev_close {
            None => bar.high - bar.low,
            Some(pc) => (bar.high - bar.low)
                .max((bar.high - pc).abs())
                .max((bar.low - pc).abs()),
        };
        self.prev_close = Some(bar.close);
        tr
    }
}

/// Wilder ATR built from the streaming true range.
#[derive(Debug, Clone)]
struct AtrState {
    tr: TrueRangeState,
    smooth: WilderState,
}

impl AtrState {
    fn new(period: usize) -> Self {
        Self {
            tr: TrueRangeState::default(),
            smooth: WilderState::new(period),
        }
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = self.tr.update(bar);
        self.smooth.update(tr)
    }
}

/// Wilder RSI.
#[derive(Debug, Clone)]
struct RsiState {
    prev_close: Option<f64>,
    avg_gain: WilderState,
    avg_loss: WilderState,
}

impl RsiState {
    fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            avg_gain: WilderState::new(period),
            avg_loss: WilderState::new(period),
        }
    }

    fn update(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };
        let delta = close - prev;
        let gain = self.avg_gain.update(delta.max(0.0));
        let loss = self.avg_loss.update((-delta).max(0.0));
        match (gain, loss) {
            (Some(g), Some(l)) => {
                if l == 0.0 {
                    Some(100.0)
                } else {
                    Some(100.0 - 100.0 / (1.0 + g / l))
                }
            }
            _ => None,
        }
    }
}

/// Rolling mean and population standard deviation for Bollinger bands.
#[derive(Debug, Clone)]
struct BollingerState {
    period: usize,
    std_mult: f64,
    window: VecDeque<f64>,
}

impl BollingerState {
    fn new(period: usize, std_mult: f64) -> Self {
        Self {
            period,
            std_mult,
            window: VecDeque::with_capacity(period + 1),
        }
    }

    fn update(&mut self, close: f64) -> Option<(f64, f64, f64)> {
        self.window.push_back(close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let var = self.window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let band = self.std_mult * var.sqrt();
        Some((mean + band, mean, mean - band))
    }
}

/// Supertrend with ratcheting final bands.
#[derive(Debug, Clone)]
struct SupertrendState {
    atr: AtrState,
    multiplier: f64,
    final_upper: f64,
    final_lower: f64,
    bullish: bool,
    prev_close: Option<f64>,
    initialized: bool,
}

impl SupertrendState {
    fn new(atr_period: usize, multiplier: f64) -> Self {
        Self {
            atr: AtrState::new(atr_period),
            multiplier,
            final_upper: f64::INFINITY,
            final_lower: f64::NEG_INFINITY,
            bullish: true,
            prev_close: None,
            initialized: false,
        }
    }

    /// Returns `(line, direction)` where direction is +1 bullish, -1
    /// bearish.
    fn update(&mut self, bar: &Bar) -> Option<(f64, f64)> {
        let atr = self.atr.update(bar)?;
        let mid = (bar.high + bar.low) / 2.0;
        let basic_upper = mid + self.multiplier * atr;
        let basic_lower = mid - self.multiplier * atr;
        let prev_close = self.prev_close.replace(bar.close);

        if !self.initialized {
            self.final_upper = basic_upper;
            self.final_lower = basic_lower;
            self.bullish = true;
            self.initialized = true;
        } else {
            let pc = prev_close.unwrap_or(bar.close);
            // Bands only ratchet in the trend's favor.
            self.final_upper = if basic_upper < self.final_upper || pc > self.final_upper {
                basic_upper
            } else {
                self.final_upper
            };
            self.final_lower = if basic_lower > self.final_lower || pc < self.final_lower {
                basic_lower
            } else {
                self.final_lower
            };

            if self.bullish && bar.close < self.final_lower {
                self.bullish = false;
            } else if !self.bullish && bar.close > self.final_upper {
                self.bullish = true;
            }
        }

        let line = if self.bullish {
            self.final_lower
        } else {
            self.final_upper
        };
        Some((line, if self.bullish { 1.0 } else { -1.0 }))
    }
}

/// Donchian channel over the prior `lookback` bars (excluding the current
/// bar, Turtle convention).
#[derive(Debug, Clone)]
struct DonchianState {
    lookback: usize,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
}

impl DonchianState {
    fn new(lookback: usize) -> Self {
        Self {
            lookback,
            highs: VecDeque::with_capacity(lookback + 1),
            lows: VecDeque::with_capacity(lookback + 1),
        }
    }

    fn update(&mut self, bar: &Bar) -> Option<(f64, f64)> {
        let out = if self.highs.len() == self.lookback {
            let upper = self.highs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lower = self.lows.iter().copied().fold(f64::INFINITY, f64::min);
            Some((upper, lower))
        } else {
            None
        };
        self.highs.push_back(bar.high);
        self.lows.push_back(bar.low);
        if self.highs.len() > self.lookback {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        out
    }
}

/// Wilder ADX with +DI/-DI.
#[derive(Debug, Clone)]
struct AdxState {
    tr: TrueRangeState,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    smooth_tr: WilderState,
    smooth_plus: WilderState,
    smooth_minus: WilderState,
    adx: WilderState,
}

impl AdxState {
    fn new(period: usize) -> Self {
        Self {
            tr: TrueRangeState::default(),
            prev_high: None,
            prev_low: None,
            smooth_tr: WilderState::new(period),
            smooth_plus: WilderState::new(period),
            smooth_minus: WilderState::new(period),
            adx: WilderState::new(period),
        }
    }

    /// Returns `(adx, di_plus, di_minus)`.
    fn update(&mut self, bar: &Bar) -> Option<(Option<f64>, f64, f64)> {
        let tr = self.tr.update(bar);
        let (prev_high, prev_low) = match (self.prev_high, self.prev_low) {
            (Some(h), Some(l)) => (h, l),
            _ => {
                self.prev_high = Some(bar.high);
                self.prev_low = Some(bar.low);
                return None;
            }
        };
        let up_move = bar.high - prev_high;
        let down_move = prev_low - bar.low;
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        self.prev_high = Some(bar.high);
        self.prev_low = Some(bar.low);

        let atr = self.smooth_tr.update(tr)?;
        let sp = self.smooth_plus.update(plus_dm)?;
        let sm = self.smooth_minus.update(minus_dm)?;
        if atr == 0.0 {
            return None;
        }
        let di_plus = 100.0 * sp / atr;
        let di_minus = 100.0 * sm / atr;
        let di_sum = di_plus + di_minus;
        let dx = if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (di_plus - di_minus).abs() / di_sum
        };
        let adx = self.adx.update(dx);
        Some((adx, di_plus, di_minus))
    }
}

/// MACD line, signal, histogram.
#[derive(Debug, Clone)]
struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
}

impl MacdState {
    fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: EmaState::new(fast),
            slow: EmaState::new(slow),
            signal: EmaState::new(signal),
        }
    }

    fn update(&mut self, close: f64) -> Option<(f64, Option<f64>, Option<f64>)> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let (fast, slow) = match (fast, slow) {
            (Some(f), Some(s)) => (f, s),
            _ => return None,
        };
        let macd = fast - slow;
        let signal = self.signal.update(macd);
        let hist = signal.map(|s| macd - s);
        Some((macd, signal, hist))
    }
}

/// On-balance volume.
#[derive(Debug, Clone, Default)]
struct ObvState {
    prev_close: Option<f64>,
    value: f64,
}

impl ObvState {
    fn update(&mut self, bar: &Bar) -> f64 {
        if let Some(prev) = self.prev_close {
            if bar.close > prev {
                self.value += bar.volume;
            } else if bar.close < prev {
                self.value -= bar.volume;
            }
        }
        self.prev_close = Some(bar.close);
        self.value
    }
}

/// Volume-weighted average price anchored at the start of the stream.
#[derive(Debug, Clone, Default)]
struct VwapState {
    pv_sum: f64,
    vol_sum: f64,
}

impl VwapState {
    fn update(&mut self, bar: &Bar) -> Option<f64> {
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        self.pv_sum += typical * bar.volume;
        self.vol_sum += bar.volume;
        (self.vol_sum > 0.0).then(|| self.pv_sum / self.vol_sum)
    }
}

// ---------------------------------------------------------------------------
// Bound indicator: state + resolved output slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum EvalState {
    Ema(EmaState),
    Sma(SmaState),
    Rsi(RsiState),
    Atr(AtrState),
    Bollinger(BollingerState),
    Supertrend(SupertrendState),
    Donchian(DonchianState),
    Adx(AdxState),
    Macd(MacdState),
    Keltner { ema: EmaState, atr: AtrState, multiplier: f64 },
    Obv(ObvState),
    Vwap(VwapState),
    Swing(PivotDetector),
    Fib(FibRetracement),
    Zone(ZoneDetector),
}

/// An indicator bound to its output slots in a role's feature registry.
#[derive(Debug, Clone)]
pub struct BoundIndicator {
    state: EvalState,
    outputs: Vec<FeatureId>,
}

impl BoundIndicator {
    /// Bind a spec's outputs against the role registry. The registry must
    /// already contain every output key.
    pub fn bind(spec: &IndicatorSpec, registry: &Arc<FeatureRegistry>) -> Result<Self> {
        let outputs = spec
            .kind
            .output_keys(&spec.key)
            .iter()
            .map(|k| registry.resolve(k))
            .collect::<Result<Vec<_>>>()?;

        let state = match &spec.kind {
            IndicatorKind::Ema { period } => EvalState::Ema(EmaState::new(*period)),
            IndicatorKind::Sma { period } => EvalState::Sma(SmaState::new(*period)),
            IndicatorKind::Rsi { period } => EvalState::Rsi(RsiState::new(*period)),
            IndicatorKind::Atr { period } => EvalState::Atr(AtrState::new(*period)),
            IndicatorKind::Bollinger { period, std_mult } => {
                EvalState::Bollinger(BollingerState::new(*period, *std_mult))
            }
            IndicatorKind::Supertrend {
                atr_period,
                multiplier,
            } => EvalState::Supertrend(SupertrendState::new(*atr_period, *multiplier)),
            IndicatorKind::Donchian { lookback } => {
                EvalState::Donchian(DonchianState::new(*lookback))
            }
            IndicatorKind::Adx { period } => EvalState::Adx(AdxState::new(*period)),
            IndicatorKind::Macd { fast, slow, signal } => {
                EvalState::Macd(MacdState::new(*fast, *slow, *signal))
            }
            IndicatorKind::Keltner {
                ema_period,
                atr_period,
                multiplier,
            } => EvalState::Keltner {
                ema: EmaState::new(*ema_period),
                atr: AtrState::new(*atr_period),
                multiplier: *multiplier,
            },
            IndicatorKind::Obv => EvalState::Obv(ObvState::default()),
            IndicatorKind::Vwap => EvalState::Vwap(VwapState::default()),
            IndicatorKind::SwingHigh { left, right } => {
                EvalState::Swing(PivotDetector::new(PivotKind::High, *left, *right))
            }
            IndicatorKind::SwingLow { left, right } => {
                EvalState::Swing(PivotDetector::new(PivotKind::Low, *left, *right))
            }
            IndicatorKind::FibRetracement { left, right } => {
                EvalState::Fib(FibRetracement::new(*left, *right))
            }
            IndicatorKind::ZoneDemand { left, right } => {
                EvalState::Zone(ZoneDetector::demand(*left, *right))
            }
            IndicatorKind::ZoneSupply { left, right } => {
                EvalState::Zone(ZoneDetector::supply(*left, *right))
            }
        };

        Ok(Self { state, outputs })
    }

    /// Advance one closed bar and publish into the map.
    pub fn update(&mut self, bar: &Bar, map: &mut FeatureMap) {
        match &mut self.state {
            EvalState::Ema(s) => {
                if let Some(v) = s.update(bar.close) {
                    map.set(self.outputs[0], v);
                }
            }
            EvalState::Sma(s) => {
                if let Some(v) = s.update(bar.close) {
                    map.set(self.outputs[0], v);
                }
            }
            EvalState::Rsi(s) => {
                if let Some(v) = s.update(bar.close) {
                    map.set(self.outputs[0], v);
                }
            }
            EvalState::Atr(s) => {
                if let Some(v) = s.update(bar) {
                    map.set(self.outputs[0], v);
                }
            }
            EvalState::Bollinger(s) => {
                if let Some((upper, mid, lower)) = s.update(bar.close) {
                    map.set(self.outputs[0], upper);
                    map.set(self.outputs[1], mid);
                    map.set(self.outputs[2], lower);
                }
            }
            EvalState::Supertrend(s) => {
                if let Some((line, dir)) = s.update(bar) {
                    map.set(self.outputs[0], line);
                    map.set(self.outputs[1], dir);
                }
            }
            EvalState::Donchian(s) => {
                if let Some((upper, lower)) = s.update(bar) {
                    map.set(self.outputs[0], upper);
                    map.set(self.outputs[1], lower);
                }
            }
            EvalState::Adx(s) => {
                if let Some((adx, di_plus, di_minus)) = s.update(bar) {
                    if let Some(adx) = adx {
                        map.set(self.outputs[0], adx);
                    }
                    map.set(self.outputs[1], di_plus);
                    map.set(self.outputs[2], di_minus);
                }
            }
            EvalState::Macd(s) => {
                // Publish only once the signal line has seeded so a
                // strategy never sees a line without its histogram.
                if let Some((macd, Some(signal), Some(hist))) = s.update(bar.close) {
                    map.set(self.outputs[0], macd);
                    map.set(self.outputs[1], signal);
                    map.set(self.outputs[2], hist);
                }
            }
            EvalState::Keltner {
                ema,
                atr,
                multiplier,
            } => {
                let mid = ema.update(bar.close);
                let atr_val = atr.update(bar);
                if let (Some(mid), Some(atr_val)) = (mid, atr_val) {
                    map.set(self.outputs[0], mid + *multiplier * atr_val);
                    map.set(self.outputs[1], mid);
                    map.set(self.outputs[2], mid - *multiplier * atr_val);
                }
            }
            EvalState::Obv(s) => {
                map.set(self.outputs[0], s.update(bar));
            }
            EvalState::Vwap(s) => {
                if let Some(v) = s.update(bar) {
                    map.set(self.outputs[0], v);
                }
            }
            EvalState::Swing(s) => {
                s.update(bar);
                if let Some(pivot) = s.last_confirmed() {
                    map.set(self.outputs[0], pivot.price);
                }
            }
            EvalState::Fib(s) => {
                if let Some(levels) = s.update(bar) {
                    map.set(self.outputs[0], levels.level_382);
                    map.set(self.outputs[1], levels.level_500);
                    map.set(self.outputs[2], levels.level_618);
                }
            }
            EvalState::Zone(s) => {
                if let Some(zone) = s.update(bar).copied() {
                    map.set(self.outputs[0], zone.upper);
                    map.set(self.outputs[1], zone.lower);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i as i64);
                Bar::new(open, open + Duration::minutes(15), c, c, c, c, 100.0)
            })
            .collect()
    }

    fn bars_from_ohlc(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i as i64);
                Bar::new(open, open + Duration::minutes(15), o, h, l, c, 100.0)
            })
            .collect()
    }

    fn run_single(spec: IndicatorSpec, bars: &[Bar]) -> (Arc<FeatureRegistry>, FeatureMap) {
        let registry = FeatureRegistry::from_keys(spec.kind.output_keys(&spec.key)).unwrap();
        let mut bound = BoundIndicator::bind(&spec, &registry).unwrap();
        let mut map = FeatureMap::new(registry.len());
        for bar in bars {
            bound.update(bar, &mut map);
        }
        (registry, map)
    }

    #[test]
    fn ema_seeded_with_sma() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let spec = IndicatorSpec::new(Role::Exec, "ema", IndicatorKind::Ema { period: 3 });
        let registry = FeatureRegistry::from_keys(["ema"]).unwrap();
        let mut bound = BoundIndicator::bind(&spec, &registry).unwrap();
        let mut map = FeatureMap::new(1);
        let id = registry.resolve("ema").unwrap();

        bound.update(&bars[0], &mut map);
        assert_eq!(map.get(id), None);
        bound.update(&bars[1], &mut map);
        assert_eq!(map.get(id), None);
        bound.update(&bars[2], &mut map);
        assert!((map.get(id).unwrap() - 2.0).abs() < 1e-10); // SMA seed
        bound.update(&bars[3], &mut map);
        // k = 0.5: 4*0.5 + 2*0.5 = 3.0
        assert!((map.get(id).unwrap() - 3.0).abs() < 1e-10);
    }

    #[test]
    fn sma_matches_definition() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let spec = IndicatorSpec::new(Role::Exec, "sma", IndicatorKind::Sma { period: 3 });
        let (registry, map) = run_single(spec, &bars);
        let id = registry.resolve("sma").unwrap();
        assert!((map.get(id).unwrap() - 3.0).abs() < 1e-10); // (2+3+4)/3
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let spec = IndicatorSpec::new(Role::Exec, "rsi", IndicatorKind::Rsi { period: 3 });
        let (registry, map) = run_single(spec, &bars);
        let id = registry.resolve("rsi").unwrap();
        assert!((map.get(id).unwrap() - 100.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_balanced_is_50() {
        // Alternating +1/-1 deltas: avg gain == avg loss -> RSI 50.
        let bars = bars_from_closes(&[10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0]);
        let spec = IndicatorSpec::new(Role::Exec, "rsi", IndicatorKind::Rsi { period: 4 });
        let (registry, map) = run_single(spec, &bars);
        let id = registry.resolve("rsi").unwrap();
        assert!((map.get(id).unwrap() - 50.0).abs() < 1.0);
    }

    #[test]
    fn atr_wilder_formula() {
        let bars = bars_from_ohlc(&[
            (100.0, 106.0, 98.0, 102.0),  // TR = 8
            (102.0, 108.0, 100.0, 104.0), // TR = 8
            (104.0, 110.0, 102.0, 106.0), // TR = 8
            (106.0, 120.0, 104.0, 118.0), // TR = 16
        ]);
        let spec = IndicatorSpec::new(Role::Exec, "atr", IndicatorKind::Atr { period: 3 });
        let registry = FeatureRegistry::from_keys(["atr"]).unwrap();
        let mut bound = BoundIndicator::bind(&spec, &registry).unwrap();
        let mut map = FeatureMap::new(1);
        let id = registry.resolve("atr").unwrap();

        for bar in &bars[..3] {
            bound.update(bar, &mut map);
        }
        assert!((map.get(id).unwrap() - 8.0).abs() < 1e-10);
        bound.update(&bars[3], &mut map);
        let expected = 8.0 * (2.0 / 3.0) + 16.0 * (1.0 / 3.0);
        assert!((map.get(id).unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn bollinger_bands_symmetric() {
        let bars = bars_from_closes(&[10.0, 12.0, 14.0, 12.0, 10.0]);
        let spec = IndicatorSpec::new(
            Role::Exec,
            "bb",
            IndicatorKind::Bollinger {
                period: 5,
                std_mult: 2.0,
            },
        );
        let (registry, map) = run_single(spec, &bars);
        let upper = map.get(registry.resolve("bb_upper").unwrap()).unwrap();
        let mid = map.get(registry.resolve("bb_mid").unwrap()).unwrap();
        let lower = map.get(registry.resolve("bb_lower").unwrap()).unwrap();
        assert!((mid - 11.6).abs() < 1e-10);
        assert!((upper - mid - (mid - lower)).abs() < 1e-10);
        assert!(upper > mid && mid > lower);
    }

    #[test]
    fn donchian_excludes_current_bar() {
        let bars = bars_from_ohlc(&[
            (100.0, 102.0, 98.0, 101.0),
            (101.0, 103.0, 99.0, 102.0),
            (102.0, 200.0, 50.0, 104.0), // extreme bar
        ]);
        let spec = IndicatorSpec::new(Role::Exec, "dc", IndicatorKind::Donchian { lookback: 2 });
        let (registry, map) = run_single(spec, &bars);
        // At the last bar, channel covers bars 0-1 only.
        assert_eq!(map.get(registry.resolve("dc_upper").unwrap()), Some(103.0));
        assert_eq!(map.get(registry.resolve("dc_lower").unwrap()), Some(98.0));
    }

    #[test]
    fn macd_is_fast_minus_slow() {
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let bars = bars_from_closes(&closes);
        let spec = IndicatorSpec::new(
            Role::Exec,
            "macd",
            IndicatorKind::Macd {
                fast: 3,
                slow: 6,
                signal: 3,
            },
        );
        let (registry, map) = run_single(spec, &bars);
        let macd = map.get(registry.resolve("macd").unwrap()).unwrap();
        let signal = map.get(registry.resolve("macd_signal").unwrap()).unwrap();
        let hist = map.get(registry.resolve("macd_hist").unwrap()).unwrap();
        // Steady uptrend: fast EMA above slow EMA.
        assert!(macd > 0.0);
        assert!((hist - (macd - signal)).abs() < 1e-10);
    }

    #[test]
    fn supertrend_direction_follows_trend() {
        let up: Vec<(f64, f64, f64, f64)> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                (base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let bars = bars_from_ohlc(&up);
        let spec = IndicatorSpec::new(
            Role::Exec,
            "st",
            IndicatorKind::Supertrend {
                atr_period: 5,
                multiplier: 3.0,
            },
        );
        let (registry, map) = run_single(spec, &bars);
        assert_eq!(map.get(registry.resolve("st_dir").unwrap()), Some(1.0));
        let line = map.get(registry.resolve("st").unwrap()).unwrap();
        assert!(line < bars.last().unwrap().close);
    }

    #[test]
    fn adx_di_plus_dominates_uptrend() {
        let up: Vec<(f64, f64, f64, f64)> = (0..40)
            .map(|i| {
                let base = 100.0 + 2.0 * i as f64;
                (base, base + 2.0, base - 0.5, base + 1.5)
            })
            .collect();
        let bars = bars_from_ohlc(&up);
        let spec = IndicatorSpec::new(Role::Exec, "adx", IndicatorKind::Adx { period: 5 });
        let (registry, map) = run_single(spec, &bars);
        let di_plus = map.get(registry.resolve("adx_di_plus").unwrap()).unwrap();
        let di_minus = map.get(registry.resolve("adx_di_minus").unwrap()).unwrap();
        let adx = map.get(registry.resolve("adx").unwrap()).unwrap();
        assert!(di_plus > di_minus);
        assert!(adx > 25.0, "strong trend should push ADX up, got {adx}");
    }

    #[test]
    fn obv_accumulates_with_direction() {
        let bars = bars_from_closes(&[10.0, 11.0, 10.5, 12.0]);
        let spec = IndicatorSpec::new(Role::Exec, "obv", IndicatorKind::Obv);
        let (registry, map) = run_single(spec, &bars);
        // +100 (up), -100 (down), +100 (up) = 100.
        assert_eq!(map.get(registry.resolve("obv").unwrap()), Some(100.0));
    }

    #[test]
    fn vwap_weights_by_volume() {
        let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = vec![
            Bar::new(open, open + Duration::minutes(15), 10.0, 10.0, 10.0, 10.0, 100.0),
            Bar::new(
                open + Duration::minutes(15),
                open + Duration::minutes(30),
                20.0,
                20.0,
                20.0,
                20.0,
                300.0,
            ),
        ];
        let spec = IndicatorSpec::new(Role::Exec, "vwap", IndicatorKind::Vwap);
        let (registry, map) = run_single(spec, &bars);
        // (10*100 + 20*300) / 400 = 17.5
        assert!((map.get(registry.resolve("vwap").unwrap()).unwrap() - 17.5).abs() < 1e-10);
    }

    #[test]
    fn warmup_bars_cover_first_publication() {
        let kinds = [
            IndicatorKind::Ema { period: 5 },
            IndicatorKind::Sma { period: 5 },
            IndicatorKind::Rsi { period: 5 },
            IndicatorKind::Atr { period: 5 },
            IndicatorKind::Bollinger {
                period: 5,
                std_mult: 2.0,
            },
            IndicatorKind::Donchian { lookback: 5 },
            IndicatorKind::Macd {
                fast: 3,
                slow: 5,
                signal: 3,
            },
            IndicatorKind::SwingHigh { left: 2, right: 2 },
        ];
        // Enough varied bars that each indicator can publish.
        let ohlc: Vec<(f64, f64, f64, f64)> = (0..60)
            .map(|i| {
                let base = 100.0 + ((i * 7) % 13) as f64 - 6.0 + i as f64 * 0.3;
                (base, base + 2.0, base - 2.0, base + 1.0)
            })
            .collect();
        let bars = bars_from_ohlc(&ohlc);

        for kind in kinds {
            let warmup = kind.warmup_bars();
            let spec = IndicatorSpec::new(Role::Exec, "x", kind.clone());
            let registry = FeatureRegistry::from_keys(kind.output_keys("x")).unwrap();
            let mut bound = BoundIndicator::bind(&spec, &registry).unwrap();
            let mut map = FeatureMap::new(registry.len());
            let first_id = registry.resolve(&kind.output_keys("x")[0]).unwrap();
            for (i, bar) in bars.iter().enumerate() {
                bound.update(bar, &mut map);
                if i + 1 < warmup {
                    assert_eq!(
                        map.get(first_id),
                        None,
                        "{kind:?} published before its declared warmup at bar {i}"
                    );
                }
            }
        }
    }
}
