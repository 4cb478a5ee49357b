use crate::definition::{IndicatorKind, Params};
use crate::ema::{ema_line, Ema};
use crate::registry::IndicatorFactory;
use crate::{BatchEvaluator, Indicator};
use investta_core::{EngineError, Output};
use rust_decimal::Decimal;

/// MACD (Moving Average Convergence Divergence).
///
/// Composed of three EMAs:
/// - Fast EMA (default 12)
/// - Slow EMA (default 26)
/// - Signal EMA (default 9)
///
/// Emits `[macd, signal, histogram]` once the signal line is seeded.
#[derive(Debug, Clone)]
pub struct Macd {
    fast_ema: Ema,
    slow_ema: Ema,
    signal_ema: Ema,
    signal_len: usize,
    output: Option<MacdOutput>,
}

/// MACD output with all three components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

impl From<MacdOutput> for Output {
    fn from(o: MacdOutput) -> Self {
        Output::triple(o.macd, o.signal, o.histogram)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacdConfig {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl MacdConfig {
    /// Standard MACD (12, 26, 9).
    pub const DEFAULT: MacdConfig = MacdConfig {
        fast: 12,
        slow: 26,
        signal: 9,
    };

    pub fn from_params(params: &Params) -> Result<Self, EngineError> {
        params.ensure_known(&["fast", "slow", "signal", "source"])?;
        let config = Self {
            fast: params.period("fast", Some(Self::DEFAULT.fast))?,
            slow: params.period("slow", Some(Self::DEFAULT.slow))?,
            signal: params.period("signal", Some(Self::DEFAULT.signal))?,
        };
        if config.fast >= config.slow {
            return Err(EngineError::invalid_parameter(
                "fast",
                format!(
                    "must be less than slow ({} >= {})",
                    config.fast, config.slow
                ),
            ));
        }
        Ok(config)
    }

    pub fn lookback(&self) -> usize {
        self.slow + self.signal - 1
    }
}

impl Macd {
    pub fn new(config: MacdConfig) -> Self {
        assert!(config.fast < config.slow, "Fast period must be less than slow period");
        Self {
            fast_ema: Ema::new(config.fast),
            slow_ema: Ema::new(config.slow),
            signal_ema: Ema::new(config.signal),
            signal_len: config.signal,
            output: None,
        }
    }

    /// Standard MACD (12, 26, 9).
    pub fn default_periods() -> Self {
        Self::new(MacdConfig::DEFAULT)
    }

    /// Returns the full MACD output (macd, signal, histogram) if ready.
    pub fn output(&self) -> Option<MacdOutput> {
        self.output
    }

    /// Process next value and return full output if ready.
    pub fn next_output(&mut self, value: Decimal) -> Option<MacdOutput> {
        let fast = self.fast_ema.next_value(value);
        let slow = self.slow_ema.next_value(value);

        if let (Some(f), Some(s)) = (fast, slow) {
            let macd = f - s;
            if let Some(signal) = self.signal_ema.next_value(macd) {
                self.output = Some(MacdOutput {
                    macd,
                    signal,
                    histogram: macd - signal,
                });
            }
        }

        self.output
    }
}

impl Indicator for Macd {
    fn next(&mut self, value: Decimal) -> Option<Output> {
        self.next_output(value).map(Output::from)
    }

    fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.signal_ema.reset();
        self.output = None;
    }

    fn period(&self) -> usize {
        self.slow_ema.period() + self.signal_len - 1
    }

    fn is_ready(&self) -> bool {
        self.output.is_some()
    }
}

/// Batch MACD: full EMA lines first, then the signal EMA over the MACD line.
#[derive(Debug, Clone, Copy)]
pub struct MacdBatch {
    config: MacdConfig,
}

impl MacdBatch {
    pub fn new(config: MacdConfig) -> Self {
        assert!(config.fast < config.slow, "Fast period must be less than slow period");
        Self { config }
    }
}

impl BatchEvaluator for MacdBatch {
    fn compute(&self, values: &[Decimal], stop: &dyn Fn() -> bool) -> Option<Vec<Output>> {
        let fast = ema_line(values, self.config.fast, stop)?;
        let slow = ema_line(values, self.config.slow, stop)?;

        // fast starts `slow - fast` inputs earlier than slow
        let offset = self.config.slow - self.config.fast;
        let macd: Vec<Decimal> = slow
            .iter()
            .enumerate()
            .map(|(i, s)| fast[i + offset] - *s)
            .collect();
        let signal = ema_line(&macd, self.config.signal, stop)?;

        let skip = self.config.signal - 1;
        Some(
            signal
                .iter()
                .zip(&macd[skip.min(macd.len())..])
                .map(|(sig, m)| Output::triple(*m, *sig, *m - *sig))
                .collect(),
        )
    }

    fn lookback(&self) -> usize {
        self.config.lookback()
    }
}

pub struct MacdFactory;

impl IndicatorFactory for MacdFactory {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["macd", "signal", "histogram"]
    }

    fn description(&self) -> &'static str {
        "Moving average convergence divergence (fast=12, slow=26, signal=9, source)"
    }

    fn batch(&self, params: &Params) -> Result<Box<dyn BatchEvaluator>, EngineError> {
        Ok(Box::new(MacdBatch::new(MacdConfig::from_params(params)?)))
    }

    fn incremental(&self, params: &Params) -> Result<Box<dyn Indicator>, EngineError> {
        Ok(Box::new(Macd::new(MacdConfig::from_params(params)?)))
    }
}
