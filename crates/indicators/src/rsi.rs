use crate::definition::{IndicatorKind, Params};
use crate::registry::IndicatorFactory;
use crate::{should_stop, BatchEvaluator, Indicator};
use investta_core::{EngineError, Output};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DEFAULT_PERIOD: usize = 14;

/// RSI from smoothed averages.
///
/// Zero average loss yields 100 when there was any gain and 50 when prices
/// were flat, so the result is always within `[0, 100]`.
pub(crate) fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        if avg_gain.is_zero() {
            dec!(50)
        } else {
            dec!(100)
        }
    } else {
        let rs = avg_gain / avg_loss;
        dec!(100) - (dec!(100) / (Decimal::ONE + rs))
    }
}

fn split_change(change: Decimal) -> (Decimal, Decimal) {
    if change > Decimal::ZERO {
        (change, Decimal::ZERO)
    } else {
        (Decimal::ZERO, change.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Fewer than `period` changes seen; raw sums only.
    Seeding {
        gain_sum: Decimal,
        loss_sum: Decimal,
        changes: usize,
    },
    /// Wilder recurrence on the smoothed averages.
    Smoothing { avg_gain: Decimal, avg_loss: Decimal },
}

impl Phase {
    fn initial() -> Self {
        Phase::Seeding {
            gain_sum: Decimal::ZERO,
            loss_sum: Decimal::ZERO,
            changes: 0,
        }
    }
}

/// Relative Strength Index (RSI).
/// Uses Wilder's smoothing for average gain/loss, seeded with the plain mean
/// of the first `period` changes.
#[derive(Debug, Clone)]
pub struct Rsi {
    len: usize,
    prev_value: Option<Decimal>,
    phase: Phase,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "RSI period must be > 0");
        Self {
            len: period,
            prev_value: None,
            phase: Phase::initial(),
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        match self.phase {
            Phase::Smoothing { avg_gain, avg_loss } => Some(rsi_from_averages(avg_gain, avg_loss)),
            Phase::Seeding { .. } => None,
        }
    }
}

impl Indicator for Rsi {
    fn next(&mut self, value: Decimal) -> Option<Output> {
        if let Some(prev) = self.prev_value {
            let (gain, loss) = split_change(value - prev);
            let period_dec = Decimal::from(self.len);

            self.phase = match self.phase {
                Phase::Seeding {
                    gain_sum,
                    loss_sum,
                    changes,
                } => {
                    let (gain_sum, loss_sum, changes) = (gain_sum + gain, loss_sum + loss, changes + 1);
                    if changes == self.len {
                        Phase::Smoothing {
                            avg_gain: gain_sum / period_dec,
                            avg_loss: loss_sum / period_dec,
                        }
                    } else {
                        Phase::Seeding {
                            gain_sum,
                            loss_sum,
                            changes,
                        }
                    }
                }
                Phase::Smoothing { avg_gain, avg_loss } => {
                    let carry = period_dec - Decimal::ONE;
                    Phase::Smoothing {
                        avg_gain: (avg_gain * carry + gain) / period_dec,
                        avg_loss: (avg_loss * carry + loss) / period_dec,
                    }
                }
            };
        }

        self.prev_value = Some(value);
        self.value().map(Output::single)
    }

    fn reset(&mut self) {
        self.prev_value = None;
        self.phase = Phase::initial();
    }

    fn period(&self) -> usize {
        self.len + 1 // need one extra data point for the first change
    }

    fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Smoothing { .. })
    }
}

/// Batch RSI over the difference series.
#[derive(Debug, Clone, Copy)]
pub struct RsiBatch {
    period: usize,
}

impl RsiBatch {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "RSI period must be > 0");
        Self { period }
    }
}

impl BatchEvaluator for RsiBatch {
    fn compute(&self, values: &[Decimal], stop: &dyn Fn() -> bool) -> Option<Vec<Output>> {
        if values.len() <= self.period {
            return Some(Vec::new());
        }
        let changes: Vec<(Decimal, Decimal)> = values
            .windows(2)
            .map(|pair| split_change(pair[1] - pair[0]))
            .collect();
        let (seed, rest) = changes.split_at(self.period);
        let period_dec = Decimal::from(self.period);
        let carry = period_dec - Decimal::ONE;

        let mut gain_sum = Decimal::ZERO;
        let mut loss_sum = Decimal::ZERO;
        for (gain, loss) in seed {
            gain_sum += *gain;
            loss_sum += *loss;
        }
        let mut avg_gain = gain_sum / period_dec;
        let mut avg_loss = loss_sum / period_dec;

        let mut out = Vec::with_capacity(rest.len() + 1);
        out.push(Output::single(rsi_from_averages(avg_gain, avg_loss)));
        for (i, (gain, loss)) in rest.iter().enumerate() {
            if should_stop(i, stop) {
                return None;
            }
            avg_gain = (avg_gain * carry + *gain) / period_dec;
            avg_loss = (avg_loss * carry + *loss) / period_dec;
            out.push(Output::single(rsi_from_averages(avg_gain, avg_loss)));
        }
        Some(out)
    }

    fn lookback(&self) -> usize {
        self.period + 1
    }
}

pub struct RsiFactory;

impl RsiFactory {
    fn period(params: &Params) -> Result<usize, EngineError> {
        params.ensure_known(&["period", "source"])?;
        params.period("period", Some(DEFAULT_PERIOD))
    }
}

impl IndicatorFactory for RsiFactory {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["rsi"]
    }

    fn description(&self) -> &'static str {
        "Relative strength index, Wilder smoothing (period=14, source)"
    }

    fn batch(&self, params: &Params) -> Result<Box<dyn BatchEvaluator>, EngineError> {
        Ok(Box::new(RsiBatch::new(Self::period(params)?)))
    }

    fn incremental(&self, params: &Params) -> Result<Box<dyn Indicator>, EngineError> {
        Ok(Box::new(Rsi::new(Self::period(params)?)))
    }
}
