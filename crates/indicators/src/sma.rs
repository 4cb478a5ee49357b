use crate::definition::{IndicatorKind, Params};
use crate::registry::IndicatorFactory;
use crate::{should_stop, BatchEvaluator, Indicator};
use investta_core::{EngineError, Output};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Simple Moving Average (SMA).
#[derive(Debug, Clone)]
pub struct Sma {
    len: usize,
    buffer: VecDeque<Decimal>,
    sum: Decimal,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "SMA period must be > 0");
        Self {
            len: period,
            buffer: VecDeque::with_capacity(period + 1),
            sum: Decimal::ZERO,
        }
    }

    /// Get the current SMA value without feeding new data.
    pub fn value(&self) -> Option<Decimal> {
        if self.buffer.len() == self.len {
            Some(self.sum / Decimal::from(self.len))
        } else {
            None
        }
    }
}

impl Indicator for Sma {
    fn next(&mut self, value: Decimal) -> Option<Output> {
        self.sum += value;
        self.buffer.push_back(value);

        if self.buffer.len() > self.len {
            if let Some(removed) = self.buffer.pop_front() {
                self.sum -= removed;
            }
        }

        self.value().map(Output::single)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sum = Decimal::ZERO;
    }

    fn period(&self) -> usize {
        self.len
    }

    fn is_ready(&self) -> bool {
        self.buffer.len() == self.len
    }
}

/// Batch SMA. Every window is summed from scratch.
#[derive(Debug, Clone, Copy)]
pub struct SmaBatch {
    period: usize,
}

impl SmaBatch {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "SMA period must be > 0");
        Self { period }
    }
}

impl BatchEvaluator for SmaBatch {
    fn compute(&self, values: &[Decimal], stop: &dyn Fn() -> bool) -> Option<Vec<Output>> {
        if values.len() < self.period {
            return Some(Vec::new());
        }
        let divisor = Decimal::from(self.period);
        let mut out = Vec::with_capacity(values.len() - self.period + 1);
        for (i, window) in values.windows(self.period).enumerate() {
            if should_stop(i, stop) {
                return None;
            }
            let sum: Decimal = window.iter().sum();
            out.push(Output::single(sum / divisor));
        }
        Some(out)
    }

    fn lookback(&self) -> usize {
        self.period
    }
}

pub struct SmaFactory;

impl SmaFactory {
    fn period(params: &Params) -> Result<usize, EngineError> {
        params.ensure_known(&["period", "source"])?;
        params.period("period", None)
    }
}

impl IndicatorFactory for SmaFactory {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["sma"]
    }

    fn description(&self) -> &'static str {
        "Simple moving average (period, source)"
    }

    fn batch(&self, params: &Params) -> Result<Box<dyn BatchEvaluator>, EngineError> {
        Ok(Box::new(SmaBatch::new(Self::period(params)?)))
    }

    fn incremental(&self, params: &Params) -> Result<Box<dyn Indicator>, EngineError> {
        Ok(Box::new(Sma::new(Self::period(params)?)))
    }
}
