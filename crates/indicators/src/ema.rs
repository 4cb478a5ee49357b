use crate::definition::{IndicatorKind, Params};
use crate::registry::IndicatorFactory;
use crate::{should_stop, BatchEvaluator, Indicator};
use investta_core::{EngineError, Output};
use rust_decimal::Decimal;

fn multiplier(period: usize) -> Decimal {
    Decimal::TWO / (Decimal::from(period) + Decimal::ONE)
}

/// Exponential Moving Average (EMA).
///
/// Seeded with the SMA of the first `period` values, then
/// `ema = (value - prev) * 2 / (period + 1) + prev`.
#[derive(Debug, Clone)]
pub struct Ema {
    len: usize,
    multiplier: Decimal,
    current: Option<Decimal>,
    count: usize,
    /// Accumulates values for the initial SMA seed.
    seed_sum: Decimal,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "EMA period must be > 0");
        Self {
            len: period,
            multiplier: multiplier(period),
            current: None,
            count: 0,
            seed_sum: Decimal::ZERO,
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        self.current
    }

    /// Same as [`Indicator::next`] but yields the bare line value.
    pub fn next_value(&mut self, value: Decimal) -> Option<Decimal> {
        match self.current {
            None => {
                // Accumulate for SMA seed
                self.count += 1;
                self.seed_sum += value;
                if self.count >= self.len {
                    self.current = Some(self.seed_sum / Decimal::from(self.len));
                }
            }
            Some(prev) => {
                self.current = Some((value - prev) * self.multiplier + prev);
            }
        }

        self.current
    }
}

impl Indicator for Ema {
    fn next(&mut self, value: Decimal) -> Option<Output> {
        self.next_value(value).map(Output::single)
    }

    fn reset(&mut self) {
        self.current = None;
        self.count = 0;
        self.seed_sum = Decimal::ZERO;
    }

    fn period(&self) -> usize {
        self.len
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }
}

/// EMA line over a whole slice, one value per input index from `period - 1`.
///
/// Returns `None` if `stop` fired.
pub(crate) fn ema_line(
    values: &[Decimal],
    period: usize,
    stop: &dyn Fn() -> bool,
) -> Option<Vec<Decimal>> {
    if values.len() < period {
        return Some(Vec::new());
    }
    let k = multiplier(period);
    let (seed, rest) = values.split_at(period);

    let mut seed_sum = Decimal::ZERO;
    for v in seed {
        seed_sum += *v;
    }
    let mut prev = seed_sum / Decimal::from(period);

    let mut line = Vec::with_capacity(rest.len() + 1);
    line.push(prev);
    for (i, v) in rest.iter().enumerate() {
        if should_stop(i, stop) {
            return None;
        }
        prev = (*v - prev) * k + prev;
        line.push(prev);
    }
    Some(line)
}

#[derive(Debug, Clone, Copy)]
pub struct EmaBatch {
    period: usize,
}

impl EmaBatch {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "EMA period must be > 0");
        Self { period }
    }
}

impl BatchEvaluator for EmaBatch {
    fn compute(&self, values: &[Decimal], stop: &dyn Fn() -> bool) -> Option<Vec<Output>> {
        ema_line(values, self.period, stop).map(|line| line.into_iter().map(Output::single).collect())
    }

    fn lookback(&self) -> usize {
        self.period
    }
}

pub struct EmaFactory;

impl EmaFactory {
    fn period(params: &Params) -> Result<usize, EngineError> {
        params.ensure_known(&["period", "source"])?;
        params.period("period", None)
    }
}

impl IndicatorFactory for EmaFactory {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Ema
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["ema"]
    }

    fn description(&self) -> &'static str {
        "Exponential moving average, SMA seeded (period, source)"
    }

    fn batch(&self, params: &Params) -> Result<Box<dyn BatchEvaluator>, EngineError> {
        Ok(Box::new(EmaBatch::new(Self::period(params)?)))
    }

    fn incremental(&self, params: &Params) -> Result<Box<dyn Indicator>, EngineError> {
        Ok(Box::new(Ema::new(Self::period(params)?)))
    }
}
