use crate::definition::{IndicatorKind, Params};
use crate::registry::IndicatorFactory;
use crate::{should_stop, BatchEvaluator, Indicator};
use investta_core::{EngineError, Output};
use rust_decimal::Decimal;
use std::collections::VecDeque;

const DEFAULT_PERIOD: usize = 20;

/// Bollinger Bands.
///
/// Emits `[middle, upper, lower]` where middle is the SMA and the bands sit
/// `num_std` population standard deviations away. Each update is O(1).
#[derive(Debug, Clone)]
pub struct BollingerBands {
    num_std: Decimal,
    window: Window,
}

/// Bollinger Bands output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerOutput {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
    pub bandwidth: Decimal,
}

impl From<Output> for BollingerOutput {
    fn from(output: Output) -> Self {
        let middle = output.primary();
        let upper = output.get(1).unwrap_or(middle);
        let lower = output.get(2).unwrap_or(middle);
        Self {
            upper,
            middle,
            lower,
            bandwidth: upper - lower,
        }
    }
}

impl BollingerBands {
    pub fn new(period: usize, num_std_dev: Decimal) -> Self {
        assert!(period > 0, "Bollinger period must be > 0");
        Self {
            num_std: num_std_dev,
            window: Window::new(period),
        }
    }

    /// Standard Bollinger Bands (20, 2).
    pub fn default_periods() -> Self {
        Self::new(DEFAULT_PERIOD, Decimal::TWO)
    }

    pub fn output(&self) -> Option<BollingerOutput> {
        if self.window.is_full() {
            Some(self.window.bands(self.num_std).into())
        } else {
            None
        }
    }
}

impl Indicator for BollingerBands {
    fn next(&mut self, value: Decimal) -> Option<Output> {
        self.window.push(value);
        if self.window.is_full() {
            Some(self.window.bands(self.num_std))
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.window = Window::new(self.window.len);
    }

    fn period(&self) -> usize {
        self.window.len
    }

    fn is_ready(&self) -> bool {
        self.window.is_full()
    }
}

/// Sliding window holding its sum and the sum of squared deviations from the
/// mean (`m2`).
///
/// Only deviations are ever multiplied, so prices near the top of the
/// `Decimal` range do not overflow the way raw squares would.
#[derive(Debug, Clone)]
struct Window {
    len: usize,
    buffer: VecDeque<Decimal>,
    sum: Decimal,
    m2: Decimal,
}

impl Window {
    fn new(len: usize) -> Self {
        Self {
            len,
            buffer: VecDeque::with_capacity(len),
            sum: Decimal::ZERO,
            m2: Decimal::ZERO,
        }
    }

    fn is_full(&self) -> bool {
        self.buffer.len() == self.len
    }

    fn mean(&self) -> Decimal {
        if self.buffer.is_empty() {
            Decimal::ZERO
        } else {
            self.sum / Decimal::from(self.buffer.len())
        }
    }

    fn push(&mut self, value: Decimal) {
        let old_mean = self.mean();
        let removed = if self.is_full() {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(value);

        match removed {
            // Fixed-size replacement: m2 += (x - y)(x - mean' + y - mean)
            Some(removed) => {
                self.sum += value - removed;
                let mean = self.mean();
                self.m2 += (value - removed) * (value - mean + removed - old_mean);
            }
            // Welford growth step
            None => {
                self.sum += value;
                let mean = self.mean();
                self.m2 += (value - old_mean) * (value - mean);
            }
        }
        // Rounding can push a flat window just below zero.
        self.m2 = self.m2.max(Decimal::ZERO);
    }

    fn bands(&self, num_std: Decimal) -> Output {
        let mean = self.mean();
        let variance = self.m2 / Decimal::from(self.len);
        let width = num_std * decimal_sqrt(variance);
        Output::triple(mean, mean + width, mean - width)
    }
}

/// Newton's method square root for Decimal.
pub fn decimal_sqrt(value: Decimal) -> Decimal {
    if value.is_zero() || value < Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut guess = if value > Decimal::ONE {
        value / Decimal::TWO
    } else {
        Decimal::ONE
    };
    let epsilon = Decimal::new(1, 20);
    for _ in 0..100 {
        let next_guess = (guess + value / guess) / Decimal::TWO;
        let diff = (next_guess - guess).abs();
        guess = next_guess;
        if diff < epsilon {
            break;
        }
    }
    guess
}

/// Batch Bollinger Bands.
///
/// Slides the same window the streaming form uses, so both produce identical
/// values.
#[derive(Debug, Clone, Copy)]
pub struct BollingerBatch {
    period: usize,
    num_std: Decimal,
}

impl BollingerBatch {
    pub fn new(period: usize, num_std: Decimal) -> Self {
        assert!(period > 0, "Bollinger period must be > 0");
        Self { period, num_std }
    }
}

impl BatchEvaluator for BollingerBatch {
    fn compute(&self, values: &[Decimal], stop: &dyn Fn() -> bool) -> Option<Vec<Output>> {
        if values.len() < self.period {
            return Some(Vec::new());
        }
        let mut window = Window::new(self.period);
        let mut out = Vec::with_capacity(values.len() - self.period + 1);
        for (i, v) in values.iter().enumerate() {
            if should_stop(i, stop) {
                return None;
            }
            window.push(*v);
            if window.is_full() {
                out.push(window.bands(self.num_std));
            }
        }
        Some(out)
    }

    fn lookback(&self) -> usize {
        self.period
    }
}

pub struct BollingerFactory;

impl BollingerFactory {
    fn config(params: &Params) -> Result<(usize, Decimal), EngineError> {
        params.ensure_known(&["period", "std_dev", "source"])?;
        let period = params.period("period", Some(DEFAULT_PERIOD))?;
        let num_std = params.multiplier("std_dev", Decimal::TWO)?;
        Ok((period, num_std))
    }
}

impl IndicatorFactory for BollingerFactory {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Bollinger
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["middle", "upper", "lower"]
    }

    fn description(&self) -> &'static str {
        "Bollinger bands, population deviation (period=20, std_dev=2, source)"
    }

    fn batch(&self, params: &Params) -> Result<Box<dyn BatchEvaluator>, EngineError> {
        let (period, num_std) = Self::config(params)?;
        Ok(Box::new(BollingerBatch::new(period, num_std)))
    }

    fn incremental(&self, params: &Params) -> Result<Box<dyn Indicator>, EngineError> {
        let (period, num_std) = Self::config(params)?;
        Ok(Box::new(BollingerBands::new(period, num_std)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{decimals, run_batch, run_stream};
    use rust_decimal_macros::dec;

    #[test]
    fn test_bollinger_basic() {
        let mut bb = BollingerBands::new(3, Decimal::TWO);
        assert!(bb.next(dec!(10)).is_none());
        assert!(bb.next(dec!(11)).is_none());
        bb.next(dec!(12));
        let out = bb.output().unwrap();
        assert_eq!(out.middle, dec!(11));
        assert!(out.upper > out.middle);
        assert!(out.lower < out.middle);
        assert_eq!(out.bandwidth, out.upper - out.lower);
    }

    #[test]
    fn test_bollinger_known_deviation() {
        // 2, 4, 4, 4, 5, 5, 7, 9 → mean 5, population σ 2
        let values = decimals(&[2, 4, 4, 4, 5, 5, 7, 9]);
        let out = run_batch(&BollingerBatch::new(8, Decimal::TWO), &values);
        assert_eq!(out.len(), 1);
        let bands = BollingerOutput::from(out[0]);
        assert_eq!(bands.middle, dec!(5));
        assert!((bands.upper - dec!(9)).abs() < dec!(0.000000001));
        assert!((bands.lower - dec!(1)).abs() < dec!(0.000000001));
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let values = vec![dec!(33.3); 10];
        let out = run_batch(&BollingerBatch::new(4, dec!(2.5)), &values);
        for o in out {
            assert_eq!(o.as_slice(), &[dec!(33.3), dec!(33.3), dec!(33.3)]);
        }
    }

    #[test]
    fn test_bollinger_stream_matches_batch() {
        let values = vec![
            dec!(20.1), dec!(20.5), dec!(19.8), dec!(21.2), dec!(22.0),
            dec!(21.7), dec!(20.9), dec!(23.4), dec!(22.8), dec!(24.1),
        ];
        let mut bb = BollingerBands::new(5, dec!(1.5));
        assert_eq!(run_stream(&mut bb, &values), run_batch(&BollingerBatch::new(5, dec!(1.5)), &values));
    }

    #[test]
    fn test_bollinger_near_decimal_limits() {
        // squaring these would overflow Decimal
        let values = vec![dec!(300000000000000); 5];
        let mut bb = BollingerBands::new(3, Decimal::TWO);
        let streamed = run_stream(&mut bb, &values);
        assert_eq!(streamed.len(), 3);
        for o in &streamed {
            assert_eq!(o.as_slice(), &[dec!(300000000000000); 3]);
        }

        let moving = vec![
            dec!(300000000000000), dec!(300000000000002), dec!(300000000000004),
            dec!(300000000000006), dec!(300000000000008),
        ];
        let out = run_batch(&BollingerBatch::new(3, Decimal::ONE), &moving);
        assert_eq!(out.len(), 3);
        // window 0, 2, 4 around the base: mean +2, σ = sqrt(8/3)
        let bands = BollingerOutput::from(out[0]);
        assert_eq!(bands.middle, dec!(300000000000002));
        assert!((bands.upper - bands.middle - dec!(1.632993161855)).abs() < dec!(0.000000001));
        let mut bb = BollingerBands::new(3, Decimal::ONE);
        assert_eq!(run_stream(&mut bb, &moving), out);
    }

    #[test]
    fn test_bollinger_stream_matches_batch_exactly_over_long_runs() {
        // eight-decimal prices around 1.2 million, mixed up and down moves
        let mut price = dec!(1234567.89000000);
        let values: Vec<Decimal> = (0..3000i64)
            .map(|i| {
                price += Decimal::new((i * 7919 % 2001) - 1000, 8) * dec!(37);
                price
            })
            .collect();
        let batch = run_batch(&BollingerBatch::new(20, Decimal::TWO), &values);
        let mut bb = BollingerBands::new(20, Decimal::TWO);
        assert_eq!(run_stream(&mut bb, &values), batch);
    }

    #[test]
    fn test_bollinger_reset() {
        let mut bb = BollingerBands::new(2, Decimal::TWO);
        bb.next(dec!(1));
        bb.next(dec!(5));
        bb.reset();
        assert!(!bb.is_ready());
        assert!(bb.next(dec!(4)).is_none());
        let out = bb.next(dec!(4)).unwrap();
        assert_eq!(out.as_slice(), &[dec!(4), dec!(4), dec!(4)]);
    }

    #[test]
    fn test_decimal_sqrt() {
        let result = decimal_sqrt(dec!(4));
        assert!((result - dec!(2)).abs() < dec!(0.0001));

        let result = decimal_sqrt(dec!(9));
        assert!((result - dec!(3)).abs() < dec!(0.0001));

        let result = decimal_sqrt(dec!(0.0004));
        assert!((result - dec!(0.02)).abs() < dec!(0.0000001));
    }

    #[test]
    fn test_factory_rejects_non_positive_multiplier() {
        let params = Params::new().with("std_dev", -1.0);
        assert!(BollingerFactory.batch(&params).is_err());
        assert!(BollingerFactory.incremental(&Params::new()).is_ok());
    }
}
