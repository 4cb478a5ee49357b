pub mod batch;
pub mod bollinger;
pub mod definition;
pub mod ema;
pub mod incremental;
pub mod macd;
pub mod registry;
pub mod rsi;
pub mod sma;

pub use batch::BatchIndicator;
pub use definition::{IndicatorDefinition, IndicatorKind, ParamValue, Params, PriceSource};
pub use incremental::IncrementalIndicator;
pub use registry::{IndicatorFactory, IndicatorRegistry};

use investta_core::Output;
use rust_decimal::Decimal;

/// Trait for streaming (incremental) indicators.
/// Feed one value at a time; the indicator maintains internal state.
pub trait Indicator: Send + Sync {
    /// Process the next value and return the indicator output (if ready).
    fn next(&mut self, value: Decimal) -> Option<Output>;

    /// Reset the indicator to its initial state.
    fn reset(&mut self);

    /// The minimum number of data points needed before the indicator produces output.
    fn period(&self) -> usize;

    /// Whether the indicator has enough data to produce output.
    fn is_ready(&self) -> bool;
}

/// Full-history evaluation of one indicator kind.
///
/// Implementations are stateless: the same input always yields the same
/// output, and nothing is retained between calls.
pub trait BatchEvaluator: Send + Sync {
    /// Outputs for input indices `lookback() - 1 ..`, oldest first.
    ///
    /// Returns an empty vector when the input is shorter than the lookback,
    /// and `None` if `stop` fired before the computation finished.
    fn compute(&self, values: &[Decimal], stop: &dyn Fn() -> bool) -> Option<Vec<Output>>;

    /// Number of trailing points needed for the first output.
    fn lookback(&self) -> usize;
}

const STOP_CHECK_INTERVAL: usize = 1024;

/// Polls `stop` every [`STOP_CHECK_INTERVAL`] iterations.
pub(crate) fn should_stop(iteration: usize, stop: &dyn Fn() -> bool) -> bool {
    iteration % STOP_CHECK_INTERVAL == 0 && stop()
}
