use crate::definition::{IndicatorDefinition, PriceSource};
use crate::BatchEvaluator;
use investta_core::{IndicatorSeries, IndicatorValue, PricePoint};
use rust_decimal::Decimal;

/// A one-shot indicator bound to a definition.
///
/// Evaluation is a pure function of the supplied points; the object keeps no
/// state between calls and can be shared across threads.
pub struct BatchIndicator {
    definition: IndicatorDefinition,
    source: PriceSource,
    evaluator: Box<dyn BatchEvaluator>,
}

impl std::fmt::Debug for BatchIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchIndicator")
            .field("definition", &self.definition)
            .field("source", &self.source)
            .field("lookback", &self.evaluator.lookback())
            .finish()
    }
}

impl BatchIndicator {
    pub fn new(
        definition: IndicatorDefinition,
        source: PriceSource,
        evaluator: Box<dyn BatchEvaluator>,
    ) -> Self {
        Self {
            definition,
            source,
            evaluator,
        }
    }

    pub fn definition(&self) -> &IndicatorDefinition {
        &self.definition
    }

    pub fn lookback(&self) -> usize {
        self.evaluator.lookback()
    }

    /// Evaluate over the full slice. Inputs shorter than the lookback give an
    /// empty series.
    ///
    /// `points` must be in strictly increasing timestamp order, as a
    /// [`PriceSeries`](investta_core::PriceSeries) holds them. This is not
    /// rechecked here; [`IndicatorRegistry::evaluate`](crate::IndicatorRegistry::evaluate)
    /// and the engine's backfill do.
    pub fn evaluate(&self, points: &[PricePoint]) -> IndicatorSeries {
        self.evaluate_until(points, &|| false).unwrap_or_default()
    }

    /// Like [`evaluate`](Self::evaluate), but gives up and returns `None` once
    /// `stop` reports true. Partial results are dropped.
    pub fn evaluate_until(
        &self,
        points: &[PricePoint],
        stop: &dyn Fn() -> bool,
    ) -> Option<IndicatorSeries> {
        let values: Vec<Decimal> = points.iter().map(|p| self.source.extract(p)).collect();
        let outputs = self.evaluator.compute(&values, stop)?;

        // Right-align: the last output belongs to the last point.
        let first = points.len().saturating_sub(outputs.len());
        let aligned = points[first..]
            .iter()
            .zip(outputs)
            .map(|(p, o)| IndicatorValue::defined(p.timestamp, o))
            .collect();

        tracing::debug!(
            indicator = %self.definition,
            points = points.len(),
            first_index = first,
            "Batch evaluation complete"
        );
        Some(IndicatorSeries::new(self.definition.label(), aligned))
    }
}
