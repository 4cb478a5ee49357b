use crate::batch::BatchIndicator;
use crate::bollinger::BollingerFactory;
use crate::definition::{IndicatorDefinition, IndicatorKind, Params};
use crate::ema::EmaFactory;
use crate::incremental::IncrementalIndicator;
use crate::macd::MacdFactory;
use crate::rsi::RsiFactory;
use crate::sma::SmaFactory;
use crate::{BatchEvaluator, Indicator};
use investta_core::{ensure_ordered, EngineError, IndicatorSeries, PricePoint};
use std::collections::HashMap;
use tracing::debug;

/// Builds both computation modes of one indicator kind.
///
/// `batch` and `incremental` must agree: feeding points one at a time through
/// the incremental state yields the same values as batch evaluation.
pub trait IndicatorFactory: Send + Sync {
    fn kind(&self) -> IndicatorKind;

    /// Output line names, primary first.
    fn outputs(&self) -> &'static [&'static str];

    fn description(&self) -> &'static str;

    fn batch(&self, params: &Params) -> Result<Box<dyn BatchEvaluator>, EngineError>;

    fn incremental(&self, params: &Params) -> Result<Box<dyn Indicator>, EngineError>;

    fn validate(&self, params: &Params) -> Result<(), EngineError> {
        self.batch(params).map(|_| ())
    }
}

/// Maps indicator kinds to their factories.
///
/// `IndicatorRegistry::default()` has every built-in kind registered.
pub struct IndicatorRegistry {
    factories: HashMap<IndicatorKind, Box<dyn IndicatorFactory>>,
}

impl Default for IndicatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(SmaFactory);
        registry.register(EmaFactory);
        registry.register(RsiFactory);
        registry.register(BollingerFactory);
        registry.register(MacdFactory);
        registry
    }
}

impl std::fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl IndicatorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory, replacing any previous one for the same kind.
    pub fn register<F>(&mut self, factory: F) -> Option<Box<dyn IndicatorFactory>>
    where
        F: IndicatorFactory + 'static,
    {
        self.factories.insert(factory.kind(), Box::new(factory))
    }

    /// Registered kinds, sorted by name.
    pub fn kinds(&self) -> Vec<&IndicatorKind> {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort_by(|a, b| a.name().cmp(b.name()));
        kinds
    }

    pub fn factory(&self, kind: &IndicatorKind) -> Result<&dyn IndicatorFactory, EngineError> {
        self.factories
            .get(kind)
            .map(|f| f.as_ref())
            .ok_or_else(|| EngineError::UnknownIndicator(kind.to_string()))
    }

    pub fn outputs(&self, kind: &IndicatorKind) -> Result<&'static [&'static str], EngineError> {
        Ok(self.factory(kind)?.outputs())
    }

    /// Check a definition without building anything.
    pub fn validate(&self, definition: &IndicatorDefinition) -> Result<(), EngineError> {
        let factory = self.factory(&definition.kind)?;
        definition.params.source()?;
        factory.validate(&definition.params)
    }

    pub fn batch(&self, definition: &IndicatorDefinition) -> Result<BatchIndicator, EngineError> {
        let factory = self.factory(&definition.kind)?;
        let source = definition.params.source()?;
        let evaluator = factory.batch(&definition.params)?;
        debug!(indicator = %definition, lookback = evaluator.lookback(), "Created batch indicator");
        Ok(BatchIndicator::new(definition.clone(), source, evaluator))
    }

    pub fn incremental(
        &self,
        definition: &IndicatorDefinition,
    ) -> Result<IncrementalIndicator, EngineError> {
        let factory = self.factory(&definition.kind)?;
        let source = definition.params.source()?;
        let state = factory.incremental(&definition.params)?;
        debug!(indicator = %definition, lookback = state.period(), "Created incremental indicator");
        Ok(IncrementalIndicator::new(definition.clone(), source, state))
    }

    /// One-shot convenience: build a batch indicator and evaluate it.
    ///
    /// Fails with [`EngineError::OutOfOrder`] unless timestamps strictly
    /// increase.
    pub fn evaluate(
        &self,
        points: &[PricePoint],
        definition: &IndicatorDefinition,
    ) -> Result<IndicatorSeries, EngineError> {
        let indicator = self.batch(definition)?;
        ensure_ordered(points)?;
        Ok(indicator.evaluate(points))
    }
}
