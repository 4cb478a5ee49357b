use investta_core::{ensure_ordered, EngineError, IndicatorSeries, PricePoint};
use investta_indicators::{BatchIndicator, IndicatorDefinition, IndicatorRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Errors from an offloaded backfill.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("Backfill cancelled")]
    Cancelled,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Backfill task failed: {0}")]
    Join(String),
}

/// Shared cancellation signal for a running backfill.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Batch evaluation of several indicators on tokio's blocking pool.
///
/// Results arrive as one completed vector, in definition order. Cancelling
/// drops whatever was computed so far; evaluators share no mutable state, so
/// nothing else is affected.
#[derive(Debug)]
pub struct Backfill {
    handle: JoinHandle<Result<Vec<IndicatorSeries>, BackfillError>>,
    cancel: CancelFlag,
}

impl Backfill {
    /// Validate every definition and the point order, then start evaluating.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        registry: &IndicatorRegistry,
        points: impl Into<Arc<[PricePoint]>>,
        definitions: &[IndicatorDefinition],
    ) -> Result<Self, EngineError> {
        Self::spawn_with(registry, points, definitions, CancelFlag::new())
    }

    /// Same as [`spawn`](Self::spawn) with a caller-owned cancellation flag.
    pub fn spawn_with(
        registry: &IndicatorRegistry,
        points: impl Into<Arc<[PricePoint]>>,
        definitions: &[IndicatorDefinition],
        cancel: CancelFlag,
    ) -> Result<Self, EngineError> {
        let indicators = definitions
            .iter()
            .map(|d| registry.batch(d))
            .collect::<Result<Vec<_>, _>>()?;
        let points = points.into();
        ensure_ordered(&points)?;
        debug!(
            indicators = indicators.len(),
            points = points.len(),
            "Spawning backfill"
        );

        let flag = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || run(&indicators, &points, &flag));
        Ok(Self { handle, cancel })
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the backfill to finish.
    pub async fn join(self) -> Result<Vec<IndicatorSeries>, BackfillError> {
        self.handle
            .await
            .map_err(|e| BackfillError::Join(e.to_string()))?
    }
}

fn run(
    indicators: &[BatchIndicator],
    points: &[PricePoint],
    cancel: &CancelFlag,
) -> Result<Vec<IndicatorSeries>, BackfillError> {
    let started = Instant::now();
    let stop = || cancel.is_cancelled();

    let mut results = Vec::with_capacity(indicators.len());
    for indicator in indicators {
        if stop() {
            info!(completed = results.len(), "Backfill cancelled");
            return Err(BackfillError::Cancelled);
        }
        match indicator.evaluate_until(points, &stop) {
            Some(series) => results.push(series),
            None => {
                info!(
                    completed = results.len(),
                    indicator = %indicator.definition(),
                    "Backfill cancelled"
                );
                return Err(BackfillError::Cancelled);
            }
        }
    }

    info!(
        indicators = results.len(),
        points = points.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Backfill complete"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn points(n: usize) -> Vec<PricePoint> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = Decimal::from(100 + (i % 17) as i64);
                PricePoint::from_close(start + Duration::minutes(i as i64), close).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_backfill_matches_direct_evaluation() {
        let registry = IndicatorRegistry::default();
        let data = points(500);
        let defs = vec![IndicatorDefinition::sma(10), IndicatorDefinition::rsi(14)];

        let results = Backfill::spawn(&registry, data.clone(), &defs)
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for (def, series) in defs.iter().zip(&results) {
            assert_eq!(series, &registry.evaluate(&data, def).unwrap());
        }
    }

    #[tokio::test]
    async fn test_backfill_cancelled_before_start() {
        let registry = IndicatorRegistry::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let backfill =
            Backfill::spawn_with(&registry, points(100), &[IndicatorDefinition::sma(5)], cancel)
                .unwrap();
        assert!(matches!(backfill.join().await, Err(BackfillError::Cancelled)));
    }

    #[test]
    fn test_run_stops_mid_evaluation() {
        let registry = IndicatorRegistry::default();
        let indicators = vec![registry.batch(&IndicatorDefinition::ema(3)).unwrap()];
        let cancel = CancelFlag::new();
        cancel.cancel();
        // the evaluator itself polls the flag, not only the outer loop
        assert!(indicators[0]
            .evaluate_until(&points(5000), &|| cancel.is_cancelled())
            .is_none());
        assert!(matches!(
            run(&indicators, &points(10), &cancel),
            Err(BackfillError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_backfill_rejects_invalid_definition_up_front() {
        let registry = IndicatorRegistry::default();
        let err = Backfill::spawn(
            &registry,
            points(10),
            &[IndicatorDefinition::sma(5), IndicatorDefinition::rsi(0)],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    #[tokio::test]
    async fn test_backfill_rejects_unordered_points() {
        let registry = IndicatorRegistry::default();
        let mut data = points(50);
        data.swap(10, 11);
        let err = Backfill::spawn(&registry, data, &[IndicatorDefinition::sma(5)]).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_series() {
        let registry = IndicatorRegistry::default();
        let results = Backfill::spawn(&registry, Vec::<PricePoint>::new(), &[IndicatorDefinition::macd(12, 26, 9)])
            .unwrap()
            .join()
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_empty());
    }
}
