use investta_core::{EngineError, IndicatorValue, PricePoint, PriceSeries};
use investta_indicators::{IncrementalIndicator, IndicatorDefinition, IndicatorRegistry};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

struct Feed {
    indicator: IncrementalIndicator,
    publisher: watch::Sender<Option<IndicatorValue>>,
}

/// Owns a price series and the incremental indicators attached to it.
///
/// All mutation goes through `&mut self`, so the session is the only writer.
/// Producers on other tasks hand ticks over an mpsc channel consumed by
/// [`run`](Self::run); readers observe the latest value per indicator through
/// watch receivers and never see a partially applied update.
pub struct LiveSession {
    series: PriceSeries,
    feeds: Vec<Feed>,
}

impl LiveSession {
    pub fn new(series: PriceSeries) -> Self {
        Self {
            series,
            feeds: Vec::new(),
        }
    }

    pub fn series(&self) -> &PriceSeries {
        &self.series
    }

    pub fn indicators(&self) -> impl Iterator<Item = &IncrementalIndicator> {
        self.feeds.iter().map(|f| &f.indicator)
    }

    /// Attach an indicator, catching it up on the history collected so far.
    ///
    /// The receiver starts at the value for the latest point, or `None` when
    /// the series is empty.
    pub fn attach(
        &mut self,
        registry: &IndicatorRegistry,
        definition: &IndicatorDefinition,
    ) -> Result<watch::Receiver<Option<IndicatorValue>>, EngineError> {
        let mut indicator = registry.incremental(definition)?;
        indicator.rebuild(self.series.points())?;

        let (publisher, receiver) = watch::channel(indicator.latest().copied());
        debug!(
            instrument = %self.series.instrument(),
            indicator = %definition,
            history = self.series.len(),
            "Indicator attached"
        );
        self.feeds.push(Feed {
            indicator,
            publisher,
        });
        Ok(receiver)
    }

    /// Append a tick and advance every attached indicator.
    ///
    /// Rejected ticks leave the series and all indicators unchanged.
    pub fn push(&mut self, point: PricePoint) -> Result<(), EngineError> {
        self.series.append(point)?;
        // Every feed was rebuilt from this series and has seen exactly its
        // points, so the checks `append` just passed also hold for each update.
        for feed in &mut self.feeds {
            let value = feed.indicator.update(&point)?;
            feed.publisher.send_replace(Some(value));
        }
        Ok(())
    }

    /// Apply ticks from `ticks` until every sender is dropped, then hand the
    /// session back.
    pub async fn run(mut self, mut ticks: mpsc::Receiver<PricePoint>) -> Self {
        let mut applied = 0usize;
        let mut rejected = 0usize;
        while let Some(point) = ticks.recv().await {
            match self.push(point) {
                Ok(()) => applied += 1,
                Err(e) => {
                    rejected += 1;
                    warn!(
                        instrument = %self.series.instrument(),
                        timestamp = %point.timestamp,
                        error = %e,
                        "Tick rejected"
                    );
                }
            }
        }
        info!(
            instrument = %self.series.instrument(),
            applied,
            rejected,
            "Tick stream closed"
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use investta_core::Timeframe;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 14, 30, 0).unwrap() + Duration::minutes(minute)
    }

    fn tick(minute: i64, close: Decimal) -> PricePoint {
        PricePoint::from_close(at(minute), close).unwrap()
    }

    fn session_with(closes: &[Decimal]) -> LiveSession {
        let mut series = PriceSeries::new("ETHUSDT", Timeframe::Minute(1));
        for (i, close) in closes.iter().enumerate() {
            series.append(tick(i as i64, *close)).unwrap();
        }
        LiveSession::new(series)
    }

    #[test]
    fn test_attach_catches_up_on_history() {
        let mut session = session_with(&[dec!(1), dec!(2), dec!(3), dec!(4)]);
        let registry = IndicatorRegistry::default();

        let sma = session.attach(&registry, &IndicatorDefinition::sma(3)).unwrap();
        assert_eq!(sma.borrow().and_then(|v| v.value()), Some(dec!(3)));

        let slow = session.attach(&registry, &IndicatorDefinition::sma(10)).unwrap();
        let latest = slow.borrow().unwrap();
        assert_eq!(latest.timestamp, at(3));
        assert!(!latest.is_defined());
    }

    #[test]
    fn test_attach_on_empty_series() {
        let mut session = session_with(&[]);
        let rx = session
            .attach(&IndicatorRegistry::default(), &IndicatorDefinition::ema(5))
            .unwrap();
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn test_attach_unknown_kind() {
        let mut session = session_with(&[dec!(1)]);
        let def: IndicatorDefinition = "vwap:period=5".parse().unwrap();
        assert!(matches!(
            session.attach(&IndicatorRegistry::default(), &def),
            Err(EngineError::UnknownIndicator(_))
        ));
        assert_eq!(session.indicators().count(), 0);
    }

    #[test]
    fn test_push_rejects_out_of_order_without_side_effects() {
        let mut session = session_with(&[dec!(1), dec!(2), dec!(3)]);
        let rx = session
            .attach(&IndicatorRegistry::default(), &IndicatorDefinition::sma(2))
            .unwrap();

        let err = session.push(tick(1, dec!(100))).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { .. }));
        assert_eq!(session.series().len(), 3);
        assert_eq!(rx.borrow().and_then(|v| v.value()), Some(dec!(2.5)));

        session.push(tick(3, dec!(5))).unwrap();
        assert_eq!(rx.borrow().and_then(|v| v.value()), Some(dec!(4)));
    }

    #[test]
    fn test_indicators_stay_in_lockstep_with_series() {
        let registry = IndicatorRegistry::default();
        let mut session = session_with(&[dec!(4), dec!(5)]);
        session.attach(&registry, &IndicatorDefinition::rsi(3)).unwrap();

        session.push(tick(2, dec!(6))).unwrap();
        session.attach(&registry, &IndicatorDefinition::sma(2)).unwrap();
        assert!(session.push(tick(2, dec!(7))).is_err());
        let mut bad = tick(3, dec!(7));
        bad.low = dec!(-1);
        assert!(session.push(bad).is_err());
        session.push(tick(3, dec!(7))).unwrap();

        assert_eq!(session.indicators().count(), 2);
        for indicator in session.indicators() {
            assert_eq!(indicator.last_timestamp(), session.series().last_timestamp());
            assert_eq!(indicator.latest().map(|v| v.timestamp), Some(at(3)));
        }
    }

    #[tokio::test]
    async fn test_run_serialises_multiple_producers() {
        let mut session = session_with(&[]);
        let registry = IndicatorRegistry::default();
        let mut sma = session.attach(&registry, &IndicatorDefinition::sma(2)).unwrap();
        let rsi = session.attach(&registry, &IndicatorDefinition::rsi(2)).unwrap();

        let (tx, rx) = mpsc::channel(16);
        let second = tx.clone();
        let consumer = tokio::spawn(session.run(rx));

        for minute in 0..4 {
            tx.send(tick(minute, Decimal::from(10 + minute))).await.unwrap();
        }
        // stale tick from a second producer is skipped, the next one applies
        second.send(tick(1, dec!(999))).await.unwrap();
        second.send(tick(4, dec!(14))).await.unwrap();
        drop(tx);
        drop(second);

        let session = consumer.await.unwrap();
        assert_eq!(session.series().len(), 5);
        assert_eq!(session.series().last_timestamp(), Some(at(4)));

        assert!(sma.has_changed().unwrap());
        let latest = *sma.borrow_and_update();
        assert_eq!(latest.and_then(|v| v.value()), Some(dec!(13.5)));
        assert_eq!(rsi.borrow().and_then(|v| v.value()), Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_readers_on_other_tasks_see_updates() {
        let mut session = session_with(&[dec!(1)]);
        let mut rx = session
            .attach(&IndicatorRegistry::default(), &IndicatorDefinition::sma(2))
            .unwrap();

        let reader = tokio::spawn(async move {
            rx.changed().await.unwrap();
            let value = rx.borrow().and_then(|v| v.value());
            value
        });

        session.push(tick(1, dec!(3))).unwrap();
        assert_eq!(reader.await.unwrap(), Some(dec!(2)));
    }
}
