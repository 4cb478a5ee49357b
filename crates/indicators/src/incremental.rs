use crate::definition::{IndicatorDefinition, PriceSource};
use crate::Indicator;
use chrono::{DateTime, Utc};
use investta_core::{ensure_after, EngineError, IndicatorValue, PricePoint};

/// A long-lived indicator advanced one price point at a time.
///
/// Each instance owns its running state exclusively. `update` takes `&mut
/// self`, so there is exactly one writer at a time; the last emitted value can
/// be read through [`latest`](Self::latest).
pub struct IncrementalIndicator {
    definition: IndicatorDefinition,
    source: PriceSource,
    state: Box<dyn Indicator>,
    last_timestamp: Option<DateTime<Utc>>,
    latest: Option<IndicatorValue>,
}

impl std::fmt::Debug for IncrementalIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalIndicator")
            .field("definition", &self.definition)
            .field("source", &self.source)
            .field("last_timestamp", &self.last_timestamp)
            .field("latest", &self.latest)
            .finish()
    }
}

impl IncrementalIndicator {
    pub fn new(
        definition: IndicatorDefinition,
        source: PriceSource,
        state: Box<dyn Indicator>,
    ) -> Self {
        Self {
            definition,
            source,
            state,
            last_timestamp: None,
            latest: None,
        }
    }

    pub fn definition(&self) -> &IndicatorDefinition {
        &self.definition
    }

    /// Points needed before the first defined value.
    pub fn lookback(&self) -> usize {
        self.state.period()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// The value produced by the most recent successful update.
    pub fn latest(&self) -> Option<&IndicatorValue> {
        self.latest.as_ref()
    }

    /// Advance by one point.
    ///
    /// The point must be strictly later than the previous one and carry valid
    /// fields; otherwise the state is left untouched. During warm-up the
    /// returned value has no output.
    pub fn update(&mut self, point: &PricePoint) -> Result<IndicatorValue, EngineError> {
        point.validate()?;
        ensure_after(self.last_timestamp, point.timestamp)?;

        let output = self.state.next(self.source.extract(point));
        let value = IndicatorValue {
            timestamp: point.timestamp,
            output,
        };
        self.last_timestamp = Some(point.timestamp);
        self.latest = Some(value);
        Ok(value)
    }

    /// Discard all running state, including the last seen timestamp.
    pub fn reset(&mut self) {
        self.state.reset();
        self.last_timestamp = None;
        self.latest = None;
    }

    /// Reset, then replay `points` from scratch.
    ///
    /// Used after the caller truncates or corrects its history. Stops at the
    /// first rejected point, leaving the state built from the points before it.
    pub fn rebuild(&mut self, points: &[PricePoint]) -> Result<Vec<IndicatorValue>, EngineError> {
        self.reset();
        points.iter().map(|p| self.update(p)).collect()
    }
}
