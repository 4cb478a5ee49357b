use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_after, EngineError};
use crate::models::{PricePoint, Timeframe};

/// Append-only candle history for one (instrument, timeframe) pair.
///
/// Timestamps are strictly increasing. Gaps are allowed; density is whatever
/// the data source delivers. There is no deletion: capping history is a caller
/// concern.
///
/// Deserialized series are rebuilt through [`append`](Self::append), so stored
/// data that breaks ordering or candle validity is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredSeries")]
pub struct PriceSeries {
    instrument: String,
    timeframe: Timeframe,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(instrument: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
            points: Vec::new(),
        }
    }

    pub fn with_capacity(instrument: impl Into<String>, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Append a point. On error the series is left untouched.
    pub fn append(&mut self, point: PricePoint) -> Result<(), EngineError> {
        point.validate()?;
        ensure_after(self.last_timestamp(), point.timestamp)?;
        self.points.push(point);
        Ok(())
    }

    /// Append points in order, stopping at the first rejected one.
    ///
    /// Points before the failing one stay appended.
    pub fn try_extend<I>(&mut self, points: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = PricePoint>,
    {
        for point in points {
            self.append(point)?;
        }
        Ok(())
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.timestamp)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Borrowed view over the points with timestamps in `[from, to]`.
    pub fn slice(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> SeriesSlice<'_> {
        if from > to {
            return SeriesSlice { points: &[] };
        }
        let start = self.points.partition_point(|p| p.timestamp < from);
        let end = self.points.partition_point(|p| p.timestamp <= to);
        SeriesSlice {
            points: &self.points[start..end],
        }
    }
}

#[derive(Deserialize)]
struct StoredSeries {
    instrument: String,
    timeframe: Timeframe,
    points: Vec<PricePoint>,
}

impl TryFrom<StoredSeries> for PriceSeries {
    type Error = EngineError;

    fn try_from(stored: StoredSeries) -> Result<Self, Self::Error> {
        let mut series = Self::with_capacity(stored.instrument, stored.timeframe, stored.points.len());
        series.try_extend(stored.points)?;
        Ok(series)
    }
}

/// Check that timestamps strictly increase, as [`PriceSeries`] guarantees.
pub fn ensure_ordered(points: &[PricePoint]) -> Result<(), EngineError> {
    points
        .windows(2)
        .try_for_each(|pair| ensure_after(Some(pair[0].timestamp), pair[1].timestamp))
}

impl<'a> IntoIterator for &'a PriceSeries {
    type Item = &'a PricePoint;
    type IntoIter = std::slice::Iter<'a, PricePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Read-only window into a [`PriceSeries`]. Holds a borrow, never a copy.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSlice<'a> {
    points: &'a [PricePoint],
}

impl<'a> SeriesSlice<'a> {
    pub fn points(&self) -> &'a [PricePoint] {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'a, PricePoint> {
        self.points.iter()
    }

    pub fn first(&self) -> Option<&'a PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&'a PricePoint> {
        self.points.last()
    }

    pub fn closes(&self) -> impl Iterator<Item = Decimal> + 'a {
        self.points.iter().map(|p| p.close)
    }
}

impl<'a> IntoIterator for SeriesSlice<'a> {
    type Item = &'a PricePoint;
    type IntoIter = std::slice::Iter<'a, PricePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn point(secs: i64, close: Decimal) -> PricePoint {
        PricePoint::from_close(ts(secs), close).unwrap()
    }

    fn sample() -> PriceSeries {
        let mut series = PriceSeries::new("2330.TW", Timeframe::Daily);
        for (i, close) in [dec!(10), dec!(11), dec!(12), dec!(13)].into_iter().enumerate() {
            series.append(point(i as i64 * 60, close)).unwrap();
        }
        series
    }

    #[test]
    fn test_append_rejects_equal_and_earlier_timestamps() {
        let mut series = sample();
        let before = series.clone();

        let err = series.append(point(180, dec!(99))).unwrap_err();
        assert_eq!(
            err,
            EngineError::OutOfOrder {
                timestamp: ts(180),
                last: ts(180)
            }
        );
        assert!(matches!(
            series.append(point(0, dec!(99))),
            Err(EngineError::OutOfOrder { .. })
        ));
        assert_eq!(series, before);
    }

    #[test]
    fn test_append_rejects_invalid_values_without_mutation() {
        let mut series = sample();
        let mut bad = point(240, dec!(14));
        bad.volume = dec!(-1);
        assert!(matches!(
            series.append(bad),
            Err(EngineError::InvalidValue { field: "volume", .. })
        ));
        assert_eq!(series.len(), 4);
    }

    #[test]
    fn test_gaps_are_legal() {
        let mut series = sample();
        series.append(point(10_000, dec!(20))).unwrap();
        assert_eq!(series.last_timestamp(), Some(ts(10_000)));
    }

    #[test]
    fn test_try_extend_stops_at_first_failure() {
        let mut series = PriceSeries::new("BTCUSD", Timeframe::Minute(1));
        let result = series.try_extend([point(1, dec!(1)), point(2, dec!(2)), point(2, dec!(3)), point(4, dec!(4))]);
        assert!(result.is_err());
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_slice_is_inclusive() {
        let series = sample();
        let view = series.slice(ts(60), ts(120));
        assert_eq!(view.closes().collect::<Vec<_>>(), vec![dec!(11), dec!(12)]);

        let view = series.slice(ts(30), ts(1_000));
        assert_eq!(view.len(), 3);
        assert_eq!(view.first().map(|p| p.close), Some(dec!(11)));
    }

    #[test]
    fn test_slice_empty_cases() {
        let series = sample();
        assert!(series.slice(ts(120), ts(60)).is_empty());
        assert!(series.slice(ts(1_000), ts(2_000)).is_empty());
        assert!(series.slice(ts(61), ts(119)).is_empty());
    }

    #[test]
    fn test_deserialize_round_trip() {
        let series = sample();
        let json = serde_json::to_string(&series).unwrap();
        let back: PriceSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back, series);
    }

    #[test]
    fn test_deserialize_rejects_unordered_points() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["points"].as_array_mut().unwrap().reverse();
        let err = serde_json::from_value::<PriceSeries>(json).unwrap_err();
        assert!(err.to_string().starts_with("Out of order"));
    }

    #[test]
    fn test_deserialize_rejects_invalid_candle() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["points"][2]["close"] = serde_json::json!("-5");
        assert!(serde_json::from_value::<PriceSeries>(json).is_err());
    }

    #[test]
    fn test_ensure_ordered() {
        let points = sample().points().to_vec();
        assert!(ensure_ordered(&points).is_ok());
        assert!(ensure_ordered(&[]).is_ok());
        assert!(ensure_ordered(&points[..1]).is_ok());

        let mut swapped = points.clone();
        swapped.swap(1, 2);
        assert_eq!(
            ensure_ordered(&swapped),
            Err(EngineError::OutOfOrder {
                timestamp: ts(60),
                last: ts(120)
            })
        );

        let mut repeated = points;
        repeated[3].timestamp = repeated[2].timestamp;
        assert!(matches!(ensure_ordered(&repeated), Err(EngineError::OutOfOrder { .. })));
    }
}
