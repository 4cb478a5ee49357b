use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A single OHLCV candle.
///
/// Construct through [`PricePoint::new`] (or one of its siblings) to get field
/// validation; series and incremental indicators re-validate on entry anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PricePoint {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self, EngineError> {
        let point = Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        point.validate()?;
        Ok(point)
    }

    /// A candle where every price field equals `close` and volume is zero.
    pub fn from_close(timestamp: DateTime<Utc>, close: Decimal) -> Result<Self, EngineError> {
        Self::new(timestamp, close, close, close, close, Decimal::ZERO)
    }

    /// Build a candle from binary floats, rejecting NaN and infinities.
    pub fn from_f64(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, EngineError> {
        Self::new(
            timestamp,
            to_decimal("open", open)?,
            to_decimal("high", high)?,
            to_decimal("low", low)?,
            to_decimal("close", close)?,
            to_decimal("volume", volume)?,
        )
    }

    /// Checks that no price or volume field is negative.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (field, value) in fields {
            if value < Decimal::ZERO {
                return Err(EngineError::InvalidValue {
                    field,
                    reason: format!("must not be negative, got {}", value),
                });
            }
        }
        Ok(())
    }
}

fn to_decimal(field: &'static str, value: f64) -> Result<Decimal, EngineError> {
    if !value.is_finite() {
        return Err(EngineError::InvalidValue {
            field,
            reason: format!("must be finite, got {}", value),
        });
    }
    Decimal::try_from(value).map_err(|e| EngineError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

/// Candle interval of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Tick,
    Second(u32),
    Minute(u32),
    Hour(u32),
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::Tick => write!(f, "tick"),
            Timeframe::Second(n) => write!(f, "{}s", n),
            Timeframe::Minute(n) => write!(f, "{}m", n),
            Timeframe::Hour(n) => write!(f, "{}h", n),
            Timeframe::Daily => write!(f, "1d"),
            Timeframe::Weekly => write!(f, "1w"),
            Timeframe::Monthly => write!(f, "1mo"),
        }
    }
}

/// Parses the short forms produced by `Display` (`tick`, `30s`, `5m`, `4h`,
/// `1d`, `1w`, `1mo`). Days, weeks and months only come in units of one.
impl std::str::FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let invalid = || EngineError::InvalidValue {
            field: "timeframe",
            reason: format!("unrecognised timeframe '{}'", s),
        };
        match s.as_str() {
            "tick" => return Ok(Timeframe::Tick),
            "1d" | "d" | "daily" => return Ok(Timeframe::Daily),
            "1w" | "w" | "weekly" => return Ok(Timeframe::Weekly),
            "1mo" | "mo" | "monthly" => return Ok(Timeframe::Monthly),
            _ => {}
        }

        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (count, unit) = s.split_at(split);
        let count: u32 = count.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        match unit {
            "s" => Ok(Timeframe::Second(count)),
            "m" => Ok(Timeframe::Minute(count)),
            "h" => Ok(Timeframe::Hour(count)),
            _ => Err(invalid()),
        }
    }
}

// ---------------------------------------------------------------------------
// Indicator Output
// ---------------------------------------------------------------------------

/// Maximum number of lines a single indicator emits per timestamp.
pub const MAX_OUTPUTS: usize = 3;

/// The values an indicator produces at one timestamp.
///
/// Single-line indicators (SMA, RSI) carry one value; band and MACD style
/// indicators carry three. The first value is always the primary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<Decimal>", try_from = "Vec<Decimal>")]
pub struct Output {
    values: [Decimal; MAX_OUTPUTS],
    len: u8,
}

impl Output {
    pub fn single(value: Decimal) -> Self {
        Self {
            values: [value, Decimal::ZERO, Decimal::ZERO],
            len: 1,
        }
    }

    pub fn triple(first: Decimal, second: Decimal, third: Decimal) -> Self {
        Self {
            values: [first, second, third],
            len: 3,
        }
    }

    /// The primary line.
    pub fn primary(&self) -> Decimal {
        self.values[0]
    }

    pub fn get(&self, index: usize) -> Option<Decimal> {
        self.as_slice().get(index).copied()
    }

    pub fn as_slice(&self) -> &[Decimal] {
        &self.values[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Same arity, and every line within `tolerance` of the other's.
    pub fn approx_eq(&self, other: &Output, tolerance: Decimal) -> bool {
        self.len == other.len
            && self
                .as_slice()
                .iter()
                .zip(other.as_slice())
                .all(|(a, b)| (*a - *b).abs() <= tolerance)
    }
}

impl From<Output> for Vec<Decimal> {
    fn from(output: Output) -> Self {
        output.as_slice().to_vec()
    }
}

impl TryFrom<Vec<Decimal>> for Output {
    type Error = String;

    fn try_from(values: Vec<Decimal>) -> Result<Self, Self::Error> {
        if values.is_empty() || values.len() > MAX_OUTPUTS {
            return Err(format!(
                "expected 1 to {} output values, got {}",
                MAX_OUTPUTS,
                values.len()
            ));
        }
        let mut out = [Decimal::ZERO; MAX_OUTPUTS];
        out[..values.len()].copy_from_slice(&values);
        Ok(Self {
            values: out,
            len: values.len() as u8,
        })
    }
}

/// An indicator reading aligned to one price point.
///
/// `output` is `None` while the indicator lacks enough history at this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub timestamp: DateTime<Utc>,
    pub output: Option<Output>,
}

impl IndicatorValue {
    pub fn defined(timestamp: DateTime<Utc>, output: Output) -> Self {
        Self {
            timestamp,
            output: Some(output),
        }
    }

    pub fn undefined(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            output: None,
        }
    }

    /// The primary line, if defined.
    pub fn value(&self) -> Option<Decimal> {
        self.output.map(|o| o.primary())
    }

    pub fn is_defined(&self) -> bool {
        self.output.is_some()
    }

    /// Same timestamp, and outputs either both absent or
    /// [`approx_eq`](Output::approx_eq).
    pub fn approx_eq(&self, other: &IndicatorValue, tolerance: Decimal) -> bool {
        self.timestamp == other.timestamp
            && match (self.output, other.output) {
                (Some(a), Some(b)) => a.approx_eq(&b, tolerance),
                (None, None) => true,
                _ => false,
            }
    }
}

/// The defined readings of one indicator over a price series, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    /// Human-readable identity of the producing definition, e.g. `rsi(period=14)`.
    pub label: String,
    pub values: Vec<IndicatorValue>,
}

impl IndicatorSeries {
    pub fn new(label: impl Into<String>, values: Vec<IndicatorValue>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndicatorValue> {
        self.values.iter()
    }

    pub fn last(&self) -> Option<&IndicatorValue> {
        self.values.last()
    }

    /// Primary line values in order.
    pub fn primary(&self) -> Vec<Decimal> {
        self.values.iter().filter_map(|v| v.value()).collect()
    }

    /// Looks up the reading at an exact timestamp.
    pub fn at(&self, timestamp: DateTime<Utc>) -> Option<&IndicatorValue> {
        self.values
            .binary_search_by_key(&timestamp, |v| v.timestamp)
            .ok()
            .map(|i| &self.values[i])
    }
}
