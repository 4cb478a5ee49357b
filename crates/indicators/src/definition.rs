use investta_core::{EngineError, PricePoint};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Identifies an indicator implementation in the registry.
///
/// Names are case-insensitive. Anything that is not a built-in name becomes
/// `Custom`, which resolves only if a matching factory was registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Bollinger,
    Macd,
    Custom(String),
}

impl IndicatorKind {
    pub fn name(&self) -> &str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Bollinger => "bollinger",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Custom(name) => name,
        }
    }
}

impl From<&str> for IndicatorKind {
    fn from(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "sma" => IndicatorKind::Sma,
            "ema" => IndicatorKind::Ema,
            "rsi" => IndicatorKind::Rsi,
            "bollinger" | "bb" | "bbands" => IndicatorKind::Bollinger,
            "macd" => IndicatorKind::Macd,
            _ => IndicatorKind::Custom(name),
        }
    }
}

impl From<String> for IndicatorKind {
    fn from(name: String) -> Self {
        IndicatorKind::from(name.as_str())
    }
}

impl From<IndicatorKind> for String {
    fn from(kind: IndicatorKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Price source
// ---------------------------------------------------------------------------

/// Which price of a candle an indicator consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Open,
    High,
    Low,
    #[default]
    Close,
    /// (high + low) / 2
    Hl2,
    /// (high + low + close) / 3
    Hlc3,
    /// (open + high + low + close) / 4
    Ohlc4,
}

impl PriceSource {
    pub fn extract(&self, point: &PricePoint) -> Decimal {
        match self {
            PriceSource::Open => point.open,
            PriceSource::High => point.high,
            PriceSource::Low => point.low,
            PriceSource::Close => point.close,
            PriceSource::Hl2 => (point.high + point.low) / Decimal::TWO,
            PriceSource::Hlc3 => (point.high + point.low + point.close) / Decimal::from(3),
            PriceSource::Ohlc4 => {
                (point.open + point.high + point.low + point.close) / Decimal::from(4)
            }
        }
    }
}

impl FromStr for PriceSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" | "o" => Ok(PriceSource::Open),
            "high" | "h" => Ok(PriceSource::High),
            "low" | "l" => Ok(PriceSource::Low),
            "close" | "c" => Ok(PriceSource::Close),
            "hl2" => Ok(PriceSource::Hl2),
            "hlc3" => Ok(PriceSource::Hlc3),
            "ohlc4" => Ok(PriceSource::Ohlc4),
            other => Err(EngineError::invalid_parameter(
                "source",
                format!("unknown price source '{}'", other),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A raw parameter value as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Interpret a textual value: integers first, then numbers, else text.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            ParamValue::Integer(i)
        } else if let Ok(f) = s.parse::<f64>() {
            ParamValue::Number(f)
        } else {
            ParamValue::Text(s.to_string())
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{}", v),
            ParamValue::Number(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

/// Named indicator parameters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ParamValue>")]
pub struct Params(BTreeMap<String, ParamValue>);

impl From<BTreeMap<String, ParamValue>> for Params {
    fn from(map: BTreeMap<String, ParamValue>) -> Self {
        let mut params = Params::new();
        for (name, value) in map {
            params.insert(&name, value);
        }
        params
    }
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.0.insert(name.trim().to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects any parameter name not listed in `allowed`.
    pub fn ensure_known(&self, allowed: &[&str]) -> Result<(), EngineError> {
        match self.0.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(name) => Err(EngineError::invalid_parameter(
                name.as_str(),
                format!("not accepted here (expected one of: {})", allowed.join(", ")),
            )),
            None => Ok(()),
        }
    }

    /// A count-based window length: a positive integer.
    pub fn period(&self, name: &str, default: Option<usize>) -> Result<usize, EngineError> {
        match self.get(name) {
            None => default.ok_or_else(|| EngineError::invalid_parameter(name, "is required")),
            Some(ParamValue::Integer(v)) if *v > 0 => usize::try_from(*v)
                .map_err(|_| EngineError::invalid_parameter(name, format!("{} is too large", v))),
            Some(ParamValue::Integer(v)) => Err(EngineError::invalid_parameter(
                name,
                format!("must be a positive integer, got {}", v),
            )),
            Some(other) => Err(EngineError::invalid_parameter(
                name,
                format!("must be an integer, got {}", other),
            )),
        }
    }

    /// A strictly positive decimal factor.
    pub fn multiplier(&self, name: &str, default: Decimal) -> Result<Decimal, EngineError> {
        let value = match self.get(name) {
            None => return Ok(default),
            Some(ParamValue::Integer(v)) => Decimal::from(*v),
            Some(ParamValue::Number(v)) if v.is_finite() => Decimal::try_from(*v)
                .map_err(|e| EngineError::invalid_parameter(name, e.to_string()))?,
            Some(other) => {
                return Err(EngineError::invalid_parameter(
                    name,
                    format!("must be a finite number, got {}", other),
                ))
            }
        };
        if value <= Decimal::ZERO {
            return Err(EngineError::invalid_parameter(
                name,
                format!("must be positive, got {}", value),
            ));
        }
        Ok(value)
    }

    pub fn source(&self) -> Result<PriceSource, EngineError> {
        match self.get("source") {
            None => Ok(PriceSource::default()),
            Some(ParamValue::Text(s)) => s.parse(),
            Some(other) => Err(EngineError::invalid_parameter(
                "source",
                format!("unknown price source '{}'", other),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Declarative request for one indicator: a kind plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub kind: IndicatorKind,
    #[serde(default)]
    pub params: Params,
}

impl IndicatorDefinition {
    pub fn new(kind: impl Into<IndicatorKind>, params: Params) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    pub fn sma(period: i64) -> Self {
        Self::new(IndicatorKind::Sma, Params::new().with("period", period))
    }

    pub fn ema(period: i64) -> Self {
        Self::new(IndicatorKind::Ema, Params::new().with("period", period))
    }

    pub fn rsi(period: i64) -> Self {
        Self::new(IndicatorKind::Rsi, Params::new().with("period", period))
    }

    pub fn bollinger(period: i64, std_dev: f64) -> Self {
        Self::new(
            IndicatorKind::Bollinger,
            Params::new().with("period", period).with("std_dev", std_dev),
        )
    }

    pub fn macd(fast: i64, slow: i64, signal: i64) -> Self {
        Self::new(
            IndicatorKind::Macd,
            Params::new()
                .with("fast", fast)
                .with("slow", slow)
                .with("signal", signal),
        )
    }

    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Display identity such as `rsi(period=14)`.
    pub fn label(&self) -> String {
        if self.params.is_empty() {
            return self.kind.to_string();
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}({})", self.kind, params.join(","))
    }
}

impl fmt::Display for IndicatorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Parses `kind` or `kind:name=value,name=value`.
impl FromStr for IndicatorDefinition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = match s.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (s, None),
        };
        if kind.trim().is_empty() {
            return Err(EngineError::UnknownIndicator(s.to_string()));
        }

        let mut params = Params::new();
        for pair in rest.into_iter().flat_map(|r| r.split(',')).filter(|p| !p.trim().is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                EngineError::invalid_parameter(pair.trim(), "expected name=value")
            })?;
            params.insert(name, ParamValue::parse(value));
        }
        Ok(Self::new(kind, params))
    }
}
