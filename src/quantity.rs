//! Numeric values with physical units.
//!
//! Scan parameters arrive as strings such as `"1540 nm"`, `"10pm"`, `"2 V"` or
//! `"10 nm/s"`. [`Quantity`] keeps the magnitude in the unit it was written in,
//! tracks the physical dimension, and offers only the arithmetic the scan geometry
//! needs: difference, ratio, quotient, scaling and conversion.
//!
//! ```
//! use laser_scan::quantity::Quantity;
//!
//! let span = Quantity::parse("1560 nm")?.checked_sub(&Quantity::parse("1540 nm")?)?;
//! let points = span.ratio(&Quantity::parse("10 pm")?)?;
//! assert!((points - 2000.0).abs() < 1e-6);
//! # Ok::<(), laser_scan::error::ScanError>(())
//! ```

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Exponents of the base dimensions a quantity is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension {
    length: i8,
    time: i8,
    voltage: i8,
    angle: i8,
}

impl Dimension {
    /// Plain number.
    pub const NONE: Dimension = Dimension::new(0, 0, 0, 0);
    /// Length (wavelengths, stage positions).
    pub const LENGTH: Dimension = Dimension::new(1, 0, 0, 0);
    /// Time.
    pub const TIME: Dimension = Dimension::new(0, 1, 0, 0);
    /// Electric potential.
    pub const VOLTAGE: Dimension = Dimension::new(0, 0, 1, 0);
    /// Plane angle.
    pub const ANGLE: Dimension = Dimension::new(0, 0, 0, 1);

    const fn new(length: i8, time: i8, voltage: i8, angle: i8) -> Self {
        Self {
            length,
            time,
            voltage,
            angle,
        }
    }

    fn over(self, other: Dimension) -> Dimension {
        Dimension::new(
            self.length - other.length,
            self.time - other.time,
            self.voltage - other.voltage,
            self.angle - other.angle,
        )
    }

    fn si_symbol(self) -> Option<&'static str> {
        match self {
            d if d == Dimension::NONE => Some(""),
            d if d == Dimension::LENGTH => Some("m"),
            d if d == Dimension::TIME => Some("s"),
            d if d == Dimension::VOLTAGE => Some("V"),
            d if d == Dimension::ANGLE => Some("rad"),
            d if d == Dimension::LENGTH.over(Dimension::TIME) => Some("m/s"),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[L^{} T^{} V^{} A^{}]",
            self.length, self.time, self.voltage, self.angle
        )
    }
}

/// A named unit: symbol, scale to SI and dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    symbol: String,
    factor: f64,
    dimension: Dimension,
}

impl Unit {
    /// Looks a unit up by symbol. Accepts `<unit>/<unit>` compounds.
    pub fn parse(symbol: &str) -> ScanResult<Unit> {
        let symbol = symbol.trim();
        if let Some((num, den)) = symbol.split_once('/') {
            let num = Unit::parse(num)?;
            let den = Unit::parse(den)?;
            return Ok(Unit {
                symbol: format!("{}/{}", num.symbol, den.symbol),
                factor: num.factor / den.factor,
                dimension: num.dimension.over(den.dimension),
            });
        }
        let (factor, dimension) = base_unit(symbol)
            .ok_or_else(|| ScanError::Quantity(format!("unknown unit '{}'", symbol)))?;
        Ok(Unit {
            symbol: symbol.to_string(),
            factor,
            dimension,
        })
    }

    fn si(dimension: Dimension) -> Unit {
        let symbol = dimension
            .si_symbol()
            .map(str::to_string)
            .unwrap_or_else(|| dimension.to_string());
        Unit {
            symbol,
            factor: 1.0,
            dimension,
        }
    }

    /// Unit symbol as written.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Physical dimension.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }
}

fn base_unit(symbol: &str) -> Option<(f64, Dimension)> {
    let entry = match symbol {
        "" => (1.0, Dimension::NONE),
        "pm" => (1e-12, Dimension::LENGTH),
        "nm" => (1e-9, Dimension::LENGTH),
        "um" | "µm" => (1e-6, Dimension::LENGTH),
        "mm" => (1e-3, Dimension::LENGTH),
        "m" => (1.0, Dimension::LENGTH),
        "ps" => (1e-12, Dimension::TIME),
        "ns" => (1e-9, Dimension::TIME),
        "us" | "µs" => (1e-6, Dimension::TIME),
        "ms" => (1e-3, Dimension::TIME),
        "s" => (1.0, Dimension::TIME),
        "min" => (60.0, Dimension::TIME),
        "uV" | "µV" => (1e-6, Dimension::VOLTAGE),
        "mV" => (1e-3, Dimension::VOLTAGE),
        "V" => (1.0, Dimension::VOLTAGE),
        "kV" => (1e3, Dimension::VOLTAGE),
        "rad" => (1.0, Dimension::ANGLE),
        "deg" | "°" => (std::f64::consts::PI / 180.0, Dimension::ANGLE),
        "Hz" => (1.0, Dimension::NONE.over(Dimension::TIME)),
        "kHz" => (1e3, Dimension::NONE.over(Dimension::TIME)),
        _ => return None,
    };
    Some(entry)
}

/// A magnitude together with its unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    magnitude: f64,
    unit: Unit,
}

impl Quantity {
    /// Builds a quantity from a magnitude and a unit symbol.
    pub fn new(magnitude: f64, unit: &str) -> ScanResult<Self> {
        Ok(Self {
            magnitude,
            unit: Unit::parse(unit)?,
        })
    }

    /// A dimensionless number.
    pub fn count(value: f64) -> Self {
        Self {
            magnitude: value,
            unit: Unit::si(Dimension::NONE),
        }
    }

    /// Parses `"<number> <unit>"`; whitespace between the two is optional.
    pub fn parse(text: &str) -> ScanResult<Self> {
        let text = text.trim();
        let split = text
            .char_indices()
            .find(|&(i, c)| {
                !(c.is_ascii_digit()
                    || c == '.'
                    || c == '+'
                    || c == '-'
                    || ((c == 'e' || c == 'E') && exponent_follows(text, i)))
            })
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let magnitude: f64 = number
            .parse()
            .map_err(|_| ScanError::Quantity(format!("cannot parse '{}' as a quantity", text)))?;
        Self::new(magnitude, unit)
    }

    fn from_si(value: f64, dimension: Dimension) -> Self {
        Self {
            magnitude: value,
            unit: Unit::si(dimension),
        }
    }

    /// Magnitude in the quantity's own unit.
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// The quantity's unit.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Physical dimension.
    pub fn dimension(&self) -> Dimension {
        self.unit.dimension
    }

    /// Value expressed in SI base units.
    pub fn si_value(&self) -> f64 {
        self.magnitude * self.unit.factor
    }

    fn require_same_dimension(&self, other: &Quantity) -> ScanResult<()> {
        if self.dimension() != other.dimension() {
            return Err(ScanError::Quantity(format!(
                "incompatible units '{}' and '{}'",
                self.unit.symbol, other.unit.symbol
            )));
        }
        Ok(())
    }

    /// `self - other`, expressed in `self`'s unit.
    pub fn checked_sub(&self, other: &Quantity) -> ScanResult<Quantity> {
        self.require_same_dimension(other)?;
        Ok(Quantity {
            magnitude: self.magnitude - other.si_value() / self.unit.factor,
            unit: self.unit.clone(),
        })
    }

    /// Dimensionless ratio of two quantities of the same dimension.
    pub fn ratio(&self, other: &Quantity) -> ScanResult<f64> {
        self.require_same_dimension(other)?;
        if other.magnitude == 0.0 {
            return Err(ScanError::Quantity(format!(
                "division of '{}' by zero",
                self
            )));
        }
        Ok(self.si_value() / other.si_value())
    }

    /// Quotient of two quantities; the result is expressed in SI units.
    pub fn divide(&self, other: &Quantity) -> ScanResult<Quantity> {
        if other.magnitude == 0.0 {
            return Err(ScanError::Quantity(format!(
                "division of '{}' by zero",
                self
            )));
        }
        Ok(Quantity::from_si(
            self.si_value() / other.si_value(),
            self.dimension().over(other.dimension()),
        ))
    }

    /// Same unit, different magnitude.
    pub fn with_magnitude(&self, magnitude: f64) -> Quantity {
        Quantity {
            magnitude,
            unit: self.unit.clone(),
        }
    }

    /// Multiplies the magnitude by a plain factor.
    pub fn scale(&self, factor: f64) -> Quantity {
        Quantity {
            magnitude: self.magnitude * factor,
            unit: self.unit.clone(),
        }
    }

    /// Magnitude after conversion to `unit`.
    pub fn m_as(&self, unit: &str) -> ScanResult<f64> {
        let target = Unit::parse(unit)?;
        if target.dimension != self.dimension() {
            return Err(ScanError::Quantity(format!(
                "cannot express '{}' in '{}'",
                self, unit
            )));
        }
        Ok(self.si_value() / target.factor)
    }

    /// Converts a non-negative time quantity to a [`Duration`].
    pub fn as_duration(&self) -> ScanResult<Duration> {
        let seconds = self.m_as("s")?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ScanError::Quantity(format!(
                "'{}' is not a valid duration",
                self
            )));
        }
        Ok(Duration::from_secs_f64(seconds))
    }
}

fn exponent_follows(text: &str, index: usize) -> bool {
    let rest = &text[index + 1..];
    let rest = rest.strip_prefix(['+', '-']).unwrap_or(rest);
    rest.starts_with(|c: char| c.is_ascii_digit())
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.symbol.is_empty() {
            write!(f, "{}", self.magnitude)
        } else {
            write!(f, "{} {}", self.magnitude, self.unit.symbol)
        }
    }
}

impl std::str::FromStr for Quantity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Quantity::parse(&text).map_err(serde::de::Error::custom),
            Raw::Number(value) => Ok(Quantity::count(value)),
        }
    }
}
