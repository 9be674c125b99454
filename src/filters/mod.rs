//! Filter parameters and filter chains
//!
//! `FilterParameters` is the persisted, user-adjustable record.
//! `FilterChain` is its drawing-surface form, written and read in the
//! CSS filter syntax (`grayscale(100%) blur(0.7px) brightness(1.2) contrast(1.15)`).

mod store;

pub use store::{FilterController, FilterStore, FILTERS_KEY};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One adjustable field of the filter record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// Percent, 0 to 100
    Grayscale,
    /// Gaussian radius in pixels
    Blur,
    /// Multiplier
    Brightness,
    /// Multiplier
    Contrast,
}

impl FilterField {
    pub const ALL: [FilterField; 4] = [
        FilterField::Grayscale,
        FilterField::Blur,
        FilterField::Brightness,
        FilterField::Contrast,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterField::Grayscale => "grayscale",
            FilterField::Blur => "blur",
            FilterField::Brightness => "brightness",
            FilterField::Contrast => "contrast",
        }
    }

    /// Check that `value` is a finite number inside this field's range
    pub fn validate(&self, value: f64) -> Result<f64> {
        let in_range = match self {
            FilterField::Grayscale => (0.0..=100.0).contains(&value),
            _ => value >= 0.0,
        };
        if value.is_finite() && in_range {
            Ok(value)
        } else {
            Err(Error::InvalidFilterValue {
                field: self.name().to_string(),
                value: value.to_string(),
            })
        }
    }

    /// Parse raw control input (e.g. a slider's string value)
    pub fn parse_value(&self, raw: &str) -> Result<f64> {
        let value: f64 = raw.trim().parse().map_err(|_| Error::InvalidFilterValue {
            field: self.name().to_string(),
            value: raw.to_string(),
        })?;
        self.validate(value)
    }
}

impl FromStr for FilterField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "grayscale" | "greyscale" => Ok(FilterField::Grayscale),
            "blur" => Ok(FilterField::Blur),
            "brightness" => Ok(FilterField::Brightness),
            "contrast" => Ok(FilterField::Contrast),
            _ => Err(Error::UnknownFilterField(s.to_string())),
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The persisted filter record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    pub grayscale: f64,
    pub blur: f64,
    pub brightness: f64,
    pub contrast: f64,
}

impl FilterParameters {
    pub const DEFAULT: Self = Self {
        grayscale: 100.0,
        blur: 0.7,
        brightness: 1.2,
        contrast: 1.15,
    };

    /// Neutral record: draws the source unchanged
    pub const IDENTITY: Self = Self {
        grayscale: 0.0,
        blur: 0.0,
        brightness: 1.0,
        contrast: 1.0,
    };

    pub fn get(&self, field: FilterField) -> f64 {
        match field {
            FilterField::Grayscale => self.grayscale,
            FilterField::Blur => self.blur,
            FilterField::Brightness => self.brightness,
            FilterField::Contrast => self.contrast,
        }
    }

    /// Copy of this record with one field replaced, validated
    pub fn with(mut self, field: FilterField, value: f64) -> Result<Self> {
        let value = field.validate(value)?;
        match field {
            FilterField::Grayscale => self.grayscale = value,
            FilterField::Blur => self.blur = value,
            FilterField::Brightness => self.brightness = value,
            FilterField::Contrast => self.contrast = value,
        }
        Ok(self)
    }

    /// Decode a persisted record, substituting defaults field by field
    ///
    /// Returns the record and whether anything had to be repaired. Numbers
    /// stored as strings are accepted.
    pub fn from_json_lenient(raw: &str) -> (Self, bool) {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return (Self::DEFAULT, true),
        };
        let Some(object) = value.as_object() else {
            return (Self::DEFAULT, true);
        };

        let mut params = Self::DEFAULT;
        let mut repaired = false;
        for field in FilterField::ALL {
            let parsed = match object.get(field.name()) {
                Some(serde_json::Value::Number(n)) => n.as_f64(),
                Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed.and_then(|v| params.with(field, v).ok()) {
                Some(updated) => params = updated,
                None => repaired = true,
            }
        }
        (params, repaired)
    }

    /// Filter chain in drawing order
    pub fn chain(&self) -> FilterChain {
        FilterChain(vec![
            FilterOp::Grayscale(self.grayscale),
            FilterOp::Blur(self.blur),
            FilterOp::Brightness(self.brightness),
            FilterOp::Contrast(self.contrast),
        ])
    }

    /// CSS filter string for the drawing surface
    pub fn to_filter_string(&self) -> String {
        self.chain().to_string()
    }
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A single image adjustment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOp {
    /// Percent toward full grayscale
    Grayscale(f64),
    /// Gaussian standard deviation in pixels
    Blur(f64),
    /// Linear multiplier
    Brightness(f64),
    /// Multiplier around mid-grey
    Contrast(f64),
}

impl FilterOp {
    /// True when applying this op leaves pixels unchanged
    pub fn is_identity(&self) -> bool {
        match *self {
            FilterOp::Grayscale(p) => p <= 0.0,
            FilterOp::Blur(px) => px <= 0.0,
            FilterOp::Brightness(v) | FilterOp::Contrast(v) => v == 1.0,
        }
    }

    fn parse(token: &str) -> Result<Self> {
        let syntax = || Error::FilterSyntax(token.to_string());
        let open = token.find('(').ok_or_else(syntax)?;
        let arg = token[open + 1..].strip_suffix(')').ok_or_else(syntax)?.trim();
        let name = token[..open].trim().to_lowercase();

        // Numbers and percentages; percent is normalised to a fraction.
        let number = |arg: &str| -> Result<f64> {
            let v = match arg.strip_suffix('%') {
                Some(p) => p.trim().parse::<f64>().map(|v| v / 100.0),
                None => arg.parse::<f64>(),
            }
            .map_err(|_| syntax())?;
            if v.is_finite() && v >= 0.0 {
                Ok(v)
            } else {
                Err(syntax())
            }
        };

        match name.as_str() {
            "grayscale" => Ok(FilterOp::Grayscale((number(arg)? * 100.0).min(100.0))),
            "brightness" => Ok(FilterOp::Brightness(number(arg)?)),
            "contrast" => Ok(FilterOp::Contrast(number(arg)?)),
            "blur" => {
                let px = match arg.strip_suffix("px") {
                    Some(v) => v.trim().parse::<f64>().map_err(|_| syntax())?,
                    None if arg.parse::<f64>() == Ok(0.0) => 0.0,
                    None => return Err(syntax()),
                };
                if px.is_finite() && px >= 0.0 {
                    Ok(FilterOp::Blur(px))
                } else {
                    Err(syntax())
                }
            }
            _ => Err(syntax()),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Grayscale(p) => write!(f, "grayscale({}%)", p),
            FilterOp::Blur(px) => write!(f, "blur({}px)", px),
            FilterOp::Brightness(v) => write!(f, "brightness({})", v),
            FilterOp::Contrast(v) => write!(f, "contrast({})", v),
        }
    }
}

/// Ordered list of adjustments applied to everything drawn
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterChain(pub Vec<FilterOp>);

impl FilterChain {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn ops(&self) -> &[FilterOp] {
        &self.0
    }

    /// True when drawing through this chain changes nothing
    pub fn is_identity(&self) -> bool {
        self.0.iter().all(FilterOp::is_identity)
    }
}

impl FromStr for FilterChain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }

        let mut ops = Vec::new();
        let mut rest = s;
        while !rest.is_empty() {
            let close = rest
                .find(')')
                .ok_or_else(|| Error::FilterSyntax(rest.to_string()))?;
            ops.push(FilterOp::parse(&rest[..=close])?);
            rest = rest[close + 1..].trim_start();
        }
        Ok(Self(ops))
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        for (i, op) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", op)?;
        }
        Ok(())
    }
}
