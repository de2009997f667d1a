//! Upload settings
//!
//! A [`Settings`] value is a map restricted to the options the upload endpoints
//! understand. Every assignment is checked against the option's type and allowed
//! range; a rejected assignment leaves the map exactly as it was.
//!
//! ```
//! use astrometry_client::settings::{ScaleUnit, Settings};
//!
//! let mut settings = Settings::new();
//! settings.set("parity", 2).unwrap();
//! settings.set_scale_range(10.0, 20.0, ScaleUnit::ArcminWidth).unwrap();
//!
//! assert!(settings.set("center_dec", 95.0).is_err());
//! assert_eq!(settings.len(), 5);
//! ```

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single setting value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "boolean",
            SettingValue::Int(_) => "integer",
            SettingValue::Float(_) => "float",
            SettingValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<u32> for SettingValue {
    fn from(value: u32) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ValueType {
    Bool,
    Int,
    Float,
    Text,
}

impl ValueType {
    fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::Float => "float",
            ValueType::Text => "text",
        }
    }
}

struct SettingRule {
    name: &'static str,
    ty: ValueType,
    check: fn(&SettingValue) -> bool,
}

const fn rule(name: &'static str, ty: ValueType, check: fn(&SettingValue) -> bool) -> SettingRule {
    SettingRule { name, ty, check }
}

fn any(_: &SettingValue) -> bool {
    true
}

fn text_in(value: &SettingValue, allowed: &[&str]) -> bool {
    matches!(value, SettingValue::Text(s) if allowed.contains(&s.as_str()))
}

fn float_where(value: &SettingValue, pred: impl Fn(f64) -> bool) -> bool {
    matches!(value, SettingValue::Float(x) if pred(*x))
}

static SETTINGS: &[SettingRule] = &[
    rule(
        "allow_commercial_use",
        ValueType::Text,
        |v| text_in(v, &["d", "y", "n"]),
    ),
    rule(
        "allow_modifications",
        ValueType::Text,
        |v| text_in(v, &["d", "y", "n", "sa"]),
    ),
    rule(
        "publicly_visible",
        ValueType::Text,
        |v| text_in(v, &["y", "n"]),
    ),
    rule(
        "scale_units",
        ValueType::Text,
        |v| text_in(v, &["degwidth", "arcminwidth", "arcsecperpix"]),
    ),
    rule(
        "scale_type",
        ValueType::Text,
        |v| text_in(v, &["ul", "ev"]),
    ),
    rule("scale_lower", ValueType::Float, any),
    rule("scale_upper", ValueType::Float, any),
    rule("scale_est", ValueType::Float, any),
    rule(
        "scale_err",
        ValueType::Float,
        |v| float_where(v, |x| (0.0..=100.0).contains(&x)),
    ),
    rule(
        "center_ra",
        ValueType::Float,
        |v| float_where(v, |x| (0.0..=360.0).contains(&x)),
    ),
    rule(
        "center_dec",
        ValueType::Float,
        |v| float_where(v, |x| (-90.0..=90.0).contains(&x)),
    ),
    rule("radius", ValueType::Float, any),
    rule(
        "downsample_factor",
        ValueType::Float,
        |v| float_where(v, |x| x > 1.0),
    ),
    rule("tweak_order", ValueType::Int, any),
    rule("use_sextractor", ValueType::Bool, any),
    rule("crpix_center", ValueType::Bool, any),
    rule(
        "parity",
        ValueType::Int,
        |v| matches!(v, SettingValue::Int(0..=2)),
    ),
    rule("image_width", ValueType::Int, any),
    rule("image_height", ValueType::Int, any),
    rule("positional_error", ValueType::Float, any),
];

/// Names of every recognized setting
pub fn setting_names() -> impl Iterator<Item = &'static str> {
    SETTINGS.iter().map(|s| s.name)
}

fn find_rule(key: &str) -> Result<&'static SettingRule, SettingsError> {
    SETTINGS
        .iter()
        .find(|s| s.name == key)
        .ok_or_else(|| SettingsError::UnknownKey {
            key: key.to_string(),
        })
}

fn validate(key: &str, value: SettingValue) -> Result<(&'static str, SettingValue), SettingsError> {
    let rule = find_rule(key)?;

    let value = match (rule.ty, value) {
        (ValueType::Float, SettingValue::Int(i)) => SettingValue::Float(i as f64),
        (ValueType::Float, SettingValue::Float(x)) if !x.is_finite() => {
            return Err(SettingsError::OutOfRange {
                key: rule.name,
                value: x.to_string(),
            });
        }
        (ty, value) if ty.name() != value.type_name() => {
            return Err(SettingsError::WrongType {
                key: rule.name,
                expected: ty.name(),
                actual: value.type_name(),
            });
        }
        (_, value) => value,
    };

    if !(rule.check)(&value) {
        return Err(SettingsError::OutOfRange {
            key: rule.name,
            value: value.to_string(),
        });
    }

    Ok((rule.name, value))
}

/// Unit for the field-size hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleUnit {
    /// Width of the field in degrees
    #[serde(rename = "degwidth")]
    DegWidth,
    /// Width of the field in arcminutes
    #[default]
    #[serde(rename = "arcminwidth")]
    ArcminWidth,
    /// Pixel scale in arcseconds per pixel
    #[serde(rename = "arcsecperpix")]
    ArcsecPerPix,
}

impl ScaleUnit {
    /// Wire name of the unit
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleUnit::DegWidth => "degwidth",
            ScaleUnit::ArcminWidth => "arcminwidth",
            ScaleUnit::ArcsecPerPix => "arcsecperpix",
        }
    }
}

/// Validated upload settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, serde_json::Value>")]
pub struct Settings {
    values: BTreeMap<&'static str, SettingValue>,
}

impl Settings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign one setting
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] for unknown keys, wrong types and out-of-range values.
    /// The map is unchanged in that case.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> Result<(), SettingsError> {
        let (name, value) = validate(key, value.into())?;
        self.values.insert(name, value);
        Ok(())
    }

    /// Assign several settings at once; either all are written or none
    pub fn set_all<I, K, V>(&mut self, pairs: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<SettingValue>,
    {
        let validated = pairs
            .into_iter()
            .map(|(k, v)| validate(k.as_ref(), v.into()))
            .collect::<Result<Vec<_>, _>>()?;
        self.values.extend(validated);
        Ok(())
    }

    /// Look up a setting
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Remove a setting, returning its old value
    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    /// Number of settings present
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no setting is present
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (name, value) pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Overlay `other` on top of these settings (values in `other` win)
    pub fn merge(&mut self, other: &Settings) {
        self.values
            .extend(other.values.iter().map(|(k, v)| (*k, v.clone())));
    }

    /// Copy of these settings with `other` overlaid
    pub fn merged(&self, other: &Settings) -> Settings {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Describe the field size as a `lower..upper` range
    ///
    /// Incompatible with [`set_scale_estimate`](Self::set_scale_estimate); the last call wins
    /// for `scale_type`.
    pub fn set_scale_range(
        &mut self,
        lower: f64,
        upper: f64,
        unit: ScaleUnit,
    ) -> Result<(), SettingsError> {
        self.set_all([
            ("scale_lower", SettingValue::Float(lower)),
            ("scale_upper", SettingValue::Float(upper)),
            ("scale_units", unit.as_str().into()),
            ("scale_type", "ul".into()),
        ])
    }

    /// Describe the field size as an estimate with a percentage error
    pub fn set_scale_estimate(
        &mut self,
        estimate: f64,
        error: f64,
        unit: ScaleUnit,
    ) -> Result<(), SettingsError> {
        self.set_all([
            ("scale_est", SettingValue::Float(estimate)),
            ("scale_err", SettingValue::Float(error)),
            ("scale_units", unit.as_str().into()),
            ("scale_type", "ev".into()),
        ])
    }

    /// JSON object form, as merged into the `request-json` payload
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    SettingValue::Bool(b) => serde_json::Value::from(*b),
                    SettingValue::Int(i) => serde_json::Value::from(*i),
                    SettingValue::Float(x) => serde_json::Value::from(*x),
                    SettingValue::Text(s) => serde_json::Value::from(s.as_str()),
                };
                (k.to_string(), value)
            })
            .collect()
    }
}

impl Serialize for Settings {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.values.serialize(serializer)
    }
}

impl TryFrom<BTreeMap<String, serde_json::Value>> for Settings {
    type Error = SettingsError;

    fn try_from(raw: BTreeMap<String, serde_json::Value>) -> Result<Self, Self::Error> {
        let mut pairs = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let value = match value {
                serde_json::Value::Bool(b) => SettingValue::Bool(b),
                serde_json::Value::String(s) => SettingValue::Text(s),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => SettingValue::Int(i),
                    None => SettingValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                _ => {
                    let rule = find_rule(&key)?;
                    return Err(SettingsError::WrongType {
                        key: rule.name,
                        expected: rule.ty.name(),
                        actual: "json",
                    });
                }
            };
            pairs.push((key, value));
        }

        let mut settings = Settings::new();
        settings.set_all(pairs)?;
        Ok(settings)
    }
}
