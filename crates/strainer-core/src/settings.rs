//! Declared, typed filter settings.
//!
//! Every filter class declares the settings it understands. A setting is
//! either a plain [`Value`] or a piece of localized text keyed by locale.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Declaration of one setting a filter class understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingDecl {
    pub name: String,
    /// Translation key for the setting's label.
    #[serde(default)]
    pub display_key: String,
    /// Localized settings hold one text per locale.
    #[serde(default)]
    pub localized: bool,
    /// Required settings must be present before a filter is persisted.
    #[serde(default)]
    pub required: bool,
}

impl SettingDecl {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_key: String::new(),
            localized: false,
            required: false,
        }
    }

    pub fn localized(name: impl Into<String>) -> Self {
        Self {
            localized: true,
            ..Self::scalar(name)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn display_key(mut self, key: impl Into<String>) -> Self {
        self.display_key = key.into();
        self
    }

    /// Check that a value has the shape this declaration expects.
    pub fn accepts(&self, value: &SettingValue) -> bool {
        self.localized == value.is_localized()
    }
}

/// A setting value.
///
/// Documents write localized text as a map of locale to string, so the
/// untagged form tries that first; [`SettingValue::conform`] turns a map
/// back into a scalar object when the declaration is not localized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Localized(IndexMap<String, String>),
    Scalar(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingError {
    #[error("setting '{setting}' is not declared by filter class '{class}'")]
    Undeclared { class: String, setting: String },

    #[error("setting '{0}' expects localized text")]
    ExpectedLocalized(String),

    #[error("setting '{0}' expects a plain value, not localized text")]
    ExpectedScalar(String),

    #[error("required setting '{setting}' of filter class '{class}' is missing")]
    Missing { class: String, setting: String },
}

impl SettingValue {
    pub fn is_localized(&self) -> bool {
        matches!(self, SettingValue::Localized(_))
    }

    /// A localized value with no locales. It carries no text and is treated
    /// as an absent setting.
    pub fn is_empty(&self) -> bool {
        matches!(self, SettingValue::Localized(texts) if texts.is_empty())
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            SettingValue::Scalar(value) => Some(value),
            SettingValue::Localized(_) => None,
        }
    }

    pub fn as_localized(&self) -> Option<&IndexMap<String, String>> {
        match self {
            SettingValue::Localized(texts) => Some(texts),
            SettingValue::Scalar(_) => None,
        }
    }

    /// Reshape a value to fit its declaration where that is lossless.
    pub fn conform(self, decl: &SettingDecl) -> Result<Self, SettingError> {
        match (self, decl.localized) {
            (SettingValue::Localized(texts), false) => Ok(SettingValue::Scalar(Value::Object(
                texts.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
            ))),
            (SettingValue::Scalar(_), true) => Err(SettingError::ExpectedLocalized(decl.name.clone())),
            (value, _) => Ok(value),
        }
    }
}

impl From<Value> for SettingValue {
    fn from(value: Value) -> Self {
        SettingValue::Scalar(value)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Scalar(Value::from(s))
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Scalar(Value::from(s))
    }
}

impl From<i64> for SettingValue {
    fn from(n: i64) -> Self {
        SettingValue::Scalar(Value::from(n))
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Scalar(Value::from(b))
    }
}

/// The settings bag of one filter.
///
/// Equality ignores insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(IndexMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for tests and candidate comparisons.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// A scalar setting's value.
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(SettingValue::as_scalar)
    }

    /// A scalar string setting.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.scalar(name).and_then(Value::as_str)
    }

    /// Localized text for `locale`, falling back to the first stored locale.
    pub fn localized(&self, name: &str, locale: &str) -> Option<&str> {
        let texts = self.get(name).and_then(SettingValue::as_localized)?;
        texts
            .get(locale)
            .or_else(|| texts.values().next())
            .map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SettingValue) -> Option<SettingValue> {
        self.0.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<SettingValue> {
        self.0.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, SettingValue)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
