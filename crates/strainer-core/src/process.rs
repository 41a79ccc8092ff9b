//! Filter class declarations and the processing trait.

use crate::composite::CompositeMode;
use crate::context::ExecutionContext;
use crate::environment::RuntimeEnvironment;
use crate::settings::{SettingDecl, SettingError, SettingValue, Settings};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Declaration of a filter class.
///
/// Describes what a filter class is called, which settings it understands
/// and what it requires of its host, without containing the transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecl {
    /// Unique class key, stored with every persisted filter.
    pub class: String,
    /// Default display name for new filters of this class.
    #[serde(default)]
    pub display_name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Declared settings.
    #[serde(default)]
    pub settings: Vec<SettingDecl>,
    /// Host requirements.
    #[serde(default)]
    pub runtime: Option<RuntimeEnvironment>,
    /// Set for the built-in composite classes only.
    #[serde(skip)]
    pub(crate) composite: Option<CompositeMode>,
}

impl FilterDecl {
    /// Create a new filter class declaration.
    pub fn new(class: impl Into<String>) -> Self {
        let class = class.into();
        Self {
            display_name: class.clone(),
            class,
            description: String::new(),
            settings: Vec::new(),
            runtime: None,
            composite: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Declare a setting.
    pub fn setting(mut self, decl: SettingDecl) -> Self {
        self.settings.push(decl);
        self
    }

    pub fn runtime(mut self, env: RuntimeEnvironment) -> Self {
        self.runtime = Some(env);
        self
    }

    pub fn composite_mode(&self) -> Option<CompositeMode> {
        self.composite
    }

    pub fn setting_decl(&self, name: &str) -> Option<&SettingDecl> {
        self.settings.iter().find(|s| s.name == name)
    }

    pub fn setting_names(&self) -> impl Iterator<Item = &str> {
        self.settings.iter().map(|s| s.name.as_str())
    }

    pub fn localized_setting_names(&self) -> impl Iterator<Item = &str> {
        self.settings
            .iter()
            .filter(|s| s.localized)
            .map(|s| s.name.as_str())
    }

    /// Check one setting against this class's declarations.
    pub fn validate_setting(&self, name: &str, value: &SettingValue) -> Result<(), SettingError> {
        let decl = self.setting_decl(name).ok_or_else(|| SettingError::Undeclared {
            class: self.class.clone(),
            setting: name.to_string(),
        })?;

        match (decl.localized, value.is_localized()) {
            (true, false) => Err(SettingError::ExpectedLocalized(name.to_string())),
            (false, true) => Err(SettingError::ExpectedScalar(name.to_string())),
            _ => Ok(()),
        }
    }

    /// Check a whole settings bag, including required settings.
    pub fn validate_settings(&self, settings: &Settings) -> Result<(), SettingError> {
        for (name, value) in settings.iter() {
            self.validate_setting(name, value)?;
        }

        if let Some(missing) = self
            .settings
            .iter()
            .find(|decl| decl.required && !settings.contains(&decl.name))
        {
            return Err(SettingError::Missing {
                class: self.class.clone(),
                setting: missing.name.clone(),
            });
        }

        Ok(())
    }
}

/// Trait for implementing filter classes.
///
/// `process` receives input that already passed the filter's input type
/// check. Returning `None` means "no output"; record why with `errors`.
pub trait Process: Send + Sync {
    /// Get the declaration for this filter class.
    fn decl(&self) -> &FilterDecl;

    /// Transform one input.
    fn process(
        &self,
        input: Value,
        settings: &Settings,
        ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value>;
}
