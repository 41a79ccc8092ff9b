//! Filter documents: declarative group and filter definitions.
//!
//! A document lists filter groups and filter trees to install. It can be
//! written as JSON, YAML or TOML:
//!
//! ```yaml
//! groups:
//!   - symbolic: slugify
//!     input: primitive::string
//!     output: primitive::string
//! filters:
//!   - class: sequence
//!     group: slugify
//!     children:
//!       - class: text.trim
//!       - class: text.case
//!         settings: { mode: lower }
//! ```

use crate::filter::{FilterError, PersistableFilter};
use crate::group::{ContextId, FilterGroup};
use crate::registry::{FilterRegistry, RegistryError};
use crate::settings::{SettingError, SettingValue, Settings};
use crate::types::TypeDescription;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A set of groups and filters to install together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterDocument {
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// A filter group definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub symbolic: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub input: TypeDescription,
    pub output: TypeDescription,
}

impl GroupSpec {
    pub fn to_group(&self) -> FilterGroup {
        FilterGroup::new(&self.symbolic, self.input.clone(), self.output.clone())
            .display_name(&self.display_name)
            .description(&self.description)
    }
}

impl From<&FilterGroup> for GroupSpec {
    fn from(group: &FilterGroup) -> Self {
        Self {
            symbolic: group.symbolic.clone(),
            display_name: group.display_name_key.clone(),
            description: group.description_key.clone(),
            input: group.input_type.clone(),
            output: group.output_type.clone(),
        }
    }
}

/// A filter tree definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub class: String,
    /// Group symbolic name. Children without one use their parent's group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub template: bool,
    #[serde(default, skip_serializing_if = "Settings::is_empty")]
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FilterSpec>,
}

/// Errors related to filter documents.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to parse filter document: {0}")]
    Parse(String),

    #[error("filter '{0}' names no group and has no parent to inherit one from")]
    MissingGroup(String),

    #[error("unknown filter group '{0}'")]
    UnknownGroup(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Setting(#[from] SettingError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

impl FilterDocument {
    /// Parse a document from bytes, choosing the format by file extension.
    ///
    /// Documents without a recognized extension are read as YAML.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, DocumentError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());

        Self::from_bytes_format(data, &format)
    }

    /// Parse a document with an explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, DocumentError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| DocumentError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| DocumentError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| DocumentError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| DocumentError::Parse(e.to_string()))
            }
            _ => Err(DocumentError::Parse(format!(
                "Unsupported document format: {}",
                format
            ))),
        }
    }

    /// Serialize the document.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, DocumentError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| DocumentError::Parse(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(|s| s.into_bytes())
                .map_err(|e| DocumentError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(|s| s.into_bytes())
                .map_err(|e| DocumentError::Parse(e.to_string())),
            _ => Err(DocumentError::Parse(format!(
                "Unsupported document format: {}",
                format
            ))),
        }
    }
}

impl FilterSpec {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            group: None,
            display_name: None,
            template: false,
            settings: Settings::new(),
            children: Vec::new(),
        }
    }

    pub fn group(mut self, symbolic: impl Into<String>) -> Self {
        self.group = Some(symbolic.into());
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings = self.settings.with(name, value);
        self
    }

    pub fn child(mut self, child: FilterSpec) -> Self {
        self.children.push(child);
        self
    }

    /// Describe an existing filter tree.
    pub fn from_filter(filter: &PersistableFilter) -> Self {
        Self {
            class: filter.class().to_string(),
            group: Some(filter.group().symbolic.clone()),
            display_name: Some(filter.display_name.clone()),
            template: filter.is_template(),
            settings: filter.settings().clone(),
            children: filter.filters().iter().map(Self::from_filter).collect(),
        }
    }

    /// Settings reshaped to the class's declarations.
    ///
    /// Documents cannot tell an object-valued setting from localized text;
    /// the declaration decides.
    pub fn conformed_settings(&self, registry: &FilterRegistry) -> Result<Settings, DocumentError> {
        let decl = registry
            .get_decl(&self.class)
            .ok_or_else(|| RegistryError::UnknownClass(self.class.clone()))?;

        self.settings
            .iter()
            .map(|(name, value)| -> Result<(String, SettingValue), DocumentError> {
                let setting = decl
                    .setting_decl(name)
                    .ok_or_else(|| SettingError::Undeclared {
                        class: self.class.clone(),
                        setting: name.to_string(),
                    })?;
                Ok((name.to_string(), value.clone().conform(setting)?))
            })
            .filter(|entry| !matches!(entry, Ok((_, value)) if value.is_empty()))
            .collect()
    }

    /// Build the filter tree through the registry.
    ///
    /// `resolve` maps group symbolic names to groups. Children without a
    /// group of their own are placed in their parent's group.
    pub fn instantiate(
        &self,
        registry: &FilterRegistry,
        context_id: ContextId,
        resolve: &impl Fn(&str) -> Option<Arc<FilterGroup>>,
    ) -> Result<PersistableFilter, DocumentError> {
        self.instantiate_under(registry, context_id, resolve, None)
    }

    fn instantiate_under(
        &self,
        registry: &FilterRegistry,
        context_id: ContextId,
        resolve: &impl Fn(&str) -> Option<Arc<FilterGroup>>,
        parent_group: Option<&Arc<FilterGroup>>,
    ) -> Result<PersistableFilter, DocumentError> {
        let group = match (&self.group, parent_group) {
            (Some(symbolic), _) => {
                resolve(symbolic).ok_or_else(|| DocumentError::UnknownGroup(symbolic.clone()))?
            }
            (None, Some(group)) => group.clone(),
            (None, None) => return Err(DocumentError::MissingGroup(self.class.clone())),
        };

        let mut filter = registry.create_in_group(&self.class, group.clone(), context_id)?;
        if let Some(name) = &self.display_name {
            filter.display_name = name.clone();
        }
        filter = filter.template(self.template);
        filter.set_settings(self.conformed_settings(registry)?)?;

        for child in &self.children {
            let child = child.instantiate_under(registry, context_id, resolve, Some(&group))?;
            filter.add_filter(child)?;
        }

        Ok(filter)
    }
}

/// Detect format from file path extension.
fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::SEQUENCE_CLASS;
    use crate::context::ExecutionContext;
    use crate::process::{FilterDecl, Process};
    use crate::settings::SettingDecl;
    use crate::value::Value;

    struct Wrap {
        decl: FilterDecl,
    }

    impl Process for Wrap {
        fn decl(&self) -> &FilterDecl {
            &self.decl
        }

        fn process(
            &self,
            input: Value,
            settings: &Settings,
            ctx: &ExecutionContext,
            _errors: &mut Vec<String>,
        ) -> Option<Value> {
            let template = settings.localized("template", &ctx.locale)?;
            Some(Value::from(template.replace("{}", input.as_str()?)))
        }
    }

    fn registry() -> FilterRegistry {
        let mut registry = FilterRegistry::new();
        registry.register(Wrap {
            decl: FilterDecl::new("wrap")
                .setting(SettingDecl::localized("template").required())
                .setting(SettingDecl::scalar("options")),
        });
        registry
    }

    const YAML: &str = r#"
groups:
  - symbolic: wrap
    display_name: filter.wrap
    input: primitive::string
    output: primitive::string
filters:
  - class: sequence
    group: wrap
    display_name: Double wrap
    children:
      - class: wrap
        settings:
          template: { en: "[{}]", de: "<{}>" }
      - class: wrap
        settings:
          template: { en: "({})" }
          options: { strict: "yes" }
"#;

    fn resolver(doc: &FilterDocument) -> impl Fn(&str) -> Option<Arc<FilterGroup>> + '_ {
        |symbolic| {
            doc.groups
                .iter()
                .find(|g| g.symbolic == symbolic)
                .map(|g| Arc::new(g.to_group()))
        }
    }

    #[test]
    fn test_parse_yaml_document() {
        let doc = FilterDocument::from_bytes(YAML.as_bytes(), Some("filters.yaml")).unwrap();
        assert_eq!(doc.groups.len(), 1);
        assert_eq!(doc.groups[0].input, "primitive::string".parse().unwrap());
        assert_eq!(doc.filters[0].class, SEQUENCE_CLASS);
        assert_eq!(doc.filters[0].children.len(), 2);
    }

    #[test]
    fn test_instantiate_tree() {
        let doc = FilterDocument::from_bytes(YAML.as_bytes(), None).unwrap();
        let registry = registry();

        let mut filter = doc.filters[0]
            .instantiate(&registry, ContextId(1), &resolver(&doc))
            .unwrap();
        assert_eq!(filter.display_name, "Double wrap");
        assert_eq!(filter.filters().len(), 2);
        assert_eq!(filter.filters()[1].group().symbolic, "wrap");

        // Object-valued scalar settings are not mistaken for localized text.
        let options = filter.filters()[1].settings().get("options").unwrap();
        assert!(!options.is_localized());

        let ctx = ExecutionContext::default().with_locale("de");
        let out = filter.execute(&ctx, Value::from("x")).unwrap();
        assert_eq!(out, Some(Value::from("(<x>)")));
    }

    #[test]
    fn test_instantiate_errors() {
        let registry = registry();
        let doc = FilterDocument::default();
        let resolve = resolver(&doc);

        let err = FilterSpec::new("wrap")
            .instantiate(&registry, ContextId::SITE, &resolve)
            .unwrap_err();
        assert!(matches!(err, DocumentError::MissingGroup(class) if class == "wrap"));

        let err = FilterSpec::new("wrap")
            .group("nope")
            .instantiate(&registry, ContextId::SITE, &resolve)
            .unwrap_err();
        assert!(matches!(err, DocumentError::UnknownGroup(g) if g == "nope"));
    }

    #[test]
    fn test_undeclared_setting_rejected() {
        let doc = FilterDocument::from_bytes(YAML.as_bytes(), None).unwrap();
        let spec = FilterSpec::new("wrap")
            .group("wrap")
            .setting("colour", "red");

        let err = spec
            .instantiate(&registry(), ContextId::SITE, &resolver(&doc))
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Setting(SettingError::Undeclared { .. })
        ));
    }

    #[test]
    fn test_from_filter_describes_tree() {
        let doc = FilterDocument::from_bytes(YAML.as_bytes(), None).unwrap();
        let filter = doc.filters[0]
            .instantiate(&registry(), ContextId::SITE, &resolver(&doc))
            .unwrap();

        let spec = FilterSpec::from_filter(&filter);
        assert_eq!(spec.group.as_deref(), Some("wrap"));
        assert_eq!(spec.children.len(), 2);
        assert!(matches!(
            spec.children[0].settings.get("template"),
            Some(SettingValue::Localized(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let doc = FilterDocument::from_bytes(YAML.as_bytes(), None).unwrap();
        let bytes = doc.to_bytes("json").unwrap();
        let parsed = FilterDocument::from_bytes(&bytes, Some("doc.json")).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            FilterDocument::from_bytes_format(b"", "xml"),
            Err(DocumentError::Parse(_))
        ));
    }
}
