//! Standard filters for Strainer.
//!
//! Small, generic text and number transformations that are useful on their
//! own and as building blocks inside sequences and multiplexers.
//!
//! | Class             | Settings                          |
//! |-------------------|-----------------------------------|
//! | `text.trim`       |                                   |
//! | `text.case`       | `mode` (`upper` or `lower`)       |
//! | `text.split`      | `separator` (default `,`)         |
//! | `text.join`       | `separator` (default `,`)         |
//! | `text.format`     | `template` (localized, `{}` slot) |
//! | `number.parse-int`| `radix` (default 10)              |

use std::sync::OnceLock;
use strainer_core::{
    ExecutionContext, FilterDecl, FilterRegistry, Process, SettingDecl, Settings, Value,
};

/// Register all standard filters with the registry.
pub fn register_all(registry: &mut FilterRegistry) {
    registry.register(Trim);
    registry.register(Case);
    registry.register(Split);
    registry.register(Join);
    registry.register(Format);
    registry.register(ParseInt);
}

const DEFAULT_SEPARATOR: &str = ",";

fn separator(settings: &Settings) -> &str {
    settings.str("separator").unwrap_or(DEFAULT_SEPARATOR)
}

fn expect_str<'v>(value: &'v Value, class: &str, errors: &mut Vec<String>) -> Option<&'v str> {
    let s = value.as_str();
    if s.is_none() {
        errors.push(format!("{class}: expected a string, got {}", value.kind()));
    }
    s
}

// ============================================
// Text
// ============================================

/// Strip leading and trailing whitespace.
pub struct Trim;

impl Process for Trim {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("text.trim")
                .display_name("Trim")
                .description("Strip leading and trailing whitespace")
        })
    }

    fn process(
        &self,
        input: Value,
        _settings: &Settings,
        _ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value> {
        let s = expect_str(&input, "text.trim", errors)?;
        Some(Value::from(s.trim()))
    }
}

/// Convert text to upper or lower case.
pub struct Case;

impl Process for Case {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("text.case")
                .display_name("Change case")
                .description("Convert text to upper or lower case")
                .setting(SettingDecl::scalar("mode").required())
        })
    }

    fn process(
        &self,
        input: Value,
        settings: &Settings,
        _ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value> {
        let s = expect_str(&input, "text.case", errors)?;
        match settings.str("mode") {
            Some("upper") => Some(Value::from(s.to_uppercase())),
            Some("lower") => Some(Value::from(s.to_lowercase())),
            other => {
                errors.push(format!(
                    "text.case: unknown mode {:?}, expected \"upper\" or \"lower\"",
                    other.unwrap_or_default()
                ));
                None
            }
        }
    }
}

/// Split text into an array of strings.
pub struct Split;

impl Process for Split {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("text.split")
                .display_name("Split")
                .description("Split text on a separator")
                .setting(SettingDecl::scalar("separator"))
        })
    }

    fn process(
        &self,
        input: Value,
        settings: &Settings,
        _ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value> {
        let s = expect_str(&input, "text.split", errors)?;
        let sep = separator(settings);
        if sep.is_empty() {
            errors.push("text.split: separator must not be empty".into());
            return None;
        }
        Some(Value::Array(s.split(sep).map(Value::from).collect()))
    }
}

/// Join an array of strings.
pub struct Join;

impl Process for Join {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("text.join")
                .display_name("Join")
                .description("Join an array of strings with a separator")
                .setting(SettingDecl::scalar("separator"))
        })
    }

    fn process(
        &self,
        input: Value,
        settings: &Settings,
        _ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value> {
        let Some(items) = input.as_array() else {
            errors.push(format!("text.join: expected an array, got {}", input.kind()));
            return None;
        };

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(expect_str(item, "text.join", errors)?);
        }
        Some(Value::from(parts.join(separator(settings))))
    }
}

/// Substitute the input into a localized template.
///
/// The first `{}` in the template is replaced by the input, rendered as
/// text. The template is chosen by the execution context's locale.
pub struct Format;

impl Process for Format {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("text.format")
                .display_name("Format")
                .description("Substitute the input into a localized template")
                .setting(SettingDecl::localized("template").required())
        })
    }

    fn process(
        &self,
        input: Value,
        settings: &Settings,
        ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value> {
        let Some(template) = settings.localized("template", &ctx.locale) else {
            errors.push("text.format: no template configured".into());
            return None;
        };

        let text = match &input {
            Value::String(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                errors.push(format!("text.format: cannot format {}", other.kind()));
                return None;
            }
        };
        Some(Value::from(template.replacen("{}", &text, 1)))
    }
}

// ============================================
// Numbers
// ============================================

/// Parse text as an integer.
pub struct ParseInt;

impl Process for ParseInt {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("number.parse-int")
                .display_name("Parse integer")
                .description("Parse text as an integer")
                .setting(SettingDecl::scalar("radix"))
        })
    }

    fn process(
        &self,
        input: Value,
        settings: &Settings,
        _ctx: &ExecutionContext,
        errors: &mut Vec<String>,
    ) -> Option<Value> {
        let s = expect_str(&input, "number.parse-int", errors)?;
        let radix = match settings.scalar("radix").map(Value::as_i64) {
            None => 10,
            Some(Some(r @ 2..=36)) => r as u32,
            Some(_) => {
                errors.push("number.parse-int: radix must be an integer from 2 to 36".into());
                return None;
            }
        };

        match i64::from_str_radix(s.trim(), radix) {
            Ok(n) => Some(Value::Int(n)),
            Err(e) => {
                errors.push(format!("number.parse-int: cannot parse {s:?}: {e}"));
                None
            }
        }
    }
}
