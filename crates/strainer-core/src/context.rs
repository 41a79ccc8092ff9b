//! Context passed to every filter execution.

use crate::environment::HostEnvironment;

/// Context for executing filters.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The host filters are checked against.
    pub host: HostEnvironment,
    /// Locale used to pick localized settings.
    pub locale: String,
}

impl ExecutionContext {
    /// Create a context for the given host.
    pub fn new(host: HostEnvironment) -> Self {
        Self {
            host,
            locale: "en".to_string(),
        }
    }

    /// Replace the host.
    pub fn with_host(mut self, host: HostEnvironment) -> Self {
        self.host = host;
        self
    }

    /// Set the locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(HostEnvironment::current())
    }
}
