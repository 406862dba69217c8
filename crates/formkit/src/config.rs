//! Form configuration.

use serde::{Deserialize, Serialize};

/// Form-level validation policy.
///
/// Callbacks are installed on the builder, not here, so this stays plain
/// data that can be loaded from any serde format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Abort a validation pass at the first failing field.
    pub stop_on_error: bool,

    /// Collect every failing validator's message instead of the first one.
    pub multiple_errors: bool,
}

impl FormConfig {
    /// Stop validating at the first failing field.
    #[must_use]
    pub const fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Report every failing validator per field.
    #[must_use]
    pub const fn with_multiple_errors(mut self, multiple: bool) -> Self {
        self.multiple_errors = multiple;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_missing() {
        let config: FormConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, FormConfig::default());

        let config: FormConfig = serde_json::from_value(json!({ "stop_on_error": true })).unwrap();
        assert!(config.stop_on_error);
        assert!(!config.multiple_errors);
    }

    #[test]
    fn test_builder_helpers() {
        let config = FormConfig::default()
            .with_stop_on_error(true)
            .with_multiple_errors(true);
        assert!(config.stop_on_error && config.multiple_errors);
    }
}
