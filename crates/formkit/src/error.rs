//! Error types for formkit.
//!
//! These cover programmer errors (bad schemas, undecodable reads). Validation
//! outcomes are not errors; they are stored on fields as [`FieldError`] data.
//!
//! [`FieldError`]: crate::validation::FieldError

use thiserror::Error;

/// Result type alias for formkit operations.
pub type Result<T> = std::result::Result<T, FormError>;

/// Errors that can occur while building or reading forms.
#[derive(Debug, Error)]
pub enum FormError {
    /// A field was declared without any validator.
    #[error("'{field}' needs a validator")]
    MissingValidator { field: String },

    /// The same field name was declared twice in one schema.
    #[error("duplicate field: {0}")]
    DuplicateField(String),

    /// Two fields asked for the same iteration slot.
    #[error("field '{field}' requests index {index}, which is already taken")]
    DuplicateIndex { field: String, index: usize },

    /// Lookup of a field name the form does not declare.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// A field's raw value does not decode into the requested type.
    #[error("invalid value at {field}: {source}")]
    Decode {
        field: String,
        #[source]
        source: serde_json::Error,
    },

    /// Data handed to the form is not a key/value object.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
