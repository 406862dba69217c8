//! formkit: reactive form state.
//!
//! This crate provides:
//! - `Field`: one input's value history, validation error and hooks
//! - `Form`: a fixed set of named fields with batched change/error notification
//! - `Validator` and `FieldError`: the validation seam and its outcome

pub mod config;
pub mod error;
pub mod field;
pub mod form;
mod notify;
pub mod validation;

pub use config::FormConfig;
pub use error::{FormError, Result};
pub use field::{Field, FieldBuilder, FieldChangeHandler, FieldErrorHandler};
pub use form::{ChangeHandler, Data, ErrorHandler, Errors, FieldMut, Form, FormBuilder};
pub use validation::{Context, FieldError, Validator};
