//! Field model: one named input with value history, a validation error, and
//! change/error hooks.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{FormError, Result};
use crate::form::Data;
use crate::notify::{resume_panic, Debounce, Detached, Upstream};
use crate::validation::{run_validators, Context, FieldError, Validator};

type ModifyFn = Box<dyn Fn(Value, &Value) -> Value>;
type CleanFn = Box<dyn Fn(&Value) -> Value>;
type DecorateFn = Box<dyn Fn(&Value, &Value) -> Value>;
type DecodeCheck = fn(&Value) -> std::result::Result<(), serde_json::Error>;

/// Called with the current value after a change notification fires.
pub type FieldChangeHandler = Box<dyn FnMut(&Value, &Field)>;
/// Called with the stored error after it changes.
pub type FieldErrorHandler = Box<dyn FnMut(Option<&FieldError>, &Field)>;

/// State of a single form input.
///
/// `current` is only ever replaced through the write path. `previous` holds
/// the value from before the last write and `initial` the pristine baseline.
pub struct Field {
    name: String,
    initial: Value,
    previous: Value,
    current: Value,
    error: Option<FieldError>,
    validators: Vec<Box<dyn Validator>>,
    decode_check: Option<DecodeCheck>,
    modify: Option<ModifyFn>,
    clean: Option<CleanFn>,
    decorate: Option<DecorateFn>,
    debounce: Option<Debounce>,
    index: Option<usize>,
    multiple_errors: bool,
    on_change: Option<FieldChangeHandler>,
    on_error: Option<FieldErrorHandler>,
}

impl Field {
    /// Start declaring a field.
    #[must_use]
    pub fn builder() -> FieldBuilder {
        FieldBuilder::default()
    }

    /// Name the field was declared under; empty for a standalone field.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.current
    }

    /// Value before the last write.
    #[must_use]
    pub const fn previous_value(&self) -> &Value {
        &self.previous
    }

    /// Pristine baseline that `reset` returns to.
    #[must_use]
    pub const fn initial_value(&self) -> &Value {
        &self.initial
    }

    /// Decode the current value into `T`.
    ///
    /// # Errors
    /// Returns `FormError::Decode` if the raw value does not fit `T`.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.current).map_err(|source| FormError::Decode {
            field: self.name.clone(),
            source,
        })
    }

    /// Exportable value: the clean transform applied to the current value.
    #[must_use]
    pub fn clean_data(&self) -> Value {
        self.clean
            .as_ref()
            .map_or_else(|| self.current.clone(), |clean| clean(&self.current))
    }

    /// Presentation value. Never stored.
    #[must_use]
    pub fn display(&self) -> Value {
        self.decorate.as_ref().map_or_else(
            || self.current.clone(),
            |decorate| decorate(&self.current, &self.previous),
        )
    }

    /// Stored validation error.
    #[must_use]
    pub const fn error(&self) -> Option<&FieldError> {
        self.error.as_ref()
    }

    /// True when the last write moved the value away from what it was.
    ///
    /// This compares against the value captured at the last write, not the
    /// pristine baseline: writing a field away and then back to its initial
    /// content leaves it dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.previous != self.current
    }

    /// Ordering override requested at declaration.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        self.index
    }

    /// Debounce window for change notifications, if any.
    #[must_use]
    pub fn debounce(&self) -> Option<Duration> {
        self.debounce.as_ref().map(Debounce::interval)
    }

    /// When a debounced change notification is due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.as_ref().and_then(Debounce::deadline)
    }

    /// True while a debounced change notification is waiting.
    #[must_use]
    pub fn has_pending_change(&self) -> bool {
        self.deadline().is_some()
    }

    /// Replace the change hook.
    pub fn on_change<F>(&mut self, handler: F)
    where
        F: FnMut(&Value, &Self) + 'static,
    {
        self.on_change = Some(Box::new(handler));
    }

    /// Replace the error hook.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: FnMut(Option<&FieldError>, &Self) + 'static,
    {
        self.on_error = Some(Box::new(handler));
    }

    /// Write a value. No-op when `value` equals the current content.
    pub fn set_value(&mut self, value: impl Into<Value>, skip_trigger: bool) {
        self.set_value_at(value, skip_trigger, Instant::now());
    }

    /// [`set_value`](Self::set_value) with an explicit clock for debouncing.
    pub fn set_value_at(&mut self, value: impl Into<Value>, skip_trigger: bool, now: Instant) {
        self.write(value.into(), skip_trigger, now, &mut Detached);
    }

    /// Compute the current error without storing it.
    #[must_use]
    pub fn check(&self) -> Option<FieldError> {
        self.check_in(&Data::new())
    }

    /// Validate and attach the result as the stored error.
    pub fn validate(&mut self) -> bool {
        self.validate_in(&Data::new(), &mut Detached)
    }

    /// Validate without touching the stored error.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.check().is_none()
    }

    /// Store an error. No-op when it equals the stored one.
    pub fn set_error(&mut self, error: Option<FieldError>, skip_trigger: bool) {
        self.set_error_in(error, skip_trigger, &mut Detached);
    }

    /// Pin the current value as the baseline and clear the error.
    pub fn make_pristine(&mut self) {
        self.make_pristine_in(&mut Detached);
    }

    /// Write the baseline back and make the field pristine.
    pub fn reset(&mut self) {
        self.reset_in(&mut Detached);
    }

    /// Write then validate, returning the resulting error.
    pub fn set_and_validate(&mut self, value: impl Into<Value>) -> Option<FieldError> {
        self.set_value(value, false);
        self.validate();
        self.error.clone()
    }

    /// Fire a due debounced change notification.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    /// [`tick`](Self::tick) with an explicit clock.
    pub fn tick_at(&mut self, now: Instant) -> bool {
        self.tick_in(now, &mut Detached)
    }

    // Upstream-aware operations, shared by standalone use and `FieldMut`.

    pub(crate) fn write(
        &mut self,
        value: Value,
        skip_trigger: bool,
        now: Instant,
        up: &mut impl Upstream,
    ) {
        if !self.store(value) || skip_trigger {
            return;
        }

        if let Some(timer) = self.debounce.as_mut() {
            timer.schedule(now);
            trace!(field = %self.name, "Change notification scheduled");
            return;
        }

        self.emit_change();
        up.trigger_on_change();
    }

    pub(crate) fn check_in(&self, all: &Data) -> Option<FieldError> {
        if let Some(decodes) = self.decode_check {
            if let Err(e) = decodes(&self.current) {
                let message = e.to_string();
                return Some(if self.multiple_errors {
                    FieldError::Messages(vec![message])
                } else {
                    FieldError::Message(message)
                });
            }
        }

        let ctx = Context {
            previous_value: &self.previous,
            field_name: &self.name,
            all,
        };
        run_validators(&self.validators, &self.current, &ctx, self.multiple_errors)
    }

    pub(crate) fn validate_in(&mut self, all: &Data, up: &mut impl Upstream) -> bool {
        let error = self.check_in(all);
        let valid = error.is_none();
        self.set_error_in(error, false, up);
        valid
    }

    pub(crate) fn set_error_in(
        &mut self,
        error: Option<FieldError>,
        skip_trigger: bool,
        up: &mut impl Upstream,
    ) {
        let error = FieldError::normalize(error);
        if self.error == error {
            return;
        }
        self.error = error;
        trace!(field = %self.name, error = ?self.error, "Field error changed");

        if skip_trigger {
            return;
        }
        self.emit_error();
        up.trigger_on_error();
    }

    pub(crate) fn make_pristine_in(&mut self, up: &mut impl Upstream) {
        self.initial = self.current.clone();
        self.previous = self.current.clone();
        self.set_error_in(None, false, up);
    }

    /// Reset writes immediately: a pending debounced notification is dropped.
    pub(crate) fn reset_in(&mut self, up: &mut impl Upstream) {
        if let Some(timer) = self.debounce.as_mut() {
            timer.cancel();
        }
        if self.store(self.initial.clone()) {
            self.emit_change();
            up.trigger_on_change();
        }
        self.make_pristine_in(up);
    }

    pub(crate) fn tick_in(&mut self, now: Instant, up: &mut impl Upstream) -> bool {
        let due = self.debounce.as_mut().is_some_and(|timer| timer.fire_at(now));
        if due {
            trace!(field = %self.name, "Debounced change notification fired");
            self.emit_change();
            up.trigger_on_change();
        }
        due
    }

    pub(crate) const fn enable_multiple_errors(&mut self) {
        self.multiple_errors = true;
    }

    /// Replace `current`, remembering the old value. False when unchanged.
    fn store(&mut self, value: Value) -> bool {
        if self.current == value {
            return false;
        }

        let next = match &self.modify {
            Some(modify) => modify(value, &self.current),
            None => value,
        };
        self.previous = std::mem::replace(&mut self.current, next);
        trace!(field = %self.name, "Field value written");
        true
    }

    // Handlers are taken out while they run and put back even if they panic.

    fn emit_change(&mut self) {
        if let Some(mut handler) = self.on_change.take() {
            let field = &*self;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&field.current, field)));
            self.on_change = Some(handler);
            resume_panic(outcome);
        }
    }

    fn emit_error(&mut self) {
        if let Some(mut handler) = self.on_error.take() {
            let field = &*self;
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| handler(field.error.as_ref(), field)));
            self.on_error = Some(handler);
            resume_panic(outcome);
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("initial", &self.initial)
            .field("error", &self.error)
            .field("validators", &self.validators.len())
            .field("debounce", &self.debounce)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

fn decodes_as<T: DeserializeOwned>(value: &Value) -> std::result::Result<(), serde_json::Error> {
    T::deserialize(value).map(drop)
}

/// Declaration of a field: validators, transforms, hooks and defaults.
#[derive(Default)]
pub struct FieldBuilder {
    name: String,
    default: Option<Value>,
    validators: Vec<Box<dyn Validator>>,
    decode_check: Option<DecodeCheck>,
    modify: Option<ModifyFn>,
    clean: Option<CleanFn>,
    decorate: Option<DecorateFn>,
    debounce: Option<Duration>,
    index: Option<usize>,
    multiple_errors: bool,
    on_change: Option<FieldChangeHandler>,
    on_error: Option<FieldErrorHandler>,
}

impl FieldBuilder {
    /// Name for a standalone field. A form overrides it with its schema key.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a validator closure. Validators run in the order added.
    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value, &Context<'_>) -> Option<String> + 'static,
    {
        self.validators.push(Box::new(validator));
        self
    }

    /// Add any [`Validator`] implementation.
    #[must_use]
    pub fn validate_with<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Require the raw value to decode as `T` before validators run.
    #[must_use]
    pub fn decode_as<T: DeserializeOwned>(mut self) -> Self {
        self.decode_check = Some(decodes_as::<T> as DecodeCheck);
        self
    }

    /// Initial value, written silently at construction.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Transform applied to every written value, given the value it replaces.
    #[must_use]
    pub fn modify<F>(mut self, modify: F) -> Self
    where
        F: Fn(Value, &Value) -> Value + 'static,
    {
        self.modify = Some(Box::new(modify));
        self
    }

    /// Transform applied when the form exports data.
    #[must_use]
    pub fn clean<F>(mut self, clean: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        self.clean = Some(Box::new(clean));
        self
    }

    /// Presentation-only transform of `(current, previous)`.
    #[must_use]
    pub fn decorate<F>(mut self, decorate: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + 'static,
    {
        self.decorate = Some(Box::new(decorate));
        self
    }

    /// Delay change notifications until writes stop for `interval`.
    #[must_use]
    pub const fn debounce(mut self, interval: Duration) -> Self {
        self.debounce = Some(interval);
        self
    }

    /// Iteration slot within the form.
    #[must_use]
    pub const fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Collect every failing validator's message.
    #[must_use]
    pub const fn multiple_errors(mut self, multiple: bool) -> Self {
        self.multiple_errors = multiple;
        self
    }

    /// Hook fired when the value changes.
    #[must_use]
    pub fn on_change<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Value, &Field) + 'static,
    {
        self.on_change = Some(Box::new(handler));
        self
    }

    /// Hook fired when the stored error changes.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Option<&FieldError>, &Field) + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Build a standalone field.
    ///
    /// # Errors
    /// Returns `FormError::MissingValidator` if no validator was added.
    pub fn build(self) -> Result<Field> {
        let name = self.name.clone();
        self.build_named(name)
    }

    pub(crate) fn build_named(self, name: String) -> Result<Field> {
        if self.validators.is_empty() {
            return Err(FormError::MissingValidator { field: name });
        }

        let mut field = Field {
            name,
            initial: Value::Null,
            previous: Value::Null,
            current: Value::Null,
            error: None,
            validators: self.validators,
            decode_check: self.decode_check,
            modify: self.modify,
            clean: self.clean,
            decorate: self.decorate,
            debounce: self.debounce.map(Debounce::new),
            index: self.index,
            multiple_errors: self.multiple_errors,
            on_change: self.on_change,
            on_error: self.on_error,
        };

        // Construction writes silently and starts pristine.
        if let Some(default) = self.default {
            field.store(default);
        }
        field.initial = field.current.clone();
        field.previous = field.current.clone();

        Ok(field)
    }
}
