//! Form model: a fixed set of named fields with one notification choke point.
//!
//! Bulk operations open a suppression scope, mutate every field, close the
//! scope and then emit a single consolidated notification.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, trace};

use crate::config::FormConfig;
use crate::error::{FormError, Result};
use crate::field::{Field, FieldBuilder};
use crate::notify::{resume_panic, Notifier, Upstream};
use crate::validation::FieldError;

/// Field name to exportable value.
pub type Data = Map<String, Value>;

/// Field name to stored error, with an entry for every declared field.
pub type Errors = BTreeMap<String, Option<FieldError>>;

/// Called with fresh form data after a consolidated change.
pub type ChangeHandler = Box<dyn FnMut(&Data, &Form)>;
/// Called with every field's error after a consolidated error change.
pub type ErrorHandler = Box<dyn FnMut(&Errors, &Form)>;

/// Aggregate of named fields.
pub struct Form {
    /// Fields in iteration order.
    fields: Vec<Field>,
    config: FormConfig,
    notifier: Notifier,
    on_change: Option<ChangeHandler>,
    on_error: Option<ErrorHandler>,
}

impl Form {
    /// Start declaring a form.
    #[must_use]
    pub fn builder() -> FormBuilder {
        FormBuilder::default()
    }

    /// Validation policy.
    #[must_use]
    pub const fn config(&self) -> &FormConfig {
        &self.config
    }

    /// Number of declared fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the form declares no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in iteration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(Field::name)
    }

    /// Fields in iteration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Look up a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Mutable handle to a field whose notifications reach this form.
    pub fn field_mut(&mut self, name: &str) -> Option<FieldMut<'_>> {
        let index = self.position(name)?;
        Some(FieldMut { form: self, index })
    }

    /// Replace the change callback.
    pub fn on_change<F>(&mut self, handler: F)
    where
        F: FnMut(&Data, &Self) + 'static,
    {
        self.on_change = Some(Box::new(handler));
    }

    /// Replace the error callback.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: FnMut(&Errors, &Self) + 'static,
    {
        self.on_error = Some(Box::new(handler));
    }

    /// Write every key of `data` that names a field; unknown keys are ignored.
    ///
    /// Fields are written silently; one change notification follows unless
    /// `skip_trigger` is set.
    pub fn set_data(&mut self, data: &Data, skip_trigger: bool) {
        let written = self.batch(|form| form.write_data(data));
        debug!(written, skip_trigger, "Set form data");

        if !skip_trigger {
            self.trigger_on_change();
        }
    }

    /// [`set_data`](Self::set_data) from any serializable map-like value.
    ///
    /// # Errors
    /// Returns `FormError::Json` if serialization fails and
    /// `FormError::InvalidData` if `data` is not an object.
    pub fn set_data_from<T: Serialize>(&mut self, data: &T, skip_trigger: bool) -> Result<()> {
        match serde_json::to_value(data)? {
            Value::Object(map) => {
                self.set_data(&map, skip_trigger);
                Ok(())
            }
            other => Err(FormError::InvalidData(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    /// Exportable data of every field, built fresh.
    #[must_use]
    pub fn data(&self) -> Data {
        self.fields
            .iter()
            .map(|f| (f.name().to_string(), f.clean_data()))
            .collect()
    }

    /// Current values of dirty fields only.
    #[must_use]
    pub fn updates(&self) -> Data {
        self.fields
            .iter()
            .filter(|f| f.is_dirty())
            .map(|f| (f.name().to_string(), f.value().clone()))
            .collect()
    }

    /// Decode one field's current value.
    ///
    /// # Errors
    /// Returns `FormError::UnknownField` or `FormError::Decode`.
    pub fn value_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.field(name)
            .ok_or_else(|| FormError::UnknownField(name.to_string()))?
            .value_as()
    }

    /// Decode the exported data into a typed struct.
    ///
    /// # Errors
    /// Returns `FormError::Json` if the data does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data()))?)
    }

    /// Store errors for the named fields; others keep theirs.
    pub fn set_error(&mut self, errors: &Errors, skip_trigger: bool) {
        self.batch(|form| {
            for field in &mut form.fields {
                if let Some(error) = errors.get(field.name()) {
                    field.set_error_in(error.clone(), true, &mut form.notifier);
                }
            }
        });
        debug!(count = errors.len(), skip_trigger, "Set form errors");

        if !skip_trigger {
            self.trigger_on_error();
        }
    }

    /// Every field's stored error.
    #[must_use]
    pub fn errors(&self) -> Errors {
        self.fields
            .iter()
            .map(|f| (f.name().to_string(), f.error().cloned()))
            .collect()
    }

    /// True if any field is dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.fields.iter().any(Field::is_dirty)
    }

    /// Pin every field's current value as its baseline and clear errors.
    ///
    /// Only the error callback fires; values do not change.
    pub fn make_pristine(&mut self) {
        self.batch(|form| {
            for field in &mut form.fields {
                field.make_pristine_in(&mut form.notifier);
            }
        });
        debug!("Made form pristine");
        self.trigger_on_error();
    }

    /// Restore every field's baseline. Both callbacks fire, error first.
    pub fn reset(&mut self) {
        self.batch(|form| {
            for field in &mut form.fields {
                field.reset_in(&mut form.notifier);
            }
        });
        debug!("Reset form");
        self.trigger_on_error();
        self.trigger_on_change();
    }

    /// Validate fields in order, attaching errors, and fire one error
    /// notification.
    ///
    /// With `stop_on_error`, fields after the first failure are not
    /// evaluated and keep their previous error.
    pub fn validate(&mut self) -> bool {
        let all = self.data();
        let stop_on_error = self.config.stop_on_error;

        let (valid, evaluated) = self.batch(|form| {
            let mut valid = true;
            let mut evaluated = 0_usize;
            for field in &mut form.fields {
                evaluated += 1;
                if !field.validate_in(&all, &mut form.notifier) {
                    valid = false;
                    if stop_on_error {
                        debug!(field = %field.name(), "Stopping validation at first failure");
                        break;
                    }
                }
            }
            (valid, evaluated)
        });
        debug!(valid, evaluated, total = self.fields.len(), "Validated form");

        self.trigger_on_error();
        valid
    }

    /// Same verdict as [`validate`](Self::validate) without storing errors or
    /// notifying.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let all = self.data();
        let mut valid = true;
        for field in &self.fields {
            if field.check_in(&all).is_some() {
                valid = false;
                if self.config.stop_on_error {
                    break;
                }
            }
        }
        valid
    }

    /// Fire the change callback unless notifications are suppressed.
    pub fn trigger_on_change(&mut self) {
        self.notifier.trigger_on_change();
        self.flush();
    }

    /// Fire the error callback unless notifications are suppressed.
    pub fn trigger_on_error(&mut self) {
        self.notifier.trigger_on_error();
        self.flush();
    }

    /// Run `f` with notifications suppressed.
    ///
    /// Scopes nest; nothing fires until the outermost one closes, and even
    /// then only what the caller triggers explicitly afterwards. The scope
    /// closes when `f` returns or panics; a panic leaves earlier writes
    /// applied.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let mut scope = Scope::open(self);
        f(&mut *scope)
    }

    /// Fire due debounced change notifications, coalesced into one form
    /// notification. Returns how many fields fired.
    pub fn tick(&mut self) -> usize {
        self.tick_at(Instant::now())
    }

    /// [`tick`](Self::tick) with an explicit clock.
    ///
    /// Inside a [`batch`](Self::batch) nothing fires and due timers stay
    /// armed for the next tick.
    pub fn tick_at(&mut self, now: Instant) -> usize {
        if self.notifier.is_suppressed() {
            trace!("Tick deferred while notifications are suppressed");
            return 0;
        }
        let mut fired = 0;
        for field in &mut self.fields {
            if field.tick_in(now, &mut self.notifier) {
                fired += 1;
            }
        }
        self.flush();
        fired
    }

    /// Earliest pending debounced notification.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.fields.iter().filter_map(Field::deadline).min()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    fn write_data(&mut self, data: &Data) -> usize {
        let now = Instant::now();
        let mut written = 0;
        for field in &mut self.fields {
            if let Some(value) = data.get(field.name()) {
                field.write(value.clone(), true, now, &mut self.notifier);
                written += 1;
            }
        }
        written
    }

    /// Deliver recorded notifications, error before change.
    fn flush(&mut self) {
        let pending = self.notifier.take();
        if pending.error {
            self.emit_error();
        }
        if pending.change {
            self.emit_change();
        }
    }

    fn emit_change(&mut self) {
        if let Some(mut handler) = self.on_change.take() {
            let form = &*self;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&form.data(), form)));
            self.on_change = Some(handler);
            resume_panic(outcome);
        }
    }

    fn emit_error(&mut self) {
        if let Some(mut handler) = self.on_error.take() {
            let form = &*self;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&form.errors(), form)));
            self.on_error = Some(handler);
            resume_panic(outcome);
        }
    }
}

/// Open suppression scope over a form, closed on drop.
struct Scope<'a> {
    form: &'a mut Form,
}

impl<'a> Scope<'a> {
    fn open(form: &'a mut Form) -> Self {
        form.notifier.suppress();
        Self { form }
    }
}

impl Deref for Scope<'_> {
    type Target = Form;

    fn deref(&self) -> &Form {
        self.form
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut Form {
        self.form
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.form.notifier.resume();
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("fields", &self.fields)
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

/// Mutable access to one field of a form.
///
/// Reads go through `Deref<Target = Field>`. Writes report to the owning
/// form, which fires its callbacks once the field has settled.
pub struct FieldMut<'a> {
    form: &'a mut Form,
    index: usize,
}

impl FieldMut<'_> {
    /// Write a value; the form's change callback follows unless skipped or
    /// debounced.
    pub fn set_value(&mut self, value: impl Into<Value>, skip_trigger: bool) {
        self.set_value_at(value, skip_trigger, Instant::now());
    }

    /// [`set_value`](Self::set_value) with an explicit clock.
    pub fn set_value_at(&mut self, value: impl Into<Value>, skip_trigger: bool, now: Instant) {
        let form = &mut *self.form;
        form.fields[self.index].write(value.into(), skip_trigger, now, &mut form.notifier);
        form.flush();
    }

    /// Validate against the form's current data and attach the result.
    pub fn validate(&mut self) -> bool {
        let all = self.form.data();
        let form = &mut *self.form;
        let valid = form.fields[self.index].validate_in(&all, &mut form.notifier);
        form.flush();
        valid
    }

    /// Validate against the form's current data without storing the error.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.check().is_none()
    }

    /// Compute the error the field would get, without storing it.
    #[must_use]
    pub fn check(&self) -> Option<FieldError> {
        self.form.fields[self.index].check_in(&self.form.data())
    }

    /// Store an error; the form's error callback follows unless skipped.
    pub fn set_error(&mut self, error: Option<FieldError>, skip_trigger: bool) {
        let form = &mut *self.form;
        form.fields[self.index].set_error_in(error, skip_trigger, &mut form.notifier);
        form.flush();
    }

    /// Pin the current value as the field's baseline and clear its error.
    pub fn make_pristine(&mut self) {
        let form = &mut *self.form;
        form.fields[self.index].make_pristine_in(&mut form.notifier);
        form.flush();
    }

    /// Restore the field's baseline.
    pub fn reset(&mut self) {
        let form = &mut *self.form;
        form.fields[self.index].reset_in(&mut form.notifier);
        form.flush();
    }

    /// Write then validate, returning the resulting error.
    pub fn set_and_validate(&mut self, value: impl Into<Value>) -> Option<FieldError> {
        self.set_value(value, false);
        self.validate();
        self.error().cloned()
    }
}

impl Deref for FieldMut<'_> {
    type Target = Field;

    fn deref(&self) -> &Field {
        &self.form.fields[self.index]
    }
}

/// Declaration of a form: schema, policy, callbacks and initial data.
#[derive(Default)]
pub struct FormBuilder {
    fields: Vec<(String, FieldBuilder)>,
    config: FormConfig,
    on_change: Option<ChangeHandler>,
    on_error: Option<ErrorHandler>,
    data: Option<Data>,
    pin_data: bool,
}

impl FormBuilder {
    /// Declare a field. Declaration order is iteration order unless the
    /// field requests an index.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: FieldBuilder) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Validation policy.
    #[must_use]
    pub const fn config(mut self, config: FormConfig) -> Self {
        self.config = config;
        self
    }

    /// Change callback.
    #[must_use]
    pub fn on_change<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Data, &Form) + 'static,
    {
        self.on_change = Some(Box::new(handler));
        self
    }

    /// Error callback.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&Errors, &Form) + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Initial data, written silently and announced with one change
    /// notification.
    #[must_use]
    pub fn data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    /// Make the initial data the pristine baseline.
    #[must_use]
    pub const fn pin_data(mut self, pin: bool) -> Self {
        self.pin_data = pin;
        self
    }

    /// Build the form.
    ///
    /// # Errors
    /// Returns `FormError::MissingValidator`, `FormError::DuplicateField` or
    /// `FormError::DuplicateIndex` for an invalid schema.
    pub fn build(self) -> Result<Form> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());

        for (name, builder) in self.fields {
            if !seen.insert(name.clone()) {
                return Err(FormError::DuplicateField(name));
            }
            let mut field = builder.build_named(name)?;
            if self.config.multiple_errors {
                field.enable_multiple_errors();
            }
            fields.push(field);
        }

        let fields = arrange(fields)?;
        debug!(
            order = ?fields.iter().map(Field::name).collect::<Vec<_>>(),
            "Built form"
        );

        let mut form = Form {
            fields,
            config: self.config,
            notifier: Notifier::default(),
            on_change: self.on_change,
            on_error: self.on_error,
        };

        let pin_data = self.pin_data;
        if let Some(data) = self.data {
            form.batch(|form| {
                form.write_data(&data);
                if pin_data {
                    for field in &mut form.fields {
                        field.make_pristine_in(&mut form.notifier);
                    }
                }
            });
            form.trigger_on_change();
        }

        Ok(form)
    }
}

/// Place indexed fields at their slot and fill the gaps with the rest in
/// declaration order. Unused slots collapse.
fn arrange(fields: Vec<Field>) -> Result<Vec<Field>> {
    let total = fields.len();
    let mut indexed = BTreeMap::new();
    let mut unindexed = Vec::new();

    for field in fields {
        match field.index() {
            Some(index) => {
                if indexed.contains_key(&index) {
                    return Err(FormError::DuplicateIndex {
                        field: field.name().to_string(),
                        index,
                    });
                }
                indexed.insert(index, field);
            }
            None => unindexed.push(field),
        }
    }

    let mut rest = unindexed.into_iter();
    let mut ordered = Vec::with_capacity(total);
    let mut slot = 0;
    while ordered.len() < total {
        let next = indexed
            .remove(&slot)
            .or_else(|| rest.next())
            .or_else(|| indexed.pop_first().map(|(_, field)| field));
        ordered.extend(next);
        slot += 1;
    }

    Ok(ordered)
}
