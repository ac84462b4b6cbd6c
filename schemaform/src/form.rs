/// Root controller: owns the field tree and the shared context, and runs
/// validation so that only the result for the most recent value is applied.
///
/// All input (changes, focus, blur) is handled synchronously. Validation
/// results and elapsed blur timers come back as [`FormEvent`]s on a channel
/// the controller drains in [`FormController::settle`] or
/// [`FormController::process_next`].
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace};

use crate::coerce::{RawInput, ValueParser};
use crate::compiler::compile;
use crate::context::{FormContext, FormOptions, Formatters};
use crate::error::FormError;
use crate::field::{Coercer, FieldProps, FieldTree, NodeId, UiState};
use crate::normalize::normalize;
use crate::path::{DataPath, FlatSnapshot};
use crate::schema::SchemaNode;
use crate::validate::{CustomValidators, ErrorEntry, ValidationError, Validator};
use crate::widget::WidgetRegistry;

pub enum FormEvent {
    ValueChanged {
        value: Value,
    },
    Validated {
        seq: u64,
        value: Value,
        result: Result<Vec<ErrorEntry>, ValidationError>,
    },
    BlurElapsed {
        node: NodeId,
        token: u64,
    },
}

pub type ChangeCallback = Box<dyn FnMut(&Value) + Send>;
/// Receives the settled value with its errors; `None` when there are none.
pub type ChangeWithErrorsCallback = Box<dyn FnMut(&Value, Option<&[ErrorEntry]>) + Send>;
pub type SubmitCallback = Box<dyn FnMut(&FormSnapshot) + Send>;

#[derive(Default)]
pub struct FormCallbacks {
    pub on_change: Option<ChangeCallback>,
    pub on_change_with_errors: Option<ChangeWithErrorsCallback>,
    pub on_submit: Option<SubmitCallback>,
}

pub struct FormConfig {
    pub schema: Value,
    pub default_value: Value,
    pub options: FormOptions,
    pub form_types: WidgetRegistry,
    pub formatters: Formatters,
    pub custom_validators: CustomValidators,
    pub parse_value: Option<ValueParser>,
    /// Ambient data exposed through the shared context.
    pub context: Value,
    /// Errors supplied from outside (e.g. a server), shown next to schema errors.
    pub errors: Vec<ErrorEntry>,
    pub callbacks: FormCallbacks,
}

impl FormConfig {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            default_value: json!({}),
            options: FormOptions::default(),
            form_types: WidgetRegistry::default(),
            formatters: Formatters::default(),
            custom_validators: CustomValidators::new(),
            parse_value: None,
            context: json!({}),
            errors: Vec::new(),
            callbacks: FormCallbacks::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSnapshot {
    pub value: Value,
    pub errors: Vec<ErrorEntry>,
}

impl FormSnapshot {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Cheap clonable read access to the current value. `get_value` works from
/// any task without going through the controller.
#[derive(Clone)]
pub struct FormHandle {
    current: watch::Receiver<Value>,
    validator: watch::Receiver<Arc<Validator>>,
}

impl FormHandle {
    pub fn value(&self) -> Value {
        self.current.borrow().clone()
    }

    /// Validate the current value against the current schema.
    pub async fn get_value(&self) -> Result<FormSnapshot, ValidationError> {
        let value = self.current.borrow().clone();
        let validator = self.validator.borrow().clone();
        let errors = validator.validate(&value).await?;
        Ok(FormSnapshot { value, errors })
    }

    /// Wait for the next value change. Returns `false` once the controller is gone.
    pub async fn changed(&mut self) -> bool {
        self.current.changed().await.is_ok()
    }
}

pub struct FormController {
    tree: FieldTree,
    context: FormContext,
    coercer: Coercer,
    options: FormOptions,
    custom_validators: CustomValidators,
    current: watch::Sender<Value>,
    validator: watch::Sender<Arc<Validator>>,
    handle: FormHandle,
    events_tx: mpsc::UnboundedSender<FormEvent>,
    events_rx: mpsc::UnboundedReceiver<FormEvent>,
    /// Sequence number of the most recently scheduled validation.
    seq: u64,
    in_flight: usize,
    pending_validation: Option<Value>,
    errors: Vec<ErrorEntry>,
    external_errors: Vec<ErrorEntry>,
    settled_value: Value,
    last_delivered: Option<(Value, Vec<ErrorEntry>)>,
    callbacks: FormCallbacks,
}

fn prepare_schema(raw: &Value, required: &[String]) -> Result<Arc<SchemaNode>, FormError> {
    let compiled = compile(raw)?;
    Ok(Arc::new(normalize(&compiled, required)))
}

impl FormController {
    /// Compile the schema and mount the field tree. No validation runs until
    /// the first change.
    pub fn mount(config: FormConfig) -> Result<Self, FormError> {
        let FormConfig {
            schema,
            default_value,
            options,
            form_types,
            formatters,
            custom_validators,
            parse_value,
            context,
            errors,
            callbacks,
        } = config;

        let schema = prepare_schema(&schema, &options.required)?;
        let registry = Arc::new(form_types);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut tree = FieldTree::mount(
            &schema,
            Some(default_value),
            events_tx.clone(),
            Duration::from_millis(options.blur_debounce_ms),
        );
        let value = tree.value().cloned().unwrap_or(Value::Null);

        let mut context = FormContext::new(registry.clone(), schema.clone(), &options, formatters, context);
        context.flattened = Arc::new(FlatSnapshot::new(&value));
        tree.refresh_visibility(&context.flattened);
        tree.distribute_errors(&errors);

        let validator = Arc::new(Validator::new(schema.clone(), custom_validators.clone()));
        let (current, current_rx) = watch::channel(value.clone());
        let (validator, validator_rx) = watch::channel(validator);

        debug!(
            fields = context.flattened.len(),
            layout = ?context.layout,
            show_error = ?context.show_error,
            "form mounted"
        );

        Ok(Self {
            tree,
            context,
            coercer: Coercer::new(registry, parse_value),
            options,
            custom_validators,
            current,
            validator,
            handle: FormHandle {
                current: current_rx,
                validator: validator_rx,
            },
            events_tx,
            events_rx,
            seq: 0,
            in_flight: 0,
            pending_validation: None,
            errors: Vec::new(),
            external_errors: errors,
            settled_value: value,
            last_delivered: None,
            callbacks,
        })
    }

    pub fn handle(&self) -> FormHandle {
        self.handle.clone()
    }

    pub fn context(&self) -> &FormContext {
        &self.context
    }

    pub fn options(&self) -> &FormOptions {
        &self.options
    }

    pub fn value(&self) -> Value {
        self.current.borrow().clone()
    }

    /// Errors from the last applied validation, followed by external errors.
    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.errors
            .iter()
            .chain(self.external_errors.iter())
            .cloned()
            .collect()
    }

    /// The value the last applied validation ran against.
    pub fn settled_value(&self) -> &Value {
        &self.settled_value
    }

    pub fn tree(&self) -> &FieldTree {
        &self.tree
    }

    pub fn ui_state(&self, path: &str) -> Option<UiState> {
        self.tree.node(&DataPath::parse(path)).map(|n| n.ui_state())
    }

    /// User input at `path`: coerce, merge to the root, mark the path dirty
    /// and queue a validation.
    pub fn change(&mut self, path: &str, raw: impl Into<RawInput>) -> Result<(), FormError> {
        let path = DataPath::parse(path);
        let value = self.tree.change(&path, raw.into(), false, &self.coercer)?;
        debug!(path = %path, "field changed");
        self.commit(value, true);
        Ok(())
    }

    /// Programmatic update: nothing is marked dirty and no validation is queued.
    pub fn set_value(&mut self, path: &str, raw: impl Into<RawInput>) -> Result<(), FormError> {
        let path = DataPath::parse(path);
        let value = self.tree.change(&path, raw.into(), true, &self.coercer)?;
        trace!(path = %path, "field set");
        self.commit(value, false);
        Ok(())
    }

    pub fn push_item(&mut self, path: &str, raw: impl Into<RawInput>) -> Result<(), FormError> {
        let path = DataPath::parse(path);
        let value = self.tree.push_item(&path, raw.into(), &self.coercer)?;
        debug!(path = %path, "item added");
        self.commit(value, true);
        Ok(())
    }

    pub fn remove_item(&mut self, path: &str, index: usize) -> Result<(), FormError> {
        let path = DataPath::parse(path);
        let value = self.tree.remove_item(&path, index)?;
        debug!(path = %path, index, "item removed");
        self.commit(value, true);
        Ok(())
    }

    pub fn focus(&mut self, path: &str) -> Result<(), FormError> {
        self.tree.focus(&DataPath::parse(path))
    }

    /// Schedule a blur. It commits after the debounce unless the field is
    /// focused again first.
    pub fn blur(&mut self, path: &str) -> Result<(), FormError> {
        self.tree.blur(&DataPath::parse(path))
    }

    fn commit(&mut self, value: Option<Value>, notify: bool) {
        let value = value.unwrap_or(Value::Null);
        self.current.send_replace(value.clone());
        self.context.flattened = Arc::new(FlatSnapshot::new(&value));
        self.tree.refresh_visibility(&self.context.flattened);
        if notify {
            // The receiver lives in `self`, so the send cannot fail.
            let _ = self.events_tx.send(FormEvent::ValueChanged { value });
        }
    }

    /// Handle every event that is ready, waiting for one if work is still
    /// outstanding. Returns `false` when the controller is idle.
    pub async fn process_next(&mut self) -> Result<bool, FormError> {
        let first = match self.events_rx.try_recv() {
            Ok(event) => Some(event),
            Err(_) if self.pending_validation.is_some() => None,
            Err(_) if !self.is_busy() => return Ok(false),
            Err(_) => self.events_rx.recv().await,
        };
        if let Some(event) = first {
            self.handle_event(event)?;
        }
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event)?;
        }
        self.flush_validation();
        Ok(true)
    }

    /// Process events until no validation or blur timer is outstanding.
    pub async fn settle(&mut self) -> Result<(), FormError> {
        while self.process_next().await? {}
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0 || self.pending_validation.is_some() || self.tree.has_pending_timers()
    }

    fn handle_event(&mut self, event: FormEvent) -> Result<(), FormError> {
        match event {
            FormEvent::ValueChanged { value } => {
                if let Some(on_change) = self.callbacks.on_change.as_mut() {
                    on_change(&value);
                }
                // Changes in one turn coalesce into one validation.
                self.pending_validation = Some(value);
            }
            FormEvent::Validated { seq, value, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if seq != self.seq {
                    debug!(seq, latest = self.seq, "discarding superseded validation result");
                    return Ok(());
                }
                let errors = result.map_err(|err| {
                    error!(seq, error = %err, "validation failed");
                    err
                })?;
                debug!(seq, errors = errors.len(), "validation applied");
                self.errors = errors;
                self.settled_value = value;
                self.redistribute_errors();
                self.notify_with_errors();
            }
            FormEvent::BlurElapsed { node, token } => {
                if !self.tree.blur_elapsed(node, token) {
                    trace!(token, "stale blur timer ignored");
                }
            }
        }
        Ok(())
    }

    fn flush_validation(&mut self) {
        let Some(value) = self.pending_validation.take() else {
            return;
        };
        self.seq += 1;
        self.in_flight += 1;
        let seq = self.seq;
        let validator = self.validator.borrow().clone();
        let events = self.events_tx.clone();
        trace!(seq, "validation scheduled");
        tokio::spawn(async move {
            let target = value.clone();
            let result = tokio::spawn(async move { validator.validate(&target).await })
                .await
                .unwrap_or_else(|join_err| Err(ValidationError::Aborted(join_err.to_string())));
            let _ = events.send(FormEvent::Validated { seq, value, result });
        });
    }

    fn redistribute_errors(&mut self) {
        let errors = self.errors();
        self.tree.distribute_errors(&errors);
    }

    fn notify_with_errors(&mut self) {
        let pair = (self.settled_value.clone(), self.errors.clone());
        if self.last_delivered.as_ref() == Some(&pair) {
            return;
        }
        if let Some(callback) = self.callbacks.on_change_with_errors.as_mut() {
            let errors = (!pair.1.is_empty()).then_some(pair.1.as_slice());
            callback(&pair.0, errors);
        }
        self.last_delivered = Some(pair);
    }

    /// Validate the current value and return it with its errors. Does not
    /// touch field state.
    pub async fn get_value(&self) -> Result<FormSnapshot, FormError> {
        Ok(self.handle.get_value().await?)
    }

    pub async fn submit(&mut self) -> Result<FormSnapshot, FormError> {
        let snapshot = self.get_value().await?;
        debug!(valid = snapshot.is_valid(), "form submitted");
        if let Some(on_submit) = self.callbacks.on_submit.as_mut() {
            on_submit(&snapshot);
        }
        Ok(snapshot)
    }

    pub fn props(&mut self, path: &str) -> Option<Arc<FieldProps>> {
        self.tree.props(&DataPath::parse(path), &self.context)
    }

    /// Props of every visible field in tree order.
    pub fn render(&mut self) -> Vec<Arc<FieldProps>> {
        self.tree.render(&self.context)
    }

    /// Swap the schema. The tree is remounted around the current value,
    /// keeping interaction state where a path survives with the same type,
    /// and a validation is queued.
    pub fn set_schema(&mut self, schema: &Value) -> Result<(), FormError> {
        let schema = prepare_schema(schema, &self.options.required)?;
        let mut tree = FieldTree::mount(
            &schema,
            Some(self.value()),
            self.events_tx.clone(),
            Duration::from_millis(self.options.blur_debounce_ms),
        );
        tree.adopt_ui_state(&self.tree);
        self.tree = tree;
        self.context.schema = schema.clone();
        self.validator
            .send_replace(Arc::new(Validator::new(schema, self.custom_validators.clone())));
        let value = self.tree.value().cloned();
        self.commit(value, false);
        self.redistribute_errors();
        self.pending_validation = Some(self.value());
        debug!("schema replaced");
        Ok(())
    }

    pub fn set_formatters(&mut self, formatters: Formatters) {
        self.context.set_formatters(formatters);
    }

    pub fn set_context(&mut self, ambient: Value) {
        self.context.set_ambient(ambient);
    }

    pub fn set_external_errors(&mut self, errors: Vec<ErrorEntry>) {
        self.external_errors = errors;
        self.redistribute_errors();
    }
}
