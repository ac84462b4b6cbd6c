/// The field tree: one node per schema node, mirroring the shape of the value.
///
/// Values flow up. A changed node coerces its input, then every ancestor
/// writes the child's new value at that child's key, so the root ends up
/// holding the merged value without any node writing outside its own slot.
/// Errors and visibility flow down from the controller.
mod props;
mod state;
mod timer;

pub use props::{EnumOption, FieldProps};
pub use state::{ShowError, UiState};
pub use timer::ScopedTimer;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{trace, warn};

use crate::coerce::{self, RawInput, ValueParser};
use crate::context::{FormContext, Size};
use crate::error::FormError;
use crate::expr::{ExprCache, ShowExpr};
use crate::form::FormEvent;
use crate::path::{DataPath, FlatSnapshot};
use crate::schema::{SchemaNode, SchemaType, ShowSpec};
use crate::validate::ErrorEntry;
use crate::widget::WidgetRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

/// Turns raw widget input into a field value: the widget's pre-parse step,
/// then the form's parser or the built-in one.
#[derive(Clone)]
pub struct Coercer {
    registry: Arc<WidgetRegistry>,
    parser: Option<ValueParser>,
}

impl Coercer {
    pub fn new(registry: Arc<WidgetRegistry>, parser: Option<ValueParser>) -> Self {
        Self { registry, parser }
    }

    pub fn coerce(&self, raw: RawInput, previous: Option<&Value>, schema: &SchemaNode) -> Option<Value> {
        let raw = match self.registry.resolve(schema) {
            Some(widget) => widget.pre_parse(raw),
            None => raw,
        };
        match &self.parser {
            Some(parser) => parser(raw, previous, schema),
            None => coerce::parse(raw, previous, schema),
        }
    }
}

#[derive(Debug, Clone)]
enum ShowRule {
    Always,
    Flag(bool),
    Expr(Arc<ShowExpr>),
    /// The expression failed to compile; the field stays hidden.
    Invalid,
}

#[derive(Debug)]
enum Children {
    Leaf,
    Object(Vec<FieldNode>),
    Array(Vec<FieldNode>),
}

#[derive(Debug, Clone, PartialEq)]
struct PropsKey {
    data_path: DataPath,
    value: Option<Value>,
    errors: Vec<ErrorEntry>,
    ui: UiState,
    visible: bool,
    formatters_revision: u64,
    show_error: ShowError,
    size: Size,
}

#[derive(Debug)]
pub struct FieldNode {
    id: NodeId,
    key: String,
    data_path: DataPath,
    schema: Arc<SchemaNode>,
    is_required: bool,
    default_value: Option<Value>,
    value: Option<Value>,
    ui: UiState,
    errors: Vec<ErrorEntry>,
    children: Children,
    show: ShowRule,
    visible: bool,
    visibility_memo: Option<Vec<Option<Value>>>,
    blur_timer: Option<ScopedTimer>,
    blur_tokens: u64,
    props_memo: Option<(PropsKey, Arc<FieldProps>)>,
}

impl FieldNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Property name or array index; empty for the root.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data_path(&self) -> &DataPath {
        &self.data_path
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn ui_state(&self) -> UiState {
        self.ui
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn children(&self) -> &[FieldNode] {
        match &self.children {
            Children::Leaf => &[],
            Children::Object(children) | Children::Array(children) => children,
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<FieldNode>> {
        match &mut self.children {
            Children::Leaf => None,
            Children::Object(children) | Children::Array(children) => Some(children),
        }
    }

    fn child_index(&self, segment: &str) -> Option<usize> {
        match &self.children {
            Children::Leaf => None,
            Children::Object(children) => children.iter().position(|c| c.key == segment),
            Children::Array(children) => segment.parse::<usize>().ok().filter(|i| *i < children.len()),
        }
    }

    fn find(&self, segments: &[&str]) -> Option<&FieldNode> {
        match segments.split_first() {
            None => Some(self),
            Some((head, rest)) => self.children().get(self.child_index(head)?)?.find(rest),
        }
    }

    fn find_mut(&mut self, segments: &[&str]) -> Option<&mut FieldNode> {
        match segments.split_first() {
            None => Some(self),
            Some((head, rest)) => {
                let index = self.child_index(head)?;
                self.children_mut()?.get_mut(index)?.find_mut(rest)
            }
        }
    }

    fn find_by_id_mut(&mut self, id: NodeId) -> Option<&mut FieldNode> {
        if self.id == id {
            return Some(self);
        }
        self.children_mut()?
            .iter_mut()
            .find_map(|child| child.find_by_id_mut(id))
    }

    /// The container value built from the children. Leaves return their own.
    fn compose(&self) -> Option<Value> {
        match &self.children {
            Children::Leaf => self.value.clone(),
            Children::Object(children) => {
                let mut map = Map::new();
                for child in children {
                    if let Some(value) = &child.value {
                        map.insert(child.key.clone(), value.clone());
                    }
                }
                Some(Value::Object(map))
            }
            Children::Array(children) => Some(Value::Array(
                children
                    .iter()
                    .map(|c| c.value.clone().unwrap_or(Value::Null))
                    .collect(),
            )),
        }
    }

    /// Write one child's value into this node's value at the child's key.
    fn merge_child(&mut self, index: usize) {
        let Some(child) = self.children().get(index) else {
            return;
        };
        let (key, child_value) = (child.key.clone(), child.value.clone());
        match &self.children {
            Children::Leaf => {}
            Children::Object(_) => {
                if !matches!(self.value, Some(Value::Object(_))) {
                    self.value = Some(Value::Object(Map::new()));
                }
                if let Some(Value::Object(map)) = &mut self.value {
                    match child_value {
                        Some(v) => {
                            map.insert(key, v);
                        }
                        None => {
                            map.remove(&key);
                        }
                    }
                }
            }
            Children::Array(_) => {
                let slot = match &mut self.value {
                    Some(Value::Array(items)) => items.get_mut(index),
                    _ => None,
                };
                match slot {
                    Some(slot) => *slot = child_value.unwrap_or(Value::Null),
                    None => self.value = self.compose(),
                }
            }
        }
    }

    /// Walk to the node at `segments`, run `f` on it, then merge the change
    /// back up the path. With `dirty` set every node on the path is marked.
    fn update_at<F>(&mut self, segments: &[&str], dirty: bool, f: F) -> Result<(), FormError>
    where
        F: FnOnce(&mut FieldNode) -> Result<(), FormError>,
    {
        match segments.split_first() {
            None => f(self)?,
            Some((head, rest)) => {
                let index = self
                    .child_index(head)
                    .ok_or_else(|| FormError::UnknownField(self.data_path.child(head)))?;
                if let Some(child) = self.children_mut().and_then(|c| c.get_mut(index)) {
                    child.update_at(rest, dirty, f)?;
                }
                self.merge_child(index);
            }
        }
        if dirty {
            self.ui.is_dirty = true;
        }
        Ok(())
    }

    fn apply_input(&mut self, raw: RawInput, coercer: &Coercer, mounter: &mut Mounter) {
        let next = coercer.coerce(raw, self.value.as_ref(), &self.schema);
        self.assign(next, mounter);
    }

    /// Replace the value, re-syncing children. Descendants are not marked dirty.
    fn assign(&mut self, value: Option<Value>, mounter: &mut Mounter) {
        let schema = self.schema.clone();
        match &mut self.children {
            Children::Leaf => {
                self.value = value;
                return;
            }
            Children::Object(children) => {
                for child in children.iter_mut() {
                    let v = value.as_ref().and_then(|v| v.get(&child.key)).cloned();
                    child.assign(v, mounter);
                }
            }
            Children::Array(children) => {
                let Some(Value::Array(items)) = value else {
                    children.clear();
                    self.value = None;
                    return;
                };
                children.truncate(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    if let Some(child) = children.get_mut(i) {
                        child.assign(Some(item), mounter);
                    } else if let Some(item_schema) = schema.items.as_deref() {
                        let path = self.data_path.index(i);
                        children.push(mounter.mount(&i.to_string(), path, item_schema, false, Some(item)));
                    }
                }
            }
        }
        self.value = self.compose();
    }

    fn push_item(&mut self, raw: RawInput, coercer: &Coercer, mounter: &mut Mounter) -> Result<(), FormError> {
        let schema = self.schema.clone();
        let (Some(item_schema), Children::Array(children)) = (schema.items.as_deref(), &mut self.children) else {
            return Err(FormError::NotAnArray(self.data_path.clone()));
        };
        let index = children.len();
        let value = coercer.coerce(raw, None, item_schema);
        let child = mounter.mount(&index.to_string(), self.data_path.index(index), item_schema, false, value);
        children.push(child);
        self.value = self.compose();
        Ok(())
    }

    fn remove_item(&mut self, index: usize) -> Result<(), FormError> {
        let Children::Array(children) = &mut self.children else {
            return Err(FormError::NotAnArray(self.data_path.clone()));
        };
        if index >= children.len() {
            return Err(FormError::IndexOutOfRange {
                path: self.data_path.clone(),
                index,
            });
        }
        children.remove(index);
        for (i, child) in children.iter_mut().enumerate().skip(index) {
            child.rekey(i.to_string(), &self.data_path);
        }
        self.value = self.compose();
        Ok(())
    }

    /// Move this subtree to a new key, rewriting every descendant path.
    fn rekey(&mut self, key: String, parent: &DataPath) {
        self.data_path = parent.child(&key);
        self.key = key;
        self.props_memo = None;
        let path = self.data_path.clone();
        if let Some(children) = self.children_mut() {
            for child in children {
                let key = child.key.clone();
                child.rekey(key, &path);
            }
        }
    }

    fn focus(&mut self) {
        // Refocusing while a blur is pending keeps the field focused.
        self.blur_timer = None;
        self.ui.is_focused = true;
    }

    fn blur(&mut self, delay: Duration, events: UnboundedSender<FormEvent>) -> Result<(), FormError> {
        self.blur_tokens += 1;
        let (node, token) = (self.id, self.blur_tokens);
        let timer = ScopedTimer::spawn(delay, token, move || {
            // The controller may already be gone; nothing left to update then.
            let _ = events.send(FormEvent::BlurElapsed { node, token });
        })?;
        self.blur_timer = Some(timer);
        Ok(())
    }

    /// Commit a blur if `token` belongs to the pending timer. Stale tokens are ignored.
    fn blur_elapsed(&mut self, token: u64) -> bool {
        match &self.blur_timer {
            Some(timer) if timer.token() == token => {
                self.blur_timer = None;
                if self.ui.is_focused {
                    self.ui.is_focused = false;
                    self.ui.is_touched = true;
                }
                true
            }
            _ => false,
        }
    }

    fn has_pending_timers(&self) -> bool {
        self.blur_timer.is_some() || self.children().iter().any(FieldNode::has_pending_timers)
    }

    fn distribute_errors(&mut self, by_path: &HashMap<DataPath, Vec<ErrorEntry>>) {
        self.errors = by_path.get(&self.data_path).cloned().unwrap_or_default();
        if let Some(children) = self.children_mut() {
            for child in children {
                child.distribute_errors(by_path);
            }
        }
    }

    fn refresh_visibility(&mut self, snapshot: &FlatSnapshot) {
        let visible = match &self.show {
            ShowRule::Always => true,
            ShowRule::Flag(flag) => *flag,
            ShowRule::Invalid => false,
            ShowRule::Expr(expr) => {
                let deps = expr.collect(snapshot);
                if self.visibility_memo.as_ref() == Some(&deps) {
                    self.visible
                } else {
                    let shown = expr.eval(&deps);
                    self.visibility_memo = Some(deps);
                    shown
                }
            }
        };
        if visible != self.visible {
            trace!(path = %self.data_path, visible, "visibility changed");
            self.visible = visible;
        }
        if let Some(children) = self.children_mut() {
            for child in children {
                child.refresh_visibility(snapshot);
            }
        }
    }

    /// Props for this node, recomputed only when something they depend on changed.
    pub fn props(&mut self, ctx: &FormContext) -> Arc<FieldProps> {
        let key = PropsKey {
            data_path: self.data_path.clone(),
            value: self.value.clone(),
            errors: self.errors.clone(),
            ui: self.ui,
            visible: self.visible,
            formatters_revision: ctx.formatters_revision,
            show_error: ctx.show_error,
            size: ctx.size,
        };
        if let Some((memo_key, props)) = &self.props_memo {
            if *memo_key == key {
                return props.clone();
            }
        }
        let props = Arc::new(FieldProps::build(self, ctx));
        self.props_memo = Some((key, props.clone()));
        props
    }

    fn collect_visible(&mut self, ctx: &FormContext, out: &mut Vec<Arc<FieldProps>>) {
        if !self.visible {
            return;
        }
        out.push(self.props(ctx));
        if let Some(children) = self.children_mut() {
            for child in children {
                child.collect_visible(ctx, out);
            }
        }
    }

    fn record_ui(&self, out: &mut HashMap<DataPath, (SchemaType, UiState)>) {
        out.insert(self.data_path.clone(), (self.schema.schema_type, self.ui));
        for child in self.children() {
            child.record_ui(out);
        }
    }

    fn adopt_ui(&mut self, previous: &HashMap<DataPath, (SchemaType, UiState)>) {
        if let Some((ty, ui)) = previous.get(&self.data_path) {
            if *ty == self.schema.schema_type {
                self.ui = UiState {
                    is_focused: false,
                    ..*ui
                };
            }
        }
        if let Some(children) = self.children_mut() {
            for child in children {
                child.adopt_ui(previous);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Mounter {
    next_id: u64,
    exprs: ExprCache,
}

impl Mounter {
    /// Build the subtree for `schema`. The initial value is `provided`, else
    /// the schema default; container values are composed from the children
    /// so undeclared keys are dropped.
    fn mount(
        &mut self,
        key: &str,
        data_path: DataPath,
        schema: &SchemaNode,
        is_required: bool,
        provided: Option<Value>,
    ) -> FieldNode {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        let initial = provided.or_else(|| schema.default.clone());
        let show = self.show_rule(schema, &data_path);

        let children = match (schema.schema_type, schema.items.as_deref()) {
            (SchemaType::Object, _) => {
                let mut children = Vec::with_capacity(schema.properties.len());
                for (name, child_schema) in &schema.properties {
                    let provided = initial.as_ref().and_then(|v| v.get(name)).cloned();
                    children.push(self.mount(
                        name,
                        data_path.child(name),
                        child_schema,
                        schema.is_required(name),
                        provided,
                    ));
                }
                Children::Object(children)
            }
            (SchemaType::Array, Some(item_schema)) => {
                let mut children = Vec::new();
                if let Some(Value::Array(items)) = &initial {
                    for (i, item) in items.iter().enumerate() {
                        children.push(self.mount(
                            &i.to_string(),
                            data_path.index(i),
                            item_schema,
                            false,
                            Some(item.clone()),
                        ));
                    }
                }
                Children::Array(children)
            }
            _ => Children::Leaf,
        };

        let mut node = FieldNode {
            id,
            key: key.to_string(),
            data_path,
            schema: Arc::new(schema.clone()),
            is_required,
            default_value: initial.clone(),
            value: None,
            ui: UiState::default(),
            errors: Vec::new(),
            children,
            show,
            visible: true,
            visibility_memo: None,
            blur_timer: None,
            blur_tokens: 0,
            props_memo: None,
        };
        node.value = match &node.children {
            Children::Leaf => initial,
            Children::Object(_) => node.compose(),
            Children::Array(_) => initial.filter(Value::is_array).and_then(|_| node.compose()),
        };
        node
    }

    fn show_rule(&mut self, schema: &SchemaNode, path: &DataPath) -> ShowRule {
        match &schema.show {
            None => ShowRule::Always,
            Some(ShowSpec::Flag(flag)) => ShowRule::Flag(*flag),
            Some(ShowSpec::Expr(src)) => match self.exprs.get_or_compile(src) {
                Ok(expr) => ShowRule::Expr(expr),
                Err(err) => {
                    warn!(path = %path, error = %err, "invalid show expression, field hidden");
                    ShowRule::Invalid
                }
            },
        }
    }
}

/// Owns the root node plus what node operations need from outside: the id
/// and expression caches, the event channel blur timers report to, and the
/// blur debounce.
pub struct FieldTree {
    root: FieldNode,
    mounter: Mounter,
    events: UnboundedSender<FormEvent>,
    blur_debounce: Duration,
}

impl FieldTree {
    pub fn mount(
        schema: &SchemaNode,
        value: Option<Value>,
        events: UnboundedSender<FormEvent>,
        blur_debounce: Duration,
    ) -> Self {
        let mut mounter = Mounter::default();
        let root = mounter.mount("", DataPath::root(), schema, false, value);
        Self {
            root,
            mounter,
            events,
            blur_debounce,
        }
    }

    pub fn root(&self) -> &FieldNode {
        &self.root
    }

    pub fn value(&self) -> Option<&Value> {
        self.root.value.as_ref()
    }

    pub fn node(&self, path: &DataPath) -> Option<&FieldNode> {
        let segments: Vec<&str> = path.segments().collect();
        self.root.find(&segments)
    }

    fn node_mut(&mut self, path: &DataPath) -> Result<&mut FieldNode, FormError> {
        let segments: Vec<&str> = path.segments().collect();
        self.root
            .find_mut(&segments)
            .ok_or_else(|| FormError::UnknownField(path.clone()))
    }

    fn segments_of<'p>(&self, path: &'p DataPath) -> Result<Vec<&'p str>, FormError> {
        let segments: Vec<&str> = path.segments().collect();
        match self.root.find(&segments) {
            Some(_) => Ok(segments),
            None => Err(FormError::UnknownField(path.clone())),
        }
    }

    /// Route raw input to the node at `path` and return the new root value.
    /// A batch change updates values without marking anything dirty.
    pub fn change(
        &mut self,
        path: &DataPath,
        raw: RawInput,
        batch: bool,
        coercer: &Coercer,
    ) -> Result<Option<Value>, FormError> {
        let segments = self.segments_of(path)?;
        let mounter = &mut self.mounter;
        self.root.update_at(&segments, !batch, |node| {
            node.apply_input(raw, coercer, mounter);
            Ok(())
        })?;
        Ok(self.root.value.clone())
    }

    pub fn push_item(&mut self, path: &DataPath, raw: RawInput, coercer: &Coercer) -> Result<Option<Value>, FormError> {
        let segments = self.segments_of(path)?;
        let mounter = &mut self.mounter;
        self.root
            .update_at(&segments, true, |node| node.push_item(raw, coercer, mounter))?;
        Ok(self.root.value.clone())
    }

    pub fn remove_item(&mut self, path: &DataPath, index: usize) -> Result<Option<Value>, FormError> {
        let segments = self.segments_of(path)?;
        self.root
            .update_at(&segments, true, |node| node.remove_item(index))?;
        Ok(self.root.value.clone())
    }

    pub fn focus(&mut self, path: &DataPath) -> Result<(), FormError> {
        self.node_mut(path)?.focus();
        trace!(path = %path, "focus");
        Ok(())
    }

    pub fn blur(&mut self, path: &DataPath) -> Result<(), FormError> {
        let (events, delay) = (self.events.clone(), self.blur_debounce);
        self.node_mut(path)?.blur(delay, events)?;
        trace!(path = %path, delay_ms = delay.as_millis() as u64, "blur scheduled");
        Ok(())
    }

    pub fn blur_elapsed(&mut self, node: NodeId, token: u64) -> bool {
        self.root
            .find_by_id_mut(node)
            .is_some_and(|n| n.blur_elapsed(token))
    }

    pub fn has_pending_timers(&self) -> bool {
        self.root.has_pending_timers()
    }

    /// Give every node exactly the errors whose data path equals its own.
    pub fn distribute_errors(&mut self, errors: &[ErrorEntry]) {
        let mut by_path: HashMap<DataPath, Vec<ErrorEntry>> = HashMap::new();
        for error in errors {
            by_path
                .entry(error.data_path.clone())
                .or_default()
                .push(error.clone());
        }
        self.root.distribute_errors(&by_path);
    }

    pub fn refresh_visibility(&mut self, snapshot: &FlatSnapshot) {
        self.root.refresh_visibility(snapshot);
    }

    pub fn props(&mut self, path: &DataPath, ctx: &FormContext) -> Option<Arc<FieldProps>> {
        self.node_mut(path).ok().map(|node| node.props(ctx))
    }

    /// Props of every visible field below the root, in tree order. Hidden
    /// fields take their subtrees with them.
    pub fn render(&mut self, ctx: &FormContext) -> Vec<Arc<FieldProps>> {
        let mut out = Vec::new();
        if !self.root.visible {
            return out;
        }
        if let Some(children) = self.root.children_mut() {
            for child in children {
                child.collect_visible(ctx, &mut out);
            }
        }
        out
    }

    /// Carry interaction state over from a tree mounted for an older schema,
    /// for every path whose type did not change. Focus is not carried.
    pub fn adopt_ui_state(&mut self, previous: &FieldTree) {
        let mut recorded = HashMap::new();
        previous.root.record_ui(&mut recorded);
        self.root.adopt_ui(&recorded);
    }
}
