//! Observable State Tree
//!
//! [`State`] is an observable object: every field has its own [`Dep`], and
//! the set of keys has one more. [`List`] is an observable sequence guarded
//! by a single dep. [`Value`] is the dynamic value stored in both.
//!
//! Reading a field that holds an object or list also records that child's
//! key/list dep, so a watcher that reads `todo.items` re-runs when an item
//! is pushed, not only when `items` is replaced.
//!
//! Objects and lists are shared handles: cloning a `Value::Object` clones
//! the handle, and identity comparison is pointer equality.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::dep::Dep;
use super::traverse::{Traversal, WatchValue};
use crate::error::WatchError;

/// A dynamic, possibly nested, observable value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    List(List),
    Object(State),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&State> {
        match self {
            Self::Object(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Build an observable value from JSON. Objects and arrays become fresh
    /// [`State`]s and [`List`]s.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(Rc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Self::List(List::from_vec(items.iter().map(Self::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let state = State::new();
                {
                    let mut fields = state.inner.fields.borrow_mut();
                    for (key, value) in map {
                        fields.insert(key.clone(), Field::new(Self::from_json(value)));
                    }
                }
                Self::Object(state)
            }
        }
    }

    /// Snapshot this value as JSON without recording dependencies.
    ///
    /// An object or list that contains itself is written as
    /// `"[Circular]"` where it recurs.
    pub fn to_json(&self) -> serde_json::Value {
        self.snapshot(&mut Traversal::new())
    }

    /// `ancestors` holds the objects and lists on the path from the root.
    fn snapshot(&self, ancestors: &mut Traversal) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::List(list) => list.snapshot(ancestors),
            Self::Object(state) => state.snapshot(ancestors),
        }
    }

    /// Record the container dep of an object or list value.
    fn depend_child(&self) {
        match self {
            Self::Object(state) => state.inner.keys.depend(),
            Self::List(list) => list.inner.dep.depend(),
            _ => {}
        }
    }
}

const CIRCULAR: &str = "[Circular]";

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl WatchValue for Value {
    fn is_primitive(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Object(_))
    }

    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }

    fn traverse(&self, traversal: &mut Traversal) {
        match self {
            Self::List(list) => list.traverse(traversal),
            Self::Object(state) => state.traverse(traversal),
            _ => {}
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl PartialEq for Value {
    /// Structural equality of the current contents. Reads are untracked.
    fn eq(&self, other: &Self) -> bool {
        self.to_json() == other.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        Self::Object(state)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(List::from_vec(items))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(&json)
    }
}

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

struct Field {
    dep: Rc<Dep>,
    value: Value,
}

impl Field {
    fn new(value: Value) -> Self {
        Self {
            dep: Dep::new(),
            value,
        }
    }
}

struct StateInner {
    /// Notified when keys are added or removed.
    keys: Rc<Dep>,
    fields: RefCell<IndexMap<String, Field>>,
}

/// An observable object.
#[derive(Clone)]
pub struct State {
    inner: Rc<StateInner>,
}

impl State {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StateInner {
                keys: Dep::new(),
                fields: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Build a state from a JSON object. Non-object JSON yields an empty
    /// state.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match Value::from_json(json) {
            Value::Object(state) => state,
            _ => Self::new(),
        }
    }

    /// Read a field. Missing fields read as [`Value::Null`] and record the
    /// key set, so the reader re-runs once the key is added.
    pub fn get(&self, key: &str) -> Value {
        let found = {
            let fields = self.inner.fields.borrow();
            fields
                .get(key)
                .map(|field| (field.dep.clone(), field.value.clone()))
        };

        match found {
            Some((dep, value)) => {
                dep.depend();
                value.depend_child();
                value
            }
            None => {
                self.inner.keys.depend();
                Value::Null
            }
        }
    }

    /// Write a field, notifying its readers. Adding a key notifies readers
    /// of the key set instead. Writing an identical value is a no-op.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), WatchError> {
        let key = key.into();
        let value = value.into();

        let dep = {
            let mut fields = self.inner.fields.borrow_mut();
            match fields.get_mut(&key) {
                Some(field) if field.value.same_as(&value) => return Ok(()),
                Some(field) => {
                    field.value = value;
                    field.dep.clone()
                }
                None => {
                    fields.insert(key, Field::new(value));
                    self.inner.keys.clone()
                }
            }
        };
        dep.notify()
    }

    /// Remove a field, notifying readers of the field and of the key set.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, WatchError> {
        let removed = self.inner.fields.borrow_mut().shift_remove(key);
        match removed {
            Some(field) => {
                field.dep.notify()?;
                self.inner.keys.notify()?;
                Ok(Some(field.value))
            }
            None => Ok(None),
        }
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.keys.depend();
        self.inner.fields.borrow().contains_key(key)
    }

    /// The keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys.depend();
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.keys.depend();
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot as a JSON object without recording dependencies.
    pub fn to_json(&self) -> serde_json::Value {
        self.snapshot(&mut Traversal::new())
    }

    fn snapshot(&self, ancestors: &mut Traversal) -> serde_json::Value {
        let ptr = Rc::as_ptr(&self.inner);
        if !ancestors.visit(ptr) {
            return serde_json::Value::String(CIRCULAR.to_string());
        }
        let fields: Vec<(String, Value)> = self
            .inner
            .fields
            .borrow()
            .iter()
            .map(|(key, field)| (key.clone(), field.value.clone()))
            .collect();
        let map = fields
            .into_iter()
            .map(|(key, value)| (key, value.snapshot(ancestors)))
            .collect();
        ancestors.leave(ptr);
        serde_json::Value::Object(map)
    }

    fn traverse(&self, traversal: &mut Traversal) {
        if !traversal.visit(Rc::as_ptr(&self.inner)) {
            return;
        }
        self.inner.keys.depend();

        let fields: Vec<(Rc<Dep>, Value)> = self
            .inner
            .fields
            .borrow()
            .values()
            .map(|field| (field.dep.clone(), field.value.clone()))
            .collect();
        for (dep, value) in fields {
            dep.depend();
            value.traverse(traversal);
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({})", self.to_json())
    }
}

// ----------------------------------------------------------------------------
// List
// ----------------------------------------------------------------------------

struct ListInner {
    dep: Rc<Dep>,
    items: RefCell<Vec<Value>>,
}

/// An observable sequence. Any mutation notifies every reader.
#[derive(Clone)]
pub struct List {
    inner: Rc<ListInner>,
}

impl List {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                dep: Dep::new(),
                items: RefCell::new(items),
            }),
        }
    }

    /// Read the item at `index`; out of range reads as [`Value::Null`].
    pub fn get(&self, index: usize) -> Value {
        self.inner.dep.depend();
        let value = self
            .inner
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default();
        value.depend_child();
        value
    }

    pub fn len(&self) -> usize {
        self.inner.dep.depend();
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone out all items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.dep.depend();
        self.inner.items.borrow().clone()
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), WatchError> {
        self.inner.items.borrow_mut().push(value.into());
        self.inner.dep.notify()
    }

    pub fn pop(&self) -> Result<Option<Value>, WatchError> {
        let popped = self.inner.items.borrow_mut().pop();
        if popped.is_some() {
            self.inner.dep.notify()?;
        }
        Ok(popped)
    }

    /// Replace the item at `index`, padding with nulls when `index` is past
    /// the end.
    ///
    /// # Panics
    ///
    /// Panics if `index` is `usize::MAX`, or if padding up to `index`
    /// exceeds the maximum vector capacity.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), WatchError> {
        {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                let Some(len) = index.checked_add(1) else {
                    panic!("list index {index} cannot be padded to");
                };
                items.resize(len, Value::Null);
            }
            items[index] = value.into();
        }
        self.inner.dep.notify()
    }

    /// Snapshot as a JSON array without recording dependencies.
    pub fn to_json(&self) -> serde_json::Value {
        self.snapshot(&mut Traversal::new())
    }

    fn snapshot(&self, ancestors: &mut Traversal) -> serde_json::Value {
        let ptr = Rc::as_ptr(&self.inner);
        if !ancestors.visit(ptr) {
            return serde_json::Value::String(CIRCULAR.to_string());
        }
        let items = self.inner.items.borrow().clone();
        let array = items.iter().map(|item| item.snapshot(ancestors)).collect();
        ancestors.leave(ptr);
        serde_json::Value::Array(array)
    }

    fn traverse(&self, traversal: &mut Traversal) {
        if !traversal.visit(Rc::as_ptr(&self.inner)) {
            return;
        }
        self.inner.dep.depend();
        let items = self.inner.items.borrow().clone();
        for item in &items {
            item.traverse(traversal);
        }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List({})", self.to_json())
    }
}
