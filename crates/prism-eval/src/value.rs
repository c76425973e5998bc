//! Runtime values for the Prism interpreter.
//!
//! Collections are shared handles: cloning a [`Value::Sequence`] aliases the
//! same underlying list, matching how scripts observe mutation through
//! capability calls such as `seq.append(item=1)`.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::host::{Callable, HostObject};
use crate::stack::ensure_sufficient_stack;

/// A script-visible value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Sequence),
    Set(Set),
    Dictionary(Dictionary),
    Callable(Callable),
    /// A host object exposing named capabilities.
    Object(Arc<dyn HostObject>),
}

/// An ordered, mutable list of values.
#[derive(Clone, Default)]
pub struct Sequence(Arc<RwLock<Vec<Value>>>);

/// An unordered collection of unique hashable values, iterated in insertion order.
#[derive(Clone, Default)]
pub struct Set(Arc<RwLock<IndexSet<Key>>>);

/// A mapping from hashable values to values, iterated in insertion order.
#[derive(Clone, Default)]
pub struct Dictionary(Arc<RwLock<IndexMap<Key, Value>>>);

impl Sequence {
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write()
    }

    /// A copy of the current items.
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Set {
    pub fn new(items: IndexSet<Key>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexSet<Key>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IndexSet<Key>> {
        self.0.write()
    }

    pub fn snapshot(&self) -> IndexSet<Key> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Dictionary {
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn new(items: IndexMap<Key, Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, IndexMap<Key, Value>> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, IndexMap<Key, Value>> {
        self.0.write()
    }

    pub fn snapshot(&self) -> IndexMap<Key, Value> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Sequence(self.clone()))
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Set(self.clone()))
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Dictionary(self.clone()))
    }
}

/// A recursive walk over nested collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Walk {
    Render,
    Compare,
    Order,
    Json,
}

thread_local! {
    static IN_PROGRESS: RefCell<Vec<(Walk, usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a collection (or a pair, for comparisons) as being walked on this
/// thread until dropped. Entering one that is already marked means the walk
/// has come back round a reference cycle.
pub(crate) struct Visit((Walk, usize, usize));

impl Visit {
    pub(crate) fn enter(walk: Walk, left: usize, right: usize) -> Option<Visit> {
        let key = (walk, left, right);
        IN_PROGRESS.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&key) {
                return None;
            }
            active.push(key);
            Some(Visit(key))
        })
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        IN_PROGRESS.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|key| *key == self.0) {
                active.remove(pos);
            }
        });
    }
}

/// Structural equality of two shared collections. A pair already being
/// compared further up the stack counts as equal.
fn shared_eq(left: usize, right: usize, compare: impl FnOnce() -> bool) -> bool {
    match Visit::enter(Walk::Compare, left, right) {
        Some(_visit) => ensure_sufficient_stack(compare),
        None => true,
    }
}

/// A hashable scalar, used for set members and dictionary keys.
///
/// Integral floats normalise to [`Key::Int`] so that `1` and `1.0` are the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a non-integral float.
    Float(u64),
    String(String),
}

impl Key {
    pub fn from_value(value: &Value) -> Result<Key, Error> {
        match value {
            Value::None => Ok(Key::None),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(n) => Ok(Key::Int(*n)),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Ok(Key::Int(*f as i64))
                } else {
                    Ok(Key::Float(f.to_bits()))
                }
            }
            Value::String(s) => Ok(Key::String(s.clone())),
            other => Err(Error::runtime(format!(
                "unhashable type: {}",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_value().fmt_repr(f)
    }
}

impl Value {
    /// Script truthiness: None, False, zero, and empty strings or collections
    /// are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Sequence(s) => !s.is_empty(),
            Value::Set(s) => !s.is_empty(),
            Value::Dictionary(d) => !d.is_empty(),
            Value::Callable(_) | Value::Object(_) => true,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// None and the primitive scalars, which expose no attributes.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)
        )
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "Sequence",
            Value::Set(_) => "Set",
            Value::Dictionary(_) => "Dictionary",
            Value::Callable(_) => "callable",
            Value::Object(obj) => obj.type_name(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Build a Sequence value.
    pub fn sequence(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Sequence(Sequence::new(items.into_iter().collect()))
    }

    /// Build a Set value; fails if any item is unhashable.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Result<Value, Error> {
        let keys = items
            .into_iter()
            .map(|item| Key::from_value(&item))
            .collect::<Result<IndexSet<_>, _>>()?;
        Ok(Value::Set(Set::new(keys)))
    }

    /// Build a Dictionary value; fails if any key is unhashable.
    pub fn dictionary(items: impl IntoIterator<Item = (Value, Value)>) -> Result<Value, Error> {
        let mut map = IndexMap::new();
        for (key, value) in items {
            map.insert(Key::from_value(&key)?, value);
        }
        Ok(Value::Dictionary(Dictionary::new(map)))
    }

    /// Write the quoted form used for values nested inside collections.
    fn fmt_repr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => write!(f, "{}", other),
        }
    }

    /// Parse a JSON string into a Value.
    pub fn from_json(s: &str) -> Result<Value, Error> {
        let json: JsonValue = serde_json::from_str(s)
            .map_err(|e| Error::runtime(format!("JSON parse error: {}", e)))?;
        Ok(Value::from(json))
    }

    /// Convert this Value to a JSON string.
    pub fn to_json(&self) -> String {
        let json = self.to_json_value();
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| "null".to_string())
    }

    /// Convert this Value to a serde_json Value.
    ///
    /// Callables and host objects have no JSON form and become `null`.
    pub fn to_json_value(&self) -> JsonValue {
        match self {
            Value::None | Value::Callable(_) | Value::Object(_) => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(n) => JsonValue::Number((*n).into()),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Sequence(seq) => {
                let Some(_visit) = Visit::enter(Walk::Json, seq.addr(), 0) else {
                    return JsonValue::Null;
                };
                ensure_sufficient_stack(|| {
                    JsonValue::Array(seq.snapshot().iter().map(Value::to_json_value).collect())
                })
            }
            Value::Set(set) => {
                JsonValue::Array(set.read().iter().map(|k| k.to_value().to_json_value()).collect())
            }
            Value::Dictionary(dict) => {
                let Some(_visit) = Visit::enter(Walk::Json, dict.addr(), 0) else {
                    return JsonValue::Null;
                };
                let map: serde_json::Map<String, JsonValue> = dict
                    .snapshot()
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Key::String(s) => s.clone(),
                            other => other.to_value().to_string(),
                        };
                        (key, ensure_sufficient_stack(|| v.to_json_value()))
                    })
                    .collect();
                JsonValue::Object(map)
            }
        }
    }
}

/// Convert a host value into a script value.
///
/// Already-converted values pass through unchanged.
pub fn marshal(value: impl Into<Value>) -> Value {
    value.into()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::String(s) => f.write_str(s),
            Value::Sequence(seq) => {
                let Some(_visit) = Visit::enter(Walk::Render, seq.addr(), 0) else {
                    return f.write_str("[...]");
                };
                ensure_sufficient_stack(|| {
                    f.write_str("[")?;
                    for (i, item) in seq.snapshot().iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        item.fmt_repr(f)?;
                    }
                    f.write_str("]")
                })
            }
            Value::Set(set) => {
                f.write_str("{")?;
                for (i, key) in set.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                f.write_str("}")
            }
            Value::Dictionary(dict) => {
                let Some(_visit) = Visit::enter(Walk::Render, dict.addr(), 0) else {
                    return f.write_str("{...}");
                };
                ensure_sufficient_stack(|| {
                    f.write_str("{")?;
                    for (i, (key, value)) in dict.snapshot().iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}: ", key)?;
                        value.fmt_repr(f)?;
                    }
                    f.write_str("}")
                })
            }
            Value::Callable(callable) => write!(f, "<callable {}>", callable.name()),
            Value::Object(obj) => write!(f, "<{}>", obj.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Float(n) => write!(f, "Float({:?})", n),
            other => write!(f, "{}", other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => {
                a.ptr_eq(b) || shared_eq(a.addr(), b.addr(), || a.snapshot() == b.snapshot())
            }
            (Value::Set(a), Value::Set(b)) => a.ptr_eq(b) || a.snapshot() == b.snapshot(),
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                a.ptr_eq(b) || shared_eq(a.addr(), b.addr(), || a.snapshot() == b.snapshot())
            }
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ---- Marshalling from host types ----

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! int_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Int(n as i64)
            }
        })*
    };
}

int_from!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Callable(c)
    }
}

impl From<Sequence> for Value {
    fn from(s: Sequence) -> Self {
        Value::Sequence(s)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        k.to_value()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::None)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::sequence(items.into_iter().map(Into::into))
    }
}

/// Host sets convert member-wise; members that cannot be hashed are dropped.
impl<T: Into<Value>> From<HashSet<T>> for Value {
    fn from(items: HashSet<T>) -> Self {
        set_from(items.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>> From<BTreeSet<T>> for Value {
    fn from(items: BTreeSet<T>) -> Self {
        set_from(items.into_iter().map(Into::into))
    }
}

impl<K: Into<Value>, V: Into<Value>> From<HashMap<K, V>> for Value {
    fn from(items: HashMap<K, V>) -> Self {
        dictionary_from(items.into_iter().map(|(k, v)| (k.into(), v.into())))
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(items: BTreeMap<K, V>) -> Self {
        dictionary_from(items.into_iter().map(|(k, v)| (k.into(), v.into())))
    }
}

fn set_from(items: impl Iterator<Item = Value>) -> Value {
    Value::Set(Set::new(
        items.filter_map(|item| Key::from_value(&item).ok()).collect(),
    ))
}

fn dictionary_from(items: impl Iterator<Item = (Value, Value)>) -> Value {
    Value::Dictionary(Dictionary::new(
        items
            .filter_map(|(k, v)| Key::from_value(&k).ok().map(|k| (k, v)))
            .collect(),
    ))
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(arr) => Value::sequence(arr.into_iter().map(Value::from)),
            JsonValue::Object(obj) => dictionary_from(
                obj.into_iter()
                    .map(|(k, v)| (Value::String(k), Value::from(v))),
            ),
        }
    }
}
