//! Capabilities of the built-in collections, reached through dotted access.
//!
//! `length` is a plain attribute; everything else is a method handed back
//! as a [`Callable`] bound to the collection it was read from.

use indexmap::IndexSet;
use rand::seq::SliceRandom;

use crate::error::Error;
use crate::host::{Arguments, CallContext, Callable};
use crate::value::{Dictionary, Key, Sequence, Set, Value};
use crate::Result;

/// Look up `name` on `value`. `None` means the value has no such attribute.
pub(crate) fn attribute(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Sequence(seq) => sequence_attribute(seq, name),
        Value::Set(set) => set_attribute(set, name),
        Value::Dictionary(dict) => dictionary_attribute(dict, name),
        Value::Object(obj) => obj.clone().attribute(name),
        _ => None,
    }
}

fn method<T, F>(type_name: &str, name: &str, target: &T, f: F) -> Value
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T, &Arguments) -> Result<Value> + Send + Sync + 'static,
{
    let target = target.clone();
    Value::Callable(Callable::new(
        format!("{}.{}", type_name, name),
        move |args: &Arguments, _cx: &CallContext| f(&target, args),
    ))
}

/// Resolve a possibly negative index against `len`. With `allow_end`, `len`
/// itself is accepted (insertion point).
fn index(len: usize, value: &Value, allow_end: bool) -> Result<usize> {
    let raw = value
        .as_int()
        .ok_or_else(|| Error::runtime(format!("index must be an int, not {}", value.type_name())))?;
    let len_i = len as i64;
    let resolved = if raw < 0 { raw + len_i } else { raw };
    let upper = if allow_end { len_i } else { len_i - 1 };
    if resolved < 0 || resolved > upper {
        return Err(Error::runtime(format!(
            "index {} out of range for Sequence of length {}",
            raw, len
        )));
    }
    Ok(resolved as usize)
}

/// Clamp a slice bound the way a half-open range does.
fn bound(len: usize, value: Option<&Value>, default: usize) -> Result<usize> {
    let Some(value) = value else {
        return Ok(default);
    };
    let raw = value
        .as_int()
        .ok_or_else(|| Error::runtime(format!("slice bound must be an int, not {}", value.type_name())))?;
    let len_i = len as i64;
    let resolved = if raw < 0 { raw + len_i } else { raw };
    Ok(resolved.clamp(0, len_i) as usize)
}

fn sequence_attribute(seq: &Sequence, name: &str) -> Option<Value> {
    const T: &str = "Sequence";
    let value = match name {
        "length" => Value::Int(seq.len() as i64),
        "copy" => method(T, name, seq, |seq: &Sequence, _| {
            Ok(Value::Sequence(Sequence::new(seq.snapshot())))
        }),
        "contains" => method(T, name, seq, |seq: &Sequence, args| {
            let item = args.require("item")?;
            Ok(Value::Bool(seq.snapshot().iter().any(|v| v == item)))
        }),
        "append" => method(T, name, seq, |seq: &Sequence, args| {
            let item = args.require("item")?.clone();
            seq.write().push(item);
            Ok(Value::None)
        }),
        "prepend" => method(T, name, seq, |seq: &Sequence, args| {
            let item = args.require("item")?.clone();
            seq.write().insert(0, item);
            Ok(Value::None)
        }),
        "get" => method(T, name, seq, |seq: &Sequence, args| {
            let items = seq.read();
            let i = index(items.len(), args.require("index")?, false)?;
            Ok(items[i].clone())
        }),
        "insert" => method(T, name, seq, |seq: &Sequence, args| {
            let item = args.require("item")?.clone();
            let mut items = seq.write();
            let i = index(items.len(), args.require("index")?, true)?;
            items.insert(i, item);
            Ok(Value::None)
        }),
        "remove" => method(T, name, seq, |seq: &Sequence, args| {
            let mut items = seq.write();
            let i = index(items.len(), args.require("index")?, false)?;
            items.remove(i);
            Ok(Value::None)
        }),
        "pop_head" => method(T, name, seq, |seq: &Sequence, _| {
            let mut items = seq.write();
            if items.is_empty() {
                return Err(Error::runtime("pop from empty Sequence"));
            }
            Ok(items.remove(0))
        }),
        "pop_tail" => method(T, name, seq, |seq: &Sequence, _| {
            seq.write()
                .pop()
                .ok_or_else(|| Error::runtime("pop from empty Sequence"))
        }),
        "pop_item" => method(T, name, seq, |seq: &Sequence, args| {
            let mut items = seq.write();
            let i = index(items.len(), args.require("index")?, false)?;
            Ok(items.remove(i))
        }),
        "reverse" => method(T, name, seq, |seq: &Sequence, _| {
            seq.write().reverse();
            Ok(Value::None)
        }),
        "shuffle" => method(T, name, seq, |seq: &Sequence, _| {
            seq.write().shuffle(&mut rand::thread_rng());
            Ok(Value::None)
        }),
        "sort" => method(T, name, seq, |seq: &Sequence, _| {
            let mut items = seq.snapshot();
            let mut failure = None;
            items.sort_by(|a, b| match crate::ops::order(a, b) {
                Some(ordering) => ordering,
                None => {
                    failure.get_or_insert_with(|| {
                        Error::runtime(format!(
                            "cannot sort Sequence containing {} and {}",
                            a.type_name(),
                            b.type_name()
                        ))
                    });
                    std::cmp::Ordering::Equal
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
            *seq.write() = items;
            Ok(Value::None)
        }),
        "slice" => method(T, name, seq, |seq: &Sequence, args| {
            let items = seq.read();
            let start = bound(items.len(), args.optional("start"), 0)?;
            let end = bound(items.len(), args.optional("end"), items.len())?;
            let slice = if start < end { items[start..end].to_vec() } else { Vec::new() };
            Ok(Value::Sequence(Sequence::new(slice)))
        }),
        _ => return None,
    };
    Some(value)
}

fn other_set<'a>(args: &'a Arguments) -> Result<&'a Set> {
    match args.require("other_set")? {
        Value::Set(set) => Ok(set),
        other => Err(Error::runtime(format!(
            "other_set must be a Set, not {}",
            other.type_name()
        ))),
    }
}

fn set_attribute(set: &Set, name: &str) -> Option<Value> {
    const T: &str = "Set";
    let value = match name {
        "length" => Value::Int(set.len() as i64),
        "copy" => method(T, name, set, |set: &Set, _| Ok(Value::Set(Set::new(set.snapshot())))),
        "contains" => method(T, name, set, |set: &Set, args| {
            let key = Key::from_value(args.require("item")?)?;
            Ok(Value::Bool(set.read().contains(&key)))
        }),
        "add" => method(T, name, set, |set: &Set, args| {
            let key = Key::from_value(args.require("item")?)?;
            set.write().insert(key);
            Ok(Value::None)
        }),
        "remove" => method(T, name, set, |set: &Set, args| {
            let key = Key::from_value(args.require("item")?)?;
            set.write().shift_remove(&key);
            Ok(Value::None)
        }),
        "get_items" => method(T, name, set, |set: &Set, _| {
            Ok(Value::sequence(set.read().iter().map(Key::to_value)))
        }),
        "union" => method(T, name, set, |set: &Set, args| {
            let other = other_set(args)?.snapshot();
            let mut items = set.snapshot();
            items.extend(other);
            Ok(Value::Set(Set::new(items)))
        }),
        "intersection" => method(T, name, set, |set: &Set, args| {
            let other = other_set(args)?.snapshot();
            let items: IndexSet<Key> = set.read().iter().filter(|k| other.contains(*k)).cloned().collect();
            Ok(Value::Set(Set::new(items)))
        }),
        "difference" => method(T, name, set, |set: &Set, args| {
            let other = other_set(args)?.snapshot();
            let items: IndexSet<Key> = set.read().iter().filter(|k| !other.contains(*k)).cloned().collect();
            Ok(Value::Set(Set::new(items)))
        }),
        _ => return None,
    };
    Some(value)
}

fn dictionary_attribute(dict: &Dictionary, name: &str) -> Option<Value> {
    const T: &str = "Dictionary";
    let value = match name {
        "length" => Value::Int(dict.len() as i64),
        "copy" => method(T, name, dict, |dict: &Dictionary, _| {
            Ok(Value::Dictionary(Dictionary::new(dict.snapshot())))
        }),
        "contains" => method(T, name, dict, |dict: &Dictionary, args| {
            let key = Key::from_value(args.require("item")?)?;
            Ok(Value::Bool(dict.read().contains_key(&key)))
        }),
        "get" => method(T, name, dict, |dict: &Dictionary, args| {
            let key = Key::from_value(args.require("key")?)?;
            match dict.read().get(&key) {
                Some(value) => Ok(value.clone()),
                None => Ok(args.get("default").cloned().unwrap_or_default()),
            }
        }),
        "put" => method(T, name, dict, |dict: &Dictionary, args| {
            let key = Key::from_value(args.require("key")?)?;
            let value = args.require("value")?.clone();
            dict.write().insert(key, value);
            Ok(Value::None)
        }),
        "remove" => method(T, name, dict, |dict: &Dictionary, args| {
            let key = Key::from_value(args.require("key")?)?;
            dict.write().shift_remove(&key);
            Ok(Value::None)
        }),
        "get_items" => method(T, name, dict, |dict: &Dictionary, _| {
            Ok(Value::sequence(
                dict.read()
                    .iter()
                    .map(|(k, v)| Value::sequence([k.to_value(), v.clone()])),
            ))
        }),
        "get_keys" => method(T, name, dict, |dict: &Dictionary, _| {
            Ok(Value::sequence(dict.read().keys().map(Key::to_value)))
        }),
        "get_values" => method(T, name, dict, |dict: &Dictionary, _| {
            Ok(Value::sequence(dict.read().values().cloned()))
        }),
        _ => return None,
    };
    Some(value)
}
