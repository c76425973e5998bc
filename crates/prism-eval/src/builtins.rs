//! The `types.*` scoped functions every interpreter starts with.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::concurrency::{self, Task};
use crate::error::Error;
use crate::host::{Arguments, CallContext, Callable};
use crate::runtime::Runtime;
use crate::value::{Dictionary, Key, Sequence, Set, Value};
use crate::Result;

/// Register the built-ins. `types.Thread` and `types.Lock` are only
/// registered with threading enabled.
pub(crate) fn register(runtime: &Runtime) {
    let mut builtins: Vec<(&str, Callable)> = vec![
        ("types.bool", Callable::new("types.bool", convert_bool)),
        ("types.int", Callable::new("types.int", convert_int)),
        ("types.float", Callable::new("types.float", convert_float)),
        ("types.string", Callable::new("types.string", convert_string)),
        ("types.Sequence", Callable::new("types.Sequence", new_sequence)),
        ("types.Set", Callable::new("types.Set", new_set)),
        ("types.Dictionary", Callable::new("types.Dictionary", new_dictionary)),
    ];
    if runtime.config().threading {
        builtins.push(("types.Thread", Callable::new("types.Thread", new_thread)));
        builtins.push(("types.Lock", Callable::new("types.Lock", new_lock)));
    }
    for (name, callable) in builtins {
        runtime.register_scoped_function(name.to_string(), callable);
    }
}

fn convert_bool(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    Ok(Value::Bool(args.require("v")?.is_truthy()))
}

fn convert_float(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    let converted = match args.require("v")? {
        Value::Float(f) => Some(*f),
        Value::Int(n) => Some(*n as f64),
        Value::Bool(b) => Some(*b as i64 as f64),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(converted.map(Value::Float).unwrap_or_default())
}

/// `types.int(v, base?, is_char?)`; any failed conversion yields None.
fn convert_int(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    let v = args.require("v")?;
    let converted = if let Some(base) = args.optional("base") {
        match (v, base.as_int()) {
            (Value::String(s), Some(base)) if (2..=36).contains(&base) => {
                i64::from_str_radix(s.trim(), base as u32).ok()
            }
            _ => None,
        }
    } else if args.optional("is_char").is_some_and(Value::is_truthy) {
        let mut chars = v.as_str().unwrap_or_default().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c as i64),
            _ => None,
        }
    } else {
        match v {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    };
    Ok(converted.map(Value::Int).unwrap_or_default())
}

/// `types.string(v, int_base?, is_char?)`.
fn convert_string(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    let v = args.require("v")?;
    if let Some(base) = args.optional("int_base") {
        let base = match base.as_int() {
            Some(b) if (2..=36).contains(&b) => b as u32,
            _ => {
                return Err(Error::runtime(format!(
                    "integer base must be between 2 and 36, inclusive, not {}",
                    base
                )))
            }
        };
        let Value::Int(n) = v else {
            return Err(Error::runtime(format!(
                "unable to process non-integer value {}",
                v
            )));
        };
        return Ok(Value::String(to_radix(*n, base)));
    }
    if args.optional("is_char").is_some_and(Value::is_truthy) {
        let code = v
            .as_int()
            .and_then(|n| u32::try_from(n).ok())
            .and_then(char::from_u32)
            .ok_or_else(|| Error::runtime(format!("{} is not a character code", v)))?;
        return Ok(Value::String(code.to_string()));
    }
    Ok(Value::String(v.to_string()))
}

fn to_radix(n: i64, base: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut magnitude = n.unsigned_abs();
    let mut digits = Vec::new();
    while magnitude > 0 {
        let digit = (magnitude % base as u64) as u32;
        digits.push(char::from_digit(digit, base).unwrap_or('?'));
        magnitude /= base as u64;
    }
    if n < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// The elements of a collection argument, or nothing when absent.
fn items_of(args: &Arguments) -> Result<Vec<Value>> {
    match args.optional("items") {
        None => Ok(Vec::new()),
        Some(Value::Sequence(seq)) => Ok(seq.snapshot()),
        Some(Value::Set(set)) => Ok(set.read().iter().map(Key::to_value).collect()),
        Some(Value::Dictionary(dict)) => Ok(dict.read().keys().map(Key::to_value).collect()),
        Some(other) => Err(Error::runtime(format!(
            "cannot build a collection from {}",
            other.type_name()
        ))),
    }
}

fn new_sequence(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    Ok(Value::Sequence(Sequence::new(items_of(args)?)))
}

fn new_set(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    let keys = items_of(args)?
        .iter()
        .map(Key::from_value)
        .collect::<Result<IndexSet<_>>>()?;
    Ok(Value::Set(Set::new(keys)))
}

fn new_dictionary(args: &Arguments, _cx: &CallContext) -> Result<Value> {
    let pairs = match args.optional("items") {
        Some(Value::Dictionary(dict)) => return Ok(Value::Dictionary(Dictionary::new(dict.snapshot()))),
        Some(Value::Sequence(seq)) => seq.snapshot(),
        None => Vec::new(),
        Some(other) => {
            return Err(Error::runtime(format!(
                "cannot build a Dictionary from {}",
                other.type_name()
            )))
        }
    };
    let mut map = IndexMap::new();
    for pair in pairs {
        let entry = match &pair {
            Value::Sequence(seq) => seq.snapshot(),
            _ => Vec::new(),
        };
        let [key, value] = entry.as_slice() else {
            return Err(Error::runtime(format!(
                "Dictionary items must be [key, value] pairs, not {}",
                pair
            )));
        };
        map.insert(Key::from_value(key)?, value.clone());
    }
    Ok(Value::Dictionary(Dictionary::new(map)))
}

/// `types.Thread(_f, ...)`: run a script function (by name) or a callable on
/// a background thread with the remaining arguments.
fn new_thread(args: &Arguments, cx: &CallContext) -> Result<Value> {
    let mut forwarded = args.clone();
    let task = match forwarded.remove("_f") {
        Some(Value::String(name)) => Task::Script(name),
        Some(Value::Callable(callable)) => Task::Callable(callable),
        Some(other) => {
            return Err(Error::runtime(format!(
                "_f must be a function name or a callable, not {}",
                other.type_name()
            )))
        }
        None => return Err(Error::runtime("missing required argument '_f'")),
    };
    let handle = concurrency::spawn(cx.interpreter(), task, forwarded)?;
    Ok(Value::Object(Arc::new(handle)))
}

fn new_lock(_args: &Arguments, cx: &CallContext) -> Result<Value> {
    Ok(Value::Object(cx.runtime().locks().create()))
}
