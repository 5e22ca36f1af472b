//! Runtime values.
//!
//! A tagged union over the NAAb type universe. Compound values (lists, dicts,
//! struct and enum instances, functions) live in reference-counted heap cells
//! registered with the GC; primitives are inline. Ownership is shared: any
//! number of `Value` handles may point at one cell, and the GC breaks cycles.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{Param, Stmt};
use crate::env::Env;
use crate::error::{ErrorKind, NaabError};
use crate::gc::{self, GcNode};
use crate::token::BindingSpec;
use crate::types::{EnumDef, StructDef};

/// Heap-resident payload of a compound value.
pub enum HeapData {
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    Struct {
        def: Rc<StructDef>,
        /// Field values in declaration order.
        fields: Vec<Value>,
    },
    Enum {
        def: Rc<EnumDef>,
        variant: usize,
        payload: Vec<Value>,
    },
    Function(FunctionData),
    /// A loaded module: member access reads the module environment live.
    Module {
        name: String,
        env: Rc<Env>,
    },
    /// Opaque foreign pointer: registered in the FFI handle table, never
    /// dereferenced by the interpreter.
    Foreign {
        language: String,
        handle: u64,
    },
    /// Swept by the GC; any straggler handle sees an empty husk.
    Cleared,
}

/// Interpreter intrinsics callable without a module prefix. They live in
/// function values so user code can shadow or pipe into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    TypeOf,
    Str,
    GcCollect,
    Range,
}

pub struct FunctionData {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Rc<Vec<Stmt>>,
    /// Captured by reference: later mutations in the enclosing scope are
    /// visible through the closure.
    pub env: RefCell<Option<Rc<Env>>>,
    pub file: String,
    pub line: u32,
    pub is_async: bool,
    pub builtin: Option<Builtin>,
}

pub struct HeapCell {
    id: u64,
    pub data: RefCell<HeapData>,
}

pub type HeapRef = Rc<HeapCell>;

impl HeapCell {
    fn alloc(data: HeapData) -> HeapRef {
        let cell = Rc::new(HeapCell {
            id: gc::next_id(),
            data: RefCell::new(data),
        });
        let node: Rc<dyn GcNode> = cell.clone();
        gc::register(&node);
        cell
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl GcNode for HeapCell {
    fn gc_id(&self) -> u64 {
        self.id
    }

    fn gc_children(&self, out: &mut Vec<Rc<dyn GcNode>>) {
        match &*self.data.borrow() {
            HeapData::List(items) => {
                for item in items {
                    item.push_gc_node(out);
                }
            }
            HeapData::Dict(entries) => {
                for value in entries.values() {
                    value.push_gc_node(out);
                }
            }
            HeapData::Struct { fields, .. } => {
                for value in fields {
                    value.push_gc_node(out);
                }
            }
            HeapData::Enum { payload, .. } => {
                for value in payload {
                    value.push_gc_node(out);
                }
            }
            HeapData::Function(data) => {
                if let Some(env) = data.env.borrow().as_ref() {
                    out.push(env.clone() as Rc<dyn GcNode>);
                }
            }
            HeapData::Module { env, .. } => {
                out.push(env.clone() as Rc<dyn GcNode>);
            }
            HeapData::Foreign { .. } | HeapData::Cleared => {}
        }
    }

    fn gc_clear(&self) {
        {
            let data = self.data.borrow();
            if let HeapData::Function(function) = &*data {
                // Keep the function callable shell but sever the captured
                // environment; the cell is unreachable anyway.
                function.env.borrow_mut().take();
                return;
            }
        }
        *self.data.borrow_mut() = HeapData::Cleared;
    }
}

/// A polyglot-block handle: first-class value carrying the block's language,
/// verbatim body, and header options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub lang: String,
    pub bindings: Vec<BindingSpec>,
    pub body: String,
    pub json_return: bool,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(HeapRef),
    Dict(HeapRef),
    Struct(HeapRef),
    Enum(HeapRef),
    Function(HeapRef),
    Module(HeapRef),
    Block(Rc<BlockData>),
    Foreign(HeapRef),
}

impl Value {
    // -- constructors --

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(HeapCell::alloc(HeapData::List(items)))
    }

    pub fn dict(entries: IndexMap<String, Value>) -> Value {
        Value::Dict(HeapCell::alloc(HeapData::Dict(entries)))
    }

    pub fn struct_instance(def: Rc<StructDef>, fields: Vec<Value>) -> Value {
        Value::Struct(HeapCell::alloc(HeapData::Struct { def, fields }))
    }

    pub fn enum_variant(def: Rc<EnumDef>, variant: usize, payload: Vec<Value>) -> Value {
        Value::Enum(HeapCell::alloc(HeapData::Enum {
            def,
            variant,
            payload,
        }))
    }

    pub fn function(data: FunctionData) -> Value {
        Value::Function(HeapCell::alloc(HeapData::Function(data)))
    }

    pub fn module(name: impl Into<String>, env: Rc<Env>) -> Value {
        Value::Module(HeapCell::alloc(HeapData::Module {
            name: name.into(),
            env,
        }))
    }

    pub fn foreign(language: impl Into<String>, handle: u64) -> Value {
        Value::Foreign(HeapCell::alloc(HeapData::Foreign {
            language: language.into(),
            handle,
        }))
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    // -- introspection --

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "string".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Struct(cell) => match &*cell.data.borrow() {
                HeapData::Struct { def, .. } => def.name.clone(),
                _ => "struct".to_string(),
            },
            Value::Enum(cell) => match &*cell.data.borrow() {
                HeapData::Enum { def, .. } => def.name.clone(),
                _ => "enum".to_string(),
            },
            Value::Function(_) => "function".to_string(),
            Value::Module(cell) => match &*cell.data.borrow() {
                HeapData::Module { name, .. } => format!("module<{}>", name),
                _ => "module".to_string(),
            },
            Value::Block(block) => format!("block<{}>", block.lang),
            Value::Foreign(cell) => match &*cell.data.borrow() {
                HeapData::Foreign { language, .. } => format!("foreign<{}>", language),
                _ => "foreign".to_string(),
            },
        }
    }

    /// The heap cell behind a compound value, if any.
    pub fn heap_ref(&self) -> Option<&HeapRef> {
        match self {
            Value::List(c)
            | Value::Dict(c)
            | Value::Struct(c)
            | Value::Enum(c)
            | Value::Function(c)
            | Value::Module(c)
            | Value::Foreign(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn push_gc_node(&self, out: &mut Vec<Rc<dyn GcNode>>) {
        if let Some(cell) = self.heap_ref() {
            out.push(cell.clone() as Rc<dyn GcNode>);
        }
    }

    /// False: null, false, 0, 0.0, "", empty list, empty dict.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(cell) => match &*cell.data.borrow() {
                HeapData::List(items) => !items.is_empty(),
                _ => false,
            },
            Value::Dict(cell) => match &*cell.data.borrow() {
                HeapData::Dict(entries) => !entries.is_empty(),
                _ => false,
            },
            _ => true,
        }
    }

    // -- equality --

    /// Structural equality. `1 == 1.0` is true: equality coerces numerically
    /// (ordering never does).
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                match (&*a.data.borrow(), &*b.data.borrow()) {
                    (HeapData::List(xs), HeapData::List(ys)) => {
                        xs.len() == ys.len()
                            && xs.iter().zip(ys.iter()).all(|(x, y)| x.equals(y))
                    }
                    _ => false,
                }
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                match (&*a.data.borrow(), &*b.data.borrow()) {
                    (HeapData::Dict(xs), HeapData::Dict(ys)) => {
                        xs.len() == ys.len()
                            && xs.iter().all(|(k, x)| {
                                ys.get(k).is_some_and(|y| x.equals(y))
                            })
                    }
                    _ => false,
                }
            }
            (Value::Struct(a), Value::Struct(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                match (&*a.data.borrow(), &*b.data.borrow()) {
                    (
                        HeapData::Struct { def: da, fields: fa },
                        HeapData::Struct { def: db, fields: fb },
                    ) => {
                        Rc::ptr_eq(da, db)
                            && fa.len() == fb.len()
                            && fa.iter().zip(fb.iter()).all(|(x, y)| x.equals(y))
                    }
                    _ => false,
                }
            }
            (Value::Enum(a), Value::Enum(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                match (&*a.data.borrow(), &*b.data.borrow()) {
                    (
                        HeapData::Enum {
                            def: da,
                            variant: va,
                            payload: pa,
                        },
                        HeapData::Enum {
                            def: db,
                            variant: vb,
                            payload: pb,
                        },
                    ) => {
                        Rc::ptr_eq(da, db)
                            && va == vb
                            && pa.len() == pb.len()
                            && pa.iter().zip(pb.iter()).all(|(x, y)| x.equals(y))
                    }
                    _ => false,
                }
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Block(a), Value::Block(b)) => a == b,
            (Value::Foreign(a), Value::Foreign(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    // -- ordering --

    /// Defined for numbers (int widens to float), strings, and element-wise
    /// for lists of comparables. Anything else is a `TypeError`.
    pub fn compare(&self, other: &Value) -> Result<std::cmp::Ordering, NaabError> {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(nan_order),
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).partial_cmp(b).ok_or_else(nan_order)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.partial_cmp(&(*b as f64)).ok_or_else(nan_order)
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let xs = match &*a.data.borrow() {
                    HeapData::List(xs) => xs.clone(),
                    _ => Vec::new(),
                };
                let ys = match &*b.data.borrow() {
                    HeapData::List(ys) => ys.clone(),
                    _ => Vec::new(),
                };
                for (x, y) in xs.iter().zip(ys.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Ok(unequal),
                    }
                }
                Ok(xs.len().cmp(&ys.len()))
            }
            _ => Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "cannot order {} against {}",
                    self.type_name(),
                    other.type_name()
                ),
            )),
        }
    }

    // -- cloning --

    /// Copy-on-assignment: lists and dicts copy deeply (cycle-aware), structs
    /// and everything else share.
    pub fn deep_copy(&self) -> Value {
        let mut memo: IndexMap<u64, Value> = IndexMap::new();
        self.deep_copy_memo(&mut memo)
    }

    fn deep_copy_memo(&self, memo: &mut IndexMap<u64, Value>) -> Value {
        match self {
            Value::List(cell) => {
                if let Some(copied) = memo.get(&cell.id()) {
                    return copied.clone();
                }
                let copy = Value::list(Vec::new());
                memo.insert(cell.id(), copy.clone());
                let items: Vec<Value> = match &*cell.data.borrow() {
                    HeapData::List(items) => {
                        items.iter().map(|v| v.deep_copy_memo(memo)).collect()
                    }
                    _ => Vec::new(),
                };
                if let Value::List(new_cell) = &copy {
                    *new_cell.data.borrow_mut() = HeapData::List(items);
                }
                copy
            }
            Value::Dict(cell) => {
                if let Some(copied) = memo.get(&cell.id()) {
                    return copied.clone();
                }
                let copy = Value::dict(IndexMap::new());
                memo.insert(cell.id(), copy.clone());
                let entries: IndexMap<String, Value> = match &*cell.data.borrow() {
                    HeapData::Dict(entries) => entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.deep_copy_memo(memo)))
                        .collect(),
                    _ => IndexMap::new(),
                };
                if let Value::Dict(new_cell) = &copy {
                    *new_cell.data.borrow_mut() = HeapData::Dict(entries);
                }
                copy
            }
            other => other.clone(),
        }
    }

    // -- traversal --

    /// Invoke `f` on every reachable child value, cycle-safe. This is the
    /// uniform walk the GC and snapshot logic build on.
    pub fn traverse(&self, f: &mut dyn FnMut(&Value)) {
        let mut seen: HashSet<u64> = HashSet::new();
        self.traverse_inner(f, &mut seen);
    }

    fn traverse_inner(&self, f: &mut dyn FnMut(&Value), seen: &mut HashSet<u64>) {
        if let Some(cell) = self.heap_ref() {
            if !seen.insert(cell.id()) {
                return;
            }
        }
        let children: Vec<Value> = match self.heap_ref() {
            Some(cell) => match &*cell.data.borrow() {
                HeapData::List(items) => items.clone(),
                HeapData::Dict(entries) => entries.values().cloned().collect(),
                HeapData::Struct { fields, .. } => fields.clone(),
                HeapData::Enum { payload, .. } => payload.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        for child in children {
            f(&child);
            child.traverse_inner(f, seen);
        }
    }

    // -- display --

    /// User-facing formatting: bare at the top level, quoted inside
    /// containers.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(&mut HashSet::new()),
        }
    }

    fn repr(&self, seen: &mut HashSet<u64>) -> String {
        if let Some(cell) = self.heap_ref() {
            if !seen.insert(cell.id()) {
                return "...".to_string();
            }
        }
        let out = match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    format!("{:.1}", x)
                } else {
                    x.to_string()
                }
            }
            Value::Str(s) => format!("\"{}\"", s),
            Value::List(cell) => match &*cell.data.borrow() {
                HeapData::List(items) => {
                    let parts: Vec<String> = items.iter().map(|v| v.repr(seen)).collect();
                    format!("[{}]", parts.join(", "))
                }
                _ => "[]".to_string(),
            },
            Value::Dict(cell) => match &*cell.data.borrow() {
                HeapData::Dict(entries) => {
                    let parts: Vec<String> = entries
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v.repr(seen)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                _ => "{}".to_string(),
            },
            Value::Struct(cell) => match &*cell.data.borrow() {
                HeapData::Struct { def, fields } => {
                    let parts: Vec<String> = def
                        .fields
                        .iter()
                        .zip(fields.iter())
                        .map(|(fd, v)| format!("{}: {}", fd.name, v.repr(seen)))
                        .collect();
                    format!("{} {{ {} }}", def.name, parts.join(", "))
                }
                _ => "<struct>".to_string(),
            },
            Value::Enum(cell) => match &*cell.data.borrow() {
                HeapData::Enum {
                    def,
                    variant,
                    payload,
                } => {
                    let name = def
                        .variants
                        .get(*variant)
                        .map(|v| v.name.as_str())
                        .unwrap_or("?");
                    if payload.is_empty() {
                        name.to_string()
                    } else {
                        let parts: Vec<String> =
                            payload.iter().map(|v| v.repr(seen)).collect();
                        format!("{}({})", name, parts.join(", "))
                    }
                }
                _ => "<enum>".to_string(),
            },
            Value::Function(cell) => match &*cell.data.borrow() {
                HeapData::Function(data) => match &data.name {
                    Some(name) => format!("<fn {}>", name),
                    None => "<fn>".to_string(),
                },
                _ => "<fn>".to_string(),
            },
            Value::Module(cell) => match &*cell.data.borrow() {
                HeapData::Module { name, .. } => format!("<module {}>", name),
                _ => "<module>".to_string(),
            },
            Value::Block(block) => format!("<<{} block>>", block.lang),
            Value::Foreign(cell) => match &*cell.data.borrow() {
                HeapData::Foreign { language, handle } => {
                    format!("<foreign {} #{}>", language, handle)
                }
                _ => "<foreign>".to_string(),
            },
        };
        if let Some(cell) = self.heap_ref() {
            seen.remove(&cell.id());
        }
        out
    }

    // -- JSON --

    /// Convert to a JSON document using the polyglot binding protocol:
    /// structs become objects keyed by field name; enum variants become
    /// `{"variant": ..., "payload": [...]}`.
    pub fn to_json(&self) -> Result<serde_json::Value, NaabError> {
        match self {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Int(n) => Ok(serde_json::Value::from(*n)),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    NaabError::new(ErrorKind::Type, "non-finite float is not valid JSON")
                }),
            Value::Str(s) => Ok(serde_json::Value::String(s.clone())),
            Value::List(cell) => match &*cell.data.borrow() {
                HeapData::List(items) => {
                    let arr: Result<Vec<_>, _> = items.iter().map(|v| v.to_json()).collect();
                    Ok(serde_json::Value::Array(arr?))
                }
                _ => Ok(serde_json::Value::Array(Vec::new())),
            },
            Value::Dict(cell) => match &*cell.data.borrow() {
                HeapData::Dict(entries) => {
                    let mut map = serde_json::Map::new();
                    for (k, v) in entries {
                        map.insert(k.clone(), v.to_json()?);
                    }
                    Ok(serde_json::Value::Object(map))
                }
                _ => Ok(serde_json::Value::Object(serde_json::Map::new())),
            },
            Value::Struct(cell) => match &*cell.data.borrow() {
                HeapData::Struct { def, fields } => {
                    let mut map = serde_json::Map::new();
                    for (fd, v) in def.fields.iter().zip(fields.iter()) {
                        map.insert(fd.name.clone(), v.to_json()?);
                    }
                    Ok(serde_json::Value::Object(map))
                }
                _ => Ok(serde_json::Value::Object(serde_json::Map::new())),
            },
            Value::Enum(cell) => match &*cell.data.borrow() {
                HeapData::Enum {
                    def,
                    variant,
                    payload,
                } => {
                    let mut map = serde_json::Map::new();
                    let name = def
                        .variants
                        .get(*variant)
                        .map(|v| v.name.clone())
                        .unwrap_or_default();
                    map.insert("variant".into(), serde_json::Value::String(name));
                    let arr: Result<Vec<_>, _> = payload.iter().map(|v| v.to_json()).collect();
                    map.insert("payload".into(), serde_json::Value::Array(arr?));
                    Ok(serde_json::Value::Object(map))
                }
                _ => Ok(serde_json::Value::Null),
            },
            other => Err(NaabError::new(
                ErrorKind::Type,
                format!("{} cannot be serialized to JSON", other.type_name()),
            )),
        }
    }

    /// Inverse of [`Value::to_json`] under the binding protocol; objects come
    /// back as dicts (struct identity does not survive the boundary), and an
    /// integer that overflows 64 bits comes back as its decimal string.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None if n.is_u64() => Value::str(n.to_string()),
                None => match n.as_f64() {
                    Some(x) => Value::Float(x),
                    None => Value::str(n.to_string()),
                },
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::list(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let entries: IndexMap<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect();
                Value::dict(entries)
            }
        }
    }
}

fn nan_order() -> NaabError {
    NaabError::new(ErrorKind::Type, "NaN is not ordered")
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repr(&mut HashSet::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of_ints(ns: &[i64]) -> Value {
        Value::list(ns.iter().map(|n| Value::Int(*n)).collect())
    }

    #[test]
    fn truthiness_table() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(!Value::dict(IndexMap::new()).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::str("x").is_truthy());
    }

    #[test]
    fn numeric_equality_coerces_but_ordering_is_widened() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(!Value::Int(1).equals(&Value::Float(1.5)));
        assert_eq!(
            Value::Int(1).compare(&Value::Float(1.5)).unwrap(),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn string_ordering_is_not_numeric() {
        let err = Value::str("1").compare(&Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn list_equality_is_structural() {
        assert!(list_of_ints(&[1, 2]).equals(&list_of_ints(&[1, 2])));
        assert!(!list_of_ints(&[1, 2]).equals(&list_of_ints(&[2, 1])));
    }

    #[test]
    fn list_ordering_is_elementwise() {
        assert_eq!(
            list_of_ints(&[1, 2]).compare(&list_of_ints(&[1, 3])).unwrap(),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            list_of_ints(&[1]).compare(&list_of_ints(&[1, 0])).unwrap(),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn deep_copy_detaches_lists() {
        let original = list_of_ints(&[1, 2]);
        let copy = original.deep_copy();
        if let (Value::List(a), Value::List(b)) = (&original, &copy) {
            assert!(!Rc::ptr_eq(a, b));
        }
        if let Value::List(cell) = &copy {
            if let HeapData::List(items) = &mut *cell.data.borrow_mut() {
                items.push(Value::Int(3));
            }
        }
        assert!(original.equals(&list_of_ints(&[1, 2])), "original untouched");
    }

    #[test]
    fn deep_copy_survives_self_reference() {
        let d = Value::dict(IndexMap::new());
        if let Value::Dict(cell) = &d {
            if let HeapData::Dict(entries) = &mut *cell.data.borrow_mut() {
                entries.insert("me".into(), d.clone());
            }
        }
        let copy = d.deep_copy();
        if let (Value::Dict(a), Value::Dict(b)) = (&d, &copy) {
            assert!(!Rc::ptr_eq(a, b));
        }
        // The copy's self-edge points at the copy, not the original.
        if let Value::Dict(cell) = &copy {
            if let HeapData::Dict(entries) = &*cell.data.borrow() {
                if let Some(Value::Dict(inner)) = entries.get("me") {
                    if let Value::Dict(outer) = &copy {
                        assert!(Rc::ptr_eq(inner, outer));
                    }
                }
            }
        }
    }

    #[test]
    fn display_formats_compounds() {
        let mut entries = IndexMap::new();
        entries.insert("a".into(), Value::Int(1));
        let d = Value::dict(entries);
        assert_eq!(d.display(), "{a: 1}");
        assert_eq!(list_of_ints(&[1, 2]).display(), "[1, 2]");
        assert_eq!(Value::str("plain").display(), "plain");
        assert_eq!(
            Value::list(vec![Value::str("q")]).display(),
            "[\"q\"]"
        );
    }

    #[test]
    fn cyclic_display_does_not_hang() {
        let d = Value::dict(IndexMap::new());
        if let Value::Dict(cell) = &d {
            if let HeapData::Dict(entries) = &mut *cell.data.borrow_mut() {
                entries.insert("me".into(), d.clone());
            }
        }
        assert_eq!(d.display(), "{me: ...}");
    }

    #[test]
    fn json_round_trip_preserves_order_and_values() {
        let mut entries = IndexMap::new();
        entries.insert("z".into(), Value::Int(1));
        entries.insert("a".into(), list_of_ints(&[1, 2]));
        let original = Value::dict(entries);
        let json = original.to_json().unwrap();
        let back = Value::from_json(&json);
        assert!(original.equals(&back));
        if let Value::Dict(cell) = &back {
            if let HeapData::Dict(entries) = &*cell.data.borrow() {
                let keys: Vec<&String> = entries.keys().collect();
                assert_eq!(keys, vec!["z", "a"], "insertion order preserved");
            }
        }
    }

    #[test]
    fn json_integer_overflow_becomes_string() {
        let big: serde_json::Value = serde_json::from_str("9223372036854775808").unwrap();
        assert!(Value::from_json(&big).equals(&Value::str("9223372036854775808")));
        let in_range: serde_json::Value = serde_json::from_str("9223372036854775807").unwrap();
        assert!(Value::from_json(&in_range).equals(&Value::Int(i64::MAX)));
    }

    #[test]
    fn block_handles_are_first_class() {
        let block = Value::Block(Rc::new(BlockData {
            lang: "python".into(),
            bindings: vec![BindingSpec {
                name: "x".into(),
                by_ref: false,
            }],
            body: "x + 1".into(),
            json_return: false,
        }));
        assert_eq!(block.type_name(), "block<python>");
        assert_eq!(block.display(), "<<python block>>");
        assert!(block.equals(&block.clone()));
        assert!(block.is_truthy());
    }

    #[test]
    fn foreign_handles_are_opaque() {
        let handle = Value::foreign("cpp", 7);
        assert_eq!(handle.type_name(), "foreign<cpp>");
        assert!(handle.equals(&handle.clone()));
        assert!(!handle.equals(&Value::foreign("cpp", 7)), "identity, not structure");
        assert!(handle.to_json().is_err(), "never serialized");
    }

    #[test]
    fn traverse_reaches_nested_values_once() {
        let inner = list_of_ints(&[7]);
        let outer = Value::list(vec![inner.clone(), inner]);
        let mut ints = 0;
        outer.traverse(&mut |v| {
            if matches!(v, Value::Int(7)) {
                ints += 1;
            }
        });
        // Shared cell visited once, so its element is reported once.
        assert_eq!(ints, 1);
    }
}
