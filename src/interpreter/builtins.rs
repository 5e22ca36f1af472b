//! Interpreter intrinsics: `print`, `len`, `type_of`, `str`, `gc_collect`,
//! and `range`. Installed into the global environment as ordinary function
//! values so they can be shadowed, piped into, and passed around.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ErrorKind, NaabError};
use crate::interpreter::Interpreter;
use crate::token::SourceLoc;
use crate::value::{Builtin, FunctionData, HeapData, Value};

impl Interpreter {
    pub(crate) fn install_builtins(&mut self) {
        for (name, builtin) in [
            ("print", Builtin::Print),
            ("len", Builtin::Len),
            ("type_of", Builtin::TypeOf),
            ("str", Builtin::Str),
            ("gc_collect", Builtin::GcCollect),
            ("range", Builtin::Range),
        ] {
            let function = Value::function(FunctionData {
                name: Some(name.to_string()),
                params: Vec::new(),
                body: Rc::new(Vec::new()),
                env: RefCell::new(None),
                file: "<builtin>".to_string(),
                line: 0,
                is_async: false,
                builtin: Some(builtin),
            });
            self.globals.define(name, function);
        }
    }

    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(|v| v.display())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output.push(line);
                Ok(Value::Null)
            }

            Builtin::Len => {
                let [value] = arity::<1>("len", args, loc)?;
                match &value {
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(cell) => match &*cell.data.borrow() {
                        HeapData::List(items) => Ok(Value::Int(items.len() as i64)),
                        _ => Ok(Value::Int(0)),
                    },
                    Value::Dict(cell) => match &*cell.data.borrow() {
                        HeapData::Dict(entries) => Ok(Value::Int(entries.len() as i64)),
                        _ => Ok(Value::Int(0)),
                    },
                    other => Err(NaabError::new(
                        ErrorKind::Type,
                        format!("len() is not defined for {}", other.type_name()),
                    )
                    .at(loc.clone())),
                }
            }

            Builtin::TypeOf => {
                let [value] = arity::<1>("type_of", args, loc)?;
                Ok(Value::str(value.type_name()))
            }

            Builtin::Str => {
                let [value] = arity::<1>("str", args, loc)?;
                Ok(Value::str(value.display()))
            }

            Builtin::GcCollect => {
                if !args.is_empty() {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        "gc_collect() takes no arguments",
                    )
                    .at(loc.clone()));
                }
                // Collection must not run mid-expression: values held only by
                // the evaluator would look unreachable. Flag it and sweep at
                // the next statement boundary.
                self.gc_requested = true;
                Ok(Value::Null)
            }

            Builtin::Range => {
                let [start, end] = arity::<2>("range", args, loc)?;
                match (&start, &end) {
                    (Value::Int(a), Value::Int(b)) => {
                        if *a <= *b {
                            Ok(Value::list((*a..=*b).map(Value::Int).collect()))
                        } else {
                            Ok(Value::list(Vec::new()))
                        }
                    }
                    _ => Err(NaabError::new(
                        ErrorKind::Type,
                        "range() expects two int arguments",
                    )
                    .at(loc.clone())),
                }
            }
        }
    }
}

fn arity<const N: usize>(
    name: &str,
    args: Vec<Value>,
    loc: &SourceLoc,
) -> Result<[Value; N], NaabError> {
    let count = args.len();
    args.try_into().map_err(|_| {
        NaabError::new(
            ErrorKind::Type,
            format!("{}() takes {} argument(s), got {}", name, N, count),
        )
        .at(loc.clone())
    })
}
