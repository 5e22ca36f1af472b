//! Expression evaluation.
//!
//! Operands, arguments, and literal elements evaluate strictly left to
//! right. `&&`/`||` short-circuit; `|>` evaluates its left side first and
//! only then its right side.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{BinaryOp, Expr, MatchArm, Param, Pattern, Stmt, TypeExpr, UnaryOp};
use crate::env::Env;
use crate::error::{ErrorKind, Frame, NaabError};
use crate::interpreter::Interpreter;
use crate::suggest::find_similar;
use crate::token::SourceLoc;
use crate::types::{type_of_value, StructDef};
use crate::validate;
use crate::value::{FunctionData, HeapData, Value};

impl Interpreter {
    pub(crate) fn eval_expr(&mut self, expr: &Expr, env: &Rc<Env>) -> Result<Value, NaabError> {
        self.eval_depth += 1;
        let result = self.eval_expr_inner(expr, env);
        self.eval_depth -= 1;
        result
    }

    fn eval_expr_inner(&mut self, expr: &Expr, env: &Rc<Env>) -> Result<Value, NaabError> {
        match expr {
            Expr::Null(_) => Ok(Value::Null),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::Int(n, _) => Ok(Value::Int(*n)),
            Expr::Float(x, _) => Ok(Value::Float(*x)),
            Expr::Str(s, loc) => {
                self.config
                    .limits
                    .check_string_len(s.len())
                    .map_err(|e| e.at(loc.clone()))?;
                Ok(Value::str(s.clone()))
            }

            Expr::Identifier(name, loc) => self.resolve_identifier(name, loc, env),

            Expr::Binary {
                op,
                left,
                right,
                loc,
            } => self.eval_binary(*op, left, right, loc, env),

            Expr::Unary { op, operand, loc } => {
                let value = self.eval_expr(operand, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(n) => Ok(Value::Int(
                            validate::checked_neg(n).map_err(|e| e.at(loc.clone()))?,
                        )),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        other => Err(NaabError::new(
                            ErrorKind::Type,
                            format!("cannot negate {}", other.type_name()),
                        )
                        .at(loc.clone())),
                    },
                }
            }

            Expr::Call { callee, args, loc } => self.eval_call(callee, args, loc, env),

            Expr::Member { object, field, loc } => {
                // `Enum.Variant` reaches here when the enum name is not a
                // runtime binding.
                if let Expr::Identifier(name, _) = object.as_ref() {
                    if !env.is_defined(name) {
                        if let Some(value) = self.try_unit_variant(name, field, loc)? {
                            return Ok(value);
                        }
                    }
                }
                let target = self.eval_expr(object, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                self.member_access(&target, field, loc)
            }

            Expr::Index { object, index, loc } => {
                let target = self.eval_expr(object, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                let key = self.eval_expr(index, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                self.index_access(&target, &key, loc)
            }

            Expr::StructLiteral {
                module,
                name,
                type_args,
                fields,
                loc,
            } => self.eval_struct_literal(module.as_deref(), name, type_args, fields, loc, env),

            Expr::List { elements, loc } => {
                self.config
                    .limits
                    .check_literal_elements(elements.len())
                    .map_err(|e| e.at(loc.clone()))?;
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expr(element, env)?);
                    if self.flow_interrupted() {
                        return Ok(Value::Null);
                    }
                }
                Ok(Value::list(items))
            }

            Expr::Dict { entries, loc } => {
                self.config
                    .limits
                    .check_literal_elements(entries.len())
                    .map_err(|e| e.at(loc.clone()))?;
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    let value = self.eval_expr(value_expr, env)?;
                    if self.flow_interrupted() {
                        return Ok(Value::Null);
                    }
                    map.insert(key.clone(), value);
                }
                Ok(Value::dict(map))
            }

            Expr::Lambda {
                params,
                body,
                is_async,
                loc,
            } => Ok(self.make_function(None, params.clone(), body.clone(), env, *is_async, loc)),

            Expr::Pipeline { left, right, loc } => self.eval_pipeline(left, right, loc, env),

            Expr::Range { start, end, loc } => {
                let start_value = self.eval_expr(start, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                let end_value = self.eval_expr(end, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                match (&start_value, &end_value) {
                    (Value::Int(a), Value::Int(b)) => {
                        if *a <= *b {
                            Ok(Value::list((*a..=*b).map(Value::Int).collect()))
                        } else {
                            Ok(Value::list(Vec::new()))
                        }
                    }
                    _ => Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "range bounds must be int, got {} and {}",
                            start_value.type_name(),
                            end_value.type_name()
                        ),
                    )
                    .at(loc.clone())),
                }
            }

            Expr::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let test = self.eval_expr(cond, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                if test.is_truthy() {
                    let scope = Env::child(env);
                    self.exec_block_body(then_body, &scope)
                } else if let Some(else_body) = else_body {
                    let scope = Env::child(env);
                    self.exec_block_body(else_body, &scope)
                } else {
                    Ok(Value::Null)
                }
            }

            Expr::Match { subject, arms, loc } => {
                let value = self.eval_expr(subject, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                self.eval_match(&value, arms, loc, env)
            }

            Expr::Polyglot {
                lang,
                bindings,
                body,
                json_return,
                loc,
            } => self.eval_polyglot_single(lang, bindings, body, *json_return, loc, env),

            Expr::Await { operand, .. } => {
                // Polyglot futures resolve inside the dispatcher; by the time
                // a value reaches NAAb code it is already settled.
                self.eval_expr(operand, env)
            }
        }
    }

    // -- identifiers --

    fn resolve_identifier(
        &mut self,
        name: &str,
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        // A bare unit variant (`None`) is a value when exactly one enum
        // declares it.
        if let Some((def, idx)) = self.types.enum_with_variant(name) {
            if def.variants[idx].payload.is_empty() {
                return Ok(Value::enum_variant(def, idx, Vec::new()));
            }
        }
        let suggestion = find_similar(
            name,
            env.visible_names().iter().map(|s| s.as_str()),
            2,
        );
        Err(NaabError::new(
            ErrorKind::Name,
            format!("undefined name '{}'", name),
        )
        .at(loc.clone())
        .with_suggestion(suggestion))
    }

    fn try_unit_variant(
        &mut self,
        enum_name: &str,
        variant: &str,
        loc: &SourceLoc,
    ) -> Result<Option<Value>, NaabError> {
        let qualified = self.resolve_type_key(None, enum_name);
        let Some(def) = self.types.get_enum(&qualified) else {
            return Ok(None);
        };
        let Some(idx) = def.variant_index(variant) else {
            return Err(NaabError::new(
                ErrorKind::Name,
                format!("enum '{}' has no variant '{}'", qualified, variant),
            )
            .at(loc.clone()));
        };
        if def.variants[idx].payload.is_empty() {
            Ok(Some(Value::enum_variant(def, idx, Vec::new())))
        } else {
            Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "variant '{}' carries a payload; construct it with arguments",
                    variant
                ),
            )
            .at(loc.clone()))
        }
    }

    // -- binary operators --

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        // Short-circuit forms first.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let lhs = self.eval_expr(left, env)?;
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            let decided = match op {
                BinaryOp::And => !lhs.is_truthy(),
                _ => lhs.is_truthy(),
            };
            if decided {
                return Ok(Value::Bool(lhs.is_truthy()));
            }
            let rhs = self.eval_expr(right, env)?;
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            return Ok(Value::Bool(rhs.is_truthy()));
        }

        let lhs = self.eval_expr(left, env)?;
        if self.flow_interrupted() {
            return Ok(Value::Null);
        }
        let rhs = self.eval_expr(right, env)?;
        if self.flow_interrupted() {
            return Ok(Value::Null);
        }
        self.apply_binary(op, lhs, rhs, loc)
    }

    fn apply_binary(
        &mut self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        use std::cmp::Ordering;
        let at = |e: NaabError| e.at(loc.clone());
        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs.equals(&rhs))),
            BinaryOp::NotEq => Ok(Value::Bool(!lhs.equals(&rhs))),
            BinaryOp::Lt => Ok(Value::Bool(lhs.compare(&rhs).map_err(at)? == Ordering::Less)),
            BinaryOp::Gt => Ok(Value::Bool(
                lhs.compare(&rhs).map_err(at)? == Ordering::Greater,
            )),
            BinaryOp::LtEq => Ok(Value::Bool(lhs.compare(&rhs).map_err(at)? != Ordering::Greater)),
            BinaryOp::GtEq => Ok(Value::Bool(lhs.compare(&rhs).map_err(at)? != Ordering::Less)),

            BinaryOp::Add => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    Ok(Value::Int(validate::checked_add(*a, *b).map_err(at)?))
                }
                (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
                (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
                (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
                (Value::Str(a), other) => Ok(Value::str(format!("{}{}", a, other.display()))),
                (other, Value::Str(b)) => Ok(Value::str(format!("{}{}", other.display(), b))),
                _ => Err(at(type_mismatch(op.symbol(), &lhs, &rhs))),
            },
            BinaryOp::Sub => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    Ok(Value::Int(validate::checked_sub(*a, *b).map_err(at)?))
                }
                (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
                (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 - b)),
                (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a - *b as f64)),
                _ => Err(at(type_mismatch(op.symbol(), &lhs, &rhs))),
            },
            BinaryOp::Mul => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    Ok(Value::Int(validate::checked_mul(*a, *b).map_err(at)?))
                }
                (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
                (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 * b)),
                (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a * *b as f64)),
                _ => Err(at(type_mismatch(op.symbol(), &lhs, &rhs))),
            },
            BinaryOp::Div => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    Ok(Value::Int(validate::checked_div(*a, *b).map_err(at)?))
                }
                (Value::Float(_), Value::Float(b)) if *b == 0.0 => Err(at(NaabError::new(
                    ErrorKind::Arithmetic,
                    "division by zero",
                ))),
                (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
                (Value::Int(_), Value::Float(b)) if *b == 0.0 => Err(at(NaabError::new(
                    ErrorKind::Arithmetic,
                    "division by zero",
                ))),
                (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 / b)),
                (Value::Float(_), Value::Int(0)) => Err(at(NaabError::new(
                    ErrorKind::Arithmetic,
                    "division by zero",
                ))),
                (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a / *b as f64)),
                _ => Err(at(type_mismatch(op.symbol(), &lhs, &rhs))),
            },
            BinaryOp::Mod => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    Ok(Value::Int(validate::checked_rem(*a, *b).map_err(at)?))
                }
                _ => Err(at(type_mismatch(op.symbol(), &lhs, &rhs))),
            },
            BinaryOp::Pow => match (&lhs, &rhs) {
                (Value::Int(a), Value::Int(b)) => {
                    Ok(Value::Int(validate::checked_pow(*a, *b).map_err(at)?))
                }
                (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a.powf(*b))),
                (Value::Int(a), Value::Float(b)) => Ok(Value::Float((*a as f64).powf(*b))),
                (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a.powf(*b as f64))),
                _ => Err(at(type_mismatch(op.symbol(), &lhs, &rhs))),
            },
            BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited above"),
        }
    }

    // -- member & index access --

    pub(crate) fn member_access(
        &mut self,
        target: &Value,
        field: &str,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        match target {
            Value::Struct(cell) => match &*cell.data.borrow() {
                HeapData::Struct { def, fields } => match def.field_index(field) {
                    Some(idx) => Ok(fields[idx].clone()),
                    None => Err(NaabError::new(
                        ErrorKind::Name,
                        format!("struct '{}' has no field '{}'", def.name, field),
                    )
                    .at(loc.clone())
                    .with_suggestion(find_similar(
                        field,
                        def.fields.iter().map(|f| f.name.as_str()),
                        2,
                    ))),
                },
                _ => Err(cleared_value(loc)),
            },
            Value::Module(cell) => match &*cell.data.borrow() {
                HeapData::Module { name, env } => env.get(field).ok_or_else(|| {
                    NaabError::new(
                        ErrorKind::Name,
                        format!("module '{}' has no binding '{}'", name, field),
                    )
                    .at(loc.clone())
                    .with_suggestion(find_similar(
                        field,
                        env.local_names().iter().map(|s| s.as_str()),
                        2,
                    ))
                }),
                _ => Err(cleared_value(loc)),
            },
            // Dict member access is shorthand for index-by-string-key.
            Value::Dict(cell) => match &*cell.data.borrow() {
                HeapData::Dict(entries) => entries.get(field).cloned().ok_or_else(|| {
                    NaabError::new(ErrorKind::Key, format!("missing key '{}'", field))
                        .at(loc.clone())
                }),
                _ => Err(cleared_value(loc)),
            },
            other => Err(NaabError::new(
                ErrorKind::Type,
                format!("cannot access member '{}' on {}", field, other.type_name()),
            )
            .at(loc.clone())),
        }
    }

    fn index_access(
        &mut self,
        target: &Value,
        key: &Value,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        match (target, key) {
            (Value::List(cell), Value::Int(idx)) => match &*cell.data.borrow() {
                HeapData::List(items) => {
                    let i = usize::try_from(*idx).map_err(|_| index_error(*idx, items.len(), loc))?;
                    items
                        .get(i)
                        .cloned()
                        .ok_or_else(|| index_error(*idx, items.len(), loc))
                }
                _ => Err(cleared_value(loc)),
            },
            (Value::Dict(cell), Value::Str(k)) => match &*cell.data.borrow() {
                HeapData::Dict(entries) => entries.get(k).cloned().ok_or_else(|| {
                    NaabError::new(ErrorKind::Key, format!("missing key '{}'", k)).at(loc.clone())
                }),
                _ => Err(cleared_value(loc)),
            },
            (Value::Str(s), Value::Int(idx)) => {
                let chars: Vec<char> = s.chars().collect();
                let i = usize::try_from(*idx).map_err(|_| index_error(*idx, chars.len(), loc))?;
                chars
                    .get(i)
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| index_error(*idx, chars.len(), loc))
            }
            (target, key) => Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "cannot index {} with {}",
                    target.type_name(),
                    key.type_name()
                ),
            )
            .at(loc.clone())),
        }
    }

    // -- assignment targets --

    pub(crate) fn assign_target(
        &mut self,
        target: &Expr,
        value: Value,
        env: &Rc<Env>,
    ) -> Result<(), NaabError> {
        match target {
            Expr::Identifier(name, loc) => {
                if env.assign(name, value) {
                    Ok(())
                } else {
                    let suggestion =
                        find_similar(name, env.visible_names().iter().map(|s| s.as_str()), 2);
                    Err(NaabError::new(
                        ErrorKind::Name,
                        format!("cannot assign to undefined name '{}'", name),
                    )
                    .at(loc.clone())
                    .with_suggestion(suggestion))
                }
            }
            Expr::Member { object, field, loc } => {
                let container = self.eval_expr(object, env)?;
                match &container {
                    // Struct fields mutate in place: structs are reference
                    // types.
                    Value::Struct(cell) => {
                        let def = match &*cell.data.borrow() {
                            HeapData::Struct { def, .. } => def.clone(),
                            _ => return Err(cleared_value(loc)),
                        };
                        let idx = def.field_index(field).ok_or_else(|| {
                            NaabError::new(
                                ErrorKind::Name,
                                format!("struct '{}' has no field '{}'", def.name, field),
                            )
                            .at(loc.clone())
                        })?;
                        if !self.types.value_matches(&value, &def.fields[idx].ty) {
                            return Err(NaabError::new(
                                ErrorKind::Type,
                                format!(
                                    "field '{}.{}' expects {}, got {}",
                                    def.name,
                                    field,
                                    def.fields[idx].ty.display_name(),
                                    value.type_name()
                                ),
                            )
                            .at(loc.clone()));
                        }
                        if let HeapData::Struct { fields, .. } = &mut *cell.data.borrow_mut() {
                            fields[idx] = value;
                        }
                        Ok(())
                    }
                    Value::Dict(cell) => {
                        if let HeapData::Dict(entries) = &mut *cell.data.borrow_mut() {
                            entries.insert(field.clone(), value);
                        }
                        Ok(())
                    }
                    other => Err(NaabError::new(
                        ErrorKind::Type,
                        format!("cannot assign member on {}", other.type_name()),
                    )
                    .at(loc.clone())),
                }
            }
            Expr::Index { object, index, loc } => {
                let container = self.eval_expr(object, env)?;
                let key = self.eval_expr(index, env)?;
                match (&container, &key) {
                    (Value::List(cell), Value::Int(idx)) => {
                        let mut data = cell.data.borrow_mut();
                        if let HeapData::List(items) = &mut *data {
                            let i = usize::try_from(*idx)
                                .map_err(|_| index_error(*idx, items.len(), loc))?;
                            if i >= items.len() {
                                return Err(index_error(*idx, items.len(), loc));
                            }
                            items[i] = value;
                        }
                        Ok(())
                    }
                    (Value::Dict(cell), Value::Str(k)) => {
                        if let HeapData::Dict(entries) = &mut *cell.data.borrow_mut() {
                            entries.insert(k.clone(), value);
                        }
                        Ok(())
                    }
                    (container, key) => Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "cannot index-assign {} with {}",
                            container.type_name(),
                            key.type_name()
                        ),
                    )
                    .at(loc.clone())),
                }
            }
            other => Err(NaabError::syntax(
                "invalid assignment target",
                other.loc().clone(),
            )),
        }
    }

    // -- calls --

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        // `module.function(...)` and constructor forms need the callee
        // resolved structurally before evaluation.
        if let Expr::Member { object, field, loc: member_loc } = callee {
            if let Expr::Identifier(name, _) = object.as_ref() {
                if !env.is_defined(name) {
                    // Stdlib dispatch: `io.read(...)`.
                    if self.stdlib.is_registered(name) {
                        let arg_values = self.eval_args(args, env)?;
                        if self.flow_interrupted() {
                            return Ok(Value::Null);
                        }
                        let module = name.clone();
                        let function = field.clone();
                        return self
                            .stdlib
                            .dispatch(&module, &function, &arg_values)
                            .map_err(|e| e.at(loc.clone()));
                    }
                    // Enum constructor: `Option.Some(1)`.
                    let qualified = self.resolve_type_key(None, name);
                    if let Some(def) = self.types.get_enum(&qualified) {
                        let arg_values = self.eval_args(args, env)?;
                        if self.flow_interrupted() {
                            return Ok(Value::Null);
                        }
                        return self.construct_variant(&def, field, arg_values, member_loc);
                    }
                }
            }
            // Module member calls: resolve the member, then call it.
            let target = self.eval_expr(object, env)?;
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            if let Value::Module(cell) = &target {
                let (module_name, function) = match &*cell.data.borrow() {
                    HeapData::Module { name, env } => (name.clone(), env.get(field)),
                    _ => return Err(cleared_value(member_loc)),
                };
                let callable = function.ok_or_else(|| {
                    NaabError::new(
                        ErrorKind::Name,
                        format!("module '{}' has no binding '{}'", module_name, field),
                    )
                    .at(member_loc.clone())
                })?;
                let arg_values = self.eval_args(args, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                return self.call_value(&callable, arg_values, loc);
            }
            let callable = self.member_access(&target, field, member_loc)?;
            let arg_values = self.eval_args(args, env)?;
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            return self.call_value(&callable, arg_values, loc);
        }

        if let Expr::Identifier(name, id_loc) = callee {
            if !env.is_defined(name) {
                // Bare variant constructor: `Some(1)`.
                if let Some((def, _)) = self.types.enum_with_variant(name) {
                    let arg_values = self.eval_args(args, env)?;
                    if self.flow_interrupted() {
                        return Ok(Value::Null);
                    }
                    let variant = name.clone();
                    return self.construct_variant(&def, &variant, arg_values, id_loc);
                }
            }
        }

        let callable = self.eval_expr(callee, env)?;
        if self.flow_interrupted() {
            return Ok(Value::Null);
        }
        let arg_values = self.eval_args(args, env)?;
        if self.flow_interrupted() {
            return Ok(Value::Null);
        }
        self.call_value(&callable, arg_values, loc)
    }

    fn eval_args(&mut self, args: &[Expr], env: &Rc<Env>) -> Result<Vec<Value>, NaabError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg, env)?);
            if self.flow_interrupted() {
                break;
            }
        }
        Ok(values)
    }

    fn construct_variant(
        &mut self,
        def: &Rc<crate::types::EnumDef>,
        variant: &str,
        args: Vec<Value>,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        let idx = def.variant_index(variant).ok_or_else(|| {
            NaabError::new(
                ErrorKind::Name,
                format!("enum '{}' has no variant '{}'", def.name, variant),
            )
            .at(loc.clone())
        })?;
        let expected = def.variants[idx].payload.len();
        if args.len() != expected {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "variant '{}' takes {} value(s), got {}",
                    variant,
                    expected,
                    args.len()
                ),
            )
            .at(loc.clone()));
        }
        Ok(Value::enum_variant(def.clone(), idx, args))
    }

    /// Call any callable value with already-evaluated arguments.
    pub(crate) fn call_value(
        &mut self,
        callable: &Value,
        args: Vec<Value>,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        let Value::Function(cell) = callable else {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!("{} is not callable", callable.type_name()),
            )
            .at(loc.clone()));
        };

        let (name, params, body, captured, file, line, builtin) = match &*cell.data.borrow() {
            HeapData::Function(data) => (
                data.name.clone(),
                data.params.clone(),
                data.body.clone(),
                data.env.borrow().clone(),
                data.file.clone(),
                data.line,
                data.builtin,
            ),
            _ => return Err(cleared_value(loc)),
        };

        if let Some(builtin) = builtin {
            return self.call_builtin(builtin, args, loc);
        }

        if self.call_stack.len() >= self.config.limits.max_call_depth {
            return Err(NaabError::new(
                ErrorKind::StackOverflow,
                format!(
                    "call depth limit of {} exceeded",
                    self.config.limits.max_call_depth
                ),
            )
            .at(loc.clone()));
        }

        let captured = captured.ok_or_else(|| {
            NaabError::new(ErrorKind::Type, "function environment was collected").at(loc.clone())
        })?;

        if args.len() > params.len() {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "{} takes {} argument(s), got {}",
                    name.as_deref().unwrap_or("function"),
                    params.len(),
                    args.len()
                ),
            )
            .at(loc.clone()));
        }

        // Fresh frame on the captured (definition) environment; defaults are
        // evaluated here left-to-right, so later defaults see earlier
        // parameters.
        let call_env = Env::child(&captured);
        let mut args_iter = args.into_iter();
        for param in &params {
            let value = match args_iter.next() {
                Some(v) => v,
                None => match &param.default {
                    Some(default_expr) => {
                        let v = self.eval_expr(default_expr, &call_env)?;
                        if self.flow_interrupted() {
                            return Ok(Value::Null);
                        }
                        v
                    }
                    None => {
                        return Err(NaabError::new(
                            ErrorKind::Type,
                            format!("missing argument '{}'", param.name),
                        )
                        .at(loc.clone()));
                    }
                },
            };
            if let Some(ty) = &param.ty {
                if !self.types.value_matches(&value, ty) {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "parameter '{}' expects {}, got {}",
                            param.name,
                            ty.display_name(),
                            value.type_name()
                        ),
                    )
                    .at(loc.clone()));
                }
            }
            call_env.define(param.name.clone(), value);
        }

        let frame = Frame {
            function: name.unwrap_or_else(|| "<lambda>".to_string()),
            file,
            line,
            column: loc.column,
        };
        self.call_stack.push(frame.clone());

        let saved_returning = self.returning.take();
        let saved_breaking = std::mem::replace(&mut self.breaking, false);
        let saved_continuing = std::mem::replace(&mut self.continuing, false);

        let mut result = self.exec_block_body(&body, &call_env);

        // Function boundary: consume the return flag, restore the caller's.
        let returned = self.returning.take();
        self.returning = saved_returning;
        self.breaking = saved_breaking;
        self.continuing = saved_continuing;

        self.call_stack.pop();
        if let Err(error) = &mut result {
            error.push_frame(frame);
        }

        result.map(|last| returned.unwrap_or(last))
    }

    pub(crate) fn make_function(
        &self,
        name: Option<String>,
        params: Vec<Param>,
        body: Vec<Stmt>,
        env: &Rc<Env>,
        is_async: bool,
        loc: &SourceLoc,
    ) -> Value {
        Value::function(FunctionData {
            name,
            params,
            body: Rc::new(body),
            env: RefCell::new(Some(env.clone())),
            file: self.current_file.to_string_lossy().into_owned(),
            line: loc.line,
            is_async,
            builtin: None,
        })
    }

    // -- pipeline --

    /// `left |> right`: left first, then the right side resolves to a
    /// callable that receives the piped value as its first argument.
    fn eval_pipeline(
        &mut self,
        left: &Expr,
        right: &Expr,
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        let piped = self.eval_expr(left, env)?;
        if self.flow_interrupted() {
            return Ok(Value::Null);
        }

        if let Expr::Call { callee, args, loc: call_loc } = right {
            let callable = self.eval_expr(callee, env)?;
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            let mut values = vec![piped];
            values.extend(self.eval_args(args, env)?);
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            return self.call_value(&callable, values, call_loc);
        }

        let callable = self.eval_expr(right, env)?;
        if self.flow_interrupted() {
            return Ok(Value::Null);
        }
        self.call_value(&callable, vec![piped], loc)
    }

    // -- struct literals --

    fn eval_struct_literal(
        &mut self,
        module: Option<&str>,
        name: &str,
        type_args: &[TypeExpr],
        field_exprs: &[(String, Expr)],
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        // Field values evaluate left-to-right in literal order first.
        let mut provided: Vec<(String, Value)> = Vec::with_capacity(field_exprs.len());
        for (field_name, field_expr) in field_exprs {
            let value = self.eval_expr(field_expr, env)?;
            if self.flow_interrupted() {
                return Ok(Value::Null);
            }
            provided.push((field_name.clone(), value));
        }

        let key = self.resolve_struct_key(module, name, env, loc)?;
        let base = self.types.get_struct(&key).ok_or_else(|| {
            NaabError::new(ErrorKind::Type, format!("unknown struct '{}'", key))
                .at(loc.clone())
                .with_suggestion(find_similar(
                    &key,
                    self.types.type_names().iter().map(|s| s.as_str()),
                    2,
                ))
        })?;

        let def = if base.generics.is_empty() {
            base
        } else if !type_args.is_empty() {
            self.types.instantiate_struct(&base, type_args, loc)?
        } else {
            let inferred = self.infer_type_args(&base, &provided, loc)?;
            self.types.instantiate_struct(&base, &inferred, loc)?
        };

        self.build_struct(&def, provided, loc)
    }

    fn resolve_struct_key(
        &mut self,
        module: Option<&str>,
        name: &str,
        env: &Rc<Env>,
        loc: &SourceLoc,
    ) -> Result<String, NaabError> {
        match module {
            Some(alias) => {
                // The alias resolves through the module binding so that
                // `use geometry as g; new g.Point { ... }` works.
                match env.get(alias) {
                    Some(Value::Module(cell)) => match &*cell.data.borrow() {
                        HeapData::Module { name: canonical, .. } => {
                            Ok(format!("{}.{}", canonical, name))
                        }
                        _ => Err(cleared_value(loc)),
                    },
                    Some(other) => Err(NaabError::new(
                        ErrorKind::Type,
                        format!("'{}' is {} — expected a module", alias, other.type_name()),
                    )
                    .at(loc.clone())),
                    None => Ok(format!("{}.{}", alias, name)),
                }
            }
            None => Ok(self.resolve_type_key(None, name)),
        }
    }

    /// Unqualified type names inside a module body resolve to the module's
    /// own declarations first.
    pub(crate) fn resolve_type_key(&self, module: Option<&str>, name: &str) -> String {
        if let Some(m) = module {
            return format!("{}.{}", m, name);
        }
        if let Some(prefix) = &self.module_prefix {
            let qualified = format!("{}.{}", prefix, name);
            if self.types.get_struct(&qualified).is_some() || self.types.get_enum(&qualified).is_some()
            {
                return qualified;
            }
        }
        name.to_string()
    }

    fn infer_type_args(
        &mut self,
        base: &Rc<StructDef>,
        provided: &[(String, Value)],
        loc: &SourceLoc,
    ) -> Result<Vec<TypeExpr>, NaabError> {
        let mut inferred = Vec::with_capacity(base.generics.len());
        for generic in &base.generics {
            let field = base.fields.iter().find(|f| {
                matches!(
                    &f.ty,
                    TypeExpr::Named { module: None, name, params, .. }
                        if name == generic && params.is_empty()
                )
            });
            let Some(field) = field else {
                return Err(NaabError::new(
                    ErrorKind::Type,
                    format!(
                        "cannot infer type argument '{}' for struct '{}'; annotate it explicitly",
                        generic, base.name
                    ),
                )
                .at(loc.clone()));
            };
            let value = provided
                .iter()
                .find(|(n, _)| n == &field.name)
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    NaabError::new(
                        ErrorKind::Type,
                        format!("missing field '{}' for struct '{}'", field.name, base.name),
                    )
                    .at(loc.clone())
                })?;
            inferred.push(type_of_value(value, loc));
        }
        Ok(inferred)
    }

    fn build_struct(
        &mut self,
        def: &Rc<StructDef>,
        mut provided: Vec<(String, Value)>,
        loc: &SourceLoc,
    ) -> Result<Value, NaabError> {
        let mut ordered = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let position = provided.iter().position(|(n, _)| n == &field.name);
            let value = match position {
                Some(idx) => provided.remove(idx).1,
                None => {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        format!("missing field '{}' for struct '{}'", field.name, def.name),
                    )
                    .at(loc.clone()));
                }
            };
            if !self.types.value_matches(&value, &field.ty) {
                return Err(NaabError::new(
                    ErrorKind::Type,
                    format!(
                        "field '{}.{}' expects {}, got {}",
                        def.name,
                        field.name,
                        field.ty.display_name(),
                        value.type_name()
                    ),
                )
                .at(loc.clone()));
            }
            ordered.push(value);
        }
        if let Some((extra, _)) = provided.first() {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!("struct '{}' has no field '{}'", def.name, extra),
            )
            .at(loc.clone())
            .with_suggestion(find_similar(
                extra,
                def.fields.iter().map(|f| f.name.as_str()),
                2,
            )));
        }
        Ok(Value::struct_instance(def.clone(), ordered))
    }

    // -- match --

    fn eval_match(
        &mut self,
        subject: &Value,
        arms: &[MatchArm],
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        for arm in arms {
            if let Some(bindings) = self.match_pattern(subject, &arm.pattern)? {
                let scope = Env::child(env);
                for (name, value) in bindings {
                    scope.define(name, value);
                }
                return self.exec_block_body(&arm.body, &scope);
            }
        }
        Err(NaabError::new(
            ErrorKind::Type,
            format!("no match arm covers {}", subject.display()),
        )
        .at(loc.clone()))
    }

    fn match_pattern(
        &mut self,
        subject: &Value,
        pattern: &Pattern,
    ) -> Result<Option<Vec<(String, Value)>>, NaabError> {
        match pattern {
            Pattern::Wildcard(_) => Ok(Some(Vec::new())),
            Pattern::Literal(lit) => {
                let expected = match lit {
                    Expr::Null(_) => Value::Null,
                    Expr::Bool(b, _) => Value::Bool(*b),
                    Expr::Int(n, _) => Value::Int(*n),
                    Expr::Float(x, _) => Value::Float(*x),
                    Expr::Str(s, _) => Value::str(s.clone()),
                    _ => return Ok(None),
                };
                Ok(subject.equals(&expected).then(Vec::new))
            }
            Pattern::Variant {
                module,
                enum_name,
                name,
                bindings,
                loc,
            } => {
                let Value::Enum(cell) = subject else {
                    return Ok(None);
                };
                let (def, variant, payload) = match &*cell.data.borrow() {
                    HeapData::Enum {
                        def,
                        variant,
                        payload,
                    } => (def.clone(), *variant, payload.clone()),
                    _ => return Ok(None),
                };
                if def.variants[variant].name != *name {
                    return Ok(None);
                }
                if let Some(wanted_enum) = enum_name {
                    let qualified = match module {
                        Some(m) => format!("{}.{}", m, wanted_enum),
                        None => self.resolve_type_key(None, wanted_enum),
                    };
                    // Monomorphized names carry a `<...>` suffix.
                    let base = def.name.split('<').next().unwrap_or(&def.name);
                    if base != qualified {
                        return Ok(None);
                    }
                }
                if !bindings.is_empty() && bindings.len() != payload.len() {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "variant '{}' carries {} value(s), pattern binds {}",
                            name,
                            payload.len(),
                            bindings.len()
                        ),
                    )
                    .at(loc.clone()));
                }
                let bound = bindings
                    .iter()
                    .zip(payload)
                    .filter(|(n, _)| n.as_str() != "_")
                    .map(|(n, v)| (n.clone(), v))
                    .collect();
                Ok(Some(bound))
            }
        }
    }
}

fn type_mismatch(op: &str, lhs: &Value, rhs: &Value) -> NaabError {
    NaabError::new(
        ErrorKind::Type,
        format!(
            "operator '{}' not defined for {} and {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

fn index_error(idx: i64, len: usize, loc: &SourceLoc) -> NaabError {
    NaabError::new(
        ErrorKind::Index,
        format!("index {} out of range for length {}", idx, len),
    )
    .at(loc.clone())
}

fn cleared_value(loc: &SourceLoc) -> NaabError {
    NaabError::new(ErrorKind::Type, "value was reclaimed by the collector").at(loc.clone())
}
