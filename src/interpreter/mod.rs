//! Tree-walking interpreter.
//!
//! A visitor over the AST. Control flow (`break`, `continue`, `return`) is
//! tracked with flags on the interpreter and cleared at loop and function
//! boundaries; user `throw` unwinds as an error. Call frames are pushed for
//! diagnostics only.

mod builtins;
mod expr;
mod poly;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{Stmt, TypeExpr};
use crate::audit::AuditLog;
use crate::config::RuntimeConfig;
use crate::env::Env;
use crate::error::{ErrorKind, Frame, NaabError};
use crate::gc::{self, GcNode};
use crate::lexer::Lexer;
use crate::modules::{resolve_module, ModuleState, ModuleTable};
use crate::parser::Parser;
use crate::polyglot::ExecutorRegistry;
use crate::stdlib::StdlibTable;
use crate::token::SourceLoc;
use crate::types::{EnumDef, FieldDef, StructDef, TypeRegistry, VariantDef};
use crate::value::Value;

/// Result of running a program: the value of the final expression statement
/// plus everything `print` emitted.
#[derive(Debug)]
pub struct RunOutcome {
    pub value: Value,
    pub output: Vec<String>,
}

pub struct Interpreter {
    pub(crate) config: RuntimeConfig,
    pub(crate) types: TypeRegistry,
    pub(crate) globals: Rc<Env>,
    pub(crate) modules: ModuleTable,
    pub(crate) stdlib: StdlibTable,
    pub(crate) executors: Arc<ExecutorRegistry>,
    pub(crate) audit: Option<Arc<AuditLog>>,
    pub(crate) call_stack: Vec<Frame>,
    pub(crate) output: Vec<String>,
    /// The file currently being evaluated (switches during module load).
    pub(crate) current_file: PathBuf,
    /// Set while evaluating a module body; qualifies type registrations.
    pub(crate) module_prefix: Option<String>,
    pub(crate) source_root: Option<PathBuf>,

    // Control-flow flags, cleared at loop/function boundaries.
    pub(crate) breaking: bool,
    pub(crate) continuing: bool,
    pub(crate) returning: Option<Value>,

    /// Depth of in-flight expression evaluation; GC is only safe at zero,
    /// when every live value is reachable from an environment.
    pub(crate) eval_depth: usize,
    pub(crate) gc_requested: bool,
}

impl Interpreter {
    pub fn new(config: RuntimeConfig) -> Interpreter {
        let globals = Env::root();
        gc::register_persistent_root(&(globals.clone() as Rc<dyn GcNode>));

        let audit = config.audit_log_path.as_ref().and_then(|path| {
            AuditLog::open(path, config.audit_hmac_key.clone())
                .map(Arc::new)
                .ok()
        });

        let mut interp = Interpreter {
            config,
            types: TypeRegistry::new(),
            globals,
            modules: ModuleTable::new(),
            stdlib: StdlibTable::new(),
            executors: Arc::new(ExecutorRegistry::with_defaults()),
            audit,
            call_stack: Vec::new(),
            output: Vec::new(),
            current_file: PathBuf::from("<main>"),
            module_prefix: None,
            source_root: None,
            breaking: false,
            continuing: false,
            returning: None,
            eval_depth: 0,
            gc_requested: false,
        };
        interp.install_builtins();
        interp
    }

    /// Swap in a custom executor registry (tests register mock languages).
    pub fn set_executors(&mut self, executors: Arc<ExecutorRegistry>) {
        self.executors = executors;
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn stdlib_mut(&mut self) -> &mut StdlibTable {
        &mut self.stdlib
    }

    /// Lex, parse, and execute a whole source file.
    pub fn run_file(&mut self, source: &str, file: &Path) -> Result<RunOutcome, NaabError> {
        self.current_file = file.to_path_buf();
        if self.source_root.is_none() {
            self.source_root = file.parent().map(|p| p.to_path_buf());
        }

        let tokens = Lexer::new(source, file, &self.config.limits).tokenize()?;
        let program = Parser::new(tokens, &self.config.limits).parse_program()?;

        let globals = self.globals.clone();
        let mut last = Value::Null;
        for stmt in &program {
            last = self.exec_stmt(stmt, &globals)?;
            self.clear_loop_flags_at_top_level(stmt)?;
            self.maybe_collect(&globals, &last);
        }

        Ok(RunOutcome {
            value: last,
            output: std::mem::take(&mut self.output),
        })
    }

    /// Tear down the interpreter and run the shutdown collection.
    pub fn shutdown(self) -> usize {
        drop(self);
        gc::collect(&[])
    }

    fn clear_loop_flags_at_top_level(&mut self, stmt: &Stmt) -> Result<(), NaabError> {
        if self.breaking || self.continuing {
            self.breaking = false;
            self.continuing = false;
            return Err(NaabError::syntax(
                "break/continue outside a loop",
                stmt.loc().clone(),
            ));
        }
        self.returning = None;
        Ok(())
    }

    pub(crate) fn flow_interrupted(&self) -> bool {
        self.breaking || self.continuing || self.returning.is_some()
    }

    /// Run a collection if requested or over threshold, but only from a
    /// statement boundary with no expression mid-flight: at that point every
    /// live value is reachable from the rooted environment chain. `pending`
    /// is the just-produced statement value, rooted so a block's result
    /// cannot be swept out from under it.
    pub(crate) fn maybe_collect(&mut self, env: &Rc<Env>, pending: &Value) {
        if self.eval_depth > 0 {
            return;
        }
        let over_threshold = gc::allocations_since_collect() >= self.config.gc_threshold;
        if !self.gc_requested && !over_threshold {
            return;
        }
        self.gc_requested = false;
        self.collect_now(env, Some(pending));
    }

    pub(crate) fn collect_now(&mut self, env: &Rc<Env>, pending: Option<&Value>) -> usize {
        let mut roots: Vec<Rc<dyn GcNode>> = vec![env.clone(), self.globals.clone()];
        for module_env in self.modules.loaded_envs() {
            roots.push(module_env);
        }
        if let Some(value) = pending {
            value.push_gc_node(&mut roots);
        }
        gc::collect(&roots)
    }

    // -- statements --

    /// Execute one statement; expression statements yield their value, all
    /// others yield null.
    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Result<Value, NaabError> {
        match stmt {
            Stmt::Let {
                name, ty, value, ..
            } => {
                let evaluated = self.eval_expr(value, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                // Copy-on-assignment: lists and dicts detach, structs share.
                let stored = evaluated.deep_copy();
                if let Some(annotation) = ty {
                    self.check_annotation(&stored, annotation, name)?;
                }
                env.define(name.clone(), stored);
                Ok(Value::Null)
            }

            Stmt::Assign { target, value, .. } => {
                let evaluated = self.eval_expr(value, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                self.assign_target(target, evaluated.deep_copy(), env)?;
                Ok(Value::Null)
            }

            Stmt::FnDecl {
                name,
                params,
                body,
                is_async,
                loc,
            } => {
                let function = self.make_function(
                    Some(name.clone()),
                    params.clone(),
                    body.clone(),
                    env,
                    *is_async,
                    loc,
                );
                env.define(name.clone(), function);
                Ok(Value::Null)
            }

            Stmt::StructDecl {
                name,
                generics,
                fields,
                loc,
            } => {
                let qualified = self.qualify_type_name(name);
                self.types.define_struct(StructDef {
                    name: qualified,
                    generics: generics.clone(),
                    fields: fields
                        .iter()
                        .map(|f| FieldDef {
                            name: f.name.clone(),
                            ty: f.ty.clone(),
                        })
                        .collect(),
                    loc: loc.clone(),
                })?;
                Ok(Value::Null)
            }

            Stmt::EnumDecl {
                name,
                generics,
                variants,
                loc,
            } => {
                let qualified = self.qualify_type_name(name);
                self.types.define_enum(EnumDef {
                    name: qualified,
                    generics: generics.clone(),
                    variants: variants
                        .iter()
                        .map(|v| VariantDef {
                            name: v.name.clone(),
                            payload: v.payload.clone(),
                        })
                        .collect(),
                    loc: loc.clone(),
                })?;
                Ok(Value::Null)
            }

            Stmt::While { cond, body, .. } => {
                loop {
                    let test = self.eval_expr(cond, env)?;
                    if self.flow_interrupted() {
                        break;
                    }
                    if !test.is_truthy() {
                        break;
                    }
                    let scope = Env::child(env);
                    self.exec_block_body(body, &scope)?;
                    if self.returning.is_some() {
                        break;
                    }
                    if self.breaking {
                        self.breaking = false;
                        break;
                    }
                    self.continuing = false;
                }
                Ok(Value::Null)
            }

            Stmt::For {
                var,
                iterable,
                body,
                loc,
            } => {
                let source = self.eval_expr(iterable, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                let items = self.iterable_items(&source, loc)?;
                for item in items {
                    let scope = Env::child(env);
                    scope.define(var.clone(), item);
                    self.exec_block_body(body, &scope)?;
                    if self.returning.is_some() {
                        break;
                    }
                    if self.breaking {
                        self.breaking = false;
                        break;
                    }
                    self.continuing = false;
                }
                Ok(Value::Null)
            }

            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => {
                        let v = self.eval_expr(expr, env)?;
                        if self.flow_interrupted() {
                            return Ok(Value::Null);
                        }
                        v
                    }
                    None => Value::Null,
                };
                self.returning = Some(result);
                Ok(Value::Null)
            }

            Stmt::Throw { value, loc } => {
                let payload = self.eval_expr(value, env)?;
                if self.flow_interrupted() {
                    return Ok(Value::Null);
                }
                let message = payload.display();
                Err(NaabError::new(ErrorKind::User, message)
                    .with_payload(payload)
                    .at(loc.clone()))
            }

            Stmt::Break { .. } => {
                self.breaking = true;
                Ok(Value::Null)
            }

            Stmt::Continue { .. } => {
                self.continuing = true;
                Ok(Value::Null)
            }

            Stmt::Try {
                body,
                catch,
                finally,
                ..
            } => self.exec_try(body, catch.as_ref(), finally.as_ref(), env),

            Stmt::Import { path, alias, loc } => {
                self.exec_import(path, alias.as_deref(), loc, env)?;
                Ok(Value::Null)
            }

            Stmt::Block { body, .. } => {
                let scope = Env::child(env);
                self.exec_block_body(body, &scope)?;
                Ok(Value::Null)
            }

            Stmt::Expr { expr, .. } => self.eval_expr(expr, env),
        }
    }

    /// Execute the statements of a block in the given scope. Statement
    /// sequences containing adjacent polyglot blocks go through the parallel
    /// dispatcher. Stops early when a control-flow flag trips.
    pub(crate) fn exec_block_body(
        &mut self,
        body: &[Stmt],
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        let mut last = Value::Null;
        let mut i = 0;
        while i < body.len() {
            let run_len = self.polyglot_run_length(&body[i..]);
            if run_len >= 2 {
                self.exec_polyglot_run(&body[i..i + run_len], env)?;
                last = Value::Null;
                i += run_len;
            } else {
                last = self.exec_stmt(&body[i], env)?;
                i += 1;
            }
            if self.flow_interrupted() {
                break;
            }
            self.maybe_collect(env, &last);
        }
        Ok(last)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        catch: Option<&(String, Vec<Stmt>)>,
        finally: Option<&Vec<Stmt>>,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        let scope = Env::child(env);
        let mut outcome = self.exec_block_body(body, &scope);

        outcome = match outcome {
            Err(error) => match (error.kind.catchable(), catch) {
                (true, Some((binding, catch_body))) => {
                    let catch_scope = Env::child(env);
                    catch_scope.define(binding.clone(), self.error_to_value(&error));
                    self.exec_block_body(catch_body, &catch_scope)
                }
                _ => Err(error),
            },
            ok => ok,
        };

        if let Some(finally_body) = finally {
            // Preserve flags across finally: a `return` in the try body must
            // survive the cleanup clause.
            let saved_breaking = self.breaking;
            let saved_continuing = self.continuing;
            let saved_returning = self.returning.take();
            self.breaking = false;
            self.continuing = false;

            let finally_scope = Env::child(env);
            let finally_result = self.exec_block_body(finally_body, &finally_scope);

            match finally_result {
                Err(finally_error) => {
                    // A throw during cleanup replaces the in-flight error;
                    // the original is kept as the cause.
                    outcome = match outcome {
                        Err(original) => Err(finally_error.with_cause(original)),
                        Ok(_) => Err(finally_error),
                    };
                }
                Ok(_) => {
                    if self.returning.is_none() {
                        self.returning = saved_returning;
                    }
                    self.breaking |= saved_breaking;
                    self.continuing |= saved_continuing;
                }
            }
        }

        outcome.map(|_| Value::Null)
    }

    fn exec_import(
        &mut self,
        path_segments: &[String],
        alias: Option<&str>,
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<(), NaabError> {
        let module_name = path_segments.join(".");
        let bind_name = alias
            .map(|a| a.to_string())
            .unwrap_or_else(|| path_segments.last().expect("nonempty path").clone());

        let roots = self.config.effective_roots(self.source_root.as_ref());
        let resolved = match resolve_module(path_segments, &self.current_file, &roots, loc) {
            Ok(p) => p,
            Err(e) => {
                if e.kind == ErrorKind::Path {
                    self.audit_path_rejection(&module_name);
                }
                return Err(e);
            }
        };

        match self.modules.state(&resolved) {
            Some(ModuleState::Loaded(module_env)) => {
                env.define(bind_name, Value::module(module_name, module_env.clone()));
                return Ok(());
            }
            Some(ModuleState::Loading) => {
                return Err(self.modules.cycle_error(&module_name, loc));
            }
            None => {}
        }

        let source = std::fs::read_to_string(&resolved).map_err(|e| {
            NaabError::new(
                ErrorKind::Import,
                format!("cannot read module '{}': {}", module_name, e),
            )
            .at(loc.clone())
        })?;
        self.config.limits.check_source_len(source.len(), &resolved)?;

        debug!(module = %module_name, path = %resolved.display(), "loading module");
        self.modules.begin_loading(&resolved, &module_name);

        let lexed = Lexer::new(&source, &resolved, &self.config.limits).tokenize();
        let tokens = match lexed {
            Ok(t) => t,
            Err(e) => {
                self.modules.abort_loading(&resolved);
                return Err(e);
            }
        };
        let parsed = Parser::new(tokens, &self.config.limits).parse_program();
        let program = match parsed {
            Ok(p) => p,
            Err(e) => {
                self.modules.abort_loading(&resolved);
                return Err(e);
            }
        };

        // Module bodies run in a fresh environment hanging off the root so
        // builtins stay visible but nothing leaks either way.
        let module_env = Env::child(&self.globals);
        let saved_file = std::mem::replace(&mut self.current_file, resolved.clone());
        let saved_prefix = self.module_prefix.replace(module_name.clone());

        let mut module_result = Ok(Value::Null);
        for stmt in &program {
            module_result = self.exec_stmt(stmt, &module_env);
            if module_result.is_err() {
                break;
            }
            self.returning = None;
            self.breaking = false;
            self.continuing = false;
        }

        self.current_file = saved_file;
        self.module_prefix = saved_prefix;

        match module_result {
            Ok(_) => {
                self.modules.finish_loading(&resolved, module_env.clone());
                env.define(bind_name, Value::module(module_name, module_env));
                Ok(())
            }
            Err(e) => {
                self.modules.abort_loading(&resolved);
                Err(e)
            }
        }
    }

    fn qualify_type_name(&self, name: &str) -> String {
        match &self.module_prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn check_annotation(
        &mut self,
        value: &Value,
        annotation: &TypeExpr,
        name: &str,
    ) -> Result<(), NaabError> {
        // Instantiating the annotation first makes `let b: Box<int> = ...`
        // populate the monomorphization cache even with inferred literals.
        self.ensure_annotation_instantiated(annotation)?;
        if !self.types.value_matches(value, annotation) {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "'{}' expects {}, got {}",
                    name,
                    annotation.display_name(),
                    value.type_name()
                ),
            )
            .at(annotation.loc().clone()));
        }
        Ok(())
    }

    pub(crate) fn ensure_annotation_instantiated(
        &mut self,
        annotation: &TypeExpr,
    ) -> Result<(), NaabError> {
        if let TypeExpr::Named {
            module,
            name,
            params,
            loc,
            ..
        } = annotation
        {
            if !params.is_empty() {
                let qualified = match module {
                    Some(m) => format!("{}.{}", m, name),
                    None => name.clone(),
                };
                if let Some(base) = self.types.get_struct(&qualified) {
                    self.types.instantiate_struct(&base, params, loc)?;
                } else if let Some(base) = self.types.get_enum(&qualified) {
                    self.types.instantiate_enum(&base, params, loc)?;
                }
            }
        }
        Ok(())
    }

    fn audit_path_rejection(&self, detail: &str) {
        if let Some(log) = &self.audit {
            let _ = log.append(
                crate::audit::AuditEvent::PathRejection,
                detail.to_string(),
                Default::default(),
            );
        }
    }

    /// Convert an in-flight error to the value a `catch` clause binds:
    /// a dict exposing `message`, `type`, and `stack`, plus `value` for the
    /// raw thrown payload and `cause` when a finally-clause displaced the
    /// original error.
    fn error_to_value(&self, error: &NaabError) -> Value {
        let mut entries = indexmap::IndexMap::new();
        entries.insert("message".to_string(), Value::str(error.message.clone()));
        entries.insert("type".to_string(), Value::str(error.kind.as_str()));
        let frames: Vec<Value> = error
            .stack
            .iter()
            .map(|f| {
                let mut frame = indexmap::IndexMap::new();
                frame.insert("function".to_string(), Value::str(f.function.clone()));
                frame.insert("file".to_string(), Value::str(f.file.clone()));
                frame.insert("line".to_string(), Value::Int(f.line as i64));
                Value::dict(frame)
            })
            .collect();
        entries.insert("stack".to_string(), Value::list(frames));
        if let Some(payload) = &error.payload {
            entries.insert("value".to_string(), payload.clone());
        }
        if let Some(cause) = &error.cause {
            entries.insert("cause".to_string(), self.error_to_value(cause));
        }
        Value::dict(entries)
    }

    pub(crate) fn iterable_items(
        &mut self,
        source: &Value,
        loc: &SourceLoc,
    ) -> Result<Vec<Value>, NaabError> {
        use crate::value::HeapData;
        match source {
            Value::List(cell) => match &*cell.data.borrow() {
                HeapData::List(items) => Ok(items.clone()),
                _ => Ok(Vec::new()),
            },
            Value::Dict(cell) => match &*cell.data.borrow() {
                // Iteration order is insertion order, a language guarantee.
                HeapData::Dict(entries) => {
                    Ok(entries.keys().map(|k| Value::str(k.clone())).collect())
                }
                _ => Ok(Vec::new()),
            },
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            other => Err(NaabError::new(
                ErrorKind::Type,
                format!("{} is not iterable", other.type_name()),
            )
            .at(loc.clone())),
        }
    }
}
