//! Polyglot block evaluation from inside the interpreter.
//!
//! Single blocks execute in place. Runs of two or more adjacent block
//! statements go through the dependency analyzer and parallel dispatcher;
//! results are committed to the environment in source order, so observable
//! bindings match sequential execution exactly.

use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use crate::ast::{Expr, Stmt};
use crate::audit::AuditEvent;
use crate::env::Env;
use crate::error::{ErrorKind, NaabError, PolyglotDetail};
use crate::interpreter::Interpreter;
use crate::polyglot::analyzer::{body_identifiers, group_independent, BlockInfo};
use crate::polyglot::dispatch::{execute_group, PreparedBlock};
use crate::polyglot::{value_to_payload, payload_to_value, ExecOptions, Payload, PolyglotFailure};
use crate::token::{BindingSpec, SourceLoc};
use crate::value::{HeapData, Value};

/// Struct handles for `ref`-tagged bindings, kept on the interpreter thread
/// while the block runs so foreign mutations can be written back.
type TrackedRefs = Vec<(String, Value)>;

/// One statement of a polyglot run, decomposed.
struct RunBlock<'a> {
    output: Option<&'a str>,
    assign_existing: bool,
    lang: &'a str,
    bindings: &'a [BindingSpec],
    body: &'a str,
    json_return: bool,
    loc: &'a SourceLoc,
}

fn as_run_block(stmt: &Stmt) -> Option<RunBlock<'_>> {
    let (output, assign_existing, expr) = match stmt {
        Stmt::Let { name, value, .. } => (Some(name.as_str()), false, value),
        Stmt::Assign {
            target: Expr::Identifier(name, _),
            value,
            ..
        } => (Some(name.as_str()), true, value),
        Stmt::Expr { expr, .. } => (None, false, expr),
        _ => return None,
    };
    match expr {
        Expr::Polyglot {
            lang,
            bindings,
            body,
            json_return,
            loc,
        } => Some(RunBlock {
            output,
            assign_existing,
            lang,
            bindings,
            body,
            json_return: *json_return,
            loc,
        }),
        _ => None,
    }
}

impl Interpreter {
    /// How many consecutive statements starting at `stmts[0]` form a
    /// dispatchable polyglot run.
    pub(crate) fn polyglot_run_length(&self, stmts: &[Stmt]) -> usize {
        stmts.iter().take_while(|s| as_run_block(s).is_some()).count()
    }

    /// Execute a run of ≥ 2 adjacent polyglot block statements with
    /// dependency-driven parallelism.
    pub(crate) fn exec_polyglot_run(
        &mut self,
        stmts: &[Stmt],
        env: &Rc<Env>,
    ) -> Result<(), NaabError> {
        let blocks: Vec<RunBlock> = stmts
            .iter()
            .map(|s| as_run_block(s).expect("caller verified the run"))
            .collect();

        let infos: Vec<BlockInfo> = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| {
                let mut inputs: HashSet<String> =
                    block.bindings.iter().map(|b| b.name.clone()).collect();
                inputs.extend(body_identifiers(block.body));
                BlockInfo {
                    index,
                    output: block.output.map(|s| s.to_string()),
                    inputs,
                }
            })
            .collect();

        let waves = group_independent(&infos);
        debug!(blocks = blocks.len(), waves = waves.len(), "polyglot run");

        for wave in waves {
            // Snapshots are taken per wave, so earlier waves' outputs are
            // visible to later waves. Ref'd struct handles stay here on the
            // interpreter thread, keyed by run index, for write-back.
            let mut prepared = Vec::with_capacity(wave.len());
            let mut tracked: Vec<(usize, TrackedRefs)> = Vec::with_capacity(wave.len());
            for &index in &wave {
                let block = &blocks[index];
                let (bindings, refs) = self.snapshot_bindings(block.bindings, env, block.loc)?;
                let ref_bindings = refs.iter().map(|(name, _)| name.clone()).collect();
                tracked.push((index, refs));
                prepared.push(PreparedBlock {
                    index,
                    lang: block.lang.to_string(),
                    body: block.body.to_string(),
                    bindings,
                    options: ExecOptions {
                        json_return: block.json_return,
                        timeout: self.config.polyglot_timeout(),
                        ref_bindings,
                    },
                });
            }

            let results = execute_group(&self.executors, prepared);

            // Commit in source order; on error, the textually earliest block
            // wins, raised only after every thread in the wave has finished.
            let mut first_error: Option<NaabError> = None;
            for (index, result) in results {
                let block = &blocks[index];
                self.audit_block_execute(block.lang, result.is_ok());
                match result {
                    Ok(output) => {
                        if first_error.is_none() {
                            let refs = tracked
                                .iter()
                                .find(|(i, _)| *i == index)
                                .map(|(_, refs)| refs.as_slice())
                                .unwrap_or(&[]);
                            self.write_back_refs(refs, &output.ref_values, block.loc)?;
                            self.commit_block_result(block, &output.value, env)?;
                        }
                    }
                    Err(failure) => {
                        if first_error.is_none() {
                            first_error =
                                Some(failure_to_error(block.lang, failure, block.loc));
                        }
                    }
                }
            }
            if let Some(error) = first_error {
                return Err(error);
            }
        }
        Ok(())
    }

    fn commit_block_result(
        &mut self,
        block: &RunBlock,
        payload: &Payload,
        env: &Rc<Env>,
    ) -> Result<(), NaabError> {
        let value = payload_to_value(payload);
        match block.output {
            Some(name) if block.assign_existing => {
                if !env.assign(name, value) {
                    return Err(NaabError::new(
                        ErrorKind::Name,
                        format!("cannot assign to undefined name '{}'", name),
                    )
                    .at(block.loc.clone()));
                }
            }
            Some(name) => env.define(name.to_string(), value),
            None => {}
        }
        Ok(())
    }

    /// In-place evaluation of a lone polyglot expression.
    pub(crate) fn eval_polyglot_single(
        &mut self,
        lang: &str,
        bindings: &[BindingSpec],
        body: &str,
        json_return: bool,
        loc: &SourceLoc,
        env: &Rc<Env>,
    ) -> Result<Value, NaabError> {
        self.config
            .limits
            .check_block_len(body.len())
            .map_err(|e| e.at(loc.clone()))?;

        let (snapshot, refs) = self.snapshot_bindings(bindings, env, loc)?;
        let executor = self.executors.get(lang).ok_or_else(|| {
            NaabError::new(
                ErrorKind::Polyglot,
                format!("no executor registered for language '{}'", lang),
            )
            .at(loc.clone())
        })?;

        let options = ExecOptions {
            json_return,
            timeout: self.config.polyglot_timeout(),
            ref_bindings: refs.iter().map(|(name, _)| name.clone()).collect(),
        };
        let result = executor.execute(body, &snapshot, &options);
        self.audit_block_execute(lang, result.is_ok());
        match result {
            Ok(output) => {
                self.write_back_refs(&refs, &output.ref_values, loc)?;
                Ok(payload_to_value(&output.value))
            }
            Err(failure) => Err(failure_to_error(lang, failure, loc)),
        }
    }

    /// Capture the binding snapshot: named values converted to owned
    /// payloads, so lists and dicts detach by construction. A `ref`-tagged
    /// binding must be a struct; its handle is kept aside so the foreign
    /// side's final field values can be written back after the block.
    fn snapshot_bindings(
        &mut self,
        bindings: &[BindingSpec],
        env: &Rc<Env>,
        loc: &SourceLoc,
    ) -> Result<(Vec<(String, Payload)>, TrackedRefs), NaabError> {
        let mut snapshot = Vec::with_capacity(bindings.len());
        let mut refs = TrackedRefs::new();
        for binding in bindings {
            let value = env.get(&binding.name).ok_or_else(|| {
                NaabError::new(
                    ErrorKind::Name,
                    format!("binding '{}' is not defined", binding.name),
                )
                .at(loc.clone())
            })?;
            if binding.by_ref {
                if !matches!(value, Value::Struct(_)) {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "only structs pass by reference; '{}' is {}",
                            binding.name,
                            value.type_name()
                        ),
                    )
                    .at(loc.clone()));
                }
                refs.push((binding.name.clone(), value.clone()));
            }
            let payload = value_to_payload(&value).map_err(|e| e.at(loc.clone()))?;
            snapshot.push((binding.name.clone(), payload));
        }
        Ok((snapshot, refs))
    }

    /// Merge the foreign side's reported final values of `ref` bindings back
    /// into the shared struct instances, field by field, each update checked
    /// against the declared field type. Executors without write-back support
    /// report nothing and the structs stay untouched.
    fn write_back_refs(
        &mut self,
        tracked: &[(String, Value)],
        ref_values: &[(String, Payload)],
        loc: &SourceLoc,
    ) -> Result<(), NaabError> {
        for (name, struct_value) in tracked {
            let Some((_, payload)) = ref_values.iter().find(|(n, _)| n == name) else {
                continue;
            };
            let Payload::Dict(entries) = payload else {
                return Err(NaabError::new(
                    ErrorKind::Polyglot,
                    format!("ref binding '{}' must come back as an object", name),
                )
                .at(loc.clone()));
            };
            let Value::Struct(cell) = struct_value else {
                continue;
            };
            let def = match &*cell.data.borrow() {
                HeapData::Struct { def, .. } => def.clone(),
                _ => continue,
            };

            // Validate every update before mutating anything.
            let mut updates = Vec::new();
            for (field_name, field_payload) in entries {
                let Some(idx) = def.field_index(field_name) else {
                    continue;
                };
                let new_value = payload_to_value(field_payload);
                if !self.types.value_matches(&new_value, &def.fields[idx].ty) {
                    return Err(NaabError::new(
                        ErrorKind::Type,
                        format!(
                            "ref write-back: field '{}.{}' expects {}, got {}",
                            def.name,
                            field_name,
                            def.fields[idx].ty.display_name(),
                            new_value.type_name()
                        ),
                    )
                    .at(loc.clone()));
                }
                updates.push((idx, new_value));
            }
            if let HeapData::Struct { fields, .. } = &mut *cell.data.borrow_mut() {
                for (idx, new_value) in updates {
                    fields[idx] = new_value;
                }
            }
        }
        Ok(())
    }

    fn audit_block_execute(&self, lang: &str, ok: bool) {
        if let Some(log) = &self.audit {
            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert("language".to_string(), lang.to_string());
            metadata.insert("ok".to_string(), ok.to_string());
            let _ = log.append(AuditEvent::BlockExecute, "polyglot block", metadata);
        }
    }
}

fn failure_to_error(lang: &str, failure: PolyglotFailure, loc: &SourceLoc) -> NaabError {
    let mut error = NaabError::new(ErrorKind::Polyglot, failure.message.clone()).at(loc.clone());
    error.polyglot = Some(PolyglotDetail {
        language: lang.to_string(),
        foreign_type: failure.foreign_type,
        block_line: failure.block_line,
        timeout: failure.timeout,
    });
    error
}
