//! Polyglot block execution.
//!
//! One executor per foreign language, all behind a common contract. Values
//! cross the boundary as owned, `Send` payloads (never as interpreter
//! handles), which is what makes the parallel dispatcher's per-thread
//! snapshots safe by construction.

pub mod analyzer;
pub mod compiled;
pub mod dispatch;
mod payload;
pub mod process;
pub mod shell;

pub use payload::{payload_to_value, value_to_payload, Payload};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::DEFAULT_POLYGLOT_TIMEOUT_SECS;

/// Per-execution options from the block header.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Sovereign-pipe mode: the foreign side must emit a single JSON
    /// document on stdout, which becomes the block's value.
    pub json_return: bool,
    pub timeout: Duration,
    /// Names of `ref`-tagged bindings. Executors that support write-back
    /// report these bindings' final foreign values in
    /// [`BlockOutput::ref_values`] so struct mutations survive the block.
    pub ref_bindings: Vec<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            json_return: false,
            timeout: Duration::from_secs(DEFAULT_POLYGLOT_TIMEOUT_SECS),
            ref_bindings: Vec::new(),
        }
    }
}

/// What one block execution hands back: the block's value plus the final
/// foreign values of any `ref`-tagged bindings for write-back.
#[derive(Debug, Clone)]
pub struct BlockOutput {
    pub value: Payload,
    /// name -> final value, for the names in [`ExecOptions::ref_bindings`].
    /// Executors without write-back support leave this empty; the caller
    /// then makes no mutation.
    pub ref_values: Vec<(String, Payload)>,
}

impl BlockOutput {
    pub fn value(value: Payload) -> Self {
        BlockOutput {
            value,
            ref_values: Vec::new(),
        }
    }
}

/// A failure on the foreign side, in `Send` form so it can cross back from a
/// dispatcher thread.
#[derive(Debug, Clone)]
pub struct PolyglotFailure {
    pub message: String,
    /// Foreign error class name, when discoverable.
    pub foreign_type: Option<String>,
    /// Line within the block body, not the enclosing NAAb file.
    pub block_line: Option<u32>,
    pub timeout: bool,
}

impl PolyglotFailure {
    pub fn new(message: impl Into<String>) -> Self {
        PolyglotFailure {
            message: message.into(),
            foreign_type: None,
            block_line: None,
            timeout: false,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        PolyglotFailure {
            message: format!("execution exceeded the {}s timeout", limit.as_secs()),
            foreign_type: Some("Timeout".to_string()),
            block_line: None,
            timeout: true,
        }
    }
}

pub trait PolyglotExecutor: Send + Sync {
    fn language(&self) -> &str;

    fn initialize(&self) -> Result<(), PolyglotFailure> {
        Ok(())
    }

    fn shutdown(&self) {}

    /// Run `code` with the given name->value bindings; blocks until done or
    /// the configured timeout.
    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure>;
}

/// A block execution running on its own thread; `wait` joins it.
pub struct PendingExecution {
    handle: thread::JoinHandle<Result<BlockOutput, PolyglotFailure>>,
}

impl PendingExecution {
    pub fn wait(self) -> Result<BlockOutput, PolyglotFailure> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(PolyglotFailure::new("executor thread panicked")))
    }
}

/// Language tag -> executor. Adding a language is registering one more
/// implementation.
pub struct ExecutorRegistry {
    executors: Mutex<HashMap<String, Arc<dyn PolyglotExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        ExecutorRegistry {
            executors: Mutex::new(HashMap::new()),
        }
    }

    /// The built-in executor set. Embedders can re-register or extend.
    pub fn with_defaults() -> Self {
        let registry = ExecutorRegistry::new();
        registry.register(Arc::new(process::PythonExecutor));
        registry.register(Arc::new(process::JavaScriptExecutor));
        registry.register(Arc::new(process::RubyExecutor));
        registry.register(Arc::new(process::PhpExecutor));
        registry.register(Arc::new(process::SubprocessExecutor));
        registry.register(Arc::new(shell::ShellExecutor));
        registry.register(Arc::new(compiled::CompiledExecutor::cpp()));
        registry.register(Arc::new(compiled::CompiledExecutor::rust()));
        registry.register(Arc::new(compiled::CompiledExecutor::go()));
        registry.register(Arc::new(compiled::CompiledExecutor::csharp()));
        registry
    }

    pub fn register(&self, executor: Arc<dyn PolyglotExecutor>) {
        let mut map = self.executors.lock().expect("executor registry poisoned");
        map.insert(executor.language().to_string(), executor);
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn PolyglotExecutor>> {
        let map = self.executors.lock().expect("executor registry poisoned");
        // A few tags have conventional aliases.
        map.get(language)
            .or_else(|| match language {
                "js" => map.get("javascript"),
                "sh" | "bash" => map.get("shell"),
                "c++" => map.get("cpp"),
                "c#" => map.get("csharp"),
                _ => None,
            })
            .cloned()
    }

    pub fn languages(&self) -> Vec<String> {
        let map = self.executors.lock().expect("executor registry poisoned");
        map.keys().cloned().collect()
    }

    /// The async half of the executor contract: run on a fresh thread and
    /// hand back a joinable future.
    pub fn execute_async(
        &self,
        language: &str,
        code: String,
        bindings: Vec<(String, Payload)>,
        options: ExecOptions,
    ) -> PendingExecution {
        let executor = self.get(language);
        let language = language.to_string();
        let handle = thread::spawn(move || match executor {
            Some(executor) => executor.execute(&code, &bindings, &options),
            None => Err(PolyglotFailure::new(format!(
                "no executor registered for language '{}'",
                language
            ))),
        });
        PendingExecution { handle }
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperExecutor;

    impl PolyglotExecutor for UpperExecutor {
        fn language(&self) -> &str {
            "upper"
        }
        fn execute(
            &self,
            code: &str,
            _bindings: &[(String, Payload)],
            _options: &ExecOptions,
        ) -> Result<BlockOutput, PolyglotFailure> {
            Ok(BlockOutput::value(Payload::Str(code.trim().to_uppercase())))
        }
    }

    #[test]
    fn register_and_resolve() {
        let registry = ExecutorRegistry::new();
        registry.register(Arc::new(UpperExecutor));
        assert!(registry.get("upper").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn aliases_resolve_to_canonical_tags() {
        let registry = ExecutorRegistry::with_defaults();
        assert!(registry.get("js").is_some());
        assert!(registry.get("sh").is_some());
        assert!(registry.get("c++").is_some());
    }

    #[test]
    fn execute_async_joins_with_result() {
        let registry = ExecutorRegistry::new();
        registry.register(Arc::new(UpperExecutor));
        let pending = registry.execute_async(
            "upper",
            "hello".to_string(),
            Vec::new(),
            ExecOptions::default(),
        );
        let result = pending.wait().unwrap();
        assert_eq!(result.value, Payload::Str("HELLO".to_string()));
    }

    #[test]
    fn unknown_language_fails_at_join() {
        let registry = ExecutorRegistry::new();
        let pending =
            registry.execute_async("martian", String::new(), Vec::new(), ExecOptions::default());
        let err = pending.wait().unwrap_err();
        assert!(err.message.contains("martian"), "{}", err.message);
    }
}
