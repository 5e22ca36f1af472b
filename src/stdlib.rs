//! Standard-library module dispatch.
//!
//! The core only knows the contract: a module has a name, answers
//! `has_function`, and executes `call`. Implementations (file I/O, HTTP,
//! crypto, ...) are external collaborators registered at startup; argument
//! marshalling is each module's own business.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ErrorKind, NaabError};
use crate::value::Value;

/// The names reserved for the standard library. Registration uses these; an
/// embedding may register any subset.
pub const STDLIB_MODULE_NAMES: &[&str] = &[
    "io", "math", "string", "array", "json", "http", "time", "env", "file", "csv", "regex",
    "crypto", "collections", "debug",
];

pub trait StdlibModule {
    fn name(&self) -> &str;
    fn has_function(&self, name: &str) -> bool;
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, NaabError>;
}

/// Global (per-interpreter) table of registered stdlib modules.
#[derive(Default)]
pub struct StdlibTable {
    modules: HashMap<String, Rc<dyn StdlibModule>>,
}

impl StdlibTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Rc<dyn StdlibModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn StdlibModule>> {
        self.modules.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Resolve and invoke `module.function(args)`, wrapping failures with
    /// module+function context.
    pub fn dispatch(
        &self,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value, NaabError> {
        let handler = self.get(module).ok_or_else(|| {
            NaabError::new(
                ErrorKind::Name,
                format!("stdlib module '{}' is not registered", module),
            )
        })?;
        if !handler.has_function(function) {
            return Err(NaabError::new(
                ErrorKind::Name,
                format!("module '{}' has no function '{}'", module, function),
            ));
        }
        handler.call(function, args).map_err(|mut e| {
            e.message = format!("{}.{}: {}", module, function, e.message);
            e
        })
    }
}
