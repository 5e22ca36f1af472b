//! Module loading and the process-wide module table.
//!
//! Modules are cached by resolved path. Load state transitions strictly
//! `NotLoaded -> Loading -> Loaded`; meeting `Loading` again mid-import means
//! the graph has a cycle, reported with every module on the cycle path in
//! traversal order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::env::Env;
use crate::error::{ErrorKind, NaabError};
use crate::token::SourceLoc;
use crate::validate::validate_path;

pub enum ModuleState {
    /// Mid-evaluation; seeing this during import is a cycle.
    Loading,
    Loaded(Rc<Env>),
}

#[derive(Default)]
pub struct ModuleTable {
    modules: HashMap<PathBuf, ModuleState>,
    /// Module names currently being evaluated, outermost first.
    loading_chain: Vec<String>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, path: &Path) -> Option<&ModuleState> {
        self.modules.get(path)
    }

    pub fn begin_loading(&mut self, path: &Path, name: &str) {
        self.modules.insert(path.to_path_buf(), ModuleState::Loading);
        self.loading_chain.push(name.to_string());
        debug!(module = name, "module load started");
    }

    pub fn finish_loading(&mut self, path: &Path, env: Rc<Env>) {
        self.modules
            .insert(path.to_path_buf(), ModuleState::Loaded(env));
        self.loading_chain.pop();
    }

    /// Drop a failed load so a later import can retry.
    pub fn abort_loading(&mut self, path: &Path) {
        self.modules.remove(path);
        self.loading_chain.pop();
    }

    /// The cycle error for re-importing `name` while it is still loading:
    /// names every module from its first appearance through the repeat.
    pub fn cycle_error(&self, name: &str, loc: &SourceLoc) -> NaabError {
        let mut cycle: Vec<String> = self
            .loading_chain
            .iter()
            .skip_while(|m| m.as_str() != name)
            .cloned()
            .collect();
        cycle.push(name.to_string());
        NaabError::new(
            ErrorKind::Import,
            format!("cyclic module dependency: {}", cycle.join(" -> ")),
        )
        .at(loc.clone())
    }

    /// Environments of every loaded module, for GC rooting.
    pub fn loaded_envs(&self) -> Vec<Rc<Env>> {
        self.modules
            .values()
            .filter_map(|s| match s {
                ModuleState::Loaded(env) => Some(env.clone()),
                ModuleState::Loading => None,
            })
            .collect()
    }
}

/// Resolve a module path (`use a.b` -> `a/b.naab`) against the search order:
/// the importing file's directory, its `lib/` convention, the user cache,
/// then system paths. The winner must clear the path validator.
pub fn resolve_module(
    segments: &[String],
    importing_file: &Path,
    allowed_roots: &[PathBuf],
    loc: &SourceLoc,
) -> Result<PathBuf, NaabError> {
    let mut relative = PathBuf::new();
    for segment in segments {
        relative.push(segment);
    }
    relative.set_extension("naab");

    let importing_dir = importing_file
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut candidates = vec![
        importing_dir.join(&relative),
        importing_dir.join("lib").join(&relative),
    ];
    if let Some(cache) = dirs::cache_dir() {
        candidates.push(cache.join("naab").join("modules").join(&relative));
    }
    candidates.push(PathBuf::from("/usr/local/lib/naab").join(&relative));
    candidates.push(PathBuf::from("/usr/lib/naab").join(&relative));

    for candidate in &candidates {
        if candidate.is_file() {
            // Module files count the search directories as allowed roots too.
            let mut roots = allowed_roots.to_vec();
            roots.push(PathBuf::from("/usr/local/lib/naab"));
            roots.push(PathBuf::from("/usr/lib/naab"));
            if let Some(cache) = dirs::cache_dir() {
                roots.push(cache.join("naab"));
            }
            return validate_path(candidate, &roots).map_err(|e| e.at(loc.clone()));
        }
    }

    Err(NaabError::new(
        ErrorKind::Import,
        format!("module '{}' not found", segments.join(".")),
    )
    .at(loc.clone()))
}
