//! Parallel group dispatch.
//!
//! Groups come from the analyzer already free of pairwise dependencies. A
//! single-block group executes in place on the calling thread; larger groups
//! get one OS thread per block, joined before control returns. Results come
//! back tagged with source order so the caller can commit deterministically.

use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::polyglot::{BlockOutput, ExecOptions, ExecutorRegistry, Payload, PolyglotFailure};

/// Everything a thread needs to run one block: owned, `Send`, snapshot
/// included.
pub struct PreparedBlock {
    /// Position within the statement run, source order.
    pub index: usize,
    pub lang: String,
    pub body: String,
    pub bindings: Vec<(String, Payload)>,
    pub options: ExecOptions,
}

/// Execute one independent group. The result vector is ordered by source
/// index regardless of which thread finished first.
pub fn execute_group(
    registry: &Arc<ExecutorRegistry>,
    mut blocks: Vec<PreparedBlock>,
) -> Vec<(usize, Result<BlockOutput, PolyglotFailure>)> {
    blocks.sort_by_key(|b| b.index);

    // Zero threading overhead for the common single-block case.
    if blocks.len() == 1 {
        let block = blocks.pop().expect("exactly one block");
        let result = run_one(registry, &block);
        return vec![(block.index, result)];
    }

    debug!(blocks = blocks.len(), "dispatching polyglot group");
    let mut handles = Vec::with_capacity(blocks.len());
    for block in blocks {
        let registry = registry.clone();
        handles.push(thread::spawn(move || {
            let result = run_one(&registry, &block);
            (block.index, result)
        }));
    }

    // Join every thread before returning: errors are surfaced only after
    // the whole group has finished.
    let mut results: Vec<(usize, Result<BlockOutput, PolyglotFailure>)> = handles
        .into_iter()
        .map(|h| {
            h.join().unwrap_or_else(|_| {
                (usize::MAX, Err(PolyglotFailure::new("dispatch thread panicked")))
            })
        })
        .collect();
    results.sort_by_key(|(index, _)| *index);
    results
}

fn run_one(
    registry: &Arc<ExecutorRegistry>,
    block: &PreparedBlock,
) -> Result<BlockOutput, PolyglotFailure> {
    let executor = registry.get(&block.lang).ok_or_else(|| {
        PolyglotFailure::new(format!(
            "no executor registered for language '{}'",
            block.lang
        ))
    })?;
    executor.execute(&block.body, &block.bindings, &block.options)
}
