//! Dependency analysis for straight-line polyglot block sequences.
//!
//! A block's inputs are the names in its bindings list plus every identifier
//! that appears syntactically in its body — deliberately conservative: a
//! doubtful capture serializes rather than races. Blocks are grouped into
//! maximal independent sets preserving topological order.

use std::collections::HashSet;

/// What the analyzer knows about one block statement in the sequence.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Position in the statement run, source order.
    pub index: usize,
    /// The name this block's result binds, if any.
    pub output: Option<String>,
    pub inputs: HashSet<String>,
}

/// Identifiers appearing syntactically in a foreign body. Textual scan on
/// purpose: the runtime cannot parse every foreign grammar, and over-
/// approximation only costs parallelism.
pub fn body_identifiers(body: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut current = String::new();
    for c in body.chars() {
        if c.is_alphanumeric() || c == '_' {
            current.push(c);
        } else {
            if is_identifier(&current) {
                names.insert(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if is_identifier(&current) {
        names.insert(current);
    }
    names
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Group blocks into execution waves: blocks in the same wave share no
/// dependency, and waves run in order. Equivalent to longest-path level
/// scheduling over the dependency DAG.
pub fn group_independent(blocks: &[BlockInfo]) -> Vec<Vec<usize>> {
    let mut levels: Vec<usize> = vec![0; blocks.len()];
    for (i, block) in blocks.iter().enumerate() {
        for (j, earlier) in blocks.iter().enumerate().take(i) {
            let depends = earlier
                .output
                .as_ref()
                .is_some_and(|out| block.inputs.contains(out));
            if depends {
                levels[i] = levels[i].max(levels[j] + 1);
            }
        }
    }

    let wave_count = levels.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut waves: Vec<Vec<usize>> = vec![Vec::new(); wave_count];
    for (i, level) in levels.iter().enumerate() {
        waves[*level].push(blocks[i].index);
    }
    waves
}
