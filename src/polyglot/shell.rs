//! Shell executor.
//!
//! Bodies containing compound operators go through `sh -c`; simple commands
//! spawn directly as argv. Bindings are exported as environment variables,
//! stdout is the value, and a nonzero exit surfaces as a polyglot failure.

use std::process::Command;

use crate::polyglot::process::{payload_env_string, run_with_timeout};
use crate::polyglot::{BlockOutput, ExecOptions, Payload, PolyglotExecutor, PolyglotFailure};

pub struct ShellExecutor;

/// Compound operators, redirection, expansion, or quoting require a real
/// shell; everything else spawns as plain argv.
fn needs_shell(body: &str) -> bool {
    ["&&", "||", "|", ";", ">", "<", "$", "`", "*", "'", "\""]
        .iter()
        .any(|op| body.contains(op))
}

impl PolyglotExecutor for ShellExecutor {
    fn language(&self) -> &str {
        "shell"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let body = code.trim();
        if body.is_empty() {
            return Err(PolyglotFailure::new("empty shell block"));
        }

        let mut cmd = if needs_shell(body) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(body);
            cmd
        } else {
            let mut parts = body.split_whitespace();
            let program = parts.next().expect("nonempty body");
            let mut cmd = Command::new(program);
            cmd.args(parts);
            cmd
        };
        for (name, payload) in bindings {
            cmd.env(name, payload_env_string(payload));
        }

        let output = run_with_timeout(&mut cmd, None, options.timeout)?;
        if !output.status.success() {
            return Err(PolyglotFailure {
                message: format!(
                    "shell command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                foreign_type: Some("NonZeroExit".to_string()),
                block_line: None,
                timeout: false,
            });
        }

        // Bindings flatten to environment strings, so ref write-back is
        // not available here.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if options.json_return {
            let json: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
                PolyglotFailure::new(format!("sovereign-pipe mode expected JSON: {}", e))
            })?;
            Ok(BlockOutput::value(Payload::from_json(&json)))
        } else {
            Ok(BlockOutput::value(Payload::Str(
                stdout.trim_end_matches('\n').to_string(),
            )))
        }
    }
}
