//! Process-spawn executors: Python, JavaScript (node), Ruby, PHP, and the
//! generic subprocess runner.
//!
//! Each language gets a generated harness that injects the binding snapshot,
//! evaluates the block body, and frames the final value as one JSON line on
//! stdout (`__naab_result__=`). Failures are framed on stderr
//! (`__naab_error__=`) with the foreign class name and the line *within the
//! block body*; `ref`-tagged bindings come back on stderr too
//! (`__naab_refs__=`) so struct mutations can be written back. In
//! sovereign-pipe mode the harness skips result framing and the whole stdout
//! must be a single JSON document.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::polyglot::{BlockOutput, ExecOptions, Payload, PolyglotExecutor, PolyglotFailure};

pub(crate) const RESULT_MARKER: &str = "__naab_result__=";
pub(crate) const ERROR_MARKER: &str = "__naab_error__=";
pub(crate) const REFS_MARKER: &str = "__naab_refs__=";

/// Spawn `cmd`, feed it `stdin_data`, and collect output, killing the child
/// when the deadline passes. Reader threads drain the pipes so a chatty
/// child cannot deadlock on a full buffer.
pub(crate) fn run_with_timeout(
    cmd: &mut Command,
    stdin_data: Option<&[u8]>,
    timeout: Duration,
) -> Result<std::process::Output, PolyglotFailure> {
    let mut child = cmd
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PolyglotFailure::new(format!("cannot spawn process: {}", e)))?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early closes the pipe; that is its business.
            let _ = stdin.write_all(data);
        }
    }

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PolyglotFailure::timeout(timeout));
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                return Err(PolyglotFailure::new(format!("wait failed: {}", e)));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(std::process::Output {
        status,
        stdout,
        stderr,
    })
}

/// Embed a string as a JSON literal, which doubles as a valid string literal
/// in every harness language used here.
fn quote(text: &str) -> String {
    serde_json::to_string(text).expect("strings always serialize")
}

fn bindings_json(bindings: &[(String, Payload)]) -> String {
    let mut map = serde_json::Map::new();
    for (name, payload) in bindings {
        map.insert(name.clone(), payload.to_json());
    }
    serde_json::Value::Object(map).to_string()
}

fn ref_names_json(options: &ExecOptions) -> String {
    serde_json::Value::Array(
        options
            .ref_bindings
            .iter()
            .map(|n| serde_json::Value::String(n.clone()))
            .collect(),
    )
    .to_string()
}

/// Parse harness-framed output into a block output or failure.
fn parse_framed_output(
    output: &std::process::Output,
    options: &ExecOptions,
    language: &str,
) -> Result<BlockOutput, PolyglotFailure> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if let Some(line) = stderr.lines().rev().find(|l| l.starts_with(ERROR_MARKER)) {
        return Err(parse_error_frame(&line[ERROR_MARKER.len()..], language));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(PolyglotFailure::new(format!(
            "{} process exited with {}: {}",
            language,
            output.status,
            stderr.trim()
        )));
    }

    // Write-back frame for `ref`-tagged bindings, stderr so sovereign-pipe
    // stdout stays pure.
    let ref_values = stderr
        .lines()
        .rev()
        .find(|l| l.starts_with(REFS_MARKER))
        .and_then(|line| serde_json::from_str::<serde_json::Value>(&line[REFS_MARKER.len()..]).ok())
        .map(|json| match Payload::from_json(&json) {
            Payload::Dict(entries) => entries,
            _ => Vec::new(),
        })
        .unwrap_or_default();

    if options.json_return {
        // Sovereign pipe: the whole stdout is one JSON document.
        let text = stdout.trim();
        let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            PolyglotFailure::new(format!(
                "sovereign-pipe mode expected a single JSON document on stdout: {}",
                e
            ))
        })?;
        return Ok(BlockOutput {
            value: Payload::from_json(&json),
            ref_values,
        });
    }

    let value = match stdout.lines().rev().find(|l| l.starts_with(RESULT_MARKER)) {
        Some(line) => {
            let json: serde_json::Value = serde_json::from_str(&line[RESULT_MARKER.len()..])
                .map_err(|e| PolyglotFailure::new(format!("malformed result frame: {}", e)))?;
            Payload::from_json(&json)
        }
        None => Payload::Null,
    };
    Ok(BlockOutput { value, ref_values })
}

fn parse_error_frame(json_text: &str, language: &str) -> PolyglotFailure {
    #[derive(serde::Deserialize)]
    struct Frame {
        #[serde(default)]
        r#type: Option<String>,
        #[serde(default)]
        message: String,
        #[serde(default)]
        line: Option<u32>,
    }
    match serde_json::from_str::<Frame>(json_text) {
        Ok(frame) => PolyglotFailure {
            message: frame.message,
            foreign_type: frame.r#type,
            block_line: frame.line,
            timeout: false,
        },
        Err(_) => PolyglotFailure::new(format!("{} reported an unreadable error", language)),
    }
}

// -- Python --

pub struct PythonExecutor;

impl PythonExecutor {
    fn harness(&self, code: &str, bindings: &[(String, Payload)], options: &ExecOptions) -> String {
        let mut script = String::new();
        script.push_str("import json as _naab_json, sys as _naab_sys\n");
        script.push_str("import ast as _naab_ast, traceback as _naab_traceback\n");
        script.push_str(&format!(
            "_naab_bindings = _naab_json.loads({})\n",
            quote(&bindings_json(bindings))
        ));
        script.push_str("globals().update(_naab_bindings)\n");
        script.push_str(&format!(
            "_naab_ref_names = _naab_json.loads({})\n",
            quote(&ref_names_json(options))
        ));
        script.push_str(&format!("_naab_src = {}\n", quote(code)));
        script.push_str(concat!(
            "def _naab_exec():\n",
            "    _naab_tree = _naab_ast.parse(_naab_src)\n",
            "    if _naab_tree.body and isinstance(_naab_tree.body[-1], _naab_ast.Expr):\n",
            "        _naab_last = _naab_tree.body.pop()\n",
            "        _naab_module = _naab_ast.Module(body=_naab_tree.body, type_ignores=[])\n",
            "        exec(compile(_naab_module, '<naab-block>', 'exec'), globals())\n",
            "        _naab_expr = _naab_ast.Expression(body=_naab_last.value)\n",
            "        return eval(compile(_naab_expr, '<naab-block>', 'eval'), globals())\n",
            "    exec(compile(_naab_tree, '<naab-block>', 'exec'), globals())\n",
            "    return None\n",
            "try:\n",
            "    _naab_value = _naab_exec()\n",
            "    if _naab_ref_names:\n",
            "        _naab_refs = {_naab_n: globals().get(_naab_n) for _naab_n in _naab_ref_names}\n",
            "        _naab_sys.stderr.write('__naab_refs__=' + _naab_json.dumps(_naab_refs, default=str) + '\\n')\n",
        ));
        if options.json_return {
            script.push_str("    pass\n");
        } else {
            script.push_str(
                "    print('__naab_result__=' + _naab_json.dumps(_naab_value, default=str))\n",
            );
        }
        script.push_str(concat!(
            "except BaseException as _naab_err:\n",
            "    _naab_line = None\n",
            "    if isinstance(_naab_err, SyntaxError) and _naab_err.filename == '<naab-block>':\n",
            "        _naab_line = _naab_err.lineno\n",
            "    for _naab_frame in _naab_traceback.extract_tb(_naab_sys.exc_info()[2]):\n",
            "        if _naab_frame.filename == '<naab-block>':\n",
            "            _naab_line = _naab_frame.lineno\n",
            "    _naab_sys.stderr.write('__naab_error__=' + _naab_json.dumps({\n",
            "        'type': type(_naab_err).__name__,\n",
            "        'message': str(_naab_err),\n",
            "        'line': _naab_line,\n",
            "    }) + '\\n')\n",
            "    _naab_sys.exit(3)\n",
        ));
        script
    }
}

impl PolyglotExecutor for PythonExecutor {
    fn language(&self) -> &str {
        "python"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let harness = self.harness(code, bindings, options);
        debug!(language = "python", bytes = code.len(), "executing block");
        let output = run_with_timeout(
            Command::new("python3").arg("-c").arg(&harness),
            None,
            options.timeout,
        )?;
        parse_framed_output(&output, options, "python")
    }
}

// -- JavaScript --

/// Runs on node. Every execution is its own process, which is the strongest
/// form of the fresh-context-per-block isolation rule.
pub struct JavaScriptExecutor;

impl JavaScriptExecutor {
    fn harness(&self, code: &str, bindings: &[(String, Payload)], options: &ExecOptions) -> String {
        let mut script = String::new();
        script.push_str(&format!(
            "const _naab_bindings = JSON.parse({});\n",
            quote(&bindings_json(bindings))
        ));
        script.push_str(
            "for (const [k, v] of Object.entries(_naab_bindings)) { globalThis[k] = v; }\n",
        );
        script.push_str(&format!(
            "const _naab_ref_names = JSON.parse({});\n",
            quote(&ref_names_json(options))
        ));
        script.push_str(&format!("const _naab_src = {};\n", quote(code)));
        // The body runs inside an IIFE either way. A simple expression wraps
        // directly; anything that fails to parse as one goes through eval so
        // multi-statement bodies still yield their completion value.
        script.push_str(concat!(
            "let _naab_run;\n",
            "try {\n",
            "  _naab_run = new Function('return (' + _naab_src + '\\n);');\n",
            "} catch (_naab_parse_err) {\n",
            "  _naab_run = function () { return eval(_naab_src); };\n",
            "}\n",
            "try {\n",
            "  const _naab_value = _naab_run();\n",
            "  if (_naab_ref_names.length > 0) {\n",
            "    const _naab_refs = {};\n",
            "    for (const _naab_n of _naab_ref_names) {\n",
            "      _naab_refs[_naab_n] = globalThis[_naab_n] === undefined ? null : globalThis[_naab_n];\n",
            "    }\n",
            "    console.error('__naab_refs__=' + JSON.stringify(_naab_refs));\n",
            "  }\n",
        ));
        if !options.json_return {
            script.push_str(
                "  console.log('__naab_result__=' + JSON.stringify(_naab_value === undefined ? null : _naab_value));\n",
            );
        }
        script.push_str(concat!(
            "} catch (_naab_err) {\n",
            "  const _naab_match = /<anonymous>:(\\d+)/.exec(_naab_err && _naab_err.stack || '');\n",
            "  console.error('__naab_error__=' + JSON.stringify({\n",
            "    type: _naab_err && _naab_err.constructor ? _naab_err.constructor.name : 'Error',\n",
            "    message: _naab_err && _naab_err.message !== undefined ? String(_naab_err.message) : String(_naab_err),\n",
            "    line: _naab_match ? Number(_naab_match[1]) : null,\n",
            "  }));\n",
            "  process.exit(3);\n",
            "}\n",
        ));
        script
    }
}

impl PolyglotExecutor for JavaScriptExecutor {
    fn language(&self) -> &str {
        "javascript"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let harness = self.harness(code, bindings, options);
        debug!(language = "javascript", bytes = code.len(), "executing block");
        let output = run_with_timeout(
            Command::new("node").arg("-e").arg(&harness),
            None,
            options.timeout,
        )?;
        parse_framed_output(&output, options, "javascript")
    }
}

// -- Ruby --

pub struct RubyExecutor;

impl RubyExecutor {
    fn harness(&self, code: &str, bindings: &[(String, Payload)], options: &ExecOptions) -> String {
        let mut script = String::new();
        script.push_str("require 'json'\n");
        script.push_str(&format!(
            "_naab_bindings = JSON.parse({})\n",
            quote(&bindings_json(bindings))
        ));
        script.push_str("_naab_scope = binding\n");
        script.push_str(
            "_naab_bindings.each { |k, v| _naab_scope.local_variable_set(k.to_sym, v) }\n",
        );
        script.push_str(&format!(
            "_naab_ref_names = JSON.parse({})\n",
            quote(&ref_names_json(options))
        ));
        script.push_str(&format!("_naab_src = {}\n", quote(code)));
        script.push_str("begin\n");
        script.push_str("  _naab_value = _naab_scope.eval(_naab_src, '<naab-block>')\n");
        script.push_str(concat!(
            "  unless _naab_ref_names.empty?\n",
            "    _naab_refs = {}\n",
            "    _naab_ref_names.each { |k| _naab_refs[k] = _naab_scope.local_variable_get(k.to_sym) }\n",
            "    STDERR.puts('__naab_refs__=' + JSON.generate(_naab_refs))\n",
            "  end\n",
        ));
        if !options.json_return {
            script.push_str("  puts('__naab_result__=' + JSON.generate(_naab_value))\n");
        }
        script.push_str(concat!(
            "rescue Exception => _naab_err\n",
            "  _naab_line = nil\n",
            "  (_naab_err.backtrace || []).each do |_naab_frame|\n",
            "    if _naab_line.nil? && _naab_frame =~ /<naab-block>:(\\d+)/\n",
            "      _naab_line = $1.to_i\n",
            "    end\n",
            "  end\n",
            "  STDERR.puts('__naab_error__=' + JSON.generate({\n",
            "    'type' => _naab_err.class.name,\n",
            "    'message' => _naab_err.message,\n",
            "    'line' => _naab_line,\n",
            "  }))\n",
            "  exit(3)\n",
            "end\n",
        ));
        script
    }
}

impl PolyglotExecutor for RubyExecutor {
    fn language(&self) -> &str {
        "ruby"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let harness = self.harness(code, bindings, options);
        let output = run_with_timeout(
            Command::new("ruby").arg("-e").arg(&harness),
            None,
            options.timeout,
        )?;
        parse_framed_output(&output, options, "ruby")
    }
}

// -- PHP --

pub struct PhpExecutor;

impl PhpExecutor {
    fn harness(&self, code: &str, bindings: &[(String, Payload)], options: &ExecOptions) -> String {
        let mut script = String::new();
        script.push_str(&format!(
            "$_naab_bindings = json_decode({}, true);\n",
            quote(&bindings_json(bindings))
        ));
        script.push_str("foreach ($_naab_bindings as $_naab_k => $_naab_v) { $$_naab_k = $_naab_v; }\n");
        script.push_str(&format!(
            "$_naab_ref_names = json_decode({}, true);\n",
            quote(&ref_names_json(options))
        ));
        script.push_str("try {\n");
        script.push_str(&format!("  $_naab_value = eval({});\n", quote(&php_body(code))));
        script.push_str(concat!(
            "  if (count($_naab_ref_names) > 0) {\n",
            "    $_naab_refs = [];\n",
            "    foreach ($_naab_ref_names as $_naab_k) { $_naab_refs[$_naab_k] = $$_naab_k; }\n",
            "    fwrite(STDERR, '__naab_refs__=' . json_encode($_naab_refs) . \"\\n\");\n",
            "  }\n",
        ));
        if !options.json_return {
            script.push_str(
                "  echo '__naab_result__=' . json_encode($_naab_value === null ? null : $_naab_value) . \"\\n\";\n",
            );
        }
        script.push_str(concat!(
            "} catch (\\Throwable $_naab_err) {\n",
            "  fwrite(STDERR, '__naab_error__=' . json_encode([\n",
            "    'type' => get_class($_naab_err),\n",
            "    'message' => $_naab_err->getMessage(),\n",
            "    'line' => $_naab_err->getLine(),\n",
            "  ]) . \"\\n\");\n",
            "  exit(3);\n",
            "}\n",
        ));
        script
    }
}

/// PHP's `eval` only yields a value through an explicit return; single
/// expressions get one synthesized.
fn php_body(code: &str) -> String {
    let trimmed = code.trim();
    if !trimmed.contains(';') && !trimmed.is_empty() {
        format!("return {};", trimmed)
    } else {
        trimmed.to_string()
    }
}

impl PolyglotExecutor for PhpExecutor {
    fn language(&self) -> &str {
        "php"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let harness = self.harness(code, bindings, options);
        let output = run_with_timeout(
            Command::new("php").arg("-r").arg(&harness),
            None,
            options.timeout,
        )?;
        parse_framed_output(&output, options, "php")
    }
}

// -- generic subprocess --

/// The block body is a command line: whitespace-split argv, bindings exposed
/// as environment variables, stdout as the result (JSON-parsed in sovereign
/// mode, raw string otherwise).
pub struct SubprocessExecutor;

impl PolyglotExecutor for SubprocessExecutor {
    fn language(&self) -> &str {
        "subprocess"
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let mut parts = code.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| PolyglotFailure::new("empty subprocess command"))?;
        let mut cmd = Command::new(program);
        cmd.args(parts);
        for (name, payload) in bindings {
            cmd.env(name, payload_env_string(payload));
        }

        let output = run_with_timeout(&mut cmd, None, options.timeout)?;
        if !output.status.success() {
            return Err(PolyglotFailure::new(format!(
                "subprocess exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // Bindings flatten to environment strings here, so there is no
        // object to report back: ref write-back is not available.
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

/// Environment variables carry strings; compounds flatten to JSON.
pub(crate) fn payload_env_string(payload: &Payload) -> String {
    match payload {
        Payload::Null => String::new(),
        Payload::Bool(b) => b.to_string(),
        Payload::Int(n) => n.to_string(),
        Payload::Float(x) => x.to_string(),
        Payload::Str(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExecOptions {
        ExecOptions {
            json_return: false,
            timeout: Duration::from_secs(10),
            ref_bindings: Vec::new(),
        }
    }

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn run_with_timeout_kills_runaways() {
        // `sleep` exists on any POSIX host the suite runs on.
        let started = Instant::now();
        let err = run_with_timeout(
            Command::new("sleep").arg("30"),
            None,
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(err.timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn subprocess_captures_stdout() {
        let result = SubprocessExecutor
            .execute("echo hello world", &[], &options())
            .unwrap();
        assert_eq!(result.value, Payload::Str("hello world".to_string()));
    }

    #[test]
    fn subprocess_nonzero_exit_is_an_error() {
        let err = SubprocessExecutor
            .execute("false", &[], &options())
            .unwrap_err();
        assert!(err.message.contains("exited"), "{}", err.message);
    }

    #[test]
    fn python_expression_value_round_trips() {
        if !python_available() {
            return;
        }
        let result = PythonExecutor.execute("1 + 1", &[], &options()).unwrap();
        assert_eq!(result.value, Payload::Int(2));
    }

    #[test]
    fn python_overflowing_integer_comes_back_as_string() {
        if !python_available() {
            return;
        }
        let result = PythonExecutor.execute("2 ** 63", &[], &options()).unwrap();
        assert_eq!(
            result.value,
            Payload::Str("9223372036854775808".to_string())
        );
    }

    #[test]
    fn python_bindings_and_indentation_survive() {
        if !python_available() {
            return;
        }
        let code = "total = 0\nfor item in xs:\n    total += item\ntotal";
        let bindings = vec![(
            "xs".to_string(),
            Payload::List(vec![Payload::Int(1), Payload::Int(2), Payload::Int(3)]),
        )];
        let result = PythonExecutor.execute(code, &bindings, &options()).unwrap();
        assert_eq!(result.value, Payload::Int(6));
    }

    #[test]
    fn python_ref_bindings_report_final_values() {
        if !python_available() {
            return;
        }
        let bindings = vec![(
            "p".to_string(),
            Payload::Dict(vec![("x".to_string(), Payload::Int(1))]),
        )];
        let opts = ExecOptions {
            ref_bindings: vec!["p".to_string()],
            ..options()
        };
        let result = PythonExecutor
            .execute("p['x'] = 41\np['x'] + 1", &bindings, &opts)
            .unwrap();
        assert_eq!(result.value, Payload::Int(42));
        assert_eq!(
            result.ref_values,
            vec![(
                "p".to_string(),
                Payload::Dict(vec![("x".to_string(), Payload::Int(41))])
            )]
        );
    }

    #[test]
    fn python_error_carries_class_and_block_line() {
        if !python_available() {
            return;
        }
        let err = PythonExecutor
            .execute("x = 1\nraise ValueError('boom')", &[], &options())
            .unwrap_err();
        assert_eq!(err.foreign_type.as_deref(), Some("ValueError"));
        assert_eq!(err.message, "boom");
        assert_eq!(err.block_line, Some(2));
    }

    #[test]
    fn python_sovereign_pipe_parses_stdout_json() {
        if !python_available() {
            return;
        }
        let opts = ExecOptions {
            json_return: true,
            ..options()
        };
        let result = PythonExecutor
            .execute("import json\nprint(json.dumps({'a': [1, 2]}))", &[], &opts)
            .unwrap();
        assert_eq!(
            result.value,
            Payload::Dict(vec![(
                "a".to_string(),
                Payload::List(vec![Payload::Int(1), Payload::Int(2)])
            )])
        );
    }
}
