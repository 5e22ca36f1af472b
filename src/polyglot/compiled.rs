//! Compile-and-spawn executors for C++, Rust, Go, and C# (Mono).
//!
//! Generated wrappers inject bindings as typed constants, compile with the
//! system toolchain, and cache the binary by content hash so repeated blocks
//! skip the compiler entirely — across threads and across runs. Temporary
//! source paths are content-addressed plus a per-process nonce, so parallel
//! dispatch threads never collide.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::polyglot::process::run_with_timeout;
use crate::polyglot::{BlockOutput, ExecOptions, Payload, PolyglotExecutor, PolyglotFailure};

/// Process-wide compilation cache: content hash -> compiled binary path.
static COMPILE_CACHE: Lazy<Mutex<HashMap<String, PathBuf>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toolchain {
    Cpp,
    Rust,
    Go,
    CSharp,
}

pub struct CompiledExecutor {
    toolchain: Toolchain,
}

impl CompiledExecutor {
    pub fn cpp() -> Self {
        CompiledExecutor {
            toolchain: Toolchain::Cpp,
        }
    }

    pub fn rust() -> Self {
        CompiledExecutor {
            toolchain: Toolchain::Rust,
        }
    }

    pub fn go() -> Self {
        CompiledExecutor {
            toolchain: Toolchain::Go,
        }
    }

    pub fn csharp() -> Self {
        CompiledExecutor {
            toolchain: Toolchain::CSharp,
        }
    }

    fn tag(&self) -> &'static str {
        match self.toolchain {
            Toolchain::Cpp => "cpp",
            Toolchain::Rust => "rust",
            Toolchain::Go => "go",
            Toolchain::CSharp => "csharp",
        }
    }

    fn source_extension(&self) -> &'static str {
        match self.toolchain {
            Toolchain::Cpp => "cpp",
            Toolchain::Rust => "rs",
            Toolchain::Go => "go",
            Toolchain::CSharp => "cs",
        }
    }

    /// Wrap the block body in a compilable program with bindings injected.
    /// Only primitives and strings cross into compiled blocks.
    fn generate_source(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
    ) -> Result<String, PolyglotFailure> {
        let mut decls = String::new();
        for (name, payload) in bindings {
            decls.push_str(&self.binding_decl(name, payload)?);
        }
        Ok(match self.toolchain {
            Toolchain::Cpp => format!(
                "#include <bits/stdc++.h>\nusing namespace std;\n\nint main() {{\n{}{}\n    return 0;\n}}\n",
                decls, code
            ),
            Toolchain::Rust => format!(
                "#![allow(unused)]\nfn main() {{\n{}{}\n}}\n",
                decls, code
            ),
            Toolchain::Go => format!(
                "package main\n\nimport \"fmt\"\n\nvar _ = fmt.Sprint\n\nfunc main() {{\n{}{}\n}}\n",
                decls, code
            ),
            Toolchain::CSharp => format!(
                "using System;\n\nclass NaabBlock {{\n    static void Main() {{\n{}{}\n    }}\n}}\n",
                decls, code
            ),
        })
    }

    fn binding_decl(&self, name: &str, payload: &Payload) -> Result<String, PolyglotFailure> {
        let literal = |s: &str| serde_json::to_string(s).expect("strings always serialize");
        Ok(match (self.toolchain, payload) {
            (Toolchain::Cpp, Payload::Int(n)) => format!("    long long {} = {}LL;\n", name, n),
            (Toolchain::Cpp, Payload::Float(x)) => format!("    double {} = {:?};\n", name, x),
            (Toolchain::Cpp, Payload::Bool(b)) => format!("    bool {} = {};\n", name, b),
            (Toolchain::Cpp, Payload::Str(s)) => {
                format!("    std::string {} = {};\n", name, literal(s))
            }
            (Toolchain::Rust, Payload::Int(n)) => format!("    let {}: i64 = {};\n", name, n),
            (Toolchain::Rust, Payload::Float(x)) => format!("    let {}: f64 = {:?};\n", name, x),
            (Toolchain::Rust, Payload::Bool(b)) => format!("    let {} = {};\n", name, b),
            (Toolchain::Rust, Payload::Str(s)) => {
                format!("    let {}: &str = {};\n", name, literal(s))
            }
            (Toolchain::Go, Payload::Int(n)) => {
                format!("    var {} int64 = {}\n    _ = {}\n", name, n, name)
            }
            (Toolchain::Go, Payload::Float(x)) => {
                format!("    var {} float64 = {:?}\n    _ = {}\n", name, x, name)
            }
            (Toolchain::Go, Payload::Bool(b)) => {
                format!("    var {} bool = {}\n    _ = {}\n", name, b, name)
            }
            (Toolchain::Go, Payload::Str(s)) => {
                format!("    var {} string = {}\n    _ = {}\n", name, literal(s), name)
            }
            (Toolchain::CSharp, Payload::Int(n)) => format!("        long {} = {};\n", name, n),
            (Toolchain::CSharp, Payload::Float(x)) => {
                format!("        double {} = {:?};\n", name, x)
            }
            (Toolchain::CSharp, Payload::Bool(b)) => format!("        bool {} = {};\n", name, b),
            (Toolchain::CSharp, Payload::Str(s)) => {
                format!("        string {} = {};\n", name, literal(s))
            }
            (_, other) => {
                return Err(PolyglotFailure::new(format!(
                    "compiled blocks accept primitive and string bindings only, got {:?}",
                    other
                )));
            }
        })
    }

    fn cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("naab")
            .join("polyglot")
    }

    /// Compile `source`, reusing the cached binary for identical content.
    fn ensure_compiled(&self, source: &str) -> Result<PathBuf, PolyglotFailure> {
        let mut hasher = Sha256::new();
        hasher.update(self.tag().as_bytes());
        hasher.update(source.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        {
            let cache = COMPILE_CACHE.lock().expect("compile cache poisoned");
            if let Some(path) = cache.get(&hash) {
                if path.exists() {
                    return Ok(path.clone());
                }
            }
        }

        let dir = Self::cache_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| PolyglotFailure::new(format!("cannot create cache dir: {}", e)))?;

        let binary = dir.join(&hash);
        if !binary.exists() {
            // Unique scratch path per process and call: parallel threads
            // compiling the same content race harmlessly on the rename.
            let nonce = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
            let scratch = dir.join(format!(
                "{}-{}-{}.{}",
                hash,
                std::process::id(),
                nonce,
                self.source_extension()
            ));
            std::fs::write(&scratch, source)
                .map_err(|e| PolyglotFailure::new(format!("cannot write source: {}", e)))?;

            let scratch_bin = dir.join(format!("{}-{}-{}.bin", hash, std::process::id(), nonce));
            let output = self
                .compile_command(&scratch, &scratch_bin)
                .output()
                .map_err(|e| {
                    PolyglotFailure::new(format!(
                        "{} toolchain unavailable: {}",
                        self.tag(),
                        e
                    ))
                })?;
            if !output.status.success() {
                let _ = std::fs::remove_file(&scratch);
                return Err(PolyglotFailure {
                    message: format!(
                        "{} compilation failed: {}",
                        self.tag(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                    foreign_type: Some("CompileError".to_string()),
                    block_line: None,
                    timeout: false,
                });
            }
            let _ = std::fs::remove_file(&scratch);
            std::fs::rename(&scratch_bin, &binary)
                .map_err(|e| PolyglotFailure::new(format!("cannot finalize binary: {}", e)))?;
            debug!(language = self.tag(), %hash, "compiled and cached block");
        }

        let mut cache = COMPILE_CACHE.lock().expect("compile cache poisoned");
        cache.insert(hash, binary.clone());
        Ok(binary)
    }

    fn compile_command(&self, source: &PathBuf, out: &PathBuf) -> Command {
        match self.toolchain {
            Toolchain::Cpp => {
                let mut cmd = Command::new("c++");
                cmd.arg("-std=c++17").arg("-O1").arg(source).arg("-o").arg(out);
                cmd
            }
            Toolchain::Rust => {
                let mut cmd = Command::new("rustc");
                cmd.arg("--edition=2021").arg("-O").arg(source).arg("-o").arg(out);
                cmd
            }
            Toolchain::Go => {
                let mut cmd = Command::new("go");
                cmd.arg("build").arg("-o").arg(out).arg(source);
                cmd
            }
            Toolchain::CSharp => {
                let mut cmd = Command::new("mcs");
                cmd.arg(format!("-out:{}", out.display())).arg(source);
                cmd
            }
        }
    }

    fn run_command(&self, binary: &PathBuf) -> Command {
        match self.toolchain {
            // Mono assemblies need the runtime host.
            Toolchain::CSharp => {
                let mut cmd = Command::new("mono");
                cmd.arg(binary);
                cmd
            }
            _ => Command::new(binary),
        }
    }
}

impl PolyglotExecutor for CompiledExecutor {
    fn language(&self) -> &str {
        self.tag()
    }

    fn execute(
        &self,
        code: &str,
        bindings: &[(String, Payload)],
        options: &ExecOptions,
    ) -> Result<BlockOutput, PolyglotFailure> {
        let source = self.generate_source(code, bindings)?;
        let binary = self.ensure_compiled(&source)?;
        let output = run_with_timeout(&mut self.run_command(&binary), None, options.timeout)?;

        if !output.status.success() {
            return Err(PolyglotFailure::new(format!(
                "{} block exited with {}: {}",
                self.tag(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // Stdout framing: JSON in sovereign-pipe mode, else a best-effort
        // parse of the printed text as int, float, bool, or string. Bindings
        // enter as typed constants, so ref write-back is not available.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.trim();
        if options.json_return {
            let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                PolyglotFailure::new(format!("sovereign-pipe mode expected JSON: {}", e))
            })?;
            return Ok(BlockOutput::value(Payload::from_json(&json)));
        }
        if let Ok(n) = text.parse::<i64>() {
            return Ok(BlockOutput::value(Payload::Int(n)));
        }
        if let Ok(x) = text.parse::<f64>() {
            return Ok(BlockOutput::value(Payload::Float(x)));
        }
        let value = match text {
            "true" => Payload::Bool(true),
            "false" => Payload::Bool(false),
            _ => Payload::Str(text.to_string()),
        };
        Ok(BlockOutput::value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options() -> ExecOptions {
        ExecOptions {
            json_return: false,
            timeout: Duration::from_secs(120),
            ref_bindings: Vec::new(),
        }
    }

    fn toolchain_available(binary: &str) -> bool {
        Command::new(binary)
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn cpp_wrapper_includes_stl_and_bindings() {
        let executor = CompiledExecutor::cpp();
        let source = executor
            .generate_source(
                "cout << x + 1 << endl;",
                &[("x".to_string(), Payload::Int(41))],
            )
            .unwrap();
        assert!(source.contains("#include <bits/stdc++.h>"));
        assert!(source.contains("long long x = 41LL;"));
        assert!(source.contains("int main()"));
    }

    #[test]
    fn rust_wrapper_declares_typed_bindings() {
        let executor = CompiledExecutor::rust();
        let source = executor
            .generate_source(
                "println!(\"{}\", msg.len());",
                &[("msg".to_string(), Payload::Str("hello".to_string()))],
            )
            .unwrap();
        assert!(source.contains("let msg: &str = \"hello\";"));
    }

    #[test]
    fn compound_bindings_are_rejected() {
        let executor = CompiledExecutor::cpp();
        let err = executor
            .generate_source("", &[("xs".to_string(), Payload::List(vec![]))])
            .unwrap_err();
        assert!(err.message.contains("primitive"), "{}", err.message);
    }

    #[test]
    fn rust_block_compiles_caches_and_runs() {
        if !toolchain_available("rustc") {
            return;
        }
        let executor = CompiledExecutor::rust();
        let bindings = vec![("x".to_string(), Payload::Int(20))];
        let result = executor
            .execute("println!(\"{}\", x * 2 + 2);", &bindings, &options())
            .unwrap();
        assert_eq!(result.value, Payload::Int(42));

        // Second run must hit the content-addressed cache.
        let again = executor
            .execute("println!(\"{}\", x * 2 + 2);", &bindings, &options())
            .unwrap();
        assert_eq!(again.value, Payload::Int(42));
    }

    #[test]
    fn cpp_block_compiles_and_runs() {
        if !toolchain_available("c++") {
            return;
        }
        let executor = CompiledExecutor::cpp();
        let result = executor
            .execute("cout << 6 * 7 << endl;", &[], &options())
            .unwrap();
        assert_eq!(result.value, Payload::Int(42));
    }
}
