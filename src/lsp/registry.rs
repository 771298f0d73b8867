//! Language-server launch recipes and language detection.
//!
//! A pure table: language id → executable, arguments, fallbacks, root
//! markers and known quirks. Detection is by file extension with a small
//! shebang sniff for extensionless scripts. Unknown languages are skipped
//! silently — a polyglot tree always contains files nobody can analyze.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;

/// Behavioral quirks of a server worth encoding rather than rediscovering.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    /// Milliseconds to wait after `initialized` before the first symbol
    /// query returns useful data (indexing warm-up).
    pub index_grace_ms: u64,
}

/// Launch recipe for one language.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// Language id as sent in `textDocument/didOpen`.
    pub language: &'static str,
    /// Preferred executable.
    pub command: String,
    /// Arguments for the preferred executable.
    pub args: Vec<String>,
    /// Fallback (command, args) pairs tried when the preferred executable
    /// is not installed.
    pub alternatives: Vec<(String, Vec<String>)>,
    /// Files or directories that mark a project root for this language.
    pub root_markers: Vec<&'static str>,
    /// Known quirks.
    pub quirks: Quirks,
}

impl ServerSpec {
    /// Resolves the command to launch: the preferred executable if it is
    /// on PATH, otherwise the first installed alternative, otherwise the
    /// preferred one (letting the spawn fail with a useful error).
    pub fn resolve_command(&self) -> (String, Vec<String>) {
        if which::which(&self.command).is_ok() {
            return (self.command.clone(), self.args.clone());
        }
        for (alt, args) in &self.alternatives {
            if which::which(alt).is_ok() {
                return (alt.clone(), args.clone());
            }
        }
        (self.command.clone(), self.args.clone())
    }
}

/// The registry of launch recipes, with config overrides applied.
#[derive(Debug)]
pub struct Registry {
    specs: HashMap<&'static str, ServerSpec>,
    excluded: Vec<String>,
}

impl Registry {
    /// Builds the default table with `[servers.<lang>]` overrides merged
    /// in and `[workspaces].excluded_languages` honored.
    pub fn new(config: &Config) -> Self {
        let mut specs = HashMap::new();
        for spec in default_specs() {
            specs.insert(spec.language, spec);
        }
        for (language, over) in &config.servers {
            if let Some(spec) = specs
                .values_mut()
                .find(|s| s.language == language.as_str())
            {
                if let Some(command) = &over.command {
                    spec.command = command.clone();
                    spec.alternatives.clear();
                }
                if let Some(args) = &over.args {
                    spec.args = args.clone();
                }
            }
        }
        Self {
            specs,
            excluded: config.workspaces.excluded_languages.clone(),
        }
    }

    /// Launch recipe for a language, or `None` if unknown or excluded.
    pub fn spec(&self, language: &str) -> Option<&ServerSpec> {
        if self.excluded.iter().any(|l| l == language) {
            return None;
        }
        self.specs.get(language)
    }

    /// Language for a file, by extension then shebang. `None` means
    /// "skip this file", never an error.
    pub fn detect_language(&self, path: &Path) -> Option<&'static str> {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            return language_for_extension(ext);
        }
        sniff_shebang(path)
    }

    /// Languages whose root markers are present directly under `root`.
    pub fn languages_in_root(&self, root: &Path) -> Vec<&'static str> {
        let mut found: Vec<&'static str> = self
            .specs
            .values()
            .filter(|spec| {
                spec.root_markers
                    .iter()
                    .any(|marker| root.join(marker).exists())
            })
            .map(|spec| spec.language)
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "rs" => Some("rust"),
        "go" => Some("go"),
        "py" | "pyi" => Some("python"),
        "ts" | "tsx" | "mts" | "cts" => Some("typescript"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "c" | "h" => Some("c"),
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => Some("cpp"),
        _ => None,
    }
}

/// Reads the first line of an extensionless file looking for a shebang.
fn sniff_shebang(path: &Path) -> Option<&'static str> {
    let mut head = [0u8; 128];
    let n = {
        use std::io::Read;
        let mut file = std::fs::File::open(path).ok()?;
        file.read(&mut head).ok()?
    };
    let head = std::str::from_utf8(&head[..n]).ok()?;
    let first = head.lines().next()?;
    if !first.starts_with("#!") {
        return None;
    }
    if first.contains("python") {
        Some("python")
    } else if first.contains("node") {
        Some("javascript")
    } else {
        None
    }
}

fn default_specs() -> Vec<ServerSpec> {
    vec![
        ServerSpec {
            language: "rust",
            command: "rust-analyzer".to_string(),
            args: vec![],
            alternatives: vec![],
            root_markers: vec!["Cargo.toml", "Cargo.lock"],
            quirks: Quirks {
                index_grace_ms: 2000,
            },
        },
        ServerSpec {
            language: "go",
            command: "gopls".to_string(),
            args: vec![],
            alternatives: vec![],
            root_markers: vec!["go.mod", "go.work"],
            quirks: Quirks {
                index_grace_ms: 500,
            },
        },
        ServerSpec {
            language: "python",
            command: "pyright-langserver".to_string(),
            args: vec!["--stdio".to_string()],
            alternatives: vec![("pylsp".to_string(), vec![])],
            root_markers: vec!["pyproject.toml", "setup.py", "requirements.txt"],
            quirks: Quirks {
                index_grace_ms: 500,
            },
        },
        ServerSpec {
            language: "typescript",
            command: "typescript-language-server".to_string(),
            args: vec!["--stdio".to_string()],
            alternatives: vec![],
            root_markers: vec!["package.json", "tsconfig.json"],
            quirks: Quirks {
                index_grace_ms: 500,
            },
        },
        // JavaScript rides the TypeScript server.
        ServerSpec {
            language: "javascript",
            command: "typescript-language-server".to_string(),
            args: vec!["--stdio".to_string()],
            alternatives: vec![],
            root_markers: vec!["package.json", "jsconfig.json"],
            quirks: Quirks {
                index_grace_ms: 500,
            },
        },
        ServerSpec {
            language: "c",
            command: "clangd".to_string(),
            args: vec![],
            alternatives: vec![],
            root_markers: vec!["compile_commands.json", "Makefile"],
            quirks: Quirks::default(),
        },
        ServerSpec {
            language: "cpp",
            command: "clangd".to_string(),
            args: vec![],
            alternatives: vec![],
            root_markers: vec!["compile_commands.json", "CMakeLists.txt"],
            quirks: Quirks::default(),
        },
    ]
}
