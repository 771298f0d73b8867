//! leta CLI entry point.
//!
//! Parses the command grammar, forwards one request to the daemon
//! (spawning it if needed), and renders the typed response. Exit codes:
//! 0 success, 1 handled error, 2 usage (clap's default), 3 daemon
//! unreachable.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use leta::daemon::protocol::{Format, Request, Response};
use leta::daemon::spawn;
use leta::ops::OpOutput;

#[derive(Parser, Debug)]
#[command(name = "leta", version, about = "Semantic code navigation from the command line")]
struct Cli {
    /// Emit JSON instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search symbol names with a regex.
    Grep {
        /// Regex matched against symbol names.
        pattern: String,
        /// Path filter (substring, or glob with `*`/`?`).
        path: Option<String>,
        /// Restrict to symbol kinds (repeatable).
        #[arg(short = 'k', long = "kind")]
        kinds: Vec<String>,
        /// Exclude path globs (repeatable).
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
        /// Attach hover docs to each match.
        #[arg(short = 'd', long)]
        docs: bool,
        /// Case-insensitive matching.
        #[arg(short = 'C', long)]
        ignore_case: bool,
        /// Keep only the first N matches.
        #[arg(long)]
        head: Option<usize>,
    },
    /// Print a symbol's body.
    Show {
        /// Symbol expression (`Name`, `Parent.Name`, `path:Name`, `path:line:Name`).
        symbol: String,
        /// Context lines around the body.
        #[arg(short = 'n', long, default_value_t = 0)]
        context: usize,
        /// Keep only the first N lines.
        #[arg(long)]
        head: Option<usize>,
    },
    /// Print hover (type signature and docs) for a symbol.
    Hover {
        /// Symbol expression.
        symbol: String,
    },
    /// List references to a symbol.
    Refs {
        /// Symbol expression.
        symbol: String,
        /// Context lines per location.
        #[arg(short = 'n', long, default_value_t = 0)]
        context: usize,
    },
    /// Walk the call hierarchy.
    Calls {
        /// Walk callees starting at this symbol.
        #[arg(long)]
        from: Option<String>,
        /// Walk callers of this symbol; with --from, search a path.
        #[arg(long)]
        to: Option<String>,
        /// Maximum traversal depth.
        #[arg(long, default_value_t = 3)]
        max_depth: u32,
        /// Include call sites outside registered workspaces.
        #[arg(long)]
        include_non_workspace: bool,
    },
    /// List implementations of a trait/interface symbol.
    Implementations {
        /// Symbol expression.
        symbol: String,
        /// Context lines per location.
        #[arg(short = 'n', long, default_value_t = 0)]
        context: usize,
    },
    /// List subtypes of a type symbol.
    Subtypes {
        /// Symbol expression.
        symbol: String,
    },
    /// List supertypes of a type symbol.
    Supertypes {
        /// Symbol expression.
        symbol: String,
    },
    /// Jump to a symbol's declaration.
    Declaration {
        /// Symbol expression.
        symbol: String,
    },
    /// Show diagnostics for a file or the whole workspace.
    Diagnostics {
        /// Restrict to one file.
        path: Option<PathBuf>,
        /// Severity floor: error, warning, information, hint.
        #[arg(short = 's', long)]
        severity: Option<String>,
    },
    /// Rename a symbol across the workspace.
    Rename {
        /// Symbol expression.
        symbol: String,
        /// New name.
        new_name: String,
    },
    /// Move a file, updating importers.
    Mv {
        /// Current path.
        old: PathBuf,
        /// Destination path.
        new: PathBuf,
    },
    /// Format a file with its language server.
    Format {
        /// Target file.
        path: PathBuf,
    },
    /// Organize imports in a file.
    OrganizeImports {
        /// Target file.
        path: PathBuf,
    },
    /// Replace a function body, optionally checking the signature.
    ReplaceFunction {
        /// Symbol expression; must be a function, method, or constructor.
        symbol: String,
        /// Replacement body text.
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        /// Read the replacement body from a file ('-' for stdin).
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Roll back unless the signature is unchanged.
        #[arg(long)]
        check_signature: bool,
    },
    /// List workspace files.
    Files {
        /// Substring filter on relative paths.
        path: Option<String>,
        /// Exclude globs (repeatable).
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
        /// Include globs (repeatable).
        #[arg(short = 'i', long = "include")]
        include: Vec<String>,
        /// File-name globs (repeatable).
        #[arg(short = 'f', long = "filename")]
        file_patterns: Vec<String>,
    },
    /// Manage workspace roots.
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// Manage the daemon process.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Subcommand, Debug)]
enum WorkspaceAction {
    /// Register a workspace root (defaults to the current directory).
    Add {
        /// Root directory.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Unregister a workspace root and stop its servers.
    Remove {
        /// Root directory.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Restart language servers.
    Restart {
        /// Restrict to one workspace root.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Restrict to one language.
        #[arg(long)]
        language: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Start the daemon if it is not running.
    Start,
    /// Stop a running daemon.
    Stop,
    /// Stop and start again.
    Restart,
    /// Show daemon status.
    Info,
}

/// Resolves a path against the CLI's cwd before it crosses the IPC
/// boundary; the daemon's cwd is unrelated to the user's.
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

fn default_root(root: Option<PathBuf>) -> PathBuf {
    absolutize(root.unwrap_or_else(|| PathBuf::from(".")))
}

fn read_body(body: Option<String>, body_file: Option<PathBuf>) -> anyhow::Result<String> {
    match (body, body_file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) if path == PathBuf::from("-") => {
            use std::io::Read;
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => anyhow::bail!("replace-function needs --body or --body-file"),
    }
}

/// Maps the parsed command to an IPC request. Daemon lifecycle commands
/// are handled locally and return `None`.
fn to_request(command: Command, format: Format) -> anyhow::Result<Option<Request>> {
    use leta::ops::{calls, diagnostics as diag, edit, files, grep, navigate, show};

    let request = match command {
        Command::Grep {
            pattern,
            path,
            kinds,
            exclude,
            docs,
            ignore_case,
            head,
        } => Request::new(
            "grep",
            grep::GrepParams {
                pattern,
                path,
                kinds,
                exclude,
                case_insensitive: ignore_case,
                docs,
                head,
            },
            format,
        ),
        Command::Show {
            symbol,
            context,
            head,
        } => Request::new(
            "show",
            show::ShowParams {
                symbol,
                context,
                head,
            },
            format,
        ),
        Command::Hover { symbol } => {
            Request::new("hover", show::HoverOpParams { symbol }, format)
        }
        Command::Refs { symbol, context } => Request::new(
            "refs",
            navigate::NavigateParams { symbol, context },
            format,
        ),
        Command::Calls {
            from,
            to,
            max_depth,
            include_non_workspace,
        } => Request::new(
            "calls",
            calls::CallsParams {
                from,
                to,
                max_depth,
                include_non_workspace,
            },
            format,
        ),
        Command::Implementations { symbol, context } => Request::new(
            "implementations",
            navigate::NavigateParams { symbol, context },
            format,
        ),
        Command::Subtypes { symbol } => Request::new(
            "subtypes",
            navigate::NavigateParams { symbol, context: 0 },
            format,
        ),
        Command::Supertypes { symbol } => Request::new(
            "supertypes",
            navigate::NavigateParams { symbol, context: 0 },
            format,
        ),
        Command::Declaration { symbol } => Request::new(
            "declaration",
            navigate::NavigateParams { symbol, context: 0 },
            format,
        ),
        Command::Diagnostics { path, severity } => Request::new(
            "diagnostics",
            diag::DiagnosticsParams {
                path: path.map(absolutize),
                severity,
            },
            format,
        ),
        Command::Rename { symbol, new_name } => Request::new(
            "rename",
            edit::RenameOpParams { symbol, new_name },
            format,
        ),
        Command::Mv { old, new } => Request::new(
            "mv",
            edit::MvParams {
                old: absolutize(old),
                new: absolutize(new),
            },
            format,
        ),
        Command::Format { path } => Request::new(
            "format",
            edit::FileOpParams {
                path: absolutize(path),
            },
            format,
        ),
        Command::OrganizeImports { path } => Request::new(
            "organize-imports",
            edit::FileOpParams {
                path: absolutize(path),
            },
            format,
        ),
        Command::ReplaceFunction {
            symbol,
            body,
            body_file,
            check_signature,
        } => Request::new(
            "replace-function",
            edit::ReplaceFunctionParams {
                symbol,
                body: read_body(body, body_file)?,
                check_signature,
            },
            format,
        ),
        Command::Files {
            path,
            exclude,
            include,
            file_patterns,
        } => Request::new(
            "files",
            files::FilesParams {
                path,
                exclude,
                include,
                file_patterns,
            },
            format,
        ),
        Command::Workspace { action } => match action {
            WorkspaceAction::Add { root } => Request::new(
                "workspace-add",
                leta::daemon::WorkspaceParams {
                    root: Some(default_root(root)),
                    language: None,
                },
                format,
            ),
            WorkspaceAction::Remove { root } => Request::new(
                "workspace-remove",
                leta::daemon::WorkspaceParams {
                    root: Some(default_root(root)),
                    language: None,
                },
                format,
            ),
            WorkspaceAction::Restart { root, language } => Request::new(
                "workspace-restart",
                leta::daemon::WorkspaceParams {
                    root: root.map(absolutize),
                    language,
                },
                format,
            ),
        },
        Command::Config => Request::new("config", Value::Null, format),
        Command::Daemon { .. } => return Ok(None),
    };
    Ok(Some(request))
}

/// Renders `files` output as an indented tree.
fn render_tree(files: &[String]) -> String {
    let mut out = String::new();
    let mut previous: Vec<&str> = Vec::new();
    for file in files {
        let parts: Vec<&str> = file.split('/').collect();
        let mut common = 0;
        while common < previous.len().min(parts.len() - 1) && previous[common] == parts[common] {
            common += 1;
        }
        for (depth, dir) in parts[..parts.len() - 1].iter().enumerate().skip(common) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(dir);
            out.push_str("/\n");
        }
        out.push_str(&"  ".repeat(parts.len() - 1));
        out.push_str(parts[parts.len() - 1]);
        out.push('\n');
        previous = parts[..parts.len() - 1].to_vec();
    }
    out
}

fn print_output(output: &OpOutput, json: bool) {
    for warning in output.warnings() {
        eprintln!("warning: {warning}");
    }
    if json {
        match serde_json::to_string_pretty(output) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Error: IOError: {e}"),
        }
        return;
    }
    let rendered = match output {
        OpOutput::FileList { files } => render_tree(files),
        other => other.render_plain(),
    };
    print!("{rendered}");
}

async fn run_daemon_action(action: DaemonAction, json: bool) -> i32 {
    match action {
        DaemonAction::Start => match spawn::connect_or_spawn().await {
            Ok(_) => {
                if let Some(info) = spawn::running_daemon() {
                    println!("daemon running (pid {}, {})", info.pid, info.endpoint);
                }
                0
            }
            Err(e) => {
                eprintln!("Error: daemon unreachable: {e}");
                3
            }
        },
        DaemonAction::Stop => match spawn::stop_daemon().await {
            Ok(true) => {
                println!("daemon stopped");
                0
            }
            Ok(false) => {
                println!("daemon not running");
                0
            }
            Err(e) => {
                eprintln!("Error: daemon unreachable: {e}");
                3
            }
        },
        DaemonAction::Restart => {
            if let Err(e) = spawn::stop_daemon().await {
                eprintln!("Error: daemon unreachable: {e}");
                return 3;
            }
            // Give the old process a moment to release the endpoint.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            match spawn::connect_or_spawn().await {
                Ok(_) => {
                    println!("daemon restarted");
                    0
                }
                Err(e) => {
                    eprintln!("Error: daemon unreachable: {e}");
                    3
                }
            }
        }
        DaemonAction::Info => send_and_render(Request::new("info", Value::Null, Format::Plain), json).await,
    }
}

async fn send_and_render(request: Request, json: bool) -> i32 {
    match spawn::round_trip(&request).await {
        Ok(Response::Ok { ok }) => {
            print_output(&ok, json);
            0
        }
        Ok(Response::Error { error }) => {
            eprintln!("Error: {}: {}", error.kind, error.detail);
            if error.kind == "UsageError" { 2 } else { 1 }
        }
        Err(e) => {
            eprintln!("Error: daemon unreachable: {e}");
            3
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // CLI logging goes to stderr and stays quiet unless RUST_LOG says
    // otherwise; the daemon has its own log file.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let json = cli.json;
    let format = if json { Format::Json } else { Format::Plain };

    let code = match cli.command {
        Command::Daemon { action } => run_daemon_action(action, json).await,
        command => match to_request(command, format) {
            Ok(Some(request)) => send_and_render(request, json).await,
            Ok(None) => unreachable!("daemon actions handled above"),
            Err(e) => {
                eprintln!("Error: UsageError: {e}");
                2
            }
        },
    };
    std::process::exit(code);
}
