use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use devlease_core::{DevleaseConfig, HandoffBackend, SystemRunner, WorkspaceLayout};
use devlease_git::{ConfigScope, GitCli, GitConfig, HOOKS_PATH_KEY};
use devlease_pipeline::{
    is_disabled, run_cleanup_with_fallback, run_emergency_cleanup, SetupPipeline, Workspace,
};
use devlease_store::{
    ActionsStateStore, DurableHandoff, FileKeyValueStore, HandoffState, SnapshotStore,
};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod render;

use render::{
    current_output_style, format_cleanup_lines, format_expire_lines, format_setup_lines,
    render_section_header, render_status_line, OutputStyle,
};

#[derive(Parser, Debug)]
#[command(name = "devlease", version)]
#[command(
    about = "Lend a repository to an automated agent with hooks and lint tooling disabled",
    long_about = None
)]
struct Cli {
    /// Working directory to operate on (defaults to the current directory).
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
    /// Config file (defaults to devlease.toml in the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
    #[arg(short, long, global = true)]
    quiet: bool,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Where the setup record is kept between invocations.
    #[arg(long, global = true, value_enum)]
    handoff: Option<HandoffArg>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum HandoffArg {
    File,
    Actions,
}

impl From<HandoffArg> for HandoffBackend {
    fn from(value: HandoffArg) -> Self {
        match value {
            HandoffArg::File => HandoffBackend::File,
            HandoffArg::Actions => HandoffBackend::Actions,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Snapshot the environment and disable hooks, lint tooling and signing.
    Setup,
    /// Undo a previous setup using its recorded snapshot.
    Cleanup {
        /// Also restore captured files such as package.json to their pre-setup content.
        #[arg(long)]
        full_restore: bool,
    },
    /// Best-effort restore without a snapshot.
    EmergencyCleanup,
    Status,
    /// Delete snapshots older than the maximum age.
    Expire {
        #[arg(long)]
        max_age: Option<String>,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, cli.quiet)));
    let subscriber = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init(),
        LogFormat::Text => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .init(),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "devlease", &mut io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Version => {
            println!("devlease {}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let workdir = resolve_workdir(cli.workdir.as_deref())?;
    let mut config = DevleaseConfig::load(cli.config.as_deref(), &workdir)?;
    if let Some(backend) = cli.handoff {
        config.handoff.backend = backend.into();
    }
    let layout = config.layout_for(&workdir);
    debug!(
        workdir = %workdir.display(),
        handoff = config.handoff.backend.as_str(),
        "configuration loaded"
    );

    let runner = SystemRunner;
    let git = GitCli::new(&workdir, &runner);
    let store = SnapshotStore::new(layout.snapshots_dir());
    let handoff = open_handoff(&config, &layout);
    let style = current_output_style();

    match cli.command {
        Commands::Setup => {
            let workspace = workspace(&layout, &config, &git, &runner, &store);
            let token = read_token(&config);
            let result = SetupPipeline::new(workspace, &handoff, token).run();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_lines(style, "setup", &format_setup_lines(&result, style));
            }
            Ok(exit_code(result.success))
        }
        Commands::Cleanup { full_restore } => {
            let workspace = workspace(&layout, &config, &git, &runner, &store);
            let full_restore = full_restore || config.cleanup.full_restore;
            let result = run_cleanup_with_fallback(&workspace, &handoff, full_restore);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_lines(style, "cleanup", &format_cleanup_lines(&result, style));
            }
            Ok(exit_code(result.success))
        }
        Commands::EmergencyCleanup => {
            let workspace = workspace(&layout, &config, &git, &runner, &store);
            let result = run_emergency_cleanup(&workspace);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_lines(
                    style,
                    "emergency cleanup",
                    &format_cleanup_lines(&result, style),
                );
            }
            Ok(exit_code(result.success))
        }
        Commands::Status => {
            let report = status_report(&layout, &git, &handoff);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_lines(style, "status", &format_status_lines(&report, style));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Expire { max_age } => {
            if let Some(max_age) = max_age {
                config.snapshot.max_age = max_age;
            }
            let report = store.expire(config.snapshot.max_age()?)?;
            if cli.json {
                let removed = report
                    .removed
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>();
                let value = serde_json::json!({
                    "removed": removed,
                    "kept": report.kept,
                    "errors": report.failures.clone().into_messages(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_lines(style, "expire", &format_expire_lines(&report, style));
            }
            Ok(exit_code(report.failures.is_clean()))
        }
        Commands::Completions { .. } | Commands::Version => Ok(ExitCode::SUCCESS),
    }
}

fn resolve_workdir(explicit: Option<&Path>) -> Result<PathBuf> {
    let workdir = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    // the handoff file name is derived from this path, so keep it stable across invocations
    Ok(workdir.canonicalize().unwrap_or(workdir))
}

fn workspace<'a>(
    layout: &'a WorkspaceLayout,
    config: &'a DevleaseConfig,
    git: &'a GitCli<'a>,
    runner: &'a SystemRunner,
    store: &'a SnapshotStore,
) -> Workspace<'a> {
    Workspace {
        layout,
        config,
        git,
        runner,
        store,
    }
}

fn open_handoff(config: &DevleaseConfig, layout: &WorkspaceLayout) -> DurableHandoff {
    match config.handoff.backend {
        HandoffBackend::File => DurableHandoff::new(FileKeyValueStore::new(layout.handoff_path())),
        HandoffBackend::Actions => DurableHandoff::new(ActionsStateStore::from_env()),
    }
}

fn read_token(config: &DevleaseConfig) -> Option<String> {
    let name = config.identity.token_env.as_deref()?;
    match std::env::var(name) {
        Ok(token) if !token.is_empty() => Some(token),
        _ => {
            debug!(variable = name, "token variable unset; remote left unauthenticated");
            None
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn print_lines(style: OutputStyle, title: &str, lines: &[String]) {
    if let Some(header) = render_section_header(style, title) {
        println!("{header}");
    }
    for line in lines {
        println!("{line}");
    }
}

fn status_report(
    layout: &WorkspaceLayout,
    git: &dyn GitConfig,
    handoff: &DurableHandoff,
) -> serde_json::Value {
    let handoff_value = match handoff.read() {
        Ok(HandoffState::Clean) => serde_json::json!({ "state": "clean" }),
        Ok(HandoffState::Pending(record)) => serde_json::json!({
            "state": "pending",
            "snapshot": record.snapshot.as_ref().map(|snapshot| snapshot.id().to_string()),
            "location": record.location.as_ref().map(|path| path.display().to_string()),
            "snapshot_error": record.snapshot_error,
        }),
        Err(err) => serde_json::json!({ "state": "unreadable", "error": format!("{err:#}") }),
    };

    let mut hooks_path = serde_json::Map::new();
    for scope in [ConfigScope::Local, ConfigScope::Global] {
        let value = match git.get(scope, HOOKS_PATH_KEY) {
            Ok(value) => serde_json::json!(value),
            Err(err) => serde_json::json!({ "error": format!("{err:#}") }),
        };
        hooks_path.insert(scope.as_str().to_string(), value);
    }

    let hooks_dir = layout.hooks_dir();
    serde_json::json!({
        "workdir": layout.root().display().to_string(),
        "handoff": handoff_value,
        "hooks_dir": hooks_dir.display().to_string(),
        "hooks_disabled": is_disabled(&hooks_dir),
        "hooks_backup_present": layout.hooks_backup_dir().is_dir(),
        "core_hooks_path": hooks_path,
    })
}

fn format_status_lines(report: &serde_json::Value, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    let handoff = &report["handoff"];
    let line = match handoff["state"].as_str() {
        Some("pending") => render_status_line(
            style,
            "warn",
            &format!(
                "cleanup pending (snapshot={} location={})",
                handoff["snapshot"].as_str().unwrap_or("unusable"),
                handoff["location"].as_str().unwrap_or("unknown")
            ),
        ),
        Some("clean") => render_status_line(style, "ok", "no setup pending"),
        _ => render_status_line(
            style,
            "error",
            &format!(
                "handoff unreadable: {}",
                handoff["error"].as_str().unwrap_or("unknown error")
            ),
        ),
    };
    lines.push(line);

    let hooks_dir = report["hooks_dir"].as_str().unwrap_or_default();
    if report["hooks_disabled"].as_bool().unwrap_or(false) {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("hooks disabled in {hooks_dir}"),
        ));
    } else {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("hooks active in {hooks_dir}"),
        ));
    }

    for scope in ["local", "global"] {
        let value = &report["core_hooks_path"][scope];
        let rendered = match value {
            serde_json::Value::Null => "unset".to_string(),
            serde_json::Value::String(path) => path.clone(),
            other => other["error"].as_str().unwrap_or("unreadable").to_string(),
        };
        lines.push(render_status_line(
            style,
            "info",
            &format!("core.hooksPath ({scope}): {rendered}"),
        ));
    }
    lines
}
