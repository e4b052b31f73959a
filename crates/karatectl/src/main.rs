//! karatectl - run Karate feature files from the terminal.
//!
//! Subcommands are translated into the closed message set of
//! `karate_core::Command` wherever one exists, so `karatectl exec '<json>'`
//! and the typed subcommands share one dispatcher.

mod render;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Args, Parser, Subcommand};
use karate_core::config::{self, ConfigError, STATE_DIR};
use karate_core::features::{find_features, group_by_folder, scenario_at_line, FeatureFile};
use karate_core::history::HistoryError;
use karate_core::logback;
use karate_core::output::format_json;
use karate_core::summary::{latest_report_dir, report_html};
use karate_core::tools::{curl, diff, jwt, ToolError};
use karate_core::{Command as Message, Config, HistoryStore, OutputMode, RunRequest, StderrPolicy};
use karate_runner::{LaunchError, Launcher};
use render::ConsoleSink;
use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Run Karate API tests and inspect their results.
#[derive(Parser)]
#[command(name = "karatectl")]
#[command(about = "Run Karate feature files and inspect their results")]
#[command(version)]
struct Cli {
    /// Workspace root (default: nearest directory with .karate-runner, else the git root)
    #[arg(long, global = true, env = "KARATE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Config file path (overrides .karate-runner/config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario of a feature file
    Run {
        /// Feature file
        feature: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run the scenario declared at or above a line
    Scenario {
        /// Feature file
        feature: PathBuf,

        /// 1-based line number
        line: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List feature files and their scenarios
    Features,

    /// Show or edit the run history
    History {
        #[command(subcommand)]
        action: Option<HistoryCommand>,
    },

    /// Open an HTML report (latest when no path is given)
    Report {
        /// Report file or report directory
        path: Option<PathBuf>,

        /// Print the report path instead of opening it
        #[arg(long)]
        print: bool,
    },

    /// Show or change the workspace configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },

    /// Handle one JSON command message, e.g. '{"command":"refreshFeatures"}'
    Exec {
        /// JSON message
        message: String,
    },

    /// Developer utilities
    Tools {
        #[command(subcommand)]
        tool: ToolCommand,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Output mode: extension or logback
    #[arg(long, value_parser = parse_output_mode)]
    output_mode: Option<OutputMode>,

    /// Stderr policy: strict or ignore_warnings
    #[arg(long, value_parser = parse_stderr_policy)]
    stderr_policy: Option<StderrPolicy>,
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List recorded runs grouped by age
    List,

    /// Remove one run
    Rm {
        /// Run ID
        id: String,
    },

    /// Remove all runs
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Set a key in .karate-runner/config
    Set { key: String, value: String },

    /// Switch between extension and logback output
    OutputMode {
        /// extension or logback
        #[arg(value_parser = parse_output_mode)]
        mode: OutputMode,

        /// Logback file (workspace-relative); discovered when omitted
        logback_file: Option<PathBuf>,

        /// Create logback-test.xml when no logback file exists
        #[arg(long)]
        create_default: bool,
    },

    /// List logback configuration files in the workspace
    LogbackFiles,
}

#[derive(Subcommand)]
enum ToolCommand {
    /// Convert a Karate request log into a curl command
    Curl {
        /// Log file (stdin when omitted or "-")
        file: Option<PathBuf>,
    },

    /// Structural diff of two JSON documents
    Diff { first: PathBuf, second: PathBuf },

    /// Pretty-print a JSON document; other text is echoed trimmed
    Format {
        /// Input file (stdin when omitted or "-")
        file: Option<PathBuf>,
    },

    /// Decode, sign or verify JSON Web Tokens
    Jwt {
        #[command(subcommand)]
        action: JwtCommand,
    },
}

#[derive(Subcommand)]
enum JwtCommand {
    /// Decode a token without verifying it
    Decode {
        /// Token, optionally prefixed with "Bearer " (stdin when omitted)
        token: Option<String>,
    },

    /// Sign a JSON payload with HS256
    Encode {
        /// Payload claims as JSON
        payload: String,

        /// Header as JSON
        #[arg(long, default_value = DEFAULT_JWT_HEADER)]
        header: String,

        /// Shared secret
        #[arg(long, env = "KARATE_JWT_SECRET", hide_env_values = true)]
        secret: String,
    },

    /// Check an HS256 signature and the expiry claim
    Verify {
        /// Token, optionally prefixed with "Bearer " (stdin when omitted)
        token: Option<String>,

        /// Shared secret
        #[arg(long, env = "KARATE_JWT_SECRET", hide_env_values = true)]
        secret: String,
    },
}

const DEFAULT_JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("invalid message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Usage(String),

    /// The run completed with a failed verdict; already reported.
    #[error("test run failed")]
    RunFailed,
}

fn parse_output_mode(s: &str) -> Result<OutputMode, String> {
    OutputMode::parse(s)
        .ok_or_else(|| format!("invalid output mode '{s}', expected: extension, logback"))
}

fn parse_stderr_policy(s: &str) -> Result<StderrPolicy, String> {
    StderrPolicy::parse(s)
        .ok_or_else(|| format!("invalid stderr policy '{s}', expected: strict, ignore_warnings"))
}

/// Workspace and effective configuration shared by all commands.
struct Context {
    workspace: PathBuf,
    config: Config,
    color: bool,
}

impl Context {
    fn new(workspace: PathBuf, mut config: Config, color: bool) -> Self {
        config.resolve_paths(&workspace);
        Self {
            workspace,
            config,
            color,
        }
    }

    fn apply_output_args(&mut self, output: OutputArgs) {
        if let Some(mode) = output.output_mode {
            self.config.output_mode = mode;
        }
        if let Some(policy) = output.stderr_policy {
            self.config.stderr_policy = policy;
        }
    }

    fn config_file(&self) -> PathBuf {
        Config::workspace_file(&self.workspace)
    }

    fn history(&self) -> HistoryStore {
        HistoryStore::for_workspace(&self.workspace).with_limit(self.config.history_limit)
    }

    /// Locate a feature file given relative to the cwd or the workspace and
    /// return it workspace-relative when it lives inside the workspace.
    fn feature_path(&self, path: &Path) -> Result<PathBuf, CliError> {
        let candidates = if path.is_absolute() {
            vec![path.to_path_buf()]
        } else {
            vec![std::env::current_dir()?.join(path), self.workspace.join(path)]
        };
        let found = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| CliError::Usage(format!("feature file not found: {}", path.display())))?
            .canonicalize()?;
        let workspace = self.workspace.canonicalize()?;
        Ok(found
            .strip_prefix(&workspace)
            .map(Path::to_path_buf)
            .unwrap_or(found))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(cli).await {
        Ok(()) => {}
        Err(CliError::RunFailed) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Log to stderr so run output on stdout stays clean.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run_cli(cli: Cli) -> Result<(), CliError> {
    let workspace = resolve_workspace(cli.workspace)?;
    let config = Config::load(&workspace, cli.config.as_deref())?;
    let color = !cli.no_color && config.color && io::stdout().is_terminal();
    let mut ctx = Context::new(workspace, config, color);
    debug!(workspace = %ctx.workspace.display(), "resolved workspace");

    match cli.command {
        Command::Run { feature, output } => {
            ctx.apply_output_args(output);
            dispatch(&ctx, Message::RunFeature { path: feature }).await
        }
        Command::Scenario {
            feature,
            line,
            output,
        } => {
            ctx.apply_output_args(output);
            dispatch(
                &ctx,
                Message::RunScenario {
                    path: feature,
                    line,
                },
            )
            .await
        }
        Command::Features => dispatch(&ctx, Message::RefreshFeatures).await,
        Command::History { action } => match action.unwrap_or(HistoryCommand::List) {
            HistoryCommand::List => history_list(&ctx),
            HistoryCommand::Rm { id } => dispatch(&ctx, Message::DeleteRun { id }).await,
            HistoryCommand::Clear => dispatch(&ctx, Message::ClearHistory).await,
        },
        Command::Report { path, print: true } => {
            println!("{}", report_path(&ctx, path)?.display());
            Ok(())
        }
        Command::Report { path, print: false } => {
            dispatch(&ctx, Message::OpenReport { path }).await
        }
        Command::Config { action } => match action.unwrap_or(ConfigCommand::Show) {
            ConfigCommand::Show => {
                render::print_config(&ctx.config.entries(), Some(&ctx.config_file()));
                Ok(())
            }
            ConfigCommand::Set { key, value } => config_set(&ctx, &key, &value),
            ConfigCommand::OutputMode {
                mode,
                logback_file,
                create_default,
            } => {
                let logback_file = match (mode, logback_file) {
                    (OutputMode::Logback, None) if create_default => {
                        pick_or_create_logback(&ctx.workspace)?
                    }
                    (_, file) => file,
                };
                dispatch(
                    &ctx,
                    Message::ConfigureOutputMode {
                        mode,
                        logback_file,
                    },
                )
                .await
            }
            ConfigCommand::LogbackFiles => {
                for file in logback::find_logback_files(&ctx.workspace)? {
                    println!("{}", file.display());
                }
                Ok(())
            }
        },
        Command::Exec { message } => {
            let message = Message::from_json(&message)?;
            dispatch(&ctx, message).await
        }
        Command::Tools { tool } => run_tool(tool),
    }
}

/// Execute one command message.
async fn dispatch(ctx: &Context, message: Message) -> Result<(), CliError> {
    debug!(command = message.name(), "dispatching");
    match message {
        Message::RunFeature { path } => {
            let target = ctx.feature_path(&path)?;
            run_request(ctx, RunRequest::feature(target)).await
        }
        Message::RunScenario { path, line } => {
            let target = ctx.feature_path(&path)?;
            let text = std::fs::read_to_string(ctx.workspace.join(&target))?;
            let scenario = scenario_at_line(&text, line).ok_or_else(|| {
                CliError::Usage(format!(
                    "no scenario at or above line {line} in {}",
                    target.display()
                ))
            })?;
            run_request(ctx, RunRequest::scenario(target, scenario.name)).await
        }
        Message::RefreshFeatures => list_features(ctx),
        Message::ClearHistory => {
            ctx.history().clear()?;
            println!("History cleared");
            Ok(())
        }
        Message::DeleteRun { id } => {
            if ctx.history().remove(&id)? {
                println!("Run {id} removed");
                Ok(())
            } else {
                Err(CliError::Usage(format!("run not found: {id}")))
            }
        }
        Message::OpenReport { path } => {
            let report = report_path(ctx, path)?;
            open_in_browser(&report)?;
            println!("Opened {}", report.display());
            Ok(())
        }
        Message::ConfigureOutputMode { mode, logback_file } => {
            configure_output_mode(ctx, mode, logback_file)
        }
    }
}

async fn run_request(ctx: &Context, request: RunRequest) -> Result<(), CliError> {
    let launcher = Launcher::new(&ctx.workspace, ctx.config.clone()).with_history(ctx.history());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted; stopping run");
            interrupt.cancel();
        }
    });

    let mut sink = ConsoleSink::stdout(ctx.color);
    let outcome = launcher.run_until(request, &mut sink, cancel).await?;

    println!();
    render::print_run_footer(&outcome.record);
    if outcome.verdict.is_failed() {
        return Err(CliError::RunFailed);
    }
    Ok(())
}

fn list_features(ctx: &Context) -> Result<(), CliError> {
    let features = find_features(&ctx.workspace)?;
    let mut groups = BTreeMap::new();
    for (folder, paths) in group_by_folder(&ctx.workspace, &features) {
        let files: Vec<FeatureFile> = paths
            .iter()
            .filter_map(|path| match FeatureFile::load(path) {
                Ok(file) => Some(file),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read feature file");
                    None
                }
            })
            .collect();
        groups.insert(folder, files);
    }
    render::print_feature_tree(&ctx.workspace, &groups);
    Ok(())
}

fn history_list(ctx: &Context) -> Result<(), CliError> {
    let records = ctx.history().list()?;
    render::print_history(&records);
    Ok(())
}

/// Report page for `path`, or the latest report in the build directory.
fn report_path(ctx: &Context, path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    let report = match path {
        Some(path) if path.is_dir() => report_html(&path),
        Some(path) => path,
        None => latest_report_dir(&ctx.config.report_dir)
            .map(|dir| report_html(&dir))
            .ok_or_else(|| {
                CliError::Usage(format!(
                    "no Karate reports under {}",
                    ctx.config.report_dir.display()
                ))
            })?,
    };
    if !report.is_file() {
        return Err(CliError::Usage(format!(
            "report not found: {}",
            report.display()
        )));
    }
    Ok(report)
}

fn open_in_browser(path: &Path) -> io::Result<()> {
    let mut cmd = if cfg!(target_os = "macos") {
        ProcessCommand::new("open")
    } else if cfg!(windows) {
        let mut cmd = ProcessCommand::new("cmd");
        cmd.args(["/C", "start", ""]);
        cmd
    } else {
        ProcessCommand::new("xdg-open")
    };
    let status = cmd
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        return Err(io::Error::other(format!(
            "could not open {} ({status})",
            path.display()
        )));
    }
    Ok(())
}

fn config_set(ctx: &Context, key: &str, value: &str) -> Result<(), CliError> {
    config::write_key(&ctx.config_file(), key, value)?;
    println!("{key} = {value}");
    Ok(())
}

fn configure_output_mode(
    ctx: &Context,
    mode: OutputMode,
    logback_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let file = ctx.config_file();
    match mode {
        OutputMode::Extension => {
            config::write_key(&file, "output_mode", mode.as_str())?;
            config::write_key(&file, "logback_file", "")?;
            println!("Output mode: extension");
        }
        OutputMode::Logback => {
            let logback_file = match logback_file {
                Some(path) => path,
                None => pick_logback_file(&ctx.workspace)?,
            };
            if !ctx.workspace.join(&logback_file).is_file() {
                return Err(CliError::Usage(format!(
                    "logback file not found: {}",
                    logback_file.display()
                )));
            }
            config::write_key(&file, "output_mode", mode.as_str())?;
            config::write_key(&file, "logback_file", &logback_file.display().to_string())?;
            println!("Output mode: logback ({})", logback_file.display());
        }
    }
    Ok(())
}

/// The only logback file in the workspace.
fn pick_logback_file(workspace: &Path) -> Result<PathBuf, CliError> {
    let mut files = logback::find_logback_files(workspace)?;
    match files.len() {
        0 => Err(CliError::Usage(
            "no logback configuration files found; pass a file or use --create-default"
                .to_string(),
        )),
        1 => Ok(files.remove(0)),
        _ => Err(CliError::Usage(format!(
            "several logback files found, pick one of: {}",
            files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn pick_or_create_logback(workspace: &Path) -> Result<Option<PathBuf>, CliError> {
    if logback::find_logback_files(workspace)?.is_empty() {
        let created = logback::create_default(workspace)?;
        println!("Created {}", created.display());
        return Ok(Some(created));
    }
    Ok(None)
}

fn run_tool(tool: ToolCommand) -> Result<(), CliError> {
    match tool {
        ToolCommand::Curl { file } => {
            let log = read_input(file.as_deref())?;
            println!("{}", curl::from_karate_log(&log)?);
        }
        ToolCommand::Diff { first, second } => {
            let first = std::fs::read_to_string(first)?;
            let second = std::fs::read_to_string(second)?;
            render::print_differences(&diff::diff_json_str(&first, &second)?);
        }
        ToolCommand::Format { file } => {
            println!("{}", format_json(&read_input(file.as_deref())?));
        }
        ToolCommand::Jwt { action } => match action {
            JwtCommand::Decode { token } => {
                let decoded = jwt::decode(&token_or_stdin(token)?)?;
                println!("{}", serde_json::to_string_pretty(&decoded)?);
            }
            JwtCommand::Encode {
                payload,
                header,
                secret,
            } => println!("{}", encode_jwt(&header, &payload, &secret)?),
            JwtCommand::Verify { token, secret } => {
                let verification = jwt::verify(&token_or_stdin(token)?, &secret)?;
                println!("{}", serde_json::to_string_pretty(&verification)?);
            }
        },
    }
    Ok(())
}

fn encode_jwt(header: &str, payload: &str, secret: &str) -> Result<String, CliError> {
    let parse = |text: &str, what: &str| {
        serde_json::from_str::<serde_json::Value>(text)
            .map_err(|e| CliError::Usage(format!("{what} is not valid JSON: {e}")))
    };
    let header = parse(header, "header")?;
    let payload = parse(payload, "payload")?;
    Ok(jwt::encode(&header, &payload, secret)?)
}

fn token_or_stdin(token: Option<String>) -> io::Result<String> {
    match token {
        Some(token) => Ok(token),
        None => Ok(read_input(None)?.trim().to_string()),
    }
}

fn read_input(file: Option<&Path>) -> io::Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path),
        _ => {
            let mut input = String::new();
            io::stdin().read_to_string(&mut input)?;
            Ok(input)
        }
    }
}

fn resolve_workspace(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = explicit {
        if !path.is_dir() {
            return Err(LaunchError::NoWorkspace(path).into());
        }
        return Ok(path);
    }

    let cwd = std::env::current_dir()?;
    if let Some(dir) = cwd.ancestors().find(|dir| dir.join(STATE_DIR).is_dir()) {
        return Ok(dir.to_path_buf());
    }
    Ok(git_toplevel(&cwd).unwrap_or(cwd))
}

fn git_toplevel(dir: &Path) -> Option<PathBuf> {
    let output = ProcessCommand::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}
