use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use airgap_fs::ops::{Context, ListDirRequest, ReadFileRequest, SearchTextRequest};

const MAX_STDIN_BYTES: u64 = 16 * 1024 * 1024;
const EXIT_ERROR: u8 = 1;
const EXIT_DENIED: u8 = 2;

#[derive(Debug)]
enum CliError {
    Tool(airgap_fs::Error),
    Json(serde_json::Error),
    Input(std::io::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Tool(err) => write!(f, "{err}"),
            CliError::Json(err) => write!(f, "json error: {err}"),
            CliError::Input(err) => write!(f, "failed to read stdin: {err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<airgap_fs::Error> for CliError {
    fn from(err: airgap_fs::Error) -> Self {
        Self::Tool(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            CliError::Tool(err) => err.code(),
            CliError::Json(_) => "json",
            CliError::Input(_) => "input",
        }
    }

    fn exit_code(&self) -> u8 {
        match self {
            CliError::Tool(airgap_fs::Error::Denied { .. }) => EXIT_DENIED,
            _ => EXIT_ERROR,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let CliError::Tool(tool) = self
            && let Some(reason) = tool.denial_reason()
        {
            error["denial_reason"] = serde_json::json!(reason);
        }
        serde_json::json!({ "error": error })
    }
}

#[derive(Debug, Parser)]
#[command(name = "airgap-fs")]
#[command(
    about = "Deny-by-default filesystem gate: list, read and search under explicit allowed roots."
)]
struct Cli {
    /// TOML or JSON config file. Required by every command except `redact-preview`.
    #[arg(long, env = "AIRGAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    ListDir {
        path: PathBuf,
        #[arg(long)]
        max_results: Option<usize>,
    },
    ReadFile {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u64>,
    },
    SearchText {
        pattern: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        max_results: Option<usize>,
        #[arg(long, default_value_t = false)]
        literal: bool,
    },
    /// Redact secrets from text given as an argument, or from stdin when omitted.
    RedactPreview { content: Option<String> },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("AIRGAP_LOG")
        .unwrap_or_else(|_| EnvFilter::new("airgap_fs=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => report(&CliError::Json(err)),
        },
        Err(err) => report(&err),
    }
}

fn report(err: &CliError) -> ExitCode {
    let value = err.to_json();
    println!(
        "{}",
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    );
    ExitCode::from(err.exit_code())
}

fn read_stdin_limited() -> Result<String, CliError> {
    let mut raw = String::new();
    std::io::stdin()
        .take(MAX_STDIN_BYTES)
        .read_to_string(&mut raw)
        .map_err(CliError::Input)?;
    Ok(raw)
}

fn load_context(config: Option<&Path>) -> Result<Context, CliError> {
    let config = config.ok_or_else(|| {
        airgap_fs::Error::InvalidConfig("--config (or AIRGAP_CONFIG) is required".to_string())
    })?;
    Ok(Context::from_config_path(config)?)
}

fn run(cli: Cli) -> Result<serde_json::Value, CliError> {
    let Cli { config, command } = cli;
    let value = match command {
        Command::RedactPreview { content } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin_limited()?,
            };
            serde_json::to_value(airgap_fs::redact_preview(&content))?
        }
        Command::ListDir { path, max_results } => {
            let ctx = load_context(config.as_deref())?;
            serde_json::to_value(ctx.list_dir(ListDirRequest { path, max_results })?)?
        }
        Command::ReadFile {
            path,
            offset,
            limit,
        } => {
            let ctx = load_context(config.as_deref())?;
            serde_json::to_value(ctx.read_file(ReadFileRequest {
                path,
                offset,
                limit,
            })?)?
        }
        Command::SearchText {
            pattern,
            paths,
            max_results,
            literal,
        } => {
            let ctx = load_context(config.as_deref())?;
            serde_json::to_value(ctx.search_text(SearchTextRequest {
                paths,
                pattern,
                max_results,
                literal,
            })?)?
        }
    };
    Ok(value)
}
