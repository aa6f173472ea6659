use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use teestream_capture::{MergeMode, TeeConfig, TextEncoding};

#[derive(Parser, Debug)]
#[command(name = "teestream")]
#[command(about = "Run a command and tee its stdout and stderr into log files", long_about = None)]
#[command(version)]
struct Cli {
    /// Log file receiving the command's output (repeatable)
    #[arg(short, long = "log", value_name = "PATH")]
    logs: Vec<PathBuf>,

    /// Append to log files instead of truncating them
    #[arg(short, long)]
    append: bool,

    /// Do not mirror output to the terminal
    #[arg(short, long)]
    quiet: bool,

    /// Read stdout and stderr independently instead of merging them
    #[arg(long)]
    no_merge: bool,

    /// Decode output with this charset (utf-8, latin-1)
    #[arg(short, long, value_name = "LABEL")]
    encoding: Option<String>,

    /// Forward raw bytes without decoding
    #[arg(long, conflicts_with = "encoding")]
    binary: bool,

    /// Merge poll interval in milliseconds
    #[arg(long, value_name = "N")]
    poll_ms: Option<u64>,

    /// JSON file holding the session configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print capture statistics as JSON on stderr when the command exits
    #[arg(long)]
    stats: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command to run, followed by its arguments
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<TeeConfig> {
    let Some(path) = path else {
        return Ok(TeeConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

/// Session configuration from the config file with command-line overrides.
///
/// The command's output reaches the session through its handles, so the
/// process's own channels are never redirected.
fn session_config(cli: &Cli) -> Result<TeeConfig> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(label) = &cli.encoding {
        let Some(encoding) = TextEncoding::from_label(label) else {
            bail!("unsupported encoding '{label}'");
        };
        config.encoding = Some(encoding);
        config.binary = false;
    }
    if cli.binary {
        config.binary = true;
    }
    if cli.no_merge {
        config.merge = MergeMode::Disabled;
    }
    if let Some(poll_ms) = cli.poll_ms {
        config.poll_interval_ms = poll_ms;
    }
    config.redirect_process = false;
    Ok(config)
}

#[cfg(unix)]
mod run {
    use std::io::{self, Write};
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, ExitStatus, Stdio};

    use anyhow::{Context, Result};
    use teestream_capture::{
        peek_supported, shared_destination, Channel, Destination, FileDestination, MergeMode,
        OriginalStream, TeeStream,
    };
    use tracing::{info, warn};

    use super::{session_config, Cli};

    pub fn run(cli: &Cli) -> Result<i32> {
        let config = session_config(cli)?;
        let merged = config.merge == MergeMode::Auto && peek_supported();

        let mut builder = TeeStream::builder().config(config);
        let mut logs = Vec::with_capacity(cli.logs.len());
        for path in &cli.logs {
            let file = if cli.append {
                FileDestination::append(path)
            } else {
                FileDestination::create(path)
            }
            .with_context(|| format!("opening log file {}", path.display()))?;
            let file = shared_destination(file);
            logs.push(file.clone());
            builder = builder.destination(file);
        }
        if !cli.quiet {
            let stdout = shared_destination(OriginalStream::stdout()?);
            if merged {
                builder = builder.destination(stdout);
            } else {
                let stderr = shared_destination(OriginalStream::stderr()?);
                builder = builder
                    .channel_destination(Channel::Out, stdout)
                    .channel_destination(Channel::Err, stderr);
            }
        }

        let mut tee = builder.start()?;
        info!(command = %cli.command.join(" "), merged = tee.is_merged(), "Running command");

        let status = spawn(&tee, &cli.command);
        let report = tee.release()?;
        for log in &logs {
            if let Err(e) = log.lock().close() {
                warn!("Failed to close log file: {}", e);
            }
        }
        let status = status?;

        if !report.is_clean() {
            warn!(count = report.diagnostics.len(), "Capture reported diagnostics");
        }
        if cli.stats {
            let json = serde_json::to_string_pretty(&report.statistics)?;
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "{json}")?;
        }
        Ok(exit_code(status))
    }

    fn spawn(tee: &TeeStream, command: &[String]) -> Result<ExitStatus> {
        let (program, args) = command.split_first().context("no command given")?;
        let out = tee.out()?;
        let err = tee.err()?;
        Command::new(program)
            .args(args)
            .stdout(Stdio::from(out.try_clone_fd()?))
            .stderr(Stdio::from(err.try_clone_fd()?))
            .status()
            .with_context(|| format!("running {program}"))
    }

    /// The child's exit code, or 128 plus the signal that killed it.
    pub(super) fn exit_code(status: ExitStatus) -> i32 {
        status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(1)
    }
}

#[cfg(unix)]
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run::run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let _ = writeln!(io::stderr(), "teestream: {e:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(not(unix))]
fn main() {
    let _ = Cli::parse();
    let _ = writeln!(io::stderr(), "teestream: output capture requires a Unix platform");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use teestream_capture::NewlineMode;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_command_follows_separator() {
        let cli = parse(&["teestream", "--log", "a.log", "-l", "b.log", "--", "make", "-j4"]);
        assert_eq!(cli.logs, vec![PathBuf::from("a.log"), PathBuf::from("b.log")]);
        assert_eq!(cli.command, vec!["make", "-j4"]);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["teestream", "--quiet"]).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "teestream", "--no-merge", "--encoding", "latin-1", "--poll-ms", "25", "--", "true",
        ]);
        let config = session_config(&cli).unwrap();
        assert_eq!(config.merge, MergeMode::Disabled);
        assert_eq!(config.encoding, Some(TextEncoding::Latin1));
        assert_eq!(config.poll_interval_ms, 25);
        assert!(!config.redirect_process);
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        let cli = parse(&["teestream", "--encoding", "ebcdic", "--", "true"]);
        assert!(session_config(&cli).is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tee.json");
        let json = r#"{"binary": true, "newline": "universal", "poll_interval_ms": 40}"#;
        fs::write(&path, json).unwrap();

        let config_arg = path.to_str().unwrap();
        let cli = parse(&[
            "teestream", "--config", config_arg, "--poll-ms", "5", "--", "true",
        ]);
        let config = session_config(&cli).unwrap();
        assert!(config.binary);
        assert_eq!(config.newline, NewlineMode::Universal);
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.merge, MergeMode::Auto);
        assert!(!config.redirect_process);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_status() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        assert_eq!(run::exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(run::exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(run::exit_code(ExitStatus::from_raw(9)), 137);
    }
}
