use clap::error::ErrorKind;
use clap::Parser;
use patscan::{
    config::{ExecutionMode, OutputFormat, ScanOverrides},
    search::MatchStrategy,
    ScanConfig, ScanError,
};
use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, ScanError>;

/// Count exact occurrences of a pattern in the third field of a delimited file
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Delimited text file; the first line is a header
    input_path: PathBuf,

    /// Byte pattern to count (overlapping occurrences included)
    pattern: OsString,

    /// Number of ranks in the process group (default: CPU cores)
    #[arg(short = 'n', long = "processes")]
    processes: Option<NonZeroUsize>,

    /// Execution mode (distributed|parallel|serial|mpi)
    #[arg(short = 'm', long)]
    mode: Option<ExecutionMode>,

    /// Elements moved by the scatter/gather probe (0 disables it)
    #[arg(long)]
    probe_size: Option<usize>,

    /// Records per distribution broadcast
    #[arg(long)]
    frame_records: Option<NonZeroUsize>,

    /// Field delimiter
    #[arg(short = 'd', long)]
    delimiter: Option<char>,

    /// Use the brute-force matcher instead of the failure-function scan
    #[arg(long)]
    brute_force: bool,

    /// Report format (text|json)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// YAML configuration file; CLI flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(cli)?;
    init_logging(&config.log_level);
    debug!("Resolved configuration: {:?}", config);

    let summary = match config.mode {
        ExecutionMode::Mpi => patscan::search::run_mpi(&config)?,
        _ => Some(patscan::run(&config)?),
    };
    // Only the coordinator reports
    if let Some(summary) = summary {
        match config.format {
            OutputFormat::Text => print!("{}", summary),
            OutputFormat::Json => println!("{}", summary.to_json()?),
        }
    }
    Ok(())
}

fn build_config(cli: Cli) -> Result<ScanConfig> {
    let pattern = cli.pattern.into_encoded_bytes();
    let base = match &cli.config {
        Some(path) => ScanConfig::load_from(path)?,
        None => ScanConfig::new(&cli.input_path, pattern.clone()),
    };

    let mut config = base.merge_with_cli(ScanOverrides {
        group_size: cli.processes,
        probe_size: cli.probe_size,
        frame_records: cli.frame_records,
        delimiter: cli.delimiter,
        mode: cli.mode,
        strategy: cli.brute_force.then_some(MatchStrategy::BruteForce),
        format: cli.format,
        log_level: cli.log_level,
    });
    // Positional arguments always win over the file
    config.input_path = cli.input_path;
    config.pattern = pattern;
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_exactly_two_positionals() {
        assert!(Cli::try_parse_from(["patscan", "data.csv"]).is_err());
        assert!(Cli::try_parse_from(["patscan", "data.csv", "abc", "extra"]).is_err());
        assert!(Cli::try_parse_from(["patscan", "data.csv", "abc"]).is_ok());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "patscan",
            "data.csv",
            "abc",
            "-n",
            "3",
            "--mode",
            "serial",
            "--probe-size",
            "0",
            "--brute-force",
        ])
        .unwrap();
        let config = build_config(cli).unwrap();
        assert_eq!(config.group_size.get(), 3);
        assert_eq!(config.mode, ExecutionMode::Serial);
        assert_eq!(config.probe_size, 0);
        assert_eq!(config.strategy, MatchStrategy::BruteForce);
        assert_eq!(config.pattern, b"abc");
        assert_eq!(config.input_path, PathBuf::from("data.csv"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["patscan", "data.csv", "abc", "--mode", "cluster"]).is_err());
        assert!(Cli::try_parse_from(["patscan", "data.csv", "abc", "--mode", "mpi"]).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_pattern_keeps_raw_bytes() {
        use std::os::unix::ffi::OsStringExt;

        let pattern = OsString::from_vec(vec![0xff, b'a']);
        let cli = Cli::try_parse_from([
            OsString::from("patscan"),
            OsString::from("data.csv"),
            pattern,
        ])
        .unwrap();
        let config = build_config(cli).unwrap();
        assert_eq!(config.pattern, vec![0xff, b'a']);
    }
}
