use std::path::PathBuf;
use std::process::ExitCode;

use stationlog_core::config::PipelineConfig;
use stationlog_core::export::{ExportOptions, write_outputs};
use stationlog_core::{AnalysisContext, PatternRegistry, analyze_files};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: stationlog [--output DIR] LOG_FILE...";

const EXIT_FILE_FAILED: u8 = 1;
const EXIT_SETUP_FAILED: u8 = 2;

/// Initialise the tracing / logging subsystem.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stationlog=info,stationlog_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

struct Args {
    output: Option<PathBuf>,
    files: Vec<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut output = None;
    let mut files = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => match args.next() {
                Some(dir) => output = Some(PathBuf::from(dir)),
                None => return Err(format!("{arg} needs a directory")),
            },
            "-h" | "--help" => return Err(USAGE.to_string()),
            s if s.starts_with('-') && s.len() > 1 => return Err(format!("unknown option {s}")),
            _ => files.push(PathBuf::from(arg)),
        }
    }
    if files.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(Args { output, files })
}

fn load_registry(config: &PipelineConfig) -> Result<PatternRegistry, stationlog_core::AnalysisError> {
    match &config.patterns_path {
        Some(path) => PatternRegistry::load(path),
        None => PatternRegistry::bundled(),
    }
}

fn main() -> ExitCode {
    init_logging();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    let mut config = match PipelineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };
    if let Some(dir) = args.output {
        config.output_dir = dir;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::from(EXIT_SETUP_FAILED);
    }
    info!(
        site = %config.request.site,
        platform = %config.request.platform,
        output_dir = %config.output_dir.display(),
        "analysis request"
    );

    let registry = match load_registry(&config) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "failed to load pattern registry");
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };
    info!(patterns = registry.pattern_count(), "loaded pattern registry");

    let ctx = match AnalysisContext::new(&registry, &config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "failed to build analysis context");
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };
    let options = ExportOptions::from(&config.report);

    let mut failed = 0usize;
    for (path, result) in analyze_files(&args.files, &ctx) {
        let analysis = match result {
            Ok(analysis) => analysis,
            Err(_) => {
                failed += 1;
                continue;
            }
        };
        for diagnostic in &analysis.diagnostics {
            warn!(path = %path.display(), diagnostic = %diagnostic, "analysis diagnostic");
        }
        match write_outputs(&analysis, &config.output_dir, &options) {
            Ok(written) => {
                let summary = serde_json::json!({
                    "path": path.display().to_string(),
                    "test_type": analysis.test_type,
                    "encoding": analysis.encoding,
                    "lines": analysis.total_lines,
                    "units": analysis.book.len(),
                    "diagnostics": analysis.diagnostics.len(),
                    "files_written": written.len(),
                });
                println!("{summary}");
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to write outputs");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!(failed, total = args.files.len(), "some files failed");
        ExitCode::from(EXIT_FILE_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}
