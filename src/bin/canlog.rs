use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use canlog::config::Settings;
use canlog::deserializer::write_dump;
use canlog::logging::init_logging;
use canlog::{
    DbcCodec, InfluxCliSink, NullSink, Pipeline, PipelineConfig, RunReport, StageResult,
    TaskRegistry, TaskToken, TimeSeriesSink, deserialize,
};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "canlog",
    version,
    about = "Convert raw CAN bus logs into signal tables and InfluxDB line protocol"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one or more raw logs, one worker per file
    Convert {
        /// Raw log files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// DBC schema used to decode signals
        #[arg(long, env = "CANLOG_DBC")]
        dbc: PathBuf,

        /// TOML settings file layered under the CANLOG_* environment
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write artifacts here instead of the configured output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Skip delivery to InfluxDB
        #[arg(long)]
        no_deliver: bool,
    },

    /// Print the frames of a raw log, one per line
    Inspect {
        /// Raw log file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Convert {
            files,
            dbc,
            config,
            output_dir,
            no_deliver,
        } => convert(&files, &dbc, config.as_deref(), output_dir, no_deliver),
        Command::Inspect { file } => inspect(&file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("canlog: {e}");
            ExitCode::FAILURE
        }
    }
}

fn convert(
    files: &[PathBuf],
    dbc: &Path,
    config: Option<&Path>,
    output_dir: Option<PathBuf>,
    no_deliver: bool,
) -> canlog::Result<ExitCode> {
    let mut settings = Settings::load(config)?;
    if let Some(dir) = output_dir {
        settings.output_dir = dir;
    }
    if let Err(e) = init_logging(&settings.log) {
        eprintln!("canlog: logging disabled: {e}");
    }

    let sink: Box<dyn TimeSeriesSink> = if no_deliver {
        Box::new(NullSink)
    } else {
        Box::new(InfluxCliSink::new(settings.influx.clone()))
    };
    let registry = Arc::new(TaskRegistry::new(settings.registry_capacity));
    let pipeline = Pipeline::new(
        PipelineConfig::from(&settings),
        DbcCodec::from_file(dbc)?,
        Arc::clone(&registry),
        sink,
    );

    let tokens: Vec<TaskToken> = files.iter().map(|_| TaskToken::generate()).collect();
    let names = artifact_names(files, &tokens);
    let tasks: Vec<(&PathBuf, TaskToken, String)> = files
        .iter()
        .zip(tokens)
        .zip(names)
        .map(|((path, token), name)| {
            registry.create(token.clone());
            tracing::info!(token = %token, file = %path.display(), name = %name, "task created");
            (path, token, name)
        })
        .collect();

    let results: Vec<(&PathBuf, StageResult<RunReport>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|(path, token, name)| {
                let pipeline = &pipeline;
                (*path, scope.spawn(move || pipeline.run_file_as(token, path, name)))
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|(path, handle)| match handle.join() {
                Ok(result) => Some((path, result)),
                Err(_) => {
                    eprintln!("canlog: worker for {} panicked", path.display());
                    None
                }
            })
            .collect()
    });

    let mut failed = results.len() != tasks.len();
    for (path, result) in results {
        match result {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(failure) => {
                failed = true;
                eprintln!("canlog: {}: {failure}", path.display());
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Artifact name of each file: its stem, or `<stem>-<token>` when another
/// file in the same invocation has that stem.
fn artifact_names(files: &[PathBuf], tokens: &[TaskToken]) -> Vec<String> {
    let stems: Vec<String> = files
        .iter()
        .zip(tokens)
        .map(|(path, token)| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| token.to_string())
        })
        .collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.as_str()).or_default() += 1;
    }
    stems
        .iter()
        .zip(tokens)
        .map(|(stem, token)| {
            if counts[stem.as_str()] > 1 {
                format!("{stem}-{token}")
            } else {
                stem.clone()
            }
        })
        .collect()
}

fn inspect(file: &Path) -> canlog::Result<ExitCode> {
    let bytes = std::fs::read(file)?;
    let frames = deserialize(&bytes)?;
    write_dump(&frames, std::io::stdout().lock())?;
    Ok(ExitCode::SUCCESS)
}
