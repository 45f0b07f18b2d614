//! `qcvm`: command-line host for progs images.
//!
//! Usage:
//!   qcvm inspect <file> [--json]
//!   qcvm run <file> [--function main] [--config cfg.json] [--entities N] [--trace]
//!   qcvm package --stub <exe> --image <progs> --output <out>
//!   qcvm extract <file> --output <progs>
//!   qcvm exports [--output defs.qc]

mod host;
mod inspect;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use qcvm::{Builtins, Vm, VmConfig, VmError};
use qcvm_image::{package, Image, ImageError};
use thiserror::Error;
use tracing::{debug, info};

use crate::inspect::ImageSummary;

#[derive(Debug, Error)]
enum CliError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: invalid config: {source}")]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}: no packaged image found")]
    NoPackagedImage(PathBuf),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "qcvm", version)]
#[command(about = "Run and inspect QuakeC progs images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header, tables and fingerprint of an image
    Inspect {
        file: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Execute a function and print its return value
    Run(RunArgs),

    /// Append an image to a host executable
    Package {
        #[arg(long)]
        stub: PathBuf,

        #[arg(long)]
        image: PathBuf,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Pull a packaged image back out of an executable
    Extract {
        file: PathBuf,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Write QuakeC prototypes for the builtins this host provides
    Exports {
        /// Destination file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Progs image or packaged executable
    file: PathBuf,

    /// Function to run
    #[arg(long, short, default_value = "main")]
    function: String,

    /// VM configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the entity buffer size
    #[arg(long)]
    entities: Option<usize>,

    /// Abort after this many statements
    #[arg(long)]
    limit: Option<u64>,

    /// Log every executed statement
    #[arg(long)]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();
    let trace = matches!(&cli.command, Command::Run(args) if args.trace);
    host::init_logging(trace);

    let result = match cli.command {
        Command::Inspect { file, json } => inspect(&file, json),
        Command::Run(args) => run(&args),
        Command::Package {
            stub,
            image,
            output,
        } => package(&stub, &image, &output),
        Command::Extract { file, output } => extract(&file, &output),
        Command::Exports { output } => exports(output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn read(path: &Path) -> CliResult<Vec<u8>> {
    fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, bytes: &[u8]) -> CliResult<()> {
    fs::write(path, bytes).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The image inside `bytes`: the packaged payload if a trailer is present,
/// otherwise the whole buffer.
fn image_bytes(bytes: &[u8]) -> CliResult<&[u8]> {
    Ok(package::extract(bytes)?.unwrap_or(bytes))
}

fn inspect(file: &Path, json: bool) -> CliResult<()> {
    let bytes = read(file)?;
    let bytes = image_bytes(&bytes)?;
    let image = Image::parse(bytes)?;
    let summary = ImageSummary::new(bytes, &image);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render());
    }
    Ok(())
}

fn load_config(args: &RunArgs) -> CliResult<VmConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| CliError::Config {
                path: path.clone(),
                source,
            })?
        }
        None => VmConfig::default(),
    };
    if let Some(n) = args.entities {
        config.max_entities = n;
    }
    if let Some(limit) = args.limit {
        config.statement_limit = Some(limit);
    }
    Ok(config)
}

fn run(args: &RunArgs) -> CliResult<()> {
    let config = load_config(args)?;
    debug!(?config, "vm config");
    let bytes = read(&args.file)?;
    let mut vm = Vm::from_bytes(image_bytes(&bytes)?, config)?;
    host::register(vm.builtins_mut());

    info!(function = %args.function, "running");
    vm.run(&args.function)?;
    info!(
        statements = vm.statements_executed(),
        "{} returned",
        args.function
    );
    println!("{}", vm.get_return_float()?);
    Ok(())
}

fn package(stub: &Path, image: &Path, output: &Path) -> CliResult<()> {
    let stub_bytes = read(stub)?;
    let image_bytes = read(image)?;
    Image::parse(&image_bytes)?;
    write(output, &package::append(&stub_bytes, &image_bytes)?)?;
    info!(
        output = %output.display(),
        image = image_bytes.len(),
        "packaged"
    );
    Ok(())
}

fn extract(file: &Path, output: &Path) -> CliResult<()> {
    let bytes = read(file)?;
    let image = package::extract(&bytes)?.ok_or_else(|| CliError::NoPackagedImage(file.into()))?;
    write(output, image)?;
    info!(output = %output.display(), size = image.len(), "extracted");
    Ok(())
}

fn exports(output: Option<&Path>) -> CliResult<()> {
    let mut table = Builtins::new();
    host::register(&mut table);
    let Some(path) = output else {
        return table
            .dump_qc(&mut std::io::stdout().lock())
            .map_err(|source| CliError::Io {
                path: PathBuf::from("<stdout>"),
                source,
            });
    };
    let io = |source| CliError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(path).map_err(io)?;
    table.dump_qc(&mut file).map_err(io)?;
    info!(output = %path.display(), builtins = table.names().count(), "exported");
    Ok(())
}
