use clap::{Parser, Subcommand, ValueEnum};
use hlslx_core::{GlslVersion, LogLogger, Stage, Target, Translator};
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "hlslx")]
#[command(about = "Translate HLSL shaders to GLSL, HLSL or Metal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate one entry point of a source file
    Translate {
        /// Input source file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Entry point function name
        #[arg(value_name = "ENTRY")]
        entry: String,

        /// Pipeline stage of the entry point
        #[arg(long, value_enum, default_value_t = StageArg::Fragment)]
        stage: StageArg,

        /// Output language
        #[arg(long, value_enum, default_value_t = TargetArg::Glsl)]
        target: TargetArg,

        /// GLSL version: 110, 140, 150, 330, 450, 100es or 300es
        #[arg(long, value_name = "VERSION", default_value = "140")]
        glsl_version: GlslVersion,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Parse and type check a source file without generating output
    Check {
        /// Input source file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageArg {
    Vertex,
    Fragment,
}

impl From<StageArg> for Stage {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::Vertex => Stage::Vertex,
            StageArg::Fragment => Stage::Fragment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    Glsl,
    Hlsl,
    LegacyHlsl,
    Metal,
}

impl TargetArg {
    fn target(self, version: GlslVersion) -> Target {
        match self {
            TargetArg::Glsl => Target::Glsl(version),
            TargetArg::Hlsl => Target::Hlsl,
            TargetArg::LegacyHlsl => Target::LegacyHlsl,
            TargetArg::Metal => Target::Metal,
        }
    }
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parsing failed, aborting")]
    ParseFailed,

    #[error("Translation failed, aborting")]
    TranslationFailed,
}

fn main() -> Result<(), DriverError> {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Translate {
            input,
            entry,
            stage,
            target,
            glsl_version,
            output,
            verbose,
        } => translate_file(input, &entry, stage.into(), target.target(glsl_version), output, verbose),
        Commands::Check { input, verbose } => check_file(input, verbose),
    };

    if let Err(ref err) = result {
        error!("{}", err);
    }
    result
}

fn translate_file(
    input: PathBuf,
    entry: &str,
    stage: Stage,
    target: Target,
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<(), DriverError> {
    if verbose {
        info!("Translating '{}' in {} to {}...", entry, input.display(), target.name());
    }

    let source = fs::read_to_string(&input)?;
    let file = input.display().to_string();
    let translator = Translator::new(&LogLogger);

    let tree = translator.check_only(&source, &file).map_err(|_| DriverError::ParseFailed)?;
    let text = translator
        .generate(&tree, entry, stage, target)
        .map_err(|_| DriverError::TranslationFailed)?;

    match output {
        Some(path) => {
            fs::write(&path, &text)?;
            if verbose {
                info!("Wrote {} bytes to {}", text.len(), path.display());
            }
        }
        None => print!("{}", text),
    }

    Ok(())
}

fn check_file(input: PathBuf, verbose: bool) -> Result<(), DriverError> {
    if verbose {
        info!("Checking {}...", input.display());
    }

    let source = fs::read_to_string(&input)?;
    let file = input.display().to_string();
    let tree = Translator::new(&LogLogger)
        .check_only(&source, &file)
        .map_err(|_| DriverError::ParseFailed)?;

    if verbose {
        info!(
            "{} is valid: {} functions, {} globals",
            input.display(),
            tree.functions.len(),
            tree.globals.len()
        );
    }

    Ok(())
}
