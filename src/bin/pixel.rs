use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pixel::app::{App, EntriesDatabase};
use pixel::config::ConfigLoader;
use pixel::domain::{PixelSetId, ProcessId};
use pixel::error::PixelError;
use pixel::executor::WorkerPool;
use pixel::fixtures::{DEFAULT_EXPERIMENTS, DEFAULT_PIXEL_SETS, DEFAULT_PIXELS, FixtureOptions};
use pixel::import::LogSink;
use pixel::output::JsonOutput;

#[derive(Parser)]
#[command(name = "pixel")]
#[command(about = "Omics data manager: submit analysis archives and export pixels")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage reference data")]
    Reference(ReferenceArgs),
    #[command(about = "Manage reference entries")]
    Entries(EntriesArgs),
    #[command(about = "Drive submission processes")]
    Submission(SubmissionArgs),
    #[command(about = "Export pixel sets")]
    Export(ExportArgs),
    #[command(about = "Generate development fixtures (debug only)")]
    Fixtures(FixturesArgs),
}

#[derive(Args)]
struct ReferenceArgs {
    #[command(subcommand)]
    command: ReferenceCommand,
}

#[derive(Subcommand)]
enum ReferenceCommand {
    #[command(about = "Load reference data declared in the config file")]
    Seed,
}

#[derive(Args)]
struct EntriesArgs {
    #[command(subcommand)]
    command: EntriesCommand,
}

#[derive(Subcommand)]
enum EntriesCommand {
    #[command(about = "Load entries from a chromosomal features file (.tab)")]
    Load(LoadEntriesArgs),
}

#[derive(Args)]
struct LoadEntriesArgs {
    file: PathBuf,

    #[arg(long, default_value = "cgd")]
    database: String,

    #[arg(long)]
    ignore_aliases: bool,
}

#[derive(Args)]
struct SubmissionArgs {
    #[command(subcommand)]
    command: SubmissionCommand,
}

#[derive(Subcommand)]
enum SubmissionCommand {
    #[command(about = "Start a new submission")]
    Start(StartArgs),
    #[command(about = "Download the meta.xlsx template")]
    Template(TemplateArgs),
    #[command(about = "Upload a submission archive")]
    Upload(UploadArgs),
    #[command(about = "Validate (or reject) parsed metadata")]
    Validate(ValidateArgs),
    #[command(about = "Finish the current step without completing it")]
    Finish(IdArgs),
    #[command(about = "Show a submission")]
    Status(IdArgs),
    #[command(about = "List submissions")]
    List,
}

#[derive(Args)]
struct StartArgs {
    #[arg(long)]
    label: String,

    #[arg(long)]
    user: String,
}

#[derive(Args)]
struct TemplateArgs {
    id: String,

    #[arg(long)]
    out: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct UploadArgs {
    id: String,
    archive: PathBuf,
}

#[derive(Args)]
struct ValidateArgs {
    id: String,

    #[arg(long)]
    reject: bool,

    #[arg(long, default_value = "")]
    experiment_tags: String,

    #[arg(long, default_value = "")]
    analysis_tags: String,
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

#[derive(Args)]
struct ExportArgs {
    #[command(subcommand)]
    command: ExportCommand,
}

#[derive(Subcommand)]
enum ExportCommand {
    #[command(about = "Export pixel sets as a zip archive")]
    Pixelsets(ExportPixelsetsArgs),
    #[command(about = "Export the pixels of one pixel set as CSV")]
    Pixels(ExportPixelsArgs),
}

#[derive(Args)]
struct ExportPixelsetsArgs {
    #[arg(required = true)]
    ids: Vec<String>,

    #[arg(long)]
    out: Utf8PathBuf,
}

#[derive(Args)]
struct ExportPixelsArgs {
    id: String,

    #[arg(long)]
    out: Utf8PathBuf,

    #[arg(long = "omics-unit")]
    omics_units: Vec<String>,
}

#[derive(Args)]
struct FixturesArgs {
    #[arg(long, default_value_t = DEFAULT_EXPERIMENTS)]
    experiments: usize,

    #[arg(long, default_value_t = DEFAULT_PIXEL_SETS)]
    pixel_sets: usize,

    #[arg(long, default_value_t = DEFAULT_PIXELS)]
    pixels: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PixelError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PixelError) -> u8 {
    match error {
        PixelError::ArchiveNotFound(_)
        | PixelError::ProcessNotFound(_)
        | PixelError::RecordNotFound(_) => 2,
        PixelError::InvalidArchiveFormat(_)
        | PixelError::MetaFileRequired
        | PixelError::MetaFileFormat(_)
        | PixelError::MetaFileParsing(_)
        | PixelError::PixelSetParse(_)
        | PixelError::PixelSetSave(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let executor = Arc::new(WorkerPool::new(config.workers)?);
    let app = App::open(config, executor, Arc::new(LogSink))?;

    match cli.command {
        Commands::Reference(args) => match args.command {
            ReferenceCommand::Seed => {
                let result = app.seed_reference()?;
                JsonOutput::print_seed(&result).into_diagnostic()?;
            }
        },
        Commands::Entries(args) => match args.command {
            EntriesCommand::Load(args) => {
                let database: EntriesDatabase = args.database.parse()?;
                let result = app.load_entries(&args.file, database, args.ignore_aliases)?;
                JsonOutput::print_entries(&result).into_diagnostic()?;
            }
        },
        Commands::Submission(args) => run_submission(&app, args.command)?,
        Commands::Export(args) => match args.command {
            ExportCommand::Pixelsets(args) => {
                let ids = args
                    .ids
                    .iter()
                    .map(|id| id.parse::<PixelSetId>())
                    .collect::<Result<Vec<_>, _>>()?;
                let result = app.export_pixelsets(&ids, &args.out)?;
                JsonOutput::print_export(&result).into_diagnostic()?;
            }
            ExportCommand::Pixels(args) => {
                let id: PixelSetId = args.id.parse()?;
                let result = app.export_pixels(id, &args.omics_units, &args.out)?;
                JsonOutput::print_export(&result).into_diagnostic()?;
            }
        },
        Commands::Fixtures(args) => {
            let result = app.fixtures(FixtureOptions {
                experiments: args.experiments,
                pixel_sets: args.pixel_sets,
                pixels: args.pixels,
            })?;
            JsonOutput::print_fixtures(&result).into_diagnostic()?;
        }
    }

    Ok(())
}

fn run_submission(app: &App, command: SubmissionCommand) -> miette::Result<()> {
    match command {
        SubmissionCommand::Start(args) => {
            let result = app.start_submission(&args.label, &args.user)?;
            JsonOutput::print_process(&result).into_diagnostic()?;
        }
        SubmissionCommand::Template(args) => {
            let id: ProcessId = args.id.parse()?;
            let result = app.download_template(id, args.out.as_deref())?;
            JsonOutput::print_template(&result).into_diagnostic()?;
        }
        SubmissionCommand::Upload(args) => {
            let id: ProcessId = args.id.parse()?;
            let result = app.upload_archive(id, &args.archive)?;
            JsonOutput::print_detail(&result).into_diagnostic()?;
        }
        SubmissionCommand::Validate(args) => {
            let id: ProcessId = args.id.parse()?;
            let result = app.validate(
                id,
                !args.reject,
                &args.experiment_tags,
                &args.analysis_tags,
            )?;
            JsonOutput::print_detail(&result).into_diagnostic()?;
        }
        SubmissionCommand::Finish(args) => {
            let id: ProcessId = args.id.parse()?;
            let result = app.finish(id)?;
            JsonOutput::print_process(&result).into_diagnostic()?;
        }
        SubmissionCommand::Status(args) => {
            let id: ProcessId = args.id.parse()?;
            let result = app.status(id)?;
            JsonOutput::print_detail(&result).into_diagnostic()?;
        }
        SubmissionCommand::List => {
            let result = app.list()?;
            JsonOutput::print_list(&result).into_diagnostic()?;
        }
    }
    Ok(())
}
