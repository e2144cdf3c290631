//! Converter CLI - Convert brokerage exports with declarative mappings
//!
//! # Main Commands
//!
//! ```bash
//! converter validate data/in/revolut.csv --mapping-id revolut_stocks_to_ghostfolio
//! converter transform data/in/revolut.csv --mapping-id revolut_stocks_to_ghostfolio
//! converter batch --mapping-id revolut_stocks_to_ghostfolio
//! converter mappings                  # List stored mappings
//! ```
//!
//! # Help Commands
//!
//! ```bash
//! converter example-mapping           # Show the seed Revolut → Ghostfolio mapping
//! converter transforms                # Show available transform kinds
//! ```

use clap::{Args, Parser, Subcommand};
use converter::{
    example_mapping, output_name, transform_directory, transform_file, transforms_description,
    validate_file, BatchOptions, BatchSummary, InputFormat, LogEntry, MappingConfig,
    MappingRegistry, ProcessOptions, RowError, TransformResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors shown at most, per run
const MAX_DISPLAYED_ERRORS: usize = 50;

#[derive(Parser)]
#[command(name = "converter")]
#[command(about = "Convert brokerage and crypto exports to Ghostfolio import files", long_about = None)]
struct Cli {
    /// Data directory holding config/, in/ and out/
    #[arg(long, global = true, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dry run: report what a conversion would do, write nothing
    Validate {
        /// Input CSV file
        input: PathBuf,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        format: FormatArgs,
    },

    /// Convert one file
    Transform {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: {data-dir}/out/{stem}_{destination}.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        format: FormatArgs,

        /// Write output even when rows have errors
        #[arg(long)]
        allow_errors: bool,
    },

    /// Convert every CSV file of a directory
    Batch {
        /// Input directory (default: {data-dir}/in/{source_id})
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Output directory (default: {data-dir}/out/{destination_id})
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output name suffix (default: the mapping's destination_id)
        #[arg(long)]
        suffix: Option<String>,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        format: FormatArgs,

        /// Write output even when rows have errors
        #[arg(long)]
        allow_errors: bool,
    },

    /// List stored mappings
    Mappings {
        /// Only mappings reading this source spec
        #[arg(long)]
        source: Option<String>,
    },

    /// Show the seed Revolut stocks → Ghostfolio mapping
    ExampleMapping,

    /// Show available transform kinds and filter operators
    Transforms,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MappingArgs {
    /// Mapping JSON file
    #[arg(short, long)]
    mapping: Option<PathBuf>,

    /// Mapping id in {data-dir}/config/mappings.json
    #[arg(long)]
    mapping_id: Option<String>,
}

#[derive(Args)]
struct FormatArgs {
    /// Input delimiter
    #[arg(short, long, default_value = ",")]
    delimiter: char,

    /// Input text encoding
    #[arg(short, long, default_value = "utf-8")]
    encoding: String,

    /// Detect delimiter and encoding instead
    #[arg(long)]
    auto_detect: bool,
}

impl FormatArgs {
    fn input_format(&self) -> InputFormat {
        if self.auto_detect {
            InputFormat::auto()
        } else {
            InputFormat {
                delimiter: Some(self.delimiter),
                encoding: Some(self.encoding.clone()),
            }
        }
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    let result = match cli.command {
        Commands::Validate { input, mapping, format } => {
            cmd_validate(&data_dir, &input, &mapping, &format)
        }

        Commands::Transform {
            input,
            output,
            mapping,
            format,
            allow_errors,
        } => cmd_transform(&data_dir, &input, output.as_deref(), &mapping, &format, allow_errors),

        Commands::Batch {
            input_dir,
            output_dir,
            suffix,
            mapping,
            format,
            allow_errors,
        } => {
            cmd_batch(
                &data_dir,
                input_dir,
                output_dir,
                suffix,
                &mapping,
                &format,
                allow_errors,
            )
            .await
        }

        Commands::Mappings { source } => cmd_mappings(&data_dir, source.as_deref()),

        Commands::ExampleMapping => cmd_example_mapping(),

        Commands::Transforms => cmd_transforms(),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn config_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("config")
}

fn load_mapping(data_dir: &Path, args: &MappingArgs) -> CliResult<MappingConfig> {
    match (&args.mapping, &args.mapping_id) {
        (Some(path), _) => Ok(MappingConfig::from_file(path)?),
        (None, Some(id)) => {
            let registry = MappingRegistry::load(config_dir(data_dir))?;
            Ok(registry.get(id)?.clone())
        }
        (None, None) => Err("specify --mapping or --mapping-id".into()),
    }
}

fn destination_suffix(mapping: &MappingConfig) -> &str {
    mapping.destination_id.as_deref().unwrap_or("converted")
}

fn cmd_validate(data_dir: &Path, input: &Path, args: &MappingArgs, format: &FormatArgs) -> CliResult<bool> {
    let mapping = load_mapping(data_dir, args)?;
    let options = ProcessOptions {
        input: format.input_format(),
        ..Default::default()
    };

    let result = validate_file(input, &mapping, &options);
    print_result(&result);
    Ok(result.is_ok())
}

fn cmd_transform(
    data_dir: &Path,
    input: &Path,
    output: Option<&Path>,
    args: &MappingArgs,
    format: &FormatArgs,
    allow_errors: bool,
) -> CliResult<bool> {
    let mapping = load_mapping(data_dir, args)?;
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => data_dir
            .join("out")
            .join(output_name(input, destination_suffix(&mapping))),
    };
    let options = ProcessOptions {
        fail_on_error: !allow_errors,
        input: format.input_format(),
    };

    let result = transform_file(input, &output, &mapping, &options);
    print_result(&result);
    if result.output_written {
        eprintln!("💾 Saved to: {}", output.display());
    }
    Ok(result.is_ok())
}

async fn cmd_batch(
    data_dir: &Path,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    suffix: Option<String>,
    args: &MappingArgs,
    format: &FormatArgs,
    allow_errors: bool,
) -> CliResult<bool> {
    let mapping = load_mapping(data_dir, args)?;

    let input_dir = input_dir.unwrap_or_else(|| match mapping.source_id {
        Some(ref source) => data_dir.join("in").join(source),
        None => data_dir.join("in"),
    });
    let output_dir = output_dir.unwrap_or_else(|| data_dir.join("out").join(destination_suffix(&mapping)));

    eprintln!("Converter batch");
    eprintln!("{}", "=".repeat(40));
    eprintln!("Mapping: {}", mapping.name);
    eprintln!("Input:   {}", input_dir.display());
    eprintln!("Output:  {}", output_dir.display());
    eprintln!("{}", "=".repeat(40));

    let options = BatchOptions {
        process: ProcessOptions {
            fail_on_error: !allow_errors,
            input: format.input_format(),
        },
        output_suffix: suffix,
    };
    let summary = transform_directory(&input_dir, &output_dir, Arc::new(mapping), &options).await?;

    print_batch(&summary);
    Ok(summary.is_ok())
}

fn cmd_mappings(data_dir: &Path, source: Option<&str>) -> CliResult<bool> {
    let registry = MappingRegistry::load(config_dir(data_dir))?;
    let mappings: Vec<&MappingConfig> = match source {
        Some(source) => registry.for_source(source),
        None => registry.list().iter().collect(),
    };

    for entry in registry.invalid() {
        eprintln!("⚠️  Skipping invalid mapping '{}': {}", entry.id, entry.reason);
    }

    if mappings.is_empty() {
        eprintln!("No mappings stored in {}", config_dir(data_dir).display());
        return Ok(registry.invalid().is_empty());
    }

    eprintln!("📋 Stored mappings ({}):\n", mappings.len());
    for mapping in mappings {
        println!(
            "  {} - {} ({} → {})",
            mapping.id.as_deref().unwrap_or("-"),
            mapping.name,
            mapping.source_id.as_deref().unwrap_or("?"),
            mapping.destination_id.as_deref().unwrap_or("?"),
        );
        println!(
            "     {} field mappings, {} filter rules",
            mapping.field_mappings.len(),
            mapping.filter_rules.len()
        );
    }
    Ok(registry.invalid().is_empty())
}

fn cmd_example_mapping() -> CliResult<bool> {
    println!("{}", example_mapping().to_json()?);
    Ok(true)
}

fn cmd_transforms() -> CliResult<bool> {
    println!("{}", transforms_description());
    Ok(true)
}

fn print_logs(logs: &[LogEntry]) {
    for entry in logs {
        eprintln!("{}", entry.render());
    }
}

fn print_errors<'a>(errors: impl Iterator<Item = (Option<&'a str>, &'a RowError)>, total: usize) {
    if total == 0 {
        return;
    }
    eprintln!("\n❌ Errors ({}):", total);
    for (file, error) in errors.take(MAX_DISPLAYED_ERRORS) {
        match file {
            Some(file) => eprintln!("   [{}] {}", file, error),
            None => eprintln!("   {}", error),
        }
    }
    if total > MAX_DISPLAYED_ERRORS {
        eprintln!("   ... and {} more", total - MAX_DISPLAYED_ERRORS);
    }
}

fn print_result(result: &TransformResult) {
    print_logs(&result.logs);
    print_errors(result.errors.iter().map(|e| (None, e)), result.errors.len());
}

fn print_batch(summary: &BatchSummary) {
    print_logs(&summary.logs());
    let total = summary.errors().count();
    print_errors(summary.errors().map(|(file, e)| (Some(file), e)), total);

    eprintln!("{}", "=".repeat(40));
    eprintln!("📊 {}", summary.summary());
}
