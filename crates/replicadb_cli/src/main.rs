//! ReplicaDB CLI
//!
//! Offline tools for schemas and flattening.
//!
//! # Commands
//!
//! - `analyze` - Infer a collection schema from sample records
//! - `flatten-schema` - Show the flat collections a schema produces
//! - `flatten-record` - Show the rows one record produces

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ReplicaDB command-line schema tools.
#[derive(Parser)]
#[command(name = "replicadb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer a collection schema from sample records
    Analyze {
        /// File with one JSON record per line
        samples: PathBuf,

        /// Collection the samples belong to
        #[arg(short, long)]
        collection: String,
    },

    /// Show the flat collections a schema produces
    FlattenSchema {
        /// Collection schema file (one schema or an array)
        schema: PathBuf,

        #[command(flatten)]
        flatten: FlattenArgs,
    },

    /// Show the rows one record produces
    FlattenRecord {
        /// Collection schema file (one schema or an array)
        schema: PathBuf,

        /// Record file
        record: PathBuf,

        /// Collection of the record; defaults to the only one in the schema file
        #[arg(short, long)]
        collection: Option<String>,

        #[command(flatten)]
        flatten: FlattenArgs,
    },

    /// Show version information
    Version,
}

#[derive(clap::Args)]
struct FlattenArgs {
    /// Per-collection flatten options file
    #[arg(short, long, conflicts_with = "auto")]
    options: Option<PathBuf>,

    /// Inline every object and promote every array
    #[arg(short, long)]
    auto: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze {
            samples,
            collection,
        } => {
            commands::analyze::run(&samples, &collection)?;
        }
        Commands::FlattenSchema { schema, flatten } => {
            let mode = commands::flatten_mode(flatten.options.as_deref(), flatten.auto)?;
            commands::flatten_schema::run(&schema, &mode)?;
        }
        Commands::FlattenRecord {
            schema,
            record,
            collection,
            flatten,
        } => {
            let mode = commands::flatten_mode(flatten.options.as_deref(), flatten.auto)?;
            commands::flatten_record::run(&schema, &record, collection.as_deref(), &mode)?;
        }
        Commands::Version => {
            println!("ReplicaDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
