use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kcf")]
#[command(about = "KCF container archiver")]
#[command(author, version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Creates an archive and packs each path into it verbatim
    #[command(name = "c")]
    Create {
        /// Archive to create
        archive: PathBuf,

        /// Paths to pack
        paths: Vec<PathBuf>,
    },

    /// Extracts every file to its stored name in the working directory
    #[command(name = "x")]
    Extract {
        /// Archive to read
        archive: PathBuf,
    },
}
