use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use kcf::archive::{Archive, PackSource};
use kcf::errors::KcfError;

mod cli;
use crate::cli::{Cli, Commands};

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Create { archive, paths } => pack(&archive, &paths),
        Commands::Extract { archive } => unpack(&archive),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kcf: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn pack(archive: &Path, paths: &[PathBuf]) -> Result<(), KcfError> {
    let mut kcf = Archive::create_path(archive)?;
    kcf.init()?;

    for path in paths {
        println!("Packing {}", path.display());
        kcf.pack_file(PackSource::from_path(path)?)?;
    }

    kcf.close()?;
    Ok(())
}

fn unpack(archive: &Path) -> Result<(), KcfError> {
    let mut kcf = Archive::open_path(archive)?;
    kcf.init()?;

    while let Some(hdr) = kcf.current_file()? {
        println!("Unpacking {}", hdr.file_name);

        if hdr.file_type.is_dir() {
            fs::create_dir_all(&hdr.file_name)?;
            kcf.unpack_file(&mut io::sink())?;
        } else {
            // Stored names are taken verbatim, only missing parents are
            // created for them
            let path = Path::new(&hdr.file_name);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }

            let mut out = File::create(path)?;
            kcf.unpack_file(&mut out)?;
        }
    }

    kcf.close()?;
    Ok(())
}
