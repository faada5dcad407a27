use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::*;
use structopt::*;

use zextract::read::ZipArchive;
use zextract::ExtractOptions;

#[derive(Debug, StructOpt)]
#[structopt(name = "unzip", about = "Safely extracts a .zip file")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Extract into the given directory instead of the current one.
    #[structopt(short = "d", long)]
    directory: Option<PathBuf>,

    /// Skip entries with this exact name. Can be given multiple times.
    #[structopt(short = "x", long = "exclude", number_of_values = 1)]
    excluded: Vec<String>,

    /// Octal mode for directories the archive gives no permissions
    #[structopt(long)]
    dir_mode: Option<String>,

    /// Octal mode for files the archive gives no permissions
    #[structopt(long)]
    file_mode: Option<String>,

    /// Lists the entries in the ZIP archive instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    if args.dry_run {
        return list(&args.zip_path);
    }

    let target = match args.directory {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => std::env::current_dir()?.join(dir),
        None => std::env::current_dir()?,
    };

    let mut options = ExtractOptions::new(&target)
        .excluded_files(args.excluded)
        .on_entry(|entry, _| {
            info!("{}", entry.name);
            Ok(())
        });
    if let Some(mode) = args.dir_mode {
        options = options.default_dir_mode(mode);
    }
    if let Some(mode) = args.file_mode {
        options = options.default_file_mode(mode);
    }

    zextract::extract_file(&args.zip_path, options)
        .await
        .with_context(|| {
            format!(
                "Couldn't extract {} into {}",
                args.zip_path.display(),
                target.display()
            )
        })
}

fn list(zip_path: &Path) -> Result<()> {
    let mut archive = ZipArchive::open(zip_path).context("Couldn't load archive")?;
    if !archive.comment().is_empty() {
        println!("{}", String::from_utf8_lossy(archive.comment()));
    }
    while let Some(entry) = archive.next_entry()? {
        let modified = entry
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:>10}  {:16}  {}", entry.size, modified, entry.name);
    }
    Ok(())
}
