use anyhow::{Context, Result};
use clap::Parser;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use panelpress::cancel::CancelToken;
use panelpress::webtoon::{self, WebtoonOptions};
use panelpress::workspace;

#[derive(Parser)]
#[command(name = "c2p")]
#[command(about = "Split webtoon strips into device-height pages", long_about = None)]
#[command(version)]
struct Args {
    /// Comic folder(s) to process
    #[arg(value_name = "INPUT", required = true)]
    input: Vec<PathBuf>,

    /// Height of the target device screen
    #[arg(short = 'y', long, required = true)]
    height: u32,

    /// Overwrite the source directory
    #[arg(short, long = "in-place", default_value_t = false)]
    in_place: bool,

    /// Combine every directory into a single image before splitting
    #[arg(short, long, default_value_t = false)]
    merge: bool,

    /// Output generated directories to the specified directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Create a debug image for every split strip
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

fn target_directory(source: &Path, args: &Args) -> PathBuf {
    let base_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "webtoon".to_string());
    let mut target = match (&args.output, args.in_place) {
        (Some(output), _) => output.join(&base_name),
        (None, true) => return source.to_path_buf(),
        (None, false) => source.with_file_name(format!("{base_name}-Splitted")),
    };
    if !args.in_place && target.is_dir() {
        let mut counter = 0;
        loop {
            let candidate = PathBuf::from(format!("{}{counter}", target.display()));
            if !candidate.is_dir() {
                target = candidate;
                break;
            }
            counter += 1;
        }
    }
    target
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let rel = entry.path().strip_prefix(from)?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn process_one(source: &Path, args: &Args, cancel: &CancelToken) -> Result<PathBuf> {
    if !source.is_dir() {
        anyhow::bail!("provided input is not a directory: {}", source.display());
    }
    let target = target_directory(source, args);

    let workdir = workspace::prepare(source, false).context("failed to prepare a workspace")?;
    let opts = WebtoonOptions {
        target_height: args.height,
        merge: args.merge,
        debug: args.debug,
    };
    let result = webtoon::process_tree(&workdir, &opts, cancel);
    match result {
        Ok(()) => {
            if args.in_place {
                fs::remove_dir_all(&target).ok();
            }
            copy_tree(&workdir, &target)?;
            fs::remove_dir_all(&workdir).ok();
            Ok(target)
        }
        Err(e) => {
            fs::remove_dir_all(&workdir).ok();
            Err(e.into())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .format_target(false)
        .init();

    if args.height == 0 {
        eprintln!("target height is not set");
        return ExitCode::FAILURE;
    }

    let cancel = CancelToken::new();
    workspace::clean_stale_workdirs();

    let mut produced = Vec::new();
    for (index, source) in args.input.iter().enumerate() {
        log::info!(
            "working on ({}/{}) {}",
            index + 1,
            args.input.len(),
            source.display()
        );
        match process_one(source, &args, &cancel) {
            Ok(target) => produced.push(target),
            Err(e) => {
                eprintln!("{}: {e:#}", source.display());
                return ExitCode::FAILURE;
            }
        }
    }

    println!("\nThe following directories were successfully created:");
    for target in produced {
        println!("{}", target.display());
    }
    ExitCode::SUCCESS
}
