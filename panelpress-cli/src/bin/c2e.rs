use anyhow::Result;
use clap::{Parser, ValueEnum};

use std::path::PathBuf;
use std::process::ExitCode;

use panelpress::{
    BatchSplit, BorderColor, CancelToken, Config, Cropping, OutputFormat, Preset, SkipPolicy,
    SplitStrategy, Summary,
};

#[derive(Parser)]
#[command(name = "c2e")]
#[command(about = "Convert comic archives and directories to e-reader formats", long_about = None)]
#[command(version)]
struct Args {
    /// Comic folder(s) or file(s) to process
    #[arg(value_name = "INPUT")]
    input: Vec<PathBuf>,

    /// Device profile (K578, KPW5, KV, KoGHD, KoA, KoC, KoL, ... run with
    /// --list-profiles for all)
    #[arg(short, long, default_value = "KV")]
    profile: String,

    /// List available device profiles and exit
    #[arg(long, default_value_t = false)]
    list_profiles: bool,

    /// Manga style (right-to-left reading and splitting)
    #[arg(short = 'm', long = "manga-style", default_value_t = false)]
    manga_style: bool,

    /// Try to increase the quality of magnification
    #[arg(short = 'q', long, default_value_t = false)]
    hq: bool,

    /// Display two not four panels in Panel View mode
    #[arg(short = '2', long = "two-panel", default_value_t = false)]
    two_panel: bool,

    /// Webtoon processing mode
    #[arg(short = 'w', long, default_value_t = false)]
    webtoon: bool,

    /// Maximal size of output file in MiB
    #[arg(long = "targetsize", value_name = "MiB")]
    target_size: Option<u64>,

    /// Output generated file(s) to specified directory or file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Name of the topmost directory to reproduce from the source tree in
    /// the output directory
    #[arg(long = "copysourcetree", value_name = "NAME")]
    copy_source_tree: Option<String>,

    /// Comic title (defaults to the file or directory name)
    #[arg(short, long)]
    title: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = FormatArg::Auto)]
    format: FormatArg,

    /// Split output: 0 never, 1 automatic, 2 every subdirectory is a volume
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = 0)]
    batchsplit: u8,

    /// Skip policy for previously-converted inputs (0-5)
    #[arg(short = 'e', long, value_parser = clap::value_parser!(u8).range(0..=5), default_value_t = 0)]
    skipexisting: u8,

    /// Pad the "_kcc" output counter with this many zeros
    #[arg(short = 'z', long, default_value_t = 0)]
    padzeros: usize,

    /// Copy ComicInfo.xml into the generated file (CBZ only)
    #[arg(long = "copycomicinfo", default_value_t = false)]
    copy_comic_info: bool,

    /// Do not modify images, ignoring profile and processing options
    #[arg(short = 'n', long, default_value_t = false)]
    noprocessing: bool,

    /// Resize images smaller than the device resolution
    #[arg(short, long, default_value_t = false)]
    upscale: bool,

    /// Stretch images to the device resolution
    #[arg(short, long, default_value_t = false)]
    stretch: bool,

    /// Add borders instead of shrinking the image to the device ratio
    #[arg(long, default_value_t = false)]
    noshrink: bool,

    /// Double page parsing mode: 0 split, 1 rotate, 2 both
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = 0)]
    splitter: u8,

    /// Gamma correction (0.0 selects automatic)
    #[arg(short, long, default_value_t = 0.0)]
    gamma: f32,

    /// Cropping mode: 0 disabled, 1 margins, 2 margins + page numbers
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = 2)]
    cropping: u8,

    /// Cropping power
    #[arg(long = "croppingpower", default_value_t = 1.0)]
    cropping_power: f32,

    /// Cropping minimum area ratio
    #[arg(long = "croppingminimum", default_value_t = 0.0)]
    cropping_minimum: f32,

    /// Border color, a named color or a hexadecimal value
    #[arg(long = "bordercolor", value_name = "NAME|#HEX")]
    border_color: Option<String>,

    /// Don't convert images to grayscale
    #[arg(long = "forcecolor", default_value_t = false)]
    force_color: bool,

    /// Create PNG files instead of JPEG
    #[arg(long = "forcepng", default_value_t = false)]
    force_png: bool,

    /// Create JPEG files using mozjpeg
    #[arg(long = "mozjpeg", default_value_t = false)]
    mozjpeg: bool,

    /// Replace the screen width provided by the device profile
    #[arg(long = "customwidth", value_name = "PIXELS")]
    custom_width: Option<u32>,

    /// Replace the screen height provided by the device profile
    #[arg(long = "customheight", value_name = "PIXELS")]
    custom_height: Option<u32>,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Auto,
    Mobi,
    Epub,
    Cbz,
    Kfx,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Auto => OutputFormat::Auto,
            FormatArg::Mobi => OutputFormat::Mobi,
            FormatArg::Epub => OutputFormat::Epub,
            FormatArg::Cbz => OutputFormat::Cbz,
            FormatArg::Kfx => OutputFormat::Kfx,
        }
    }
}

fn build_config(args: &Args) -> Result<Config> {
    let profile: Preset = args
        .profile
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let border_color = args
        .border_color
        .as_deref()
        .map(BorderColor::parse)
        .transpose()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(Config {
        profile,
        custom_width: args.custom_width,
        custom_height: args.custom_height,
        manga_style: args.manga_style,
        hq: args.hq,
        autoscale: args.two_panel,
        webtoon: args.webtoon,
        target_size: args.target_size,
        output: args.output.clone(),
        copy_source_tree: args.copy_source_tree.clone(),
        title: args.title.clone(),
        format: args.format.into(),
        batch_split: match args.batchsplit {
            0 => BatchSplit::Off,
            1 => BatchSplit::Auto,
            _ => BatchSplit::PerDirectory,
        },
        skip_existing: SkipPolicy(args.skipexisting),
        pad_zeros: args.padzeros,
        copy_comic_info: args.copy_comic_info,
        no_processing: args.noprocessing,
        upscale: args.upscale,
        stretch: args.stretch,
        noshrink: args.noshrink,
        splitter: match args.splitter {
            0 => SplitStrategy::Split,
            1 => SplitStrategy::Rotate,
            _ => SplitStrategy::RotateAndSplit,
        },
        gamma: args.gamma,
        cropping: match args.cropping {
            0 => Cropping::Off,
            1 => Cropping::Margins,
            _ => Cropping::MarginsAndNumbers,
        },
        cropping_power: args.cropping_power,
        cropping_minimum: args.cropping_minimum,
        border_color,
        force_color: args.force_color,
        force_png: args.force_png,
        mozjpeg: args.mozjpeg,
    })
}

fn print_summary(summary: &Summary) {
    let report = |header: &str, paths: &[PathBuf]| {
        if !paths.is_empty() {
            println!("\n{header}");
            for path in paths {
                println!("{}", path.display());
            }
        }
    };
    report(
        "The following file(s) already exist in the output directory and were skipped:",
        &summary.already_exists,
    );
    report(
        "The following file(s) were probably created by a previous run and were skipped:",
        &summary.already_processed_skipped,
    );
    report(
        "The following file(s) were probably created by a previous run and copied to the output directory:",
        &summary.already_processed_copied,
    );
    report(
        "WARNING: the following file(s) were converted twice, which decreased quality:",
        &summary.multi_processed_warning,
    );
    report(
        "The following file(s) were successfully generated:",
        &summary.completed,
    );
    if !summary.failed.is_empty() {
        println!("\nThe following input(s) failed:");
        for (path, reason) in &summary.failed {
            println!("{}: {reason}", path.display());
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_timestamp(None)
        .format_target(false)
        .init();

    if args.list_profiles {
        for preset in panelpress::profile::list() {
            let (w, h) = preset.resolution();
            println!("{:8} {} ({w}x{h})", preset.id(), preset.name());
        }
        return ExitCode::SUCCESS;
    }
    if args.input.is_empty() {
        eprintln!("no input files; run with --help for usage");
        return ExitCode::FAILURE;
    }

    for input in &args.input {
        if !input.exists() {
            eprintln!("input does not exist: {}", input.display());
            return ExitCode::FAILURE;
        }
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelToken::new();
    match panelpress::convert_all(&args.input, config, &cancel) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
