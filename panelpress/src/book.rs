//! End-to-end conversion pipeline: ingest, sanity-check, process, split into
//! volumes, package, and deliver to the output location.

use uuid::Uuid;

use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::comicinfo::ComicInfo;
use crate::config::{BatchSplit, Config, OutputFormat, ResolvedConfig};
use crate::error::{Error, Result};
use crate::sidecar::Sidecar;
use crate::{archive, cbz, epub, mobi, page, sanitize, volume, webtoon, workspace};

/// Per-run outcome accumulators, printed as a single summary at the end.
#[derive(Debug, Default)]
pub struct Summary {
    pub already_exists: Vec<PathBuf>,
    pub already_processed_skipped: Vec<PathBuf>,
    pub already_processed_copied: Vec<PathBuf>,
    pub multi_processed_warning: Vec<PathBuf>,
    pub completed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Convert every input. Configuration problems abort the run before any
/// work; per-input failures are recorded and the run continues.
pub fn convert_all(inputs: &[PathBuf], config: Config, cancel: &CancelToken) -> Result<Summary> {
    let cfg = config.resolve()?;
    workspace::clean_stale_workdirs();

    let mut summary = Summary::default();
    for (index, input) in inputs.iter().enumerate() {
        cancel.check()?;
        log::info!(
            "working on ({}/{}) {}",
            index + 1,
            inputs.len(),
            input.display()
        );
        match convert_one(input, &cfg, cancel, &mut summary) {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                log::error!("{}: {e:#}", input.display());
                summary.failed.push((input.clone(), format!("{e:#}")));
            }
        }
    }
    Ok(summary)
}

fn check_tools(source: &Path, cfg: &ResolvedConfig) -> Result<()> {
    if let Some(kind) = archive::SourceKind::detect(source) {
        if kind.needs_7z() && !archive::is_7z_available() {
            return Err(Error::MissingTool("7z"));
        }
    }
    if cfg.format == OutputFormat::Mobi && !mobi::is_kindlegen_available() {
        return Err(Error::MissingTool("kindlegen"));
    }
    Ok(())
}

/// Pre-flight skip/copy policy. Returns true when the input is fully handled.
fn check_pre(source: &Path, cfg: &ResolvedConfig, summary: &mut Summary) -> Result<bool> {
    workspace::check_writable(source, cfg.opts.output.as_deref())?;

    let policy = cfg.opts.skip_existing;
    if policy.0 == 0 {
        return Ok(false);
    }
    let target = output_filename(source, cfg, "", true);
    if policy.skip_if_target_exists() && target.is_file() {
        log::warn!("file already exists, skipping: {}", target.display());
        summary.already_exists.push(source.to_path_buf());
        return Ok(true);
    }
    // a `_kcc` counter in the stem means the source itself is a previous run's
    // output
    let target_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if target_name.contains("_kcc") {
        if policy.skip_processed() {
            log::warn!("file was probably already processed, skipping");
            summary.already_processed_skipped.push(source.to_path_buf());
            return Ok(true);
        }
        if policy.copy_processed() && source.is_file() {
            log::warn!("file was probably already processed, copying as-is");
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, &target)?;
            summary.already_processed_copied.push(target);
            return Ok(true);
        }
    }
    Ok(false)
}

enum CorruptionVerdict {
    Clean,
    AlreadyProcessed,
}

/// Verify every image in the working tree, drop non-image files, count pages
/// smaller than the device resolution, and detect previous conversions.
fn detect_corruption(
    images_root: &Path,
    source: &Path,
    cfg: &ResolvedConfig,
) -> Result<CorruptionVerdict> {
    let mut image_count = 0usize;
    let mut smaller_count = 0usize;
    let mut already_processed = false;
    let (device_w, device_h) = cfg.resolution();

    for entry in walkdir::WalkDir::new(images_root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !archive::is_image_name(&name) {
            if name != "ComicInfo.xml" || !cfg.opts.copy_comic_info {
                fs::remove_file(entry.path())?;
            }
            continue;
        }
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&name);
        if stem.ends_with("-kcc") {
            already_processed = true;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(Error::CorruptImage {
                path: source.join(&name),
                reason: "zero-length file".to_string(),
            });
        }
        match imageproc::image::image_dimensions(entry.path()) {
            Ok((w, h)) => {
                image_count += 1;
                if device_w > w && device_h > h {
                    smaller_count += 1;
                }
            }
            Err(e) => {
                return Err(Error::CorruptImage {
                    path: source.join(&name),
                    reason: e.to_string(),
                })
            }
        }
    }

    if smaller_count * 4 > image_count && !cfg.opts.upscale && !cfg.opts.stretch {
        log::warn!(
            "more than 25% of images are smaller than the device resolution; \
             consider enabling stretching or upscaling"
        );
    }
    if already_processed {
        Ok(CorruptionVerdict::AlreadyProcessed)
    } else {
        Ok(CorruptionVerdict::Clean)
    }
}

fn base_title(source: &Path, cfg: &ResolvedConfig, info: &ComicInfo) -> String {
    match &cfg.opts.title {
        Some(title) => title.clone(),
        None => info.title().unwrap_or_else(|| {
            source
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "comic".to_string())
        }),
    }
}

fn volume_title(base: &str, number: usize, total: usize) -> String {
    if total <= 1 {
        base.to_string()
    } else if total > 9 {
        format!("{base} [{:02}/{:02}]", number, total)
    } else {
        format!("{base} [{number}/{total}]")
    }
}

/// Relative subpath used by `copysourcetree`: everything from the named
/// directory component down to the source's parent. A non-matching name maps
/// to the empty subpath.
fn copy_source_tree_subpath(source: &Path, tree_name: &str) -> PathBuf {
    let base = Path::new(tree_name.trim_end_matches(['/', '\\']))
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if base.is_empty() {
        return PathBuf::new();
    }
    let parent = match source.parent() {
        Some(p) => p,
        None => return PathBuf::new(),
    };
    let components: Vec<String> = parent
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    match components.iter().rposition(|c| *c == base) {
        Some(position) => components[position..].iter().collect(),
        None => PathBuf::new(),
    }
}

/// Final artifact path for one volume. With `check_exists` the name is
/// computed without the `_kcc` collision counter (used by the skip policy).
pub fn output_filename(
    source: &Path,
    cfg: &ResolvedConfig,
    tome_suffix: &str,
    check_exists: bool,
) -> PathBuf {
    let ext = cfg.output_extension();
    let pad = if cfg.opts.pad_zeros > 0 {
        cfg.opts.pad_zeros + 1
    } else {
        0
    };

    let stem = if cfg.profile.is_kobo() && cfg.format == OutputFormat::Epub && !source.is_dir() {
        // Kobo readers choke on punctuation in sideloaded names
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let clean: String = stem
            .split('.')
            .next()
            .unwrap_or("")
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if clean.is_empty() {
            "KCCPlaceholder".to_string()
        } else {
            clean
        }
    } else {
        source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "comic".to_string())
    };
    let file_name = format!("{stem}{tome_suffix}.{ext}");

    let mut filename = match &cfg.opts.output {
        Some(output) => {
            if output.to_string_lossy().ends_with(&format!(".{ext}")) {
                output.clone()
            } else {
                let subtree = cfg
                    .opts
                    .copy_source_tree
                    .as_deref()
                    .map(|name| copy_source_tree_subpath(source, name))
                    .unwrap_or_default();
                output.join(subtree).join(&file_name)
            }
        }
        None => source.with_file_name(&file_name),
    };

    if !check_exists && filename.is_file() {
        let stem_path = filename.with_extension("");
        let stem_str = stem_path.to_string_lossy().to_string();
        // .kepub.epub leaves a trailing .kepub after one with_extension
        let stem_str = stem_str
            .strip_suffix(".kepub")
            .unwrap_or(&stem_str)
            .to_string();
        let mut counter = 0usize;
        loop {
            let candidate = PathBuf::from(format!("{stem_str}_kcc{counter:0pad$}.{ext}"));
            if !candidate.is_file() {
                filename = candidate;
                break;
            }
            counter += 1;
        }
    }
    filename
}

fn remove_tree(path: &Path) {
    let _ = fs::remove_dir_all(path);
}

fn convert_one(
    source: &Path,
    cfg: &ResolvedConfig,
    cancel: &CancelToken,
    summary: &mut Summary,
) -> Result<()> {
    check_tools(source, cfg)?;
    if check_pre(source, cfg, summary)? {
        return Ok(());
    }

    log::info!("preparing source images");
    let workdir = workspace::prepare(source, true)?;
    let images_root = workspace::images_dir(&workdir);
    let run = (|| -> Result<()> {
        // ComicInfo metadata rides at the top of the image tree
        let info_path = images_root.join("ComicInfo.xml");
        let info = if info_path.is_file() {
            let info = ComicInfo::load(&info_path).unwrap_or_default();
            if !cfg.opts.copy_comic_info {
                fs::remove_file(&info_path)?;
            }
            info
        } else {
            ComicInfo::default()
        };

        log::info!("checking images");
        match detect_corruption(&images_root, source, cfg)? {
            CorruptionVerdict::AlreadyProcessed => {
                if cfg.opts.skip_existing.skip_processed() {
                    log::warn!("file was probably already processed, skipping");
                    summary.already_processed_skipped.push(source.to_path_buf());
                    return Ok(());
                }
                if cfg.opts.skip_existing.copy_processed() && source.is_file() {
                    log::warn!("file was probably already processed, copying as-is");
                    let target = output_filename(source, cfg, "", true);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(source, &target)?;
                    summary.already_processed_copied.push(target);
                    return Ok(());
                }
                if cfg.opts.skip_existing.warns_on_reprocess() {
                    log::warn!(
                        "source was probably already processed once; \
                         a second conversion will decrease quality"
                    );
                    summary
                        .multi_processed_warning
                        .push(output_filename(source, cfg, "", true));
                }
            }
            CorruptionVerdict::Clean => {}
        }
        cancel.check()?;

        if cfg.opts.webtoon {
            log::info!("splitting webtoon strips");
            let opts = webtoon::WebtoonOptions {
                target_height: cfg.resolution().1,
                merge: true,
                debug: false,
            };
            webtoon::process_tree(&images_root, &opts, cancel)?;
        }
        cancel.check()?;

        let sidecar = Sidecar::new();
        if cfg.opts.no_processing {
            log::info!("image processing disabled, keeping sources untouched");
        } else {
            log::info!("processing images");
            page::process_directory(&images_root, cfg, &sidecar, cancel)?;
        }
        cancel.check()?;

        let chapter_names = sanitize::sanitize_tree(&images_root)?;
        if cfg.profile.is_kobo() && cfg.format == OutputFormat::Cbz {
            sanitize::sanitize_tree_kobo(&images_root)?;
        }

        let volumes = if cfg.opts.batch_split > BatchSplit::Off {
            volume::split(&workdir, cfg)?
        } else {
            vec![workdir.clone()]
        };
        cancel.check()?;

        let base = base_title(source, cfg, &info);
        let total = volumes.len();
        let mut artifacts = Vec::with_capacity(total);
        for (index, volume_root) in volumes.iter().enumerate() {
            let number = index + 1;
            let meta = epub::BookMeta {
                title: volume_title(&base, number, total),
                uuid: Uuid::new_v4().to_string(),
                creators: info.creators(),
                summary: info.summary.clone(),
                chapter_names: chapter_names.clone(),
                bookmarks: info.bookmarks.clone(),
            };

            let tome_suffix = if total > 1 {
                let pad = if cfg.opts.pad_zeros > 0 {
                    cfg.opts.pad_zeros + 1
                } else {
                    0
                };
                format!(" {number:0pad$}")
            } else {
                String::new()
            };

            let zip_path = match cfg.format {
                OutputFormat::Cbz => {
                    log::info!("creating CBZ file");
                    cbz::build(volume_root, cfg)?
                }
                _ => {
                    log::info!("creating EPUB file");
                    epub::build(volume_root, cfg, &sidecar, &meta)?
                }
            };

            // MOBI conversion consumes an .epub artifact in place
            let deliver_ext = match cfg.format {
                OutputFormat::Mobi => "epub".to_string(),
                _ => cfg.output_extension().to_string(),
            };
            let target = output_filename(source, cfg, &tome_suffix, false);
            let target = if deliver_ext != cfg.output_extension() {
                target.with_extension(&deliver_ext)
            } else {
                target
            };
            if let Some(parent) = target.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    log::info!("recreating directory tree in the output directory");
                    fs::create_dir_all(parent)
                        .map_err(|_| Error::TargetNotWritable(parent.to_path_buf()))?;
                }
            }
            fs::copy(&zip_path, &target)?;
            let _ = fs::remove_file(&zip_path);
            remove_tree(volume_root);
            artifacts.push(target);
            cancel.check()?;
        }

        if cfg.format == OutputFormat::Mobi {
            log::info!("creating MOBI files");
            let produced = mobi::convert_batch(&artifacts)?;
            summary.completed.extend(produced);
        } else {
            summary.completed.extend(artifacts);
        }
        Ok(())
    })();

    // working trees never outlive the run, success or not
    remove_tree(&workdir);
    run
}
