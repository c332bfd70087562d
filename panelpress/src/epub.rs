//! Fixed-layout EPUB assembly.
//!
//! Emits the complete package skeleton per volume: `mimetype` (stored,
//! first), `META-INF/container.xml`, `OEBPS/content.opf`, `OEBPS/toc.ncx`,
//! `OEBPS/nav.xhtml`, `OEBPS/Text/style.css` and one XHTML page per image,
//! mirroring the directory structure under `OEBPS/Text`.

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::sanitize::natural_cmp;
use crate::sidecar::{Sidecar, TagSet};
use crate::workspace;

pub const GENERATOR: &str = concat!("KindleComicConverter-", env!("CARGO_PKG_VERSION"));

/// Per-volume book metadata.
#[derive(Debug, Clone, Default)]
pub struct BookMeta {
    pub title: String,
    pub uuid: String,
    pub creators: Vec<String>,
    pub summary: Option<String>,
    /// sanitized directory name -> original chapter title
    pub chapter_names: HashMap<String, String>,
    /// pre-split page index -> chapter title, from ComicInfo bookmarks
    pub bookmarks: Vec<(usize, String)>,
}

/// One image page of the volume, in reading order.
#[derive(Debug, Clone)]
struct PageEntry {
    /// path relative to `OEBPS/Images`
    rel: PathBuf,
    stem: String,
    ext: String,
    dimensions: (u32, u32),
    tags: TagSet,
}

impl PageEntry {
    fn uid(&self) -> String {
        let mut uid = String::new();
        for part in self.rel.parent().into_iter().flat_map(|p| p.components()) {
            uid.push_str(&part.as_os_str().to_string_lossy());
            uid.push('_');
        }
        uid.push_str(&self.stem);
        uid
    }

    /// Directory components between `Images` and the file.
    fn subdirs(&self) -> Vec<String> {
        self.rel
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn media_type(&self) -> &'static str {
        if self.ext.eq_ignore_ascii_case("png") {
            "image/png"
        } else {
            "image/jpeg"
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn collect_pages(images_root: &Path, sidecar: &Sidecar) -> Result<Vec<PageEntry>> {
    let mut pages = Vec::new();
    for (dir, files) in crate::sanitize::sorted_files_by_dir(images_root) {
        for name in files {
            if !crate::archive::is_image_name(&name) {
                continue;
            }
            let path = dir.join(&name);
            let rel = path
                .strip_prefix(images_root)
                .map_err(|_| Error::UnsupportedSource(path.clone()))?
                .to_path_buf();
            let dimensions = imageproc::image::image_dimensions(&path)?;
            let tags = sidecar.get(&Sidecar::fingerprint_file(&path)?);
            let (stem, ext) = match name.rfind('.') {
                Some(i) => (name[..i].to_string(), name[i + 1..].to_string()),
                None => (name.clone(), String::new()),
            };
            pages.push(PageEntry {
                rel,
                stem,
                ext,
                dimensions,
                tags,
            });
        }
    }
    if pages.is_empty() {
        return Err(Error::EmptySource);
    }
    Ok(pages)
}

/// Chapter heads: `(page index, title)`.
fn chapters(pages: &[PageEntry], meta: &BookMeta) -> Vec<(usize, String)> {
    let tree_is_flat = pages.iter().all(|p| p.subdirs().is_empty());
    if tree_is_flat && !meta.bookmarks.is_empty() {
        return reindex_bookmarks(pages, &meta.bookmarks);
    }

    let mut chapters = Vec::new();
    let mut last_dir: Option<Vec<String>> = None;
    for (index, page) in pages.iter().enumerate() {
        let dir = page.subdirs();
        if last_dir.as_ref() != Some(&dir) {
            let title = dir
                .last()
                .and_then(|d| meta.chapter_names.get(d))
                .cloned()
                .unwrap_or_else(|| meta.title.clone());
            chapters.push((index, title));
            last_dir = Some(dir);
        }
    }
    chapters
}

/// Map pre-split bookmark indices onto the post-split page list: every `-b`
/// page generated at or before the target shifts it forward, and a bookmark
/// landing on a `-c` half steps back to its `-b`.
fn reindex_bookmarks(pages: &[PageEntry], bookmarks: &[(usize, String)]) -> Vec<(usize, String)> {
    let mut chapters = Vec::new();
    let mut global_diff = 0i64;
    for (original, title) in bookmarks {
        let mut index = *original as i64;
        let scan_end = (*original as i64 + global_diff + 1).clamp(0, pages.len() as i64);
        for page in &pages[..scan_end as usize] {
            if page.stem.ends_with("-kcc-b") {
                index += 1;
            }
        }
        index = index.clamp(0, pages.len() as i64 - 1);
        if pages[index as usize].stem.ends_with("-kcc-c") {
            index -= 1;
        }
        let index = index.clamp(0, pages.len() as i64 - 1) as usize;
        chapters.push((index, title.clone()));
        global_diff = index as i64 - (*original as i64 + global_diff);
    }
    chapters
}

fn style_css(cfg: &ResolvedConfig) -> String {
    let mut css = String::from(
        "@page {\nmargin: 0;\n}\nbody {\ndisplay: block;\nmargin: 0;\npadding: 0;\n}\n",
    );
    if cfg.is_kindle && cfg.panel_view {
        css.push_str(concat!(
            "#PV {\nposition: absolute;\nwidth: 100%;\nheight: 100%;\ntop: 0;\nleft: 0;\n}\n",
            "#PV-T {\ntop: 0;\nwidth: 100%;\nheight: 50%;\n}\n",
            "#PV-B {\nbottom: 0;\nwidth: 100%;\nheight: 50%;\n}\n",
            "#PV-L {\nleft: 0;\nwidth: 49.5%;\nheight: 100%;\nfloat: left;\n}\n",
            "#PV-R {\nright: 0;\nwidth: 49.5%;\nheight: 100%;\nfloat: right;\n}\n",
            "#PV-TL {\ntop: 0;\nleft: 0;\nwidth: 49.5%;\nheight: 50%;\nfloat: left;\n}\n",
            "#PV-TR {\ntop: 0;\nright: 0;\nwidth: 49.5%;\nheight: 50%;\nfloat: right;\n}\n",
            "#PV-BL {\nbottom: 0;\nleft: 0;\nwidth: 49.5%;\nheight: 50%;\nfloat: left;\n}\n",
            "#PV-BR {\nbottom: 0;\nright: 0;\nwidth: 49.5%;\nheight: 50%;\nfloat: right;\n}\n",
            ".PV-P {\nwidth: 100%;\nheight: 100%;\ntop: 0;\nposition: absolute;\ndisplay: none;\n}\n",
        ));
    }
    css
}

fn top_margin(device_height: u32, frame_height: u32) -> String {
    let y = ((device_height as i64 - frame_height as i64) / 2) as f64 / device_height as f64
        * 100.0;
    format!("{:.1}", (y * 10.0).round() / 10.0)
}

/// Magnified image size for Panel View.
fn panel_view_size(cfg: &ResolvedConfig, image: (u32, u32)) -> (u32, u32) {
    let device = cfg.resolution();
    if cfg.opts.autoscale {
        let scale = device.0 as f64 / image.0 as f64;
        (device.0, (scale * image.1 as f64) as u32)
    } else if cfg.opts.hq {
        image
    } else {
        (
            (image.0 as f64 * 1.5) as u32,
            (image.1 as f64 * 1.5) as u32,
        )
    }
}

/// Tap order, numbered from first to last tap, as a function of layout,
/// reading direction and rotation.
fn tap_order(boxes: &[&str], manga_style: bool, rotated: bool) -> Vec<u32> {
    match boxes.len() {
        4 => match (manga_style, rotated) {
            (false, false) => vec![1, 2, 3, 4],
            (true, false) => vec![2, 1, 4, 3],
            (false, true) => vec![2, 4, 1, 3],
            (true, true) => vec![1, 3, 2, 4],
        },
        2 if boxes[0] == "PV-T" => match (manga_style, rotated) {
            (false, true) => vec![2, 1],
            _ => vec![1, 2],
        },
        2 => match (manga_style, rotated) {
            (true, false) => vec![2, 1],
            _ => vec![1, 2],
        },
        _ => Vec::new(),
    }
}

fn panel_view_block(
    cfg: &ResolvedConfig,
    page: &PageEntry,
    img_src: &str,
    additional_style: &str,
) -> String {
    let device = cfg.resolution();
    let size = panel_view_size(cfg, page.dimensions);
    let no_horizontal = (size.0 as f64 - device.0 as f64) < device.0 as f64 * 0.01;
    let no_vertical = (size.1 as f64 - device.1 as f64) < device.1 as f64 * 0.01;

    let boxes: &[&str] = match (no_horizontal, no_vertical) {
        (false, false) => &["PV-TL", "PV-TR", "PV-BL", "PV-BR"],
        (true, false) => &["PV-T", "PV-B"],
        (false, true) => &["PV-L", "PV-R"],
        (true, true) => &[],
    };
    if boxes.is_empty() {
        return String::new();
    }
    let order = tap_order(boxes, cfg.opts.manga_style, page.tags.rotated);

    let x = ((device.0 as i64 / 2 - size.0 as i64 / 2) as f64 / device.0 as f64 * 100.0) as i64;
    let y = ((device.1 as i64 / 2 - size.1 as i64 / 2) as f64 / device.1 as f64 * 100.0) as i64;
    let box_style = |name: &str| -> String {
        match name {
            "PV-TL" => "position:absolute;left:0;top:0;".to_string(),
            "PV-TR" => "position:absolute;right:0;top:0;".to_string(),
            "PV-BL" => "position:absolute;left:0;bottom:0;".to_string(),
            "PV-BR" => "position:absolute;right:0;bottom:0;".to_string(),
            "PV-T" => format!("position:absolute;top:0;left:{x}%;"),
            "PV-B" => format!("position:absolute;bottom:0;left:{x}%;"),
            "PV-L" => format!("position:absolute;left:0;top:{y}%;"),
            _ => format!("position:absolute;right:0;top:{y}%;"),
        }
    };

    let mut block = String::from("<div id=\"PV\">\n");
    for (name, ordinal) in boxes.iter().zip(&order) {
        let _ = write!(
            block,
            "<div id=\"{name}\">\n<a style=\"display:inline-block;width:100%;height:100%;\" \
             class=\"app-amzn-magnify\" \
             data-app-amzn-magnify='{{\"targetId\":\"{name}-P\", \"ordinal\":{ordinal}}}'></a>\n</div>\n"
        );
    }
    block.push_str("</div>\n");
    for name in boxes {
        let _ = write!(
            block,
            "<div class=\"PV-P\" id=\"{name}-P\" style=\"{additional_style}\">\n\
             <img style=\"{}\" src=\"{img_src}\" width=\"{}\" height=\"{}\"/>\n</div>\n",
            box_style(name),
            size.0,
            size.1
        );
    }
    block
}

fn page_xhtml(cfg: &ResolvedConfig, page: &PageEntry) -> String {
    let backref = page.subdirs().len() + 1;
    let (w, h) = page.dimensions;
    let frame = if cfg.opts.hq {
        ((w as f64 / 1.5) as u32, (h as f64 / 1.5) as u32)
    } else {
        (w, h)
    };
    let additional_style = if page.tags.black_background {
        "background-color:#000000;"
    } else {
        ""
    };
    let postfix = page
        .subdirs()
        .iter()
        .map(|d| format!("{d}/"))
        .collect::<String>();
    let img_src = format!("{}Images/{}{}.{}", "../".repeat(backref), postfix, page.stem, page.ext);
    let device_height = cfg.resolution().1;

    let mut xhtml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head>\n\
         <title>{title}</title>\n\
         <link href=\"{cssref}style.css\" type=\"text/css\" rel=\"stylesheet\"/>\n\
         <meta name=\"viewport\" content=\"width={w}, height={h}\"/>\n\
         </head>\n\
         <body style=\"{style}\">\n\
         <div style=\"text-align:center;top:{top}%;\">\n\
         <img width=\"{fw}\" height=\"{fh}\" src=\"{src}\"/>\n</div>\n",
        title = escape(&page.stem),
        cssref = "../".repeat(backref - 1),
        style = additional_style,
        top = top_margin(device_height, frame.1),
        fw = frame.0,
        fh = frame.1,
        src = img_src,
    );
    if cfg.is_kindle && cfg.panel_view {
        xhtml.push_str(&panel_view_block(cfg, page, &img_src, additional_style));
    }
    xhtml.push_str("</body>\n</html>\n");
    xhtml
}

fn ncx(meta: &BookMeta, pages: &[PageEntry], chapter_heads: &[(usize, String)]) -> String {
    let mut nav_points = String::new();
    for (index, title) in chapter_heads {
        let page = &pages[*index];
        let _ = write!(
            nav_points,
            "<navPoint id=\"{id}\"><navLabel><text>{title}</text></navLabel>\
             <content src=\"Text/{href}.xhtml\"/></navPoint>\n",
            id = page.uid(),
            title = escape(title),
            href = page.rel.with_extension("").to_string_lossy().replace('\\', "/"),
        );
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ncx version=\"2005-1\" xml:lang=\"en-US\" xmlns=\"http://www.daisy.org/z3986/2005/ncx/\">\n\
         <head>\n\
         <meta name=\"dtb:uid\" content=\"urn:uuid:{uuid}\"/>\n\
         <meta name=\"dtb:depth\" content=\"1\"/>\n\
         <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n\
         <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n\
         <meta name=\"generated\" content=\"true\"/>\n\
         </head>\n\
         <docTitle><text>{title}</text></docTitle>\n\
         <navMap>\n{nav_points}</navMap>\n</ncx>",
        uuid = meta.uuid,
        title = escape(&meta.title),
    )
}

fn nav(meta: &BookMeta, pages: &[PageEntry], chapter_heads: &[(usize, String)]) -> String {
    let mut items = String::new();
    for (index, title) in chapter_heads {
        let page = &pages[*index];
        let _ = write!(
            items,
            "<li><a href=\"Text/{href}.xhtml\">{title}</a></li>\n",
            href = page.rel.with_extension("").to_string_lossy().replace('\\', "/"),
            title = escape(title),
        );
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head>\n<title>{title}</title>\n<meta charset=\"utf-8\"/>\n</head>\n\
         <body>\n\
         <nav xmlns:epub=\"http://www.idpf.org/2007/ops\" epub:type=\"toc\" id=\"toc\">\n\
         <ol>\n{items}</ol>\n</nav>\n\
         <nav epub:type=\"page-list\">\n<ol>\n{items}</ol>\n</nav>\n\
         </body>\n</html>",
        title = escape(&meta.title),
    )
}

/// Spine side assignment: alternation starts on the side matching the
/// reading direction; `-b` halves pin to the inside of the spread and `-c`
/// to the outside without flipping the running alternation.
fn spine_side(stem: &str, running: &mut &'static str, manga_style: bool) -> &'static str {
    let (inside, outside) = if manga_style {
        ("right", "left")
    } else {
        ("left", "right")
    };
    if stem.ends_with("-kcc-b") {
        inside
    } else if stem.ends_with("-kcc-c") {
        outside
    } else {
        let side = *running;
        *running = if side == "left" { "right" } else { "left" };
        side
    }
}

fn opf(
    cfg: &ResolvedConfig,
    meta: &BookMeta,
    pages: &[PageEntry],
    cover_ext: &str,
    modified: &str,
) -> String {
    let device = cfg.resolution();
    let writing_mode = if cfg.opts.manga_style {
        "horizontal-rl"
    } else {
        "horizontal-lr"
    };

    let mut metadata = format!(
        "<dc:title>{title}</dc:title>\n\
         <dc:language>en-US</dc:language>\n\
         <dc:identifier id=\"BookID\">urn:uuid:{uuid}</dc:identifier>\n\
         <dc:contributor id=\"contributor\">{generator}</dc:contributor>\n",
        title = escape(&meta.title),
        uuid = meta.uuid,
        generator = GENERATOR,
    );
    if let Some(summary) = &meta.summary {
        let _ = write!(metadata, "<dc:description>{}</dc:description>\n", escape(summary));
    }
    for creator in &meta.creators {
        let _ = write!(metadata, "<dc:creator>{}</dc:creator>\n", escape(creator));
    }
    let _ = write!(
        metadata,
        "<meta property=\"dcterms:modified\">{modified}</meta>\n\
         <meta name=\"cover\" content=\"cover\"/>\n"
    );
    if cfg.is_kindle && !cfg.profile.custom {
        let border = cfg
            .opts
            .border_color
            .map(|c| format!("#{:02X}{:02X}{:02X}", c.0[0], c.0[1], c.0[2]))
            .unwrap_or_else(|| "#FFFFFF".to_string());
        let _ = write!(
            metadata,
            "<meta name=\"fixed-layout\" content=\"true\"/>\n\
             <meta name=\"original-resolution\" content=\"{w}x{h}\"/>\n\
             <meta name=\"book-type\" content=\"comic\"/>\n\
             <meta name=\"primary-writing-mode\" content=\"{writing_mode}\"/>\n\
             <meta name=\"zero-gutter\" content=\"true\"/>\n\
             <meta name=\"zero-margin\" content=\"true\"/>\n\
             <meta name=\"ke-border-color\" content=\"{border}\"/>\n\
             <meta name=\"ke-border-width\" content=\"0\"/>\n",
            w = device.0,
            h = device.1,
        );
        if cfg.kfx {
            metadata.push_str(
                "<meta name=\"orientation-lock\" content=\"none\"/>\n\
                 <meta name=\"region-mag\" content=\"false\"/>\n",
            );
        } else {
            metadata.push_str(
                "<meta name=\"orientation-lock\" content=\"portrait\"/>\n\
                 <meta name=\"region-mag\" content=\"true\"/>\n",
            );
        }
    } else {
        metadata.push_str(
            "<meta property=\"rendition:orientation\">portrait</meta>\n\
             <meta property=\"rendition:spread\">portrait</meta>\n\
             <meta property=\"rendition:layout\">pre-paginated</meta>\n",
        );
    }

    let mut manifest = String::from(
        "<item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n\
         <item id=\"nav\" href=\"nav.xhtml\" properties=\"nav\" media-type=\"application/xhtml+xml\"/>\n",
    );
    let cover_media = if cover_ext.eq_ignore_ascii_case("png") {
        "image/png"
    } else {
        "image/jpeg"
    };
    let _ = write!(
        manifest,
        "<item id=\"cover\" href=\"Images/cover.{cover_ext}\" media-type=\"{cover_media}\" \
         properties=\"cover-image\"/>\n"
    );
    for page in pages {
        let uid = page.uid();
        let folder = page
            .subdirs()
            .iter()
            .map(|d| format!("{d}/"))
            .collect::<String>();
        let _ = write!(
            manifest,
            "<item id=\"page_{uid}\" href=\"Text/{folder}{stem}.xhtml\" \
             media-type=\"application/xhtml+xml\"/>\n\
             <item id=\"img_{uid}\" href=\"Images/{folder}{stem}.{ext}\" media-type=\"{mt}\"/>\n",
            stem = page.stem,
            ext = page.ext,
            mt = page.media_type(),
        );
    }
    manifest.push_str("<item id=\"css\" href=\"Text/style.css\" media-type=\"text/css\"/>\n");

    let direction = if cfg.opts.manga_style { "rtl" } else { "ltr" };
    let mut spine = String::new();
    let mut running: &'static str = if cfg.opts.manga_style { "right" } else { "left" };
    for page in pages {
        if cfg.is_kindle {
            let side = spine_side(&page.stem, &mut running, cfg.opts.manga_style);
            let _ = write!(
                spine,
                "<itemref idref=\"page_{}\" linear=\"yes\" properties=\"page-spread-{side}\"/>\n",
                page.uid(),
            );
        } else {
            let _ = write!(spine, "<itemref idref=\"page_{}\"/>\n", page.uid());
        }
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <package version=\"3.0\" unique-identifier=\"BookID\" xmlns=\"http://www.idpf.org/2007/opf\">\n\
         <metadata xmlns:opf=\"http://www.idpf.org/2007/opf\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n\
         {metadata}</metadata>\n\
         <manifest>\n{manifest}</manifest>\n\
         <spine page-progression-direction=\"{direction}\" toc=\"ncx\">\n{spine}</spine>\n\
         </package>\n"
    )
}

const CONTAINER_XML: &str = "<?xml version=\"1.0\"?>\n\
<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n\
<rootfiles>\n\
<rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n\
</rootfiles>\n\
</container>";

/// `dcterms:modified` timestamp, `YYYY-MM-DDTHH:MM:SSZ`.
fn modified_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Write the complete EPUB tree for one volume.
pub fn write_tree(
    volume_root: &Path,
    cfg: &ResolvedConfig,
    sidecar: &Sidecar,
    meta: &BookMeta,
) -> Result<()> {
    let oebps = volume_root.join("OEBPS");
    let images_root = workspace::images_dir(volume_root);
    let text_root = oebps.join("Text");
    fs::create_dir_all(&text_root)?;

    fs::write(text_root.join("style.css"), style_css(cfg))?;

    let pages = collect_pages(&images_root, sidecar)?;
    for page in &pages {
        let mut dir = text_root.clone();
        for sub in page.subdirs() {
            dir = dir.join(sub);
        }
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{}.xhtml", page.stem)),
            page_xhtml(cfg, page),
        )?;
    }

    // cover is a copy of the first page of the volume
    let first = &pages[0];
    let cover_ext = first.ext.clone();
    fs::copy(
        images_root.join(&first.rel),
        images_root.join(format!("cover.{cover_ext}")),
    )?;

    let chapter_heads = chapters(&pages, meta);
    fs::write(oebps.join("toc.ncx"), ncx(meta, &pages, &chapter_heads))?;
    fs::write(oebps.join("nav.xhtml"), nav(meta, &pages, &chapter_heads))?;
    fs::write(
        oebps.join("content.opf"),
        opf(cfg, meta, &pages, &cover_ext, &modified_timestamp()),
    )?;

    let meta_inf = volume_root.join("META-INF");
    fs::create_dir_all(&meta_inf)?;
    fs::write(meta_inf.join("container.xml"), CONTAINER_XML)?;
    Ok(())
}

/// Zip `basedir` into `zip_path`. EPUB packages get the `mimetype` entry
/// first, stored uncompressed; everything else is deflated.
pub fn zip_tree(zip_path: &Path, basedir: &Path, is_epub: bool) -> Result<()> {
    let file = File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    if is_epub {
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(basedir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));

    for path in files {
        let rel = path
            .strip_prefix(basedir)
            .map_err(|_| Error::UnsupportedSource(path.clone()))?
            .to_string_lossy()
            .replace('\\', "/");
        zip.start_file(&rel, deflated)?;
        zip.write_all(&fs::read(&path)?)?;
    }
    zip.finish()?;
    Ok(())
}

/// Assemble and package one volume; returns the produced zip path
/// (`<volume_root>_comic.zip`).
pub fn build(
    volume_root: &Path,
    cfg: &ResolvedConfig,
    sidecar: &Sidecar,
    meta: &BookMeta,
) -> Result<PathBuf> {
    write_tree(volume_root, cfg, sidecar, meta)?;
    let zip_path = volume_root.with_file_name(format!(
        "{}_comic.zip",
        volume_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "volume".to_string())
    ));
    zip_tree(&zip_path, volume_root, true)?;
    Ok(zip_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::profile::Preset;

    fn entry(stem: &str) -> PageEntry {
        PageEntry {
            rel: PathBuf::from(format!("{stem}.jpg")),
            stem: stem.to_string(),
            ext: "jpg".to_string(),
            dimensions: (1072, 1448),
            tags: TagSet::default(),
        }
    }

    fn kindle_cfg(manga: bool) -> ResolvedConfig {
        Config {
            profile: Preset::KV,
            manga_style: manga,
            ..Config::default()
        }
        .resolve()
        .unwrap()
    }

    #[test]
    fn spine_alternates_from_reading_side() {
        let mut running = "left";
        assert_eq!(spine_side("p1-kcc", &mut running, false), "left");
        assert_eq!(spine_side("p2-kcc", &mut running, false), "right");
        assert_eq!(spine_side("p3-kcc", &mut running, false), "left");
    }

    #[test]
    fn split_halves_pin_to_the_spread() {
        // LTR: -b inside = left, -c outside = right, alternation untouched
        let mut running = "left";
        assert_eq!(spine_side("p1-kcc", &mut running, false), "left");
        assert_eq!(spine_side("p2-kcc-a", &mut running, false), "right");
        assert_eq!(spine_side("p2-kcc-b", &mut running, false), "left");
        assert_eq!(spine_side("p2-kcc-c", &mut running, false), "right");
        assert_eq!(spine_side("p3-kcc", &mut running, false), "left");

        // RTL mirrors the pinning
        let mut running = "right";
        assert_eq!(spine_side("p1-kcc-b", &mut running, true), "right");
        assert_eq!(spine_side("p1-kcc-c", &mut running, true), "left");
        assert_eq!(spine_side("p2-kcc", &mut running, true), "right");
    }

    #[test]
    fn tap_order_matches_layout_table() {
        let quad = ["PV-TL", "PV-TR", "PV-BL", "PV-BR"];
        assert_eq!(tap_order(&quad, false, false), vec![1, 2, 3, 4]);
        assert_eq!(tap_order(&quad, true, false), vec![2, 1, 4, 3]);
        assert_eq!(tap_order(&quad, false, true), vec![2, 4, 1, 3]);
        assert_eq!(tap_order(&quad, true, true), vec![1, 3, 2, 4]);
        assert_eq!(tap_order(&["PV-T", "PV-B"], false, true), vec![2, 1]);
        assert_eq!(tap_order(&["PV-T", "PV-B"], true, true), vec![1, 2]);
        assert_eq!(tap_order(&["PV-L", "PV-R"], true, false), vec![2, 1]);
        assert_eq!(tap_order(&["PV-L", "PV-R"], false, false), vec![1, 2]);
    }

    #[test]
    fn bookmark_reindex_accounts_for_inserted_halves() {
        // pre-split pages 0..=5; page 1 and 3 were spreads split into a/b
        let pages = vec![
            entry("p0-kcc"),
            entry("p1-kcc-a"),
            entry("p1-kcc-b"),
            entry("p2-kcc"),
            entry("p3-kcc-a"),
            entry("p3-kcc-b"),
            entry("p4-kcc"),
        ];
        let bookmarks = vec![(0, "One".to_string()), (3, "Two".to_string())];
        let chapters = reindex_bookmarks(&pages, &bookmarks);
        assert_eq!(chapters[0].0, 0);
        // pre-split index 3 = p3: one -b inserted before, lands on p3-kcc-a
        assert_eq!(chapters[1].0, 4);
    }

    #[test]
    fn bookmark_on_continuation_half_steps_back() {
        let pages = vec![
            entry("p0-kcc-a"),
            entry("p0-kcc-b"),
            entry("p0-kcc-c"),
            entry("p1-kcc"),
        ];
        let chapters = reindex_bookmarks(&pages, &[(2, "Ch".to_string())]);
        // lands on the -c page, steps back to its -b
        assert_eq!(chapters[0].0, 1);
    }

    #[test]
    fn top_margin_centers_short_pages() {
        assert_eq!(top_margin(1448, 1448), "0.0");
        assert_eq!(top_margin(1448, 1000), "15.5");
    }

    #[test]
    fn xhtml_references_one_image() {
        let cfg = kindle_cfg(false);
        let page = entry("p0-kcc");
        let xhtml = page_xhtml(&cfg, &page);
        assert!(xhtml.contains("src=\"../Images/p0-kcc.jpg\""));
        assert!(xhtml.contains("width=1072, height=1448"));
        // full-size page on KV: magnified view exceeds the panel both ways
        assert!(xhtml.contains("PV-TL"));
    }

    #[test]
    fn epub3_metadata_for_non_kindle() {
        let cfg = Config {
            profile: Preset::KoC,
            ..Config::default()
        }
        .resolve()
        .unwrap();
        let meta = BookMeta {
            title: "Test".to_string(),
            uuid: "0000".to_string(),
            creators: vec!["KCC".to_string()],
            ..BookMeta::default()
        };
        let pages = vec![entry("p0-kcc")];
        let opf = opf(&cfg, &meta, &pages, "jpg", "2026-01-01T00:00:00Z");
        assert!(opf.contains("rendition:layout\">pre-paginated"));
        assert!(!opf.contains("fixed-layout"));
        assert!(!opf.contains("page-spread"));
        assert!(opf.contains("page-progression-direction=\"ltr\""));
    }

    #[test]
    fn modified_timestamp_shape() {
        let ts = modified_timestamp();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
    }
}
