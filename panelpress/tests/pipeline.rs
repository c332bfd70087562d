//! End-to-end pipeline tests: synthesized comic archives in, EPUB packages
//! out. Runs are serialized because stale-workdir cleanup sweeps the shared
//! temp area.

use imageproc::image::{DynamicImage, GenericImageView, GrayImage, Luma};
use zip::CompressionMethod;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use panelpress::{BatchSplit, CancelToken, Config, OutputFormat, Preset, SkipPolicy, SplitStrategy};

static RUN_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    RUN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// White page with a content box inset by 10% on every side. The left half
/// is mostly dark, the right mostly light, and thin inverted stripes give
/// both halves a full histogram so auto-contrast keeps their means apart.
fn synth_page(width: u32, height: u32) -> DynamicImage {
    let mut img = GrayImage::from_pixel(width, height, Luma([250]));
    let (x0, x1) = (width / 10, width - width / 10);
    let (y0, y1) = (height / 10, height - height / 10);
    for y in y0..y1 {
        for x in x0..x1 {
            let left = x < width / 2;
            let stripe = (x / 4) % 16 == 0;
            let shade = match (left, stripe) {
                (true, false) => 20,
                (true, true) => 200,
                (false, false) => 200,
                (false, true) => 20,
            };
            img.put_pixel(x, y, Luma([shade]));
        }
    }
    DynamicImage::ImageLuma8(img)
}

fn encode_jpeg(img: &DynamicImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut encoder =
        imageproc::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 85);
    encoder.encode_image(img).unwrap();
    buffer
}

fn make_cbz(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

struct Epub {
    names: Vec<String>,
    archive: zip::ZipArchive<File>,
}

impl Epub {
    fn open(path: &Path) -> Epub {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let names = archive.file_names().map(str::to_string).collect();
        Epub { names, archive }
    }

    fn read(&mut self, name: &str) -> Vec<u8> {
        let mut data = Vec::new();
        self.archive
            .by_name(name)
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        data
    }

    fn read_text(&mut self, name: &str) -> String {
        String::from_utf8(self.read(name)).unwrap()
    }

    fn xhtml_pages(&self) -> Vec<String> {
        let mut pages: Vec<String> = self
            .names
            .iter()
            .filter(|n| n.starts_with("OEBPS/Text/") && n.ends_with(".xhtml"))
            .cloned()
            .collect();
        pages.sort();
        pages
    }
}

fn convert(inputs: &[PathBuf], config: Config) -> panelpress::Summary {
    panelpress::convert_all(inputs, config, &CancelToken::new()).unwrap()
}

fn attr_values(xml: &str, needle: &str) -> Vec<String> {
    // pull `needle="..."` occurrences in document order
    let mut values = Vec::new();
    let mut rest = xml;
    let pattern = format!("{needle}=\"");
    while let Some(found) = rest.find(&pattern) {
        let after = &rest[found + pattern.len()..];
        let end = after.find('"').unwrap();
        values.push(after[..end].to_string());
        rest = &after[end..];
    }
    values
}

#[test]
fn kv_epub_structure_and_resolution() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let cbz = tmp.path().join("Series v01.cbz");
    let page = encode_jpeg(&synth_page(1600, 2560));
    let entries: Vec<(String, Vec<u8>)> = (1..=4)
        .map(|i| (format!("page {i:02}.jpg"), page.clone()))
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(n, d)| (n.as_str(), d.clone()))
        .collect();
    make_cbz(&cbz, &borrowed);

    let out_dir = tmp.path().join("out");
    fs::create_dir(&out_dir).unwrap();
    let summary = convert(
        &[cbz],
        Config {
            profile: Preset::KV,
            format: OutputFormat::Epub,
            output: Some(out_dir),
            ..Config::default()
        },
    );
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.completed.len(), 1);
    let artifact = &summary.completed[0];
    assert_eq!(artifact.extension().unwrap(), "epub");

    let mut epub = Epub::open(artifact);

    // mimetype is the first entry, stored, with the exact media type
    {
        let entry = epub.archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "mimetype");
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }
    assert_eq!(epub.read_text("mimetype"), "application/epub+zip");
    assert!(epub.names.contains(&"META-INF/container.xml".to_string()));
    assert!(epub.names.contains(&"OEBPS/nav.xhtml".to_string()));
    assert!(epub.names.contains(&"OEBPS/toc.ncx".to_string()));
    assert!(epub.names.contains(&"OEBPS/Text/style.css".to_string()));

    // one XHTML per page
    assert_eq!(epub.xhtml_pages().len(), 4);

    let opf = epub.read_text("OEBPS/content.opf");
    // every spine itemref resolves to a manifest item whose file exists
    let ids = attr_values(&opf, "id");
    for idref in attr_values(&opf, "idref") {
        assert!(ids.contains(&idref), "unresolved spine idref {idref}");
    }
    for href in attr_values(&opf, "href") {
        let path = format!("OEBPS/{href}");
        assert!(epub.names.contains(&path), "manifest href {href} missing");
    }
    // LTR spine starts on the left leaf
    let spreads = attr_values(&opf, "properties");
    let first_spread = spreads
        .iter()
        .find(|p| p.starts_with("page-spread"))
        .unwrap();
    assert_eq!(first_spread, "page-spread-left");
    assert!(opf.contains("page-progression-direction=\"ltr\""));
    assert!(opf.contains("<meta name=\"fixed-layout\" content=\"true\"/>"));

    // images are device-resolution quantized JPEGs
    let image_name = epub
        .names
        .iter()
        .find(|n| n.starts_with("OEBPS/Images/page") && n.ends_with(".jpg"))
        .unwrap()
        .clone();
    let decoded = imageproc::image::load_from_memory(&epub.read(&image_name)).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1072, 1448));
}

#[test]
fn manga_spread_with_rotate_and_split() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let cbz = tmp.path().join("spread.cbz");
    make_cbz(
        &cbz,
        &[("p001.jpg", encode_jpeg(&synth_page(3200, 2400)))],
    );

    let summary = convert(
        &[cbz],
        Config {
            profile: Preset::KV,
            format: OutputFormat::Epub,
            manga_style: true,
            splitter: SplitStrategy::RotateAndSplit,
            ..Config::default()
        },
    );
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    let mut epub = Epub::open(&summary.completed[0]);

    // exactly three pages: -a (rotated), -b, -c
    let pages = epub.xhtml_pages();
    assert_eq!(pages.len(), 3);
    assert!(pages[0].ends_with("-kcc-a.xhtml"));
    assert!(pages[1].ends_with("-kcc-b.xhtml"));
    assert!(pages[2].ends_with("-kcc-c.xhtml"));

    let opf = epub.read_text("OEBPS/content.opf");
    assert!(opf.contains("page-progression-direction=\"rtl\""));
    // RTL: rotated page on the running side, -b pinned inside (right),
    // -c outside (left)
    let spreads: Vec<String> = attr_values(&opf, "properties")
        .into_iter()
        .filter(|p| p.starts_with("page-spread"))
        .collect();
    assert_eq!(
        spreads,
        vec!["page-spread-right", "page-spread-right", "page-spread-left"]
    );

    // in RTL the right half reads first: -b is the (brighter) right half
    let mean = |epub: &mut Epub, name: &str| -> f64 {
        let img = imageproc::image::load_from_memory(&epub.read(name))
            .unwrap()
            .to_luma8();
        img.pixels().map(|p| p.0[0] as f64).sum::<f64>() / (img.width() * img.height()) as f64
    };
    let b_name = epub
        .names
        .iter()
        .find(|n| n.contains("-kcc-b.jpg"))
        .unwrap()
        .clone();
    let c_name = b_name.replace("-kcc-b", "-kcc-c");
    assert!(mean(&mut epub, &b_name) > mean(&mut epub, &c_name));
}

#[test]
fn webtoon_mode_packs_bounded_pages() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("strips");
    fs::create_dir(&source).unwrap();
    for i in 1..=4 {
        let mut strip = GrayImage::from_pixel(200, 800, Luma([255]));
        for &(y0, y1) in &[(50u32, 350u32), (450, 750)] {
            for y in y0..y1 {
                for x in 20..180 {
                    strip.put_pixel(x, y, Luma([30]));
                }
            }
        }
        DynamicImage::ImageLuma8(strip)
            .save(source.join(format!("{i:02}.png")))
            .unwrap();
    }

    let summary = convert(
        &[source],
        Config {
            profile: Preset::KV,
            custom_width: Some(300),
            custom_height: Some(400),
            format: OutputFormat::Epub,
            webtoon: true,
            ..Config::default()
        },
    );
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    let mut epub = Epub::open(&summary.completed[0]);

    // the merged strip was split into several pages, one image each
    let pages = epub.xhtml_pages();
    assert!(pages.len() >= 4, "only {} pages", pages.len());
    let image_names: Vec<String> = epub
        .names
        .iter()
        .filter(|n| n.starts_with("OEBPS/Images/") && n.ends_with(".jpg"))
        .cloned()
        .collect();
    assert_eq!(image_names.len(), pages.len() + 1); // + cover copy
    for name in image_names {
        let img = imageproc::image::load_from_memory(&epub.read(&name)).unwrap();
        assert_eq!((img.width(), img.height()), (300, 400));
    }
}

#[test]
fn auto_volume_split_with_fresh_uuids() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("big");
    fs::create_dir(&source).unwrap();
    // noise pages compress badly, which keeps the per-page size meaningful
    let mut seed = 0x2545f491u32;
    for i in 0..8 {
        let noise = GrayImage::from_fn(400, 600, |_, _| {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            Luma([(seed >> 24) as u8])
        });
        DynamicImage::ImageLuma8(noise)
            .save(source.join(format!("p{i:02}.png")))
            .unwrap();
    }

    let summary = convert(
        &[source],
        Config {
            profile: Preset::KoC,
            format: OutputFormat::Epub,
            batch_split: BatchSplit::Auto,
            target_size: Some(1),
            no_processing: true,
            ..Config::default()
        },
    );
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    let total = summary.completed.len();
    assert!(total >= 2, "expected multiple volumes, got {total}");

    let mut uuids = Vec::new();
    for (index, artifact) in summary.completed.iter().enumerate() {
        let mut epub = Epub::open(artifact);
        let opf = epub.read_text("OEBPS/content.opf");
        assert!(
            opf.contains(&format!("[{}/{total}]", index + 1)),
            "missing volume suffix in {opf}"
        );
        let uuid = opf
            .split("urn:uuid:")
            .nth(1)
            .unwrap()
            .chars()
            .take(36)
            .collect::<String>();
        uuids.push(uuid);
    }
    uuids.sort();
    uuids.dedup();
    assert_eq!(uuids.len(), total, "volume UUIDs must be unique");
}

#[test]
fn already_processed_input_is_skipped() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let cbz = tmp.path().join("done.cbz");
    make_cbz(
        &cbz,
        &[("p001-kcc.jpg", encode_jpeg(&synth_page(300, 400)))],
    );

    let summary = convert(
        &[cbz.clone()],
        Config {
            profile: Preset::KoC,
            format: OutputFormat::Epub,
            skip_existing: SkipPolicy(2),
            ..Config::default()
        },
    );
    assert!(summary.completed.is_empty());
    assert_eq!(summary.already_processed_skipped, vec![cbz.clone()]);
    assert!(!cbz.with_extension("kepub.epub").exists());
}

#[test]
fn bookmarks_survive_page_splitting() {
    let _guard = lock();
    let tmp = tempfile::tempdir().unwrap();
    let cbz = tmp.path().join("booked.cbz");
    let comic_info = br#"<?xml version="1.0"?>
<ComicInfo>
  <Series>Booked</Series>
  <Pages>
    <Page Image="0" Bookmark="Start"/>
    <Page Image="2" Bookmark="Mid"/>
  </Pages>
</ComicInfo>"#;
    make_cbz(
        &cbz,
        &[
            ("p000.jpg", encode_jpeg(&synth_page(320, 480))),
            ("p001.jpg", encode_jpeg(&synth_page(960, 480))),
            ("p002.jpg", encode_jpeg(&synth_page(320, 480))),
            ("p003.jpg", encode_jpeg(&synth_page(320, 480))),
            ("ComicInfo.xml", comic_info.to_vec()),
        ],
    );

    let summary = convert(
        &[cbz],
        Config {
            profile: Preset::KV,
            format: OutputFormat::Epub,
            splitter: SplitStrategy::Split,
            ..Config::default()
        },
    );
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    let mut epub = Epub::open(&summary.completed[0]);

    // p001 split into -a/-b, so pre-split index 2 moved one page forward
    let ncx = epub.read_text("OEBPS/toc.ncx");
    assert!(ncx.contains("<text>Start</text>"));
    assert!(ncx.contains("src=\"Text/p0000-kcc.xhtml\""));
    assert!(ncx.contains("<text>Mid</text>"));
    assert!(ncx.contains("src=\"Text/p0002-kcc.xhtml\""));

    // metadata flowed into the OPF
    let opf = epub.read_text("OEBPS/content.opf");
    assert!(opf.contains("<dc:title>Booked</dc:title>"));
}
