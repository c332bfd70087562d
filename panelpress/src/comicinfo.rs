//! ComicInfo.xml metadata sidecar parsing.

use quick_xml::events::Event;
use quick_xml::Reader;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Fields read from a `ComicInfo.xml` found at the top of the image tree.
/// Bookmarks index pre-split pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComicInfo {
    pub series: Option<String>,
    pub volume: Option<String>,
    pub number: Option<String>,
    pub writers: Vec<String>,
    pub pencillers: Vec<String>,
    pub inkers: Vec<String>,
    pub colorists: Vec<String>,
    pub summary: Option<String>,
    pub bookmarks: Vec<(usize, String)>,
}

impl ComicInfo {
    pub fn load(path: &Path) -> Result<ComicInfo> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(xml: &str) -> Result<ComicInfo> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut info = ComicInfo::default();
        let mut element = Vec::new();
        loop {
            match reader.read_event().map_err(anyhow::Error::from)? {
                Event::Start(e) => element = e.name().as_ref().to_vec(),
                Event::End(_) => element.clear(),
                Event::Empty(e) if e.name().as_ref() == b"Page" => {
                    let mut image = None;
                    let mut bookmark = None;
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().map_err(anyhow::Error::from)?;
                        match attr.key.as_ref() {
                            b"Image" => image = value.parse::<usize>().ok(),
                            b"Bookmark" => bookmark = Some(value.into_owned()),
                            _ => {}
                        }
                    }
                    if let (Some(image), Some(bookmark)) = (image, bookmark) {
                        info.bookmarks.push((image, bookmark));
                    }
                }
                Event::Text(t) => {
                    let value = t.unescape().map_err(anyhow::Error::from)?.into_owned();
                    match element.as_slice() {
                        b"Series" => info.series = Some(value),
                        b"Volume" => info.volume = Some(value),
                        b"Number" => info.number = Some(value),
                        b"Writer" => info.writers = split_people(&value),
                        b"Penciller" => info.pencillers = split_people(&value),
                        b"Inker" => info.inkers = split_people(&value),
                        b"Colorist" => info.colorists = split_people(&value),
                        b"Summary" => info.summary = Some(value),
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        info.bookmarks.sort_by_key(|(index, _)| *index);
        Ok(info)
    }

    /// Book title from series/volume/number, or `None` when no series is set.
    pub fn title(&self) -> Option<String> {
        let mut title = self.series.clone()?;
        if let Some(volume) = &self.volume {
            title.push_str(&format!(" V{:0>2}", volume));
        }
        if let Some(number) = &self.number {
            title.push_str(&format!(" #{:0>3}", number));
        }
        Some(title)
    }

    /// De-duplicated, sorted creator list for `dc:creator` entries. Empty
    /// metadata falls back to the generator tag.
    pub fn creators(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self
            .writers
            .iter()
            .chain(&self.pencillers)
            .chain(&self.inkers)
            .chain(&self.colorists)
            .collect();
        if set.is_empty() {
            vec!["KCC".to_string()]
        } else {
            set.into_iter().cloned().collect()
        }
    }
}

fn split_people(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
