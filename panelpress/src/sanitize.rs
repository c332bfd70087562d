//! Filename sanitization.
//!
//! Output trees must sort identically under natural (alphanumeric) and plain
//! lexicographic collation, because the spine order is derived from sorted
//! filenames. Slugs are deterministic, collisions resolve by appending `A`,
//! and the original directory names survive as chapter titles.

use walkdir::WalkDir;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Natural-order token: digit runs compare numerically, everything else as
/// lowercase text.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Token {
    Number(u128),
    Text(String),
}

fn natural_key(name: &str) -> Vec<Token> {
    let mut key = Vec::new();
    let mut buf = String::new();
    let mut digits = false;
    for c in name.chars() {
        if c.is_ascii_digit() != digits && !buf.is_empty() {
            key.push(make_token(&buf, digits));
            buf.clear();
        }
        digits = c.is_ascii_digit();
        buf.push(c);
    }
    if !buf.is_empty() {
        key.push(make_token(&buf, digits));
    }
    key
}

fn make_token(buf: &str, digits: bool) -> Token {
    if digits {
        match buf.parse::<u128>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Text(buf.to_string()),
        }
    } else {
        Token::Text(buf.to_lowercase())
    }
}

/// Compare two names under natural collation.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

pub fn natural_sort(names: &mut [String]) {
    names.sort_by(|a, b| natural_cmp(a, b));
}

/// Slugify a single path component. Directories additionally keep `_` and
/// interior dots. The first two numeric runs are zero-padded to at least four
/// digits so lexicographic order matches natural order.
pub fn slugify(value: &str, is_dir: bool) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_sep = false;
    for c in value.to_lowercase().chars() {
        let keep = c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || c == '-'
            || (is_dir && (c == '_' || c == '.'));
        if keep {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    let slug = slug.trim_matches(['-', '.']).to_string();
    pad_numeric_runs(&slug, 2)
}

/// Zero-pad the first `limit` numeric runs to four digits. Excess leading
/// zeros are stripped from every run that can keep four digits, so a later
/// run like `00050` still normalizes to `0050`; runs shorter than four
/// digits past the limit are left alone.
fn pad_numeric_runs(value: &str, limit: usize) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut padded = 0;
    let mut chars = value.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut run = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                run.push(d);
                chars.next();
            }
            if padded < limit {
                let trimmed = run.trim_start_matches('0');
                let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
                out.push_str(&format!("{:0>4}", trimmed));
                padded += 1;
            } else if run.len() >= 4 {
                let trimmed = run.trim_start_matches('0');
                out.push_str(&format!("{:0>4}", trimmed));
            } else {
                out.push_str(&run);
            }
        } else {
            out.push(c);
            chars.next();
        }
    }
    out
}

fn collide(dir: &Path, candidate: &str, original: &str) -> bool {
    if candidate.eq_ignore_ascii_case(original) {
        return false;
    }
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .any(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(candidate)),
        Err(_) => false,
    }
}

/// Sanitize every file and directory name under `root` (contents before
/// directories, so children are renamed while their parent path is still
/// valid). Returns the sanitized-directory-name → original-name map used for
/// chapter titles.
pub fn sanitize_tree(root: &Path) -> Result<HashMap<String, String>> {
    let mut chapter_names = HashMap::new();
    let entries: Vec<_> = WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path() != root)
        .collect();

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let parent = match path.parent() {
            Some(p) => p,
            None => continue,
        };

        if entry.file_type().is_file() {
            if name == "ComicInfo.xml" {
                continue;
            }
            let (stem, ext) = split_name(&name);
            let mut slug = slugify(stem, false);
            while collide(parent, &format!("{slug}{ext}"), &name) {
                slug.push('A');
            }
            let target = format!("{slug}{ext}");
            if target != name {
                fs::rename(path, parent.join(target))?;
            }
        } else if entry.file_type().is_dir() {
            let mut slug = slugify(&name, true);
            while collide(parent, &slug, &name) {
                slug.push('A');
            }
            chapter_names.insert(slug.clone(), name.clone());
            if slug != name {
                fs::rename(path, parent.join(slug))?;
            }
        }
    }
    Ok(chapter_names)
}

/// Kobo CBZ reader sorts strictly by name: replace every filename with a
/// 5-digit sequence number in natural reading order.
pub fn sanitize_tree_kobo(root: &Path) -> Result<()> {
    let mut page_number = 0usize;
    for (dir, files) in sorted_files_by_dir(root) {
        for name in files {
            if name == "ComicInfo.xml" {
                continue;
            }
            let (_, ext) = split_name(&name);
            let target = format!("{:05}{}", page_number, ext);
            page_number += 1;
            if target != name {
                fs::rename(dir.join(&name), dir.join(target))?;
            }
        }
    }
    Ok(())
}

/// Directories in natural order, each with its files in natural order.
pub fn sorted_files_by_dir(root: &Path) -> Vec<(std::path::PathBuf, Vec<String>)> {
    let mut dirs: Vec<std::path::PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));

    dirs.into_iter()
        .map(|dir| {
            let mut files: Vec<String> = fs::read_dir(&dir)
                .into_iter()
                .flatten()
                .flatten()
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            natural_sort(&mut files);
            (dir, files)
        })
        .collect()
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_is_idempotent() {
        for input in ["Page 12", "ch.3 - intro!!", "ÜBER page_007", "42"] {
            let once = slugify(input, false);
            assert_eq!(slugify(&once, false), once, "input {input:?}");
        }
    }

    #[test]
    fn numeric_runs_pad_to_four() {
        assert_eq!(slugify("page 1", false), "page-0001");
        assert_eq!(slugify("page 00123", false), "page-0123");
        assert_eq!(slugify("12345", false), "12345");
        assert_eq!(slugify("v2 ch3 p4", false), "v0002-ch0003-p4");
    }

    #[test]
    fn later_numeric_runs_drop_excess_zeros() {
        assert_eq!(slugify("v01_c001_p00050", false), "v0001-c0001-p0050");
        // short later runs stay untouched
        assert_eq!(slugify("v01_c001_p050", false), "v0001-c0001-p050");
        // idempotent on its own output
        assert_eq!(slugify("v0001-c0001-p0050", false), "v0001-c0001-p0050");
    }

    #[test]
    fn directories_keep_underscores_and_dots() {
        assert_eq!(slugify("Vol_1.5", true), "vol_0001.0005");
        assert_eq!(slugify("Vol_1.5", false), "vol-0001-0005");
    }

    #[test]
    fn natural_and_lexicographic_order_coincide_after_slugging() {
        let mut names: Vec<String> = ["page 2", "page 10", "page 1"]
            .iter()
            .map(|n| slugify(n, false))
            .collect();
        let mut lex = names.clone();
        natural_sort(&mut names);
        lex.sort();
        assert_eq!(names, lex);
        assert_eq!(names, vec!["page-0001", "page-0002", "page-0010"]);
    }

    #[test]
    fn natural_cmp_orders_digit_runs_numerically() {
        assert_eq!(natural_cmp("p9.jpg", "p10.jpg"), Ordering::Less);
        assert_eq!(natural_cmp("A2", "a10"), Ordering::Less);
    }

    #[test]
    fn tree_sanitization_resolves_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("Chapter 1");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("Page 1.jpg"), b"a").unwrap();
        // slugs to the same name as the previous file
        fs::write(dir.join("page_1.jpg"), b"b").unwrap();

        let chapters = sanitize_tree(tmp.path()).unwrap();
        assert_eq!(chapters.get("chapter-0001").map(String::as_str), Some("Chapter 1"));

        let mut names: Vec<String> = fs::read_dir(tmp.path().join("chapter-0001"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["page-0001.jpg", "page-0001A.jpg"]);
    }

    #[test]
    fn kobo_tree_uses_sequence_numbers() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.jpg"), b"x").unwrap();
        fs::write(tmp.path().join("a.png"), b"x").unwrap();
        sanitize_tree_kobo(tmp.path()).unwrap();
        let mut names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["00000.png", "00001.jpg"]);
    }
}
