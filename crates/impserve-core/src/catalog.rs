//! IMP catalog cache.
//!
//! Discovers `.imp` books under one or more shelf directories and keeps an
//! incrementally refreshed map from file path to the metadata found in each
//! book's binary header.
//!
//! ## Header layout
//!
//! ```text
//! 0x00 0x02 "BOOKDOUG"   10-byte magic
//! <38 bytes>             skipped
//! id\0                   field A, used in book-fetch URLs
//! category\0             field B
//! <string>\0 title\0     field C, after skipping one string
//! <string>\0 <string>\0 author\0
//!                        field D, after skipping two strings
//! ```

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use encoding_rs::WINDOWS_1252;
use walkdir::WalkDir;

/// Magic prefix of every IMP file.
pub const IMP_MAGIC: &[u8; 10] = b"\x00\x02BOOKDOUG";

/// File extension (lowercase) of books picked up by a shelf scan.
pub const IMP_EXTENSION: &str = ".imp";

/// Bytes between the magic and the first metadata string.
const HEADER_SKIP: usize = 38;

/// A book found on a shelf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbookRecord {
    /// Absolute path of the book file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Modification time at parse time.
    pub modified: SystemTime,
    /// Catalog identifier used in book-fetch URLs.
    pub id: String,
    /// Category string.
    pub category: String,
    /// Book title.
    pub title: String,
    /// Author string.
    pub author: String,
}

/// The catalog, ordered by path.
pub type Catalog = BTreeMap<PathBuf, EbookRecord>;

/// Parses the header of an IMP file.
///
/// Returns `None` when the file is missing, unreadable, does not start with
/// [`IMP_MAGIC`] or ends before all metadata strings are read.
pub fn parse_record(path: &Path) -> Option<EbookRecord> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let modified = metadata.modified().ok()?;

    let mut reader = BufReader::new(File::open(path).ok()?);

    let mut magic = [0u8; IMP_MAGIC.len()];
    reader.read_exact(&mut magic).ok()?;
    if &magic != IMP_MAGIC {
        tracing::debug!("Not an IMP file (bad magic): {}", path.display());
        return None;
    }

    let mut skipped = [0u8; HEADER_SKIP];
    reader.read_exact(&mut skipped).ok()?;

    let id = read_cstring(&mut reader, 0)?;
    let category = read_cstring(&mut reader, 0)?;
    let title = read_cstring(&mut reader, 1)?;
    let author = read_cstring(&mut reader, 2)?;

    Some(EbookRecord {
        path: path.to_path_buf(),
        size: metadata.len(),
        modified,
        id: decode_field(&id),
        category: decode_field(&category),
        title: decode_field(&title),
        author: decode_field(&author),
    })
}

/// Reads a null-terminated string after discarding `skip` earlier ones.
fn read_cstring<R: BufRead>(reader: &mut R, mut skip: usize) -> Option<Vec<u8>> {
    loop {
        let mut buf = Vec::new();
        reader.read_until(0, &mut buf).ok()?;
        if buf.pop() != Some(0) {
            // EOF before the terminator
            return None;
        }
        if skip == 0 {
            return Some(buf);
        }
        skip -= 1;
    }
}

/// Header strings are single-byte Windows-1252.
fn decode_field(bytes: &[u8]) -> String {
    WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
}

/// Encodes text back to the Windows-1252 bytes it was decoded from.
pub fn encode_field(text: &str) -> Vec<u8> {
    WINDOWS_1252.encode(text).0.into_owned()
}

/// Returns true if the file name ends in `.imp`, ignoring case.
pub fn is_imp_file_name(name: &OsStr) -> bool {
    name.to_string_lossy()
        .to_lowercase()
        .ends_with(IMP_EXTENSION)
}

/// Builds the next catalog from `previous` and the shelf `roots`.
///
/// Existing entries are dropped when their file is gone, kept as-is when the
/// modification time is unchanged and reparsed otherwise. Every root is then
/// walked recursively and `.imp` files not yet in the catalog are parsed and
/// added. Roots that are not directories are skipped. `previous` is left
/// untouched.
pub fn refresh(roots: &[PathBuf], previous: &Catalog) -> Catalog {
    let mut current = Catalog::new();

    for (path, record) in previous {
        let metadata = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            _ => {
                tracing::debug!("Book removed from shelf: {}", path.display());
                continue;
            }
        };

        match metadata.modified() {
            Ok(modified) if modified == record.modified => {
                current.insert(path.clone(), record.clone());
            }
            _ => {
                if let Some(updated) = parse_record(path) {
                    current.insert(path.clone(), updated);
                }
            }
        }
    }

    for root in roots {
        if !root.is_dir() {
            tracing::debug!("Skipping missing shelf: {}", root.display());
            continue;
        }
        let root = std::path::absolute(root).unwrap_or_else(|_| root.clone());

        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if !is_imp_file_name(entry.file_name()) || !entry.path().is_file() {
                continue;
            }
            if current.contains_key(entry.path()) {
                continue;
            }
            if let Some(record) = parse_record(entry.path()) {
                tracing::debug!("Found book {:?} at {}", record.title, record.path.display());
                current.insert(record.path.clone(), record);
            }
        }
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Builds IMP header bytes carrying the given strings in order.
    fn imp_bytes(strings: &[&[u8]]) -> Vec<u8> {
        let mut data = IMP_MAGIC.to_vec();
        data.extend_from_slice(&[0xAA; HEADER_SKIP]);
        for s in strings {
            data.extend_from_slice(s);
            data.push(0);
        }
        data.extend_from_slice(b"trailing body bytes");
        data
    }

    /// Writes a book whose header yields id/category/title/author.
    fn write_book(path: &Path, id: &str, category: &str, title: &str, author: &str) {
        let data = imp_bytes(&[
            id.as_bytes(),
            category.as_bytes(),
            b"subcategory",
            title.as_bytes(),
            b"last",
            b"middle",
            author.as_bytes(),
        ]);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    // ==================== parse_record Tests ====================

    #[test]
    fn parse_record_applies_skip_pattern() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.imp");
        let data = imp_bytes(&[b"A", b"B", b"skip1", b"C", b"skip2", b"skip3", b"D"]);
        fs::write(&path, &data).unwrap();

        let record = parse_record(&path).unwrap();
        assert_eq!(record.id, "A");
        assert_eq!(record.category, "B");
        assert_eq!(record.title, "C");
        assert_eq!(record.author, "D");
        assert_eq!(record.size, data.len() as u64);
        assert_eq!(record.path, path);
    }

    #[test]
    fn parse_record_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.imp");
        let mut data = imp_bytes(&[b"A", b"B", b"x", b"C", b"y", b"z", b"D"]);
        data[2] = b'X';
        fs::write(&path, data).unwrap();

        assert!(parse_record(&path).is_none());
    }

    #[test]
    fn parse_record_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(parse_record(&dir.path().join("nope.imp")).is_none());
    }

    #[test]
    fn parse_record_truncated_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.imp");
        let mut data = IMP_MAGIC.to_vec();
        data.extend_from_slice(&[0; HEADER_SKIP]);
        data.extend_from_slice(b"A\0B\0only-one");
        fs::write(&path, data).unwrap();

        assert!(parse_record(&path).is_none());
    }

    #[test]
    fn parse_record_keeps_single_byte_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.imp");
        let data = imp_bytes(&[b"id", b"cat", b"x", b"Caf\xe9", b"y", b"z", b"Bront\xeb"]);
        fs::write(&path, data).unwrap();

        let record = parse_record(&path).unwrap();
        assert_eq!(record.title, "Café");
        assert_eq!(encode_field(&record.author), b"Bront\xeb");
    }

    #[test]
    fn imp_file_name_is_case_insensitive() {
        assert!(is_imp_file_name(OsStr::new("a.imp")));
        assert!(is_imp_file_name(OsStr::new("A.IMP")));
        assert!(!is_imp_file_name(OsStr::new("a.imp.txt")));
        assert!(!is_imp_file_name(OsStr::new("imp")));
    }

    // ==================== refresh Tests ====================

    #[test]
    fn refresh_discovers_books_recursively() {
        let dir = TempDir::new().unwrap();
        write_book(&dir.path().join("a.imp"), "1", "c", "First", "x");
        write_book(&dir.path().join("nested/deeper/B.IMP"), "2", "c", "Second", "y");
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let catalog = refresh(&[dir.path().to_path_buf()], &Catalog::new());
        let ids: Vec<_> = catalog.values().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn refresh_skips_unparseable_books() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.imp"), b"not a book").unwrap();
        write_book(&dir.path().join("ok.imp"), "1", "c", "Ok", "x");

        let catalog = refresh(&[dir.path().to_path_buf()], &Catalog::new());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn refresh_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_book(&dir.path().join("a.imp"), "1", "c", "First", "x");
        write_book(&dir.path().join("b.imp"), "2", "c", "Second", "y");
        let roots = [dir.path().to_path_buf()];

        let first = refresh(&roots, &Catalog::new());
        let second = refresh(&roots, &first);
        assert_eq!(first, second);
    }

    #[test]
    fn refresh_keeps_unchanged_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.imp");
        write_book(&path, "1", "c", "First", "x");
        let roots = [dir.path().to_path_buf()];
        let first = refresh(&roots, &Catalog::new());
        let key = first.keys().next().unwrap().clone();

        // Rewrite the header but restore the old mtime: the cached entry wins.
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        write_book(&path, "1", "c", "Changed", "x");
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        let second = refresh(&roots, &first);
        assert_eq!(second[&key].title, "First");
    }

    #[test]
    fn refresh_reparses_modified_books() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.imp");
        write_book(&path, "1", "c", "First", "x");
        let roots = [dir.path().to_path_buf()];
        let first = refresh(&roots, &Catalog::new());
        let key = first.keys().next().unwrap().clone();

        write_book(&path, "1", "c", "Second edition", "x");
        let later = first[&key].modified + Duration::from_secs(5);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let second = refresh(&roots, &first);
        assert_eq!(second[&key].title, "Second edition");
        assert_ne!(second[&key].modified, first[&key].modified);
    }

    #[test]
    fn refresh_drops_deleted_books() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.imp");
        write_book(&path, "1", "c", "First", "x");
        let roots = [dir.path().to_path_buf()];
        let first = refresh(&roots, &Catalog::new());
        assert_eq!(first.len(), 1);

        fs::remove_file(&path).unwrap();
        let second = refresh(&roots, &first);
        assert!(second.is_empty());
        // input untouched
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn refresh_merges_multiple_roots() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        write_book(&one.path().join("a.imp"), "1", "c", "One", "x");
        write_book(&two.path().join("b.imp"), "2", "c", "Two", "y");
        let missing = one.path().join("does-not-exist");

        let catalog = refresh(
            &[one.path().to_path_buf(), missing, two.path().to_path_buf()],
            &Catalog::new(),
        );
        assert_eq!(catalog.len(), 2);
    }
}
