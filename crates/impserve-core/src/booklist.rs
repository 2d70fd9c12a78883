//! Booklist rendering.
//!
//! The reading device expects a line-oriented listing:
//!
//! ```text
//! 1\r\n
//! None:<id>\t<title>\t<author>\t<category>\t<size>\t<fetch url>\t1\t17\r\n
//! ...
//! \r\n\r\n
//! ```

use crate::catalog::{encode_field, EbookRecord};

/// Content type of the rendered listing.
pub const BOOKLIST_CONTENT_TYPE: &str = "text/x-booklist";

/// Renders `records` as a booklist, linking each book to `book_prefix + id`.
///
/// Text fields are written back in the single-byte encoding they were read in.
pub fn render_booklist<'a, I>(records: I, book_prefix: &str) -> Vec<u8>
where
    I: IntoIterator<Item = &'a EbookRecord>,
{
    let mut out = b"1\r\n".to_vec();
    for record in records {
        let line = format!(
            "None:{id}\t{title}\t{author}\t{category}\t{size}\t{prefix}{id}\t1\t17\r\n",
            id = record.id,
            title = record.title,
            author = record.author,
            category = record.category,
            size = record.size,
            prefix = book_prefix,
        );
        out.extend_from_slice(&encode_field(&line));
    }
    out.extend_from_slice(b"\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn record(id: &str, title: &str) -> EbookRecord {
        EbookRecord {
            path: PathBuf::from(format!("/shelf/{id}.imp")),
            size: 1234,
            modified: SystemTime::UNIX_EPOCH,
            id: id.to_string(),
            category: "Fiction".to_string(),
            title: title.to_string(),
            author: "Austen".to_string(),
        }
    }

    #[test]
    fn empty_booklist() {
        let out = render_booklist(std::iter::empty(), "http://x/getbook?");
        assert_eq!(out, b"1\r\n\r\n\r\n");
    }

    #[test]
    fn booklist_line_format() {
        let records = [record("B42", "Emma")];
        let out = render_booklist(&records, "http://x/getbook?");
        assert_eq!(
            out,
            b"1\r\nNone:B42\tEmma\tAusten\tFiction\t1234\thttp://x/getbook?B42\t1\t17\r\n\r\n\r\n"
        );
    }

    #[test]
    fn booklist_round_trips_single_byte_text() {
        let records = [record("1", "Caf\u{e9}")];
        let out = render_booklist(&records, "p?");
        assert!(out.windows(5).any(|w| w == b"Caf\xe9\t"));
    }
}
