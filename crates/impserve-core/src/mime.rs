//! File-extension to content-type table.

use std::collections::HashMap;
use std::path::Path;

/// Fallback content type for unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type of IMP books.
pub const SOFTBOOK_CONTENT_TYPE: &str = "application/x-softbook";

/// Built-in extension map.
const BUILTIN_TYPES: &[(&str, &str)] = &[
    ("htm", "text/html"),
    ("html", "text/html"),
    ("txt", "text/plain"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("xml", "text/xml"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("epub", "application/epub+zip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("ico", "image/x-icon"),
    ("svg", "image/svg+xml"),
    ("wav", "audio/x-wav"),
    ("mp3", "audio/mpeg"),
    ("imp", SOFTBOOK_CONTENT_TYPE),
];

/// Maps file extensions to content types.
#[derive(Debug, Clone)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

impl MimeTable {
    /// Creates a table with the built-in types.
    pub fn with_defaults() -> Self {
        let types = BUILTIN_TYPES
            .iter()
            .map(|(ext, ty)| (ext.to_string(), ty.to_string()))
            .collect();
        Self { types }
    }

    /// Adds or replaces the type for an extension (without the dot).
    pub fn insert(&mut self, extension: &str, content_type: impl Into<String>) {
        self.types
            .insert(extension.trim_start_matches('.').to_lowercase(), content_type.into());
    }

    /// Merges an Apache-style `mime.types` file into the table.
    ///
    /// Each line is a type followed by its extensions; `#` starts a comment.
    /// Returns the number of extensions read.
    pub fn load_file(&mut self, path: &Path) -> std::io::Result<usize> {
        let content = std::fs::read_to_string(path)?;
        Ok(self.load_str(&content))
    }

    fn load_str(&mut self, content: &str) -> usize {
        let mut count = 0;
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default();
            let mut words = line.split_whitespace();
            let Some(content_type) = words.next() else {
                continue;
            };
            for ext in words {
                self.insert(ext, content_type);
                count += 1;
            }
        }
        count
    }

    /// Guesses the content type from a file name or path.
    pub fn guess(&self, name: &str) -> Option<&str> {
        let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
        self.types.get(&ext).map(String::as_str)
    }

    /// Like [`guess`](Self::guess) with [`DEFAULT_CONTENT_TYPE`] as fallback.
    pub fn guess_or_default(&self, name: &str) -> &str {
        self.guess(name).unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

impl Default for MimeTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
