//! Recently visited HTML pages.
//!
//! The device's browser has no back button, so the proxy remembers the last
//! few HTML pages it forwarded and the fallback local route walks back
//! through them.

use std::collections::VecDeque;

/// Maximum number of remembered URLs.
pub const URL_HISTORY_MAX: usize = 10;

/// Bounded, insertion-ordered list of page URLs (oldest first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentUrls {
    urls: VecDeque<String>,
}

impl RecentUrls {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a URL, evicting the oldest entries beyond [`URL_HISTORY_MAX`].
    pub fn push(&mut self, url: impl Into<String>) {
        self.urls.push_back(url.into());
        while self.urls.len() > URL_HISTORY_MAX {
            self.urls.pop_front();
        }
    }

    /// Forgets every URL.
    pub fn clear(&mut self) {
        self.urls.clear();
    }

    /// Steps back one page.
    ///
    /// With two or more entries, drops the current page and returns (and
    /// removes) the one before it. With fewer, leaves the history untouched
    /// and returns `None`.
    pub fn go_back(&mut self) -> Option<String> {
        if self.urls.len() < 2 {
            return None;
        }
        self.urls.pop_back();
        self.urls.pop_back()
    }

    /// Number of remembered URLs.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Returns true if nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }
}
