//! Rule-based plugins declared in TOML files.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use regex::Regex;
use serde::Deserialize;

use super::{ResponseTransformer, UrlTransformer};
use crate::error::{PluginError, Result};

/// Contents of one plugin file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginFile {
    /// URL rewrite rules, in file order.
    #[serde(default)]
    pub url: Vec<UrlRule>,
    /// Response rewrite rules, in file order.
    #[serde(default)]
    pub response: Vec<ResponseRule>,
}

/// A `[[url]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlRule {
    /// Regex matched against the URL.
    pub pattern: String,
    /// Replacement, `$1`/`${name}` expand capture groups.
    pub replace: String,
}

/// A `[[response]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseRule {
    /// Only rewrite responses for URLs matching this regex.
    pub url_pattern: Option<String>,
    /// Only rewrite responses whose Content-Type contains this string.
    pub content_type: Option<String>,
    /// Headers to drop.
    #[serde(default)]
    pub remove_headers: Vec<String>,
    /// Headers to set, replacing existing values.
    #[serde(default)]
    pub set_headers: BTreeMap<String, String>,
    /// Byte regex applied to the body.
    pub body_pattern: Option<String>,
    /// Replacement for `body_pattern` matches.
    #[serde(default)]
    pub body_replace: String,
}

/// Transformers compiled from one plugin file.
pub struct LoadedPlugin {
    /// One rewrite per `[[url]]` table, in file order.
    pub url: Vec<UrlRewrite>,
    /// One rewrite per `[[response]]` table, in file order.
    pub response: Vec<ResponseRewrite>,
}

/// Reads and compiles a plugin file.
pub fn load_plugin_file(path: &Path) -> Result<LoadedPlugin> {
    let content = std::fs::read_to_string(path)?;
    let file: PluginFile = toml::from_str(&content)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let url = file
        .url
        .iter()
        .enumerate()
        .map(|(i, rule)| UrlRewrite::new(format!("{file_name}#url[{i}]"), rule))
        .collect::<Result<Vec<_>>>()?;

    let response = file
        .response
        .iter()
        .enumerate()
        .map(|(i, rule)| ResponseRewrite::new(format!("{file_name}#response[{i}]"), rule))
        .collect::<Result<Vec<_>>>()?;

    Ok(LoadedPlugin { url, response })
}

/// Regex substitution on the outgoing URL.
#[derive(Debug, Clone)]
pub struct UrlRewrite {
    name: String,
    pattern: Regex,
    replace: String,
}

impl UrlRewrite {
    /// Compiles a `[[url]]` rule.
    pub fn new(name: impl Into<String>, rule: &UrlRule) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(&rule.pattern)?,
            replace: rule.replace.clone(),
        })
    }
}

impl UrlTransformer for UrlRewrite {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, url: &str) -> String {
        self.pattern
            .replace_all(url, self.replace.as_str())
            .into_owned()
    }
}

/// Header and body edits on a forwarded response.
#[derive(Debug, Clone)]
pub struct ResponseRewrite {
    name: String,
    url_pattern: Option<Regex>,
    content_type: Option<String>,
    remove_headers: Vec<HeaderName>,
    set_headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<(regex::bytes::Regex, Vec<u8>)>,
}

impl ResponseRewrite {
    /// Compiles a `[[response]]` rule.
    pub fn new(name: impl Into<String>, rule: &ResponseRule) -> Result<Self> {
        let url_pattern = rule.url_pattern.as_deref().map(Regex::new).transpose()?;

        let remove_headers = rule
            .remove_headers
            .iter()
            .map(String::as_str)
            .map(header_name)
            .collect::<Result<Vec<_>>>()?;

        let set_headers = rule
            .set_headers
            .iter()
            .map(|(name, value)| {
                let value = HeaderValue::from_str(value)
                    .map_err(|e| PluginError::Header(format!("{name}: {e}")))?;
                Ok((header_name(name)?, value))
            })
            .collect::<Result<Vec<_>>>()?;

        let body = match &rule.body_pattern {
            Some(pattern) => Some((
                regex::bytes::Regex::new(pattern)?,
                rule.body_replace.clone().into_bytes(),
            )),
            None => None,
        };

        Ok(Self {
            name: name.into(),
            url_pattern,
            content_type: rule.content_type.clone(),
            remove_headers,
            set_headers,
            body,
        })
    }

    fn applies_to(&self, url: &str, headers: &HeaderMap) -> bool {
        if let Some(pattern) = &self.url_pattern {
            if !pattern.is_match(url) {
                return false;
            }
        }
        if let Some(wanted) = &self.content_type {
            let actual = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !actual.contains(wanted.as_str()) {
                return false;
            }
        }
        true
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| PluginError::Header(format!("{name}: {e}")))
}

impl ResponseTransformer for ResponseRewrite {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, url: &str, mut headers: HeaderMap, body: Bytes) -> (HeaderMap, Bytes) {
        if !self.applies_to(url, &headers) {
            return (headers, body);
        }

        for name in &self.remove_headers {
            headers.remove(name);
        }
        for (name, value) in &self.set_headers {
            headers.insert(name.clone(), value.clone());
        }

        let Some((pattern, replace)) = &self.body else {
            return (headers, body);
        };
        let replaced = match pattern.replace_all(&body, replace.as_slice()) {
            std::borrow::Cow::Owned(bytes) => Some(bytes),
            std::borrow::Cow::Borrowed(_) => None,
        };
        (headers, replaced.map(Bytes::from).unwrap_or(body))
    }
}
