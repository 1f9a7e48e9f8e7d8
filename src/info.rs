//! Plugin and theme header parsing.
//!
//! Info files start with a comment block of `Key: value` lines, e.g.
//!
//! ```text
//! /*
//! Plugin Name: Example
//! Version: 1.2
//! Author URI: https://example.org
//! */
//! ```
//!
//! Keys are normalized to lowercase ASCII alphanumerics, so `Plugin Name`
//! becomes `pluginname`. Parsing stops at the first `*/` line.

use std::collections::BTreeMap;

/// Parsed header of an info file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoHeader {
    fields: BTreeMap<String, String>,
}

impl InfoHeader {
    /// Parses header lines. Later keys overwrite earlier ones.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut fields = BTreeMap::new();

        for line in text.split('\n') {
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(normalize_key(key), value.trim().to_string());
            }
            if line.trim() == "*/" {
                break;
            }
        }

        Self { fields }
    }

    /// Value of a normalized key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Declared version.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    /// Declared name. A theme name wins over a plugin name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("themename").or_else(|| self.get("pluginname"))
    }
}

fn normalize_key(key: &str) -> String {
    key.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}
