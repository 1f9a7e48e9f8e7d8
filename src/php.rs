//! PHP `serialize()` wire format.
//!
//! The calling platform reads every non-download response with
//! `unserialize()`, so records are built as [`PhpValue`] trees and
//! encoded here. String lengths are byte lengths.

use std::fmt::Write;

/// Class name of anonymous PHP objects.
pub const STD_CLASS: &str = "stdClass";

/// A serializable PHP value. Arrays and objects keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Associative array.
    Array(Vec<(String, PhpValue)>),
    /// `stdClass` object.
    Object(Vec<(String, PhpValue)>),
}

impl PhpValue {
    /// Empty associative array.
    #[must_use]
    pub fn array() -> Self {
        Self::Array(Vec::new())
    }

    /// Empty `stdClass` object.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(Vec::new())
    }

    /// Sets a key of an array or object, replacing an earlier value in place.
    /// Scalars are left untouched.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PhpValue>) {
        let (Self::Array(entries) | Self::Object(entries)) = self else {
            return;
        };
        let key = key.into();
        let value = value.into();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Builder form of [`PhpValue::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PhpValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Value of a key of an array or object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PhpValue> {
        match self {
            Self::Array(entries) | Self::Object(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// String content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Encodes the value.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("N;"),
            Self::Bool(b) => {
                let _ = write!(out, "b:{};", u8::from(*b));
            }
            Self::Int(i) => {
                let _ = write!(out, "i:{};", i);
            }
            Self::Str(s) => write_str(out, s),
            Self::Array(entries) => {
                let _ = write!(out, "a:{}:{{", entries.len());
                for (key, value) in entries {
                    match array_index(key) {
                        Some(index) => {
                            let _ = write!(out, "i:{};", index);
                        }
                        None => write_str(out, key),
                    }
                    value.write_to(out);
                }
                out.push('}');
            }
            Self::Object(fields) => {
                let _ = write!(
                    out,
                    "O:{}:\"{}\":{}:{{",
                    STD_CLASS.len(),
                    STD_CLASS,
                    fields.len()
                );
                for (key, value) in fields {
                    write_str(out, key);
                    value.write_to(out);
                }
                out.push('}');
            }
        }
    }
}

fn write_str(out: &mut String, s: &str) {
    let _ = write!(out, "s:{}:\"{}\";", s.len(), s);
}

/// PHP stores decimal integer keys of arrays as integers.
fn array_index(key: &str) -> Option<i64> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    let canonical = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
        && key != "-0";
    if canonical { key.parse().ok() } else { None }
}

impl From<&str> for PhpValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for PhpValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for PhpValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for PhpValue {
    fn from(i: u64) -> Self {
        Self::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for PhpValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<PhpValue>> From<Option<T>> for PhpValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
