//! Version string ordering.
//!
//! Installed versions come from the client platform and remote versions
//! from free-form info headers, so ordering follows the platform's own
//! rules rather than strict semver: `1.0-beta2`, `1.0rc1` and `1.0.pl1`
//! all compare sensibly.
//!
//! Versions are split into numeric and alphabetic parts. Numbers compare
//! numerically; words rank `dev < alpha = a < beta = b < RC = rc < # < pl = p`
//! and any other word ranks below all of them. A number outranks a word at
//! the same position.

use std::cmp::Ordering;

/// Ranked pre- and post-release words. Matched by prefix, first match wins.
const SPECIAL_FORMS: [(&str, i32); 10] = [
    ("dev", 0),
    ("alpha", 1),
    ("a", 1),
    ("beta", 2),
    ("b", 2),
    ("RC", 3),
    ("rc", 3),
    ("#", 4),
    ("pl", 5),
    ("p", 5),
];

/// Rank of words not in [`SPECIAL_FORMS`].
const UNKNOWN_FORM: i32 = -6;

/// Stand-in for a number when compared against a word.
const NUMBER_FORM: &str = "#N";

/// Compares two version strings.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return compare_tokens(&[NUMBER_FORM], &tokens(b)),
        (false, true) => return compare_tokens(&tokens(a), &[NUMBER_FORM]),
        (false, false) => {}
    }

    compare_tokens(&tokens(a), &tokens(b))
}

/// Returns true if `remote` is newer than `installed`.
#[must_use]
pub fn is_newer(installed: &str, remote: &str) -> bool {
    compare_versions(installed, remote) == Ordering::Less
}

/// Separates runs of digits from runs of other characters with dots and
/// maps `-`, `_`, `+` and other punctuation to dots.
fn canonicalize(version: &str) -> String {
    let mut chars = version.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let is_dig = |c: char| c.is_ascii_digit();
    let is_ndig = |c: char| !c.is_ascii_digit() && c != '.';

    let mut out = String::with_capacity(version.len() * 2);
    out.push(first);
    let mut last = first;

    for c in chars {
        let ends_in_dot = out.ends_with('.');
        if matches!(c, '-' | '_' | '+') || !c.is_ascii_alphanumeric() {
            if !ends_in_dot {
                out.push('.');
            }
        } else if (is_ndig(last) && is_dig(c)) || (is_dig(last) && is_ndig(c)) {
            if !ends_in_dot {
                out.push('.');
            }
            out.push(c);
        } else {
            out.push(c);
        }
        last = c;
    }

    out
}

fn tokens(version: &str) -> Vec<String> {
    canonicalize(version)
        .split('.')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn starts_with_digit(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn form_rank(token: &str) -> i32 {
    SPECIAL_FORMS
        .iter()
        .find(|(name, _)| token.starts_with(name))
        .map_or(UNKNOWN_FORM, |(_, rank)| *rank)
}

fn compare_forms(a: &str, b: &str) -> Ordering {
    form_rank(a).cmp(&form_rank(b))
}

/// Compares two runs of ASCII digits without overflowing.
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_tokens<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (x.as_ref(), y.as_ref());
        let ord = match (starts_with_digit(x), starts_with_digit(y)) {
            (true, true) => compare_numbers(x, y),
            (false, false) => compare_forms(x, y),
            (true, false) => compare_forms(NUMBER_FORM, y),
            (false, true) => compare_forms(x, NUMBER_FORM),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    let common = a.len().min(b.len());
    match (a.get(common), b.get(common)) {
        (Some(x), _) if starts_with_digit(x.as_ref()) => Ordering::Greater,
        (Some(_), _) => compare_tokens(&a[common..], &[NUMBER_FORM]),
        (None, Some(y)) if starts_with_digit(y.as_ref()) => Ordering::Less,
        (None, Some(_)) => compare_tokens(&[NUMBER_FORM], &b[common..]),
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("1.0rc1"), "1.0.rc.1");
        assert_eq!(canonicalize("1.0-beta_2"), "1.0.beta.2");
        assert_eq!(canonicalize("1..2"), "1.2");
        assert_eq!(canonicalize("1.0+pl1"), "1.0.pl.1");
    }

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare_versions("1.0", "1.2"), Ordering::Less);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Less);
        assert_eq!(compare_versions("1.02", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_special_forms() {
        assert_eq!(compare_versions("1.0-dev", "1.0-alpha"), Ordering::Less);
        assert_eq!(compare_versions("1.0a1", "1.0b1"), Ordering::Less);
        assert_eq!(compare_versions("1.0beta", "1.0RC1"), Ordering::Less);
        assert_eq!(compare_versions("1.0rc1", "1.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "1.0pl1"), Ordering::Less);
        assert_eq!(compare_versions("1.0.1", "1.0pl1"), Ordering::Greater);
        assert_eq!(compare_versions("1.0foo", "1.0dev"), Ordering::Less);
    }

    #[test]
    fn test_empty_versions() {
        assert_eq!(compare_versions("", ""), Ordering::Equal);
        assert_eq!(compare_versions("", "1.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0", ""), Ordering::Greater);
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.0", "1.2"));
        assert!(!is_newer("1.2", "1.2"));
        assert!(!is_newer("2.0", "1.9.9"));
        assert!(is_newer("1.0-beta", "1.0"));
    }

    #[test]
    fn test_huge_numbers() {
        assert_eq!(
            compare_versions("1.99999999999999999999999", "1.100000000000000000000000"),
            Ordering::Less
        );
    }

    proptest! {
        #[test]
        fn prop_compare_is_reflexive(v in "[0-9a-z.\\-]{0,12}") {
            prop_assert_eq!(compare_versions(&v, &v), Ordering::Equal);
        }

        #[test]
        fn prop_compare_is_antisymmetric(a in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}", b in "[0-9]{1,3}(\\.[0-9]{1,3}){0,3}") {
            prop_assert_eq!(compare_versions(&a, &b), compare_versions(&b, &a).reverse());
        }

        #[test]
        fn prop_numeric_versions_match_tuple_order(x in 0u32..1000, y in 0u32..1000, z in 0u32..1000, w in 0u32..1000) {
            let a = format!("{}.{}", x, y);
            let b = format!("{}.{}", z, w);
            prop_assert_eq!(compare_versions(&a, &b), (x, y).cmp(&(z, w)));
        }
    }
}
