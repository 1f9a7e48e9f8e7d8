//! Readme rendering for `plugin_information` and `project_details`.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use pulldown_cmark::{Parser, html};
use pulldown_cmark_escape::escape_html;
use regex::Regex;

use crate::php::PhpValue;

/// Head template file below the templates directory.
pub const HEAD_TEMPLATE: &str = "project_details_head.html";

/// Footer template file below the templates directory.
pub const FOOTER_TEMPLATE: &str = "project_details_footer.html";

const DEFAULT_HEAD: &str = "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Project information</title>\n</head>\n<body>\n";

const DEFAULT_FOOTER: &str = "</body>\n</html>\n";

/// A setext heading: a line of word characters, dashes and spaces
/// underlined by at least two `=` or `-`.
static SECTION_HEADING: OnceLock<Option<Regex>> = OnceLock::new();

fn section_heading() -> Option<&'static Regex> {
    SECTION_HEADING
        .get_or_init(|| Regex::new(r"(?m)^([\w\- ]+)\r?\n[=\-]{2,}[ \t]*\r?$").ok())
        .as_ref()
}

/// Renders markdown to HTML.
#[must_use]
pub fn markdown_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, Parser::new(text));
    out
}

/// Inserts `<br />` before every line break.
#[must_use]
pub fn nl2br(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                out.push_str("<br />\r\n");
            }
            '\r' | '\n' => {
                out.push_str("<br />");
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Renders a readme for the details page.
#[must_use]
pub fn render_readme(readme: &str, markdown: bool) -> String {
    if markdown {
        return markdown_to_html(readme);
    }
    let mut escaped = String::with_capacity(readme.len());
    // Writing into a String cannot fail.
    let _ = escape_html(&mut escaped, readme);
    nl2br(&escaped)
}

/// Lowercases, trims and replaces spaces with `space`.
fn equalize(value: &str, space: &str) -> String {
    value.replace(' ', space).to_lowercase().trim().to_string()
}

/// Splits a markdown readme into named HTML sections.
///
/// Each setext heading starts a section keyed by the heading in lowercase
/// with spaces turned into underscores. A first heading equal to the
/// project name becomes `description`. Text before the first heading is
/// dropped. Non-markdown readmes become a single raw `description`.
#[must_use]
pub fn readme_sections(readme: &str, project_name: Option<&str>, markdown: bool) -> PhpValue {
    if !markdown {
        return PhpValue::array().with("description", readme);
    }

    let mut sections = PhpValue::array();
    let Some(heading) = section_heading() else {
        return sections;
    };

    let headings: Vec<_> = heading
        .captures_iter(readme)
        .filter_map(|caps| Some((caps.get(0)?, caps.get(1)?.as_str())))
        .collect();

    let name = project_name.map(|n| equalize(n, ""));

    for (i, (whole, title)) in headings.iter().enumerate() {
        let end = headings
            .get(i + 1)
            .map_or(readme.len(), |(next, _)| next.start());
        let body = markdown_to_html(readme[whole.end()..end].trim());

        let key = if i == 0 && name.as_deref() == Some(equalize(title, "").as_str()) {
            "description".to_string()
        } else {
            equalize(title, "_")
        };
        sections.set(key, body);
    }

    sections
}

/// Loads a template from `dir`, falling back to the built-in one.
fn load_template(dir: &Path, name: &str, fallback: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap_or_else(|_| fallback.to_string())
}

/// Builds the HTML details page.
#[must_use]
pub fn details_page(templates_dir: &Path, version: &str, readme_html: &str) -> String {
    let head = load_template(templates_dir, HEAD_TEMPLATE, DEFAULT_HEAD);
    let footer = load_template(templates_dir, FOOTER_TEMPLATE, DEFAULT_FOOTER);

    format!(
        "{head}<header>Project information for Version <strong>{version}</strong>.</header>\
         <div role=\"main\">{readme_html}</div>{footer}"
    )
}

/// Wraps an author name in a link to their site when one is given.
#[must_use]
pub fn linked_author(author: &str, author_uri: &str) -> String {
    if author_uri.is_empty() {
        author.to_string()
    } else {
        format!("<a href=\"{}\">{}</a>", author_uri, author)
    }
}
