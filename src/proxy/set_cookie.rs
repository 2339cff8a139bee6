//! Rewriting backend `Set-Cookie` lines for the edge's own domain.

use chrono::{DateTime, Utc};

/// Rewrite one backend Set-Cookie line.
///
/// Drops every `Domain` attribute, keeps the first `Path` attribute (adding
/// `Path=/` when there is none), and leaves all other attributes in their
/// original order and casing. Returns `None` for blank lines or a line with
/// no cookie name.
pub fn rewrite_set_cookie(line: &str) -> Option<String> {
    let mut parts = line.split(';');
    let pair = parts.next()?.trim();
    let (name, _) = pair.split_once('=')?;
    if name.trim().is_empty() {
        return None;
    }

    let mut rewritten = vec![pair.to_string()];
    let mut has_path = false;
    for attr in parts.map(str::trim).filter(|a| !a.is_empty()) {
        match attribute_name(attr) {
            n if n.eq_ignore_ascii_case("domain") => {}
            n if n.eq_ignore_ascii_case("path") => {
                if !has_path {
                    has_path = true;
                    rewritten.push(attr.to_string());
                }
            }
            _ => rewritten.push(attr.to_string()),
        }
    }
    if !has_path {
        rewritten.push("Path=/".to_string());
    }

    Some(rewritten.join("; "))
}

/// Rewrite a whole ordered set, dropping lines that cannot be rewritten.
pub fn rewrite_all<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| rewrite_set_cookie(line.as_ref()))
        .collect()
}

fn attribute_name(attr: &str) -> &str {
    attr.split_once('=').map_or(attr, |(n, _)| n).trim()
}

fn attribute_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.split(';')
        .skip(1)
        .map(str::trim)
        .find(|attr| attribute_name(attr).eq_ignore_ascii_case(name))
        .and_then(|attr| attr.split_once('='))
        .map(|(_, v)| v.trim())
}

/// Cookie name of a Set-Cookie line.
pub fn cookie_name(line: &str) -> Option<&str> {
    let (name, _) = line.split(';').next()?.split_once('=')?;
    Some(name.trim())
}

/// Cookie value of a Set-Cookie line, surrounding quotes removed.
pub fn cookie_value(line: &str) -> Option<&str> {
    let (_, value) = line.split(';').next()?.split_once('=')?;
    let value = value.trim();
    Some(
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value),
    )
}

/// Whether a Set-Cookie line removes its cookie rather than setting it.
pub fn is_deletion(line: &str) -> bool {
    if cookie_value(line).is_none_or(str::is_empty) {
        return true;
    }
    if let Some(max_age) = attribute_value(line, "max-age") {
        if max_age.parse::<i64>().is_ok_and(|age| age <= 0) {
            return true;
        }
    }
    attribute_value(line, "expires").is_some_and(expires_in_past)
}

/// Whether a cookie `Expires` date lies in the past.
///
/// The weekday is ignored and `01-Jan-2000` style dates are accepted.
/// Unparseable dates are not treated as past.
fn expires_in_past(value: &str) -> bool {
    let date = value.split_once(',').map_or(value, |(_, rest)| rest);
    DateTime::parse_from_rfc2822(date.replace('-', " ").trim())
        .is_ok_and(|at| at.with_timezone(&Utc) < Utc::now())
}

/// Value of the first non-deleting Set-Cookie line for `name`.
pub fn find_cookie_value<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines
        .iter()
        .filter(|line| cookie_name(line) == Some(name))
        .find(|line| !is_deletion(line))
        .and_then(|line| cookie_value(line))
}
