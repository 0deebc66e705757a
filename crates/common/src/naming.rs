//! URL building and deterministic screenshot file names

use std::collections::BTreeMap;

use crate::types::Phase;

pub const ROOT_PATH_NAME: &str = "root";
pub const DIFFERENCE_SUFFIX: &str = "DIFFERENCE";
pub const PNG_EXTENSION: &str = "png";

/// Join a base URL and a path with exactly one slash, after applying the
/// environment mapping to the host labels of the base URL.
pub fn build_url(url: &str, path: &str, env_mapping: &BTreeMap<String, String>) -> String {
    let mapped = apply_env_mapping(url, env_mapping);
    format!(
        "{}/{}",
        mapped.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Replace host labels that appear as keys of `env_mapping`.
///
/// `https://live.example.com` with `{live: www}` becomes `https://www.example.com`.
pub fn apply_env_mapping(url: &str, env_mapping: &BTreeMap<String, String>) -> String {
    if env_mapping.is_empty() {
        return url.to_string();
    }

    let (scheme, rest) = match url.find("://") {
        Some(idx) => (&url[..idx + 3], &url[idx + 3..]),
        None => ("", url),
    };
    let host_end = rest.find(|c: char| matches!(c, '/' | ':' | '?' | '#')).unwrap_or(rest.len());
    let (host, tail) = rest.split_at(host_end);

    let host = host
        .split('.')
        .map(|label| env_mapping.get(label).map(String::as_str).unwrap_or(label))
        .collect::<Vec<_>>()
        .join(".");

    format!("{}{}{}", scheme, host, tail)
}

/// Prefix `http://` when no scheme is given and lowercase the result
pub fn prepend_http_if_missing(url: &str) -> String {
    let url = url.trim().to_lowercase();
    if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!("http://{}", url)
    }
}

/// File-name-safe rendering of a base URL: scheme dropped, every
/// non-alphanumeric character replaced by `_`, no leading/trailing `_`.
pub fn url_file_part(url: &str) -> String {
    let without_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    sanitize(without_scheme)
}

/// File-name-safe rendering of a path; `/` becomes `root`
pub fn path_file_part(path: &str) -> String {
    let sanitized = sanitize(path);
    if sanitized.is_empty() {
        ROOT_PATH_NAME.to_string()
    } else {
        sanitized
    }
}

fn sanitize(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_string()
}

/// Common stem of all screenshots of one context in one phase, up to and
/// including the separator before the vertical offset.
pub fn screenshot_prefix(url: &str, path: &str, width: u32) -> String {
    format!("{}_{}_{}_", url_file_part(url), path_file_part(path), width)
}

/// `{host}_{path-or-root}_{width}_{offset}_{phase}.png`
pub fn screenshot_file_name(url: &str, path: &str, width: u32, vertical_offset: u64, phase: Phase) -> String {
    format!(
        "{}{}_{}.{}",
        screenshot_prefix(url, path, width),
        vertical_offset,
        phase,
        PNG_EXTENSION
    )
}

/// Name of the diff image for a compared pair, derived from the before file
pub fn difference_file_name(url: &str, path: &str, width: u32, vertical_offset: u64) -> String {
    format!(
        "{}{}_{}.{}",
        screenshot_prefix(url, path, width),
        vertical_offset,
        DIFFERENCE_SUFFIX,
        PNG_EXTENSION
    )
}

/// Extract the vertical offset from a file name produced by
/// [`screenshot_file_name`] for the given prefix and phase.
pub fn parse_offset(file_name: &str, prefix: &str, phase: Phase) -> Option<u64> {
    let suffix = format!("_{}.{}", phase, PNG_EXTENSION);
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(suffix.as_str())?
        .parse()
        .ok()
}
