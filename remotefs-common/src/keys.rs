//! Path-style helpers for object keys.
//!
//! Object stores have no directories; keys are flat strings that use `/` by
//! convention. These helpers give keys the join and relativize behavior
//! callers expect from filesystem paths.

/// Join two key fragments with `/`, collapsing duplicate separators and
/// resolving `.` / `..` segments. A leading or trailing `/` on the combined
/// key is preserved.
pub fn join_key(base: &str, path: &str) -> String {
    if base.is_empty() {
        return normalize_key(path);
    }
    if path.is_empty() {
        return normalize_key(base);
    }
    normalize_key(&format!("{}/{}", base, path))
}

/// Normalize a key: collapse `//`, drop `.` segments, resolve `..`.
pub fn normalize_key(key: &str) -> String {
    let leading = key.starts_with('/');
    let trailing = key.len() > 1 && key.ends_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                // Cannot climb above the root of a bucket
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    let mut out = parts.join("/");
    if leading {
        out.insert(0, '/');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Key of `path` relative to `base`, without a leading `/`.
/// Keys outside `base` are returned unchanged (minus the leading `/`).
pub fn relative_key<'a>(base: &str, path: &'a str) -> &'a str {
    let base = base.trim_matches('/');
    let trimmed = path.trim_start_matches('/');
    if base.is_empty() {
        return trimmed;
    }
    match trimmed.strip_prefix(base) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => trimmed,
    }
}

/// Key used for a directory marker object.
pub fn directory_key(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Whether a key denotes a zero-byte directory marker.
pub fn is_directory_marker(key: &str) -> bool {
    key.ends_with('/')
}
