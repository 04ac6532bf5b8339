//! Config URI resolution
//!
//! Relative config references resolve against the base URI of the document
//! that names them. Cycle detection compares normalized forms (scheme plus
//! normalized path) so trivially distinct spellings of the same resource do
//! not slip past the check.

/// Split a URI into its scheme (without `:`) and the remainder.
pub fn split_scheme(uri: &str) -> (Option<&str>, &str) {
    if let Some(idx) = uri.find(':') {
        let scheme = &uri[..idx];
        if !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        {
            return (Some(scheme), &uri[idx + 1..]);
        }
    }
    (None, uri)
}

/// Canonical form used as cycle-detection identity.
pub fn normalize(uri: &str) -> String {
    let (scheme, rest) = split_scheme(uri);
    let normalized_path = normalize_path(rest);
    match scheme {
        Some(s) => format!("{}:{}", s, normalized_path),
        None => normalized_path,
    }
}

/// The containing "directory" of a URI: everything up to the final segment.
pub fn parent(uri: &str) -> &str {
    match uri.rfind('/') {
        Some(idx) => &uri[..idx],
        None => "",
    }
}

/// The final path segment; used as the frame name in digestion paths.
pub fn file_name(uri: &str) -> &str {
    match uri.rfind('/') {
        Some(idx) => &uri[idx + 1..],
        None => uri,
    }
}

/// Resolve `reference` against `base`. Absolute references pass through;
/// absolute paths keep the base scheme; relative paths merge against the
/// base parent.
pub fn resolve(base: &str, reference: &str) -> String {
    let (ref_scheme, _) = split_scheme(reference);
    if ref_scheme.is_some() {
        return normalize(reference);
    }
    let (base_scheme, base_rest) = split_scheme(base);
    let merged = if reference.starts_with('/') {
        reference.to_string()
    } else {
        let dir = parent(base_rest);
        if dir.is_empty() {
            reference.to_string()
        } else {
            format!("{}/{}", dir, reference)
        }
    };
    let normalized = normalize_path(&merged);
    match base_scheme {
        Some(s) => format!("{}:{}", s, normalized),
        None => normalized,
    }
}

fn normalize_path(path: &str) -> String {
    // Preserve a leading "//authority" or "/" verbatim.
    let (prefix, rest) = if let Some(stripped) = path.strip_prefix("//") {
        match stripped.find('/') {
            Some(idx) => (
                format!("//{}", &stripped[..idx]),
                stripped[idx..].to_string(),
            ),
            None => (format!("//{}", stripped), String::new()),
        }
    } else {
        (String::new(), path.to_string())
    };

    let absolute = rest.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("{}/{}", prefix, joined)
    } else if prefix.is_empty() {
        joined
    } else {
        format!("{}/{}", prefix, joined)
    }
}
