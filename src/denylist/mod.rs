use anyhow::{Context, Result};
use glob::Pattern;
use std::fs;
use std::io;
use std::path::Path;

const PROJECT_FILE: &str = "deny-patterns.txt";
const LOCAL_FILE: &str = "deny-patterns.local.txt";

/// Read one pattern file, returning an empty list if it doesn't exist.
/// Comment lines (`# ...`) and blank lines are stripped; order is preserved.
fn read_pattern_file(path: &Path) -> Result<Vec<String>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Load deny patterns from the project data directory: the project-scoped
/// file first, then the local override file. Both are optional.
pub fn load_patterns(dir: &Path) -> Result<Vec<String>> {
    let mut patterns = read_pattern_file(&dir.join(PROJECT_FILE))?;
    patterns.extend(read_pattern_file(&dir.join(LOCAL_FILE))?);
    Ok(patterns)
}

/// Test a candidate path against the loaded patterns, returning the first
/// matching pattern. A pattern without a path separator also matches the
/// path's final segment, so `*.secret` denies `/any/depth/config.secret`.
/// An empty pattern set denies nothing.
pub fn match_denied<'a>(path: &str, patterns: &'a [String]) -> Option<&'a str> {
    let base = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    for raw in patterns {
        let Ok(pattern) = Pattern::new(raw) else {
            eprintln!("ketchup: skipping invalid deny pattern: {raw}");
            continue;
        };
        if pattern.matches(path) || (!raw.contains('/') && pattern.matches(base)) {
            return Some(raw);
        }
    }
    None
}

/// Whether any pattern denies the candidate path.
pub fn is_denied(path: &str, patterns: &[String]) -> bool {
    match_denied(path, patterns).is_some()
}
