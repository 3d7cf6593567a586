use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;

const DELIMITER: &str = "---";

/// Split a declarative document into its YAML front matter and body.
///
/// The document must start with a `---` line; the front matter runs until
/// the next `---` line and everything after it is the body, leading blank
/// lines trimmed.
pub fn parse<T: DeserializeOwned>(contents: &str) -> Result<(T, String)> {
    let mut lines = contents.lines();
    match lines.next() {
        Some(first) if first.trim_end() == DELIMITER => {}
        _ => bail!("document does not start with a front-matter block"),
    }

    let mut yaml = String::new();
    let mut body = String::new();
    let mut in_body = false;
    for line in lines {
        if !in_body && line.trim_end() == DELIMITER {
            in_body = true;
            continue;
        }
        let target = if in_body { &mut body } else { &mut yaml };
        target.push_str(line);
        target.push('\n');
    }
    if !in_body {
        bail!("front-matter block is never closed");
    }

    // An empty block is a valid (all-defaults) front matter.
    let yaml = if yaml.trim().is_empty() { "{}" } else { &yaml };
    let meta: T = serde_yaml::from_str(yaml).context("parsing front matter")?;
    Ok((meta, body.trim_start_matches('\n').trim_end().to_string()))
}
