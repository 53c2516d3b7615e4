//! Prompt file loading for `batch create`.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum PromptEntry {
    Text(String),
    Object {
        #[serde(alias = "prompt")]
        text: String,
    },
}

impl PromptEntry {
    fn into_text(self) -> String {
        match self {
            PromptEntry::Text(text) | PromptEntry::Object { text } => text,
        }
    }
}

/// Read prompts from `path`.
pub fn load(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt file {}", path.display()))?;
    parse(&raw).with_context(|| format!("invalid prompt file {}", path.display()))
}

/// A JSON array of strings or `{"text": ...}` objects, or plain text with
/// one prompt per blank-line separated paragraph.
pub fn parse(raw: &str) -> anyhow::Result<Vec<String>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        let entries: Vec<PromptEntry> = serde_json::from_str(trimmed)?;
        return Ok(entries
            .into_iter()
            .map(PromptEntry::into_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect());
    }

    let mut prompts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                prompts.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        prompts.push(current.join("\n"));
    }
    Ok(prompts)
}

/// Batch name used when `--name` is not given.
pub fn default_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "batch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_separate_prompts() {
        let raw = "Write a haiku\nabout rust\n\n\nSummarise the news\n";
        assert_eq!(
            parse(raw).unwrap(),
            ["Write a haiku\nabout rust", "Summarise the news"]
        );
    }

    #[test]
    fn json_array_accepts_strings_and_objects() {
        let raw = r#"["p1", {"text": "p2"}, {"prompt": "p3"}, "  "]"#;
        assert_eq!(parse(raw).unwrap(), ["p1", "p2", "p3"]);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse("[\"p1\", ").is_err());
    }

    #[test]
    fn empty_file_has_no_prompts() {
        assert!(parse("\n\n").unwrap().is_empty());
    }

    #[test]
    fn name_defaults_to_file_stem() {
        assert_eq!(default_name(Path::new("/tmp/nightly.txt")), "nightly");
        assert_eq!(default_name(Path::new("/")), "batch");
    }
}
