use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard safety ceiling: files larger than this are **always** skipped,
/// regardless of config. Generated Nim bindings can reach megabytes and
/// bring nothing but noise to a tag index.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 4_000_000; // 4 MB

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extra exclude substrings, applied before any `-e` CLI patterns.
    pub exclude: Vec<String>,

    /// Default output path when the CLI does not name one.
    pub output: Option<PathBuf>,

    /// Language name written into every tag record.
    pub language: String,

    /// Files larger than this are skipped without parsing.
    pub max_file_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude: vec![],
            output: None,
            language: "Nim".to_string(),
            // 512 KB default, enough for any hand-written module.
            max_file_bytes: 512 * 1024,
        }
    }
}

pub fn load_config(root: &Path) -> Config {
    let primary = root.join(".nimtags.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default())
}
