use std::path::PathBuf;
use std::process::Command;

use crate::debug_log;

/// Ask the Nim toolchain for its module search paths via `nim dump`.
/// Every failure mode (binary missing, non-zero exit, unparsable
/// output) collapses to an empty list; auto mode then proceeds with the
/// explicit roots alone.
pub fn aux_search_paths() -> Vec<PathBuf> {
    let output = match Command::new("nim")
        .args(["dump", "--verbosity:0", "dummy"])
        .output()
    {
        Ok(o) => o,
        Err(e) => {
            debug_log!("nimtags: nim dump unavailable: {e}");
            return Vec::new();
        }
    };

    // The path list lands on stderr; keep stdout as a fallback for
    // toolchains that redirect it.
    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    existing_dirs(&text)
}

/// Output lines that name existing absolute directories, first-seen
/// order, deduplicated.
fn existing_dirs(dump_output: &str) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for line in dump_output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let path = PathBuf::from(line);
        if !path.is_absolute() || !path.is_dir() {
            continue;
        }
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

/// The standard-library root among the search paths: the directory that
/// ships `system.nim`.
pub fn system_root(paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .find(|p| p.join("system.nim").is_file())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_dirs_keeps_real_directories_only() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();

        let dump = format!(
            "Hint: used config file\n{}\n{}\nrelative/path\n/definitely/not/there\n{}\n",
            lib.display(),
            lib.display(),
            dir.path().display(),
        );
        let found = existing_dirs(&dump);
        assert_eq!(found, vec![lib.clone(), dir.path().to_path_buf()]);
    }

    #[test]
    fn system_root_needs_system_nim() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        let pkg = dir.path().join("pkg");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::create_dir_all(&pkg).unwrap();

        let paths = vec![pkg.clone(), lib.clone()];
        assert_eq!(system_root(&paths), None);

        std::fs::write(lib.join("system.nim"), "# stdlib entry\n").unwrap();
        assert_eq!(system_root(&paths), Some(lib));
    }
}
