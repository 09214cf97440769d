use anyhow::Result;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// One candidate source file discovered under a scan root.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
}

fn junk_overrides(root: &Path) -> Result<Override> {
    let mut ob = OverrideBuilder::new(root);

    // Build artifacts and VCS internals never hold source of interest.
    for d in [".git", "nimcache", "htmldocs", "testresults", "bin"] {
        ob.add(&format!("!**/{d}"))?;
        ob.add(&format!("!**/{d}/**"))?;
    }

    Ok(ob.build()?)
}

/// Literal-substring exclusion. Both sides are separator-normalized
/// before comparison; empty patterns never match anything.
pub fn is_excluded(rel_path: &Path, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let normalized = rel_path.to_string_lossy().replace('\\', "/");
    patterns.iter().any(|p| {
        if p.is_empty() {
            return false;
        }
        let p = p.replace('\\', "/");
        normalized.contains(&p)
    })
}

/// Enumerate `.nim` files under `root`. Standard ignore filters apply
/// (gitignore, hidden entries), then the exclude patterns. Walk errors
/// on individual entries are skipped, never fatal. The returned order
/// carries no meaning; final output order comes from the tag sorter.
pub fn scan_sources(root: &Path, patterns: &[String]) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let overrides = junk_overrides(root)?;
    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .overrides(overrides)
        .build();

    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };

        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        if abs_path.extension().and_then(|e| e.to_str()) != Some("nim") {
            continue;
        }

        let rel_path = match abs_path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => abs_path.clone(),
        };
        if is_excluded(&rel_path, patterns) {
            continue;
        }

        entries.push(FileEntry { abs_path, rel_path });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patterns_exclude_nothing() {
        assert!(!is_excluded(Path::new("src/app.nim"), &[]));
        assert!(!is_excluded(Path::new("src/app.nim"), &[String::new()]));
    }

    #[test]
    fn substring_match_is_literal_and_case_sensitive() {
        let patterns = vec!["tests/".to_string()];
        assert!(is_excluded(Path::new("tests/t_app.nim"), &patterns));
        assert!(is_excluded(Path::new("pkg/tests/x.nim"), &patterns));
        assert!(!is_excluded(Path::new("Tests/t_app.nim"), &patterns));
        assert!(!is_excluded(Path::new("src/app.nim"), &patterns));
    }

    #[test]
    fn patterns_are_separator_normalized() {
        let patterns = vec!["gen\\out".to_string()];
        assert!(is_excluded(Path::new("src/gen/out/x.nim"), &patterns));
    }

    #[test]
    fn scan_keeps_only_nim_files_outside_junk_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("nimcache")).unwrap();
        std::fs::write(root.join("src/app.nim"), "proc a*() = discard\n").unwrap();
        std::fs::write(root.join("src/notes.txt"), "not source\n").unwrap();
        std::fs::write(root.join("nimcache/app.nim"), "proc b*() = discard\n").unwrap();

        let entries = scan_sources(root, &[]).unwrap();
        let rels: Vec<String> = entries
            .iter()
            .map(|e| e.rel_path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rels, vec!["src/app.nim"]);
    }

    #[test]
    fn scan_applies_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("keep.nim"), "proc a*() = discard\n").unwrap();
        std::fs::write(root.join("drop.nim"), "proc b*() = discard\n").unwrap();

        let entries = scan_sources(root, &["drop.nim".to_string()]).unwrap();
        let rels: Vec<String> = entries
            .iter()
            .map(|e| e.rel_path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rels, vec!["keep.nim"]);
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let entries = scan_sources(&gone, &[]).unwrap();
        assert!(entries.is_empty());
    }
}
