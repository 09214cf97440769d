use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ctags::write_tags;
use crate::debug_log;
use crate::extract::index_files;
use crate::parser::ParseContext;
use crate::scanner::{scan_sources, FileEntry};

/// Sibling cache file holding dependency tags.
pub fn deps_cache_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tags".into());
    name.push(".deps");
    output.with_file_name(name)
}

/// Atlas mode: project and dependency tags land in separate files. The
/// dependency file is a cache, rebuilt only when missing or when a full
/// rebuild is forced; otherwise the existing copy is left untouched.
#[allow(clippy::too_many_arguments)]
pub fn run_atlas(
    base_dir: &Path,
    project_entries: &[FileEntry],
    dep_roots: &[PathBuf],
    patterns: &[String],
    include_private: bool,
    output: &Path,
    rebuild_deps: bool,
    language: &str,
    ctx: &mut ParseContext,
) -> Result<()> {
    let registry = index_files(project_entries, include_private, ctx);
    let tags = registry.into_sorted();
    write_tag_file(output, &tags, base_dir, language)?;
    eprintln!(
        "nimtags: wrote {} project tags to {}",
        tags.len(),
        output.display()
    );

    let cache = deps_cache_path(output);
    if !rebuild_deps && cache.exists() {
        debug_log!("nimtags: reusing dependency tags at {}", cache.display());
        return Ok(());
    }

    let mut entries: Vec<FileEntry> = Vec::new();
    for root in dep_roots {
        match scan_sources(root, patterns) {
            Ok(found) => entries.extend(found),
            Err(e) => debug_log!(
                "nimtags: skipping dependency root {}: {e}",
                root.display()
            ),
        }
    }
    let registry = index_files(&entries, include_private, ctx);
    let tags = registry.into_sorted();
    write_tag_file(&cache, &tags, base_dir, language)?;
    eprintln!(
        "nimtags: wrote {} dependency tags to {}",
        tags.len(),
        cache.display()
    );
    Ok(())
}

fn write_tag_file(path: &Path, tags: &[crate::tags::Tag], base_dir: &Path, language: &str) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_tags(&mut out, tags, base_dir, language)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let deps = dir.path().join("vendor");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::create_dir_all(&deps).unwrap();
        std::fs::write(project.join("app.nim"), "proc appMain*() = discard\n").unwrap();
        std::fs::write(deps.join("lib.nim"), "proc libHelper*() = discard\n").unwrap();
        let output = dir.path().join("tags");
        (dir, project, deps, output)
    }

    #[test]
    fn deps_cache_path_is_a_sibling() {
        assert_eq!(
            deps_cache_path(Path::new("/p/tags")),
            PathBuf::from("/p/tags.deps")
        );
        assert_eq!(
            deps_cache_path(Path::new("out/project.tags")),
            PathBuf::from("out/project.tags.deps")
        );
    }

    #[test]
    fn atlas_splits_project_and_dependency_tags() {
        let (_dir, project, deps, output) = setup();
        let entries = scan_sources(&project, &[]).unwrap();
        let mut ctx = ParseContext::new(512 * 1024);

        run_atlas(&project, &entries, &[deps], &[], false, &output, false, "Nim", &mut ctx).unwrap();

        let project_tags = std::fs::read_to_string(&output).unwrap();
        assert!(project_tags.contains("appMain"));
        assert!(!project_tags.contains("libHelper"));

        let dep_tags = std::fs::read_to_string(deps_cache_path(&output)).unwrap();
        assert!(dep_tags.contains("libHelper"));
        assert!(!dep_tags.contains("appMain"));
        assert!(dep_tags.starts_with("!_TAG_FILE_FORMAT"));
    }

    #[test]
    fn existing_dependency_cache_is_reused() {
        let (_dir, project, deps, output) = setup();
        let entries = scan_sources(&project, &[]).unwrap();
        let mut ctx = ParseContext::new(512 * 1024);

        let cache = deps_cache_path(&output);
        std::fs::write(&cache, "sentinel\n").unwrap();

        run_atlas(&project, &entries, &[deps.clone()], &[], false, &output, false, "Nim", &mut ctx).unwrap();
        assert_eq!(std::fs::read_to_string(&cache).unwrap(), "sentinel\n");

        // A full rebuild replaces the cache.
        run_atlas(&project, &entries, &[deps], &[], false, &output, true, "Nim", &mut ctx).unwrap();
        let rebuilt = std::fs::read_to_string(&cache).unwrap();
        assert!(rebuilt.starts_with("!_TAG_FILE_FORMAT"));
        assert!(rebuilt.contains("libHelper"));
    }

    #[test]
    fn missing_dependency_roots_still_produce_a_cache() {
        let (_dir, project, _deps, output) = setup();
        let entries = scan_sources(&project, &[]).unwrap();
        let mut ctx = ParseContext::new(512 * 1024);

        let gone = project.join("no-such-root");
        run_atlas(&project, &entries, &[gone], &[], false, &output, false, "Nim", &mut ctx).unwrap();

        let dep_tags = std::fs::read_to_string(deps_cache_path(&output)).unwrap();
        let lines: Vec<&str> = dep_tags.lines().collect();
        assert_eq!(lines.len(), 4); // header only
    }
}
