use anyhow::Result;
use std::io::Write;
use std::path::Path;

use crate::tags::Tag;

/// Serialize sorted tags in the extended ctags format: a fixed four-line
/// header, then one tab-separated record per tag. For a fixed input the
/// output is byte-for-byte reproducible.
pub fn write_tags<W: Write>(
    out: &mut W,
    tags: &[Tag],
    base_dir: &Path,
    language: &str,
) -> Result<()> {
    write_header(out)?;
    for tag in tags {
        let file = display_path(&tag.file, base_dir);
        write!(
            out,
            "{}\t{}\t{};\"\tkind:{}\tline:{}",
            tag.name,
            file,
            tag.line,
            tag.kind.label(),
            tag.line
        )?;
        if !tag.signature.is_empty() {
            write!(out, "\tsignature:{}", tag.signature)?;
        }
        writeln!(out, "\tlanguage:{}", language)?;
    }
    Ok(())
}

/// The header block is emitted even when zero tags follow.
fn write_header<W: Write>(out: &mut W) -> Result<()> {
    writeln!(
        out,
        "!_TAG_FILE_FORMAT\t2\t/extended format; --format=1 will not append ;\" to lines/"
    )?;
    writeln!(out, "!_TAG_FILE_SORTED\t1\t/0=unsorted, 1=sorted, 2=foldcase/")?;
    writeln!(out, "!_TAG_PROGRAM_NAME\t{}\t//", env!("CARGO_PKG_NAME"))?;
    writeln!(out, "!_TAG_PROGRAM_VERSION\t{}\t//", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Tag paths render relative to the base directory when possible; a path
/// outside the base keeps its original form. Separators normalize to '/'.
fn display_path(file: &Path, base_dir: &Path) -> String {
    let shown = file.strip_prefix(base_dir).unwrap_or(file);
    shown.to_string_lossy().replace('\\', "/")
}
