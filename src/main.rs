use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use nimtags::atlas::run_atlas;
use nimtags::config::{load_config, ABSOLUTE_MAX_FILE_BYTES};
use nimtags::ctags::write_tags;
use nimtags::extract::index_files;
use nimtags::parser::ParseContext;
use nimtags::scanner::scan_sources;
use nimtags::toolchain::{aux_search_paths, system_root};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "nimtags")]
#[command(version)]
#[command(about = "Sorted extended-format ctags index for Nim source trees")]
struct Cli {
    /// Root directory to index
    #[arg(value_name = "ROOT", default_value = ".")]
    root: PathBuf,

    /// Output file; `-` forces stdout. Defaults to stdout, or to `tags`
    /// under --auto / --atlas.
    #[arg(short = 'f', long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Skip files whose path contains this substring (repeatable)
    #[arg(short = 'e', long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Also index declarations without an export marker
    #[arg(short = 'p', long)]
    private: bool,

    /// Also scan the toolchain's module search paths (`nim dump`);
    /// defaults the output file to `tags`
    #[arg(short = 'a', long)]
    auto: bool,

    /// Also scan the standard-library root
    #[arg(short = 's', long)]
    system: bool,

    /// Split output into a project tag file and a cached dependency tag
    /// file (the cache is rebuilt only when missing)
    #[arg(long, conflicts_with = "atlas_all")]
    atlas: bool,

    /// Like --atlas, but rebuild the dependency cache unconditionally
    #[arg(long)]
    atlas_all: bool,
}

fn spinner(msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(msg);
    spinner
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_dir = cli
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve root directory {}", cli.root.display()))?;

    let cfg = load_config(&base_dir);
    let mut patterns = cfg.exclude.clone();
    patterns.extend(cli.exclude.iter().cloned());

    let atlas_mode = cli.atlas || cli.atlas_all;
    let output = match cli.output {
        // `-` always means stdout, even when --auto would default to a file.
        Some(p) if p.as_os_str() == "-" => None,
        Some(p) => Some(p),
        None if cli.auto || atlas_mode => Some(PathBuf::from("tags")),
        None => cfg.output.clone(),
    };

    let mut ctx = ParseContext::new(cfg.max_file_bytes.min(ABSOLUTE_MAX_FILE_BYTES));

    let aux = if cli.auto || cli.system || atlas_mode {
        aux_search_paths()
    } else {
        Vec::new()
    };

    let scan_spinner = spinner("scanning sources...");
    let mut entries = scan_sources(&base_dir, &patterns)?;

    if atlas_mode {
        scan_spinner.finish_with_message(format!("scanned {} project files", entries.len()));
        let output = output.unwrap_or_else(|| PathBuf::from("tags"));
        return run_atlas(
            &base_dir,
            &entries,
            &aux,
            &patterns,
            cli.private,
            &output,
            cli.atlas_all,
            &cfg.language,
            &mut ctx,
        );
    }

    let mut extra_roots: Vec<PathBuf> = Vec::new();
    if cli.auto {
        extra_roots.extend(aux.iter().cloned());
    }
    if cli.system {
        if let Some(stdlib) = system_root(&aux) {
            if !extra_roots.contains(&stdlib) {
                extra_roots.push(stdlib);
            }
        }
    }
    for root in &extra_roots {
        if *root == base_dir {
            continue;
        }
        let mut found = scan_sources(root, &patterns)?;
        entries.append(&mut found);
    }
    scan_spinner.finish_with_message(format!("scanned {} files", entries.len()));

    let index_spinner = spinner("indexing declarations...");
    let registry = index_files(&entries, cli.private, &mut ctx);
    let count = registry.len();
    let tags = registry.into_sorted();
    index_spinner.finish_with_message(format!("indexed {count} declarations"));

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            write_tags(&mut out, &tags, &base_dir, &cfg.language)?;
            out.flush()?;
            eprintln!("nimtags: wrote {} tags to {}", tags.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            write_tags(&mut out, &tags, &base_dir, &cfg.language)?;
            out.flush()?;
        }
    }

    Ok(())
}
