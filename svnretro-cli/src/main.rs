//! SvnRetro command-line driver.
//!
//! Parses flags, expands the `--read` glob, loads dump files into a
//! `Repos`, applies an optional YAML ruleset via `Transformer`, and streams
//! the result back out through `Encoder`. The dump-stream semantics all live
//! in `svnretro-core`; this binary is the external-collaborator glue around
//! it — flag parsing, YAML ingestion, globbing, report emission, logging.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use svnretro_core::{
    DumpFile, Encoder, FirstLast, Mode, Repos, Rules, TransformReport, Transformer,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "svnretro")]
#[command(author = "SvnRetro Contributors")]
#[command(version)]
#[command(about = "Retroactively rewrite the structural history of an SVN dump stream")]
struct Cli {
    /// Input dump file path or glob.
    #[arg(long = "read")]
    read: String,

    /// YAML ruleset describing retrofit targets, filters, and rewrites.
    #[arg(long = "rules")]
    rules: Option<PathBuf>,

    /// Write a single combined dump to this path.
    #[arg(long = "outfile", conflicts_with = "outdir")]
    outfile: Option<PathBuf>,

    /// Write one dump per input file into this directory.
    #[arg(long = "outdir")]
    outdir: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long = "verbose", conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(long = "quiet")]
    quiet: bool,

    /// Stop loading after this revision.
    #[arg(long = "stop")]
    stop: Option<i64>,

    /// Truncate content blobs larger than this many bytes.
    #[arg(long = "reduce-data")]
    reduce_data: Option<u64>,

    /// Delete the input dump(s) after a successful write (requires `--outdir`).
    #[arg(long = "remove-originals")]
    remove_originals: bool,

    /// Write a YAML analysis report of folder/branch creation revisions.
    #[arg(long = "report")]
    report: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(err) = run(cli) {
        error!(error = %err, "svnretro failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .without_time()
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if cli.outfile.is_none() && cli.outdir.is_none() {
        bail!("one of --outfile or --outdir is required to produce output");
    }
    if cli.remove_originals && cli.outdir.is_none() {
        bail!("--remove-originals requires --outdir");
    }

    let inputs = expand_read_glob(&cli.read)?;
    if inputs.is_empty() {
        bail!("--read {:?} matched no files", cli.read);
    }

    let mut repos = Repos::new();
    for path in &inputs {
        info!(path = %path.display(), "loading dump file");
        let dump = DumpFile::open(path).with_context(|| format!("loading {}", path.display()))?;
        repos.add(dump)?;
    }

    if let Some(stop) = cli.stop {
        let before = repos.revisions.len();
        repos.revisions.retain(|r| r.number <= stop);
        info!(
            stop,
            dropped = before - repos.revisions.len(),
            "stopped loading at requested revision"
        );
    }

    if let Some(limit) = cli.reduce_data {
        reduce_data(&mut repos, limit);
    }

    let rules = match &cli.rules {
        Some(path) => load_rules(path)?,
        None => Rules::default(),
    };

    let report = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let transformer = Transformer::new(&rules);
        transformer.transform(&mut repos)
    }))
    .map_err(|payload| {
        anyhow::anyhow!(
            "ruleset is incoherent with the loaded repository: {}",
            panic_message(&payload)
        )
    })?;

    info!(
        filtered = report.nodes_filtered,
        prop_stripped = report.nodes_prop_stripped,
        retrofitted = report.paths_retrofitted.len(),
        refit = report.branches_refit,
        "transform complete"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building encoder runtime")?;

    runtime.block_on(async {
        if let Some(outfile) = &cli.outfile {
            write_single(&mut repos, outfile).await
        } else if let Some(outdir) = &cli.outdir {
            write_per_input(&mut repos, outdir).await
        } else {
            unreachable!("checked above")
        }
    })?;

    if cli.remove_originals {
        for path in &inputs {
            fs::remove_file(path)
                .with_context(|| format!("removing original {}", path.display()))?;
            info!(path = %path.display(), "removed original dump file");
        }
    }

    if let Some(report_path) = &cli.report {
        write_report(report_path, &rules, &report)?;
    }

    Ok(())
}

/// `--read` accepts a literal file path or a glob pattern; matches are
/// sorted so multi-file repositories load in a stable, predictable order.
fn expand_read_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let direct = Path::new(pattern);
    if direct.is_file() {
        return Ok(vec![direct.to_path_buf()]);
    }

    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .with_context(|| format!("invalid glob pattern {pattern:?}"))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

fn load_rules(path: &Path) -> Result<Rules> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading rules file {}", path.display()))?;
    let rules: Rules = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing rules file {}", path.display()))?;
    if !rules.overfork.is_empty() {
        tracing::debug!(
            count = rules.overfork.len(),
            "rules file declares overfork entries; overfork is not yet implemented and will be ignored"
        );
    }
    Ok(rules)
}

/// Truncates oversized content blobs in place. `Node::encode` recomputes
/// `Content-length` from the new (shorter) slice, so no other bookkeeping is
/// needed.
fn reduce_data(repos: &mut Repos, limit: u64) {
    let limit = limit as usize;
    let mut truncated = 0usize;
    for revision in repos.revisions.iter_mut() {
        for node in revision.nodes.iter_mut() {
            if node.content.len() > limit {
                node.content = node.content.slice(0..limit);
                truncated += 1;
            }
        }
    }
    if truncated > 0 {
        warn!(truncated, limit, "reduced oversized content blobs");
    }
}

async fn write_single(repos: &mut Repos, outfile: &Path) -> Result<()> {
    let file = tokio::fs::File::create(outfile)
        .await
        .with_context(|| format!("creating {}", outfile.display()))?;
    let encoder = Encoder::spawn(file, Mode::Buffered);
    let start = repos.revisions.first().map(|r| r.number).unwrap_or(0);
    let end = repos.head();
    info!(path = %outfile.display(), start, end, "encoding dump");
    repos
        .encode(&encoder, start, end, |p| {
            eprint!("\r{:6.2}% r{}", p.percent, p.revision);
        })
        .await?;
    eprintln!();
    encoder.close().await?;
    Ok(())
}

async fn write_per_input(repos: &mut Repos, outdir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(outdir)
        .await
        .with_context(|| format!("creating {}", outdir.display()))?;

    let head = repos.head();
    let metas: Vec<(PathBuf, i64, i64)> = repos
        .dump_files
        .iter()
        .map(|m| (m.path.clone(), m.start, m.end.min(head)))
        .filter(|(_, start, end)| *start <= *end)
        .collect();

    for (src_path, start, end) in metas {
        let name = src_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("input path has no filename: {}", src_path.display()))?;
        let dest = outdir.join(name);
        let file = tokio::fs::File::create(&dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        let encoder = Encoder::spawn(file, Mode::Buffered);
        info!(path = %dest.display(), start, end, "encoding dump");
        repos
            .encode(&encoder, start, end, |p| {
                eprint!("\r{:6.2}% r{}", p.percent, p.revision);
            })
            .await?;
        eprintln!();
        encoder.close().await?;
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ReportDoc<'a> {
    rules: &'a Rules,
    nodes_filtered: usize,
    nodes_prop_stripped: usize,
    paths_retrofitted: &'a [String],
    branches_refit: usize,
    folders: &'a BTreeMap<String, FirstLast>,
    branches: &'a BTreeMap<String, FirstLast>,
}

fn write_report(path: &Path, rules: &Rules, report: &TransformReport) -> Result<()> {
    let doc = ReportDoc {
        rules,
        nodes_filtered: report.nodes_filtered,
        nodes_prop_stripped: report.nodes_prop_stripped,
        paths_retrofitted: &report.paths_retrofitted,
        branches_refit: report.branches_refit,
        folders: &report.folder_creations,
        branches: &report.branch_creations,
    };
    let file =
        fs::File::create(path).with_context(|| format!("creating report {}", path.display()))?;
    serde_yaml::to_writer(file, &doc).context("writing report yaml")?;
    info!(path = %path.display(), "wrote analysis report");
    Ok(())
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
