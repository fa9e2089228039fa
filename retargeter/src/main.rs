use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, ValueEnum};
use itertools::Itertools;
use serde::Serialize;
use std::path::{Path, PathBuf};

use upklink_core::document::{ModDocument, UNKNOWN_GUID};
use upklink_core::format::package::UpkPackage;
use upklink_core::resolve::{self, Resolution};
use upklink_core::hex;

/// Error message string for missing reference name.
const NAME_NOT_FOUND: &str = "name not found!";
/// Error message string for missing reference.
const REF_NOT_FOUND: &str = "ref not found!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Direction {
    /// convert hex references to tagged names (needs --source)
    Names,
    /// convert references to destination hex (needs --dest)
    Hex,
}

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// mod script file to rewrite
    #[arg(short, long, required = true)]
    modfile: PathBuf,

    /// source package for hex -> names lookups
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// destination package for names -> hex lookups
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// write the rewritten script here instead of in place
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// write the per-reference resolution table as YAML
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// treat a GUID mismatch between script and package as an error
    #[arg(long)]
    strict_guid: bool,

    /// conversion direction
    #[arg(value_enum)]
    direction: Direction,
}

#[derive(Debug, Serialize)]
struct ReportRow {
    source: String,
    vf: bool,
    name: Option<String>,
    dest: Option<String>,
    status: String,
    occurrences: usize,
}

fn load_package(path: &Path) -> Result<UpkPackage> {
    UpkPackage::from_file(path).with_context(|| format!("parsing package {}", path.display()))
}

/// Compare the GUID the script records against the package on disk; the
/// `UNSPECIFIED` marker matches anything.
fn check_guid(doc: &ModDocument, package: &UpkPackage, strict: bool) -> Result<()> {
    let Some(recorded) = doc.guid_text() else {
        return Ok(());
    };
    let actual = hex::bytes_to_hex(package.guid());
    if recorded != UNKNOWN_GUID && recorded != actual {
        if strict {
            bail!(
                "mismatching GUIDs: script records {}, package has {}",
                recorded,
                actual
            );
        }
        log::warn!(
            "mismatching GUIDs detected: script records {}, package has {}",
            recorded,
            actual
        );
    }
    Ok(())
}

fn build_report_rows(rows: &[Resolution], reverse_attempted: bool) -> Vec<ReportRow> {
    let summary = rows
        .iter()
        .map(|row| (row.leaf.value, row.leaf.vf, row.name.clone(), row.dest))
        .counts();
    let mut table: Vec<ReportRow> = summary
        .into_iter()
        .map(|((value, vf, name, dest), occurrences)| {
            let status = if name.is_none() {
                NAME_NOT_FOUND
            } else if reverse_attempted && dest.is_none() {
                REF_NOT_FOUND
            } else {
                "ok"
            };
            let source = if value != 0 {
                hex::int_to_hex(value)
            } else {
                resolve::tag_name(name.as_deref().unwrap_or_default(), vf)
            };
            ReportRow {
                source,
                vf,
                name,
                dest: dest.map(hex::int_to_hex),
                status: status.to_owned(),
                occurrences,
            }
        })
        .collect();
    table.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.name.cmp(&b.name)));
    table
}

fn write_report(path: Option<&Path>, rows: &[Resolution], reverse_attempted: bool) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let table = build_report_rows(rows, reverse_attempted);
    let mut writer = std::fs::File::create(path)
        .with_context(|| format!("creating report {}", path.display()))?;
    serde_yaml::to_writer(&mut writer, &table)?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let text = std::fs::read_to_string(&args.modfile)
        .with_context(|| format!("reading {}", args.modfile.display()))?;
    let mut doc = ModDocument::new(text);
    for diag in doc.diagnostics() {
        log::warn!(
            "{}: line {}: {}",
            args.modfile.display(),
            diag.line + 1,
            diag.error
        );
    }

    let refs = resolve::extract_references(&doc);
    log::info!("extracted {} reference occurrences", refs.len());

    let (rows, outcome, reverse_attempted) = match args.direction {
        Direction::Names => {
            let path = args
                .source
                .as_deref()
                .context("hex -> names conversion needs --source")?;
            let package = load_package(path)?;
            check_guid(&doc, &package, args.strict_guid)?;
            let rows = resolve::resolve_forward(&refs, &package);
            let outcome = resolve::apply_hex_to_names(&mut doc, &rows)?;
            (rows, outcome, false)
        }
        Direction::Hex => {
            let path = args
                .dest
                .as_deref()
                .context("names -> hex conversion needs --dest")?;
            let dest = load_package(path)?;
            // with a source package, numeric leaves get their names looked
            // up first; without one, only leaves already holding a name can
            // be retargeted
            let mut rows = match args.source.as_deref() {
                Some(source_path) => {
                    let source = load_package(source_path)?;
                    check_guid(&doc, &source, args.strict_guid)?;
                    resolve::resolve_forward(&refs, &source)
                }
                None => refs
                    .iter()
                    .map(|leaf| Resolution {
                        leaf: leaf.clone(),
                        name: leaf.name.clone(),
                        dest: None,
                    })
                    .collect(),
            };
            resolve::resolve_reverse(&mut rows, &dest);
            let outcome = resolve::apply_names_to_hex(&mut doc, &rows, &dest)?;
            (rows, outcome, true)
        }
    };

    let out = args.output.as_ref().unwrap_or(&args.modfile);
    std::fs::write(out, doc.text()).with_context(|| format!("writing {}", out.display()))?;
    log::info!(
        "patched {} references ({} skipped), wrote {}",
        outcome.patched,
        outcome.skipped,
        out.display()
    );
    if outcome.skipped > 0 {
        log::warn!("{} references could not be resolved", outcome.skipped);
    }

    write_report(args.report.as_deref(), &rows, reverse_attempted)?;

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("Error: {:?}", e);
        std::process::exit(1);
    }
}
