//! The reference resolution / patch engine.
//!
//! Orchestrates the two conversion directions over a [`ModDocument`]:
//! hex -> names against a source package, names -> hex against a destination
//! package. Substitutions run as one offset-tracked batch: leaf positions
//! are computed against the original buffer, a single running offset corrects
//! them as replacements of different lengths land, and the document pays for
//! exactly one re-derivation when the batch ends.

use text_size::TextRange;

use crate::document::{LeafKind, ModDocument, RefLeaf, UNKNOWN_GUID};
use crate::error::PatchError;
use crate::format::package::UpkPackage;
use crate::hex;

pub use crate::document::tokenizer::{tag_name, untag_name};

/// One row of the resolution table: a reference occurrence plus the lookup
/// results collected so far. `None` results are the per-row soft failures
/// ("name not found" / "reference not found"); they never abort a batch.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub leaf: RefLeaf,
    /// Forward lookup result, or the name the leaf already carries.
    pub name: Option<String>,
    /// Reverse lookup result against the destination package.
    pub dest: Option<i32>,
}

/// Outcome of one patch batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Reference substitutions written.
    pub patched: usize,
    /// Rows skipped because their lookup failed.
    pub skipped: usize,
    /// Net buffer length change, identifier substitution included.
    pub delta: isize,
}

/// Every reference occurrence in the document, in document order.
///
/// Occurrences sharing a value stay separate rows; each location is resolved
/// and substituted independently. Grouping equal values is a presentation
/// concern left to callers.
pub fn extract_references(doc: &ModDocument) -> Vec<RefLeaf> {
    doc.leaves()
        .filter_map(|leaf| match &leaf.kind {
            LeafKind::Reference(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

/// Forward resolution: numeric leaves are looked up in `source` (in the
/// namespace selected by their flag); leaves already holding a name keep it.
pub fn resolve_forward(refs: &[RefLeaf], source: &UpkPackage) -> Vec<Resolution> {
    refs.iter()
        .map(|leaf| {
            // a leaf already holding a tagged name keeps it; numeric leaves
            // are looked up, including the legitimate zero virtual-function
            // index (only ordinary references treat 0 as "none")
            let name = if let Some(name) = &leaf.name {
                Some(name.clone())
            } else {
                let looked_up = if leaf.vf {
                    source.vf_name(leaf.value).map(str::to_owned)
                } else {
                    source.object_name(leaf.value)
                };
                if looked_up.is_none() {
                    log::warn!(
                        "no name for {} reference {}",
                        if leaf.vf { "virtual-function" } else { "ordinary" },
                        hex::int_to_hex(leaf.value)
                    );
                }
                looked_up
            };
            Resolution {
                leaf: leaf.clone(),
                name,
                dest: None,
            }
        })
        .collect()
}

/// Reverse resolution: each row's name is looked up in `dest`, honoring the
/// namespace-specific failure shapes (0 can only mean "not found" for
/// ordinary references; a virtual-function index of 0 is a legitimate hit).
pub fn resolve_reverse(rows: &mut [Resolution], dest: &UpkPackage) {
    for row in rows.iter_mut() {
        row.dest = row.name.as_deref().and_then(|name| {
            let found = if row.leaf.vf {
                dest.find_vf(name).map(|index| index as i32)
            } else {
                dest.find_object(name)
            };
            if found.is_none() {
                log::warn!("no destination reference for name {:?}", name);
            }
            found
        });
    }
}

/// Rewrite the document package identifier: the destination package's GUID,
/// or the `UNSPECIFIED` marker when no package is given. Returns the length
/// delta. Runs as a live single edit; the batched conversions below plan the
/// same substitution into their patch list instead.
pub fn replace_identifier(
    doc: &mut ModDocument,
    target: Option<&UpkPackage>,
) -> Result<isize, PatchError> {
    let patch = plan_identifier(doc, target)?;
    let delta = patch.replace.len() as isize - patch.find.len() as isize;
    doc.replace_range(patch.start..patch.start + patch.find.len(), &patch.replace);
    Ok(delta)
}

/// Hex -> names: clear the identifier to `UNSPECIFIED`, then replace every
/// resolved numeric leaf with its tagged name. Rows whose forward lookup
/// failed are skipped and counted; the rest still get applied.
pub fn apply_hex_to_names(
    doc: &mut ModDocument,
    rows: &[Resolution],
) -> Result<ApplyReport, PatchError> {
    let mut patches = vec![plan_identifier(doc, None)?];
    let mut report = ApplyReport::default();
    for row in rows {
        if row.leaf.name.is_some() {
            // already a name
            continue;
        }
        match &row.name {
            Some(name) => {
                patches.push(plan_leaf(&row.leaf, tag_name(name, row.leaf.vf)));
                report.patched += 1;
            }
            None => report.skipped += 1,
        }
    }
    report.delta = apply_patches(doc, patches)?;
    Ok(report)
}

/// Names -> hex: rewrite the identifier to the destination package's GUID,
/// then replace every row with a resolved destination value by that value's
/// hex text, whether the leaf currently holds a tagged name or source hex.
pub fn apply_names_to_hex(
    doc: &mut ModDocument,
    rows: &[Resolution],
    dest: &UpkPackage,
) -> Result<ApplyReport, PatchError> {
    let mut patches = vec![plan_identifier(doc, Some(dest))?];
    let mut report = ApplyReport::default();
    for row in rows {
        match row.dest {
            Some(value) => {
                patches.push(plan_leaf(&row.leaf, hex::int_to_hex(value)));
                report.patched += 1;
            }
            None => report.skipped += 1,
        }
    }
    report.delta = apply_patches(doc, patches)?;
    Ok(report)
}

/// One planned substitution: the find text is captured from the current
/// derivation so the batch can verify it still matches at the corrected
/// position before writing.
#[derive(Debug)]
struct PlannedPatch {
    start: usize,
    find: String,
    replace: String,
}

fn plan_leaf(leaf: &RefLeaf, replace: String) -> PlannedPatch {
    PlannedPatch {
        start: leaf.range.start().into(),
        // find what the leaf looked like when it was derived, not whatever
        // happens to sit at that range now
        find: leaf.text.clone(),
        replace,
    }
}

fn plan_identifier(
    doc: &ModDocument,
    target: Option<&UpkPackage>,
) -> Result<PlannedPatch, PatchError> {
    let range: TextRange = doc.guid_value_range().ok_or(PatchError::MissingIdentifier)?;
    let replace = match target {
        Some(package) => hex::bytes_to_hex(package.guid()),
        None => UNKNOWN_GUID.to_owned(),
    };
    Ok(PlannedPatch {
        start: range.start().into(),
        find: doc.slice(range).to_owned(),
        replace,
    })
}

/// Apply the patches in increasing original position with a single running
/// offset. Each patch verifies its find text at the corrected position; a
/// mismatch aborts the remaining patches but keeps the ones already written,
/// and the document is re-derived either way.
fn apply_patches(doc: &mut ModDocument, mut patches: Vec<PlannedPatch>) -> Result<isize, PatchError> {
    patches.sort_by_key(|patch| patch.start);
    doc.begin_batch()?;

    let mut offset: isize = 0;
    let mut previous_end = 0usize;
    for patch in &patches {
        match apply_one(doc, patch, offset, previous_end) {
            Ok((delta, end)) => {
                offset += delta;
                previous_end = end;
            }
            Err(error) => {
                // no rollback: the buffer stays partially patched but valid
                doc.end_batch()?;
                return Err(error);
            }
        }
    }

    doc.end_batch()?;
    Ok(offset)
}

fn apply_one(
    doc: &mut ModDocument,
    patch: &PlannedPatch,
    offset: isize,
    previous_end: usize,
) -> Result<(isize, usize), PatchError> {
    let start = usize::try_from(patch.start as isize + offset).map_err(|_| {
        PatchError::OutOfOrder {
            offset: 0,
            previous: previous_end,
        }
    })?;
    if start < previous_end {
        return Err(PatchError::OutOfOrder {
            offset: start,
            previous: previous_end,
        });
    }
    let end = start + patch.find.len();
    match doc.text().get(start..end) {
        Some(found) if found == patch.find => {}
        found => {
            return Err(PatchError::OffsetMismatch {
                offset: start,
                expected: patch.find.clone(),
                found: found.unwrap_or("<past end of buffer>").to_owned(),
            });
        }
    }
    doc.replace_range(start..end, &patch.replace);
    Ok((
        patch.replace.len() as isize - patch.find.len() as isize,
        start + patch.replace.len(),
    ))
}
