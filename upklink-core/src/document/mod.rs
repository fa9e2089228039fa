//! The mod-script document model.
//!
//! A document owns a mutable text buffer and a tree of typed leaves derived
//! from it, line by line. The text format is line-oriented:
//!
//! - `KEY=VALUE` attribute lines (`MODFILEVERSION`, `UPKFILE`, `GUID`,
//!   `FUNCTION`, ...). The `GUID` value region records the package the
//!   script currently targets: hex bytes, or the `UNSPECIFIED` marker.
//! - `//` comments, whole-line or trailing.
//! - `[NAME]` / `[/NAME]` section markers. Lines between `[CODE]` and
//!   `[/CODE]` are script code and get tokenized; other lines are plain
//!   text.
//! - code lines: hex byte tokens and tagged names, see [`tokenizer`].
//!
//! Derivation is live: any edit through [`ModDocument::replace_range`]
//! re-parses the buffer. Batch mode suspends that so a patch pass can apply
//! many edits with its own offset bookkeeping and pay for exactly one
//! re-derivation at the end.

pub mod tokenizer;

use text_size::{TextRange, TextSize};

use crate::error::{DocumentError, TokenError};

/// Marker stored in the GUID attribute when the target package is unknown.
pub const UNKNOWN_GUID: &str = "UNSPECIFIED";

/// Attribute key of the document package identifier line.
pub const GUID_KEY: &str = "GUID";

const CODE_SECTION: &str = "CODE";

/// Synchronization state of the leaf tree with the text buffer.
///
/// `Flushing` is only observable from inside the one re-derivation that
/// [`ModDocument::end_batch`] performs; it exists so that re-entrant calls
/// during the flush fail loudly instead of recursing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Live,
    Batched,
    Flushing,
}

/// One reference occurrence in the document.
///
/// Exactly one representation is live at a time: a numeric leaf has `name ==
/// None` and its text at `range` is four hex byte groups; a leaf holding a
/// tagged name has `name` set and `value == 0`. The discriminant is `name`,
/// not the value — a virtual-function leaf may legitimately carry value 0 in
/// hex form. Identity is the position, not the value: two leaves may share a
/// value without being the same occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefLeaf {
    pub range: TextRange,
    pub value: i32,
    pub vf: bool,
    pub name: Option<String>,
    /// Exact document text at `range` when this leaf was derived. The patch
    /// engine uses it to verify that a substitution still lands on the text
    /// it was planned against.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafKind {
    /// `KEY=VALUE` line; `value_range` excludes any trailing comment and
    /// surrounding whitespace.
    Attribute { key: String, value_range: TextRange },
    /// `[NAME]` or `[/NAME]`.
    SectionMarker { name: String, closing: bool },
    /// Opcode bytes and raw operands, or a whole downgraded code line.
    HexRun,
    Reference(RefLeaf),
    /// Null-terminated string literal; `decoded` excludes the terminator.
    StringLiteral { decoded: String },
    Comment,
    /// Free text outside code sections.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub range: TextRange,
    pub kind: LeafKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line contents without the newline.
    pub range: TextRange,
    pub leaves: Vec<Leaf>,
}

/// A code line that failed to tokenize. The line is kept in the tree as a
/// plain hex leaf and excluded from reference scanning.
#[derive(Debug)]
pub struct Diagnostic {
    pub line: usize,
    pub range: TextRange,
    pub error: TokenError,
}

#[derive(Debug)]
pub struct ModDocument {
    text: String,
    lines: Vec<Line>,
    diagnostics: Vec<Diagnostic>,
    state: SyncState,
}

impl ModDocument {
    pub fn new(text: impl Into<String>) -> Self {
        let mut doc = Self {
            text: text.into(),
            lines: Vec::new(),
            diagnostics: Vec::new(),
            state: SyncState::Live,
        };
        doc.rederive();
        doc
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn slice(&self, range: TextRange) -> &str {
        &self.text[std::ops::Range::<usize>::from(range)]
    }

    /// All leaves in document order.
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.lines.iter().flat_map(|line| line.leaves.iter())
    }

    /// Suspend live re-derivation. While batched, edits splice the buffer
    /// only and every leaf position is stale; the caller is expected to do
    /// its own offset bookkeeping (see the resolve module).
    pub fn begin_batch(&mut self) -> Result<(), DocumentError> {
        match self.state {
            SyncState::Live => {
                self.state = SyncState::Batched;
                Ok(())
            }
            SyncState::Batched | SyncState::Flushing => Err(DocumentError::AlreadyBatched),
        }
    }

    /// Leave batch mode, re-deriving the leaf tree exactly once.
    pub fn end_batch(&mut self) -> Result<(), DocumentError> {
        match self.state {
            SyncState::Batched => {
                self.state = SyncState::Flushing;
                self.rederive();
                self.state = SyncState::Live;
                Ok(())
            }
            SyncState::Live | SyncState::Flushing => Err(DocumentError::NotBatched),
        }
    }

    /// One-shot re-derivation, regardless of state.
    pub fn force_refresh(&mut self) {
        self.rederive();
    }

    /// Replace `range` with `replacement`. In live mode the tree is
    /// re-derived immediately; in batch mode only the buffer changes.
    pub fn replace_range(&mut self, range: std::ops::Range<usize>, replacement: &str) {
        self.text.replace_range(range, replacement);
        if self.state == SyncState::Live {
            self.rederive();
        }
    }

    /// Value region of the first attribute line with the given key.
    pub fn attribute_value_range(&self, key: &str) -> Option<TextRange> {
        self.leaves().find_map(|leaf| match &leaf.kind {
            LeafKind::Attribute {
                key: k,
                value_range,
            } if k == key => Some(*value_range),
            _ => None,
        })
    }

    pub fn attribute_value(&self, key: &str) -> Option<&str> {
        self.attribute_value_range(key).map(|r| self.slice(r))
    }

    /// The document package identifier region (the `GUID` attribute value).
    pub fn guid_value_range(&self) -> Option<TextRange> {
        self.attribute_value_range(GUID_KEY)
    }

    pub fn guid_text(&self) -> Option<&str> {
        self.attribute_value(GUID_KEY)
    }

    fn rederive(&mut self) {
        let mut lines = Vec::new();
        let mut diagnostics = Vec::new();
        let mut in_code = false;
        let mut offset = 0usize;

        for (index, raw) in self.text.split('\n').enumerate() {
            let start = offset;
            offset += raw.len() + 1;
            let line_range = range(start, start + raw.len());

            let trimmed = raw.trim();
            let lead = raw.len() - raw.trim_start().len();
            let trimmed_range = range(start + lead, start + lead + trimmed.len());

            let mut leaves = Vec::new();
            if trimmed.is_empty() {
                // blank line, no leaves
            } else if trimmed.starts_with("//") {
                leaves.push(Leaf {
                    range: trimmed_range,
                    kind: LeafKind::Comment,
                });
            } else if let Some(marker) = parse_section_marker(trimmed) {
                let (name, closing) = marker;
                if name == CODE_SECTION {
                    in_code = !closing;
                }
                leaves.push(Leaf {
                    range: trimmed_range,
                    kind: LeafKind::SectionMarker {
                        name: name.to_owned(),
                        closing,
                    },
                });
            } else if !in_code {
                if let Some(leaf) = parse_attribute(raw, start) {
                    leaves.push(leaf);
                } else {
                    leaves.push(Leaf {
                        range: trimmed_range,
                        kind: LeafKind::Text,
                    });
                }
            } else {
                match tokenizer::tokenize_code_line(raw, TextSize::new(start as u32)) {
                    Ok(code_leaves) => leaves = code_leaves,
                    Err(error) => {
                        log::debug!("line {}: {}", index + 1, error);
                        diagnostics.push(Diagnostic {
                            line: index,
                            range: trimmed_range,
                            error,
                        });
                        leaves.push(Leaf {
                            range: trimmed_range,
                            kind: LeafKind::HexRun,
                        });
                    }
                }
            }

            lines.push(Line {
                range: line_range,
                leaves,
            });
        }

        self.lines = lines;
        self.diagnostics = diagnostics;
    }
}

fn range(start: usize, end: usize) -> TextRange {
    TextRange::new(TextSize::new(start as u32), TextSize::new(end as u32))
}

fn parse_section_marker(trimmed: &str) -> Option<(&str, bool)> {
    let inner = trimmed.strip_prefix('[')?.strip_suffix(']')?;
    let (name, closing) = match inner.strip_prefix('/') {
        Some(name) => (name, true),
        None => (inner, false),
    };
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return None;
    }
    Some((name, closing))
}

/// `KEY=VALUE` with an uppercase key. The value region stops before any
/// trailing `//` comment and is trimmed on both sides.
fn parse_attribute(raw: &str, line_start: usize) -> Option<Leaf> {
    let eq = raw.find('=')?;
    let key = raw[..eq].trim();
    if key.is_empty()
        || !key
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    {
        return None;
    }

    let value_start = eq + 1;
    let value_end = raw.find("//").filter(|&p| p > eq).unwrap_or(raw.len());
    let value = &raw[value_start..value_end];
    let lead = value.len() - value.trim_start().len();
    let trimmed = value.trim();

    let value_range = range(
        line_start + value_start + lead,
        line_start + value_start + lead + trimmed.len(),
    );
    let leaf_range = range(
        line_start + (raw.len() - raw.trim_start().len()),
        line_start + value_end.min(raw.trim_end().len()).max(eq + 1),
    );
    Some(Leaf {
        range: leaf_range,
        kind: LeafKind::Attribute {
            key: key.to_owned(),
            value_range,
        },
    })
}
