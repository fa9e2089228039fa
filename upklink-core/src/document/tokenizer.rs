//! Tokenizer for script code lines.
//!
//! A code line is a whitespace-separated sequence of two-digit hex byte
//! tokens and `{{...}}` tagged names. Lines are walked opcode by opcode
//! using the operand layouts below, which cover the reference-bearing subset
//! of the bytecode tokens (plus the common fixed-size ones so that lines walk
//! cleanly). Opcode semantics are not modeled here; only operand boundaries.

use text_size::{TextRange, TextSize};

use super::{Leaf, LeafKind, RefLeaf};
use crate::error::TokenError;
use crate::hex;

/// Marker prefix of a tagged virtual-function name.
pub const TAG_VF_MARKER: &str = "vf:";

/// Wrap a resolved name so that a later re-parse can recover both the name
/// and its namespace flag without consulting any symbol table.
pub fn tag_name(name: &str, vf: bool) -> String {
    if vf {
        format!("{{{{{}{}}}}}", TAG_VF_MARKER, name)
    } else {
        format!("{{{{{}}}}}", name)
    }
}

/// Exact inverse of [`tag_name`].
pub fn untag_name(text: &str) -> Option<(&str, bool)> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    match inner.strip_prefix(TAG_VF_MARKER) {
        Some(name) => Some((name, true)),
        None => Some((inner, false)),
    }
}

/// Operand shapes understood by the line walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    /// Fixed run of raw operand bytes.
    Raw(usize),
    /// 4-byte ordinary object reference.
    Ref,
    /// 4-byte virtual-function name index.
    VfRef,
    /// Null-terminated string literal.
    Str,
}

/// Operand layout for one opcode, or `None` for opcodes this tool does not
/// know. The caller downgrades the whole line rather than guessing at
/// operand boundaries past an unknown opcode.
pub fn operand_layout(opcode: u8) -> Option<&'static [OperandShape]> {
    use OperandShape::*;
    Some(match opcode {
        0x00 /* local variable */ => &[Ref],
        0x01 /* instance variable */ => &[Ref],
        0x02 /* default variable */ => &[Ref],
        0x04 /* return */ => &[],
        0x06 /* jump */ => &[Raw(2)],
        0x07 /* jump-if-not */ => &[Raw(2)],
        0x0A /* nothing */ => &[],
        0x0F /* let */ => &[],
        0x16 /* end of function parms */ => &[],
        0x1B /* virtual function: name index + number word */ => &[VfRef, Raw(4)],
        0x1C /* final function */ => &[Ref],
        0x1D /* int const */ => &[Raw(4)],
        0x1E /* float const */ => &[Raw(4)],
        0x1F /* string const */ => &[Str],
        0x20 /* object const */ => &[Ref],
        0x21 /* name const */ => &[Raw(8)],
        0x24 /* int const byte */ => &[Raw(1)],
        0x25 /* int zero */ => &[],
        0x26 /* int one */ => &[],
        0x27 /* true */ => &[],
        0x28 /* false */ => &[],
        _ => return None,
    })
}

/// Decode a null-terminated string literal from a stream of two-digit byte
/// tokens: tokens are consumed up to and including the `00` terminator. The
/// terminator is part of the consumed span but not of the decoded text.
/// Running out of tokens first is a [`TokenError::TruncatedString`].
pub fn take_null_terminated(tokens: &[&str]) -> Result<(String, usize), TokenError> {
    let mut bytes = Vec::new();
    for (consumed, token) in tokens.iter().enumerate() {
        let byte = hex::parse_byte_token(token).ok_or_else(|| TokenError::StrayToken {
            token: (*token).to_owned(),
        })?;
        if byte == 0 {
            let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(&bytes);
            return Ok((decoded.into_owned(), consumed + 1));
        }
        bytes.push(byte);
    }
    Err(TokenError::TruncatedString)
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    range: TextRange,
}

/// Split a line into whitespace-separated tokens with absolute ranges.
/// A `//` token ends the scan; the rest of the line is the comment.
fn lex(line: &str, base: TextSize) -> (Vec<Token<'_>>, Option<TextRange>) {
    let mut tokens = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if line[i..].starts_with("//") {
            let range = TextRange::new(
                base + TextSize::new(i as u32),
                base + TextSize::new(line.trim_end().len() as u32),
            );
            return (tokens, Some(range));
        }
        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        tokens.push(Token {
            text: &line[start..i],
            range: TextRange::new(
                base + TextSize::new(start as u32),
                base + TextSize::new(i as u32),
            ),
        });
    }
    (tokens, None)
}

/// Running coalescer for plain hex leaves (opcode bytes and raw operands).
fn extend_run(run: &mut Option<TextRange>, range: TextRange) {
    *run = Some(match *run {
        Some(r) => r.cover(range),
        None => range,
    });
}

fn flush_run(run: &mut Option<TextRange>, leaves: &mut Vec<Leaf>) {
    if let Some(range) = run.take() {
        leaves.push(Leaf {
            range,
            kind: LeafKind::HexRun,
        });
    }
}

/// Tokenize one code line into typed leaves, or fail with the error that the
/// document parser records as a diagnostic for this line.
pub(super) fn tokenize_code_line(line: &str, base: TextSize) -> Result<Vec<Leaf>, TokenError> {
    let (tokens, comment) = lex(line, base);
    let mut leaves = Vec::new();
    let mut run: Option<TextRange> = None;
    let mut i = 0;

    while i < tokens.len() {
        let op_token = tokens[i];
        let opcode =
            hex::parse_byte_token(op_token.text).ok_or_else(|| TokenError::StrayToken {
                token: op_token.text.to_owned(),
            })?;
        let layout = operand_layout(opcode).ok_or(TokenError::UnknownOpcode { opcode })?;
        extend_run(&mut run, op_token.range);
        i += 1;

        for shape in layout {
            match *shape {
                OperandShape::Raw(count) => {
                    for taken in 0..count {
                        let token = tokens.get(i).ok_or(TokenError::TruncatedOperand {
                            opcode,
                            needed: count - taken,
                        })?;
                        hex::parse_byte_token(token.text).ok_or_else(|| {
                            TokenError::StrayToken {
                                token: token.text.to_owned(),
                            }
                        })?;
                        extend_run(&mut run, token.range);
                        i += 1;
                    }
                }
                OperandShape::Ref | OperandShape::VfRef => {
                    let token = tokens.get(i).ok_or(TokenError::TruncatedOperand {
                        opcode,
                        needed: 4,
                    })?;
                    if let Some((name, vf)) = untag_name(token.text) {
                        flush_run(&mut run, &mut leaves);
                        leaves.push(Leaf {
                            range: token.range,
                            kind: LeafKind::Reference(RefLeaf {
                                range: token.range,
                                value: 0,
                                vf,
                                name: Some(name.to_owned()),
                                text: token.text.to_owned(),
                            }),
                        });
                        i += 1;
                        continue;
                    }
                    let mut bytes = [0u8; 4];
                    let start = token.range;
                    let mut end = token.range;
                    for (taken, byte) in bytes.iter_mut().enumerate() {
                        let token = tokens.get(i).ok_or(TokenError::TruncatedOperand {
                            opcode,
                            needed: 4 - taken,
                        })?;
                        *byte = hex::parse_byte_token(token.text).ok_or_else(|| {
                            TokenError::StrayToken {
                                token: token.text.to_owned(),
                            }
                        })?;
                        end = token.range;
                        i += 1;
                    }
                    let range = start.cover(end);
                    let text = line[usize::from(range.start() - base)..usize::from(range.end() - base)]
                        .to_owned();
                    flush_run(&mut run, &mut leaves);
                    leaves.push(Leaf {
                        range,
                        kind: LeafKind::Reference(RefLeaf {
                            range,
                            value: i32::from_be_bytes(bytes),
                            vf: *shape == OperandShape::VfRef,
                            name: None,
                            text,
                        }),
                    });
                }
                OperandShape::Str => {
                    let texts: Vec<&str> = tokens[i..].iter().map(|t| t.text).collect();
                    let (decoded, consumed) = take_null_terminated(&texts)?;
                    let range = tokens[i].range.cover(tokens[i + consumed - 1].range);
                    flush_run(&mut run, &mut leaves);
                    leaves.push(Leaf {
                        range,
                        kind: LeafKind::StringLiteral { decoded },
                    });
                    i += consumed;
                }
            }
        }
    }

    flush_run(&mut run, &mut leaves);
    if let Some(range) = comment {
        leaves.push(Leaf {
            range,
            kind: LeafKind::Comment,
        });
    }
    Ok(leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for (name, vf) in [
            ("Foo", false),
            ("TestClass.DoThing", true),
            ("Engine.Actor.Tick", false),
            ("OnAbility", true),
        ] {
            assert_eq!(untag_name(&tag_name(name, vf)), Some((name, vf)));
        }
        assert_eq!(untag_name("1C"), None);
        assert_eq!(untag_name("{{unterminated"), None);
    }

    #[test]
    fn string_consumption_is_terminator_inclusive() {
        let tokens = ["48", "69", "00", "1C"];
        let (decoded, consumed) = take_null_terminated(&tokens).unwrap();
        assert_eq!(decoded, "Hi");
        assert_eq!(consumed, 3);
    }

    #[test]
    fn empty_string_is_just_the_terminator() {
        let (decoded, consumed) = take_null_terminated(&["00"]).unwrap();
        assert_eq!(decoded, "");
        assert_eq!(consumed, 1);
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(matches!(
            take_null_terminated(&["48", "69"]),
            Err(TokenError::TruncatedString)
        ));
    }

    #[test]
    fn walks_references_and_raw_runs() {
        // final function ref, int zero, end of parms
        let leaves = tokenize_code_line("1C 00 00 00 02 25 16", TextSize::new(0)).unwrap();
        assert_eq!(leaves.len(), 3);
        assert!(matches!(leaves[0].kind, LeafKind::HexRun)); // "1C"
        match &leaves[1].kind {
            LeafKind::Reference(leaf) => {
                assert_eq!(leaf.value, 2);
                assert!(!leaf.vf);
                assert_eq!(leaf.name, None);
                assert_eq!(leaf.range, TextRange::new(3.into(), 14.into()));
            }
            other => panic!("expected reference, got {:?}", other),
        }
        assert!(matches!(leaves[2].kind, LeafKind::HexRun)); // "25 16"
    }

    #[test]
    fn virtual_function_reference_takes_the_index_word() {
        let leaves = tokenize_code_line("1B 00 00 00 00 00 00 00 00 16", TextSize::new(0)).unwrap();
        match &leaves[1].kind {
            LeafKind::Reference(leaf) => {
                assert_eq!(leaf.value, 0);
                assert!(leaf.vf);
            }
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn tagged_name_fills_a_reference_slot() {
        let leaves = tokenize_code_line("1C {{TestClass.DoThing}} 16", TextSize::new(0)).unwrap();
        match &leaves[1].kind {
            LeafKind::Reference(leaf) => {
                assert_eq!(leaf.value, 0);
                assert!(!leaf.vf);
                assert_eq!(leaf.name.as_deref(), Some("TestClass.DoThing"));
            }
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(
            tokenize_code_line("FE 01 02", TextSize::new(0)),
            Err(TokenError::UnknownOpcode { opcode: 0xFE })
        ));
    }

    #[test]
    fn truncated_string_is_rejected() {
        assert!(matches!(
            tokenize_code_line("1F 48 69", TextSize::new(0)),
            Err(TokenError::TruncatedString)
        ));
    }

    #[test]
    fn trailing_comment_is_kept() {
        let leaves = tokenize_code_line("25 16 // no-op", TextSize::new(0)).unwrap();
        assert!(matches!(leaves.last().unwrap().kind, LeafKind::Comment));
    }
}
