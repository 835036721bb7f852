//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

// The pattern tree: typed nodes overlayed on data-source bytes.
//
// Nodes live in a flat arena and address each other by `PatternId`; parents
// hold strong child id lists, children hold a plain id back-reference. The
// tree is immutable in structure once a run completes, but each node carries
// a lazily filled value cache.

use std::sync::OnceLock;

use crate::endian::{self, Endian};
use crate::source::DataSource;
use crate::Result;

/// Index of a pattern inside its `PatternArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternId(pub u32);

/// Display state of a pattern node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    Highlighted,
}

/// One field of a bitfield window. Bit offsets count from the least
/// significant bit of the endian-resolved window value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldField {
    pub name: String,
    pub bit_offset: u32,
    pub bit_width: u32,
}

/// Kind-specific state of a pattern node.
#[derive(Debug, Clone)]
pub enum PatternKind {
    Unsigned { width: u8 },
    Signed { width: u8 },
    Float { width: u8 },
    /// `char` (width 1) or `char16` (width 2).
    Character { width: u8 },
    Boolean,
    String { length: u64 },
    Padding { length: u64 },
    Array { children: Vec<PatternId>, stride: u64 },
    Struct { type_name: String, children: Vec<PatternId> },
    Union { type_name: String, children: Vec<PatternId> },
    Enum { type_name: String, width: u8, values: Vec<(u128, String)> },
    Bitfield { type_name: String, fields: Vec<BitfieldField> },
    Pointer { pointee: PatternId },
}

impl PatternKind {
    /// Child ids of compound kinds, empty slice otherwise.
    pub fn children(&self) -> &[PatternId] {
        match self {
            PatternKind::Array { children, .. }
            | PatternKind::Struct { children, .. }
            | PatternKind::Union { children, .. } => children,
            PatternKind::Pointer { pointee } => std::slice::from_ref(pointee),
            _ => &[],
        }
    }

    pub fn type_label(&self) -> &str {
        match self {
            PatternKind::Unsigned { .. } => "unsigned",
            PatternKind::Signed { .. } => "signed",
            PatternKind::Float { .. } => "float",
            PatternKind::Character { .. } => "char",
            PatternKind::Boolean => "bool",
            PatternKind::String { .. } => "string",
            PatternKind::Padding { .. } => "padding",
            PatternKind::Array { .. } => "array",
            PatternKind::Struct { type_name, .. }
            | PatternKind::Union { type_name, .. }
            | PatternKind::Enum { type_name, .. }
            | PatternKind::Bitfield { type_name, .. } => type_name,
            PatternKind::Pointer { .. } => "pointer",
        }
    }
}

/// Value decoded from the bytes a pattern covers.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    /// Enum value together with the matching entry name, if any.
    Enum(u128, Option<String>),
    /// Compound kinds (struct/union/array/padding) have no scalar value.
    None,
}

impl std::fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedValue::Unsigned(v) => write!(f, "{v:#x}"),
            DecodedValue::Signed(v) => write!(f, "{v}"),
            DecodedValue::Float(v) => write!(f, "{v}"),
            DecodedValue::Bool(v) => write!(f, "{v}"),
            DecodedValue::Char(v) => write!(f, "'{v}'"),
            DecodedValue::String(v) => write!(f, "\"{v}\""),
            DecodedValue::Enum(v, Some(name)) => write!(f, "{name} ({v:#x})"),
            DecodedValue::Enum(v, None) => write!(f, "{v:#x}"),
            DecodedValue::None => f.write_str(""),
        }
    }
}

/// A typed node overlayed on a byte range of one data source section.
#[derive(Debug)]
pub struct Pattern {
    pub kind: PatternKind,
    pub offset: u64,
    pub size: u64,
    pub name: String,
    pub endian: Endian,
    /// 0xAARRGGBB display color.
    pub color: u32,
    pub comment: Option<String>,
    pub visibility: Visibility,
    pub parent: Option<PatternId>,
    /// Section the byte range belongs to; 0 is the primary data source.
    pub section: u32,
    pub out_of_bounds: bool,
    /// Name of the language function invoked when a display value is first
    /// demanded, if a `format` attribute was attached.
    pub format_fn: Option<String>,
    /// Name of the language function applied to the raw value before display.
    pub transform_fn: Option<String>,
    /// Name of the language function producing the editable text of the
    /// pattern, if an `editor_export` attribute was attached.
    pub editor_fn: Option<String>,
    value: OnceLock<DecodedValue>,
}

impl Pattern {
    pub fn new(kind: PatternKind, offset: u64, size: u64, name: String, endian: Endian) -> Self {
        Pattern {
            kind,
            offset,
            size,
            name,
            endian,
            color: 0,
            comment: None,
            visibility: Visibility::Visible,
            parent: None,
            section: 0,
            out_of_bounds: false,
            format_fn: None,
            transform_fn: None,
            editor_fn: None,
            value: OnceLock::new(),
        }
    }

    fn decode_bytes(&self, bytes: &[u8]) -> DecodedValue {
        match &self.kind {
            PatternKind::Unsigned { .. } => DecodedValue::Unsigned(endian::read_unsigned(bytes, self.endian)),
            PatternKind::Signed { .. } => DecodedValue::Signed(endian::read_signed(bytes, self.endian)),
            PatternKind::Float { .. } => DecodedValue::Float(endian::read_float(bytes, self.endian)),
            PatternKind::Boolean => DecodedValue::Bool(bytes[0] != 0),
            PatternKind::Character { width: 1 } => DecodedValue::Char(bytes[0] as char),
            PatternKind::Character { .. } => {
                let code = endian::read_unsigned(bytes, self.endian) as u32;
                DecodedValue::Char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
            }
            PatternKind::String { .. } => {
                // C-string display: stop at the first NUL.
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                DecodedValue::String(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            PatternKind::Enum { values, .. } => {
                let raw = endian::read_unsigned(bytes, self.endian);
                let name = values.iter().find(|(v, _)| *v == raw).map(|(_, n)| n.clone());
                DecodedValue::Enum(raw, name)
            }
            PatternKind::Bitfield { .. } | PatternKind::Pointer { .. } => {
                DecodedValue::Unsigned(endian::read_unsigned(bytes, self.endian))
            }
            PatternKind::Array { .. }
            | PatternKind::Struct { .. }
            | PatternKind::Union { .. }
            | PatternKind::Padding { .. } => DecodedValue::None,
        }
    }
}

/// Flat arena owning every pattern of one evaluation run.
#[derive(Debug, Default)]
pub struct PatternArena {
    nodes: Vec<Pattern>,
}

impl PatternArena {
    pub fn new() -> Self {
        PatternArena { nodes: Vec::new() }
    }

    pub fn alloc(&mut self, pattern: Pattern) -> PatternId {
        let id = PatternId(self.nodes.len() as u32);
        self.nodes.push(pattern);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: PatternId) -> &Pattern {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: PatternId) -> &mut Pattern {
        &mut self.nodes[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PatternId, &Pattern)> {
        self.nodes.iter().enumerate().map(|(i, p)| (PatternId(i as u32), p))
    }

    /// Decode the scalar value of a pattern, caching the result. Compound
    /// kinds yield `DecodedValue::None` without touching the source.
    pub fn decode(&self, id: PatternId, source: &dyn DataSource) -> Result<DecodedValue> {
        let pattern = self.get(id);
        if let Some(cached) = pattern.value.get() {
            return Ok(cached.clone());
        }
        let value = match &pattern.kind {
            PatternKind::Array { .. }
            | PatternKind::Struct { .. }
            | PatternKind::Union { .. }
            | PatternKind::Padding { .. } => DecodedValue::None,
            _ => {
                let mut bytes = vec![0u8; pattern.size as usize];
                source.read(pattern.offset, &mut bytes)?;
                pattern.decode_bytes(&bytes)
            }
        };
        let _ = pattern.value.set(value.clone());
        Ok(value)
    }

    /// Extract one field of a bitfield pattern. The window bytes are
    /// endian-resolved first, then the field's bit range is taken from the
    /// least-significant end upward.
    pub fn bitfield_field(
        &self,
        id: PatternId,
        field: &BitfieldField,
        source: &dyn DataSource,
    ) -> Result<u128> {
        let pattern = self.get(id);
        let mut bytes = vec![0u8; pattern.size as usize];
        source.read(pattern.offset, &mut bytes)?;
        let window = endian::read_unsigned(&bytes, pattern.endian);
        let mask = if field.bit_width >= 128 { u128::MAX } else { (1u128 << field.bit_width) - 1 };
        Ok((window >> field.bit_offset) & mask)
    }

    /// Dotted path of a pattern from its root, e.g. `hdr.entries[3].size`.
    pub fn path(&self, id: PatternId) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(id);
        while let Some(id) = cur {
            let node = self.get(id);
            segments.push(node.name.clone());
            cur = node.parent;
        }
        segments.reverse();
        let mut out = String::new();
        for seg in segments {
            if !out.is_empty() && !seg.starts_with('[') {
                out.push('.');
            }
            out.push_str(&seg);
        }
        out
    }

    /// Look up a direct child of a struct/union/array pattern by name.
    pub fn child_by_name(&self, id: PatternId, name: &str) -> Option<PatternId> {
        self.get(id).kind.children().iter().copied().find(|&c| self.get(c).name == name)
    }

    /// Verify that the byte range of `id` lies inside `size` bytes, honoring
    /// the explicit out-of-bounds marker.
    pub fn in_bounds(&self, id: PatternId, size: u64) -> bool {
        let p = self.get(id);
        p.out_of_bounds || p.offset.checked_add(p.size).map_or(false, |end| end <= size)
    }
}

/// Deterministic display color for a pattern path. Same path, same color on
/// every run; alpha is fixed so the UI layer can blend uniformly.
pub fn path_color(path: &str) -> u32 {
    // FNV-1a over the path bytes.
    let mut hash: u32 = 0x811c_9dc5;
    for b in path.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    0xC000_0000 | (hash & 0x00FF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn leaf(kind: PatternKind, offset: u64, size: u64, name: &str) -> Pattern {
        Pattern::new(kind, offset, size, name.to_string(), Endian::Little)
    }

    #[test]
    fn decode_caches_value() {
        let mut arena = PatternArena::new();
        let id = arena.alloc(leaf(PatternKind::Unsigned { width: 4 }, 0, 4, "x"));
        let src = MemorySource::new(vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(arena.decode(id, &src).unwrap(), DecodedValue::Unsigned(0x0403_0201));
        // Second decode hits the cache and must agree.
        assert_eq!(arena.decode(id, &src).unwrap(), DecodedValue::Unsigned(0x0403_0201));
    }

    #[test]
    fn string_decodes_to_first_nul() {
        let mut arena = PatternArena::new();
        let id = arena.alloc(leaf(PatternKind::String { length: 8 }, 0, 8, "s"));
        let src = MemorySource::new(b"Hi\0junk!".to_vec());
        assert_eq!(arena.decode(id, &src).unwrap(), DecodedValue::String("Hi".into()));
    }

    #[test]
    fn bitfield_extraction_lsb_first() {
        let mut arena = PatternArena::new();
        let fields = vec![
            BitfieldField { name: "a".into(), bit_offset: 0, bit_width: 3 },
            BitfieldField { name: "b".into(), bit_offset: 3, bit_width: 5 },
            BitfieldField { name: "c".into(), bit_offset: 8, bit_width: 8 },
        ];
        let id = arena.alloc(leaf(
            PatternKind::Bitfield { type_name: "F".into(), fields: fields.clone() },
            0,
            2,
            "bf",
        ));
        let src = MemorySource::new(vec![0xA5, 0x3C]);
        assert_eq!(arena.bitfield_field(id, &fields[0], &src).unwrap(), 0x5);
        assert_eq!(arena.bitfield_field(id, &fields[1], &src).unwrap(), 0x14);
        assert_eq!(arena.bitfield_field(id, &fields[2], &src).unwrap(), 0x3C);
    }

    #[test]
    fn path_and_color_are_deterministic() {
        let mut arena = PatternArena::new();
        let parent = arena.alloc(leaf(
            PatternKind::Struct { type_name: "H".into(), children: vec![] },
            0,
            8,
            "hdr",
        ));
        let child = arena.alloc(leaf(PatternKind::Unsigned { width: 4 }, 0, 4, "magic"));
        arena.get_mut(child).parent = Some(parent);
        if let PatternKind::Struct { children, .. } = &mut arena.get_mut(parent).kind {
            children.push(child);
        }
        assert_eq!(arena.path(child), "hdr.magic");
        assert_eq!(path_color("hdr.magic"), path_color("hdr.magic"));
        assert_ne!(path_color("hdr.magic"), path_color("hdr.flags"));
    }

    #[test]
    fn enum_decode_maps_names() {
        let mut arena = PatternArena::new();
        let id = arena.alloc(leaf(
            PatternKind::Enum {
                type_name: "E".into(),
                width: 1,
                values: vec![(1, "One".into()), (2, "Two".into())],
            },
            0,
            1,
            "e",
        ));
        let src = MemorySource::new(vec![2]);
        assert_eq!(arena.decode(id, &src).unwrap(), DecodedValue::Enum(2, Some("Two".into())));
    }
}
