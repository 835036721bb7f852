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

//! End-to-end pattern language tests: source text in, pattern tree out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hekla::pattern::{DecodedValue, PatternId, PatternKind, Visibility};
use hekla::source::DataSource;
use hekla::Endian;
use hekla_pat::{Diagnostic, ErrorKind, Level, LimitKind, PatternRun, Runtime, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn runtime_over(bytes: Vec<u8>) -> Runtime {
    let mut rt = Runtime::new();
    rt.set_data_bytes(bytes);
    rt
}

fn run(bytes: Vec<u8>, source: &str) -> PatternRun {
    runtime_over(bytes).execute(source, &HashMap::new()).unwrap()
}

fn run_err(bytes: Vec<u8>, source: &str) -> Diagnostic {
    runtime_over(bytes).execute(source, &HashMap::new()).unwrap_err()
}

fn root(run: &PatternRun, index: usize) -> PatternId {
    run.roots()[index]
}

fn children(run: &PatternRun, id: PatternId) -> Vec<PatternId> {
    run.pattern(id).kind.children().to_vec()
}

/// Data source of arbitrary reported size that reads as zeroes. Used to
/// exercise huge layouts without allocating the bytes.
struct ZeroSource(u64);

impl DataSource for ZeroSource {
    fn size(&self) -> u64 {
        self.0
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> hekla::Result<()> {
        if offset + buf.len() as u64 > self.0 {
            return Err(hekla::Error::OutOfBounds {
                offset,
                len: buf.len() as u64,
                size: self.0,
            });
        }
        buf.fill(0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Spec scenarios
// ---------------------------------------------------------------------------

#[test]
fn primitive_placement() {
    let run = run(vec![0x01, 0x02, 0x03, 0x04], "u32 x @ 0x00;");
    let x = root(&run, 0);
    let p = run.pattern(x);
    assert_eq!(p.offset, 0);
    assert_eq!(p.size, 4);
    assert!(matches!(p.kind, PatternKind::Unsigned { width: 4 }));
    assert_eq!(run.decode(x).unwrap(), DecodedValue::Unsigned(0x0403_0201));
}

#[test]
fn struct_with_padding() {
    let data = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x07, 0x00, 0x00, 0x00, 0xAA, 0xBB];
    let run = run(
        data,
        "struct H { u32 magic; u8 ver; padding[3]; u16 flags; }; H hdr @ 0;",
    );
    let hdr = root(&run, 0);
    assert_eq!(run.pattern(hdr).offset, 0);
    assert_eq!(run.pattern(hdr).size, 10);

    let members = children(&run, hdr);
    assert_eq!(members.len(), 4);
    assert_eq!(run.decode(members[0]).unwrap(), DecodedValue::Unsigned(0xEFBE_ADDE));
    assert_eq!(run.decode(members[1]).unwrap(), DecodedValue::Unsigned(7));
    assert!(matches!(run.pattern(members[2]).kind, PatternKind::Padding { length: 3 }));
    assert_eq!(run.decode(members[3]).unwrap(), DecodedValue::Unsigned(0xBBAA));

    // Struct children occupy disjoint contiguous sub-ranges.
    let mut cursor = run.pattern(hdr).offset;
    for &m in &members {
        assert_eq!(run.pattern(m).offset, cursor);
        cursor += run.pattern(m).size;
    }
    assert_eq!(cursor, run.pattern(hdr).offset + run.pattern(hdr).size);
}

#[test]
fn s8_array_fuses_to_string() {
    let data = vec![0x00, 0x00, b'H', b'e', b'l', b'l', b'o'];
    let run = run(data, "s8 name[5] @ 2;");
    let name = root(&run, 0);
    let p = run.pattern(name);
    assert_eq!(p.offset, 2);
    assert_eq!(p.size, 5);
    assert!(matches!(p.kind, PatternKind::String { length: 5 }));
    assert_eq!(run.decode(name).unwrap(), DecodedValue::String("Hello".into()));
}

#[test]
fn char_array_stays_an_array() {
    let run = run(b"abcde".to_vec(), "char cs[5] @ 0;");
    let cs = root(&run, 0);
    assert!(matches!(run.pattern(cs).kind, PatternKind::Array { .. }));
    assert_eq!(children(&run, cs).len(), 5);
    assert_eq!(run.decode(children(&run, cs)[1]).unwrap(), DecodedValue::Char('b'));
}

#[test]
fn pointer_dereference() {
    let data = vec![0x04, 0x00, 0x00, 0x00, 0x2A];
    let run = run(data, "struct S { u8 v; }; S *p : u16 @ 0;");
    let p = root(&run, 0);
    assert_eq!(run.pattern(p).offset, 0);
    assert_eq!(run.pattern(p).size, 2);
    let PatternKind::Pointer { pointee } = run.pattern(p).kind else { panic!("not a pointer") };
    assert_eq!(run.pattern(pointee).offset, 4);
    let v = children(&run, pointee)[0];
    assert_eq!(run.decode(v).unwrap(), DecodedValue::Unsigned(0x2A));
}

#[test]
fn bitfield_extraction() {
    let run = run(vec![0xA5, 0x3C], "bitfield F { a : 3; b : 5; c : 8; }; F bf @ 0;");
    let bf = root(&run, 0);
    let p = run.pattern(bf);
    assert_eq!(p.offset, 0);
    assert_eq!(p.size, 2);
    let PatternKind::Bitfield { ref fields, .. } = p.kind else { panic!("not a bitfield") };
    let values: Vec<u128> = fields
        .iter()
        .map(|f| run.arena().bitfield_field(bf, f, &hekla::MemorySource::new(vec![0xA5, 0x3C])).unwrap())
        .collect();
    assert_eq!(values, vec![0x5, 0x14, 0x3C]);
}

#[test]
fn cooperative_cancel_during_array_construction() {
    let mut rt = Runtime::new();
    rt.set_data_source(Arc::new(ZeroSource(2_000_000_000)));
    rt.set_limit(LimitKind::MaxPatterns, usize::MAX);

    let handle = rt.submit("u8 big[1000000000] @ 0;", &HashMap::new());
    std::thread::sleep(Duration::from_millis(50));
    rt.abort();

    let err = handle.wait().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Interrupted);
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[test]
fn read_at_last_byte_ok_past_end_fails() {
    let ok = run(vec![0; 8], "u8 x @ 7;");
    assert_eq!(run_field_size(&ok), 1);
    let err = run_err(vec![0; 8], "u8 x @ 8;");
    assert_eq!(err.kind, ErrorKind::OutOfBounds);
}

fn run_field_size(run: &PatternRun) -> u64 {
    run.pattern(run.roots()[0]).size
}

#[test]
fn zero_length_array_is_empty_not_an_error() {
    let run = run(vec![0; 4], "u8 xs[0] @ 0;");
    let xs = root(&run, 0);
    assert_eq!(run.pattern(xs).size, 0);
    assert!(children(&run, xs).is_empty());
}

#[test]
fn division_by_zero_carries_the_line() {
    let err = run_err(vec![0; 8], "u8 a @ 0;\nu8 b @ 1 / 0;");
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    assert_eq!(err.line, 2);
}

#[test]
fn pattern_limit_is_enforced() {
    let mut rt = runtime_over(vec![0; 8]);
    rt.set_limit(LimitKind::MaxPatterns, 4);
    let err = rt
        .execute("u8 a @ 0; u8 b @ 1; u8 c @ 2; u8 d @ 3; u8 e @ 4;", &HashMap::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::LimitExceeded);

    // Four patterns fit exactly.
    rt.execute("u8 a @ 0; u8 b @ 1; u8 c @ 2; u8 d @ 3;", &HashMap::new()).unwrap();
}

#[test]
fn recursion_limit_stops_self_referential_types() {
    let err = run_err(vec![0; 64], "struct R { R inner; }; R r @ 0;");
    assert_eq!(err.kind, ErrorKind::LimitExceeded);
}

#[test]
fn padding_may_run_past_the_end() {
    let run = run(vec![0; 8], "padding[16] @ 4;");
    let id = root(&run, 0);
    let p = run.pattern(id);
    assert!(p.out_of_bounds);
    assert_eq!(p.size, 16);
    // The explicit marker satisfies the bounds invariant.
    assert!(run.arena().in_bounds(id, 8));
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn identical_inputs_produce_identical_trees() {
    let source = "struct H { u32 a; u16 b; u8 cs[3]; }; H h @ 1;";
    let shape = |run: &PatternRun| -> Vec<(u64, u64, String, u32)> {
        run.arena()
            .iter()
            .map(|(_, p)| (p.offset, p.size, p.name.clone(), p.color))
            .collect()
    };
    let a = run(vec![7; 16], source);
    let b = run(vec![7; 16], source);
    assert_eq!(shape(&a), shape(&b));
}

// ---------------------------------------------------------------------------
// Layout rules
// ---------------------------------------------------------------------------

#[test]
fn union_members_overlap_and_size_is_the_max() {
    let run = run(
        vec![0x11, 0x22, 0x33, 0x44],
        "union U { u32 word; u16 half; u8 byte; }; U u @ 0;",
    );
    let u = root(&run, 0);
    assert_eq!(run.pattern(u).size, 4);
    for m in children(&run, u) {
        assert_eq!(run.pattern(m).offset, 0);
    }
    let members = children(&run, u);
    assert_eq!(run.decode(members[0]).unwrap(), DecodedValue::Unsigned(0x4433_2211));
    assert_eq!(run.decode(members[1]).unwrap(), DecodedValue::Unsigned(0x2211));
}

#[test]
fn array_children_step_by_stride() {
    let run = run((0..12).collect(), "u16 xs[4] @ 2;");
    let xs = root(&run, 0);
    let PatternKind::Array { stride, .. } = run.pattern(xs).kind else { panic!() };
    assert_eq!(stride, 2);
    assert_eq!(run.pattern(xs).size, 8);
    for (i, m) in children(&run, xs).into_iter().enumerate() {
        assert_eq!(run.pattern(m).offset, 2 + i as u64 * 2);
        assert_eq!(run.pattern(m).parent, Some(xs));
    }
}

#[test]
fn array_elements_share_one_color() {
    let run = run(vec![0; 8], "u16 xs[3] @ 0;");
    let xs = root(&run, 0);
    let array_color = run.pattern(xs).color;
    assert_ne!(array_color, 0);
    for m in children(&run, xs) {
        assert_eq!(run.pattern(m).color, array_color);
    }
}

#[test]
fn array_size_resolves_against_direct_siblings() {
    let run = run(
        vec![0x03, 0xAA, 0xBB, 0xCC, 0xFF],
        "struct Blob { u8 len; u8 data[len]; }; Blob b @ 0;",
    );
    let b = root(&run, 0);
    let members = children(&run, b);
    assert_eq!(run.pattern(members[1]).size, 3);
    assert_eq!(run.pattern(b).size, 4);
}

#[test]
fn struct_inheritance_prepends_base_members() {
    let run = run(
        vec![1, 2, 3],
        "struct Base { u8 a; }; struct Derived : Base { u8 b; }; Derived d @ 0;",
    );
    let d = root(&run, 0);
    let members = children(&run, d);
    assert_eq!(members.len(), 2);
    assert_eq!(run.pattern(members[0]).name, "a");
    assert_eq!(run.pattern(members[1]).name, "b");
    assert_eq!(run.pattern(d).size, 2);
}

// ---------------------------------------------------------------------------
// Endianness
// ---------------------------------------------------------------------------

#[test]
fn endian_overrides_nest_correctly() {
    let data = vec![0x01, 0x02, 0x03, 0x04];
    // Declaration override.
    let r = run(data.clone(), "be u16 x @ 0;");
    assert_eq!(r.decode(root(&r, 0)).unwrap(), DecodedValue::Unsigned(0x0102));
    // Alias override.
    let r = run(data.clone(), "using BeWord = be u16; BeWord w @ 0;");
    assert_eq!(r.decode(root(&r, 0)).unwrap(), DecodedValue::Unsigned(0x0102));
    // Pragma sets the run default.
    let r = run(data.clone(), "#pragma endian big\nu16 w @ 0;");
    assert_eq!(r.decode(root(&r, 0)).unwrap(), DecodedValue::Unsigned(0x0102));
    // Member inherits the enclosing declaration's endianness.
    let r = run(data, "struct S { u16 v; }; be S s @ 0;");
    let v = children(&r, root(&r, 0))[0];
    assert_eq!(r.pattern(v).endian, Endian::Big);
    assert_eq!(r.decode(v).unwrap(), DecodedValue::Unsigned(0x0102));
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[test]
fn enum_decodes_and_auto_increments() {
    let run = run(
        vec![0x02, 0x0A, 0x05],
        "enum Color : u8 { Red = 1, Green, Blue = 10 }; Color a @ 0; Color b @ 1; Color c @ 2;",
    );
    assert_eq!(run.decode(root(&run, 0)).unwrap(), DecodedValue::Enum(2, Some("Green".into())));
    assert_eq!(run.decode(root(&run, 1)).unwrap(), DecodedValue::Enum(10, Some("Blue".into())));
    assert_eq!(run.decode(root(&run, 2)).unwrap(), DecodedValue::Enum(5, None));
}

#[test]
fn enum_entries_are_constants_in_expressions() {
    let run = run(vec![0; 16], "enum E : u8 { A = 4, B }; u8 x @ E::B;");
    assert_eq!(run.pattern(root(&run, 0)).offset, 5);
}

#[test]
fn signed_enum_matches_negative_entries() {
    // Entry keys are truncated to the underlying width, so -1 over an s8
    // matches the zero-extended raw byte 0xFF; auto-increment wraps to 0.
    let run1 = run(
        vec![0xFF, 0x00, 0xFE],
        "enum E : s8 { Neg = -1, Zero, Other = -2 }; E a @ 0; E b @ 1; E c @ 2;",
    );
    assert_eq!(run1.decode(root(&run1, 0)).unwrap(), DecodedValue::Enum(0xFF, Some("Neg".into())));
    assert_eq!(run1.decode(root(&run1, 1)).unwrap(), DecodedValue::Enum(0, Some("Zero".into())));
    assert_eq!(run1.decode(root(&run1, 2)).unwrap(), DecodedValue::Enum(0xFE, Some("Other".into())));

    // The constant seen by expressions lives in the same value space.
    let run2 = run(vec![0; 0x100], "enum F : s8 { M = -1 }; u8 x @ F::M;");
    assert_eq!(run2.pattern(root(&run2, 0)).offset, 0xFF);
}

// ---------------------------------------------------------------------------
// Expressions over placed patterns
// ---------------------------------------------------------------------------

#[test]
fn dollar_sizeof_addressof() {
    let run = run(
        vec![0; 16],
        "u32 a @ 0; u8 b @ sizeof(a); u8 c @ addressof(a) + 8; u8 d @ $;",
    );
    assert_eq!(run.pattern(root(&run, 1)).offset, 4);
    assert_eq!(run.pattern(root(&run, 2)).offset, 8);
    // `$` continues after the previous placement.
    assert_eq!(run.pattern(root(&run, 3)).offset, 9);
}

#[test]
fn member_and_index_access_in_placements() {
    let run = run(
        vec![0x02, 0x00, 0x05, 0x06, 0x07],
        "struct H { u8 skip; u8 take; }; H h @ 0;\nu8 xs[h.skip] @ 2;\nu8 y @ addressof(xs[1]);",
    );
    assert_eq!(run.pattern(root(&run, 1)).size, 2);
    assert_eq!(run.pattern(root(&run, 2)).offset, 3);
}

#[test]
fn bitfield_fields_read_in_expressions() {
    let run = run(
        vec![0xA5, 0x3C, 0, 0, 0, 0, 0, 0],
        "bitfield F { a : 3; b : 5; }; F bf @ 0;\nu8 x @ bf.a;",
    );
    assert_eq!(run.pattern(root(&run, 1)).offset, 5);
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

#[test]
fn namespaced_types_resolve_inward_and_outward() {
    let run = run(
        vec![1, 2, 3, 4],
        "namespace fmt { struct Inner { u8 a; }; struct Outer { Inner i; u8 b; }; }\nfmt::Outer o @ 0;",
    );
    let o = root(&run, 0);
    assert_eq!(run.pattern(o).size, 2);
    let i = children(&run, o)[0];
    assert!(matches!(run.pattern(i).kind, PatternKind::Struct { .. }));
}

// ---------------------------------------------------------------------------
// Functions, attributes, console
// ---------------------------------------------------------------------------

#[test]
fn functions_run_with_control_flow() {
    let run = run(
        vec![0; 64],
        "fn triangle(auto n) { u32 acc = 0; for (u32 i = 1, i <= n, i = i + 1) { acc = acc + i; } return acc; }\nu8 x @ triangle(4);",
    );
    assert_eq!(run.pattern(root(&run, 0)).offset, 10);
}

#[test]
fn format_and_transform_hooks_run_lazily() {
    let mut run = run(
        vec![0x05, 0x07],
        "fn plus_one(auto v) { return v + 1; }\nfn stars(auto v) { return \"*\" * v; }\nu8 a @ 0 [[transform(\"plus_one\"), format(\"stars\")]];\nu8 b @ 1;",
    );
    let a = root(&run, 0);
    let b = root(&run, 1);
    assert_eq!(run.render(a).unwrap(), "******");
    // No hooks: plain decoded display.
    assert_eq!(run.render(b).unwrap(), "0x7");
}

#[test]
fn display_attributes_apply() {
    let run = run(
        vec![0; 4],
        "u8 a @ 0 [[color(\"FF0000\"), comment(\"alpha\")]];\nu8 b @ 1 [[hidden]];\nu8 c @ 2 [[highlight, name(\"gamma\")]];",
    );
    assert_eq!(run.pattern(root(&run, 0)).color & 0x00FF_FFFF, 0xFF_0000);
    assert_eq!(run.pattern(root(&run, 0)).comment.as_deref(), Some("alpha"));
    assert_eq!(run.pattern(root(&run, 1)).visibility, Visibility::Hidden);
    assert_eq!(run.pattern(root(&run, 2)).visibility, Visibility::Highlighted);
    assert_eq!(run.pattern(root(&run, 2)).name, "gamma");
}

#[test]
fn unknown_attribute_is_rejected() {
    let err = run_err(vec![0; 4], "u8 a @ 0 [[sparkles]];");
    assert_eq!(err.kind, ErrorKind::InvalidAttribute);
}

#[test]
fn print_and_warn_accumulate_error_aborts() {
    let run = run(
        vec![0; 4],
        "fn go() { print(\"at \", $); warn(\"slack\"); return 0; }\nu8 x @ go();",
    );
    assert_eq!(run.console()[0], (Level::Info, "at 0".to_string()));
    assert_eq!(run.console()[1], (Level::Warn, "slack".to_string()));

    let err = run_err(vec![0; 4], "fn boom() { error(\"nope\"); return 0; }\nu8 x @ boom();");
    assert_eq!(err.message, "nope");
}

// ---------------------------------------------------------------------------
// In/out variables
// ---------------------------------------------------------------------------

#[test]
fn in_vars_bind_and_out_vars_report() {
    let mut in_vars = HashMap::new();
    in_vars.insert("start".to_string(), Value::Unsigned(4));
    let rt = runtime_over(vec![0; 16]);
    let run = rt
        .execute(
            "u32 start in;\nu64 total out;\nfn note() { total = start * 2; return start; }\nu8 x @ note();",
            &in_vars,
        )
        .unwrap();
    assert_eq!(run.pattern(run.roots()[0]).offset, 4);
    assert_eq!(run.out_vars(), &[("total".to_string(), Value::Unsigned(8))]);
}

#[test]
fn missing_in_var_is_reported() {
    let err = run_err(vec![0; 4], "u32 start in; u8 x @ start;");
    assert_eq!(err.kind, ErrorKind::UnknownIdentifier);
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[test]
fn sections_hold_their_own_subtrees() {
    let rt = runtime_over(vec![0x11, 0x22, 0x33, 0x44]);
    let run = rt
        .execute(
            "section scratch[8];\nfn setup() { section_copy(\"scratch\", 0, 4, 4); return 4; }\nu16 copied @ setup() in scratch;\nu8 main_byte @ 0;",
            &HashMap::new(),
        )
        .unwrap();

    let sections = run.sections();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].id, 1);
    assert_eq!(sections[0].name, "scratch");
    assert_eq!(sections[0].roots.len(), 1);

    let copied = sections[0].roots[0];
    assert_eq!(run.pattern(copied).section, 1);
    // Bytes 0..4 of the source were copied to section offset 4.
    assert_eq!(run.decode(copied).unwrap(), DecodedValue::Unsigned(0x2211));

    // The primary tree is unaffected.
    assert_eq!(run.roots().len(), 1);
    assert_eq!(run.pattern(run.roots()[0]).section, 0);
}

// ---------------------------------------------------------------------------
// Preprocessor integration
// ---------------------------------------------------------------------------

#[test]
fn defines_and_pragmas_flow_through_execute() {
    let run = run(
        vec![0; 32],
        "#define BASE 0x10\n#pragma MIME application/x-hekla\nu8 x @ BASE;",
    );
    assert_eq!(run.pattern(root(&run, 0)).offset, 0x10);
    assert_eq!(run.pragmas()["MIME"], vec!["application/x-hekla".to_string()]);
}

#[test]
fn includes_resolve_through_configured_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("header.pat"), "struct Word { u16 v; };\n").unwrap();

    let mut rt = runtime_over(vec![0xCD, 0xAB]);
    rt.add_include_path(dir.path());
    let run = rt.execute("#include <header.pat>\nWord w @ 0;", &HashMap::new()).unwrap();
    let v = children(&run, root(&run, 0))[0];
    assert_eq!(run.decode(v).unwrap(), DecodedValue::Unsigned(0xABCD));
}

#[test]
fn base_address_pragma_reaches_the_run() {
    let run = run(vec![0; 4], "#pragma base_address 0x8000\nu8 x @ 0;");
    assert_eq!(run.base_address(), 0x8000);
}

// ---------------------------------------------------------------------------
// Error propagation
// ---------------------------------------------------------------------------

#[test]
fn unknown_type_names_the_offender() {
    let err = run_err(vec![0; 4], "Mystery m @ 0;");
    assert_eq!(err.kind, ErrorKind::UnknownType);
    assert!(err.message.contains("Mystery"));
}

#[test]
fn auto_alias_cannot_be_placed_but_works_as_parameter() {
    // An alias chain ending in `auto` is rejected at every placement shape.
    for source in [
        "using Any = auto; Any x @ 0;",
        "using Any = auto; Any xs[0] @ 0;",
        "using Any = auto; using Indirect = Any; Indirect x @ 0;",
        "using Any = auto; struct S { Any v; }; S s @ 0;",
    ] {
        let err = run_err(vec![0; 8], source);
        assert_eq!(err.kind, ErrorKind::TypeMismatch, "{source}");
    }

    // The alias itself stays usable as a function parameter type.
    let run = run(
        vec![0; 8],
        "using Any = auto;\nfn pick(Any v) { return v + 1; }\nu8 x @ pick(2);",
    );
    assert_eq!(run.pattern(root(&run, 0)).offset, 3);
}

#[test]
fn invalid_pointer_target_is_fatal() {
    let err = run_err(vec![0xFF, 0xFF, 0x00], "struct S { u8 v; }; S *p : u16 @ 0;");
    assert_eq!(err.kind, ErrorKind::InvalidPointer);
}

#[test]
fn failed_submit_reports_through_the_handle() {
    let rt = runtime_over(vec![0; 4]);
    let handle = rt.submit("u8 x @ 100;", &HashMap::new());
    let err = handle.wait().unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfBounds);
}

#[test]
fn successful_submit_yields_the_tree() {
    let rt = runtime_over(vec![0x2A, 0, 0, 0]);
    let handle = rt.submit("u32 x @ 0;", &HashMap::new());
    let run = handle.wait().unwrap();
    assert_eq!(run.decode(run.roots()[0]).unwrap(), DecodedValue::Unsigned(0x2A));
}
