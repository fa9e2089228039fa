use pretty_assertions::assert_eq;

use upklink_core::document::{ModDocument, UNKNOWN_GUID};
use upklink_core::format::package::UpkPackage;
use upklink_core::hex;
use upklink_core::resolve;
use upklink_core::test::PackageBuilder;

fn guid_bytes(byte: u8) -> [u8; 16] {
    [byte; 16]
}

fn source_package() -> UpkPackage {
    let mut b = PackageBuilder::new(guid_bytes(0xAA));
    b.name("OnAbility");
    let object = b.import("Core", "Class", 0, "Object");
    b.export(object, 0, 0, "Foo");
    UpkPackage::parse(&b.build()).unwrap()
}

/// Same symbols as the source, shuffled so every reference lands on a
/// different numeric value.
fn dest_package() -> UpkPackage {
    let mut b = PackageBuilder::new(guid_bytes(0xBB));
    b.name("OnAbility");
    let object = b.import("Core", "Class", 0, "Object");
    b.export(object, 0, 0, "Padding");
    b.export(object, 0, 0, "Foo");
    UpkPackage::parse(&b.build()).unwrap()
}

fn script(guid: &str, code: &str) -> String {
    format!(
        "MODFILEVERSION=4\n\
         UPKFILE=TestGame.upk\n\
         GUID={}\n\
         FUNCTION=DoThing@Foo\n\
         \n\
         // retarget me\n\
         [CODE]\n\
         {}\n\
         [/CODE]\n",
        guid, code
    )
}

#[test]
fn hex_to_names_with_delta_accounting() {
    let source = source_package();
    let source_guid = hex::bytes_to_hex(source.guid());
    let mut doc = ModDocument::new(script(&source_guid, "1C 00 00 00 01 16"));
    let original_len = doc.text().len();

    let refs = resolve::extract_references(&doc);
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].value, 1);

    let rows = resolve::resolve_forward(&refs, &source);
    assert_eq!(rows[0].name.as_deref(), Some("Foo"));

    let report = resolve::apply_hex_to_names(&mut doc, &rows).unwrap();
    assert_eq!(report.patched, 1);
    assert_eq!(report.skipped, 0);

    let tag = resolve::tag_name("Foo", false);
    let expected_delta = (tag.len() as isize - "00 00 00 01".len() as isize)
        + (UNKNOWN_GUID.len() as isize - source_guid.len() as isize);
    assert_eq!(report.delta, expected_delta);
    assert_eq!(
        doc.text().len() as isize,
        original_len as isize + expected_delta
    );
    assert_eq!(
        doc.text(),
        script(UNKNOWN_GUID, "1C {{Foo}} 16")
    );
}

#[test]
fn names_to_hex_retargets_guid_and_values() {
    let dest = dest_package();
    let mut doc = ModDocument::new(script(UNKNOWN_GUID, "1C {{Foo}} 16"));

    let refs = resolve::extract_references(&doc);
    let mut rows: Vec<_> = refs
        .iter()
        .map(|leaf| resolve::Resolution {
            leaf: leaf.clone(),
            name: leaf.name.clone(),
            dest: None,
        })
        .collect();
    resolve::resolve_reverse(&mut rows, &dest);
    assert_eq!(rows[0].dest, Some(2));

    let report = resolve::apply_names_to_hex(&mut doc, &rows, &dest).unwrap();
    assert_eq!(report.patched, 1);
    assert_eq!(
        doc.text(),
        script(&hex::bytes_to_hex(dest.guid()), "1C 00 00 00 02 16")
    );
}

#[test]
fn source_hex_to_destination_hex() {
    // the whole pipeline the CLI runs for hex -> hex retargeting: forward
    // against the source, reverse against the destination, patch once
    let source = source_package();
    let dest = dest_package();
    let source_guid = hex::bytes_to_hex(source.guid());
    let mut doc = ModDocument::new(script(&source_guid, "1C 00 00 00 01 16"));

    let refs = resolve::extract_references(&doc);
    let mut rows = resolve::resolve_forward(&refs, &source);
    resolve::resolve_reverse(&mut rows, &dest);

    let report = resolve::apply_names_to_hex(&mut doc, &rows, &dest).unwrap();
    assert_eq!(report.patched, 1);
    assert_eq!(
        doc.text(),
        script(&hex::bytes_to_hex(dest.guid()), "1C 00 00 00 02 16")
    );
}

#[test]
fn virtual_function_index_zero_retargets() {
    let source = source_package();
    let dest = dest_package();
    let source_guid = hex::bytes_to_hex(source.guid());
    // virtual function call on name-table index 0 ("OnAbility" in both)
    let mut doc = ModDocument::new(script(&source_guid, "1B 00 00 00 00 00 00 00 00 16"));

    let refs = resolve::extract_references(&doc);
    assert_eq!(refs.len(), 1);
    assert!(refs[0].vf);
    assert_eq!(refs[0].value, 0x0000_0000);

    // a zero virtual-function index is a real value, not "unresolved":
    // forward must find the bound name and reverse must report a hit
    let mut rows = resolve::resolve_forward(&refs, &source);
    assert_eq!(rows[0].name.as_deref(), Some("OnAbility"));
    resolve::resolve_reverse(&mut rows, &dest);
    assert_eq!(rows[0].dest, Some(0));

    let report = resolve::apply_names_to_hex(&mut doc, &rows, &dest).unwrap();
    assert_eq!(report.patched, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(
        doc.text(),
        script(&hex::bytes_to_hex(dest.guid()), "1B 00 00 00 00 00 00 00 00 16")
    );
}

#[test]
fn untouched_regions_survive_byte_for_byte() {
    let source = source_package();
    let source_guid = hex::bytes_to_hex(source.guid());
    let code = "1F 48 69 00 16 // greeting\n1C 00 00 00 01 16";
    let mut doc = ModDocument::new(script(&source_guid, code));

    let rows = resolve::resolve_forward(&resolve::extract_references(&doc), &source);
    resolve::apply_hex_to_names(&mut doc, &rows).unwrap();

    assert_eq!(
        doc.text(),
        script(
            UNKNOWN_GUID,
            "1F 48 69 00 16 // greeting\n1C {{Foo}} 16"
        )
    );
}
