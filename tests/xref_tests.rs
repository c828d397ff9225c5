//! Cross-reference resolution: section merging, absent objects, recovery.


use pdf_x_worker::core::*;
use proptest::prelude::*;
use test_utils::*;

fn base_revision(builder: &mut PdfBuilder) -> &mut PdfBuilder {
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] /Count 0 >>")
}

// ============================================================================
// Section merging
// ============================================================================

#[test]
fn test_newest_table_section_wins() {
    init_tracing();
    let mut builder = PdfBuilder::new();
    base_revision(&mut builder)
        .object(4, "(first)")
        .object(5, "(untouched)")
        .xref_table()
        .object(4, "(second)")
        .xref_table();
    let doc = PDFDocument::open(builder.finish()).unwrap();

    assert_eq!(doc.get(Ref::new(4, 0)), PDFObject::String(b"second".to_vec()));
    // Older sections still supply ids the newer one does not list
    assert_eq!(doc.get(Ref::new(5, 0)), PDFObject::String(b"untouched".to_vec()));
    assert!(!doc.xref().was_recovered());
}

#[test]
fn test_newest_stream_section_wins_over_table() {
    let mut builder = PdfBuilder::new();
    base_revision(&mut builder)
        .object(4, "<< /Version 1 >>")
        .xref_table()
        .object(4, "<< /Version 2 >>")
        .xref_stream(30);
    let doc = PDFDocument::open(builder.finish()).unwrap();

    let obj = doc.get(Ref::new(4, 0));
    assert_eq!(obj.as_dict().and_then(|d| d.get("Version")).and_then(|v| v.as_int()), Some(2));
}

#[test]
fn test_merged_trailer_prefers_newest_keys() {
    let mut builder = PdfBuilder::new();
    base_revision(&mut builder)
        .object(4, "null")
        .xref_table()
        .object(6, "(later)")
        .xref_table();
    let doc = PDFDocument::open(builder.finish()).unwrap();

    let trailer = doc.trailer().unwrap();
    assert_eq!(trailer.get("Size").and_then(|s| s.as_int()), Some(7));
    assert!(trailer.contains_key("Prev"));
}

// ============================================================================
// Absent and free objects
// ============================================================================

#[test]
fn test_absent_object_resolves_to_null() {
    let mut builder = PdfBuilder::new();
    base_revision(&mut builder)
        .object(4, "<< /Dangling 99 0 R /Present 5 0 R >>")
        .object(5, "42")
        .xref_table();
    let doc = PDFDocument::open(builder.finish()).unwrap();

    assert_eq!(doc.get(Ref::new(99, 0)), PDFObject::Null);
    // Object 0 heads the free list
    assert_eq!(doc.get(Ref::new(0, 65535)), PDFObject::Null);

    let holder = doc.get(Ref::new(4, 0));
    let dict = holder.as_dict().unwrap();
    assert_eq!(doc.get_dict_value(dict, "Dangling"), None);
    assert_eq!(doc.get_dict_value(dict, "Present"), Some(PDFObject::Number(42.0)));
}

#[test]
fn test_generation_mismatch_is_unresolved() {
    let mut builder = PdfBuilder::new();
    base_revision(&mut builder).object(4, "(v)").xref_table();
    let doc = PDFDocument::open(builder.finish()).unwrap();

    let err = doc.xref().fetch(Ref::new(4, 3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedReference);
    assert_eq!(doc.get(Ref::new(4, 3)), PDFObject::Null);
    // The correct generation still resolves after the failed lookup
    assert_eq!(doc.get(Ref::new(4, 0)), PDFObject::String(b"v".to_vec()));
}

// ============================================================================
// Recovery
// ============================================================================

const OBJECT_NUMBERS: [u32; 7] = [1, 2, 3, 10, 11, 12, 13];

fn assert_same_objects(intact: &PDFDocument, recovered: &PDFDocument) {
    for num in OBJECT_NUMBERS {
        let r = Ref::new(num, 0);
        assert_eq!(intact.get(r), recovered.get(r), "object {} differs", r);
    }
    assert_eq!(intact.page_count(), recovered.page_count());
}

#[test]
fn test_recovery_with_zeroed_offsets() {
    init_tracing();
    let data = multi_page_document(&["0 0 m 10 10 l S", "BT /F1 12 Tf (Hi) Tj ET"]);
    let intact = PDFDocument::open(data.clone()).unwrap();
    let recovered = PDFDocument::open(zero_xref_offsets(&data)).unwrap();

    assert!(!intact.xref().was_recovered());
    assert!(recovered.xref().was_recovered());
    assert_same_objects(&intact, &recovered);
}

#[test]
fn test_recovery_without_table_or_trailer() {
    let data = multi_page_document(&["0 0 m 10 10 l S", "q Q"]);
    let intact = PDFDocument::open(data.clone()).unwrap();
    let recovered = PDFDocument::open(truncate_before_xref(&data)).unwrap();

    assert!(recovered.xref().was_recovered());
    // The trailer is synthesized around the catalog
    let trailer = recovered.trailer().unwrap();
    assert_eq!(trailer.get("Root"), Some(&PDFObject::Ref(Ref::new(1, 0))));
    assert_same_objects(&intact, &recovered);
}

#[test]
fn test_recovery_with_bad_startxref() {
    let data = simple_document("BT /F1 10 Tf (x) Tj ET");
    let recovered = PDFDocument::open(break_startxref(&data)).unwrap();
    assert!(recovered.xref().was_recovered());
    assert_eq!(recovered.page_count(), 1);
}

#[test]
fn test_recovery_keeps_last_definition() {
    // Two revisions define object 4; the table is then destroyed
    let mut builder = PdfBuilder::new();
    base_revision(&mut builder)
        .object(4, "(old)")
        .xref_table()
        .object(4, "(new)")
        .xref_table();
    let data = break_startxref(&builder.finish());
    let doc = PDFDocument::open(data).unwrap();

    assert!(doc.xref().was_recovered());
    assert_eq!(doc.get(Ref::new(4, 0)), PDFObject::String(b"new".to_vec()));
}

#[test]
fn test_oversized_subsection_falls_back_to_scan() {
    let data = simple_document("0 0 m 5 5 l S");
    let at = data.windows(7).rposition(|w| w == b"trailer").unwrap();
    let mut damaged = data[..at].to_vec();
    damaged.extend_from_slice(b"9223372036854775807 1\n0000000000 65535 f \n");
    damaged.extend_from_slice(&data[at..]);

    let doc = PDFDocument::open(damaged).unwrap();
    assert!(doc.xref().was_recovered());
    assert_eq!(doc.page_count(), 1);
}

#[test]
fn test_unrecoverable_document_is_fatal() {
    let err = PDFDocument::open(b"%PDF-1.7\nno objects here\n%%EOF".to_vec()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

// ============================================================================
// Xref streams and object streams
// ============================================================================

fn compressed_document() -> Vec<u8> {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object_stream(
            5,
            &[
                (2, "<< /Type /Pages /Kids [10 0 R] /Count 1 >>"),
                (3, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>"),
            ],
        )
        .object(
            10,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 100] /Contents 11 0 R \
             /Resources << /Font << /F1 3 0 R >> >> >>",
        )
        .stream_object(11, "", b"BT /F1 12 Tf (A) Tj ET")
        .xref_stream(20);
    builder.finish()
}

#[test]
fn test_object_stream_members_resolve() {
    let doc = PDFDocument::open(compressed_document()).unwrap();

    assert_eq!(
        doc.xref().get_entry(2),
        Some(XRefEntry::Compressed { obj_stream_num: 5, index: 0 })
    );
    assert_eq!(doc.page_count(), 1);
    let font = doc.get(Ref::new(3, 0));
    assert_eq!(
        font.as_dict().and_then(|d| d.get("BaseFont")).and_then(|b| b.as_name()),
        Some("Helvetica")
    );
}

#[test]
fn test_recovery_finds_object_stream_members() {
    let intact = PDFDocument::open(compressed_document()).unwrap();
    let recovered = PDFDocument::open(break_startxref(&compressed_document())).unwrap();

    assert!(recovered.xref().was_recovered());
    assert!(matches!(
        recovered.xref().get_entry(3),
        Some(XRefEntry::Compressed { obj_stream_num: 5, .. })
    ));
    for num in [1, 2, 3, 10, 11] {
        assert_eq!(intact.get(Ref::new(num, 0)), recovered.get(Ref::new(num, 0)));
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// However many revisions redefine an object, and whichever section
    /// format each uses, the last revision's definition is the one read.
    #[test]
    fn prop_last_revision_wins(formats in proptest::collection::vec(any::<bool>(), 1..6)) {
        let mut builder = PdfBuilder::new();
        base_revision(&mut builder);
        for (i, use_stream) in formats.iter().enumerate() {
            builder.object(4, &i.to_string());
            if *use_stream {
                builder.xref_stream(100 + i as u32);
            } else {
                builder.xref_table();
            }
        }
        let doc = PDFDocument::open(builder.finish()).unwrap();
        let expected = (formats.len() - 1) as f64;
        prop_assert_eq!(doc.get(Ref::new(4, 0)), PDFObject::Number(expected));
    }

    #[test]
    fn prop_unknown_ids_are_null(num in 50u32..10_000) {
        let doc = PDFDocument::open(simple_document("q Q")).unwrap();
        prop_assert_eq!(doc.get(Ref::new(num, 0)), PDFObject::Null);
    }
}
