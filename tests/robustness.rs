//! Robustness: malformed input must degrade, never panic.
//!
//! Every document here is either rejected with a `Fatal` error or opens and
//! renders every page to a terminal chunk.


use pdf_x_worker::core::*;
use proptest::prelude::*;
use test_utils::*;

/// Opens `data` and renders each page; panics only on a broken invariant.
fn exercise(data: Vec<u8>) {
    let doc = match PDFDocument::open(data) {
        Ok(doc) => doc,
        Err(e) => {
            assert_eq!(e.kind(), ErrorKind::Fatal, "open failed with non-fatal {:?}", e);
            return;
        }
    };
    for index in 0..doc.page_count().min(4) {
        let Ok(page) = doc.get_page(index) else {
            continue;
        };
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let result = PartialEvaluator::new(&doc, EvaluatorOptions::default().with_chunk_size(16))
            .get_operator_list(&page, &mut chunks);
        match result {
            Ok(count) => {
                assert!(chunks.last().is_some_and(|c| c.last));
                assert_eq!(count, chunks.iter().map(|c| c.entries.len()).sum::<usize>());
            }
            Err(e) => assert!(e.kind().is_fatal(), "render failed with {:?}", e),
        }
    }
}

fn sample_document() -> Vec<u8> {
    multi_page_document(&[
        "q 1 0 0 1 10 10 cm 0.5 g 0 0 100 100 re f Q",
        "BT /F1 12 Tf 72 700 Td (Hello) Tj [(W) 120 (orld)] TJ ET",
        "/GS1 gs /Im1 Do /Fm1 Do 1 0 0 RG 0 0 m 10 0 l S",
    ])
}

#[test]
fn test_empty_and_tiny_inputs() {
    init_tracing();
    for data in [&b""[..], b"%PDF", b"%PDF-1.7\n", b"%%EOF", b"startxref\n0\n%%EOF"] {
        exercise(data.to_vec());
    }
}

#[test]
fn test_missing_resources_degrade() {
    // /GS1, /Im1 and /Fm1 do not exist on the third page
    let doc = PDFDocument::open(sample_document()).unwrap();
    let page = doc.get_page(2).unwrap();
    let mut chunks: Vec<OperatorChunk> = Vec::new();
    let mut evaluator = PartialEvaluator::new(&doc, EvaluatorOptions::default());
    evaluator.get_operator_list(&page, &mut chunks).unwrap();

    let ops: Vec<OpCode> = chunks.iter().flat_map(|c| c.entries.iter().map(|e| e.op)).collect();
    assert!(ops.ends_with(&[OpCode::MoveTo, OpCode::LineTo, OpCode::Stroke]));
    assert!(evaluator.fault_count() >= 3);
}

#[test]
fn test_page_tree_cycle() {
    let mut builder = PdfBuilder::new();
    builder
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R 2 0 R] /Count 2 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 10 10] >>")
        .xref_table();
    let doc = PDFDocument::open(builder.finish()).unwrap();
    assert_eq!(doc.page_count(), 1);
    exercise(builder.finish());
}

#[test]
fn test_every_truncation_point() {
    let data = sample_document();
    for cut in (0..data.len()).step_by(37) {
        exercise(data[..cut].to_vec());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_random_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        exercise(data);
    }

    #[test]
    fn prop_mutated_document_never_panics(
        mutations in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..16)
    ) {
        let mut data = sample_document();
        for (index, byte) in mutations {
            let i = index.index(data.len());
            data[i] = byte;
        }
        exercise(data);
    }
}
