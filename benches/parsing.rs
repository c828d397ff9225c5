/// Benchmarks for document opening, filters and page interpretation
///
/// Run with: cargo bench
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pdf_x_worker::core::decode::{self, Filter};
use pdf_x_worker::core::{EvaluatorOptions, OperatorChunk, PDFDocument, PartialEvaluator};

#[path = "../tests/test_utils.rs"]
mod test_utils;

fn busy_page() -> String {
    let mut content = String::new();
    for i in 0..500 {
        content.push_str(&format!(
            "q 1 0 0 1 {} {} cm 0.2 0.4 0.6 rg 0 0 10 10 re f Q BT /F1 9 Tf 10 {} Td (line {}) Tj ET\n",
            i % 50,
            i / 10,
            i,
            i
        ));
    }
    content
}

/// Benchmark document opening, intact and through recovery
fn benchmark_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_opening");

    let page = busy_page();
    let pages: Vec<&str> = std::iter::repeat_n(page.as_str(), 20).collect();
    let intact = test_utils::multi_page_document(&pages);
    let damaged = test_utils::zero_xref_offsets(&intact);

    group.throughput(Throughput::Bytes(intact.len() as u64));
    for (label, data) in [("intact", &intact), ("recovered", &damaged)] {
        group.bench_with_input(BenchmarkId::from_parameter(label), data, |b, data| {
            b.iter(|| PDFDocument::open(black_box(data.clone())));
        });
    }

    group.finish();
}

/// Benchmark the byte filters on a compressible payload
fn benchmark_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("filters");

    let payload = busy_page().into_bytes();
    group.throughput(Throughput::Bytes(payload.len() as u64));
    for filter in [Filter::Flate, Filter::Lzw, Filter::Ascii85, Filter::RunLength] {
        let chain = [filter];
        let Ok(encoded) = decode::encode(&payload, &chain, &[]) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(chain[0].name()), &encoded, |b, data| {
            b.iter(|| decode::decode(black_box(data), &chain, &[]));
        });
    }

    group.finish();
}

/// Benchmark interpreting a page into chunks
fn benchmark_operator_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("operator_list");

    let Ok(doc) = PDFDocument::open(test_utils::simple_document(&busy_page())) else {
        return;
    };
    let Ok(page) = doc.get_page(0) else {
        return;
    };

    for chunk_size in [100, 1000] {
        group.bench_with_input(BenchmarkId::new("chunk_size", chunk_size), &chunk_size, |b, size| {
            b.iter(|| {
                let mut chunks: Vec<OperatorChunk> = Vec::new();
                let options = EvaluatorOptions::default().with_chunk_size(*size);
                let _ = PartialEvaluator::new(&doc, options).get_operator_list(&page, &mut chunks);
                chunks
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_open, benchmark_filters, benchmark_operator_list);
criterion_main!(benches);
