use pdf_x_worker::core::operator_list::{DecodedResource, OpArg, OperatorChunk};
use pdf_x_worker::core::{PDFDocument, PDFObject, Ref, WorkerOptions, XRef, XRefEntry};
use pdf_x_worker::transport::{Controller, DocumentSource, RenderEvent, RenderParams};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("PDF Worker Inspector");
        eprintln!("Usage: {} <pdf-file> [options]", args[0]);
        eprintln!("\nOptions:");
        eprintln!("  --all            Show catalog, trailer and xref (default)");
        eprintln!("  --catalog        Show document catalog");
        eprintln!("  --xref           Show cross-reference table");
        eprintln!("  --trailer        Show trailer dictionary");
        eprintln!("  --object <num>   Show specific object by number");
        eprintln!("  --fonts          List font descriptors used by each page");
        eprintln!("  --ops <page>     Stream a page's operator list through the worker");
        eprintln!("  --chunk <n>      Operators per chunk for --ops");
        eprintln!("  --stats          Show summary statistics");
        eprintln!("\nSet RUST_LOG=debug for interpreter diagnostics.");
        process::exit(1);
    }

    let pdf_path = &args[1];
    if !Path::new(pdf_path).exists() {
        eprintln!("Error: File not found: {}", pdf_path);
        process::exit(1);
    }

    let show_all = args.len() == 2 || args.iter().any(|x| x == "--all");
    let show_catalog = show_all || args.iter().any(|x| x == "--catalog");
    let show_xref = show_all || args.iter().any(|x| x == "--xref");
    let show_trailer = show_all || args.iter().any(|x| x == "--trailer");
    let show_fonts = args.iter().any(|x| x == "--fonts");
    let show_stats = args.iter().any(|x| x == "--stats");
    let object_num = numeric_option::<u32>(&args, "--object");
    let ops_page = numeric_option::<usize>(&args, "--ops");
    let chunk_size = numeric_option::<usize>(&args, "--chunk");

    let data = match std::fs::read(pdf_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading {}: {}", pdf_path, e);
            process::exit(1);
        }
    };
    let file_size = data.len();
    let doc = match PDFDocument::open(data) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error parsing PDF: {}", e);
            process::exit(1);
        }
    };

    println!("File: {}", pdf_path);
    println!("File Size: {}", format_size(file_size));
    println!("Page Count: {}", doc.page_count());
    println!("XRef Entries: {}", doc.xref().len());
    println!("Recovered: {}", if doc.xref().was_recovered() { "yes" } else { "no" });
    println!();

    if show_catalog {
        println!("═══════════════ CATALOG ═══════════════");
        print_object(&PDFObject::Dictionary(doc.catalog().as_ref().clone()), 0);
        println!();
    }

    if show_trailer {
        println!("═══════════════ TRAILER ═══════════════");
        match doc.trailer() {
            Some(trailer) => print_object(&PDFObject::Dictionary(trailer), 0),
            None => println!("(none)"),
        }
        println!();
    }

    if show_xref {
        println!("═══════════════ XREF ═══════════════");
        print_xref_table(doc.xref());
        println!();
    }

    if let Some(num) = object_num {
        println!("═══════════════ OBJECT {} ═══════════════", num);
        print_object(&doc.get(Ref::new(num, 0)), 0);
        println!();
    }

    if show_fonts {
        println!("═══════════════ FONTS ═══════════════");
        list_fonts(&doc);
        println!();
    }

    if show_stats {
        println!("═══════════════ STATISTICS ═══════════════");
        show_statistics(&doc);
        println!();
    }

    if let Some(page) = ops_page {
        println!("═══════════════ OPERATORS (page {}) ═══════════════", page);
        if let Err(e) = stream_operators(PathBuf::from(pdf_path), page, chunk_size) {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn numeric_option<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let pos = args.iter().position(|arg| arg == flag)?;
    match args.get(pos + 1).and_then(|v| v.parse().ok()) {
        Some(value) => Some(value),
        None => {
            eprintln!("Error: {} requires a number", flag);
            process::exit(1);
        }
    }
}

fn format_size(size: usize) -> String {
    if size < 1024 {
        format!("{} B", size)
    } else if size < 1024 * 1024 {
        format!("{:.2} KB", size as f64 / 1024.0)
    } else {
        format!("{:.2} MB", size as f64 / (1024.0 * 1024.0))
    }
}

fn print_object(obj: &PDFObject, indent: usize) {
    let indent_str = "  ".repeat(indent);
    match obj {
        PDFObject::Array(arr) if !arr.is_empty() => {
            println!("{}[", indent_str);
            for item in arr {
                print_object(item, indent + 1);
            }
            println!("{}]", indent_str);
        }
        PDFObject::Dictionary(dict) if !dict.is_empty() => {
            println!("{}<<", indent_str);
            print_entries(dict, indent);
            println!("{}>>", indent_str);
        }
        PDFObject::Stream(stream) => {
            println!("{}stream ({} raw bytes)", indent_str, stream.raw().len());
            println!("{}<<", indent_str);
            print_entries(&stream.dict, indent);
            println!("{}>>", indent_str);
        }
        other => println!("{}{}", indent_str, inline(other)),
    }
}

fn print_entries(dict: &pdf_x_worker::core::Dict, indent: usize) {
    // Sorted for stable output
    let mut keys: Vec<_> = dict.keys().collect();
    keys.sort();
    for key in keys {
        let value = &dict[key];
        match value {
            PDFObject::Dictionary(d) if !d.is_empty() => {
                println!("{}/{}:", "  ".repeat(indent + 1), key);
                print_object(value, indent + 2);
            }
            PDFObject::Array(a) if !a.is_empty() => {
                println!("{}/{}:", "  ".repeat(indent + 1), key);
                print_object(value, indent + 2);
            }
            _ => println!("{}/{}: {}", "  ".repeat(indent + 1), key, inline(value)),
        }
    }
}

fn inline(obj: &PDFObject) -> String {
    match obj {
        PDFObject::Null => "null".to_string(),
        PDFObject::Boolean(b) => b.to_string(),
        PDFObject::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
        PDFObject::Number(n) => n.to_string(),
        PDFObject::String(s) => {
            let display = String::from_utf8_lossy(s);
            let shown: String = display.chars().take(50).collect();
            if shown.len() < display.len() {
                format!("({}...)", shown)
            } else {
                format!("({})", shown)
            }
        }
        PDFObject::HexString(s) => {
            let hex_str = hex_prefix(s, 25);
            format!("<{}>", hex_str)
        }
        PDFObject::Name(n) => format!("/{}", n),
        PDFObject::Command(c) => c.clone(),
        PDFObject::Array(_) => "[]".to_string(),
        PDFObject::Dictionary(_) => "<< >>".to_string(),
        PDFObject::Stream(stream) => format!("stream ({} raw bytes)", stream.raw().len()),
        PDFObject::Ref(r) => r.to_string(),
        PDFObject::EOF => "EOF".to_string(),
    }
}

fn hex_prefix(bytes: &[u8], max: usize) -> String {
    let hex_str: String = bytes.iter().take(max).map(|b| format!("{:02x}", b)).collect();
    if bytes.len() > max {
        format!("{}...", hex_str)
    } else {
        hex_str
    }
}

fn print_xref_table(xref: &XRef) {
    println!("Total entries: {}\n", xref.len());
    println!("{:<8} {:<12} {:<12} {:<8}", "Object", "Type", "Offset/Ref", "Gen");
    println!("{}", "─".repeat(50));

    for i in 0..xref.len() {
        let Some(entry) = xref.get_entry(i as u32) else {
            continue;
        };
        match entry {
            XRefEntry::Free { next_free, generation } => {
                println!("{:<8} {:<12} {:<12} {:<8}", i, "free", next_free, generation);
            }
            XRefEntry::Uncompressed { offset, generation } => {
                println!("{:<8} {:<12} {:<12} {:<8}", i, "uncompressed", offset, generation);
            }
            XRefEntry::Compressed { obj_stream_num, index } => {
                let location = format!("{}[{}]", obj_stream_num, index);
                println!("{:<8} {:<12} {:<12} {:<8}", i, "compressed", location, 0);
            }
        }
    }
}

fn list_fonts(doc: &PDFDocument) {
    for index in 0..doc.page_count() {
        let Ok(page) = doc.get_page(index) else {
            continue;
        };
        let Some(fonts) = doc.get_dict(page.resources(), "Font") else {
            continue;
        };
        println!("Page {}:", index + 1);
        let sorted: BTreeMap<_, _> = fonts.iter().collect();
        for (name, value) in sorted {
            let Some(dict) = doc.fetch_if_ref(value).as_dict().cloned() else {
                println!("  /{}: not a dictionary", name);
                continue;
            };
            let font = doc.font_descriptor(value.as_reference(), &dict);
            println!(
                "  /{}: {} ({:?}, {:?}){}",
                name,
                font.name,
                font.font_type,
                font.source,
                if font.fallback { " [substituted]" } else { "" }
            );
        }
    }
}

fn show_statistics(doc: &PDFDocument) {
    let xref = doc.xref();
    let mut free = 0;
    let mut uncompressed = 0;
    let mut compressed = 0;
    for i in 0..xref.len() {
        match xref.get_entry(i as u32) {
            Some(XRefEntry::Free { .. }) => free += 1,
            Some(XRefEntry::Uncompressed { .. }) => uncompressed += 1,
            Some(XRefEntry::Compressed { .. }) => compressed += 1,
            None => {}
        }
    }
    println!("Objects: {} in file, {} in object streams, {} free", uncompressed, compressed, free);
    println!("Pages: {}", doc.page_count());
    println!("Cached objects: {}", xref.cached_len());
    println!("Cached fonts: {}", doc.cached_font_count());
}

/// Opens the file in a worker and prints the page's operator chunks as they arrive.
fn stream_operators(path: PathBuf, page: usize, chunk_size: Option<usize>) -> Result<(), String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let controller = Controller::spawn(WorkerOptions::default());
        let document = controller
            .open(DocumentSource::Path(path))
            .await
            .map_err(|e| e.to_string())?;
        let params = RenderParams {
            chunk_size,
            ..RenderParams::default()
        };
        let mut task = controller
            .render_page(document, page, params)
            .await
            .map_err(|e| e.to_string())?;

        while let Some(event) = task.next().await {
            match event {
                RenderEvent::Chunk(chunk) => print_chunk(&chunk),
                RenderEvent::Done { operators } => println!("Done: {} operators", operators),
                RenderEvent::Cancelled => return Err("render cancelled".to_string()),
                RenderEvent::Error(payload) => return Err(payload.to_string()),
            }
        }
        controller.close(document).await.map_err(|e| e.to_string())
    })
}

fn print_chunk(chunk: &OperatorChunk) {
    println!(
        "── chunk {} ({} operators){}",
        chunk.index,
        chunk.entries.len(),
        if chunk.last { ", last" } else { "" }
    );
    for (id, resource) in &chunk.resources {
        match resource {
            DecodedResource::Font(font) => println!("   + font {} = {}", id, font.name),
            DecodedResource::Image(image) => {
                println!("   + image {} = {}x{}x{}", id, image.width, image.height, image.channels)
            }
        }
    }
    for entry in &chunk.entries {
        let args: Vec<String> = entry.args.iter().map(format_arg).collect();
        println!("   {} {}", entry.op, args.join(" "));
    }
}

fn format_arg(arg: &OpArg) -> String {
    match arg {
        OpArg::Null => "null".to_string(),
        OpArg::Bool(b) => b.to_string(),
        OpArg::Number(n) => format!("{}", n),
        OpArg::Name(n) => format!("/{}", n),
        OpArg::String(s) => format!("({})", String::from_utf8_lossy(s)),
        OpArg::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_arg).collect();
            format!("[{}]", parts.join(" "))
        }
        OpArg::Dict(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("/{} {}", k, format_arg(v)))
                .collect();
            format!("<< {} >>", parts.join(" "))
        }
        OpArg::Rgb([r, g, b]) => format!("#{:02x}{:02x}{:02x}", r, g, b),
        OpArg::Resource(id) => format!("@{}", id),
        OpArg::Glyphs(glyphs) => {
            let text: String = glyphs
                .iter()
                .map(|g| g.glyph.unicode.clone().unwrap_or_else(|| "\u{fffd}".to_string()))
                .collect();
            format!("{:?} ({} glyphs)", text, glyphs.len())
        }
    }
}
