use super::decode::{self, Decoded};
use super::error::{PDFError, PDFResult};
use super::font::{self, FontDescriptor};
use super::page::Page;
use super::parser::{Dict, PDFObject, PdfStream, Ref};
use super::stream::Stream;
use super::xref::XRef;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// One leaf of the page tree, in document order.
#[derive(Debug, Clone)]
struct PageNode {
    reference: Option<Ref>,
    dict: Dict,
}

/// Font descriptors keyed by font object; each slot is filled once.
type FontCache = FxHashMap<Ref, Arc<OnceLock<Arc<FontDescriptor>>>>;

/// Everything derived from one version of the cross-reference table.
struct Snapshot {
    /// [`XRef::epoch`] the snapshot was taken at
    epoch: u64,
    catalog: Arc<Dict>,
    /// Flattened page tree, built on first access
    pages: OnceLock<Vec<PageNode>>,
    fonts: RwLock<FontCache>,
}

impl Snapshot {
    fn new(epoch: u64, catalog: Arc<Dict>) -> Self {
        Snapshot {
            epoch,
            catalog,
            pages: OnceLock::new(),
            fonts: RwLock::new(FxHashMap::default()),
        }
    }

    fn pages(&self) -> &[PageNode] {
        self.pages.get().map_or(&[][..], Vec::as_slice)
    }
}

/// PDF Document handle.
///
/// Owns the cross-reference manager (and through it the object cache) for
/// the lifetime of the document. Everything downstream borrows from here:
/// pages, the interpreter and the font decoders resolve objects through
/// [`PDFDocument::get`] and never hold their own copy of the table.
///
/// The handle is `Sync`. Concurrent page renders share it behind an `Arc`.
/// When a late structural fault makes the table get rebuilt, the catalog,
/// page tree and font descriptors are reloaded against the new table.
pub struct PDFDocument {
    /// The cross-reference table
    xref: XRef,

    snapshot: RwLock<Arc<Snapshot>>,
}

impl PDFDocument {
    /// Opens a PDF document from a byte array.
    ///
    /// Only the cross-reference data and the catalog are read here; every
    /// other object is resolved lazily. A damaged table is rebuilt by the
    /// recovery scan. Fails with `Fatal` only when no catalog can be found.
    ///
    /// # Example
    /// ```no_run
    /// use pdf_x_worker::core::PDFDocument;
    ///
    /// let pdf_data = std::fs::read("document.pdf").unwrap();
    /// let doc = PDFDocument::open(pdf_data).unwrap();
    /// println!("{} pages", doc.page_count());
    /// ```
    pub fn open(data: Vec<u8>) -> PDFResult<Self> {
        let startxref = Self::find_startxref(&data);
        let xref = XRef::new(Stream::from_bytes(data));
        xref.parse(startxref)?;

        let catalog = match Self::load_catalog(&xref) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!("Catalog unreadable ({}), scanning document", e);
                if !xref.recover() {
                    return Err(PDFError::fatal("Document has no readable catalog"));
                }
                Self::load_catalog(&xref).map_err(|e| PDFError::fatal(e.to_string()))?
            }
        };

        tracing::info!(
            "Opened document: {} xref entries{}",
            xref.len(),
            if xref.was_recovered() { " (recovered)" } else { "" }
        );

        let snapshot = Snapshot::new(xref.epoch(), Arc::new(catalog));
        Ok(PDFDocument {
            xref,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Finds the byte offset of the cross-reference table.
    ///
    /// This searches for "startxref" near the end of the file and reads
    /// the offset that follows it.
    ///
    /// Format:
    /// ```text
    /// ...
    /// startxref
    /// 12345
    /// %%EOF
    /// ```
    fn find_startxref(data: &[u8]) -> Option<usize> {
        // Search from the end of the file (last 1024 bytes)
        let search_start = data.len().saturating_sub(1024);
        let keyword = b"startxref";
        let pos = data[search_start..]
            .windows(keyword.len())
            .rposition(|window| window == keyword)?;

        let mut offset_start = search_start + pos + keyword.len();
        while offset_start < data.len() && data[offset_start].is_ascii_whitespace() {
            offset_start += 1;
        }
        let offset_end = data[offset_start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(data.len(), |n| offset_start + n);

        std::str::from_utf8(&data[offset_start..offset_end])
            .ok()?
            .parse()
            .ok()
    }

    fn load_catalog(xref: &XRef) -> PDFResult<Dict> {
        let trailer = xref
            .trailer()
            .ok_or_else(|| PDFError::syntax("No trailer"))?;
        let root = trailer
            .get("Root")
            .ok_or_else(|| PDFError::syntax("Trailer has no /Root"))?;
        match xref.fetch_if_ref(root)? {
            PDFObject::Dictionary(dict) => Ok(dict),
            other => Err(PDFError::syntax(format!(
                "Catalog is a {}, expected a dictionary",
                other.type_name()
            ))),
        }
    }

    /// Returns the document catalog (root dictionary).
    pub fn catalog(&self) -> Arc<Dict> {
        self.snapshot().catalog.clone()
    }

    /// The snapshot matching the current table, rebuilt after recovery.
    fn snapshot(&self) -> Arc<Snapshot> {
        let epoch = self.xref.epoch();
        let current = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if current.epoch == epoch {
            return current;
        }

        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.epoch != epoch {
            tracing::info!("Cross-reference table was rebuilt, reloading the catalog");
            let catalog = match Self::load_catalog(&self.xref) {
                Ok(catalog) => Arc::new(catalog),
                Err(e) => {
                    tracing::warn!("Rebuilt table has no readable catalog ({}), keeping the old one", e);
                    slot.catalog.clone()
                }
            };
            *slot = Arc::new(Snapshot::new(epoch, catalog));
        }
        slot.clone()
    }

    /// Returns the trailer dictionary.
    pub fn trailer(&self) -> Option<Dict> {
        self.xref.trailer()
    }

    /// Returns an immutable reference to the xref table.
    pub fn xref(&self) -> &XRef {
        &self.xref
    }

    /// Resolves an indirect reference.
    ///
    /// Free, absent and unreadable objects all come back as `Null`.
    pub fn get(&self, r: Ref) -> PDFObject {
        match self.xref.fetch(r) {
            Ok(obj) => obj,
            Err(e) => {
                tracing::warn!("Treating {} as null: {}", r, e);
                PDFObject::Null
            }
        }
    }

    /// Follows `obj` one level if it is a reference.
    pub fn fetch_if_ref(&self, obj: &PDFObject) -> PDFObject {
        match obj {
            PDFObject::Ref(r) => self.get(*r),
            _ => obj.clone(),
        }
    }

    /// Looks up `key` in `dict`, following one level of indirection.
    ///
    /// Values nested inside the result are left unresolved.
    pub fn get_dict_value(&self, dict: &Dict, key: &str) -> Option<PDFObject> {
        match dict.get(key).map(|value| self.fetch_if_ref(value)) {
            Some(PDFObject::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Like [`get_dict_value`](Self::get_dict_value) but only returns dictionaries
    /// (a stream's dictionary counts).
    pub fn get_dict(&self, dict: &Dict, key: &str) -> Option<Dict> {
        match self.get_dict_value(dict, key)? {
            PDFObject::Dictionary(d) => Some(d),
            PDFObject::Stream(s) => Some(s.dict),
            _ => None,
        }
    }

    /// Decoded bytes of a stream, memoized on the stream object.
    ///
    /// Clones of a stream share the cache, so a stream fetched from the
    /// object cache is decoded once per document.
    pub fn get_stream_bytes(&self, stream: &PdfStream) -> PDFResult<Arc<Vec<u8>>> {
        self.xref.stream_bytes(stream)
    }

    /// Runs a stream's full filter chain, keeping image-codec output as samples.
    pub fn decode_stream(&self, stream: &PdfStream) -> PDFResult<Decoded> {
        let resolve = |obj: &PDFObject| self.fetch_if_ref(obj);
        let (filters, params) = decode::filter_chain(&stream.dict, &resolve);
        decode::decode(stream.raw(), &filters, &params)
    }

    /// A snapshot whose page tree was walked entirely against one table.
    fn with_pages(&self) -> Arc<Snapshot> {
        let snapshot = self.snapshot();
        snapshot.pages.get_or_init(|| self.collect_pages(&snapshot.catalog));
        if snapshot.epoch == self.xref.epoch() {
            return snapshot;
        }
        // Recovery ran during the walk; it runs at most once
        let snapshot = self.snapshot();
        snapshot.pages.get_or_init(|| self.collect_pages(&snapshot.catalog));
        snapshot
    }

    /// Walks the page tree depth first, collecting leaves in order.
    fn collect_pages(&self, catalog: &Dict) -> Vec<PageNode> {
        let mut pages = Vec::new();
        let mut visited = FxHashSet::default();
        let Some(root) = catalog.get("Pages").cloned() else {
            tracing::warn!("Catalog has no /Pages");
            return pages;
        };

        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let reference = node.as_reference();
            if let Some(r) = reference {
                if !visited.insert(r) {
                    tracing::warn!("Page tree revisits {}, skipping", r);
                    continue;
                }
            }

            let dict = match self.fetch_if_ref(&node) {
                PDFObject::Dictionary(dict) => dict,
                other => {
                    tracing::warn!("Page tree node is a {}, skipping", other.type_name());
                    continue;
                }
            };

            let kids = self
                .get_dict_value(&dict, "Kids")
                .and_then(|k| k.as_array().map(|a| a.to_vec()));
            let is_leaf = match dict.get("Type").and_then(|t| t.as_name()) {
                Some("Page") => true,
                Some("Pages") => false,
                _ => kids.is_none(),
            };

            if is_leaf {
                pages.push(PageNode { reference, dict });
            } else if let Some(kids) = kids {
                stack.extend(kids.into_iter().rev());
            }
        }

        tracing::debug!("Page tree has {} pages", pages.len());
        pages
    }

    /// Number of pages reachable from the page tree.
    pub fn page_count(&self) -> usize {
        self.with_pages().pages().len()
    }

    /// Loads a page by 0-based index, with inherited attributes applied.
    pub fn get_page(&self, index: usize) -> PDFResult<Page> {
        let snapshot = self.with_pages();
        let pages = snapshot.pages();
        let node = pages.get(index).ok_or_else(|| {
            PDFError::fatal(format!(
                "Page index {} out of range ({} pages)",
                index,
                pages.len()
            ))
        })?;
        Ok(Page::load(self, index, node.reference, node.dict.clone()))
    }

    /// Returns the font descriptor for a font resource.
    ///
    /// Fonts stored as indirect objects are built once per document and
    /// shared; concurrent callers for the same font wait for the first build.
    /// Direct font dictionaries have no identity and are built per call.
    pub fn font_descriptor(&self, reference: Option<Ref>, dict: &Dict) -> Arc<FontDescriptor> {
        let Some(r) = reference else {
            return Arc::new(font::load_font(self, dict));
        };

        let snapshot = self.snapshot();
        let existing = snapshot
            .fonts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&r)
            .cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => snapshot
                .fonts
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(r)
                .or_default()
                .clone(),
        };

        slot.get_or_init(|| {
            tracing::debug!("Building font descriptor for {}", r);
            Arc::new(font::load_font(self, dict))
        })
        .clone()
    }

    /// Number of distinct font objects with a cache slot.
    pub fn cached_font_count(&self) -> usize {
        self.snapshot()
            .fonts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for PDFDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PDFDocument")
            .field("xref_entries", &self.xref.len())
            .field("recovered", &self.xref.was_recovered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays out numbered objects and a matching xref table.
    fn build_pdf(objects: &[&str]) -> Vec<u8> {
        let mut data = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(data.len());
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_pos = data.len();
        data.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            data.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        data.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_pos
            )
            .as_bytes(),
        );
        data
    }

    fn create_minimal_pdf() -> Vec<u8> {
        build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
        ])
    }

    #[test]
    fn test_find_startxref() {
        let pdf = create_minimal_pdf();
        let offset = PDFDocument::find_startxref(&pdf).unwrap();
        assert_eq!(&pdf[offset..offset + 4], b"xref");
    }

    #[test]
    fn test_open_minimal_pdf() {
        let doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        let catalog = doc.catalog();
        assert_eq!(catalog.get("Type"), Some(&PDFObject::Name("Catalog".to_string())));
        assert!(catalog.contains_key("Pages"));
        assert!(!doc.xref().was_recovered());
    }

    #[test]
    fn test_page_count() {
        let doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert!(doc.get_page(0).is_ok());
        assert!(doc.get_page(1).is_err());
    }

    #[test]
    fn test_nested_page_tree_order() {
        let doc = PDFDocument::open(build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R 5 0 R] /Count 3 >>",
            "<< /Type /Pages /Parent 2 0 R /Kids [4 0 R 6 0 R] /Count 2 >>",
            "<< /Type /Page /Parent 3 0 R /Rotate 90 >>",
            "<< /Type /Page /Parent 2 0 R /Rotate 180 >>",
            "<< /Type /Page /Parent 3 0 R /Rotate 270 >>",
        ]))
        .unwrap();
        assert_eq!(doc.page_count(), 3);
        let rotations: Vec<i32> = (0..3).map(|i| doc.get_page(i).unwrap().rotate()).collect();
        assert_eq!(rotations, vec![90, 270, 180]);
    }

    #[test]
    fn test_cyclic_page_tree_terminates() {
        let doc = PDFDocument::open(build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [2 0 R 3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
        ]))
        .unwrap();
        assert_eq!(doc.page_count(), 1);
    }

    #[test]
    fn test_get_dict_value_follows_one_level() {
        let doc = PDFDocument::open(build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R /Extra 3 0 R >>",
            "<< /Type /Pages /Kids [] /Count 0 >>",
            "<< /Inner 4 0 R >>",
            "(deep)",
        ]))
        .unwrap();

        let extra = doc.get_dict_value(&doc.catalog(), "Extra").unwrap();
        let inner = extra.as_dict().unwrap().get("Inner").unwrap();
        assert_eq!(inner, &PDFObject::Ref(Ref::new(4, 0)));
        assert_eq!(doc.fetch_if_ref(inner), PDFObject::String(b"deep".to_vec()));
        assert_eq!(doc.get_dict_value(&doc.catalog(), "Missing"), None);
    }

    #[test]
    fn test_absent_reference_is_null() {
        let doc = PDFDocument::open(create_minimal_pdf()).unwrap();
        assert_eq!(doc.get(Ref::new(40, 0)), PDFObject::Null);
    }

    #[test]
    fn test_stream_bytes_memoized() {
        let doc = PDFDocument::open(build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [] /Count 0 >>",
            "<< /Length 10 /Filter /ASCIIHexDecode >>\nstream\n48656C6C6F\nendstream",
        ]))
        .unwrap();

        let PDFObject::Stream(first) = doc.get(Ref::new(3, 0)) else {
            panic!("expected stream");
        };
        let PDFObject::Stream(second) = doc.get(Ref::new(3, 0)) else {
            panic!("expected stream");
        };
        let a = doc.get_stream_bytes(&first).unwrap();
        let b = doc.get_stream_bytes(&second).unwrap();
        assert_eq!(a.as_slice(), b"Hello");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_late_recovery_reloads_catalog_and_pages() {
        let bodies = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
            "<< /Type /Page /Parent 2 0 R /Rotate 90 >>",
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>",
        ];
        let mut data = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            offsets.push(data.len());
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        // Later definitions only the scan sees
        data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>\nendobj\n");
        data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Lang (en) >>\nendobj\n");
        // Object 3 points at the header, so loading it forces the scan
        offsets[2] = 0;
        let xref_pos = data.len();
        data.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
        for off in offsets {
            data.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        data.extend_from_slice(
            format!("trailer\n<< /Size 6 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref_pos).as_bytes(),
        );

        let doc = PDFDocument::open(data).unwrap();
        assert!(!doc.xref().was_recovered());
        assert!(!doc.catalog().contains_key("Lang"));
        let font = match doc.get(Ref::new(5, 0)) {
            PDFObject::Dictionary(dict) => dict,
            other => panic!("expected a font dictionary, got {:?}", other),
        };
        doc.font_descriptor(Some(Ref::new(5, 0)), &font);
        assert_eq!(doc.cached_font_count(), 1);

        assert_eq!(doc.page_count(), 2);
        assert!(doc.xref().was_recovered());
        assert!(doc.catalog().contains_key("Lang"));
        assert_eq!(doc.cached_font_count(), 0);
        assert!(doc.get_page(1).is_ok());
    }

    #[test]
    fn test_unreadable_document_is_fatal() {
        let err = PDFDocument::open(b"not a pdf at all".to_vec()).unwrap_err();
        assert!(err.kind().is_fatal());
    }
}
