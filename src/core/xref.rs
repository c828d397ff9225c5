use super::decode;
use super::error::{PDFError, PDFResult};
use super::lexer::Lexer;
use super::parser::{Dict, PDFObject, Parser, PdfStream, Ref};
use super::stream::Stream;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Highest object number a conforming file may use.
const MAX_OBJECT_NUMBER: u32 = 8_388_607;

/// Cross-reference table entry.
///
/// Each entry describes where to find an indirect object in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free entry - object number is available for reuse
    Free { next_free: u64, generation: u32 },

    /// Uncompressed entry - object is stored uncompressed at given offset
    Uncompressed { offset: u64, generation: u32 },

    /// Compressed entry - object is stored in an object stream
    Compressed { obj_stream_num: u32, index: u32 },
}

impl XRefEntry {
    /// Returns true if this entry is free.
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    /// Returns the generation number for this entry.
    pub fn generation(&self) -> u32 {
        match self {
            XRefEntry::Free { generation, .. } => *generation,
            XRefEntry::Uncompressed { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryState {
    NotAttempted,
    Succeeded,
    Failed,
}

#[derive(Default)]
struct Table {
    entries: Vec<Option<XRefEntry>>,
    trailer: Option<Dict>,
}

impl Table {
    /// Inserts an entry unless a newer section already defined the id.
    fn set_if_absent(&mut self, num: u32, entry: XRefEntry) {
        let idx = num as usize;
        if self.entries.len() <= idx {
            self.entries.resize(idx + 1, None);
        }
        if self.entries[idx].is_none() {
            self.entries[idx] = Some(entry);
        }
    }
}

/// Cross-reference manager for one document.
///
/// Maps object ids to their storage location and resolves them to objects.
/// Safe for concurrent use: the table and the object cache sit behind
/// `RwLock`s, and concurrent fills of the cache are last-writer-wins.
/// A structural fault found while resolving triggers the recovery scan,
/// which runs at most once per document and replaces the table wholesale.
pub struct XRef {
    /// The whole document
    stream: Stream,

    table: RwLock<Table>,

    /// Resolved objects keyed by id and generation
    cache: RwLock<FxHashMap<Ref, PDFObject>>,

    /// Bumped when recovery replaces the table so stale results are not cached
    epoch: AtomicU64,

    recovery: Mutex<RecoveryState>,
}

impl XRef {
    /// Creates an empty manager over the document bytes.
    pub fn new(stream: Stream) -> Self {
        XRef {
            stream,
            table: RwLock::new(Table::default()),
            cache: RwLock::new(FxHashMap::default()),
            epoch: AtomicU64::new(0),
            recovery: Mutex::new(RecoveryState::NotAttempted),
        }
    }

    /// Builds the table from the section at `startxref` and its `/Prev` chain.
    ///
    /// Falls back to the recovery scan when the chain cannot be read or the
    /// merged trailer has no `/Root`. Fails with `Fatal` only if recovery
    /// fails too.
    pub fn parse(&self, startxref: Option<usize>) -> PDFResult<()> {
        let primary = match startxref {
            Some(pos) => self.read_sections(pos),
            None => Err(PDFError::syntax("startxref not found")),
        };

        match primary {
            Ok(()) if self.has_root() => {
                tracing::debug!("Read cross-reference table with {} entries", self.len());
                return Ok(());
            }
            Ok(()) => tracing::warn!("Trailer has no /Root, scanning document"),
            Err(e) => tracing::warn!("Invalid cross-reference data ({}), scanning document", e),
        }

        if self.recover() && self.has_root() {
            Ok(())
        } else {
            Err(PDFError::fatal("Unable to reconstruct the cross-reference table"))
        }
    }

    fn has_root(&self) -> bool {
        self.read_table()
            .trailer
            .as_ref()
            .is_some_and(|t| t.contains_key("Root"))
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn parser_at(&self, pos: usize) -> PDFResult<Parser<'_>> {
        let stream = Stream::from_arc(self.stream.shared_bytes(), pos, 0);
        Parser::new(Lexer::new(Box::new(stream))?)
    }

    /// Walks the `/Prev` chain newest first, merging each section's entries.
    fn read_sections(&self, start: usize) -> PDFResult<()> {
        let mut visited = FxHashSet::default();
        let mut next = Some(start);

        while let Some(pos) = next {
            if !visited.insert(pos) {
                return Err(PDFError::syntax(format!("Cyclic /Prev pointer to {}", pos)));
            }
            if pos >= self.stream.as_slice().len() {
                return Err(PDFError::syntax(format!(
                    "Cross-reference offset {} beyond end of file",
                    pos
                )));
            }

            let (entries, trailer) = self.read_section(pos)?;

            next = trailer
                .get("Prev")
                .and_then(|p| p.as_int())
                .filter(|p| *p >= 0)
                .map(|p| p as usize);

            let mut table = self.write_table();
            for (num, entry) in entries {
                table.set_if_absent(num, entry);
            }
            match table.trailer.as_mut() {
                // Older trailers only fill keys the newest one lacks
                Some(main) => {
                    for (key, value) in trailer {
                        main.entry(key).or_insert(value);
                    }
                }
                None => table.trailer = Some(trailer),
            }
        }

        Ok(())
    }

    /// Reads one section (table or stream) at `pos`.
    fn read_section(&self, pos: usize) -> PDFResult<(Vec<(u32, XRefEntry)>, Dict)> {
        let mut parser = self.parser_at(pos)?;
        let first = parser.get_object()?;

        if first.is_command("xref") {
            let (table_entries, trailer) = read_xref_table(&mut parser)?;
            let mut section: FxHashMap<u32, XRefEntry> = FxHashMap::default();
            let mut order = Vec::with_capacity(table_entries.len());
            for (num, entry) in table_entries {
                if section.insert(num, entry).is_none() {
                    order.push(num);
                }
            }

            // Hybrid file: the stream supplies entries the table lists as free
            if let Some(stm) = trailer.get("XRefStm").and_then(|v| v.as_int()) {
                match self.read_xref_stream_at(stm.max(0) as usize) {
                    Ok((stream_entries, _)) => {
                        for (num, entry) in stream_entries {
                            let replace = section.get(&num).is_none_or(|e| e.is_free());
                            if replace {
                                if section.insert(num, entry).is_none() {
                                    order.push(num);
                                }
                            }
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring unreadable /XRefStm: {}", e),
                }
            }

            let entries = order
                .into_iter()
                .filter_map(|num| section.get(&num).map(|e| (num, *e)))
                .collect();
            return Ok((entries, trailer));
        }

        if matches!(first, PDFObject::Number(_)) {
            return self.read_xref_stream_at(pos);
        }

        Err(PDFError::syntax(format!(
            "Expected 'xref' or an xref stream at {}, got {}",
            pos,
            first.type_name()
        )))
    }

    /// Parses the xref stream object at `pos`.
    ///
    /// Runs before generic resolution is available, so the stream length must
    /// be direct or is found by scanning for `endstream`.
    fn read_xref_stream_at(&self, pos: usize) -> PDFResult<(Vec<(u32, XRefEntry)>, Dict)> {
        let mut parser = self.parser_at(pos)?;
        let (_, obj) = parser.parse_indirect_object()?;
        let PDFObject::Stream(stream) = obj else {
            return Err(PDFError::syntax(format!("No xref stream at {}", pos)));
        };
        if stream.get("Type").and_then(|t| t.as_name()) != Some("XRef") {
            return Err(PDFError::syntax("Stream at startxref is not /Type /XRef"));
        }
        let entries = read_xref_stream_entries(&stream)?;
        Ok((entries, stream.dict))
    }

    /// Returns the entry for an object number.
    pub fn get_entry(&self, obj_num: u32) -> Option<XRefEntry> {
        self.read_table()
            .entries
            .get(obj_num as usize)
            .copied()
            .flatten()
    }

    /// Returns the trailer dictionary.
    pub fn trailer(&self) -> Option<Dict> {
        self.read_table().trailer.clone()
    }

    /// Returns the number of entries in the xref table.
    pub fn len(&self) -> usize {
        self.read_table().entries.len()
    }

    /// Returns true if the xref table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the recovery scan has rebuilt the table.
    pub fn was_recovered(&self) -> bool {
        *self.recovery.lock().unwrap_or_else(PoisonError::into_inner) == RecoveryState::Succeeded
    }

    /// Changes each time recovery replaces the table.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Number of resolved objects currently cached.
    pub fn cached_len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn cache_get(&self, r: Ref) -> Option<PDFObject> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&r)
            .cloned()
    }

    fn cache_put(&self, r: Ref, obj: PDFObject, epoch: u64) {
        if self.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(r, obj);
    }

    /// Resolves an indirect reference.
    ///
    /// Free and absent ids resolve to `Null`. A structural fault triggers
    /// the recovery scan (once per document) and a single retry.
    pub fn fetch(&self, r: Ref) -> PDFResult<PDFObject> {
        if let Some(obj) = self.cache_get(r) {
            return Ok(obj);
        }

        match self.fetch_uncached(r) {
            Ok(obj) => Ok(obj),
            Err(e) => {
                tracing::warn!("Failed to load object {}: {}", r, e);
                if !self.recover() {
                    return Err(e);
                }
                self.fetch_uncached(r).map_err(|_| PDFError::UnresolvedReference {
                    num: r.num,
                    generation: r.generation,
                })
            }
        }
    }

    /// Fetches an object if it's a reference, otherwise returns the object as-is.
    pub fn fetch_if_ref(&self, obj: &PDFObject) -> PDFResult<PDFObject> {
        match obj {
            PDFObject::Ref(r) => self.fetch(*r),
            _ => Ok(obj.clone()),
        }
    }

    fn fetch_uncached(&self, r: Ref) -> PDFResult<PDFObject> {
        let epoch = self.epoch.load(Ordering::Acquire);

        match self.get_entry(r.num) {
            None | Some(XRefEntry::Free { .. }) => {
                tracing::debug!("Object {} is free or absent, resolving to null", r);
                Ok(PDFObject::Null)
            }

            Some(XRefEntry::Uncompressed { offset, generation }) => {
                if generation != r.generation {
                    return Err(PDFError::syntax(format!(
                        "Generation mismatch for object {}: table has {}",
                        r, generation
                    )));
                }
                let offset = offset as usize;
                if offset >= self.stream.as_slice().len() {
                    return Err(PDFError::syntax(format!(
                        "Offset {} for object {} is beyond end of file",
                        offset, r
                    )));
                }

                let mut parser = self
                    .parser_at(offset)?
                    .with_length_resolver(Box::new(move |len_ref| self.lookup_length(len_ref, r)));
                let (found, object) = parser.parse_indirect_object()?;
                if found != r {
                    return Err(PDFError::syntax(format!(
                        "Expected object {} at offset {}, found {}",
                        r, offset, found
                    )));
                }

                self.cache_put(r, object.clone(), epoch);
                Ok(object)
            }

            Some(XRefEntry::Compressed {
                obj_stream_num,
                index,
            }) => self.fetch_compressed(r, obj_stream_num, index, epoch),
        }
    }

    /// Resolves an indirect `/Length` without going through recovery.
    fn lookup_length(&self, len_ref: Ref, parsing: Ref) -> Option<usize> {
        if len_ref == parsing {
            return None;
        }
        if let Some(obj) = self.cache_get(len_ref) {
            return obj.as_int().filter(|n| *n >= 0).map(|n| n as usize);
        }
        match self.get_entry(len_ref.num)? {
            XRefEntry::Uncompressed { offset, .. } => {
                let mut parser = self.parser_at(offset as usize).ok()?;
                let (found, obj) = parser.parse_indirect_object().ok()?;
                (found == len_ref)
                    .then(|| obj.as_int())
                    .flatten()
                    .filter(|n| *n >= 0)
                    .map(|n| n as usize)
            }
            _ => None,
        }
    }

    /// Loads an object stored inside an object stream.
    ///
    /// Every member the table points at this container is cached while the
    /// container is open.
    fn fetch_compressed(
        &self,
        r: Ref,
        obj_stream_num: u32,
        index: u32,
        epoch: u64,
    ) -> PDFResult<PDFObject> {
        if !matches!(
            self.get_entry(obj_stream_num),
            Some(XRefEntry::Uncompressed { .. })
        ) {
            return Err(PDFError::syntax(format!(
                "Object stream {} for {} is not a direct object",
                obj_stream_num, r
            )));
        }

        let container = self.fetch(Ref::new(obj_stream_num, 0))?;
        let PDFObject::Stream(stream) = container else {
            return Err(PDFError::syntax(format!(
                "Object stream {} is a {}",
                obj_stream_num,
                container.type_name()
            )));
        };

        let members = self.object_stream_members(&stream)?;
        let Some(&(_, target_offset)) = members.get(index as usize) else {
            return Err(PDFError::syntax(format!(
                "Index {} out of range in object stream {}",
                index, obj_stream_num
            )));
        };

        let data = self.stream_bytes(&stream)?;
        let first = stream.get("First").and_then(|f| f.as_int()).unwrap_or(0).max(0) as usize;
        let parse_member = |offset: usize| -> PDFResult<PDFObject> {
            let start = first.saturating_add(offset);
            if start > data.len() {
                return Err(PDFError::syntax("Object stream member offset out of range"));
            }
            let member = Stream::from_arc(Arc::clone(&data), start, 0);
            Parser::new(Lexer::new(Box::new(member))?)?.get_object()
        };

        for (i, &(num, offset)) in members.iter().enumerate() {
            let points_here = self.get_entry(num)
                == Some(XRefEntry::Compressed {
                    obj_stream_num,
                    index: i as u32,
                });
            if points_here && i != index as usize {
                if let Ok(obj) = parse_member(offset) {
                    self.cache_put(Ref::new(num, 0), obj, epoch);
                }
            }
        }

        let object = parse_member(target_offset)?;
        self.cache_put(r, object.clone(), epoch);
        Ok(object)
    }

    /// Reads the `(object number, offset)` header of an object stream.
    fn object_stream_members(&self, stream: &PdfStream) -> PDFResult<Vec<(u32, usize)>> {
        let n = stream.get("N").and_then(|v| v.as_int()).unwrap_or(0).max(0) as usize;
        let first = stream.get("First").and_then(|v| v.as_int()).unwrap_or(0).max(0) as usize;
        let data = self.stream_bytes(stream)?;
        read_object_stream_header(&data, n, first)
    }

    /// Decoded bytes of a stream, memoized on the stream itself.
    ///
    /// `/Filter` and `/DecodeParms` values stored as references are followed.
    pub fn stream_bytes(&self, stream: &PdfStream) -> PDFResult<Arc<Vec<u8>>> {
        stream
            .decoded_cell()
            .get_or_init(|| {
                let resolve = |obj: &PDFObject| self.fetch_if_ref(obj).unwrap_or(PDFObject::Null);
                let (filters, params) = decode::filter_chain(&stream.dict, &resolve);
                decode::decode(stream.raw(), &filters, &params).map(|d| Arc::new(d.into_bytes()))
            })
            .clone()
    }

    /// Runs the recovery scan unless it already ran.
    ///
    /// Returns true if the table has been rebuilt, now or earlier.
    pub(crate) fn recover(&self) -> bool {
        let mut state = self.recovery.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            RecoveryState::Succeeded => true,
            RecoveryState::Failed => false,
            RecoveryState::NotAttempted => {
                let outcome = self.recovery_scan();
                *state = match outcome {
                    Ok(count) => {
                        tracing::info!("Recovered cross-reference table with {} objects", count);
                        RecoveryState::Succeeded
                    }
                    Err(e) => {
                        tracing::warn!("Recovery scan failed: {}", e);
                        RecoveryState::Failed
                    }
                };
                *state == RecoveryState::Succeeded
            }
        }
    }

    /// Rebuilds the table by scanning the whole file for `N G obj` headers.
    ///
    /// Later definitions of an id replace earlier ones. Members of object
    /// streams only fill ids with no direct definition. The trailer is the
    /// last `trailer` dictionary with a `/Root`, else an xref stream
    /// dictionary, else one synthesized around the last catalog found.
    fn recovery_scan(&self) -> PDFResult<usize> {
        let data = self.stream.as_slice();

        let mut direct: FxHashMap<u32, (u64, u32)> = FxHashMap::default();
        for (num, generation, offset) in scan_object_headers(data) {
            direct.insert(num, (offset as u64, generation));
        }

        let mut trailer: Option<Dict> = None;
        for pos in scan_keyword(data, b"trailer") {
            let Ok(mut parser) = self.parser_at(pos + b"trailer".len()) else {
                continue;
            };
            if let Ok(PDFObject::Dictionary(dict)) = parser.get_object() {
                if dict.contains_key("Root") {
                    trailer = Some(dict);
                }
            }
        }

        let mut ordered: Vec<(u32, u64, u32)> = direct
            .iter()
            .map(|(num, (offset, generation))| (*num, *offset, *generation))
            .collect();
        ordered.sort_by_key(|(_, offset, _)| *offset);

        let mut stream_trailer: Option<Dict> = None;
        let mut catalog: Option<Ref> = None;
        let mut compressed: FxHashMap<u32, XRefEntry> = FxHashMap::default();

        for &(num, offset, generation) in &ordered {
            let Ok(mut parser) = self.parser_at(offset as usize) else {
                continue;
            };
            let Ok((_, obj)) = parser.parse_indirect_object() else {
                continue;
            };
            let Some(dict) = obj.as_dict() else {
                continue;
            };
            match dict.get("Type").and_then(|t| t.as_name()) {
                Some("Catalog") => catalog = Some(Ref::new(num, generation)),
                Some("XRef") if dict.contains_key("Root") => stream_trailer = Some(dict.clone()),
                Some("ObjStm") => {
                    let Some(stream) = obj.as_stream() else {
                        continue;
                    };
                    let n = dict.get("N").and_then(|v| v.as_int()).unwrap_or(0).max(0) as usize;
                    let first = dict.get("First").and_then(|v| v.as_int()).unwrap_or(0).max(0) as usize;
                    let Ok(decoded) = decode::decode_stream(stream) else {
                        continue;
                    };
                    let Ok(members) = read_object_stream_header(&decoded.into_bytes(), n, first) else {
                        continue;
                    };
                    for (index, (member, _)) in members.into_iter().enumerate() {
                        compressed.insert(
                            member,
                            XRefEntry::Compressed {
                                obj_stream_num: num,
                                index: index as u32,
                            },
                        );
                    }
                }
                _ => {}
            }
        }

        let mut table = Table::default();
        for (num, (offset, generation)) in &direct {
            table.set_if_absent(*num, XRefEntry::Uncompressed {
                offset: *offset,
                generation: *generation,
            });
        }
        for (num, entry) in compressed {
            table.set_if_absent(num, entry);
        }

        let previous = self.read_table().trailer.clone();
        table.trailer = trailer
            .or(stream_trailer)
            .or_else(|| {
                catalog.map(|root| {
                    let mut dict = Dict::new();
                    dict.insert("Root".to_string(), PDFObject::Ref(root));
                    dict.insert("Size".to_string(), PDFObject::Number(table.entries.len() as f64));
                    dict
                })
            })
            .or(previous.filter(|t| t.contains_key("Root")));

        if table.trailer.is_none() {
            return Err(PDFError::fatal("No trailer or catalog found while scanning"));
        }

        let count = direct.len();
        {
            let mut current = self.write_table();
            *current = table;
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        Ok(count)
    }
}

/// Reads classic table subsections up to and including the trailer dictionary.
///
/// Example:
/// ```text
/// xref
/// 0 6
/// 0000000000 65535 f
/// 0000000015 00000 n
/// trailer
/// << /Size 6 /Root 1 0 R >>
/// ```
fn read_xref_table(parser: &mut Parser<'_>) -> PDFResult<(Vec<(u32, XRefEntry)>, Dict)> {
    let mut entries = Vec::new();

    loop {
        let first_obj = parser.get_object()?;
        if first_obj.is_command("trailer") {
            break;
        }

        let first = first_obj
            .as_int()
            .filter(|n| *n >= 0)
            .ok_or_else(|| PDFError::syntax(format!(
                "Expected subsection start or 'trailer', got {}",
                first_obj.type_name()
            )))?;
        let count = parser
            .get_object()?
            .as_int()
            .filter(|n| *n >= 0)
            .ok_or_else(|| PDFError::syntax("Expected subsection count"))?;

        let within_limit = first
            .checked_add(count)
            .is_some_and(|end| end <= MAX_OBJECT_NUMBER as i64 + 1);
        if !within_limit {
            return Err(PDFError::syntax(format!(
                "Subsection {} {} exceeds the object number limit",
                first, count
            )));
        }

        for i in 0..count {
            let entry = read_xref_entry(parser)?;
            entries.push(((first + i) as u32, entry));
        }
    }

    match parser.get_object()? {
        PDFObject::Dictionary(dict) => Ok((entries, dict)),
        other => Err(PDFError::syntax(format!(
            "Expected trailer dictionary, got {}",
            other.type_name()
        ))),
    }
}

/// Reads a single entry: `offset generation f|n`.
fn read_xref_entry(parser: &mut Parser<'_>) -> PDFResult<XRefEntry> {
    let offset = parser
        .get_object()?
        .as_number()
        .filter(|n| *n >= 0.0)
        .ok_or_else(|| PDFError::syntax("Expected offset in xref entry"))? as u64;
    let generation = parser
        .get_object()?
        .as_number()
        .filter(|n| *n >= 0.0)
        .ok_or_else(|| PDFError::syntax("Expected generation in xref entry"))? as u32;

    match parser.get_object()? {
        PDFObject::Command(kind) if kind == "f" => Ok(XRefEntry::Free {
            next_free: offset,
            generation,
        }),
        PDFObject::Command(kind) if kind == "n" => Ok(XRefEntry::Uncompressed { offset, generation }),
        other => Err(PDFError::syntax(format!(
            "Expected 'f' or 'n' in xref entry, got {:?}",
            other
        ))),
    }
}

/// Decodes the binary entries of an xref stream (`/W`, `/Index`, `/Size`).
fn read_xref_stream_entries(stream: &PdfStream) -> PDFResult<Vec<(u32, XRefEntry)>> {
    let widths: Vec<usize> = stream
        .get("W")
        .and_then(|w| w.as_array())
        .map(|w| w.iter().map(|v| v.as_int().unwrap_or(0).max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(PDFError::syntax(format!("Invalid /W in xref stream: {:?}", widths)));
    }
    let entry_len: usize = widths.iter().sum();
    if entry_len == 0 {
        return Err(PDFError::syntax("Xref stream /W describes empty entries"));
    }

    let size = stream.get("Size").and_then(|s| s.as_int()).unwrap_or(0).max(0);
    let ranges: Vec<(i64, i64)> = match stream.get("Index").and_then(|i| i.as_array()) {
        Some(index) => index
            .chunks_exact(2)
            .map(|pair| (pair[0].as_int().unwrap_or(0), pair[1].as_int().unwrap_or(0)))
            .collect(),
        None => vec![(0, size)],
    };

    let data = decode::decode_stream(stream)?.into_bytes();
    let read_field = |bytes: &[u8]| bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);

    let mut entries = Vec::new();
    let mut pos = 0;
    'ranges: for (first, count) in ranges {
        let end = first.checked_add(count);
        if first < 0 || count < 0 || end.is_none_or(|end| end > MAX_OBJECT_NUMBER as i64 + 1) {
            return Err(PDFError::syntax("Invalid /Index range in xref stream"));
        }
        for i in 0..count {
            let Some(row) = data.get(pos..pos + entry_len) else {
                tracing::warn!("Xref stream data ends early");
                break 'ranges;
            };
            pos += entry_len;

            let (w0, w1) = (widths[0], widths[1]);
            let kind = if w0 == 0 { 1 } else { read_field(&row[..w0]) };
            let field2 = read_field(&row[w0..w0 + w1]);
            let field3 = read_field(&row[w0 + w1..]);

            let entry = match kind {
                0 => XRefEntry::Free {
                    next_free: field2,
                    generation: field3 as u32,
                },
                1 => XRefEntry::Uncompressed {
                    offset: field2,
                    generation: field3 as u32,
                },
                2 => XRefEntry::Compressed {
                    obj_stream_num: field2 as u32,
                    index: field3 as u32,
                },
                _ => continue,
            };
            entries.push(((first + i) as u32, entry));
        }
    }

    Ok(entries)
}

/// Parses the `N` pairs of `object-number offset` at the start of an object stream.
fn read_object_stream_header(data: &[u8], n: usize, first: usize) -> PDFResult<Vec<(u32, usize)>> {
    let header = data
        .get(..first.min(data.len()))
        .ok_or_else(|| PDFError::syntax("Object stream /First out of range"))?;
    let mut parser = Parser::from_bytes(header.to_vec())?;

    let mut members = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        let num = parser.get_object()?.as_int();
        let offset = parser.get_object()?.as_int();
        match (num, offset) {
            (Some(num), Some(offset)) if num >= 0 && offset >= 0 => {
                members.push((num.min(MAX_OBJECT_NUMBER as i64) as u32, offset as usize));
            }
            _ => return Err(PDFError::syntax("Invalid object stream header")),
        }
    }
    Ok(members)
}

/// Finds every `N G obj` header, in file order, as (num, generation, offset of N).
fn scan_object_headers(data: &[u8]) -> Vec<(u32, u32, usize)> {
    let mut found = Vec::new();

    for pos in scan_keyword(data, b"obj") {
        // Walk backwards over: whitespace, generation digits, whitespace, number digits
        let mut i = pos;
        let skip_ws = |mut i: usize| {
            while i > 0 && Lexer::is_whitespace(data[i - 1]) {
                i -= 1;
            }
            i
        };
        let skip_digits = |mut i: usize| {
            while i > 0 && data[i - 1].is_ascii_digit() {
                i -= 1;
            }
            i
        };

        let gen_end = skip_ws(i);
        if gen_end == i {
            continue;
        }
        let gen_start = skip_digits(gen_end);
        if gen_start == gen_end {
            continue;
        }
        i = skip_ws(gen_start);
        if i == gen_start {
            continue;
        }
        let num_end = i;
        let num_start = skip_digits(num_end);
        if num_start == num_end {
            continue;
        }
        if num_start > 0 {
            let before = data[num_start - 1];
            if !Lexer::is_whitespace(before) && !Lexer::is_delimiter(before) {
                continue;
            }
        }

        let parse = |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
        };
        if let (Some(num), Some(generation)) = (
            parse(&data[num_start..num_end]),
            parse(&data[gen_start..gen_end]),
        ) {
            if num <= MAX_OBJECT_NUMBER && generation <= u16::MAX as u32 {
                found.push((num, generation, num_start));
            }
        }
    }

    found
}

/// Offsets of a keyword delimited on the right by whitespace, a delimiter or EOF.
fn scan_keyword<'d>(data: &'d [u8], keyword: &'d [u8]) -> impl Iterator<Item = usize> + 'd {
    data.windows(keyword.len())
        .enumerate()
        .filter(move |(_, w)| *w == keyword)
        .map(|(pos, _)| pos)
        .filter(move |pos| {
            let after = pos + keyword.len();
            after >= data.len()
                || Lexer::is_whitespace(data[after])
                || Lexer::is_delimiter(data[after])
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays out objects, computing offsets, then appends a classic table.
    fn build_pdf(objects: &[(u32, &str)], trailer_extra: &str) -> Vec<u8> {
        let mut data = b"%PDF-1.7\n".to_vec();
        let mut offsets = Vec::new();
        for (num, body) in objects {
            offsets.push((*num, data.len()));
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", num, body).as_bytes());
        }
        let size = objects.iter().map(|(n, _)| *n).max().unwrap_or(0) + 1;
        let xref_pos = data.len();
        data.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        data.extend_from_slice(b"0000000000 65535 f \n");
        for num in 1..size {
            match offsets.iter().find(|(n, _)| *n == num) {
                Some((_, off)) => data.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes()),
                None => data.extend_from_slice(b"0000000000 00000 f \n"),
            }
        }
        data.extend_from_slice(
            format!("trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n", size, trailer_extra, xref_pos)
                .as_bytes(),
        );
        data
    }

    fn startxref(data: &[u8]) -> usize {
        let pos = data.windows(9).rposition(|w| w == b"startxref").unwrap();
        let text = std::str::from_utf8(&data[pos + 9..]).unwrap();
        text.split_whitespace().next().unwrap().parse().unwrap()
    }

    fn open(data: Vec<u8>) -> XRef {
        let start = startxref(&data);
        let xref = XRef::new(Stream::from_bytes(data));
        xref.parse(Some(start)).unwrap();
        xref
    }

    #[test]
    fn test_xref_entry_is_free() {
        let free_entry = XRefEntry::Free {
            next_free: 0,
            generation: 65535,
        };
        assert!(free_entry.is_free());
        assert_eq!(free_entry.generation(), 65535);

        let uncompressed_entry = XRefEntry::Uncompressed {
            offset: 100,
            generation: 5,
        };
        assert!(!uncompressed_entry.is_free());
        assert_eq!(uncompressed_entry.generation(), 5);
    }

    #[test]
    fn test_parse_table_and_fetch() {
        let xref = open(build_pdf(&[(1, "<< /Type /Catalog >>"), (2, "42")], ""));

        assert_eq!(xref.len(), 3);
        assert!(xref.get_entry(0).unwrap().is_free());
        assert_eq!(xref.fetch(Ref::new(2, 0)).unwrap(), PDFObject::Number(42.0));
        assert!(!xref.was_recovered());
    }

    #[test]
    fn test_fetch_if_ref() {
        let xref = open(build_pdf(&[(1, "<< /Type /Catalog >>"), (2, "42")], ""));
        let resolved = xref.fetch_if_ref(&PDFObject::Ref(Ref::new(2, 0))).unwrap();
        assert_eq!(resolved, PDFObject::Number(42.0));
        let direct = xref.fetch_if_ref(&PDFObject::Number(100.0)).unwrap();
        assert_eq!(direct, PDFObject::Number(100.0));
    }

    #[test]
    fn test_free_and_absent_ids_are_null() {
        let xref = open(build_pdf(&[(1, "<< /Type /Catalog >>"), (3, "7")], ""));
        assert_eq!(xref.fetch(Ref::new(2, 0)).unwrap(), PDFObject::Null);
        assert_eq!(xref.fetch(Ref::new(999, 0)).unwrap(), PDFObject::Null);
        assert!(!xref.was_recovered());
    }

    #[test]
    fn test_indirect_stream_length() {
        let xref = open(build_pdf(
            &[
                (1, "<< /Type /Catalog >>"),
                (2, "<< /Length 3 0 R >>\nstream\nabcdef\nendstream"),
                (3, "6"),
            ],
            "",
        ));
        let obj = xref.fetch(Ref::new(2, 0)).unwrap();
        assert_eq!(obj.as_stream().unwrap().raw(), b"abcdef");
    }

    #[test]
    fn test_bad_offset_triggers_recovery_once() {
        let mut data = build_pdf(&[(1, "<< /Type /Catalog >>"), (2, "(two)")], "");
        // Point object 2 at object 1's offset
        let text = String::from_utf8(data.clone()).unwrap();
        let first_n = text.find(" 00000 n").unwrap();
        let entry_1 = &text[first_n - 10..first_n];
        let second_n = first_n + 1 + text[first_n + 1..].find(" 00000 n").unwrap();
        data.splice(second_n - 10..second_n, entry_1.bytes());

        let xref = open(data);
        assert_eq!(xref.fetch(Ref::new(2, 0)).unwrap(), PDFObject::String(b"two".to_vec()));
        assert!(xref.was_recovered());
    }

    #[test]
    fn test_cyclic_prev_falls_back_to_scan() {
        let data = build_pdf(&[(1, "<< /Type /Catalog >>"), (2, "5")], "");
        let xref_pos = startxref(&data);
        let data = build_pdf(&[(1, "<< /Type /Catalog >>"), (2, "5")], &format!("/Prev {}", xref_pos));
        let xref = open(data);
        assert!(xref.was_recovered());
        assert_eq!(xref.fetch(Ref::new(2, 0)).unwrap(), PDFObject::Number(5.0));
    }

    #[test]
    fn test_recovery_last_occurrence_wins() {
        let mut data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec();
        data.extend_from_slice(b"2 0 obj\n(old)\nendobj\n2 0 obj\n(new)\nendobj\n%%EOF\n");
        let xref = XRef::new(Stream::from_bytes(data));
        xref.parse(None).unwrap();

        assert!(xref.was_recovered());
        assert_eq!(xref.fetch(Ref::new(2, 0)).unwrap(), PDFObject::String(b"new".to_vec()));
        let trailer = xref.trailer().unwrap();
        assert_eq!(trailer.get("Root"), Some(&PDFObject::Ref(Ref::new(1, 0))));
    }

    #[test]
    fn test_no_objects_is_fatal() {
        let xref = XRef::new(Stream::from_bytes(b"garbage without structure".to_vec()));
        let err = xref.parse(None).unwrap_err();
        assert!(err.kind().is_fatal());
    }

    #[test]
    fn test_scan_object_headers_skips_endobj() {
        let headers = scan_object_headers(b"10 0 obj 1 endobj\n 11 2 obj\n(x) endobj");
        assert_eq!(headers, vec![(10, 0, 0), (11, 2, 19)]);
    }

    #[test]
    fn test_xref_stream_entries() {
        // W [1 2 1]: one free, one uncompressed at 15, one in object stream 5 index 0
        let rows: Vec<u8> = vec![0, 0, 0, 255, 1, 0, 15, 0, 2, 0, 5, 0];
        let mut dict = Dict::new();
        dict.insert(
            "W".into(),
            PDFObject::Array(vec![
                PDFObject::Number(1.0),
                PDFObject::Number(2.0),
                PDFObject::Number(1.0),
            ]),
        );
        dict.insert("Size".into(), PDFObject::Number(3.0));
        let entries = read_xref_stream_entries(&PdfStream::new(dict, rows)).unwrap();
        assert_eq!(
            entries,
            vec![
                (0, XRefEntry::Free { next_free: 0, generation: 255 }),
                (1, XRefEntry::Uncompressed { offset: 15, generation: 0 }),
                (2, XRefEntry::Compressed { obj_stream_num: 5, index: 0 }),
            ]
        );
    }

    #[test]
    fn test_xref_stream_index_overflow_is_syntax_error() {
        let mut dict = Dict::new();
        dict.insert(
            "W".into(),
            PDFObject::Array(vec![
                PDFObject::Number(1.0),
                PDFObject::Number(2.0),
                PDFObject::Number(1.0),
            ]),
        );
        dict.insert(
            "Index".into(),
            PDFObject::Array(vec![PDFObject::Number(i64::MAX as f64), PDFObject::Number(1.0)]),
        );
        let err = read_xref_stream_entries(&PdfStream::new(dict, vec![1, 0, 15, 0])).unwrap_err();
        assert_eq!(err.kind(), super::super::error::ErrorKind::MalformedSyntax);
    }
}
