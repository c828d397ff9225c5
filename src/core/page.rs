use super::document::PDFDocument;
use super::parser::{Dict, PDFObject, Ref};
use rustc_hash::FxHashSet;

/// US Letter, used when no `/MediaBox` is found anywhere up the tree.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// A single page in a PDF document.
///
/// A page dictionary contains properties like:
/// - MediaBox: The visible area of the page
/// - Resources: Fonts, images, and other resources used by the page
/// - Contents: The content stream(s) that draw the page
/// - Parent: Reference to the parent Pages node
///
/// `Resources`, `MediaBox`, `CropBox` and `Rotate` are inheritable; they are
/// resolved against the `/Parent` chain when the page is loaded.
#[derive(Debug, Clone)]
pub struct Page {
    /// The page index (0-based)
    index: usize,

    /// The indirect object reference for this page (if it has one)
    reference: Option<Ref>,

    /// The page dictionary
    dict: Dict,

    resources: Dict,
    media_box: [f64; 4],
    crop_box: Option<[f64; 4]>,
    rotate: i32,
}

impl Page {
    pub(crate) fn load(doc: &PDFDocument, index: usize, reference: Option<Ref>, dict: Dict) -> Self {
        let resources = match inheritable(doc, &dict, "Resources") {
            Some(PDFObject::Dictionary(d)) => d,
            _ => Dict::new(),
        };
        let media_box = inheritable(doc, &dict, "MediaBox")
            .and_then(|v| resolve_rect(doc, &v))
            .unwrap_or(DEFAULT_MEDIA_BOX);
        let crop_box = inheritable(doc, &dict, "CropBox").and_then(|v| resolve_rect(doc, &v));
        let rotate = inheritable(doc, &dict, "Rotate")
            .and_then(|v| v.as_int())
            .map(normalize_rotation)
            .unwrap_or(0);

        Page {
            index,
            reference,
            dict,
            resources,
            media_box,
            crop_box,
            rotate,
        }
    }

    /// Returns the page index (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the page's indirect object reference if it has one.
    pub fn reference(&self) -> Option<Ref> {
        self.reference
    }

    /// Returns a reference to the page dictionary.
    pub fn dict(&self) -> &Dict {
        &self.dict
    }

    /// The page's resource dictionary, inherited if the page has none.
    pub fn resources(&self) -> &Dict {
        &self.resources
    }

    /// `[llx, lly, urx, ury]`, normalized so that `ll` is the minimum corner.
    pub fn media_box(&self) -> [f64; 4] {
        self.media_box
    }

    /// Visible area: the crop box clipped to the media box.
    pub fn view(&self) -> [f64; 4] {
        let Some(crop) = self.crop_box else {
            return self.media_box;
        };
        let m = self.media_box;
        let view = [m[0].max(crop[0]), m[1].max(crop[1]), m[2].min(crop[2]), m[3].min(crop[3])];
        if view[2] > view[0] && view[3] > view[1] {
            view
        } else {
            m
        }
    }

    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub fn rotate(&self) -> i32 {
        self.rotate
    }

    /// Concatenated content stream bytes.
    ///
    /// `/Contents` may be one stream or an array of streams; parts are joined
    /// with a newline so that tokens never straddle a boundary. Parts that
    /// fail to decode are skipped.
    pub fn content_bytes(&self, doc: &PDFDocument) -> Vec<u8> {
        let parts = match doc.get_dict_value(&self.dict, "Contents") {
            Some(PDFObject::Array(items)) => items.iter().map(|i| doc.fetch_if_ref(i)).collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        };

        let mut content = Vec::new();
        for part in parts {
            let PDFObject::Stream(stream) = part else {
                tracing::warn!("Page {} content part is a {}", self.index, part.type_name());
                continue;
            };
            match doc.get_stream_bytes(&stream) {
                Ok(bytes) => {
                    content.extend_from_slice(&bytes);
                    content.push(b'\n');
                }
                Err(e) => tracing::warn!("Skipping undecodable content on page {}: {}", self.index, e),
            }
        }
        content
    }
}

/// Resolves an inheritable page property by walking `/Parent` links.
///
/// The nearest definition wins.
fn inheritable(doc: &PDFDocument, dict: &Dict, key: &str) -> Option<PDFObject> {
    let mut visited = FxHashSet::default();
    let mut current = dict.clone();

    loop {
        if let Some(value) = doc.get_dict_value(&current, key) {
            return Some(value);
        }
        let parent = current.get("Parent")?;
        if let Some(r) = parent.as_reference() {
            if !visited.insert(r) {
                tracing::warn!("Circular /Parent chain at {}", r);
                return None;
            }
        }
        current = match doc.fetch_if_ref(parent) {
            PDFObject::Dictionary(d) => d,
            _ => return None,
        };
    }
}

fn resolve_rect(doc: &PDFDocument, value: &PDFObject) -> Option<[f64; 4]> {
    let arr = value.as_array()?;
    if arr.len() < 4 {
        return None;
    }
    let mut vals = [0.0; 4];
    for (slot, item) in vals.iter_mut().zip(arr) {
        *slot = doc.fetch_if_ref(item).as_number()?;
    }
    let (min_x, max_x) = if vals[0] <= vals[2] { (vals[0], vals[2]) } else { (vals[2], vals[0]) };
    let (min_y, max_y) = if vals[1] <= vals[3] { (vals[1], vals[3]) } else { (vals[3], vals[1]) };
    Some([min_x, min_y, max_x, max_y])
}

fn normalize_rotation(rotate: i64) -> i32 {
    if rotate % 90 != 0 {
        return 0;
    }
    rotate.rem_euclid(360) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(45), 0);
    }
}
