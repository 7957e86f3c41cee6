//! Decoding of shown strings through the page's fonts.
//!
//! A font's `/ToUnicode` map wins when present. Simple fonts otherwise use
//! their named base encoding through lopdf. Composite fonts without a map
//! carry glyph ids only and decode to nothing.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

// Upper bound on codes expanded from a single bfrange entry
const MAX_RANGE_LEN: u32 = 0x1_0000;

#[derive(Debug)]
pub struct FontDecoder {
    /// Base encoding name for simple fonts, `None` for composite fonts.
    encoding: Option<String>,
    to_unicode: Option<ToUnicodeMap>,
}

impl FontDecoder {
    pub fn new(document: &Document, font: &Dictionary) -> Self {
        let composite = font.get(b"Subtype").and_then(Object::as_name_str).ok() == Some("Type0");
        let encoding = (!composite).then(|| base_encoding(document, font));
        let to_unicode = font
            .get(b"ToUnicode")
            .and_then(|object| document.dereference(object))
            .and_then(|(_, object)| object.as_stream())
            .ok()
            .and_then(|stream| {
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                ToUnicodeMap::parse(&data)
            });
        Self { encoding, to_unicode }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match (&self.to_unicode, &self.encoding) {
            (Some(map), encoding) => map.decode(bytes, |code| match encoding {
                Some(name) => Document::decode_text(Some(name.as_str()), code),
                None => String::new(),
            }),
            (None, Some(name)) => Document::decode_text(Some(name.as_str()), bytes),
            (None, None) => String::new(),
        }
    }
}

/// Decoders for every font resource of a page, keyed by resource name.
pub fn page_fonts(document: &Document, page_id: ObjectId) -> BTreeMap<Vec<u8>, FontDecoder> {
    document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| {
            let decoder = FontDecoder::new(document, font);
            debug!(
                "Font {}: encoding {:?}, ToUnicode {}",
                String::from_utf8_lossy(&name),
                decoder.encoding,
                decoder.to_unicode.is_some()
            );
            (name, decoder)
        })
        .collect()
}

fn base_encoding(document: &Document, font: &Dictionary) -> String {
    let encoding = font
        .get(b"Encoding")
        .and_then(|object| document.dereference(object))
        .map(|(_, object)| object);
    match encoding {
        Ok(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
        Ok(Object::Dictionary(dict)) => dict
            .get(b"BaseEncoding")
            .and_then(Object::as_name_str)
            .unwrap_or("StandardEncoding")
            .to_string(),
        _ => "StandardEncoding".to_string(),
    }
}

/// Character code to Unicode mapping read from a ToUnicode CMap.
#[derive(Debug, Default)]
pub struct ToUnicodeMap {
    codespaces: Vec<(Vec<u8>, Vec<u8>)>,
    chars: HashMap<Vec<u8>, String>,
    default_width: usize,
}

impl ToUnicodeMap {
    /// Reads `bfchar`, `bfrange` and `codespacerange` sections. Returns `None`
    /// when the stream is unreadable or maps nothing.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let content = Content::decode(data).ok()?;
        let mut map = Self::default();

        for operation in &content.operations {
            let operands = &operation.operands;
            match operation.operator.as_str() {
                "endcodespacerange" => {
                    for pair in operands.chunks_exact(2) {
                        if let (Object::String(low, _), Object::String(high, _)) = (&pair[0], &pair[1]) {
                            map.codespaces.push((low.clone(), high.clone()));
                        }
                    }
                }
                "endbfchar" => {
                    for pair in operands.chunks_exact(2) {
                        if let (Object::String(code, _), Object::String(target, _)) = (&pair[0], &pair[1]) {
                            map.chars.insert(code.clone(), utf16_be(target));
                        }
                    }
                }
                "endbfrange" => {
                    for entry in operands.chunks_exact(3) {
                        if let (Object::String(low, _), Object::String(high, _)) = (&entry[0], &entry[1]) {
                            map.insert_range(low, high, &entry[2]);
                        }
                    }
                }
                _ => {}
            }
        }

        if map.chars.is_empty() {
            return None;
        }
        map.default_width = map
            .codespaces
            .iter()
            .map(|(low, _)| low.len())
            .chain(map.chars.keys().map(Vec::len))
            .filter(|&width| width > 0)
            .min()
            .unwrap_or(1);
        Some(map)
    }

    fn insert_range(&mut self, low: &[u8], high: &[u8], target: &Object) {
        if low.is_empty() || low.len() > 4 || low.len() != high.len() {
            return;
        }
        let width = low.len();
        let (start, end) = (be_number(low), be_number(high));
        if end < start || end - start >= MAX_RANGE_LEN {
            return;
        }

        for offset in 0..=(end - start) {
            let code = (start + offset).to_be_bytes()[4 - width..].to_vec();
            let text = match target {
                Object::String(base, _) => {
                    let mut units = utf16_units(base);
                    if let Some(last) = units.last_mut() {
                        *last = last.wrapping_add(offset as u16);
                    }
                    String::from_utf16_lossy(&units)
                }
                Object::Array(targets) => match targets.get(offset as usize) {
                    Some(Object::String(bytes, _)) => utf16_be(bytes),
                    _ => continue,
                },
                _ => return,
            };
            self.chars.insert(code, text);
        }
    }

    fn code_width(&self, rest: &[u8]) -> usize {
        self.codespaces
            .iter()
            .find(|(low, high)| {
                !low.is_empty()
                    && rest.len() >= low.len()
                    && low.len() == high.len()
                    && rest
                        .iter()
                        .zip(low.iter().zip(high))
                        .all(|(byte, (lo, hi))| lo <= byte && byte <= hi)
            })
            .map(|(low, _)| low.len())
            .unwrap_or(self.default_width)
    }

    /// Maps each code in `bytes`. Unmapped codes go through `fallback`.
    pub fn decode<F>(&self, bytes: &[u8], fallback: F) -> String
    where
        F: Fn(&[u8]) -> String,
    {
        let mut text = String::new();
        let mut index = 0;
        while index < bytes.len() {
            let end = (index + self.code_width(&bytes[index..])).min(bytes.len());
            let code = &bytes[index..end];
            match self.chars.get(code) {
                Some(mapped) => text.push_str(mapped),
                None => text.push_str(&fallback(code)),
            }
            index = end;
        }
        text
    }
}

fn be_number(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, &byte| (acc << 8) | u32::from(byte))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn utf16_be(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY_CMAP: &str = "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0050> <2019>
endbfchar
2 beginbfrange
<0024> <0026> <0041>
<0030> <0031> [<00A7> <00B6>]
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end
";

    #[test]
    fn cmap_sections_are_read() {
        let map = ToUnicodeMap::parse(IDENTITY_CMAP.as_bytes()).unwrap();
        let decode = |bytes: &[u8]| map.decode(bytes, |_| "?".to_string());

        assert_eq!(decode(&[0x00, 0x24, 0x00, 0x25, 0x00, 0x26]), "ABC");
        assert_eq!(decode(&[0x00, 0x24, 0x00, 0x50, 0x00, 0x03, 0x00, 0x30]), "A’ §");
        assert_eq!(decode(&[0x00, 0x31]), "¶");
        assert_eq!(decode(&[0x00, 0x99]), "?");
    }

    #[test]
    fn unreadable_or_empty_cmaps_are_ignored() {
        assert!(ToUnicodeMap::parse(b"begincmap endcmap").is_none());
        assert!(ToUnicodeMap::parse(b"<0000").is_none());
    }

    #[test]
    fn width_defaults_to_mapped_codes_without_codespace() {
        let map = ToUnicodeMap::parse(b"1 beginbfchar <41> <0042> endbfchar").unwrap();
        assert_eq!(map.decode(b"AAz", |code| format!("[{}]", code[0])), "BB[122]");
    }
}
