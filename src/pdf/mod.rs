//! PDF text extraction.
//!
//! Pages are read in ascending page-number order. Each page's content stream
//! is decoded into [`TextItem`]s, the item texts are joined with a single space
//! and the page is terminated with a newline. Failures never reach the caller:
//! [`PdfExtractor::extract_text`] always produces a string.

use log::{debug, error, info};
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use thiserror::Error;

use font::FontDecoder;

mod font;

pub const NO_TEXT_FALLBACK: &str = "No text extracted from PDF.";
pub const EXTRACTION_ERROR: &str = "Error extracting text from PDF";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("PDF is encrypted")]
    Encrypted,
}

/// One piece of text shown on a page. Line ends are reported as empty items
/// with `has_eol` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextItem {
    pub text: String,
    pub has_eol: bool,
}

impl TextItem {
    fn shown(text: String) -> Self {
        Self { text, has_eol: false }
    }

    fn eol() -> Self {
        Self {
            text: String::new(),
            has_eol: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdfExtractor {
    log_text: bool,
}

impl PdfExtractor {
    /// Built once at startup and shared through the application state.
    pub fn new(log_text: bool) -> Self {
        info!("PDF extractor ready (lopdf backend, log_text={})", log_text);
        Self { log_text }
    }

    /// Extracts all page text, or one of the fixed diagnostic strings.
    pub fn extract_text(&self, bytes: &[u8]) -> String {
        match self.try_extract(bytes) {
            Ok(text) => {
                if self.log_text {
                    debug!("Extracted text ({} chars):\n{}", text.len(), text);
                }
                if text.is_empty() {
                    NO_TEXT_FALLBACK.to_string()
                } else {
                    text
                }
            }
            Err(e) => {
                error!("Error extracting text from PDF: {}", e);
                EXTRACTION_ERROR.to_string()
            }
        }
    }

    pub fn try_extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let document = Document::load_mem(bytes)?;
        if document.is_encrypted() {
            return Err(ExtractError::Encrypted);
        }

        let mut text = String::new();
        // get_pages is keyed by page number, so iteration is in page order
        for (_, page_id) in document.get_pages() {
            let items = page_items(&document, page_id)?;
            let line = items
                .iter()
                .map(|item| item.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            text.push_str(&line);
            text.push('\n');
        }
        Ok(text)
    }
}

/// Decodes the text-showing operators of one page into items.
pub fn page_items(document: &Document, page_id: ObjectId) -> Result<Vec<TextItem>, ExtractError> {
    let data = document.get_page_content(page_id)?;
    let content = Content::decode(&data)?;
    let fonts = font::page_fonts(document, page_id);

    let mut items = Vec::new();
    let mut line_open = false;
    let mut current: Option<&FontDecoder> = None;

    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "Tf" => {
                current = operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| fonts.get(name));
            }
            "Tj" => {
                items.push(TextItem::shown(string_operand(operands.first(), current)));
                line_open = true;
            }
            "TJ" => {
                items.push(TextItem::shown(array_operand(operands.first(), current)));
                line_open = true;
            }
            "'" => {
                end_line(&mut items, &mut line_open);
                items.push(TextItem::shown(string_operand(operands.first(), current)));
                line_open = true;
            }
            "\"" => {
                end_line(&mut items, &mut line_open);
                items.push(TextItem::shown(string_operand(operands.get(2), current)));
                line_open = true;
            }
            "Td" | "TD" | "T*" | "ET" => end_line(&mut items, &mut line_open),
            _ => {}
        }
    }
    end_line(&mut items, &mut line_open);

    Ok(items)
}

fn end_line(items: &mut Vec<TextItem>, line_open: &mut bool) {
    if *line_open {
        items.push(TextItem::eol());
        *line_open = false;
    }
}

// Missing or non-string operands read as empty text
fn string_operand(operand: Option<&Object>, font: Option<&FontDecoder>) -> String {
    match operand {
        Some(Object::String(bytes, _)) => decode_shown(bytes, font),
        _ => String::new(),
    }
}

fn array_operand(operand: Option<&Object>, font: Option<&FontDecoder>) -> String {
    match operand {
        Some(Object::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Object::String(bytes, _) => Some(decode_shown(bytes, font)),
                _ => None,
            })
            .collect(),
        _ => String::new(),
    }
}

fn decode_shown(bytes: &[u8], font: Option<&FontDecoder>) -> String {
    match font {
        Some(font) => font.decode(bytes),
        None => decode_pdf_string(bytes),
    }
}

// Strings shown with no font selected: UTF-16BE with a BOM, else Latin-1
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Dictionary, Stream, StringFormat};

    /// Builds a PDF where each page shows the given lines with `Tj`.
    pub(crate) fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
        build_pdf_with(pages.iter().map(|lines| {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
            ];
            for (i, line) in lines.iter().enumerate() {
                if i > 0 {
                    operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
                }
                operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            }
            operations.push(Operation::new("ET", vec![]));
            operations
        }))
    }

    fn build_pdf_with<I>(pages: I) -> Vec<u8>
    where
        I: IntoIterator<Item = Vec<Operation>>,
    {
        save(build_document(helvetica, pages))
    }

    fn helvetica(_: &mut Document) -> Dictionary {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }
    }

    /// Builds a document whose pages share one font resource named `F1`.
    fn build_document<F, I>(font: F, pages: I) -> Document
    where
        F: FnOnce(&mut Document) -> Dictionary,
        I: IntoIterator<Item = Vec<Operation>>,
    {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font = font(&mut doc);
        let font_id = doc.add_object(font);
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for operations in pages {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn save(mut doc: Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn show_hex(bytes: &[u8]) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Tj", vec![Object::String(bytes.to_vec(), StringFormat::Hexadecimal)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn extractor() -> PdfExtractor {
        PdfExtractor::new(false)
    }

    #[test]
    fn pages_are_newline_terminated_in_order() {
        let pdf = build_pdf(&[&["Hello"], &["World"]]);
        assert_eq!(extractor().extract_text(&pdf), "Hello \nWorld \n");
    }

    #[test]
    fn items_on_a_page_are_space_joined() {
        let pdf = build_pdf(&[&["Termination", "Notice"]]);
        assert_eq!(extractor().extract_text(&pdf), "Termination  Notice \n");
    }

    #[test]
    fn zero_pages_yield_fallback() {
        let pdf = build_pdf(&[]);
        assert_eq!(extractor().extract_text(&pdf), NO_TEXT_FALLBACK);
    }

    #[test]
    fn blank_page_still_contributes_a_newline() {
        let pdf = build_pdf_with(vec![vec![]]);
        assert_eq!(extractor().try_extract(&pdf).unwrap(), "\n");
        assert_eq!(extractor().extract_text(&pdf), "\n");
    }

    #[test]
    fn garbage_bytes_yield_error_string() {
        assert_eq!(extractor().extract_text(b"definitely not a pdf"), EXTRACTION_ERROR);
        assert_eq!(extractor().extract_text(&[]), EXTRACTION_ERROR);
    }

    #[test]
    fn tj_arrays_and_quote_operators_are_items() {
        let pdf = build_pdf_with(vec![vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Gov"),
                    (-20).into(),
                    Object::string_literal("erning"),
                ])],
            ),
            Operation::new("'", vec![Object::string_literal("Law")]),
            Operation::new("ET", vec![]),
        ]]);
        let doc = Document::load_mem(&pdf).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let items = page_items(&doc, page_id).unwrap();
        assert_eq!(
            items,
            vec![
                TextItem::shown("Governing".into()),
                TextItem::eol(),
                TextItem::shown("Law".into()),
                TextItem::eol(),
            ]
        );
    }

    #[test]
    fn non_string_operands_read_as_empty() {
        let pdf = build_pdf_with(vec![vec![
            Operation::new("BT", vec![]),
            Operation::new("Tj", vec![42.into()]),
            Operation::new("Tj", vec![]),
            Operation::new("ET", vec![]),
        ]]);
        assert_eq!(extractor().extract_text(&pdf), "  \n");
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "§ 4".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let pdf = build_pdf_with(vec![vec![
            Operation::new("BT", vec![]),
            Operation::new("Tj", vec![Object::String(bytes, StringFormat::Hexadecimal)]),
            Operation::new("ET", vec![]),
        ]]);
        assert_eq!(extractor().extract_text(&pdf), "§ 4 \n");
    }

    #[test]
    fn win_ansi_punctuation_is_mapped() {
        let font = |_: &mut Document| {
            dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            }
        };
        let pdf = save(build_document(font, vec![show_hex(b"Lessee\x92s \x93rights\x94")]));
        assert_eq!(extractor().extract_text(&pdf), "Lessee\u{2019}s \u{201C}rights\u{201D} \n");
    }

    #[test]
    fn encoding_dictionary_uses_its_base_encoding() {
        let font = |doc: &mut Document| {
            let encoding_id = doc.add_object(dictionary! {
                "Type" => "Encoding",
                "BaseEncoding" => "WinAnsiEncoding",
            });
            dictionary! {
                "Type" => "Font",
                "Subtype" => "TrueType",
                "BaseFont" => "Arial",
                "Encoding" => encoding_id,
            }
        };
        let pdf = save(build_document(font, vec![show_hex(b"2019\x962020")]));
        assert_eq!(extractor().extract_text(&pdf), "2019\u{2013}2020 \n");
    }

    const TO_UNICODE: &str = "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CMapName /Adobe-Identity-UCS def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0050> <2019>
<0056> <0073>
endbfchar
1 beginbfrange
<0024> <0026> <0041>
endbfrange
endcmap
end
end
";

    fn identity_font(to_unicode: bool) -> impl FnOnce(&mut Document) -> Dictionary {
        move |doc: &mut Document| {
            let mut font = dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => "ABCDEF+TimesNewRoman",
                "Encoding" => "Identity-H",
            };
            if to_unicode {
                let cmap_id = doc.add_object(Stream::new(dictionary! {}, TO_UNICODE.as_bytes().to_vec()));
                font.set("ToUnicode", cmap_id);
            }
            font
        }
    }

    #[test]
    fn composite_fonts_decode_through_to_unicode() {
        let glyphs = [0x00, 0x24, 0x00, 0x50, 0x00, 0x56];
        let pdf = save(build_document(identity_font(true), vec![show_hex(&glyphs)]));
        assert_eq!(extractor().extract_text(&pdf), "A\u{2019}s \n");
    }

    #[test]
    fn composite_fonts_without_a_map_yield_no_glyph_ids() {
        let glyphs = [0x00, 0x24, 0x00, 0x50];
        let pdf = save(build_document(identity_font(false), vec![show_hex(&glyphs)]));
        assert_eq!(extractor().extract_text(&pdf), " \n");
    }

    #[test]
    fn encrypted_documents_yield_error_string() {
        let mut doc = build_document(helvetica, vec![show_hex(b"Confidential")]);
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "O" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
            "U" => Object::String(vec![0; 32], StringFormat::Hexadecimal),
            "P" => -4,
        });
        doc.trailer.set("Encrypt", encrypt_id);
        let pdf = save(doc);

        assert!(matches!(extractor().try_extract(&pdf), Err(ExtractError::Encrypted)));
        assert_eq!(extractor().extract_text(&pdf), EXTRACTION_ERROR);
    }
}
