//! Spreadsheet export.
//!
//! Writes one `.xlsx` workbook per run with a single `results` sheet: a
//! header row followed by one row per [`ContentRecord`], columns in
//! [`ContentRecord::COLUMNS`] order. Cells are inline strings, so the
//! workbook needs no shared-strings table or styles part.
//!
//! ```text
//! output_dir/
//! └── search_results_20250314_093000.xlsx
//! ```

use crate::models::ContentRecord;
use crate::utils::truncate_chars;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::error::Error;
use std::io::{Cursor, Write};
use tokio::fs;
use tracing::{info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Excel refuses cells longer than this.
pub const MAX_CELL_CHARS: usize = 32_767;

const SHEET_NAME: &str = "results";
const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{MAIN_NS}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{SHEET_NAME}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
    )
}

/// Spreadsheet column name for a zero-based index: 0 → `A`, 26 → `AA`.
pub fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

/// Drop characters XML 1.0 cannot carry and cap the cell length.
fn cell_text(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r') || *c >= ' ')
        .filter(|c| !matches!(c, '\u{FFFE}' | '\u{FFFF}'))
        .collect();
    truncate_chars(&cleaned, MAX_CELL_CHARS)
}

fn sheet_xml<R>(header: &[&str], rows: R) -> Result<Vec<u8>, Box<dyn Error>>
where
    R: IntoIterator<Item = Vec<String>>,
{
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    writer.write_event(Event::Start(
        BytesStart::new("worksheet").with_attributes([("xmlns", MAIN_NS)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("sheetData")))?;

    let header_row = header.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    for (row_index, cells) in std::iter::once(header_row).chain(rows).enumerate() {
        let row_number = (row_index + 1).to_string();
        writer.write_event(Event::Start(
            BytesStart::new("row").with_attributes([("r", row_number.as_str())]),
        ))?;
        for (col, value) in cells.iter().enumerate() {
            let reference = format!("{}{}", column_name(col), row_number);
            writer.write_event(Event::Start(
                BytesStart::new("c")
                    .with_attributes([("r", reference.as_str()), ("t", "inlineStr")]),
            ))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            writer.write_event(Event::Start(
                BytesStart::new("t").with_attributes([("xml:space", "preserve")]),
            ))?;
            let text = cell_text(value);
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
            writer.write_event(Event::End(BytesEnd::new("c")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("row")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
    writer.write_event(Event::End(BytesEnd::new("worksheet")))?;
    Ok(writer.into_inner().into_inner())
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Build the `.xlsx` bytes for a set of content records.
pub fn build_workbook(records: &[ContentRecord]) -> Result<Vec<u8>, Box<dyn Error>> {
    let sheet = sheet_xml(
        &ContentRecord::COLUMNS,
        records.iter().map(|r| r.cells().to_vec()),
    )?;

    let workbook = workbook_xml();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let parts: [(&str, &[u8]); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, bytes) in parts {
        zip.start_file(name, file_options())?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Write content records to a timestamped spreadsheet.
///
/// # Arguments
///
/// * `records` - One row each, in the order given
/// * `output_dir` - Directory to write into; created if missing
/// * `timestamp` - Run timestamp used in the file name
///
/// # Returns
///
/// The written path, or an error if building the workbook, creating the
/// directory or writing the file fails.
///
/// # Output Path
///
/// The file is written to: `{output_dir}/search_results_{timestamp}.xlsx`
#[instrument(level = "info", skip_all, fields(%output_dir, rows = records.len()))]
pub async fn write_results(
    records: &[ContentRecord],
    output_dir: &str,
    timestamp: &str,
) -> Result<String, Box<dyn Error>> {
    let bytes = build_workbook(records)?;
    fs::create_dir_all(output_dir).await?;
    let path = format!(
        "{}/search_results_{}.xlsx",
        output_dir.trim_end_matches('/'),
        timestamp
    );
    info!(%path, "Writing spreadsheet");
    fs::write(&path, bytes).await?;
    info!(%path, "Wrote spreadsheet");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut out = String::new();
        part.read_to_string(&mut out).unwrap();
        out
    }

    fn sample() -> ContentRecord {
        ContentRecord {
            title: "Fish & Chips <recipe>".to_string(),
            url: "https://food.example.com/fish".to_string(),
            content: "line one\nline two\u{0007}".to_string(),
            images: vec!["https://food.example.com/a.jpg".to_string()],
            keyword: "fish".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_column_name() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(9), "J");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn test_cell_text_strips_control_chars_and_caps_length() {
        assert_eq!(cell_text("a\u{0000}b\tc"), "ab\tc");
        assert_eq!(cell_text(&"x".repeat(40_000)).chars().count(), MAX_CELL_CHARS);
    }

    #[test]
    fn test_workbook_contains_all_parts() {
        let bytes = build_workbook(&[sample()]).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/worksheets/sheet1.xml",
        ] {
            assert!(names.contains(&part), "missing {part}");
        }
    }

    #[test]
    fn test_sheet_has_header_and_escaped_rows() {
        let bytes = build_workbook(&[sample()]).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");

        assert!(sheet.contains(r#"<c r="A1" t="inlineStr"><is><t xml:space="preserve">title</t></is></c>"#));
        assert!(sheet.contains(r#"<c r="J1" t="inlineStr">"#));
        assert!(sheet.contains("Fish &amp; Chips &lt;recipe&gt;"));
        assert!(sheet.contains(r#"<row r="2">"#));
        assert!(sheet.contains("line one\nline two<"));
        assert!(!sheet.contains('\u{0007}'));
        assert!(!sheet.contains(r#"<row r="3">"#));
    }

    #[tokio::test]
    async fn test_write_results_creates_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("outputs");
        let out = out.to_str().unwrap();

        let path = write_results(&[sample()], out, "20250314_093000").await.unwrap();

        assert!(path.ends_with("outputs/search_results_20250314_093000.xlsx"));
        let bytes = std::fs::read(&path).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("https://food.example.com/fish"));
    }
}
