//! PDF rendition of the report: text pages followed by a chart page

use crate::error::SragResult;
use crate::storage::ensure_parent;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

const LINES_PER_PAGE: usize = 58;
const MAX_LINE_CHARS: usize = 90;

// US Letter, in points
const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const MARGIN: f64 = 50.0;
const CAPTION_HEIGHT: f64 = 24.0;

/// A PNG chart placed on the chart page under its caption
#[derive(Debug, Clone, Copy)]
pub struct PdfChart<'a> {
    pub caption: &'a str,
    pub path: &'a Path,
}

/// Write `lines` under `title` as Courier text pages, then `charts` stacked on one page
///
/// No chart page is added when `charts` is empty.
pub fn write_report_pdf(
    path: &Path,
    title: &str,
    lines: &[String],
    charts: &[PdfChart<'_>],
) -> SragResult<()> {
    let mut wrapped = vec![title.to_string(), String::new()];
    for line in lines {
        wrapped.extend(wrap(line, MAX_LINE_CHARS));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids: Vec<ObjectId> = wrapped
        .chunks(LINES_PER_PAGE)
        .map(|chunk| {
            let content = Stream::new(dictionary! {}, page_content(chunk));
            let content_id = doc.add_object(content);
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => media_box(),
                "Resources" => resources_id,
                "Contents" => content_id,
            })
        })
        .collect();

    if !charts.is_empty() {
        page_ids.push(chart_page(&mut doc, pages_id, font_id, charts)?);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => page_ids.len() as i64,
            "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    ensure_parent(path)?;
    doc.save(path)?;
    tracing::info!(path = %path.display(), charts = charts.len(), "Saved PDF report");
    Ok(())
}

fn media_box() -> Vec<Object> {
    vec![0.into(), 0.into(), (PAGE_WIDTH as i64).into(), (PAGE_HEIGHT as i64).into()]
}

/// One page with every chart scaled into an equal vertical slot
fn chart_page(
    doc: &mut Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    charts: &[PdfChart<'_>],
) -> SragResult<ObjectId> {
    let slot = (PAGE_HEIGHT - 2.0 * MARGIN) / charts.len() as f64;
    let available_width = PAGE_WIDTH - 2.0 * MARGIN;
    let available_height = slot - CAPTION_HEIGHT - 10.0;

    let mut xobjects = Dictionary::new();
    let mut content = Vec::new();

    for (index, chart) in charts.iter().enumerate() {
        let rgb = image::open(chart.path)?.to_rgb8();
        let (width, height) = rgb.dimensions();

        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb.into_raw(),
        );
        stream.compress()?;
        let name = format!("Im{}", index + 1);
        xobjects.set(name.as_str(), doc.add_object(stream));

        let scale = (available_width / width as f64).min(available_height / height as f64);
        let drawn_width = width as f64 * scale;
        let drawn_height = height as f64 * scale;
        let caption_y = PAGE_HEIGHT - MARGIN - slot * index as f64 - 12.0;
        let x = (PAGE_WIDTH - drawn_width) / 2.0;
        let y = caption_y - CAPTION_HEIGHT + 6.0 - drawn_height;

        content.extend(format!("BT\n/F1 11 Tf\n{:.2} {:.2} Td\n(", MARGIN, caption_y).into_bytes());
        content.extend(encode_line(chart.caption));
        content.extend_from_slice(b") Tj\nET\n");
        content.extend(
            format!(
                "q\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/{} Do\nQ\n",
                drawn_width, drawn_height, x, y, name
            )
            .into_bytes(),
        );
    }

    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box(),
        "Resources" => dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
            "XObject" => xobjects,
        },
        "Contents" => content_id,
    }))
}

fn page_content(lines: &[String]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(b"BT\n/F1 10 Tf\n50 742 Td\n12 TL\n");
    for line in lines {
        content.push(b'(');
        content.extend(encode_line(line));
        content.extend_from_slice(b") Tj T*\n");
    }
    content.extend_from_slice(b"ET\n");
    content
}

/// Latin-1 bytes with PDF string escapes; other characters become '?'
fn encode_line(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            '\t' => out.push(b' '),
            c if (c as u32) < 0x20 => {}
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::render::{save_chart, ChartKind};

    #[test]
    fn test_text_only_pdf_paginates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/report.pdf");
        let lines: Vec<String> = (0..130).map(|i| format!("Linha {}", i)).collect();

        write_report_pdf(&path, "Relatório SRAG", &lines, &[]).unwrap();

        let doc = Document::load(&path).unwrap();
        // title + blank + 130 lines over 58-line pages
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_charts_embedded_as_images_on_last_page() {
        let dir = TempDir::new().unwrap();
        let daily = dir.path().join("daily.png");
        let monthly = dir.path().join("monthly.png");
        save_chart(&daily, ChartKind::Line, &[3, 5, 2, 8]).unwrap();
        save_chart(&monthly, ChartKind::Bar, &[40, 55, 61]).unwrap();
        let path = dir.path().join("report.pdf");

        write_report_pdf(
            &path,
            "Relatório SRAG",
            &["Taxa de mortalidade".to_string()],
            &[
                PdfChart { caption: "Casos diários", path: &daily },
                PdfChart { caption: "Casos mensais", path: &monthly },
            ],
        )
        .unwrap();

        let doc = Document::load(&path).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        let first = *pages.values().next().unwrap();
        assert!(doc.get_page_images(first).unwrap().is_empty());

        let last = *pages.values().last().unwrap();
        let images = doc.get_page_images(last).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|i| i.width == 1000 && i.height == 500));
    }

    #[test]
    fn test_unreadable_chart_fails() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("chart.png");
        std::fs::write(&bogus, b"not a png").unwrap();

        let result = write_report_pdf(
            &dir.path().join("report.pdf"),
            "t",
            &[],
            &[PdfChart { caption: "c", path: &bogus }],
        );
        assert!(matches!(result, Err(crate::error::SragError::Image(_))));
    }

    #[test]
    fn test_encode_line_escapes_and_latin1() {
        assert_eq!(encode_line("a(b)\\"), b"a\\(b\\)\\\\".to_vec());
        assert_eq!(encode_line("ção"), vec![0xE7, 0xE3, b'o']);
        assert_eq!(encode_line("→"), b"?".to_vec());
    }

    #[test]
    fn test_wrap_long_line() {
        let line = "palavra ".repeat(30);
        let wrapped = wrap(line.trim(), 20);
        assert!(wrapped.len() > 1);
        assert!(wrapped.iter().all(|l| l.chars().count() <= 20));
    }
}
