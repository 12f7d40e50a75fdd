use printpdf::{BuiltinFont, Mm, PdfDocument};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};

use crate::advisor::analysis::AnalysisType;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Txt,
    Json,
    Csv,
    Pdf,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Txt => "text/plain; charset=utf-8",
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Pdf => "application/pdf",
        }
    }
}

/// A rendered download.
#[derive(Debug)]
pub struct Document {
    pub filename: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct JsonDoc<'a> {
    analysis: AnalysisType,
    generated_at: String,
    ideas: &'a str,
}

pub fn render(
    text: &str,
    format: ExportFormat,
    analysis: AnalysisType,
    now: OffsetDateTime,
) -> anyhow::Result<Document> {
    let day = now.format(format_description!("[year][month][day]"))?;
    let body = match format {
        ExportFormat::Txt => text.as_bytes().to_vec(),
        ExportFormat::Json => serde_json::to_vec_pretty(&JsonDoc {
            analysis,
            generated_at: now.format(&Rfc3339)?,
            ideas: text,
        })?,
        ExportFormat::Csv => to_csv(text).into_bytes(),
        ExportFormat::Pdf => to_pdf(&format!("Business Guide Report - {}", analysis.label()), text)?,
    };
    Ok(Document {
        filename: format!("business_ideas_{day}.{}", format.extension()),
        content_type: format.content_type(),
        body,
    })
}

/// One row per non-blank line.
fn to_csv(text: &str) -> String {
    let mut out = String::from("line,content\r\n");
    for (i, line) in text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).enumerate() {
        out.push_str(&format!("{},{}\r\n", i + 1, csv_field(line)));
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

const PDF_WRAP: usize = 90;

/// Plain A4 report: a bold title, then the text with markdown markers
/// stripped, wrapped and paginated.
fn to_pdf(title: &str, text: &str) -> anyhow::Result<Vec<u8>> {
    let (width, height) = (Mm(210.0), Mm(297.0));
    let (top, bottom, left) = (280.0, 15.0, 12.0);

    let (doc, page, layer) = PdfDocument::new(title, width, height, "text");
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow::anyhow!("load pdf font: {e}"))?;
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow::anyhow!("load pdf font: {e}"))?;

    let mut current = doc.get_page(page).get_layer(layer);
    current.use_text(pdf_safe(title), 16.0, Mm(left), Mm(top), &bold);
    let mut y = top - 14.0;

    for line in pdf_lines(text) {
        if y < bottom {
            let (page, layer) = doc.add_page(width, height, "text");
            current = doc.get_page(page).get_layer(layer);
            y = top;
        }
        current.use_text(line, 12.0, Mm(left), Mm(y), &regular);
        y -= 6.0;
    }

    doc.save_to_bytes()
        .map_err(|e| anyhow::anyhow!("write pdf: {e}"))
}

/// Builtin PDF fonts only cover a single-byte charset.
fn pdf_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn pdf_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.lines() {
        let line = pdf_safe(&raw.replace(['#', '*'], ""));
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let mut current = " ".repeat(indent);
        for word in line.split_whitespace() {
            if !current.trim().is_empty() && current.len() + 1 + word.len() > PDF_WRAP {
                out.push(std::mem::replace(&mut current, " ".repeat(indent)));
            }
            if !current.trim().is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        out.push(current);
    }
    out
}
