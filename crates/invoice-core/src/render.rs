//! Document Rendering
//!
//! Turns an invoice into a binary document. Rendering is pure: the timestamp
//! printed on the document is passed in, never read from the clock.

use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use rust_decimal::Decimal;

use crate::error::RenderError;
use crate::model::{Invoice, Party, round_for_display, validate_line_items};

/// A rendered document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,

    /// MIME type of `bytes`
    pub content_type: &'static str,
}

impl RenderedDocument {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Renderer trait (Strategy pattern)
///
/// Implementations must be deterministic for identical input.
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        invoice: &Invoice,
        rendered_at: DateTime<Utc>,
    ) -> Result<RenderedDocument, RenderError>;
}

/// Format an amount with exactly two decimals
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = round_for_display(amount);
    rounded.rescale(2);
    rounded.to_string()
}

/// A4 page, Helvetica text
#[derive(Clone, Debug)]
pub struct PdfRenderer {
    page_width: i64,
    page_height: i64,
    margin: i64,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self {
            page_width: 595,
            page_height: 842,
            margin: 56,
        }
    }
}

/// One line of text on the page
struct TextLine {
    text: String,
    size: i64,
    indent: i64,
}

impl TextLine {
    fn new(text: impl Into<String>, size: i64) -> Self {
        Self {
            text: text.into(),
            size,
            indent: 0,
        }
    }

    fn indented(mut self, indent: i64) -> Self {
        self.indent = indent;
        self
    }

    fn blank() -> Self {
        Self::new("", 8)
    }
}

impl PdfRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn party_lines(heading: &str, party: &Party, lines: &mut Vec<TextLine>) {
        lines.push(TextLine::new(heading, 14));
        lines.push(TextLine::new(format!("Name: {}", party.name), 12));
        if !party.contact.is_empty() {
            lines.push(TextLine::new(format!("Contact: {}", party.contact), 12));
        }
        lines.push(TextLine::blank());
    }

    fn layout(invoice: &Invoice, rendered_at: DateTime<Utc>) -> Vec<TextLine> {
        let mut lines = vec![
            TextLine::new("INVOICE", 24),
            TextLine::blank(),
            TextLine::new(format!("Invoice: {}", invoice.id), 10),
            TextLine::new(
                format!("Date: {}", rendered_at.format("%Y-%m-%d %H:%M UTC")),
                10,
            ),
            TextLine::blank(),
        ];

        Self::party_lines("From:", &invoice.issuer, &mut lines);
        Self::party_lines("To:", &invoice.bill_to, &mut lines);

        lines.push(TextLine::new("Items:", 14));
        for item in &invoice.line_items {
            lines.push(TextLine::new(item.description.clone(), 12));
            lines.push(
                TextLine::new(
                    format!(
                        "{} x {} = {}",
                        item.quantity.normalize(),
                        format_amount(item.unit_price),
                        format_amount(item.line_total())
                    ),
                    11,
                )
                .indented(20),
            );
        }

        lines.push(TextLine::blank());
        lines.push(TextLine::new(
            format!("Total: {}", format_amount(invoice.total())),
            16,
        ));
        lines
    }

    /// Split lines into pages of content operations
    fn paginate(&self, lines: &[TextLine]) -> Vec<Vec<Operation>> {
        let top = self.page_height - self.margin;
        let mut pages = Vec::new();
        let mut ops = Vec::new();
        let mut y = top;

        for line in lines {
            let leading = line.size + 6;
            if y - leading < self.margin && !ops.is_empty() {
                pages.push(std::mem::take(&mut ops));
                y = top;
            }
            y -= leading;

            if line.text.is_empty() {
                continue;
            }
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new("Tf", vec!["F1".into(), line.size.into()]));
            ops.push(Operation::new(
                "Td",
                vec![(self.margin + line.indent).into(), y.into()],
            ));
            ops.push(Operation::new(
                "Tj",
                vec![Object::string_literal(latin_text(&line.text))],
            ));
            ops.push(Operation::new("ET", vec![]));
        }

        pages.push(ops);
        pages
    }
}

/// The standard Type1 fonts only cover Latin text
fn latin_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

impl DocumentRenderer for PdfRenderer {
    fn render(
        &self,
        invoice: &Invoice,
        rendered_at: DateTime<Utc>,
    ) -> Result<RenderedDocument, RenderError> {
        validate_line_items(&invoice.line_items).map_err(RenderError::InvalidInput)?;

        let lines = Self::layout(invoice, rendered_at);

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids = Vec::new();
        for operations in self.paginate(&lines) {
            let content = Content { operations }
                .encode()
                .map_err(|e| RenderError::Encoding(e.to_string()))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let page_count = i64::try_from(kids.len())
            .map_err(|e| RenderError::Encoding(e.to_string()))?;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), self.page_width.into(), self.page_height.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| RenderError::Encoding(e.to_string()))?;

        Ok(RenderedDocument {
            bytes,
            content_type: "application/pdf",
        })
    }
}
