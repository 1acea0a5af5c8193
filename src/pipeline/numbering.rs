//! Stamp page numbers onto PDF pages.
//!
//! Labels are set in Helvetica, one of the 14 standard fonts, so nothing is
//! embedded. Each labelled page's content becomes
//! `[q-stream, original streams…, Q-and-label stream]`, which keeps whatever
//! graphics state the original content leaves behind away from the label.

use super::{finish_pdf, open_pdf, pdf, StepContext};
use crate::config::{HorizontalAnchor, NumberPosition, PageNumberOptions};
use crate::document::{Document, OutputDocument};
use crate::error::StepError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream};
use tracing::debug;

/// Resource name the label font is registered under on every page.
const FONT_KEY: &str = "EQPageNo";

pub async fn add_page_numbers(
    input: &Document,
    options: &PageNumberOptions,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let mut doc = open_pdf(input, ctx).await?;

    ctx.enter("transform")?;
    let pages = pdf::page_ids(&doc);
    let targets = options.pages.to_indices(pages.len());
    let font_size = options.clamped_font_size();
    let margin = options.clamped_margin();
    let first = options.clamped_start_from();
    let last = first.saturating_add(pages.len().saturating_sub(1));
    debug!(
        pages = pages.len(),
        labelled = targets.len(),
        font_size,
        "Numbering pages"
    );

    let font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let save_state = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));

    for (n, &index) in targets.iter().enumerate() {
        let page = pages[index];
        let label = options.format.render(first.saturating_add(index), last);
        let width = text_width(&label, font_size);
        let media_box = pdf::media_box(&doc, page);
        let (x, y) = placement(media_box, width, font_size, margin, options.position);

        let mut content = b"Q\n".to_vec();
        content.extend(label_operations(&label, font_size, x, y).encode()?);
        let label_stream = doc.add_object(Stream::new(dictionary! {}, content));

        let resources = resources_with_font(&doc, page, font);
        let mut contents = vec![Object::Reference(save_state)];
        contents.extend(existing_contents(&doc, page));
        contents.push(Object::Reference(label_stream));

        let dict = doc.get_dictionary_mut(page)?;
        dict.set("Resources", resources);
        dict.set("Contents", contents);
        ctx.unit_done(n + 1, targets.len()).await?;
    }

    finish_pdf(doc, ctx).await
}

fn label_operations(label: &str, font_size: f32, x: f32, y: f32) -> Content {
    Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![FONT_KEY.into(), font_size.into()]),
            Operation::new("g", vec![0.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(label)]),
            Operation::new("ET", vec![]),
        ],
    }
}

/// A private copy of the page's resources with the label font added.
fn resources_with_font(doc: &lopdf::Document, page: ObjectId, font: ObjectId) -> Dictionary {
    let mut resources = pdf::inherited(doc, page, b"Resources")
        .and_then(|obj| pdf::resolve_dict(doc, &obj))
        .unwrap_or_default();
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|obj| pdf::resolve_dict(doc, obj))
        .unwrap_or_default();
    fonts.set(FONT_KEY, font);
    resources.set("Font", fonts);
    resources
}

/// The page's content streams as a flat list of references.
///
/// `/Contents` may be a stream reference, an array, or a reference to an
/// array; the last form is spliced in so no array ends up nested.
fn existing_contents(doc: &lopdf::Document, page: ObjectId) -> Vec<Object> {
    let Ok(dict) = doc.get_dictionary(page) else {
        return Vec::new();
    };
    match dict.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(reference @ Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![reference.clone()],
            Err(_) => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Advance width of `c` in Helvetica, in 1/1000 em.
fn helvetica_width(c: char) -> u32 {
    match c {
        ' ' | '/' | 'f' => 278,
        'P' => 667,
        _ => 556,
    }
}

fn text_width(text: &str, font_size: f32) -> f32 {
    let units: u32 = text.chars().map(helvetica_width).sum();
    units as f32 / 1000.0 * font_size
}

/// Baseline origin of the label inside `media_box`.
fn placement(
    media_box: [f32; 4],
    text_width: f32,
    font_size: f32,
    margin: f32,
    position: NumberPosition,
) -> (f32, f32) {
    let [llx, lly, urx, ury] = media_box;
    let x = match position.horizontal() {
        HorizontalAnchor::Left => llx + margin,
        HorizontalAnchor::Center => llx + (urx - llx - text_width) / 2.0,
        HorizontalAnchor::Right => urx - margin - text_width,
    };
    let y = if position.is_top() {
        ury - margin - font_size
    } else {
        lly + margin
    };
    (x, y)
}
