//! Concatenate PDFs into a single page tree.
//!
//! Each source is renumbered above the objects already collected, its pages
//! are flattened (inherited attributes copied down) and its objects are
//! moved across, minus its catalog and page-tree nodes. The merged document
//! gets one new root node listing every page in input order.

use super::{finish_pdf, pdf, StepContext};
use crate::document::{Document, MediaKind, OutputDocument};
use crate::error::{ErrorCode, PipelineError, StepError};
use crate::progress::SETUP_PERCENT;
use lopdf::{dictionary, Object, ObjectId};
use tracing::debug;

pub async fn merge(
    inputs: &[Document],
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    ctx.enter("parse")?;
    ctx.progress.report(SETUP_PERCENT);

    if let [only] = inputs {
        debug!("Single input, returning it unchanged");
        return Ok(OutputDocument::new(only.bytes().to_vec(), MediaKind::Pdf));
    }

    let mut merged = lopdf::Document::with_version(ctx.config().pdf_version.as_str());
    let mut kids: Vec<ObjectId> = Vec::new();
    let total = inputs.len();

    for (i, input) in inputs.iter().enumerate() {
        ctx.checkpoint()?;
        let mut doc = pdf::load(input.shared_bytes()).await.map_err(|e| {
            debug!(file = i + 1, name = ?input.name(), error = %e, "Could not parse input");
            PipelineError::at_item(
                ErrorCode::FailedToProcessFile,
                i + 1,
                format!("File {} could not be read as a PDF", i + 1),
            )
        })?;

        ctx.enter("transform")?;
        append(&mut merged, &mut doc, &mut kids).map_err(|e| {
            debug!(file = i + 1, error = %e, "Could not copy pages");
            PipelineError::at_item(
                ErrorCode::FailedToProcessFile,
                i + 1,
                format!("Pages of file {} could not be copied", i + 1),
            )
        })?;
        debug!(file = i + 1, pages = kids.len(), "Appended file");
        ctx.unit_done(i + 1, total).await?;
    }

    let pages_id = merged.new_object_id();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        }),
    );
    let catalog = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog);
    pdf::set_page_tree(&mut merged, &kids)?;
    merged.prune_objects();

    finish_pdf(merged, ctx).await
}

/// Move `doc`'s pages and the objects they need into `merged`.
fn append(
    merged: &mut lopdf::Document,
    doc: &mut lopdf::Document,
    kids: &mut Vec<ObjectId>,
) -> Result<(), StepError> {
    doc.renumber_objects_with(merged.max_id + 1);
    let pages = pdf::flatten_pages(doc)?;
    let catalog = pdf::catalog_id(doc)?;

    for (id, object) in std::mem::take(&mut doc.objects) {
        if id == catalog || is_pages_node(&object) {
            continue;
        }
        merged.max_id = merged.max_id.max(id.0);
        merged.objects.insert(id, object);
    }
    kids.extend(pages);
    Ok(())
}

fn is_pages_node(object: &Object) -> bool {
    object
        .as_dict()
        .and_then(|d| d.get(b"Type"))
        .and_then(Object::as_name)
        .map(|name| name == b"Pages")
        .unwrap_or(false)
}
