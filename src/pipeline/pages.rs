//! Extract, delete and reorder pages.
//!
//! Caller indices are 0-based. Indices outside `[0, page_count)` are
//! dropped without error; an empty selection yields a PDF with no pages.

use super::{finish_pdf, open_pdf, pdf, StepContext};
use crate::document::{Document, OutputDocument};
use crate::error::StepError;
use lopdf::ObjectId;
use std::collections::HashSet;
use tracing::debug;

/// Keep only `selected`, in ascending order, without duplicates.
pub async fn extract(
    input: &Document,
    selected: &[usize],
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let mut doc = open_pdf(input, ctx).await?;

    ctx.enter("transform")?;
    let pages = pdf::flatten_pages(&mut doc)?;
    let indices = ascending_unique(selected, pages.len());
    debug!(requested = selected.len(), kept = indices.len(), "Extracting pages");

    let mut kids = Vec::with_capacity(indices.len());
    for (n, &index) in indices.iter().enumerate() {
        kids.push(pages[index]);
        ctx.unit_done(n + 1, indices.len()).await?;
    }

    rebuild(&mut doc, &kids)?;
    finish_pdf(doc, ctx).await
}

/// Remove `selected`.
///
/// Removal runs from the highest index down, one page at a time, so removing
/// a page never shifts one that is still waiting to be removed.
pub async fn delete(
    input: &Document,
    selected: &[usize],
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let mut doc = open_pdf(input, ctx).await?;

    ctx.enter("transform")?;
    let mut kids = pdf::flatten_pages(&mut doc)?;
    let mut indices = ascending_unique(selected, kids.len());
    indices.reverse();
    debug!(pages = kids.len(), removing = indices.len(), "Deleting pages");

    let total = indices.len();
    for (n, index) in indices.into_iter().enumerate() {
        kids.remove(index);
        ctx.unit_done(n + 1, total).await?;
    }

    rebuild(&mut doc, &kids)?;
    finish_pdf(doc, ctx).await
}

/// Lay pages out in `order`. A page listed twice appears twice.
pub async fn reorder(
    input: &Document,
    order: &[usize],
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let mut doc = open_pdf(input, ctx).await?;

    ctx.enter("transform")?;
    let pages = pdf::flatten_pages(&mut doc)?;
    let indices: Vec<usize> = order.iter().copied().filter(|&i| i < pages.len()).collect();
    debug!(requested = order.len(), kept = indices.len(), "Reordering pages");

    let mut placed: HashSet<ObjectId> = HashSet::new();
    let mut kids = Vec::with_capacity(indices.len());
    for (n, &index) in indices.iter().enumerate() {
        let page = pages[index];
        // A page object can only have one parent slot; repeats get their own.
        let kid = if placed.insert(page) {
            page
        } else {
            pdf::duplicate_page(&mut doc, page)?
        };
        kids.push(kid);
        ctx.unit_done(n + 1, indices.len()).await?;
    }

    rebuild(&mut doc, &kids)?;
    finish_pdf(doc, ctx).await
}

fn ascending_unique(selected: &[usize], page_count: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = selected
        .iter()
        .copied()
        .filter(|&i| i < page_count)
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

fn rebuild(doc: &mut lopdf::Document, kids: &[ObjectId]) -> Result<(), StepError> {
    pdf::fresh_catalog(doc)?;
    pdf::set_page_tree(doc, kids)?;
    doc.prune_objects();
    Ok(())
}
