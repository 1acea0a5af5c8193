//! Additive page rotation.

use super::{finish_pdf, open_pdf, pdf, StepContext};
use crate::config::{PageSelection, Rotation};
use crate::document::{Document, OutputDocument};
use crate::error::StepError;
use tracing::debug;

/// Turn the selected pages clockwise by `angle` on top of their current
/// `/Rotate`, inherited values included.
pub async fn rotate(
    input: &Document,
    angle: Rotation,
    selection: &PageSelection,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let mut doc = open_pdf(input, ctx).await?;

    ctx.enter("transform")?;
    let pages = pdf::page_ids(&doc);
    let targets = selection.to_indices(pages.len());
    debug!(
        degrees = angle.degrees(),
        pages = targets.len(),
        "Rotating pages"
    );

    for (n, &index) in targets.iter().enumerate() {
        let page = pages[index];
        let next = added_rotation(pdf::rotation(&doc, page), angle);
        doc.get_dictionary_mut(page)?.set("Rotate", next);
        ctx.unit_done(n + 1, targets.len()).await?;
    }

    finish_pdf(doc, ctx).await
}

/// `current + angle`, normalised into `0..360`.
fn added_rotation(current: i64, angle: Rotation) -> i64 {
    (current + angle.degrees()).rem_euclid(360)
}

#[cfg(test)]
mod tests {
    use super::super::pdf::fixtures::{nested_pdf, sample_pdf};
    use super::*;
    use crate::config::{Job, PipelineConfig};
    use crate::document::MediaKind;
    use crate::engine::run;
    use lopdf::Object;

    fn rotations(bytes: &[u8]) -> Vec<i64> {
        let doc = lopdf::Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| pdf::rotation(&doc, id))
            .collect()
    }

    #[test]
    fn rotation_wraps_around() {
        assert_eq!(added_rotation(0, Rotation::Deg90), 90);
        assert_eq!(added_rotation(270, Rotation::Deg180), 90);
        assert_eq!(added_rotation(-90, Rotation::Deg90), 0);
        assert_eq!(added_rotation(450, Rotation::Deg270), 0);
    }

    #[tokio::test]
    async fn rotates_only_selected_pages() {
        let input = Document::new(sample_pdf(3), MediaKind::Pdf);
        let job = Job::Rotate {
            angle: Rotation::Deg90,
            pages: PageSelection::Single(2),
        };
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(rotations(&out.bytes), vec![0, 90, 0]);
    }

    #[tokio::test]
    async fn adds_to_inherited_rotation() {
        let mut doc = nested_pdf();
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let job = Job::Rotate {
            angle: Rotation::Deg270,
            pages: PageSelection::All,
        };
        let input = Document::new(bytes, MediaKind::Pdf);
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(rotations(&out.bytes), vec![0, 0]);
    }

    #[tokio::test]
    async fn adds_to_real_valued_rotation() {
        let mut doc = lopdf::Document::load_mem(&sample_pdf(1)).unwrap();
        let page = pdf::page_ids(&doc)[0];
        doc.get_dictionary_mut(page)
            .unwrap()
            .set("Rotate", Object::Real(90.0));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let job = Job::Rotate {
            angle: Rotation::Deg90,
            pages: PageSelection::All,
        };
        let input = Document::new(bytes, MediaKind::Pdf);
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(rotations(&out.bytes), vec![180]);
    }
}
