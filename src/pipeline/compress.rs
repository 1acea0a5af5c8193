//! PDF size reduction.
//!
//! Structural clean-up (empty streams, unreachable objects, dense object
//! numbers) followed by a re-encode of embedded baseline JPEG images at the
//! requested quality. Flate compression of the remaining streams happens
//! when the document is serialised.

use super::{blocking, finish_pdf, open_pdf, StepContext};
use crate::config::jpeg_quality;
use crate::document::{Document, OutputDocument};
use crate::error::StepError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use lopdf::{Dictionary, Object, ObjectId};
use tracing::debug;

pub async fn compress_pdf(
    input: &Document,
    quality: f32,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    let mut doc = open_pdf(input, ctx).await?;

    ctx.enter("transform")?;
    let emptied = doc.delete_zero_length_streams().len();
    let pruned = doc.prune_objects().len();
    doc.renumber_objects();

    let images: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(id, obj)| {
            let stream = obj.as_stream().ok()?;
            is_reencodable(&stream.dict).then_some(*id)
        })
        .collect();
    debug!(emptied, pruned, images = images.len(), "Restructured PDF");

    let quality = jpeg_quality(quality);
    let mut replaced = 0usize;
    for (n, &id) in images.iter().enumerate() {
        let (data, gray) = match doc.get_object(id).and_then(Object::as_stream) {
            Ok(stream) => (stream.content.clone(), is_gray(&stream.dict)),
            Err(_) => continue,
        };
        let original = data.len();

        match blocking(move || reencode(&data, gray, quality)).await {
            Ok(smaller) if smaller.len() < original => {
                if let Ok(Object::Stream(stream)) = doc.get_object_mut(id) {
                    stream.set_content(smaller);
                    replaced += 1;
                }
            }
            Ok(_) => {}
            Err(e) => debug!(object = ?id, error = %e, "Keeping embedded image as is"),
        }
        ctx.unit_done(n + 1, images.len()).await?;
    }
    debug!(replaced, "Re-encoded embedded images");

    finish_pdf(doc, ctx).await
}

/// 8-bit DCT image XObjects in a colour space the JPEG encoder can write.
fn is_reencodable(dict: &Dictionary) -> bool {
    let is_image = dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .is_ok_and(|n| n == b"Image");
    let is_dct = match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && filters[0].as_name().is_ok_and(|n| n == b"DCTDecode")
        }
        _ => false,
    };
    let bits_ok = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .map_or(true, |bits| bits == 8);
    let color_ok = dict
        .get(b"ColorSpace")
        .and_then(Object::as_name)
        .is_ok_and(|n| n == b"DeviceRGB" || n == b"DeviceGray");

    is_image && is_dct && bits_ok && color_ok && !dict.has(b"DecodeParms")
}

fn is_gray(dict: &Dictionary) -> bool {
    dict.get(b"ColorSpace")
        .and_then(Object::as_name)
        .is_ok_and(|n| n == b"DeviceGray")
}

fn reencode(data: &[u8], gray: bool, quality: u8) -> Result<Vec<u8>, StepError> {
    let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    let normalized = if gray {
        DynamicImage::ImageLuma8(decoded.to_luma8())
    } else {
        DynamicImage::ImageRgb8(decoded.to_rgb8())
    };
    let mut out = Vec::new();
    normalized.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out)
}
