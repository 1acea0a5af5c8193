//! Raster image stages: compression, format conversion and images → PDF.

use super::{blocking, finish_pdf, StepContext};
use crate::config::{jpeg_quality, ImageCompressOptions, ImageConvertOptions, ImageTarget};
use crate::document::{Document, MediaKind, OutputDocument};
use crate::error::{ErrorCode, PipelineError, StepError};
use crate::progress::{SERIALIZE_PERCENT, SETUP_PERCENT};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use lopdf::{dictionary, Object, Stream};
use std::io::Cursor;
use tracing::debug;

/// Re-encode an image to make it smaller.
///
/// PNG stays PNG at maximum deflate effort; every other format becomes JPEG
/// at the requested quality. When nothing is gained the input comes back
/// untouched, with its own media type.
pub async fn compress(
    input: &Document,
    options: &ImageCompressOptions,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    ctx.enter("parse")?;
    ctx.progress.report(SETUP_PERCENT);
    let source_kind = effective_kind(input);
    let image = decode(input).await?;

    ctx.enter("transform")?;
    let max_dimension = options.max_dimension.map(|d| d.max(1));
    let quality = jpeg_quality(options.quality);
    let (bytes, kind) = blocking(move || {
        let image = match max_dimension {
            Some(max) if image.width() > max || image.height() > max => {
                image.resize(max, max, FilterType::Lanczos3)
            }
            _ => image,
        };
        let mut out = Vec::new();
        if source_kind == MediaKind::Png {
            let encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive);
            image.write_with_encoder(encoder)?;
            Ok((out, MediaKind::Png))
        } else {
            write_jpeg(&image, &mut out, quality)?;
            Ok((out, MediaKind::Jpeg))
        }
    })
    .await?;
    ctx.unit_done(1, 1).await?;

    ctx.enter("serialize")?;
    ctx.progress.report(SERIALIZE_PERCENT);
    if bytes.len() >= input.len() {
        debug!(
            input_bytes = input.len(),
            encoded_bytes = bytes.len(),
            "Re-encoding did not help, keeping the original"
        );
        return Ok(OutputDocument::new(input.bytes().to_vec(), source_kind));
    }
    Ok(OutputDocument::new(bytes, kind))
}

/// Decode an image and write it out in another format.
pub async fn convert(
    input: &Document,
    options: &ImageConvertOptions,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    ctx.enter("parse")?;
    ctx.progress.report(SETUP_PERCENT);
    let image = decode(input).await?;

    ctx.enter("transform")?;
    let target = options.target;
    let quality = jpeg_quality(options.quality);
    debug!(from = %effective_kind(input), to = %target.media_kind(), "Converting image");
    let bytes = blocking(move || encode(&image, target, quality)).await?;
    ctx.unit_done(1, 1).await?;

    ctx.enter("serialize")?;
    ctx.progress.report(SERIALIZE_PERCENT);
    Ok(OutputDocument::new(bytes, target.media_kind()))
}

/// One page per image, each page the size of its image in points.
pub async fn images_to_pdf(
    inputs: &[Document],
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    ctx.enter("parse")?;
    ctx.progress.report(SETUP_PERCENT);

    let mut doc = lopdf::Document::with_version(ctx.config().pdf_version.as_str());
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(inputs.len());
    let total = inputs.len();

    for (i, input) in inputs.iter().enumerate() {
        ctx.checkpoint()?;
        let bytes = input.shared_bytes();
        let kind = input.kind();
        let decoded = blocking(move || {
            let rgb = decode_with_fallback(&bytes, kind)?.to_rgb8();
            Ok(rgb)
        })
        .await
        .map_err(|e| {
            debug!(image = i + 1, name = ?input.name(), error = %e, "Could not decode image");
            PipelineError::at_item(
                ErrorCode::FailedToProcessImage,
                i + 1,
                format!("Image {} could not be decoded", i + 1),
            )
        })?;

        ctx.enter("transform")?;
        let (width, height) = decoded.dimensions();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            decoded.into_raw(),
        ));
        let draw = format!("q {width} 0 0 {height} 0 0 cm /Im0 Do Q");
        let content_id = doc.add_object(Stream::new(dictionary! {}, draw.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
        debug!(image = i + 1, width, height, "Added image page");
        ctx.unit_done(i + 1, total).await?;
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog);

    finish_pdf(doc, ctx).await
}

// ── Codecs ───────────────────────────────────────────────────────────────

/// Declared kind, or the sniffed one when nothing useful was declared.
fn effective_kind(input: &Document) -> MediaKind {
    match input.kind() {
        MediaKind::Unknown | MediaKind::Pdf => MediaKind::sniff(input.bytes()),
        kind => kind,
    }
}

fn image_format(kind: MediaKind) -> Option<ImageFormat> {
    match kind {
        MediaKind::Png => Some(ImageFormat::Png),
        MediaKind::Jpeg => Some(ImageFormat::Jpeg),
        MediaKind::Webp => Some(ImageFormat::WebP),
        MediaKind::Gif => Some(ImageFormat::Gif),
        MediaKind::Bmp => Some(ImageFormat::Bmp),
        _ => None,
    }
}

/// Decode by the effective kind, falling back to the decoder's own detection.
async fn decode(input: &Document) -> Result<DynamicImage, StepError> {
    let kind = effective_kind(input);
    if kind == MediaKind::Heic {
        return Err(StepError::Malformed("no HEIC decoder available".into()));
    }
    let bytes = input.shared_bytes();
    blocking(move || {
        let format = match image_format(kind) {
            Some(format) => format,
            None => image::guess_format(&bytes)?,
        };
        Ok(image::load_from_memory_with_format(&bytes, format)?)
    })
    .await
}

/// Declared PNG and JPEG use their own decoder; anything else tries PNG,
/// then JPEG. The content is never inspected to pick a decoder.
fn decode_with_fallback(bytes: &[u8], kind: MediaKind) -> Result<DynamicImage, StepError> {
    match kind {
        MediaKind::Png => Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?),
        MediaKind::Jpeg => Ok(image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?),
        _ => image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .or_else(|_| image::load_from_memory_with_format(bytes, ImageFormat::Jpeg))
            .map_err(StepError::from),
    }
}

fn write_jpeg(image: &DynamicImage, out: &mut Vec<u8>, quality: u8) -> Result<(), StepError> {
    // The JPEG encoder has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(out, quality))?;
    Ok(())
}

fn encode(image: &DynamicImage, target: ImageTarget, quality: u8) -> Result<Vec<u8>, StepError> {
    let mut out = Vec::new();
    match target {
        ImageTarget::Jpeg => write_jpeg(image, &mut out, quality)?,
        ImageTarget::Png => image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        ImageTarget::Webp => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_with_encoder(WebPEncoder::new_lossless(&mut out))?,
        ImageTarget::Gif => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Gif)?,
        ImageTarget::Bmp => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Bmp)?,
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Job, PipelineConfig};
    use crate::engine::run;
    use image::{GenericImageView, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
        }))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        gradient(width, height)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
        let mut out = Vec::new();
        write_jpeg(&gradient(width, height), &mut out, quality).unwrap();
        out
    }

    #[test]
    fn fallback_tries_png_then_jpeg() {
        let img = decode_with_fallback(&jpeg(8, 4, 90), MediaKind::Unknown).unwrap();
        assert_eq!(img.dimensions(), (8, 4));
        let img = decode_with_fallback(&png(3, 5), MediaKind::Webp).unwrap();
        assert_eq!(img.dimensions(), (3, 5));
    }

    #[test]
    fn declared_kind_is_trusted() {
        assert!(decode_with_fallback(&png(3, 3), MediaKind::Jpeg).is_err());
    }

    #[tokio::test]
    async fn convert_png_to_jpeg() {
        let input = Document::new(png(16, 16), MediaKind::Png);
        let job = Job::ConvertImage(ImageConvertOptions {
            target: ImageTarget::Jpeg,
            quality: 0.9,
        });
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(out.kind, MediaKind::Jpeg);
        assert_eq!(MediaKind::sniff(&out.bytes), MediaKind::Jpeg);
    }

    #[tokio::test]
    async fn convert_sniffs_undeclared_input() {
        let input = Document::new(jpeg(10, 10, 80), MediaKind::Unknown);
        let job = Job::ConvertImage(ImageConvertOptions {
            target: ImageTarget::Webp,
            quality: 0.9,
        });
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(MediaKind::sniff(&out.bytes), MediaKind::Webp);
    }

    #[tokio::test]
    async fn heic_cannot_be_converted() {
        let input = Document::new(vec![0u8; 64], MediaKind::Heic);
        let job = Job::ConvertImage(ImageConvertOptions::default());
        let err = run(&job, &[input], &PipelineConfig::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConversionFailed);
    }

    #[tokio::test]
    async fn compress_downscales_to_max_dimension() {
        let input = Document::new(png(400, 200), MediaKind::Png);
        let job = Job::CompressImage(ImageCompressOptions {
            quality: 0.8,
            max_dimension: Some(100),
        });
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(out.kind, MediaKind::Png);
        let img = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
    }

    #[tokio::test]
    async fn compress_keeps_original_when_nothing_is_gained() {
        let original = jpeg(64, 64, 10);
        let input = Document::new(original.clone(), MediaKind::Jpeg);
        let job = Job::CompressImage(ImageCompressOptions {
            quality: 1.0,
            max_dimension: None,
        });
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        assert_eq!(out.bytes, original);
        assert_eq!(out.kind, MediaKind::Jpeg);
    }

    #[tokio::test]
    async fn images_become_pages_of_matching_size() {
        let inputs = [
            Document::new(png(30, 20), MediaKind::Png),
            Document::new(jpeg(50, 40, 85), MediaKind::Unknown),
        ];
        let out = run(&Job::ImagesToPdf, &inputs, &PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(out.kind, MediaKind::Pdf);

        let doc = lopdf::Document::load_mem(&out.bytes).unwrap();
        let boxes: Vec<[f32; 4]> = doc
            .get_pages()
            .values()
            .map(|&id| super::super::pdf::media_box(&doc, id))
            .collect();
        assert_eq!(boxes, vec![[0.0, 0.0, 30.0, 20.0], [0.0, 0.0, 50.0, 40.0]]);
    }

    #[tokio::test]
    async fn undecodable_image_is_reported_by_position() {
        let inputs = [Document::new(b"not an image".to_vec(), MediaKind::Unknown)];
        let err = run(&Job::ImagesToPdf, &inputs, &PipelineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedToProcessImage);
        assert_eq!(err.index, Some(1));
    }
}
