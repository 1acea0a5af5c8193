//! Integration tests for the document pipeline.
//!
//! Fixture PDFs are built with lopdf and fixture images with the `image`
//! crate, inside the tests; nothing is read from disk. Page `i` of a fixture
//! PDF is `600 + i` points wide so pages can be identified after they have
//! been moved, copied or removed.

use edgequake_doctools::{
    progress_channel, run, run_sync, run_to_file, CompletionHook, Document, ErrorCode,
    ImageCompressOptions, ImageConvertOptions, Job, MediaKind, NumberFormat, PageNumberOptions,
    PageSelection, PipelineConfig, ProgressCallback, ProgressEvent, Rotation, RunRecord,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Object, Stream};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn pdf(pages: usize) -> Document {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for i in 0..pages {
        let content = format!("BT /F1 18 Tf 72 700 Td (Fixture page {}) Tj ET", i + 1);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Integer(600 + i as i64), 792.into()],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    Document::new(buf, MediaKind::Pdf).with_name(format!("{pages}-pages.pdf"))
}

fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 5 % 256) as u8, (y * 3 % 256) as u8, 128])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), format)
        .unwrap();
    out
}

fn parse(bytes: &[u8]) -> lopdf::Document {
    lopdf::Document::load_mem(bytes).unwrap()
}

/// Width of every page, in page order; identifies fixture pages.
fn page_widths(bytes: &[u8]) -> Vec<i64> {
    let doc = parse(bytes);
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            media_box[2].as_i64().unwrap()
        })
        .collect()
}

fn page_rotations(bytes: &[u8]) -> Vec<i64> {
    let doc = parse(bytes);
    doc.get_pages()
        .values()
        .map(|&id| {
            doc.get_dictionary(id)
                .unwrap()
                .get(b"Rotate")
                .and_then(Object::as_i64)
                .unwrap_or(0)
        })
        .collect()
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb: ProgressCallback = Arc::new(move |e: &ProgressEvent| {
        sink.lock().unwrap().push(*e);
    });
    (cb, seen)
}

fn recording_config() -> (PipelineConfig, Arc<Mutex<Vec<ProgressEvent>>>) {
    let (cb, seen) = recorder();
    let config = PipelineConfig::builder().progress(cb).build().unwrap();
    (config, seen)
}

fn all_jobs() -> Vec<Job> {
    vec![
        Job::Merge,
        Job::ExtractPages { pages: vec![0] },
        Job::DeletePages { pages: vec![0] },
        Job::ReorderPages { order: vec![0] },
        Job::Rotate {
            angle: Rotation::Deg90,
            pages: PageSelection::All,
        },
        Job::CompressPdf { quality: 0.8 },
        Job::CompressImage(ImageCompressOptions::default()),
        Job::AddPageNumbers(PageNumberOptions::default()),
        Job::ConvertImage(ImageConvertOptions::default()),
        Job::ImagesToPdf,
        Job::Protect {
            password: "pw".into(),
            owner_password: None,
        },
        Job::Unlock {
            password: "pw".into(),
        },
    ]
}

// ── Preconditions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_input_fails_before_any_progress() {
    for job in all_jobs() {
        let (config, seen) = recording_config();
        let err = run(&job, &[], &config).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoInputProvided, "{:?}", job.operation());
        assert_eq!(err.index, None);
        assert!(seen.lock().unwrap().is_empty(), "{:?}", job.operation());
    }
}

// ── Merge ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_single_input_is_byte_identical() {
    let input = pdf(3);
    let out = run(&Job::Merge, &[input.clone()], &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(out.bytes, input.bytes());
    assert_eq!(out.mime_type(), "application/pdf");
}

#[tokio::test]
async fn merge_concatenates_in_order() {
    let out = run(&Job::Merge, &[pdf(1), pdf(3), pdf(2)], &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(page_widths(&out.bytes), vec![600, 600, 601, 602, 600, 601]);
}

#[tokio::test]
async fn merge_reports_failing_file_one_based() {
    let broken = Document::new(b"not a pdf at all".to_vec(), MediaKind::Pdf);
    let err = run(&Job::Merge, &[pdf(1), broken, pdf(1)], &PipelineConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedToProcessFile);
    assert_eq!(err.index, Some(2));
}

// ── Page operations ──────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_even_indices_keeps_odd_pages_in_order() {
    let job = Job::DeletePages {
        pages: vec![0, 2, 4],
    };
    let out = run(&job, &[pdf(5)], &PipelineConfig::default()).await.unwrap();
    assert_eq!(page_widths(&out.bytes), vec![601, 603]);
}

#[tokio::test]
async fn extract_drops_out_of_range_index() {
    let job = Job::ExtractPages {
        pages: vec![99, 1],
    };
    let out = run(&job, &[pdf(3)], &PipelineConfig::default()).await.unwrap();
    assert_eq!(page_widths(&out.bytes), vec![601]);
}

#[tokio::test]
async fn reorder_keeps_caller_order() {
    let job = Job::ReorderPages {
        order: vec![2, 1, 0, 0],
    };
    let out = run(&job, &[pdf(3)], &PipelineConfig::default()).await.unwrap();
    assert_eq!(page_widths(&out.bytes), vec![602, 601, 600, 600]);
}

#[tokio::test]
async fn rotate_twice_is_additive() {
    let job = Job::Rotate {
        angle: Rotation::Deg90,
        pages: PageSelection::Single(1),
    };
    let config = PipelineConfig::default();
    let once = run(&job, &[pdf(2)], &config).await.unwrap();
    let twice = run(&job, &[Document::new(once.bytes, MediaKind::Pdf)], &config)
        .await
        .unwrap();
    assert_eq!(page_rotations(&twice.bytes), vec![180, 0]);
}

// ── Page numbering ───────────────────────────────────────────────────────────

#[tokio::test]
async fn numbering_of_total_counts_from_start() {
    let options = PageNumberOptions {
        format: NumberFormat::OfTotal,
        start_from: 5,
        ..PageNumberOptions::default()
    };
    let config = PipelineConfig::builder()
        .compress_streams(false)
        .build()
        .unwrap();
    let out = run(&Job::AddPageNumbers(options), &[pdf(3)], &config)
        .await
        .unwrap();

    let doc = parse(&out.bytes);
    let labels: Vec<String> = doc
        .get_pages()
        .values()
        .map(|&id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
        .collect();
    assert!(labels[0].contains("(5 / 7) Tj"));
    assert!(labels[1].contains("(6 / 7) Tj"));
    assert!(labels[2].contains("(7 / 7) Tj"));
    assert!(labels[0].contains("(Fixture page 1) Tj"));
}

// ── Passwords ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn protect_then_unlock_keeps_every_page() {
    let protect = Job::Protect {
        password: "s3cret".into(),
        owner_password: None,
    };
    let (config, seen) = recording_config();
    let locked = run(&protect, &[pdf(3)], &config).await.unwrap();
    assert_eq!(locked.mime_type(), "application/pdf");
    assert!(parse(&locked.bytes).is_encrypted());
    assert_eq!(seen.lock().unwrap().last().map(|e| e.percentage), Some(100));

    let unlock = Job::Unlock {
        password: "s3cret".into(),
    };
    let locked = Document::new(locked.bytes, MediaKind::Pdf);
    let out = run(&unlock, &[locked], &PipelineConfig::default()).await.unwrap();
    assert!(!parse(&out.bytes).is_encrypted());
    assert_eq!(page_widths(&out.bytes), vec![600, 601, 602]);
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn images_to_pdf_falls_back_from_png_to_jpeg() {
    let inputs = [
        Document::new(image_bytes(40, 30, ImageFormat::Png), MediaKind::Png),
        Document::new(image_bytes(20, 10, ImageFormat::Jpeg), MediaKind::Unknown),
    ];
    let out = run(&Job::ImagesToPdf, &inputs, &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(page_widths(&out.bytes), vec![40, 20]);
}

#[tokio::test]
async fn images_to_pdf_reports_undecodable_image() {
    let inputs = [
        Document::new(image_bytes(4, 4, ImageFormat::Png), MediaKind::Png),
        Document::new(image_bytes(4, 4, ImageFormat::Png), MediaKind::Png),
        Document::new(b"GIF89a?".to_vec(), MediaKind::Gif),
    ];
    let err = run(&Job::ImagesToPdf, &inputs, &PipelineConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedToProcessImage);
    assert_eq!(err.index, Some(3));
}

#[tokio::test]
async fn convert_png_to_bmp() {
    let input = Document::new(image_bytes(8, 8, ImageFormat::Png), MediaKind::Png);
    let job = Job::ConvertImage(ImageConvertOptions {
        target: edgequake_doctools::ImageTarget::Bmp,
        quality: 0.9,
    });
    let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
    assert_eq!(out.mime_type(), "image/bmp");
    assert_eq!(MediaKind::sniff(&out.bytes), MediaKind::Bmp);
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    let cases: Vec<(Job, Vec<Document>)> = vec![
        (Job::Merge, vec![pdf(2), pdf(2), pdf(1)]),
        (Job::DeletePages { pages: vec![1, 3] }, vec![pdf(4)]),
        (
            Job::Rotate {
                angle: Rotation::Deg270,
                pages: PageSelection::All,
            },
            vec![pdf(3)],
        ),
        (Job::CompressPdf { quality: 0.5 }, vec![pdf(2)]),
        (
            Job::ConvertImage(ImageConvertOptions::default()),
            vec![Document::new(
                image_bytes(5, 5, ImageFormat::Jpeg),
                MediaKind::Jpeg,
            )],
        ),
    ];

    for (job, inputs) in cases {
        let (config, seen) = recording_config();
        run(&job, &inputs, &config).await.unwrap();
        let pct: Vec<u8> = seen.lock().unwrap().iter().map(|e| e.percentage).collect();
        assert!(!pct.is_empty(), "{:?}", job.operation());
        assert!(pct.windows(2).all(|w| w[0] <= w[1]), "{:?}: {pct:?}", job.operation());
        assert_eq!(pct.last(), Some(&100), "{:?}", job.operation());
        assert_eq!(pct[0], 10, "{:?}", job.operation());
    }
}

#[tokio::test]
async fn progress_channel_streams_every_event() {
    let (observer, stream) = progress_channel();
    let config = PipelineConfig::builder().progress(observer).build().unwrap();
    run(&Job::Merge, &[pdf(1), pdf(1)], &config).await.unwrap();
    drop(config);

    let events: Vec<ProgressEvent> = stream.collect().await;
    let units: Vec<(Option<usize>, Option<usize>)> = events
        .iter()
        .filter(|e| e.current.is_some())
        .map(|e| (e.current, e.total))
        .collect();
    assert_eq!(units, vec![(Some(1), Some(2)), (Some(2), Some(2))]);
    assert_eq!(events.last().map(|e| e.percentage), Some(100));
}

// ── Classification ───────────────────────────────────────────────────────────

#[tokio::test]
async fn low_level_failures_surface_as_operation_codes() {
    let garbage = Document::new(b"this is not a document".to_vec(), MediaKind::Unknown);
    let expected = [
        (Job::ExtractPages { pages: vec![0] }, ErrorCode::PageExtractionFailed),
        (Job::DeletePages { pages: vec![0] }, ErrorCode::PageDeletionFailed),
        (Job::ReorderPages { order: vec![0] }, ErrorCode::PageReorderingFailed),
        (
            Job::Rotate {
                angle: Rotation::Deg180,
                pages: PageSelection::All,
            },
            ErrorCode::RotationFailed,
        ),
        (Job::CompressPdf { quality: 0.8 }, ErrorCode::CompressionFailed),
        (
            Job::CompressImage(ImageCompressOptions::default()),
            ErrorCode::CompressionFailed,
        ),
        (
            Job::AddPageNumbers(PageNumberOptions::default()),
            ErrorCode::PageNumberingFailed,
        ),
        (
            Job::ConvertImage(ImageConvertOptions::default()),
            ErrorCode::ConversionFailed,
        ),
        (
            Job::Protect {
                password: "pw".into(),
                owner_password: None,
            },
            ErrorCode::ProtectionFailed,
        ),
        (
            Job::Unlock {
                password: "pw".into(),
            },
            ErrorCode::UnlockFailed,
        ),
    ];

    for (job, code) in expected {
        let (config, seen) = recording_config();
        let err = run(&job, &[garbage.clone()], &config).await.unwrap_err();
        assert_eq!(err.code, code, "{:?}", job.operation());
        assert_eq!(err.index, None);
        assert!(seen.lock().unwrap().iter().all(|e| e.percentage < 100));
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_run_fails_without_finishing() {
    let token = CancellationToken::new();
    token.cancel();
    let (cb, seen) = recorder();
    let config = PipelineConfig::builder()
        .progress(cb)
        .cancel_token(token)
        .build()
        .unwrap();

    let err = run(&Job::Merge, &[pdf(1), pdf(1)], &config)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);
    assert!(seen.lock().unwrap().iter().all(|e| e.percentage < 100));
}

#[tokio::test]
async fn cancelling_midway_stops_between_units() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let cb: ProgressCallback = Arc::new(move |e: &ProgressEvent| {
        if e.current == Some(1) {
            trigger.cancel();
        }
    });
    let config = PipelineConfig::builder()
        .progress(cb)
        .cancel_token(token)
        .build()
        .unwrap();

    let job = Job::Rotate {
        angle: Rotation::Deg90,
        pages: PageSelection::All,
    };
    let err = run(&job, &[pdf(4)], &config).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);
}

// ── Completion hook ──────────────────────────────────────────────────────────

#[derive(Default)]
struct HookState {
    calls: AtomicUsize,
    last: Mutex<Option<RunRecord>>,
    done: Notify,
}

#[derive(Clone, Default)]
struct CountingHook(Arc<HookState>);

impl CompletionHook for CountingHook {
    fn on_complete(&self, record: RunRecord) -> BoxFuture<'static, ()> {
        let state = Arc::clone(&self.0);
        Box::pin(async move {
            state.calls.fetch_add(1, Ordering::SeqCst);
            *state.last.lock().unwrap() = Some(record);
            state.done.notify_one();
        })
    }
}

#[tokio::test]
async fn hook_fires_once_after_success() {
    let hook = CountingHook::default();
    let config = PipelineConfig::builder()
        .completion_hook(Arc::new(hook.clone()))
        .build()
        .unwrap();

    let out = run(&Job::Merge, &[pdf(1), pdf(2)], &config).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), hook.0.done.notified())
        .await
        .unwrap();

    assert_eq!(hook.0.calls.load(Ordering::SeqCst), 1);
    let record = hook.0.last.lock().unwrap().clone().unwrap();
    assert_eq!(record.operation, edgequake_doctools::Operation::Merge);
    assert_eq!(record.inputs, 2);
    assert_eq!(record.output_bytes, out.len());
    assert_eq!(record.output_type, MediaKind::Pdf);
}

#[tokio::test]
async fn hook_is_not_called_on_failure() {
    let hook = CountingHook::default();
    let config = PipelineConfig::builder()
        .completion_hook(Arc::new(hook.clone()))
        .build()
        .unwrap();

    let garbage = Document::new(b"nope".to_vec(), MediaKind::Pdf);
    run(&Job::CompressPdf { quality: 0.5 }, &[garbage], &config)
        .await
        .unwrap_err();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hook.0.calls.load(Ordering::SeqCst), 0);
}

// ── Entry points ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_to_file_writes_only_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("extracted.pdf");
    let job = Job::ExtractPages { pages: vec![1] };

    let out = run_to_file(&job, &[pdf(2)], &path, &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), out.bytes);
    assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
}

#[tokio::test]
async fn run_to_file_leaves_nothing_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.pdf");
    let garbage = Document::new(b"nope".to_vec(), MediaKind::Pdf);

    let err = run_to_file(
        &Job::DeletePages { pages: vec![0] },
        &[garbage],
        &path,
        &PipelineConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("PAGE_DELETION_FAILED"));
    assert!(!path.exists());
}

#[test]
fn run_sync_outside_a_runtime() {
    let out = run_sync(
        &Job::ExtractPages { pages: vec![0] },
        &[pdf(2)],
        &PipelineConfig::default(),
    )
    .unwrap();
    assert_eq!(page_widths(&out.bytes), vec![600]);
}
