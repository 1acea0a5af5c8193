//! Password protection: encrypt a PDF, or remove its encryption.
//!
//! Protection uses the standard security handler, revision 6: AES-256 crypt
//! filters for streams and strings, with a random file key. Either the user
//! or the owner password unlocks the result.
//!
//! lopdf only decrypts on load when the user password is empty. To unlock a
//! file that needs a password, the `/Encrypt` references are blanked out of
//! the raw bytes (same length, so xref offsets stay valid), the file is
//! parsed as if it were plain, and the encryption dictionary is reattached
//! before decrypting with the caller's password.

use super::{blocking, finish_pdf, open_pdf, pdf, StepContext};
use crate::document::{Document, MediaKind, OutputDocument};
use crate::error::{ErrorCode, PipelineError, StepError};
use crate::progress::{SERIALIZE_PERCENT, SETUP_PERCENT};
use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::{EncryptionState, EncryptionVersion, Object, ObjectId, Permissions, StringFormat};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const CRYPT_FILTER: &[u8] = b"StdCF";

pub async fn protect(
    input: &Document,
    password: &str,
    owner_password: Option<&str>,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    if password.is_empty() {
        return Err(PipelineError::new(
            ErrorCode::ProtectionFailed,
            "A password is required to protect a document",
        )
        .into());
    }
    let user = password.to_string();
    let owner = owner_password
        .filter(|p| !p.is_empty())
        .unwrap_or(password)
        .to_string();

    let mut doc = open_pdf(input, ctx).await?;
    if doc.is_encrypted() {
        return Err(PipelineError::new(
            ErrorCode::ProtectionFailed,
            "The document is already password protected",
        )
        .into());
    }

    ctx.enter("transform")?;
    // Streams must be compressed before encryption; nothing may touch them after.
    let compress = ctx.config().compress_streams;
    let doc = blocking(move || {
        if compress {
            doc.compress();
        }
        let mut rng = rand::thread_rng();
        if doc.trailer.get(b"ID").is_err() {
            let mut id = vec![0u8; 16];
            rng.fill(&mut id[..]);
            let id = Object::String(id, StringFormat::Hexadecimal);
            doc.trailer.set("ID", vec![id.clone(), id]);
        }
        let mut file_key = [0u8; 32];
        rng.fill(&mut file_key[..]);

        let crypt_filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
        let state = EncryptionState::try_from(EncryptionVersion::V5 {
            encrypt_metadata: true,
            file_encryption_key: &file_key,
            crypt_filters: BTreeMap::from([(CRYPT_FILTER.to_vec(), crypt_filter)]),
            stream_filter: CRYPT_FILTER.to_vec(),
            string_filter: CRYPT_FILTER.to_vec(),
            owner_password: &owner,
            user_password: &user,
            permissions: Permissions::default(),
        })?;
        doc.encrypt(&state)?;
        Ok(doc)
    })
    .await?;
    debug!(pages = doc.get_pages().len(), "Encrypted document");
    ctx.unit_done(1, 1).await?;

    ctx.enter("serialize")?;
    ctx.progress.report(SERIALIZE_PERCENT);
    let bytes = pdf::save(doc, false).await?;
    Ok(OutputDocument::new(bytes, MediaKind::Pdf))
}

pub async fn unlock(
    input: &Document,
    password: &str,
    ctx: &mut StepContext<'_>,
) -> Result<OutputDocument, StepError> {
    ctx.enter("parse")?;
    ctx.progress.report(SETUP_PERCENT);
    let bytes = input.shared_bytes();
    let (mut doc, encrypt_id) = blocking(move || {
        let mut bytes = bytes.to_vec();
        let Some(encrypt_id) = strip_encrypt_refs(&mut bytes) else {
            return Ok((lopdf::Document::load_mem(&bytes)?, None));
        };
        let mut doc = lopdf::Document::load_mem(&bytes)?;
        doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
        Ok((doc, Some(encrypt_id)))
    })
    .await?;

    if encrypt_id.is_none() || !doc.is_encrypted() {
        return Err(PipelineError::new(
            ErrorCode::UnlockFailed,
            "The document is not password protected",
        )
        .into());
    }

    ctx.enter("transform")?;
    if doc.authenticate_password(password).is_err() {
        debug!("Password rejected");
        return Err(PipelineError::new(ErrorCode::UnlockFailed, "The password is incorrect").into());
    }
    let password = password.to_string();
    let doc = blocking(move || {
        doc.decrypt(&password)?;
        doc.encryption_state = None;
        Ok(doc)
    })
    .await?;
    debug!(pages = doc.get_pages().len(), "Decrypted document");
    ctx.unit_done(1, 1).await?;

    finish_pdf(doc, ctx).await
}

/// Blank every `/Encrypt n g R` entry in place and return the last
/// referenced id, which belongs to the newest trailer.
fn strip_encrypt_refs(bytes: &mut [u8]) -> Option<ObjectId> {
    const KEY: &[u8] = b"/Encrypt";
    let mut found = None;
    let mut at = 0;
    while let Some(offset) = find(&bytes[at..], KEY) {
        let start = at + offset;
        let after_key = start + KEY.len();
        match parse_reference(&bytes[after_key..]) {
            Some((id, len)) => {
                bytes[start..after_key + len].fill(b' ');
                found = Some(id);
                at = after_key + len;
            }
            None => at = after_key,
        }
    }
    found
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse `<ws> number <ws> generation <ws> R`, returning the id and the
/// number of bytes consumed.
fn parse_reference(bytes: &[u8]) -> Option<(ObjectId, usize)> {
    let mut pos = 0;
    let skip_ws = |pos: &mut usize| {
        while bytes.get(*pos).is_some_and(u8::is_ascii_whitespace) {
            *pos += 1;
        }
    };
    let digits = |pos: &mut usize| -> Option<u32> {
        let start = *pos;
        while bytes.get(*pos).is_some_and(u8::is_ascii_digit) {
            *pos += 1;
        }
        std::str::from_utf8(&bytes[start..*pos]).ok()?.parse().ok()
    };

    skip_ws(&mut pos);
    if pos == 0 {
        return None;
    }
    let number = digits(&mut pos)?;
    skip_ws(&mut pos);
    let generation = u16::try_from(digits(&mut pos)?).ok()?;
    skip_ws(&mut pos);
    if bytes.get(pos) != Some(&b'R') {
        return None;
    }
    Some(((number, generation), pos + 1))
}

#[cfg(test)]
mod tests {
    use super::super::pdf::fixtures::sample_pdf;
    use super::*;
    use crate::config::{Job, PipelineConfig};
    use crate::engine::run;

    fn protect_job(password: &str) -> Job {
        Job::Protect {
            password: password.into(),
            owner_password: None,
        }
    }

    fn unlock_job(password: &str) -> Job {
        Job::Unlock {
            password: password.into(),
        }
    }

    async fn protected(pages: usize, password: &str) -> Document {
        let input = Document::new(sample_pdf(pages), MediaKind::Pdf);
        let out = run(&protect_job(password), &[input], &PipelineConfig::default())
            .await
            .unwrap();
        Document::new(out.bytes, MediaKind::Pdf)
    }

    #[test]
    fn encrypt_references_are_blanked_in_place() {
        let mut bytes = b"trailer\n<< /Size 9 /Encrypt 7 0 R /Root 1 0 R >>".to_vec();
        let len = bytes.len();
        assert_eq!(strip_encrypt_refs(&mut bytes), Some((7, 0)));
        assert_eq!(bytes.len(), len);
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("Encrypt"));
        assert!(text.contains("/Root 1 0 R"));
    }

    #[test]
    fn encrypt_metadata_key_is_left_alone() {
        let mut bytes = b"<< /EncryptMetadata true /Filter /Standard >>".to_vec();
        assert_eq!(strip_encrypt_refs(&mut bytes), None);
        assert!(bytes.starts_with(b"<< /EncryptMetadata true"));
    }

    #[tokio::test]
    async fn protected_output_needs_the_password() {
        let locked = protected(2, "s3cret").await;
        let doc = lopdf::Document::load_mem(locked.bytes()).unwrap();
        assert!(doc.is_encrypted());
        assert!(doc.authenticate_password("s3cret").is_ok());
        assert!(doc.authenticate_password("guess").is_err());
    }

    #[tokio::test]
    async fn unlock_restores_pages_and_content() {
        let locked = protected(3, "s3cret").await;
        let config = PipelineConfig::builder().compress_streams(false).build().unwrap();
        let out = run(&unlock_job("s3cret"), &[locked], &config).await.unwrap();

        let doc = lopdf::Document::load_mem(&out.bytes).unwrap();
        assert!(!doc.is_encrypted());
        let pages = pdf::page_ids(&doc);
        assert_eq!(pages.len(), 3);
        let text = String::from_utf8_lossy(&doc.get_page_content(pages[2]).unwrap()).into_owned();
        assert!(text.contains("(Page 3) Tj"));
    }

    #[tokio::test]
    async fn owner_password_also_unlocks() {
        let input = Document::new(sample_pdf(1), MediaKind::Pdf);
        let job = Job::Protect {
            password: "reader".into(),
            owner_password: Some("admin".into()),
        };
        let out = run(&job, &[input], &PipelineConfig::default()).await.unwrap();
        let locked = Document::new(out.bytes, MediaKind::Pdf);

        let out = run(&unlock_job("admin"), &[locked], &PipelineConfig::default())
            .await
            .unwrap();
        let doc = lopdf::Document::load_mem(&out.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[tokio::test]
    async fn wrong_password_is_unlock_failed() {
        let locked = protected(1, "s3cret").await;
        let err = run(&unlock_job("nope"), &[locked], &PipelineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnlockFailed);
        assert!(err.message.contains("incorrect"));
    }

    #[tokio::test]
    async fn unlocking_a_plain_document_fails() {
        let input = Document::new(sample_pdf(1), MediaKind::Pdf);
        let err = run(&unlock_job("s3cret"), &[input], &PipelineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnlockFailed);
        assert!(err.message.contains("not password protected"));
    }

    #[tokio::test]
    async fn empty_password_is_rejected_before_parsing() {
        let input = Document::new(b"not even a pdf".to_vec(), MediaKind::Pdf);
        let err = run(&protect_job(""), &[input], &PipelineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtectionFailed);
        assert!(err.message.contains("password is required"));
    }

    #[tokio::test]
    async fn protecting_twice_fails() {
        let locked = protected(1, "s3cret").await;
        let err = run(&protect_job("other"), &[locked], &PipelineConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtectionFailed);
    }
}
