use std::time::Instant;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;

use super::CaptureOptions;
use crate::correlation::PendingEntry;
use crate::error::Result;
use crate::fetch::decode::ContentEncoding;
use crate::fetch::{FetchResponse, ResponseFactory};
use crate::har::{Content, Entry};
use crate::timing;

/// Complete a superseded redirect hop. Its body was drained by the fetch
/// layer and never surfaces, so only the transferred size is known.
pub fn finish_ancestor(mut pending: PendingEntry) -> Entry {
    let received = pending
        .progress
        .finished_at()
        .or(pending.timestamps.first_byte);
    pending.timestamps.received = received;

    let raw = pending.progress.raw_bytes() as i64;
    let mut entry = pending.entry;
    entry.response.body_size = raw;
    entry.response.content.size = raw;
    entry.response.content.compression = None;
    entry.response.content.text = None;
    entry.response.content.encoding = None;

    let (timings, time) = timing::reconcile(&pending.timestamps);
    entry.timings = timings;
    entry.time = time;
    entry
}

/// Read the final response body, complete the entry and rebuild the
/// response around the bytes that were read.
pub async fn finish(
    mut pending: PendingEntry,
    response: FetchResponse,
    options: &CaptureOptions,
    factory: &dyn ResponseFactory,
) -> Result<(Entry, FetchResponse)> {
    let (parts, body) = response.into_parts();
    let decoded = body.bytes().await?;
    pending.timestamps.received = Some(Instant::now());

    let encoding = ContentEncoding::from_headers(&parts.headers);
    let raw = pending.progress.raw_bytes() as i64;
    let mut entry = pending.entry;
    fill_content(&mut entry, &decoded, &encoding, raw, options);

    let (timings, time) = timing::reconcile(&pending.timestamps);
    entry.timings = timings;
    entry.time = time;

    tracing::debug!(
        url = %entry.request.url,
        status = entry.response.status,
        coding = %encoding.name(),
        size = entry.response.content.size,
        "finalized entry"
    );

    Ok((entry, factory.rebuild(parts, decoded)))
}

fn fill_content(
    entry: &mut Entry,
    decoded: &Bytes,
    encoding: &ContentEncoding,
    raw: i64,
    options: &CaptureOptions,
) {
    let size = decoded.len() as i64;
    let content: &mut Content = &mut entry.response.content;
    content.size = size;

    if encoding.is_compressed() {
        entry.response.body_size = raw;
        content.compression = Some(size - raw);
    } else {
        entry.response.body_size = size;
        content.compression = None;
    }

    if !options.bodies || decoded.is_empty() {
        return;
    }
    let size_ok = options.max_body_size.is_none_or(|max| decoded.len() <= max);
    let type_ok = !options.text_only || is_text_mime_type(content.mime_type.as_deref());
    if !size_ok || !type_ok {
        return;
    }

    match std::str::from_utf8(decoded) {
        Ok(text) => content.text = Some(text.to_string()),
        Err(_) if !options.text_only => {
            content.text = Some(STANDARD.encode(decoded));
            content.encoding = Some("base64".to_string());
        }
        Err(_) => {}
    }
}

fn is_text_mime_type(mime: Option<&str>) -> bool {
    match mime {
        None => false,
        Some(m) => {
            let m = m.to_lowercase();
            m.contains("text/")
                || m.contains("json")
                || m.contains("xml")
                || m.contains("javascript")
                || m.contains("css")
                || m.contains("html")
                || m.contains("x-www-form-urlencoded")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{BufferedResponseFactory, ResponseBody, ResponseParts};
    use crate::timing::Timestamps;
    use crate::transport::BodyProgress;
    use hyper::StatusCode;
    use std::sync::Arc;
    use url::Url;

    fn pending(mime: &str) -> PendingEntry {
        let mut entry = Entry::default();
        entry.response.status = 200;
        entry.response.content.mime_type = Some(mime.to_string());
        PendingEntry::new(entry, Timestamps::now(), Arc::new(BodyProgress::default()))
    }

    fn response(body: &'static [u8], encoding: Option<&'static str>) -> FetchResponse {
        let url = Url::parse("http://example.test/").unwrap();
        let mut parts = ResponseParts::new(StatusCode::OK, url);
        if let Some(encoding) = encoding {
            parts.headers.insert("content-encoding", encoding.parse().unwrap());
        }
        FetchResponse::from_parts(parts, ResponseBody::buffered(body))
    }

    #[tokio::test]
    async fn uncompressed_sizes_match_and_body_survives() {
        let (entry, rebuilt) = finish(
            pending("text/plain"),
            response(b"hello", None),
            &CaptureOptions::default(),
            &BufferedResponseFactory,
        )
        .await
        .unwrap();

        assert_eq!(entry.response.body_size, 5);
        assert_eq!(entry.response.content.size, 5);
        assert_eq!(entry.response.content.compression, None);
        assert_eq!(entry.response.content.text.as_deref(), Some("hello"));
        assert!(entry.timings.blocked >= timing::MIN_BLOCKED_MS);
        assert_eq!(rebuilt.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn compressed_sizes_use_raw_byte_count() {
        let pending = pending("application/json");
        pending.progress.add(40);
        let (entry, _) = finish(
            pending,
            response(&[b'a'; 100], Some("gzip")),
            &CaptureOptions::default(),
            &BufferedResponseFactory,
        )
        .await
        .unwrap();

        let content = &entry.response.content;
        assert_eq!(entry.response.body_size, 40);
        assert_eq!(content.size, 100);
        assert_eq!(content.compression, Some(60));
        assert_eq!(content.size - entry.response.body_size, content.compression.unwrap());
    }

    #[tokio::test]
    async fn binary_bodies_are_base64_unless_text_only() {
        let bytes: &'static [u8] = &[0xff, 0xfe, 0x00, 0x01];
        let (entry, _) = finish(
            pending("application/octet-stream"),
            response(bytes, None),
            &CaptureOptions::default(),
            &BufferedResponseFactory,
        )
        .await
        .unwrap();
        assert_eq!(entry.response.content.encoding.as_deref(), Some("base64"));
        assert_eq!(entry.response.content.text.as_deref(), Some("//4AAQ=="));

        let options = CaptureOptions {
            text_only: true,
            ..CaptureOptions::default()
        };
        let (entry, _) = finish(
            pending("application/octet-stream"),
            response(bytes, None),
            &options,
            &BufferedResponseFactory,
        )
        .await
        .unwrap();
        assert!(entry.response.content.text.is_none());
        assert_eq!(entry.response.content.size, 4);
    }

    #[tokio::test]
    async fn oversized_bodies_keep_sizes_only() {
        let options = CaptureOptions {
            max_body_size: Some(3),
            ..CaptureOptions::default()
        };
        let (entry, rebuilt) = finish(
            pending("text/plain"),
            response(b"too long", None),
            &options,
            &BufferedResponseFactory,
        )
        .await
        .unwrap();
        assert!(entry.response.content.text.is_none());
        assert_eq!(entry.response.content.size, 8);
        assert_eq!(rebuilt.bytes().await.unwrap().len(), 8);
    }

    #[test]
    fn ancestors_report_transferred_size() {
        let pending = pending("text/html");
        pending.progress.add(12);
        pending.progress.finish(Instant::now());
        let entry = finish_ancestor(pending);
        assert_eq!(entry.response.body_size, 12);
        assert_eq!(entry.response.content.size, 12);
        assert!(entry.response.content.text.is_none());
        assert!(entry.timings.wait >= 0.0);
    }
}
