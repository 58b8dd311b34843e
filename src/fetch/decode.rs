use bytes::Bytes;
use hyper::header::CONTENT_ENCODING;
use hyper::HeaderMap;

use crate::error::Result;

/// The content coding a response body was transferred with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentCoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentCoding {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "identity" | "" => Some(Self::Identity),
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            _ => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Self::Identity
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }
}

/// The codings named by `Content-Encoding`, in the order they were applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentEncoding {
    codings: Vec<ContentCoding>,
}

impl ContentEncoding {
    pub fn identity() -> Self {
        Self::default()
    }

    /// A body with an unknown coding anywhere in the stack cannot be
    /// decoded, so it is reported as identity and passed through untouched.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut codings = Vec::new();
        let names = headers
            .get_all(CONTENT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','));
        for name in names {
            match ContentCoding::from_name(name) {
                Some(ContentCoding::Identity) => {}
                Some(coding) => codings.push(coding),
                None => return Self::identity(),
            }
        }
        Self { codings }
    }

    pub fn codings(&self) -> &[ContentCoding] {
        &self.codings
    }

    pub fn is_compressed(&self) -> bool {
        !self.codings.is_empty()
    }

    pub fn name(&self) -> String {
        if self.codings.is_empty() {
            return ContentCoding::Identity.name().to_string();
        }
        self.codings
            .iter()
            .map(|coding| coding.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<ContentCoding> for ContentEncoding {
    fn from(coding: ContentCoding) -> Self {
        let codings = if coding.is_compressed() {
            vec![coding]
        } else {
            Vec::new()
        };
        Self { codings }
    }
}

/// The `Accept-Encoding` value advertised when decoding is available.
pub const ACCEPTED_CODINGS: &str = "gzip, deflate, br";

/// Undo every coding, outermost (last applied) first.
pub fn decode(raw: Bytes, encoding: &ContentEncoding) -> Result<Bytes> {
    encoding
        .codings()
        .iter()
        .rev()
        .try_fold(raw, |body, coding| decode_one(body, *coding))
}

fn decode_one(raw: Bytes, coding: ContentCoding) -> Result<Bytes> {
    match coding {
        ContentCoding::Identity => Ok(raw),
        #[cfg(feature = "compression")]
        ContentCoding::Gzip => codecs::gunzip(&raw).map(Bytes::from),
        #[cfg(feature = "compression")]
        ContentCoding::Deflate => codecs::inflate(&raw).map(Bytes::from),
        #[cfg(feature = "compression")]
        ContentCoding::Brotli => codecs::unbrotli(&raw).map(Bytes::from),
        #[cfg(not(feature = "compression"))]
        _ => Ok(raw),
    }
}

#[cfg(feature = "compression")]
mod codecs {
    use std::io::Read;

    use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

    use crate::error::{Error, Result};

    pub(super) fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut output)
            .map_err(|e| Error::Body(format!("gzip decoding failed: {}", e)))?;
        Ok(output)
    }

    /// `deflate` is meant to be zlib-wrapped, but plenty of servers send a
    /// raw deflate stream.
    pub(super) fn inflate(data: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        if ZlibDecoder::new(data).read_to_end(&mut output).is_ok() {
            return Ok(output);
        }
        output.clear();
        DeflateDecoder::new(data)
            .read_to_end(&mut output)
            .map_err(|e| Error::Body(format!("deflate decoding failed: {}", e)))?;
        Ok(output)
    }

    pub(super) fn unbrotli(data: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut output)
            .map_err(|e| Error::Body(format!("brotli decoding failed: {}", e)))?;
        Ok(output)
    }
}
