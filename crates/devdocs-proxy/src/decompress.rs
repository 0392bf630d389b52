//! Streaming content decoding.
//!
//! Decoders pull from the upstream body one chunk at a time, so an arbitrarily
//! large response never has to be buffered before the first decoded byte is
//! forwarded.

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZlibDecoder};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use hyper::header::HeaderValue;
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};

/// A boxed stream of body chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Content-encoding tokens the proxy knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Brotli,
    Gzip,
    /// HTTP `deflate`, i.e. zlib-wrapped DEFLATE.
    Deflate,
    /// Anything unrecognised, including a missing header.
    Identity,
}

impl ContentEncoding {
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "br" => ContentEncoding::Brotli,
            "gzip" => ContentEncoding::Gzip,
            "deflate" => ContentEncoding::Deflate,
            _ => ContentEncoding::Identity,
        }
    }

    pub fn from_header(value: Option<&HeaderValue>) -> Self {
        value
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
            .unwrap_or(ContentEncoding::Identity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Brotli => "br",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Identity => "identity",
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == ContentEncoding::Identity
    }
}

/// Wrap `stream` with the decoder for `encoding`.
///
/// `Identity` returns the input untouched. Corrupt input surfaces as an
/// `io::Error` item from the returned stream.
pub fn decompress<S>(encoding: ContentEncoding, stream: S) -> ByteStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    match encoding {
        ContentEncoding::Identity => stream.boxed(),
        ContentEncoding::Gzip => {
            ReaderStream::new(GzipDecoder::new(StreamReader::new(stream))).boxed()
        }
        ContentEncoding::Brotli => {
            ReaderStream::new(BrotliDecoder::new(StreamReader::new(stream))).boxed()
        }
        ContentEncoding::Deflate => {
            ReaderStream::new(ZlibDecoder::new(StreamReader::new(stream))).boxed()
        }
    }
}
