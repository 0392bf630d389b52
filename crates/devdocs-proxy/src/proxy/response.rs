//! Response rewriting.
//!
//! Every upstream response goes through [`ResponseProcessor::process`], which
//! fixes up connection headers for the client's protocol version and then
//! dispatches on content-type:
//!
//! | content-type              | action                                     |
//! |---------------------------|--------------------------------------------|
//! | missing                   | relay untouched                            |
//! | `application/javascript*` | decode body, `content-encoding: identity`  |
//! | `text/html*`              | correct the `override-mobile-detect` cookie |
//! | anything else             | relay untouched                            |
//!
//! Bodies are always streamed; headers are final before the first body byte.

use super::headers::{
    header_str, mobile_cookie_value, mobile_set_cookie, OVERRIDE_MOBILE_DETECT, VALUE_CLOSE,
    VALUE_IDENTITY, VALUE_KEEP_ALIVE,
};
use crate::cookie::CookieJar;
use crate::decompress::{decompress, ContentEncoding};
use crate::metrics;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::ext::ReasonPhrase;
use hyper::header::{
    CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE, TRANSFER_ENCODING,
};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Version};
use std::io;
use tracing::debug;

/// Body type of every response the proxy writes to a client.
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// What the processor needs to remember about the inbound request once its
/// body has been handed to the upstream client.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub method: Method,
    pub version: Version,
    pub request_headers: HeaderMap,
}

impl ResponseContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            version: req.version(),
            request_headers: req.headers().clone(),
        }
    }

    /// HEAD requests and 204/304 responses never carry a body.
    fn expects_body(&self, status: StatusCode) -> bool {
        self.method != Method::HEAD
            && status != StatusCode::NO_CONTENT
            && status != StatusCode::NOT_MODIFIED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Missing,
    JavaScript,
    Html,
    Other,
}

impl ContentKind {
    fn classify(headers: &HeaderMap) -> Self {
        if !headers.contains_key(CONTENT_TYPE) {
            return ContentKind::Missing;
        }
        match header_str(headers, &CONTENT_TYPE) {
            Some(ct) if ct.starts_with("application/javascript") => ContentKind::JavaScript,
            Some(ct) if ct.starts_with("text/html") => ContentKind::Html,
            _ => ContentKind::Other,
        }
    }
}

/// Per-activation response rewriter.
#[derive(Debug, Clone, Copy)]
pub struct ResponseProcessor {
    mobile_mode: bool,
}

impl ResponseProcessor {
    pub fn new(mobile_mode: bool) -> Self {
        Self { mobile_mode }
    }

    /// Turn an upstream response into the response relayed to the client.
    pub fn process<B>(&self, ctx: &ResponseContext, upstream: Response<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = upstream.into_parts();
        let mut headers = copy_headers(ctx, &parts.headers);

        let body = match ContentKind::classify(&parts.headers) {
            ContentKind::Missing | ContentKind::Other => passthrough(body),
            ContentKind::JavaScript => {
                let encoding = ContentEncoding::from_header(parts.headers.get(CONTENT_ENCODING));
                headers.insert(CONTENT_ENCODING, VALUE_IDENTITY.clone());
                if encoding.is_identity() {
                    passthrough(body)
                } else {
                    // Decoded length is unknown up front.
                    headers.remove(CONTENT_LENGTH);
                    if ctx.expects_body(parts.status) {
                        metrics::record_decoded_response(encoding.as_str());
                        debug!("Decoding {} JavaScript response", encoding.as_str());
                        decoded(encoding, body)
                    } else {
                        passthrough(body)
                    }
                }
            }
            ContentKind::Html => {
                self.correct_mobile_cookie(ctx, &mut headers);
                passthrough(body)
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = parts.status;
        *response.headers_mut() = headers;
        if let Some(reason) = parts.extensions.get::<ReasonPhrase>() {
            response.extensions_mut().insert(reason.clone());
        }
        response
    }

    fn correct_mobile_cookie(&self, ctx: &ResponseContext, headers: &mut HeaderMap) {
        let expected = mobile_cookie_value(self.mobile_mode);
        let jar = CookieJar::from_headers(&ctx.request_headers);
        let current = jar.get(OVERRIDE_MOBILE_DETECT);

        if current != Some(expected) {
            debug!(
                "Setting {}={} (client sent {:?})",
                OVERRIDE_MOBILE_DETECT, expected, current
            );
            headers.append(SET_COOKIE, mobile_set_cookie(self.mobile_mode).clone());
            metrics::record_cookie_correction(expected);
        }
    }
}

/// Copy upstream headers and reconcile `connection` / `transfer-encoding`
/// with the protocol version the client spoke.
fn copy_headers(ctx: &ResponseContext, upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    let request_connection = ctx.request_headers.get(CONNECTION).cloned();

    match ctx.version {
        Version::HTTP_10 => {
            // A body without content-length is then close-delimited; hyper
            // closes the connection even when keep-alive is echoed here.
            headers.remove(TRANSFER_ENCODING);
            headers.insert(
                CONNECTION,
                request_connection.unwrap_or_else(|| VALUE_CLOSE.clone()),
            );
        }
        Version::HTTP_2 => {}
        _ => {
            if !upstream.contains_key(CONNECTION) {
                headers.insert(
                    CONNECTION,
                    request_connection.unwrap_or_else(|| VALUE_KEEP_ALIVE.clone()),
                );
            }
        }
    }

    headers
}

fn passthrough<B>(body: B) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    body.map_err(io::Error::other).boxed_unsync()
}

fn decoded<B>(encoding: ContentEncoding, body: B) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let chunks = body.into_data_stream().map_err(io::Error::other);
    StreamBody::new(decompress(encoding, chunks).map_ok(Frame::data)).boxed_unsync()
}
