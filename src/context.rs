use std::cell::OnceCell;

use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{self, HeaderMap, HeaderName, HeaderValue},
    http::request::Parts,
    Method, Response, StatusCode, Uri, Version,
};

use crate::{pattern, Error};

/// The request as seen by a handler. The body has already been received in
/// full; [content](MockRequest::content) decodes it once and caches the text
/// for the rest of the request, so the pre-handler and the handler can both
/// read it.
#[derive(Debug)]
pub struct MockRequest {
    parts: Parts,
    body: Bytes,
    content: OnceCell<String>,
}

impl MockRequest {
    pub(crate) fn new(parts: Parts, body: Bytes) -> Self {
        Self {
            parts,
            body,
            content: OnceCell::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Returns the first value of the named header if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name)?.to_str().ok()
    }

    /// Returns the raw request target, e.g. `/person?active=true`.
    pub fn path_and_query(&self) -> &str {
        self.parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Returns the raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// Returns the percent-decoded query string pairs in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query().map(pattern::parse_query).unwrap_or_default()
    }

    /// Returns the raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as text. Invalid UTF-8 is replaced, not rejected.
    pub fn content(&self) -> &str {
        self.content
            .get_or_init(|| String::from_utf8_lossy(&self.body).into_owned())
    }
}

/// The response a handler builds. Everything written is buffered and sent
/// once the handler returns; the `Content-Length` header always reflects the
/// accumulated body.
#[derive(Debug)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

impl MockResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Appends a header, keeping any existing values of the same name.
    pub fn header(&mut self, name: &str, value: &str) -> Result<&mut Self, Error> {
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Sets the `Content-Type` header, replacing any previous value.
    pub fn content_type(&mut self, value: &str) -> Result<&mut Self, Error> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidHeader(header::CONTENT_TYPE.as_str().to_string()))?;
        self.headers.insert(header::CONTENT_TYPE, value);
        Ok(self)
    }

    /// Appends a `Set-Cookie` header.
    pub fn cookie(
        &mut self,
        name: &str,
        value: &str,
        path: Option<&str>,
        domain: Option<&str>,
    ) -> Result<&mut Self, Error> {
        let mut cookie = format!("{name}={value}");
        if let Some(path) = path {
            cookie.push_str("; Path=");
            cookie.push_str(path);
        }
        if let Some(domain) = domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        self.header(header::SET_COOKIE.as_str(), &cookie)
    }

    /// Appends raw bytes to the body.
    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self
    }

    /// Appends UTF-8 text to the body.
    pub fn write_str(&mut self, text: &str) -> &mut Self {
        self.write(text.as_bytes())
    }

    /// Sets the content type to `application/json` and appends `text`.
    pub fn json_text(&mut self, text: &str) -> Result<&mut Self, Error> {
        self.content_type("application/json")?;
        Ok(self.write_str(text))
    }

    /// Returns the body written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the number of body bytes written so far.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    pub(crate) fn clear_body(&mut self) {
        self.body.clear();
    }

    pub(crate) fn into_response(mut self) -> Response<Full<Bytes>> {
        self.headers.remove(header::CONTENT_LENGTH);

        let mut res = Response::new(Full::new(Bytes::from(self.body)));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let invalid = || Error::InvalidHeader(name.to_string());
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((header_name, header_value))
}
