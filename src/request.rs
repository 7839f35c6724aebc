//! The request facade.
//!
//! [`Request`] wraps the [`RawRequest`] the transport delivered and derives
//! everything middleware asks about it: URL pieces, the parsed query, host
//! and protocol (honouring `X-Forwarded-*` when the app trusts its proxy),
//! client addresses, freshness and content negotiation.
//!
//! Derived values that are costly or asked for repeatedly are computed once
//! and kept until the input they came from changes:
//!
//! | Cache        | Rebuilt when                    |
//! |--------------|---------------------------------|
//! | URL pieces   | the URL is set                  |
//! | parsed `Url` | the URL or the headers change   |
//! | negotiator   | the headers change              |
//! | query        | never; keyed by the raw string  |
//! | `ip`         | [`Request::set_ip`]             |

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use bytes::Bytes;
use http::{Method, Version};
use http_body_util::BodyExt;
use mime_guess::mime::{self, Mime};
use serde::Serialize;
use url::Url;

use crate::app::Shared;
use crate::error::Error;
use crate::fresh;
use crate::header::{self, Headers};
use crate::media::{self, TypeMatch};
use crate::negotiate::Negotiator;
use crate::query::Query;
use crate::response::Response;
use crate::transport::{RawRequest, RequestBody};

/// The pieces of a request URL, split once.
#[derive(Clone, Debug, Default)]
struct UrlParts {
    /// `scheme://authority` for absolute-form URLs, otherwise empty.
    origin: String,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl UrlParts {
    fn parse(url: &str) -> Self {
        let (rest, fragment) = match url.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_owned())),
            None => (url, None),
        };
        let (before, query) = match rest.split_once('?') {
            Some((before, query)) => (before, Some(query.to_owned())),
            None => (rest, None),
        };
        let (origin, path) = match before.find("://") {
            Some(scheme_end) if !before.starts_with('/') => {
                let authority = scheme_end + 3;
                match before[authority..].find('/') {
                    Some(slash) => before.split_at(authority + slash),
                    None => (before, "/"),
                }
            }
            _ => ("", before),
        };
        Self { origin: origin.to_owned(), path: path.to_owned(), query, fragment }
    }

    fn to_url(&self) -> String {
        let mut url = format!("{}{}", self.origin, self.path);
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            url.push('#');
            url.push_str(fragment);
        }
        url
    }
}

/// The request side of a [`Context`](crate::Context).
pub struct Request {
    raw: RawRequest,
    app: Arc<Shared>,
    original_url: String,
    url_parts: OnceLock<UrlParts>,
    full_url: OnceLock<Option<Url>>,
    query_cache: Mutex<HashMap<String, Arc<Query>>>,
    negotiator: OnceLock<Negotiator>,
    ip: OnceLock<String>,
}

impl Request {
    pub(crate) fn new(raw: RawRequest, app: Arc<Shared>) -> Self {
        Self {
            original_url: raw.url.clone(),
            raw,
            app,
            url_parts: OnceLock::new(),
            full_url: OnceLock::new(),
            query_cache: Mutex::new(HashMap::new()),
            negotiator: OnceLock::new(),
            ip: OnceLock::new(),
        }
    }

    // ── Headers ───────────────────────────────────────────────────────────────

    /// Header value, `""` when absent.
    ///
    /// `Referer` and `Referrer` name the same field; the registered spelling
    /// `Referer` wins when both are present.
    pub fn get(&self, field: &str) -> &str {
        if field.eq_ignore_ascii_case("referer") || field.eq_ignore_ascii_case("referrer") {
            let referer = self.raw.headers.get("referer");
            if !referer.is_empty() {
                return referer;
            }
            return self.raw.headers.get("referrer");
        }
        self.raw.headers.get(field)
    }

    pub fn headers(&self) -> &Headers {
        &self.raw.headers
    }

    /// Mutable headers. Drops the negotiator and the parsed URL, both of
    /// which are derived from headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        self.negotiator = OnceLock::new();
        self.full_url = OnceLock::new();
        &mut self.raw.headers
    }

    // ── Method and URL ────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method {
        &self.raw.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.raw.method = method;
    }

    pub fn version(&self) -> Version {
        self.raw.version
    }

    /// The request target, as rewritten by any middleware so far.
    pub fn url(&self) -> &str {
        &self.raw.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.raw.url = url.into();
        self.url_parts = OnceLock::new();
        self.full_url = OnceLock::new();
    }

    /// The request target before any rewriting.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    fn parts(&self) -> &UrlParts {
        self.url_parts.get_or_init(|| UrlParts::parse(&self.raw.url))
    }

    pub fn path(&self) -> &str {
        &self.parts().path
    }

    /// Replaces the path, keeping the query string.
    pub fn set_path(&mut self, path: &str) {
        if self.path() == path {
            return;
        }
        let mut parts = self.parts().clone();
        parts.path = path.to_owned();
        self.set_url(parts.to_url());
    }

    /// The query string without `?`, `""` when there is none.
    pub fn querystring(&self) -> &str {
        self.parts().query.as_deref().unwrap_or("")
    }

    /// Replaces the query string. Setting the current value again, or an
    /// empty string when there is no query, changes nothing.
    pub fn set_querystring(&mut self, querystring: &str) {
        let querystring = querystring.strip_prefix('?').unwrap_or(querystring);
        let current = self.parts().query.as_deref();
        if current == Some(querystring) || (current.is_none() && querystring.is_empty()) {
            return;
        }
        let mut parts = self.parts().clone();
        parts.query = (!querystring.is_empty()).then(|| querystring.to_owned());
        self.set_url(parts.to_url());
    }

    /// The query string with its leading `?`, or `""`.
    pub fn search(&self) -> String {
        match self.querystring() {
            ""    => String::new(),
            query => format!("?{query}"),
        }
    }

    pub fn set_search(&mut self, search: &str) {
        self.set_querystring(search);
    }

    /// The parsed query. Parsing the same string twice returns the same
    /// shared value.
    pub fn query(&self) -> Arc<Query> {
        let querystring = self.querystring();
        let mut cache = self.query_cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(query) = cache.get(querystring) {
            return Arc::clone(query);
        }
        let query = Arc::new(Query::parse(querystring));
        cache.insert(querystring.to_owned(), Arc::clone(&query));
        query
    }

    pub fn set_query(&mut self, query: &Query) {
        self.set_querystring(&query.to_string());
    }

    // ── Host and protocol ─────────────────────────────────────────────────────

    /// `host[:port]`. Behind a trusted proxy the first `X-Forwarded-Host`
    /// wins; HTTP/2 requests use `:authority`; otherwise `Host`.
    pub fn host(&self) -> &str {
        if self.app.config.proxy {
            let forwarded = first_token(self.get("x-forwarded-host"));
            if !forwarded.is_empty() {
                return forwarded;
            }
        }
        if self.raw.version >= Version::HTTP_2 {
            if let Some(authority) = self.raw.authority.as_deref().filter(|a| !a.is_empty()) {
                return authority;
            }
        }
        self.get("host")
    }

    /// The host without its port. Bracketed IPv6 literals keep their
    /// brackets.
    pub fn hostname(&self) -> &str {
        let host = self.host();
        if host.is_empty() {
            return "";
        }
        if host.starts_with('[') {
            return self.parsed_url().and_then(Url::host_str).unwrap_or("");
        }
        host.split(':').next().unwrap_or("")
    }

    /// `true` when the transport connection itself is encrypted, or a trusted
    /// proxy says it was.
    pub fn protocol(&self) -> &str {
        if self.raw.encrypted {
            return "https";
        }
        if !self.app.config.proxy {
            return "http";
        }
        match first_token(self.get("x-forwarded-proto")) {
            ""    => "http",
            proto => proto,
        }
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// `protocol://host`.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol(), self.host())
    }

    /// The full request URL.
    pub fn href(&self) -> String {
        let url = self.url();
        let absolute = url
            .get(..8)
            .is_some_and(|p| p.eq_ignore_ascii_case("https://"))
            || url.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("http://"));
        if absolute { url.to_owned() } else { format!("{}{}", self.origin(), url) }
    }

    /// [`href`](Self::href) parsed, or `None` when it is not a valid URL.
    pub fn parsed_url(&self) -> Option<&Url> {
        self.full_url
            .get_or_init(|| Url::parse(&self.href()).ok())
            .as_ref()
    }

    // ── Client address ────────────────────────────────────────────────────────

    /// The client address chain from the configured proxy header, nearest
    /// proxy last. Empty unless the proxy is trusted.
    pub fn ips(&self) -> Vec<&str> {
        let config = &self.app.config;
        if !config.proxy {
            return Vec::new();
        }
        let mut ips: Vec<&str> = self
            .get(&config.proxy_ip_header)
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .collect();
        if config.max_ips_count > 0 && ips.len() > config.max_ips_count {
            ips.drain(..ips.len() - config.max_ips_count);
        }
        ips
    }

    /// The client address: first of [`ips`](Self::ips), else the peer
    /// address, else `""`. Computed once.
    pub fn ip(&self) -> &str {
        self.ip.get_or_init(|| {
            self.ips()
                .first()
                .map(|ip| (*ip).to_owned())
                .or_else(|| self.raw.remote_addr.map(|addr| addr.ip().to_string()))
                .unwrap_or_default()
        })
    }

    pub fn set_ip(&mut self, ip: impl Into<String>) {
        self.ip = OnceLock::from(ip.into());
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.raw.remote_addr
    }

    /// Hostname labels left of the apex domain, nearest first.
    ///
    /// With the default offset of 2, `tobi.ferrets.example.com` gives
    /// `["ferrets", "tobi"]`. IP hosts have no subdomains.
    pub fn subdomains(&self) -> Vec<&str> {
        let hostname = self.hostname();
        let bare = hostname.trim_start_matches('[').trim_end_matches(']');
        if hostname.is_empty() || bare.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }
        hostname
            .split('.')
            .rev()
            .skip(self.app.config.subdomain_offset)
            .collect()
    }

    // ── Caching ───────────────────────────────────────────────────────────────

    /// `true` when the client's cached copy is still valid for `response`.
    ///
    /// Only `GET` and `HEAD` requests answered with `2xx` or `304` can be
    /// fresh.
    pub fn fresh(&self, response: &Response) -> bool {
        if self.raw.method != Method::GET && self.raw.method != Method::HEAD {
            return false;
        }
        let status = response.status();
        if (200..300).contains(&status) || status == 304 {
            return fresh::is_fresh(self.headers(), response.headers());
        }
        false
    }

    pub fn stale(&self, response: &Response) -> bool {
        !self.fresh(response)
    }

    pub fn idempotent(&self) -> bool {
        matches!(
            self.raw.method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
        )
    }

    // ── Negotiation ───────────────────────────────────────────────────────────

    fn negotiator(&self) -> &Negotiator {
        self.negotiator.get_or_init(|| Negotiator::new(&self.raw.headers))
    }

    /// The best of `types` for this client, or `None` if it accepts none of
    /// them. Types may be short names (`html`), extensions or full MIME types.
    pub fn accepts(&self, types: &[&str]) -> Option<String> {
        if types.is_empty() {
            return self.accepted_types().into_iter().next();
        }
        let resolved: Vec<(usize, String)> = types
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                if t.contains('/') { Some((i, (*t).to_owned())) } else { media::lookup(t).map(|m| (i, m)) }
            })
            .collect();
        let candidates: Vec<&str> = resolved.iter().map(|(_, m)| m.as_str()).collect();
        let best = self.negotiator().media_types(Some(&candidates)).into_iter().next()?;
        resolved
            .iter()
            .find(|(_, m)| *m == best)
            .map(|(i, _)| types[*i].to_owned())
    }

    /// Every accepted media type, most preferred first.
    pub fn accepted_types(&self) -> Vec<String> {
        self.negotiator().media_types(None)
    }

    pub fn accepts_encodings(&self, encodings: &[&str]) -> Option<String> {
        self.negotiator().encodings(Some(encodings)).into_iter().next()
    }

    pub fn accepted_encodings(&self) -> Vec<String> {
        self.negotiator().encodings(None)
    }

    pub fn accepts_charsets(&self, charsets: &[&str]) -> Option<String> {
        self.negotiator().charsets(Some(charsets)).into_iter().next()
    }

    pub fn accepted_charsets(&self) -> Vec<String> {
        self.negotiator().charsets(None)
    }

    pub fn accepts_languages(&self, languages: &[&str]) -> Option<String> {
        self.negotiator().languages(Some(languages)).into_iter().next()
    }

    pub fn accepted_languages(&self) -> Vec<String> {
        self.negotiator().languages(None)
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    /// Matches the request `Content-Type` against `types`.
    pub fn is(&self, types: &[&str]) -> TypeMatch {
        if !self.has_body() {
            return TypeMatch::NoBody;
        }
        match media::type_is(self.get("content-type"), types) {
            Some(matched) => TypeMatch::Type(matched),
            None => TypeMatch::Mismatch,
        }
    }

    /// `true` when the headers announce a body, even an empty one.
    pub fn has_body(&self) -> bool {
        self.raw.headers.has("transfer-encoding")
            || header::parse_length(self.get("content-length")).is_ok_and(|len| len.is_some())
    }

    /// The `Content-Type` without parameters, `""` when absent.
    pub fn content_type(&self) -> &str {
        self.get("content-type").split(';').next().unwrap_or("").trim()
    }

    /// The `charset` parameter of `Content-Type`, `""` when absent.
    pub fn charset(&self) -> String {
        self.get("content-type")
            .parse::<Mime>()
            .ok()
            .and_then(|m| m.get_param(mime::CHARSET).map(|c| c.as_str().to_owned()))
            .unwrap_or_default()
    }

    /// `Content-Length`. A present but malformed value is an error.
    pub fn length(&self) -> Result<Option<u64>, Error> {
        header::parse_length(self.get("content-length"))
    }

    /// Takes the body stream; later calls get `None`.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.raw.body.take()
    }

    /// Reads the whole body. A body that was already taken reads as empty.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        let Some(body) = self.raw.body.take() else {
            return Ok(Bytes::new());
        };
        let collected = body.collect().await.map_err(Error::other)?;
        Ok(collected.to_bytes())
    }

    pub fn raw(&self) -> &RawRequest {
        &self.raw
    }

    /// A serializable summary: method, URL and headers.
    pub fn snapshot(&self) -> RequestSnapshot<'_> {
        RequestSnapshot {
            method: self.raw.method.as_str(),
            url: &self.raw.url,
            header: &self.raw.headers,
        }
    }
}

fn first_token(value: &str) -> &str {
    value.split(',').next().unwrap_or("").trim()
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.raw.method)
            .field("url", &self.raw.url)
            .field("headers", &self.raw.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
pub struct RequestSnapshot<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub header: &'a Headers,
}
