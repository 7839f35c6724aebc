//! Conditional GET freshness.

use std::time::SystemTime;

use crate::header::Headers;

/// `true` when the client's cached copy, described by the conditional
/// request headers, still matches the response's validators.
pub fn is_fresh(req: &Headers, res: &Headers) -> bool {
    let modified_since = req.get("if-modified-since");
    let none_match = req.get("if-none-match");
    if modified_since.is_empty() && none_match.is_empty() {
        return false;
    }

    if req.get("cache-control").split(',').any(|d| d.trim() == "no-cache") {
        return false;
    }

    if !none_match.is_empty() && none_match != "*" {
        let etag = res.get("etag");
        if etag.is_empty() {
            return false;
        }
        let matched = none_match.split(',').map(str::trim).any(|tag| {
            tag == etag
                || tag.strip_prefix("W/") == Some(etag)
                || etag.strip_prefix("W/") == Some(tag)
        });
        if !matched {
            return false;
        }
    }

    if !modified_since.is_empty() {
        let last_modified = parse_date(res.get("last-modified"));
        let since = parse_date(modified_since);
        match (last_modified, since) {
            (Some(last), Some(since)) if last <= since => {}
            _ => return false,
        }
    }

    true
}

fn parse_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(fields: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        h.set_all(fields.iter().copied()).unwrap();
        h
    }

    #[test]
    fn unconditional_requests_are_never_fresh() {
        assert!(!is_fresh(&headers(&[]), &headers(&[("etag", "\"a\"")])));
    }

    #[test]
    fn etag_matching() {
        let res = headers(&[("etag", "\"v1\"")]);
        assert!(is_fresh(&headers(&[("if-none-match", "\"v0\", \"v1\"")]), &res));
        assert!(is_fresh(&headers(&[("if-none-match", "W/\"v1\"")]), &res));
        assert!(!is_fresh(&headers(&[("if-none-match", "\"v2\"")]), &res));
        assert!(!is_fresh(&headers(&[("if-none-match", "\"v1\"")]), &headers(&[])));
    }

    #[test]
    fn no_cache_forces_stale() {
        let req = headers(&[("if-none-match", "\"v1\""), ("cache-control", "max-age=0, no-cache")]);
        assert!(!is_fresh(&req, &headers(&[("etag", "\"v1\"")])));
    }

    #[test]
    fn modified_since() {
        let res = headers(&[("last-modified", "Sat, 01 Jan 2000 00:00:00 GMT")]);
        assert!(is_fresh(&headers(&[("if-modified-since", "Sun, 02 Jan 2000 00:00:00 GMT")]), &res));
        assert!(!is_fresh(&headers(&[("if-modified-since", "Fri, 31 Dec 1999 00:00:00 GMT")]), &res));
        assert!(!is_fresh(&headers(&[("if-modified-since", "yesterday")]), &res));
    }
}
