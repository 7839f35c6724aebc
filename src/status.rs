//! Status code tables.
//!
//! Reason phrases for every IANA-registered code, plus the two code sets the
//! response state machine cares about:
//!
//! - **empty** codes (`204`, `205`, `304`) forbid a message body;
//! - **redirect** codes are left alone by [`Context::redirect`](crate::Context::redirect).
//!
//! ```rust
//! use strata::status;
//!
//! assert_eq!(status::reason(404), Some("Not Found"));
//! assert!(status::is_empty(304));
//! assert!(status::is_redirect(307));
//! ```

/// The standard reason phrase for `code`, if it is a registered code.
pub fn reason(code: u16) -> Option<&'static str> {
    let phrase = match code {
        // ── 1xx Informational ─────────────────────────────────────────────────
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",

        // ── 2xx Success ───────────────────────────────────────────────────────
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",

        // ── 3xx Redirection ───────────────────────────────────────────────────
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",

        // ── 4xx Client errors ─────────────────────────────────────────────────
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a Teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Content",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",

        // ── 5xx Server errors ─────────────────────────────────────────────────
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _   => return None,
    };
    Some(phrase)
}

/// `true` for codes whose responses must not carry a body.
pub fn is_empty(code: u16) -> bool {
    matches!(code, 204 | 205 | 304)
}

/// `true` for redirect codes.
pub fn is_redirect(code: u16) -> bool {
    matches!(code, 300 | 301 | 302 | 303 | 305 | 307 | 308)
}
