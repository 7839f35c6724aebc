//! `Content-Disposition` formatting.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left as-is in an RFC 5987 `filename*` value.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!');

/// What to put in the plain `filename=` parameter when the real name cannot
/// be sent there as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Fallback {
    /// The name with every non-ASCII character replaced by `?`.
    #[default]
    Latin1,
    /// No plain `filename=`; clients must understand `filename*`.
    Disabled,
    /// A fixed fallback name.
    Name(String),
}

/// Options for [`Context::attachment`](crate::Context::attachment).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentOptions {
    /// Disposition type, `attachment` by default.
    pub kind: String,
    pub fallback: Fallback,
}

impl Default for AttachmentOptions {
    fn default() -> Self {
        Self { kind: "attachment".to_owned(), fallback: Fallback::default() }
    }
}

impl AttachmentOptions {
    pub fn inline() -> Self {
        Self { kind: "inline".to_owned(), ..Self::default() }
    }
}

/// Builds the header value for `filename` (any path prefix is dropped).
pub fn content_disposition(filename: Option<&str>, options: &AttachmentOptions) -> String {
    let mut out = options.kind.to_ascii_lowercase();
    let Some(filename) = filename else {
        return out;
    };
    let name = basename(filename);

    let quotable = name.chars().all(|c| (' '..='~').contains(&c));
    let fallback = match &options.fallback {
        Fallback::Latin1      => Some(ascii_fallback(name)),
        Fallback::Name(fixed) => Some(ascii_fallback(basename(fixed))),
        Fallback::Disabled    => None,
    };
    let fallback = fallback.filter(|f| !f.is_empty() && f != name);

    if quotable || fallback.is_some() {
        let plain = fallback.as_deref().unwrap_or(name);
        out.push_str("; filename=");
        out.push_str(&quote(plain));
    }
    if fallback.is_some() || !quotable || has_hex_escape(name) {
        out.push_str("; filename*=UTF-8''");
        out.extend(utf8_percent_encode(name, ATTR_CHAR));
    }
    out
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn ascii_fallback(name: &str) -> String {
    name.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn has_hex_escape(name: &str) -> bool {
    name.as_bytes()
        .windows(3)
        .any(|w| w[0] == b'%' && w[1].is_ascii_hexdigit() && w[2].is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str) -> String {
        content_disposition(Some(name), &AttachmentOptions::default())
    }

    #[test]
    fn no_filename() {
        assert_eq!(content_disposition(None, &AttachmentOptions::default()), "attachment");
        assert_eq!(content_disposition(None, &AttachmentOptions::inline()), "inline");
    }

    #[test]
    fn plain_ascii_name() {
        assert_eq!(attachment("/var/files/plans.pdf"), r#"attachment; filename="plans.pdf""#);
        assert_eq!(attachment(r#"the "best".txt"#), r#"attachment; filename="the \"best\".txt""#);
    }

    #[test]
    fn unicode_name_gets_both_forms() {
        assert_eq!(
            attachment("€ rates.pdf"),
            "attachment; filename=\"? rates.pdf\"; filename*=UTF-8''%E2%82%AC%20rates.pdf"
        );
    }

    #[test]
    fn hex_escape_looking_name_gets_extended_form() {
        assert_eq!(
            attachment("the%20plans.pdf"),
            "attachment; filename=\"the%20plans.pdf\"; filename*=UTF-8''the%2520plans.pdf"
        );
    }

    #[test]
    fn disabled_fallback() {
        let options = AttachmentOptions { fallback: Fallback::Disabled, ..Default::default() };
        assert_eq!(
            content_disposition(Some("€.txt"), &options),
            "attachment; filename*=UTF-8''%E2%82%AC.txt"
        );
    }
}
