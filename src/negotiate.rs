//! Content negotiation over the `Accept*` request headers.
//!
//! Each header is parsed once into a list of accepted values with their
//! quality (`q`) and position. Ranking a list of candidates works the same
//! for all four headers:
//!
//! 1. every candidate takes the priority of the most specific accepted value
//!    it matches (ties go to the higher `q`, then to the later entry);
//! 2. candidates with `q = 0`, or that match nothing, are dropped;
//! 3. the rest are ordered by `q`, then specificity, then header position,
//!    then their position in the candidate list.

use crate::header::Headers;

#[derive(Clone, Debug)]
struct Accepted {
    value: String,
    q: f32,
    index: usize,
    params: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug)]
struct Priority {
    q: f32,
    s: u8,
    o: usize,
}

/// Parsed `Accept`, `Accept-Encoding`, `Accept-Charset` and
/// `Accept-Language` headers of one request.
#[derive(Clone, Debug)]
pub(crate) struct Negotiator {
    media_types: Vec<Accepted>,
    encodings: Vec<Accepted>,
    charsets: Vec<Accepted>,
    languages: Vec<Accepted>,
}

impl Negotiator {
    pub(crate) fn new(headers: &Headers) -> Self {
        let or_any = |field: &str, any: &'static str| {
            if headers.has(field) { headers.get(field).to_owned() } else { any.to_owned() }
        };
        Self {
            media_types: parse_media_types(&or_any("accept", "*/*")),
            encodings: parse_encodings(headers.get("accept-encoding")),
            charsets: parse_simple(&or_any("accept-charset", "*")),
            languages: parse_simple(&or_any("accept-language", "*")),
        }
    }

    /// Candidates in preference order, or every accepted type when `provided`
    /// is `None`.
    pub(crate) fn media_types(&self, provided: Option<&[&str]>) -> Vec<String> {
        preferred(&self.media_types, provided, media_type_specificity)
    }

    pub(crate) fn encodings(&self, provided: Option<&[&str]>) -> Vec<String> {
        preferred(&self.encodings, provided, token_specificity)
    }

    pub(crate) fn charsets(&self, provided: Option<&[&str]>) -> Vec<String> {
        preferred(&self.charsets, provided, token_specificity)
    }

    pub(crate) fn languages(&self, provided: Option<&[&str]>) -> Vec<String> {
        preferred(&self.languages, provided, language_specificity)
    }
}

fn preferred<F>(accepted: &[Accepted], provided: Option<&[&str]>, specificity: F) -> Vec<String>
where
    F: Fn(&str, &Accepted) -> Option<u8>,
{
    let Some(provided) = provided else {
        let mut all: Vec<&Accepted> = accepted.iter().filter(|a| a.q > 0.0).collect();
        all.sort_by(|a, b| b.q.total_cmp(&a.q).then(a.index.cmp(&b.index)));
        return all.into_iter().map(|a| a.value.clone()).collect();
    };

    let mut ranked: Vec<(usize, Priority)> = provided
        .iter()
        .enumerate()
        .filter_map(|(i, candidate)| {
            let mut best: Option<Priority> = None;
            for a in accepted {
                let Some(s) = specificity(candidate, a) else { continue };
                let p = Priority { q: a.q, s, o: a.index };
                if best.is_none_or(|b| (p.s, p.q, p.o) > (b.s, b.q, b.o)) {
                    best = Some(p);
                }
            }
            best.map(|p| (i, p))
        })
        .filter(|(_, p)| p.q > 0.0)
        .collect();

    ranked.sort_by(|(ia, a), (ib, b)| {
        b.q.total_cmp(&a.q)
            .then(b.s.cmp(&a.s))
            .then(a.o.cmp(&b.o))
            .then(ia.cmp(ib))
    });
    ranked.into_iter().map(|(i, _)| provided[i].to_owned()).collect()
}

// ── Specificity ───────────────────────────────────────────────────────────────

fn media_type_specificity(candidate: &str, accepted: &Accepted) -> Option<u8> {
    let parsed = parse_media_type(candidate, 0)?;
    let (cty, csub) = parsed.value.split_once('/')?;
    let (aty, asub) = accepted.value.split_once('/')?;

    let mut s = 0;
    if aty.eq_ignore_ascii_case(cty) {
        s |= 4;
    } else if aty != "*" {
        return None;
    }
    if asub.eq_ignore_ascii_case(csub) {
        s |= 2;
    } else if asub != "*" {
        return None;
    }
    if !accepted.params.is_empty() {
        let all_match = accepted.params.iter().all(|(k, v)| {
            v == "*"
                || parsed
                    .params
                    .iter()
                    .any(|(ck, cv)| ck.eq_ignore_ascii_case(k) && cv.eq_ignore_ascii_case(v))
        });
        if !all_match {
            return None;
        }
        s |= 1;
    }
    Some(s)
}

fn token_specificity(candidate: &str, accepted: &Accepted) -> Option<u8> {
    if accepted.value.eq_ignore_ascii_case(candidate) {
        Some(1)
    } else if accepted.value == "*" {
        Some(0)
    } else {
        None
    }
}

fn language_specificity(candidate: &str, accepted: &Accepted) -> Option<u8> {
    let full = candidate.trim().to_ascii_lowercase();
    let prefix = full.split('-').next().unwrap_or(&full).to_owned();
    let accepted_full = accepted.value.to_ascii_lowercase();
    let accepted_prefix = accepted_full.split('-').next().unwrap_or(&accepted_full);

    if accepted_full == full {
        Some(4)
    } else if accepted_prefix == full {
        Some(2)
    } else if accepted_full == prefix {
        Some(1)
    } else if accepted_full == "*" {
        Some(0)
    } else {
        None
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

fn parse_media_types(header: &str) -> Vec<Accepted> {
    split_quoted(header, ',')
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| parse_media_type(entry, i))
        .collect()
}

fn parse_media_type(entry: &str, index: usize) -> Option<Accepted> {
    let mut parts = split_quoted(entry, ';').into_iter();
    let essence = parts.next()?.trim();
    let (ty, sub) = essence.split_once('/')?;
    if ty.is_empty() || sub.is_empty() || essence.contains(char::is_whitespace) {
        return None;
    }
    let mut q = 1.0;
    let mut params = Vec::new();
    for param in parts {
        let Some((key, value)) = param.split_once('=') else { continue };
        let key = key.trim().to_ascii_lowercase();
        let value = unquote(value.trim());
        if key == "q" {
            q = parse_quality(&value);
        } else {
            params.push((key, value));
        }
    }
    Some(Accepted { value: essence.to_owned(), q, index, params })
}

/// `Accept-Charset` and `Accept-Language`: a token plus an optional `q`.
fn parse_simple(header: &str) -> Vec<Accepted> {
    header
        .split(',')
        .enumerate()
        .filter_map(|(index, entry)| {
            let mut parts = entry.split(';');
            let value = parts.next()?.trim();
            if value.is_empty() || value.contains(char::is_whitespace) {
                return None;
            }
            let q = parts
                .filter_map(|p| p.split_once('='))
                .find(|(k, _)| k.trim() == "q")
                .map_or(1.0, |(_, v)| parse_quality(v.trim()));
            Some(Accepted { value: value.to_owned(), q, index, params: Vec::new() })
        })
        .collect()
}

/// Like [`parse_simple`], plus an implicit `identity` entry when the header
/// does not mention it (or `*`), ranked at the lowest non-zero quality seen.
fn parse_encodings(header: &str) -> Vec<Accepted> {
    let mut accepted = parse_simple(header);
    let has_identity = accepted
        .iter()
        .any(|a| a.value.eq_ignore_ascii_case("identity") || a.value == "*");
    if !has_identity {
        let min_q = accepted
            .iter()
            .map(|a| if a.q > 0.0 { a.q } else { 1.0 })
            .fold(1.0_f32, f32::min);
        accepted.push(Accepted {
            value: "identity".to_owned(),
            q: min_q,
            index: accepted.len(),
            params: Vec::new(),
        });
    }
    accepted
}

fn parse_quality(value: &str) -> f32 {
    value.parse::<f32>().ok().filter(|q| q.is_finite()).unwrap_or(0.0)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_owned()
}

/// Splits on `sep`, ignoring separators inside double quotes.
fn split_quoted(input: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                out.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&input[start..]);
    out
}
