//! Pure conversions from transport header/cookie/body representations into
//! the HAR name/value forms.
//!
//! Every function here works item by item: one malformed header, cookie or
//! parameter is skipped (or degraded to an empty value) without affecting
//! the rest.

use chrono::{DateTime, Utc};
use http::header::{COOKIE, SET_COOKIE};
use http::HeaderMap;
use url::Url;

use crate::har::{format_timestamp, Cookie, Header, PostParam, QueryParam};

/// The header shapes a transport may hand us.
#[derive(Debug, Clone, Copy)]
pub enum HeaderSource<'a> {
    /// `[name, value, name, value, ...]` as read off the wire.
    Flat(&'a [String]),
    /// One value per name.
    Single(&'a [(String, String)]),
    /// Several values per name.
    Multi(&'a [(String, Vec<String>)]),
    Map(&'a HeaderMap),
}

/// Canonical ordered header list, keeping repeated names as separate
/// entries.
pub fn build_headers(source: HeaderSource<'_>) -> Vec<Header> {
    match source {
        HeaderSource::Flat(raw) => raw
            .chunks(2)
            .map(|pair| {
                let value = pair.get(1).cloned().unwrap_or_default();
                Header::new(pair[0].clone(), value)
            })
            .collect(),
        HeaderSource::Single(pairs) => pairs
            .iter()
            .map(|(name, value)| Header::new(name.clone(), value.clone()))
            .collect(),
        HeaderSource::Multi(pairs) => pairs
            .iter()
            .flat_map(|(name, values)| {
                values
                    .iter()
                    .map(move |value| Header::new(name.clone(), value.clone()))
            })
            .collect(),
        HeaderSource::Map(map) => map
            .iter()
            .map(|(name, value)| {
                Header::new(
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    }
}

pub fn header_value(headers: &HeaderMap, name: impl http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Cookies sent by the client, from every `Cookie` header.
pub fn request_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = split_cookie_pair(pair)?;
            Some(Cookie {
                name: name.to_string(),
                value: value.to_string(),
                ..Cookie::default()
            })
        })
        .collect()
}

/// Cookies set by the server, one per `Set-Cookie` header. Malformed
/// cookies are dropped.
pub fn response_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

/// Parse one `Set-Cookie` value. Returns `None` when the name/value pair is
/// unusable.
pub fn parse_set_cookie(raw: &str) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let (name, value) = split_cookie_pair(parts.next()?)?;

    let mut cookie = Cookie {
        name: name.to_string(),
        value: value.to_string(),
        ..Cookie::default()
    };

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), Some(val.trim())),
            None => (attribute.trim(), None),
        };
        match (key.to_ascii_lowercase().as_str(), val) {
            ("path", Some(path)) => cookie.path = Some(path.to_string()),
            ("domain", Some(domain)) => {
                cookie.domain = Some(domain.trim_start_matches('.').to_string())
            }
            ("expires", Some(expires)) => cookie.expires = parse_cookie_date(expires),
            ("httponly", _) => cookie.http_only = Some(true),
            ("secure", _) => cookie.secure = Some(true),
            _ => {}
        }
    }

    Some(cookie)
}

fn split_cookie_pair(pair: &str) -> Option<(&str, &str)> {
    let (name, value) = pair.trim().split_once('=')?;
    let name = name.trim();
    if !is_cookie_name(name) {
        return None;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((name, value))
}

fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}

fn parse_cookie_date(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|at| format_timestamp(at.with_timezone(&Utc)))
}

pub fn query_string(url: &Url) -> Vec<QueryParam> {
    url.query_pairs()
        .map(|(name, value)| QueryParam {
            name: name.into_owned(),
            value: value.into_owned(),
        })
        .collect()
}

/// Decompose an `application/x-www-form-urlencoded` body.
pub fn form_params(body: &[u8]) -> Vec<PostParam> {
    url::form_urlencoded::parse(body)
        .map(|(name, value)| PostParam {
            name: name.into_owned(),
            value: Some(value.into_owned()),
            ..PostParam::default()
        })
        .collect()
}

pub fn is_form_urlencoded(mime_type: &str) -> bool {
    mime_type
        .split(';')
        .next()
        .map(|essence| {
            essence
                .trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}
