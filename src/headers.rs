//! Header multimap helpers.
//!
//! Headers are carried in [`http::HeaderMap`]: names compare
//! case-insensitively and every value of a name keeps its arrival order.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

/// Build a header map from raw `(name, value)` fields, appending values so
/// repeated names keep their multiplicity and order.
pub fn merge_fields<I, N, V>(fields: I) -> Result<HeaderMap>
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: AsRef<[u8]>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in fields {
        let name = name.as_ref();
        if name.is_empty() {
            // Status-line pseudo entries carry no name.
            continue;
        }
        headers.append(parse_name(name)?, parse_value(value.as_ref())?);
    }
    Ok(headers)
}

/// Parse a header name, rejecting anything that is not an RFC 9110 token.
pub fn parse_name(name: &str) -> Result<HeaderName> {
    validate_header_name(name)?;
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::http_protocol(format!("Invalid header name {:?}: {}", name, e)))
}

/// Parse a header value, rejecting CR, LF and NUL.
pub fn parse_value(value: &[u8]) -> Result<HeaderValue> {
    if value.iter().any(|&b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::http_protocol(
            "Invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    HeaderValue::from_bytes(value)
        .map_err(|e| Error::http_protocol(format!("Invalid header value: {}", e)))
}

/// First value of `name` as a string, if present and visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Whether any value of a comma-separated header contains `token`
/// (case-insensitive), e.g. `Connection: close`.
pub fn has_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Declared Content-Length, or `None` when absent.
///
/// Multiple values must all be identical.
pub fn content_length(headers: &HeaderMap) -> Result<Option<u64>> {
    let mut declared: Option<u64> = None;
    for value in headers.get_all(http::header::CONTENT_LENGTH) {
        let text = value
            .to_str()
            .map_err(|_| Error::http_protocol("Non-ASCII Content-Length"))?;
        let parsed = parse_content_length(text)?;
        match declared {
            Some(prev) if prev != parsed => {
                return Err(Error::http_protocol(format!(
                    "Conflicting Content-Length values: {} and {}",
                    prev, parsed
                )));
            }
            _ => declared = Some(parsed),
        }
    }
    Ok(declared)
}

/// Parse and validate a Content-Length header value.
pub fn parse_content_length(value: &str) -> Result<u64> {
    let mut parts = value.split(',').map(str::trim);
    let first = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::http_protocol("Empty Content-Length"))?;
    let first = first
        .parse::<u64>()
        .map_err(|_| Error::http_protocol(format!("Invalid Content-Length: {}", value)))?;

    for part in parts {
        let val = part
            .parse::<u64>()
            .map_err(|_| Error::http_protocol(format!("Invalid Content-Length: {}", value)))?;
        if val != first {
            return Err(Error::http_protocol(format!(
                "Conflicting Content-Length values: {}",
                value
            )));
        }
    }

    Ok(first)
}

/// Validate a header name per RFC 9110 Section 5.1.
pub fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::http_protocol("Empty header name"));
    }
    if let Some(bad) = name.bytes().find(|&b| !is_tchar(b)) {
        return Err(Error::http_protocol(format!(
            "Invalid character {:?} in header name: {:?}",
            bad as char, name
        )));
    }
    Ok(())
}

/// Check if a byte is a valid token character per RFC 9110.
fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}
