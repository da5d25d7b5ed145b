//! Answering RFC 9110 authentication challenges (401 and 407).
//!
//! Basic credentials follow RFC 7617.

use std::collections::HashMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// Produces a follow-up request carrying credentials for a 401/407
/// response, or `None` to give up and return the challenge to the caller.
pub trait Authenticator: Send + Sync + fmt::Debug {
    fn authenticate(&self, response: &Response) -> Result<Option<Request>>;
}

/// One challenge from a `WWW-Authenticate` or `Proxy-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

impl Challenge {
    pub fn realm(&self) -> Option<&str> {
        self.params.get("realm").map(String::as_str)
    }
}

/// Challenges of a response, from the header matching its status.
pub fn challenges(response: &Response) -> Vec<Challenge> {
    let header = if response.status() == 407 {
        "Proxy-Authenticate"
    } else {
        "WWW-Authenticate"
    };
    response
        .headers_all(header)
        .into_iter()
        .filter_map(parse_challenge)
        .collect()
}

/// Parse `Scheme key=value, key="value"`.
///
/// Does not handle commas inside quoted strings.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    for part in rest.split(',') {
        if let Some((key, val)) = part.trim().split_once('=') {
            let key = key.trim().to_lowercase();
            let val = val.trim().trim_matches('"');
            params.insert(key, val.to_string());
        }
    }
    Some(Challenge {
        scheme: scheme.to_string(),
        params,
    })
}

/// Generate Basic Auth header value (RFC 7617).
///
/// Returns "Basic " followed by base64-encoded credentials.
pub fn basic_auth(username: &str, password: &str) -> String {
    let plain = format!("{}:{}", username, password);
    let encoded = BASE64.encode(plain);
    format!("Basic {}", encoded)
}

/// Parse a Basic Auth header value.
///
/// Returns (username, password) or None if invalid.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?.trim();
    let decoded_vec = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded_vec).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Answers Basic challenges with fixed credentials.
///
/// Gives up when the rejected request already carried the same
/// credentials, so a wrong password does not loop.
pub struct BasicAuthenticator {
    username: String,
    password: String,
}

impl BasicAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, response: &Response) -> Result<Option<Request>> {
        let header = if response.status() == 407 {
            "Proxy-Authorization"
        } else {
            "Authorization"
        };

        let offers_basic = challenges(response)
            .iter()
            .any(|c| c.scheme.eq_ignore_ascii_case("basic"));
        if !offers_basic {
            return Ok(None);
        }

        let credential = basic_auth(&self.username, &self.password);
        if response.request().header(header) == Some(credential.as_str()) {
            tracing::debug!("Auth: credentials rejected, giving up");
            return Ok(None);
        }

        response
            .request()
            .new_builder()
            .header(header, &credential)
            .build()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseBuilder;

    fn challenge_response(status: u16, header: &str, value: &str) -> Response {
        ResponseBuilder::new(Request::get("http://example.com/private").unwrap())
            .status(status)
            .header(header, value)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_basic_auth_rfc7617() {
        // RFC 7617 Section 2 example
        assert_eq!(
            basic_auth("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
        assert_eq!(
            parse_basic_auth("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="),
            Some(("Aladdin".to_string(), "open sesame".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
    }

    #[test]
    fn test_parse_challenge() {
        let c = parse_challenge(r#"Basic realm="WallyWorld", charset="UTF-8""#).unwrap();
        assert_eq!(c.scheme, "Basic");
        assert_eq!(c.realm(), Some("WallyWorld"));
        assert_eq!(c.params.get("charset").map(String::as_str), Some("UTF-8"));

        let bare = parse_challenge("Negotiate").unwrap();
        assert!(bare.params.is_empty());
    }

    #[test]
    fn test_basic_authenticator_answers_once() {
        let auth = BasicAuthenticator::new("user", "pass");
        let response = challenge_response(401, "WWW-Authenticate", r#"Basic realm="x""#);

        let retry = auth.authenticate(&response).unwrap().unwrap();
        assert_eq!(retry.header("authorization"), Some(basic_auth("user", "pass").as_str()));

        let rejected = ResponseBuilder::new(retry)
            .status(401)
            .header("WWW-Authenticate", r#"Basic realm="x""#)
            .unwrap()
            .build()
            .unwrap();
        assert!(auth.authenticate(&rejected).unwrap().is_none());
    }

    #[test]
    fn test_proxy_challenge_uses_proxy_header() {
        let auth = BasicAuthenticator::new("user", "pass");
        let response = challenge_response(407, "Proxy-Authenticate", "Basic");
        let retry = auth.authenticate(&response).unwrap().unwrap();
        assert!(retry.header("proxy-authorization").is_some());
        assert!(retry.header("authorization").is_none());
    }

    #[test]
    fn test_other_schemes_ignored() {
        let auth = BasicAuthenticator::new("user", "pass");
        let response = challenge_response(401, "WWW-Authenticate", r#"Bearer realm="api""#);
        assert!(auth.authenticate(&response).unwrap().is_none());
    }
}
