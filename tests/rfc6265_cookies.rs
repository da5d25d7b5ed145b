//! RFC 6265 Cookie Compliance Tests
//!
//! https://www.rfc-editor.org/rfc/rfc6265

use chrono::{TimeZone, Utc};
use courier::cookie::{Cookie, CookieJar, MemoryCookieJar};
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[test]
fn test_secure_flag_enforcement_rfc6265_section_5_4() {
    let jar = MemoryCookieJar::new();
    let mut cookie = Cookie::new("secure_cookie", "val", "example.com");
    cookie.secure = true;
    jar.store(cookie);

    // Should NOT be sent to http
    assert!(
        jar.load_for_request(&url("http://example.com/foo")).is_empty(),
        "Secure cookie MUST NOT be sent to http"
    );

    // Should be sent to https
    assert_eq!(
        jar.load_for_request(&url("https://example.com/foo")).len(),
        1,
        "Secure cookie SHOULD be sent to https"
    );
}

#[test]
fn test_cookie_parsing_rfc6265_section_5_2() {
    // 5.2.1.  The Set-Cookie Header Field
    let origin = url("http://example.com/test");

    let c = Cookie::parse("SID=31d4d96e407aad42", &origin).unwrap();
    assert_eq!(c.name, "SID");
    assert_eq!(c.value, "31d4d96e407aad42");
    assert_eq!(c.domain, "example.com");
    assert!(c.host_only);
    // RFC 6265 5.1.4: Default path for /test is /.
    assert_eq!(c.path, "/");

    let c = Cookie::parse(
        "SID=31d4d96e407aad42; Path=/; Domain=.Example.com; Secure; HttpOnly; SameSite=Lax",
        &origin,
    )
    .unwrap();
    assert_eq!(c.path, "/");
    assert_eq!(c.domain, "example.com");
    assert!(!c.host_only);
    assert!(c.secure);
    assert!(c.http_only);
    assert_eq!(c.same_site.as_deref(), Some("Lax"));
    assert_eq!(c.to_string(), "SID=31d4d96e407aad42");
}

#[test]
fn test_malformed_set_cookie_rejected() {
    let origin = url("http://example.com/");
    assert!(Cookie::parse("no-equals-sign", &origin).is_err());
    assert!(Cookie::parse("=value", &origin).is_err());
}

#[test]
fn test_foreign_domain_rejected_rfc6265_section_5_3() {
    let origin = url("http://example.com/");
    assert!(Cookie::parse("a=b; Domain=example.org", &origin).is_err());
    assert!(Cookie::parse("a=b; Domain=ample.com", &origin).is_err());

    let sub = url("http://www.example.com/");
    let c = Cookie::parse("a=b; Domain=example.com", &sub).unwrap();
    assert_eq!(c.domain, "example.com");
}

#[test]
fn test_date_formats_rfc6265_section_5_1_1() {
    let origin = url("http://example.com");
    let expected = Utc.timestamp_opt(784111777, 0).unwrap();

    // RFC 1123
    let c = Cookie::parse("a=b; Expires=Sun, 06 Nov 1994 08:49:37 GMT", &origin).unwrap();
    assert_eq!(c.expires.unwrap(), expected);

    // RFC 850
    let c = Cookie::parse("a=b; Expires=Sunday, 06-Nov-94 08:49:37 GMT", &origin).unwrap();
    assert_eq!(c.expires.unwrap(), expected);
    assert!(c.is_expired());
}

#[test]
fn test_max_age_overrides_expires_rfc6265_section_5_3() {
    let origin = url("http://example.com/");
    let c = Cookie::parse(
        "a=b; Expires=Sun, 06 Nov 1994 08:49:37 GMT; Max-Age=3600",
        &origin,
    )
    .unwrap();
    assert!(!c.is_expired());
    assert!(c.expires.unwrap() > Utc::now());
}

#[test]
fn test_domain_matching_rfc6265_section_5_1_3() {
    let c = Cookie::new("a", "b", "example.com");
    assert!(c.matches(&url("http://example.com/")));
    assert!(c.matches(&url("http://foo.example.com/")));
    assert!(!c.matches(&url("http://example.org/")));
    assert!(!c.matches(&url("http://badexample.com/")));

    // Host-only cookies match their origin exactly.
    let host_only = Cookie::parse("a=b", &url("http://example.com/")).unwrap();
    assert!(host_only.matches(&url("http://example.com/")));
    assert!(!host_only.matches(&url("http://foo.example.com/")));
}

#[test]
fn test_path_matching_rfc6265_section_5_1_4() {
    let mut c = Cookie::new("a", "b", "example.com");
    c.path = "/foo".to_string();

    assert!(c.matches(&url("http://example.com/foo")));
    assert!(c.matches(&url("http://example.com/foo/bar")));
    assert!(c.matches(&url("http://example.com/foo/")));

    assert!(!c.matches(&url("http://example.com/bar")));
    // Partial prefix but not a directory component
    assert!(!c.matches(&url("http://example.com/fo")));
    assert!(!c.matches(&url("http://example.com/foobar")));
}

#[test]
fn test_cookie_jar_ordering_rfc6265_section_5_4() {
    let jar = MemoryCookieJar::new();
    let origin = url("http://example.com/foo");

    let received = vec![
        Cookie::parse("SID=456; Path=/", &origin).unwrap(),
        Cookie::parse("SID=123; Path=/foo", &origin).unwrap(),
    ];
    jar.save_from_response(&origin, received);
    assert_eq!(jar.len(), 2);

    // Most specific path first (RFC 6265 5.4.2)
    let sent: Vec<String> = jar
        .load_for_request(&origin)
        .iter()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(sent, vec!["SID=123", "SID=456"]);
}

#[test]
fn test_cookie_replacement_and_deletion_rfc6265_section_5_3() {
    let jar = MemoryCookieJar::new();
    let origin = url("http://example.com/");

    jar.store(Cookie::parse("theme=light", &origin).unwrap());
    jar.store(Cookie::parse("theme=dark", &origin).unwrap());
    assert_eq!(jar.len(), 1);
    assert_eq!(jar.get("example.com", "theme").unwrap().value, "dark");

    // An expiry in the past removes the stored cookie.
    jar.store(Cookie::parse("theme=gone; Expires=Sun, 06 Nov 1994 08:49:37 GMT", &origin).unwrap());
    assert!(jar.is_empty());
    assert!(jar.load_for_request(&origin).is_empty());
}
