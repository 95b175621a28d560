//! Netscape cookie file parser and reqwest jar loader.
//!
//! Institutional proxy sessions authenticate with cookies provisioned
//! outside this tool. The cookie file (Netscape format, 7 TAB-separated
//! fields per line) is loaded once at startup into the fetcher's shared
//! `reqwest::cookie::Jar`; the jar then attaches matching cookies to every
//! request for the session's domains.

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use reqwest::cookie::Jar;
use tracing::{debug, info, instrument, warn};

/// A single parsed cookie from a Netscape-format cookie file.
///
/// The value field is intentionally redacted in Debug output to prevent
/// accidental logging of sensitive session data.
#[derive(Clone)]
pub struct CookieLine {
    /// The domain the cookie belongs to (e.g., `.proxy.example.edu`).
    pub domain: String,
    /// Whether subdomains should match.
    pub tailmatch: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Unix timestamp for expiry (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive; never log).
    value: String,
}

impl CookieLine {
    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Errors that can occur while loading a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// I/O error reading the cookie file.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// No valid cookies found in a non-empty file.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Result of parsing a cookie file: parsed cookies plus warnings about
/// malformed lines (partial success).
#[derive(Debug)]
pub struct CookieParseResult {
    /// Successfully parsed cookies.
    pub cookies: Vec<CookieLine>,
    /// Warnings for malformed lines (line number and reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file from a buffered reader.
///
/// Each non-comment, non-blank line must contain exactly 7 TAB-separated
/// fields: `domain`, `tailmatch`, `path`, `secure`, `expires`, `name`,
/// `value`. Lines starting with `#` and blank lines are skipped.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or
/// [`CookieError::NoCookiesFound`] when a non-empty file yields zero valid
/// cookies. Individual malformed lines are collected as warnings.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<CookieParseResult, CookieError> {
    let mut cookies = Vec::new();
    let mut warnings = Vec::new();
    let mut non_blank_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim_end();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        non_blank_lines += 1;

        match parse_cookie_line(line) {
            Ok(cookie) => {
                debug!(line = line_number, domain = %cookie.domain, name = %cookie.name, "parsed cookie");
                cookies.push(cookie);
            }
            Err(reason) => {
                warn!(line = line_number, reason = %reason, "skipping malformed cookie line");
                warnings.push((line_number, reason));
            }
        }
    }

    if cookies.is_empty() && non_blank_lines > 0 {
        return Err(CookieError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(CookieParseResult { cookies, warnings })
}

/// Parses a single cookie line. The error string never contains the value.
fn parse_cookie_line(line: &str) -> Result<CookieLine, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return Err(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        ));
    }

    let parse_bool = |value: &str, name: &str| match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(format!("{name} field must be TRUE or FALSE, got '{other}'")),
    };

    let domain = fields[0].to_string();
    if domain.is_empty() {
        return Err("domain field is empty".to_string());
    }
    let tailmatch = parse_bool(fields[1], "tailmatch")?;
    let path = fields[2].to_string();
    let secure = parse_bool(fields[3], "secure")?;
    let expires = fields[4]
        .parse::<u64>()
        .map_err(|_| format!("expires field must be a non-negative integer, got '{}'", fields[4]))?;
    let name = fields[5].to_string();
    if name.is_empty() {
        return Err("cookie name field is empty".to_string());
    }

    Ok(CookieLine {
        domain,
        tailmatch,
        path,
        secure,
        expires,
        name,
        value: fields[6].to_string(),
    })
}

/// Loads parsed cookies into a `reqwest::cookie::Jar`.
///
/// Each cookie is converted to a `Set-Cookie` header string and added to the
/// jar with an origin URL built from its domain, so reqwest's domain/path
/// matching applies on every request.
#[instrument(level = "debug", skip(cookies))]
#[must_use]
pub fn load_cookies_into_jar(cookies: &[CookieLine]) -> Arc<Jar> {
    let jar = Arc::new(Jar::default());

    for cookie in cookies {
        let mut parts = vec![
            format!("{}={}", cookie.name, cookie.value()),
            format!("Domain={}", cookie.domain),
            format!("Path={}", cookie.path),
        ];
        if cookie.secure {
            parts.push("Secure".to_string());
        }
        if cookie.expires > 0
            && let Some(expires) = unix_to_http_date(cookie.expires)
        {
            parts.push(format!("Expires={expires}"));
        }
        let set_cookie = parts.join("; ");

        let scheme = if cookie.secure { "https" } else { "http" };
        let origin = format!("{scheme}://{}/", cookie.domain.trim_start_matches('.'));
        if let Ok(url) = origin.parse::<url::Url>() {
            jar.add_cookie_str(&set_cookie, &url);
        } else {
            warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unparseable domain");
        }
    }

    jar
}

/// Loads a cookie jar from a Netscape-format file on disk.
///
/// # Errors
///
/// Returns [`CookieError`] when the file cannot be read or contains no valid
/// cookies.
#[instrument(fields(path = %path.display()))]
pub fn load_cookie_jar(path: &Path) -> Result<Arc<Jar>, CookieError> {
    let file = std::fs::File::open(path)?;
    let parsed = parse_netscape_cookies(std::io::BufReader::new(file))?;

    let domains: std::collections::HashSet<&str> = parsed
        .cookies
        .iter()
        .map(|cookie| cookie.domain.as_str())
        .collect();
    info!(
        count = parsed.cookies.len(),
        domains = domains.len(),
        "loaded institutional session cookies"
    );

    Ok(load_cookies_into_jar(&parsed.cookies))
}

/// Converts a Unix timestamp to an HTTP-date string, `None` on overflow.
fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::{Duration, UNIX_EPOCH};
    let when = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(when))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const VALID_LINE: &str =
        ".proxy.example.edu\tTRUE\t/\tTRUE\t2147483647\tsession\tsecret-token";

    #[test]
    fn test_parse_valid_cookie_line() {
        let result = parse_netscape_cookies(Cursor::new(VALID_LINE)).unwrap();
        assert_eq!(result.cookies.len(), 1);
        assert!(result.warnings.is_empty());
        let cookie = &result.cookies[0];
        assert_eq!(cookie.domain, ".proxy.example.edu");
        assert!(cookie.tailmatch);
        assert!(cookie.secure);
        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value(), "secret-token");
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let input = format!("# Netscape HTTP Cookie File\n\n{VALID_LINE}\n");
        let result = parse_netscape_cookies(Cursor::new(input)).unwrap();
        assert_eq!(result.cookies.len(), 1);
    }

    #[test]
    fn test_parse_collects_warnings_for_malformed_lines() {
        let input = format!("bad line without tabs\n{VALID_LINE}\n");
        let result = parse_netscape_cookies(Cursor::new(input)).unwrap();
        assert_eq!(result.cookies.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].0, 1);
    }

    #[test]
    fn test_parse_all_malformed_is_error() {
        let err = parse_netscape_cookies(Cursor::new("garbage\nmore garbage\n")).unwrap_err();
        assert!(matches!(
            err,
            CookieError::NoCookiesFound { malformed_count: 2 }
        ));
    }

    #[test]
    fn test_parse_empty_file_is_ok() {
        let result = parse_netscape_cookies(Cursor::new("")).unwrap();
        assert!(result.cookies.is_empty());
    }

    #[test]
    fn test_debug_redacts_value() {
        let result = parse_netscape_cookies(Cursor::new(VALID_LINE)).unwrap();
        let debug = format!("{:?}", result.cookies[0]);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_malformed_line_warning_never_contains_value() {
        // 8 fields: malformed, but carries a secret in the last field.
        let input = ".d\tTRUE\t/\tTRUE\t0\tname\tsecret\textra";
        let result = parse_netscape_cookies(Cursor::new(format!("{input}\n{VALID_LINE}")));
        let result = result.unwrap();
        assert!(!result.warnings[0].1.contains("secret"));
    }

    #[test]
    fn test_load_cookie_jar_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, VALID_LINE.as_bytes()).unwrap();
        let jar = load_cookie_jar(file.path());
        assert!(jar.is_ok());
    }

    #[test]
    fn test_load_cookie_jar_missing_file_is_io_error() {
        let err = load_cookie_jar(Path::new("/nonexistent/cookies.txt")).unwrap_err();
        assert!(matches!(err, CookieError::Io(_)));
    }
}
