//! Date and HTTP-grammar token lexer (spec.md §4.A).
//!
//! Parses RFC 850, RFC 1123, and asctime dates and implements the three
//! small lexers used to walk HTTP header grammars: LWS (RFC 2616 §2.2),
//! token (RFC 2616 §2.2), and Coded-URL (RFC 2518 §9.4). Grounded on
//! `DateBytesToTime`/`SkipLWS`/`SkipToken`/`SkipCodedURL` in
//! `examples/original_source/mount.tproj/webdav_network.c`.

use chrono::{DateTime, TimeZone, Utc};

/// `separators` from RFC 2616 §2.2, plus the two CTLs (0-31, 127).
const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={} \t";

fn is_ctl(b: u8) -> bool {
    b <= 31 || b == 127
}

fn is_token_char(b: u8) -> bool {
    !is_ctl(b) && !SEPARATORS.contains(&b)
}

/// Returns the byte offset of the first character that is not part of a
/// `token`, or `bytes.len()` if the whole remainder is a token.
pub fn skip_token(bytes: &[u8]) -> usize {
    let mut i = 0;
    while i < bytes.len() && is_token_char(bytes[i]) {
        i += 1;
    }
    i
}

/// Returns the byte offset of the first non-LWS character, per
/// `LWS = [CRLF] 1*( SP | HT )`. A bare CRLF not followed by SP/HT is left
/// unconsumed, matching the original's `SkipLWS`.
pub fn skip_lws(bytes: &[u8]) -> usize {
    let mut i = 0;
    loop {
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b' ' | b'\t' => {
                i += 1;
                continue;
            }
            b'\x0d' if bytes.get(i + 1) == Some(&b'\x0a')
                && matches!(bytes.get(i + 2), Some(b' ') | Some(b'\t')) =>
            {
                i += 3;
                continue;
            }
            _ => break,
        }
    }
    i
}

/// Returns the byte offset of the terminating `>` of a `Coded-URL =
/// "<" absoluteURI ">"`, given `bytes` positioned just after the opening
/// `<`. Returns `bytes.len()` if no `>` is found before the end.
pub fn skip_coded_url(bytes: &[u8]) -> usize {
    let mut i = 0;
    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    i
}

/// Parses an RFC 850, RFC 1123, or asctime date. Unlike the C original
/// (which delegates to `_CFGregorianDateCreateWithBytes`), this walks the
/// three documented formats explicitly since no single chrono format string
/// covers all three.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    // RFC 1123: "Sun, 06 Nov 1994 08:49:37 GMT"
    if let Ok(dt) = DateTime::parse_from_rfc2822(&normalize_for_rfc2822(s)) {
        return Some(dt.with_timezone(&Utc));
    }
    // RFC 850: "Sunday, 06-Nov-94 08:49:37 GMT"
    if let Some(dt) = parse_rfc850(s) {
        return Some(dt);
    }
    // asctime: "Sun Nov  6 08:49:37 1994"
    if let Some(dt) = parse_asctime(s) {
        return Some(dt);
    }
    None
}

/// `chrono::DateTime::parse_from_rfc2822` is strict about the weekday
/// separator and trailing zone; substitute a bare `UTC`/`GMT` suffix for
/// the numeric offset form it expects.
fn normalize_for_rfc2822(s: &str) -> String {
    if let Some(prefix) = s.strip_suffix("GMT") {
        format!("{}+0000", prefix.trim_end())
    } else if let Some(prefix) = s.strip_suffix("UTC") {
        format!("{}+0000", prefix.trim_end())
    } else {
        s.to_string()
    }
}

fn parse_rfc850(s: &str) -> Option<DateTime<Utc>> {
    // "Weekday, DD-Mon-YY HH:MM:SS GMT"
    let body = s.split_once(", ")?.1;
    let (date_part, rest) = body.split_once(' ')?;
    let (time_part, _zone) = rest.split_once(' ')?;
    let (day, rest) = date_part.split_once('-')?;
    let (mon, yy) = rest.split_once('-')?;
    let day: u32 = day.parse().ok()?;
    let month = month_number(mon)?;
    let yy: i32 = yy.parse().ok()?;
    // RFC 850 two-digit years: the original's CFGregorianDate handling
    // treats the cutover the same way POSIX `strptime` does.
    let year = if yy < 70 { 2000 + yy } else { 1900 + yy };
    let (h, m, sec) = parse_hms(time_part)?;
    Utc.with_ymd_and_hms(year, month, day, h, m, sec).single()
}

fn parse_asctime(s: &str) -> Option<DateTime<Utc>> {
    // "Weekday Mon DD HH:MM:SS YYYY" (day may be space-padded)
    let mut parts = s.split_whitespace();
    let _weekday = parts.next()?;
    let mon = parts.next()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let time_part = parts.next()?;
    let year: i32 = parts.next()?.parse().ok()?;
    let month = month_number(mon)?;
    let (h, m, sec) = parse_hms(time_part)?;
    Utc.with_ymd_and_hms(year, month, day, h, m, sec).single()
}

fn parse_hms(s: &str) -> Option<(u32, u32, u32)> {
    let mut it = s.splitn(3, ':');
    let h: u32 = it.next()?.parse().ok()?;
    let m: u32 = it.next()?.parse().ok()?;
    let sec: u32 = it.next()?.parse().ok()?;
    Some((h, m, sec))
}

fn month_number(mon: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| m.eq_ignore_ascii_case(mon)).map(|i| i as u32 + 1)
}

/// Formats a time as an RFC 1123 date string, always in GMT, matching
/// `CFStringCreateRFC2616DateStringWithTimeT`.
pub fn format_rfc1123(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
