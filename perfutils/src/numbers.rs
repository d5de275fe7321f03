/// Numeric field parsing under the engine's sentinel policy.
///
/// The monitoring tools use a number of tokens for "no data here": an empty
/// field, a literal `nan`, a lone `-` (zpool), a single space (Perfmon).
/// All of those map to NaN, which the data model treats as "missing",
/// distinct from zero.  A literal `INF` (FIO emits these for division by a
/// zero elapsed time) maps to positive infinity.  Anything else that fails
/// numeric parse is not a value at all; the caller treats that as a
/// row-level recoverable error.
use std::str::FromStr;

/// Parse one metric field.  Returns Some(NaN) for the "no data" sentinels,
/// Some(±inf) for the infinity tokens, Some(v) for a plain number, and None
/// for garbage.

pub fn parse_metric(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() || t == "-" {
        return Some(f64::NAN);
    }
    if t.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("infinity") {
        return Some(f64::INFINITY);
    }
    if t.eq_ignore_ascii_case("-inf") || t.eq_ignore_ascii_case("-infinity") {
        return Some(f64::NEG_INFINITY);
    }
    f64::from_str(t).ok()
}

/// Parse a value with an optional binary unit suffix, as printed by `zpool
/// iostat`: `1.5K` is 1.5*1024, `3M` is 3*1024^2, and so on.  The sentinel
/// and garbage handling is the same as for `parse_metric`.

pub fn parse_sized(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return Some(f64::NAN);
    }
    let (num, scale) = match t.as_bytes()[t.len() - 1] {
        b'K' | b'k' => (&t[..t.len() - 1], 1024.0),
        b'M' | b'm' => (&t[..t.len() - 1], 1024.0 * 1024.0),
        b'G' | b'g' => (&t[..t.len() - 1], 1024.0 * 1024.0 * 1024.0),
        b'T' | b't' => (&t[..t.len() - 1], 1024.0 * 1024.0 * 1024.0 * 1024.0),
        b'P' | b'p' => (
            &t[..t.len() - 1],
            1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        ),
        _ => (t, 1.0),
    };
    parse_metric(num).map(|v| v * scale)
}

#[test]
fn test_parse_metric() {
    assert!(parse_metric("10.5") == Some(10.5));
    assert!(parse_metric(" -3 ") == Some(-3.0));
    assert!(parse_metric("").unwrap().is_nan());
    assert!(parse_metric(" ").unwrap().is_nan());
    assert!(parse_metric("-").unwrap().is_nan());
    assert!(parse_metric("nan").unwrap().is_nan());
    assert!(parse_metric("NaN").unwrap().is_nan());
    assert!(parse_metric("INF") == Some(f64::INFINITY));
    assert!(parse_metric("-INF") == Some(f64::NEG_INFINITY));
    assert!(parse_metric("bogus").is_none());
    // A literal numeric string round-trips exactly.
    assert!(parse_metric("12345.6789") == Some(12345.6789));
}

#[test]
fn test_parse_sized() {
    assert!(parse_sized("1.5K") == Some(1536.0));
    assert!(parse_sized("2M") == Some(2.0 * 1024.0 * 1024.0));
    assert!(parse_sized("10") == Some(10.0));
    assert!(parse_sized("-").unwrap().is_nan());
    assert!(parse_sized("1.5X").is_none());
}
