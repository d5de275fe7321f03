/// Line tokenizer for the performance-log parsers.
///
/// Every supported input format is strictly line-oriented, so the tokenizer
/// is a pure function of one physical line and a delimiter rule.  What we
/// guarantee:
///
///  - an empty (or all-whitespace) line produces an empty field list
///  - the tokenizer never fails; malformed quoting degrades to taking the
///    rest of the field verbatim, and arity problems are left for the caller
///    to detect
///  - fields are trimmed of surrounding whitespace and one pair of double
///    quotes; a doubled double-quote inside a quoted field collapses to one
///  - a single trailing separator does not produce a trailing empty field
///    (several tools emit `v1,v2,` at end of line)
///
/// The comma rule borrows its quoting semantics from CSV: quotes and commas
/// are allowed inside quoted fields, newlines are not (they cannot occur,
/// the input is one line).
use regex::Regex;
use std::borrow::Cow;

pub enum Delimiter {
    /// Comma-separated with CSV-style quoting (NMON, Perfmon, ESXTop,
    /// JMeter, HATJ).
    Comma,
    /// Semicolon-separated, no quoting (FIO).
    Semicolon,
    /// Runs of whitespace (IOStat data rows, ZPool-iostat).
    Whitespace,
    /// Runs of whitespace, with a trailing colon stripped from each field
    /// (IOStat section headers such as `avg-cpu:` and `Device:`).
    ColonWhitespace,
    /// An arbitrary compiled pattern.  The pattern is owned by the rule, not
    /// shared mutable state, so the rule is freely reusable across calls.
    Pattern(Regex),
}

pub fn tokenize<'a>(line: &'a str, delim: &Delimiter) -> Vec<Cow<'a, str>> {
    if line.trim().is_empty() {
        return vec![];
    }
    match delim {
        Delimiter::Comma => split_quoted(line, b','),
        Delimiter::Semicolon => split_quoted(line, b';'),
        Delimiter::Whitespace => line.split_whitespace().map(Cow::Borrowed).collect(),
        Delimiter::ColonWhitespace => line
            .split_whitespace()
            .map(|f| Cow::Borrowed(f.trim_end_matches(':')))
            .collect(),
        Delimiter::Pattern(re) => {
            let mut fields: Vec<Cow<'a, str>> = re
                .split(line.trim())
                .map(|f| Cow::Borrowed(clean_field(f)))
                .collect();
            while fields.last().map_or(false, |f| f.is_empty()) {
                fields.pop();
            }
            fields
        }
    }
}

// Trim whitespace, then one matching pair of double quotes.

fn clean_field(f: &str) -> &str {
    let f = f.trim();
    if f.len() >= 2 && f.starts_with('"') && f.ends_with('"') {
        &f[1..f.len() - 1]
    } else {
        f
    }
}

// Separator-split with CSV quoting.  The common path borrows from the line;
// only fields containing a doubled quote allocate.

fn split_quoted(line: &str, sep: u8) -> Vec<Cow<'_, str>> {
    let bytes = line.as_bytes();
    let n = bytes.len();
    let mut fields: Vec<Cow<'_, str>> = vec![];
    let mut i = 0;
    loop {
        // One field per iteration, starting at i.
        while i < n && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i < n && bytes[i] == b'"' {
            i += 1;
            let start = i;
            let mut owned: Option<String> = None;
            let mut seg = start;
            let end;
            loop {
                if i >= n {
                    // Unterminated quote: take the rest verbatim.
                    end = n;
                    break;
                }
                if bytes[i] == b'"' {
                    if i + 1 < n && bytes[i + 1] == b'"' {
                        // Doubled quote, collapse into the owned copy.
                        let buf = owned.get_or_insert_with(String::new);
                        buf.push_str(&line[seg..i + 1]);
                        i += 2;
                        seg = i;
                    } else {
                        end = i;
                        i += 1;
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            match owned {
                Some(mut buf) => {
                    buf.push_str(&line[seg..end]);
                    fields.push(Cow::Owned(buf));
                }
                None => fields.push(Cow::Borrowed(&line[start..end])),
            }
            // Skip forward to the next separator; junk after a closing quote
            // is dropped rather than being an error.
            while i < n && bytes[i] != sep {
                i += 1;
            }
        } else {
            let start = i;
            while i < n && bytes[i] != sep {
                i += 1;
            }
            fields.push(Cow::Borrowed(clean_field(&line[start..i])));
        }
        if i >= n {
            break;
        }
        i += 1; // past the separator
        if i == n {
            // Trailing separator at end of line: strip it.
            break;
        }
    }
    fields
}

#[test]
fn test_tokenize_comma() {
    let fs = tokenize("CPU_ALL,T0001,10.0,5.0,3.0,", &Delimiter::Comma);
    assert_eq!(fs, vec!["CPU_ALL", "T0001", "10.0", "5.0", "3.0"]);
    let fs = tokenize(r#""a","b,c","d""e",f"#, &Delimiter::Comma);
    assert_eq!(fs, vec!["a", "b,c", "d\"e", "f"]);
    let fs = tokenize("a,,b", &Delimiter::Comma);
    assert_eq!(fs, vec!["a", "", "b"]);
    assert!(tokenize("", &Delimiter::Comma).is_empty());
    assert!(tokenize("   ", &Delimiter::Comma).is_empty());
}

#[test]
fn test_tokenize_comma_unterminated() {
    // Malformed quoting never errors, the rest of the line becomes the field.
    let fs = tokenize(r#"a,"bc"#, &Delimiter::Comma);
    assert_eq!(fs, vec!["a", "bc"]);
}

#[test]
fn test_tokenize_whitespace() {
    let fs = tokenize("  sda   1.0  2.0\t3.0 ", &Delimiter::Whitespace);
    assert_eq!(fs, vec!["sda", "1.0", "2.0", "3.0"]);
    let fs = tokenize("avg-cpu:  %user   %nice", &Delimiter::ColonWhitespace);
    assert_eq!(fs, vec!["avg-cpu", "%user", "%nice"]);
}

#[test]
fn test_tokenize_pattern() {
    let re = Regex::new(r"\s*\|\s*").unwrap();
    let fs = tokenize("a | b|c ", &Delimiter::Pattern(re));
    assert_eq!(fs, vec!["a", "b", "c"]);
}

#[test]
fn test_tokenize_semicolon() {
    let fs = tokenize("3;fio-3.1;job1;0;", &Delimiter::Semicolon);
    assert_eq!(fs, vec!["3", "fio-3.1", "job1", "0"]);
}
