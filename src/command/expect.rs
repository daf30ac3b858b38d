//! Response expectations: exact literals or `scanf`-like field patterns.
//!
//! Pattern directives:
//! - `%d` signed decimal integer, `%Nd` at most `N` digits
//! - `%s` run of non-whitespace, `%Ns` at most `N` bytes
//! - `%[^c]` run of bytes other than `c`
//! - `%*…` parse but do not store
//! - `%%` a literal `%`
//!
//! A space in the pattern matches any amount of whitespace, including none.
//! Every other byte must match exactly. Text after the last directive is not
//! checked once all fields have been parsed.

use core::ops::Range;

use heapless::Vec;

use super::line::ResponseLine;
use crate::error::Error;

/// Most fields a single pattern may declare.
pub const MAX_FIELDS: usize = 4;

/// What the next response line must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation<'a> {
    Literal(&'a str),
    Fields(&'a str),
}

pub const OK: Expectation<'static> = Expectation::Literal("OK");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i64),
    Str(Range<usize>),
}

/// Successful match: the line and the fields extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures {
    line: ResponseLine,
    fields: Vec<Field, MAX_FIELDS>,
}

impl Captures {
    pub fn line(&self) -> &ResponseLine {
        &self.line
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn int(&self, idx: usize) -> Option<i64> {
        match self.fields.get(idx)? {
            Field::Int(v) => Some(*v),
            Field::Str(_) => None,
        }
    }

    pub fn str(&self, idx: usize) -> Option<&str> {
        match self.fields.get(idx)? {
            Field::Str(range) => core::str::from_utf8(&self.line.as_bytes()[range.clone()]).ok(),
            Field::Int(_) => None,
        }
    }
}

impl Expectation<'_> {
    pub fn matches(&self, line: ResponseLine) -> Result<Captures, Error> {
        let fields = match self {
            Self::Literal(lit) if line.as_bytes() == lit.as_bytes() => Vec::new(),
            Self::Literal(_) => return Err(Error::Mismatch),
            Self::Fields(pattern) => scan(pattern.as_bytes(), line.as_bytes())?,
        };
        Ok(Captures { line, fields })
    }
}

fn declared_fields(pattern: &[u8]) -> usize {
    let mut count = 0;
    let mut p = 0;
    while p < pattern.len() {
        if pattern[p] == b'%' {
            match pattern.get(p + 1) {
                Some(b'%') => p += 1,
                Some(b'*') => {}
                Some(_) => count += 1,
                None => {}
            }
        }
        p += 1;
    }
    count
}

fn skip_whitespace(input: &[u8], mut i: usize) -> usize {
    while input.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
        i += 1;
    }
    i
}

fn scan_int(input: &[u8], start: usize, width: usize) -> Option<(i64, usize)> {
    let mut i = start;
    let negative = match input.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };
    let digits_start = i;
    let mut value: i64 = 0;
    while let Some(d) = input.get(i).filter(|b| b.is_ascii_digit()) {
        if width > 0 && i - start >= width {
            break;
        }
        value = value.checked_mul(10)?.checked_add((d - b'0') as i64)?;
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    Some((if negative { -value } else { value }, i))
}

fn scan_until(input: &[u8], start: usize, width: usize, stop: impl Fn(u8) -> bool) -> Option<usize> {
    let mut i = start;
    while input.get(i).is_some_and(|b| !stop(*b)) {
        if width > 0 && i - start >= width {
            break;
        }
        i += 1;
    }
    (i > start).then_some(i)
}

/// Extract the fields of `pattern` from `input`. Fails unless every declared
/// field could be parsed.
fn scan(pattern: &[u8], input: &[u8]) -> Result<Vec<Field, MAX_FIELDS>, Error> {
    let declared = declared_fields(pattern);
    if declared == 0 || declared > MAX_FIELDS {
        debug_assert!(false, "pattern must declare 1 to {} fields", MAX_FIELDS);
        return Err(Error::Mismatch);
    }

    let mut fields = Vec::new();
    let (mut p, mut i) = (0, 0);

    while p < pattern.len() && fields.len() < declared {
        let c = pattern[p];
        if c.is_ascii_whitespace() {
            i = skip_whitespace(input, i);
            p += 1;
            continue;
        }
        if c != b'%' || pattern.get(p + 1) == Some(&b'%') {
            if input.get(i) != Some(&c) {
                break;
            }
            p += if c == b'%' { 2 } else { 1 };
            i += 1;
            continue;
        }

        p += 1;
        let suppress = pattern.get(p) == Some(&b'*');
        if suppress {
            p += 1;
        }
        let mut width = 0;
        while let Some(d) = pattern.get(p).filter(|b| b.is_ascii_digit()) {
            width = width * 10 + (d - b'0') as usize;
            p += 1;
        }

        let field = match pattern.get(p) {
            Some(b'd') => {
                p += 1;
                let start = skip_whitespace(input, i);
                let Some((value, end)) = scan_int(input, start, width) else {
                    break;
                };
                i = end;
                Field::Int(value)
            }
            Some(b's') => {
                p += 1;
                let start = skip_whitespace(input, i);
                let Some(end) = scan_until(input, start, width, |b| b.is_ascii_whitespace()) else {
                    break;
                };
                i = end;
                Field::Str(start..end)
            }
            Some(b'[') if pattern.get(p + 1) == Some(&b'^') && pattern.get(p + 3) == Some(&b']') => {
                let stop = pattern[p + 2];
                p += 4;
                let Some(end) = scan_until(input, i, width, |b| b == stop) else {
                    break;
                };
                let start = i;
                i = end;
                Field::Str(start..end)
            }
            _ => {
                debug_assert!(false, "unsupported pattern directive");
                return Err(Error::Mismatch);
            }
        };

        if !suppress {
            // Cannot overflow: `declared` is bounded by MAX_FIELDS.
            fields.push(field).map_err(|_| Error::Mismatch)?;
        }
    }

    if fields.len() == declared {
        Ok(fields)
    } else {
        Err(Error::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pattern: &str, line: &str) -> Result<Captures, Error> {
        Expectation::Fields(pattern).matches(ResponseLine::from(line))
    }

    #[test]
    fn literal_is_exact() {
        assert!(OK.matches(ResponseLine::from("OK")).is_ok());
        assert_eq!(OK.matches(ResponseLine::from("OK ")), Err(Error::Mismatch));
        assert_eq!(
            OK.matches(ResponseLine::from("ERROR")),
            Err(Error::Mismatch)
        );
    }

    #[test]
    fn signal_quality() {
        let caps = fields("+CSQ: %d,%d", "+CSQ: 15,99").unwrap();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps.int(0), Some(15));
        assert_eq!(caps.int(1), Some(99));
        assert_eq!(caps.str(0), None);
    }

    #[test]
    fn missing_field_fails_whole_match() {
        assert_eq!(fields("+CSQ: %d,%d", "+CSQ: 15"), Err(Error::Mismatch));
        assert_eq!(fields("+CSQ: %d,%d", "+CSQ: ,0"), Err(Error::Mismatch));
        assert_eq!(fields("+CREG: 0,%d", "+CREG: 1,1"), Err(Error::Mismatch));
    }

    #[test]
    fn suppressed_fields_are_not_counted() {
        let caps = fields("+CIPRXGET: 2,%*d,%d,%d", "+CIPRXGET: 2,0,128,64").unwrap();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps.int(0), Some(128));
        assert_eq!(caps.int(1), Some(64));
    }

    #[test]
    fn quoted_string_and_ip_address() {
        let caps = fields("+COPS: %*d,%*d,\"%[^\"]\"", "+COPS: 0,0,\"Bee Line GSM\"").unwrap();
        assert_eq!(caps.str(0), Some("Bee Line GSM"));

        let caps = fields("+SAPBR: 1,1,\"%d.%d.%d.%d\"", "+SAPBR: 1,1,\"10.64.3.201\"").unwrap();
        assert_eq!(caps.int(0), Some(10));
        assert_eq!(caps.int(3), Some(201));
    }

    #[test]
    fn widths_split_adjacent_fields() {
        let caps = fields(
            "+CCLK: \"%8s,%8s%3s\"",
            "+CCLK: \"26/10/16,09:41:07+12\"",
        )
        .unwrap();
        assert_eq!(caps.str(0), Some("26/10/16"));
        assert_eq!(caps.str(1), Some("09:41:07"));
        assert_eq!(caps.str(2), Some("+12"));
    }

    #[test]
    fn negative_and_trailing_text() {
        let caps = fields("+CBC: %d,%d,%d", "+CBC: 0,87,4102 extra").unwrap();
        assert_eq!(caps.int(2), Some(4102));
        let caps = fields("%d", "-17").unwrap();
        assert_eq!(caps.int(0), Some(-17));
        let caps = fields("%s", "10.0.0.7").unwrap();
        assert_eq!(caps.str(0), Some("10.0.0.7"));
    }
}
