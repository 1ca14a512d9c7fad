//! ENUM (RFC 6116) helpers: query names and NAPTR regexp substitution.

use crate::error::{Error, Result};
use crate::message::TelUri;

/// Maximum number of capture groups handed back by regexp evaluation,
/// the whole match included.
pub const MAX_REGEXP_MATCHES: usize = 10;

/// Application Unique String: `+` followed by the digits of the number.
pub fn application_unique_string(tel: &TelUri) -> String {
    format!("+{}", tel.digits())
}

/// ENUM domain for `tel`: reversed digits, dot separated, then `suffix`.
///
/// `+1-555-0100` with suffix `e164.arpa` gives `0.0.1.0.5.5.5.1.e164.arpa`.
pub fn enum_domain(tel: &TelUri, suffix: &str) -> String {
    let mut labels: Vec<String> = tel.digits().chars().rev().map(String::from).collect();
    let suffix = suffix.trim_matches('.');
    if !suffix.is_empty() {
        labels.push(suffix.to_string());
    }
    labels.join(".")
}

/// Regexp evaluation flags carried in the NAPTR regexp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegexpFlags {
    pub case_insensitive: bool,
}

/// A NAPTR `regexp` field split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptrRegexp {
    pub ere: String,
    pub replacement: String,
    pub flags: RegexpFlags,
}

impl NaptrRegexp {
    /// Splits `!ere!replacement!flags`, using the first character as delimiter.
    pub fn parse(field: &str) -> Result<Self> {
        let mut chars = field.chars();
        let delim = chars
            .next()
            .ok_or_else(|| Error::MalformedUri("empty NAPTR regexp".to_string()))?;
        let mut parts = chars.as_str().splitn(3, delim);
        let ere = parts.next().unwrap_or_default();
        let replacement = parts
            .next()
            .ok_or_else(|| Error::MalformedUri(format!("NAPTR regexp without replacement: {}", field)))?;
        let flags = parts.next().unwrap_or_default();
        if ere.is_empty() {
            return Err(Error::MalformedUri(format!("NAPTR regexp without ERE: {}", field)));
        }
        Ok(NaptrRegexp {
            ere: ere.to_string(),
            replacement: replacement.to_string(),
            flags: RegexpFlags {
                case_insensitive: flags.starts_with('i'),
            },
        })
    }
}

/// Byte offsets of a regexp match. Index 0 is the whole match; unmatched
/// groups are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegexpMatch {
    pub groups: Vec<Option<(usize, usize)>>,
}

impl RegexpMatch {
    pub fn group(&self, index: usize) -> Option<(usize, usize)> {
        self.groups.get(index).copied().flatten()
    }
}

/// Evaluates `ere` against `input` with the `regex` crate.
pub fn apply_regexp(ere: &str, input: &str, flags: RegexpFlags) -> Result<Option<RegexpMatch>> {
    let re = regex::RegexBuilder::new(ere)
        .case_insensitive(flags.case_insensitive)
        .build()
        .map_err(|e| Error::MalformedUri(format!("invalid NAPTR ERE '{}': {}", ere, e)))?;
    Ok(re.captures(input).map(|caps| RegexpMatch {
        groups: (0..MAX_REGEXP_MATCHES)
            .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
            .collect(),
    }))
}

/// Applies `replacement` to `input`, substituting `\1`..`\9`.
///
/// Text of `input` outside the whole match is kept around the replacement.
pub fn substitute(input: &str, replacement: &str, matches: &RegexpMatch) -> Result<String> {
    let (start, end) = matches
        .group(0)
        .ok_or_else(|| Error::MalformedUri("regexp did not match".to_string()))?;
    let slice = |(s, e): (usize, usize)| {
        input
            .get(s..e)
            .ok_or_else(|| Error::MalformedUri(format!("match offsets {}..{} out of range", s, e)))
    };

    let mut out = String::with_capacity(input.len() + replacement.len());
    out.push_str(slice((0, start))?);

    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek().and_then(|d| d.to_digit(10))) {
            ('\\', Some(n)) => {
                chars.next();
                if n == 0 {
                    return Err(Error::MalformedUri("backreference \\0 out of range".to_string()));
                }
                let group = matches
                    .group(n as usize)
                    .ok_or_else(|| Error::MalformedUri(format!("non existing backreference \\{}", n)))?;
                out.push_str(slice(group)?);
            }
            _ => out.push(c),
        }
    }

    out.push_str(slice((end, input.len()))?);
    Ok(out)
}
