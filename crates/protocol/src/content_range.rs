//! `Content-Range` header for chunk submissions.
//!
//! Clients send `bytes <first>-<last>/<total>` where `total` may be `*` when
//! unknown. Internally ranges are half-open, so `bytes 0-5/12` becomes
//! `[0, 6)`. Some clients send `last` as the exclusive end instead
//! (`bytes 6-12/12` for the final six bytes); [`ContentRange::for_payload`]
//! accepts both forms by measuring the payload.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;
use crate::types::ByteRange;

const UNIT_PREFIX: &str = "bytes ";

/// A parsed `Content-Range` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset (inclusive).
    pub start: u64,
    /// One past the last byte offset (exclusive).
    pub end: u64,
    /// Declared total size of the upload, if given.
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn new(start: u64, end: u64, total: Option<u64>) -> Self {
        Self { start, end, total }
    }

    /// Parses a header value such as `bytes 0-5/13`, reading `last` as
    /// inclusive.
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let (first, last, total) = fields(value)?;
        let end = last
            .checked_add(1)
            .ok_or_else(|| ProtocolError::InvalidContentRange(value.to_string()))?;
        Self::bounded(value, first, end, total)
    }

    /// Parses a header value for a chunk of `payload_len` bytes.
    ///
    /// The chunk spans `[first, first + payload_len)`. `last` must name either
    /// the final byte of that span or the offset just past it.
    pub fn for_payload(value: &str, payload_len: u64) -> Result<Self, ProtocolError> {
        let (first, last, total) = fields(value)?;
        if payload_len == 0 {
            return Err(ProtocolError::InvalidContentRange(format!(
                "{value}: empty chunk"
            )));
        }
        let end = first
            .checked_add(payload_len)
            .ok_or_else(|| ProtocolError::InvalidContentRange(value.to_string()))?;
        if last != end - 1 && last != end {
            return Err(ProtocolError::InvalidContentRange(format!(
                "{value}: range does not match a {payload_len}-byte payload"
            )));
        }
        Self::bounded(value, first, end, total)
    }

    fn bounded(
        value: &str,
        start: u64,
        end: u64,
        total: Option<u64>,
    ) -> Result<Self, ProtocolError> {
        if let Some(total) = total
            && end > total
        {
            return Err(ProtocolError::InvalidContentRange(format!(
                "{value}: range exceeds declared total"
            )));
        }
        Ok(Self { start, end, total })
    }

    /// The half-open byte range this header describes.
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.start, self.end)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Splits `bytes <first>-<last>/<total>` into its numbers.
fn fields(value: &str) -> Result<(u64, u64, Option<u64>), ProtocolError> {
    let malformed = || ProtocolError::InvalidContentRange(value.to_string());

    let rest = value.trim().strip_prefix(UNIT_PREFIX).ok_or_else(malformed)?;
    let (span, total) = rest.split_once('/').ok_or_else(malformed)?;
    let (first, last) = span.split_once('-').ok_or_else(malformed)?;

    let first: u64 = first.trim().parse().map_err(|_| malformed())?;
    let last: u64 = last.trim().parse().map_err(|_| malformed())?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().map_err(|_| malformed())?),
    };

    if last < first {
        return Err(ProtocolError::InvalidContentRange(format!(
            "{value}: last byte precedes first byte"
        )));
    }
    Ok((first, last, total))
}

impl FromStr for ContentRange {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.end.saturating_sub(1);
        match self.total {
            Some(total) => write!(f, "{UNIT_PREFIX}{}-{last}/{total}", self.start),
            None => write!(f, "{UNIT_PREFIX}{}-{last}/*", self.start),
        }
    }
}
