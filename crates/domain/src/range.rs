use thiserror::Error;

/// An inclusive byte range resolved against a concrete file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("unsupported range unit")]
    UnsupportedUnit,
    #[error("multiple ranges are not supported")]
    MultipleRanges,
    #[error("malformed range: {0}")]
    Malformed(String),
    #[error("range not satisfiable for size {0}")]
    OutOfBounds(u64),
}

/// Parses a single `Range` header value (`bytes=start-end`, `bytes=start-`
/// or `bytes=-suffix`) against a file of `size` bytes.
pub fn parse_byte_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::UnsupportedUnit)?;
    if spec.contains(',') {
        return Err(RangeError::MultipleRanges);
    }

    let (start_raw, end_raw) = spec
        .split_once('-')
        .ok_or_else(|| RangeError::Malformed(spec.to_string()))?;
    let start_raw = start_raw.trim();
    let end_raw = end_raw.trim();

    if size == 0 {
        return Err(RangeError::OutOfBounds(size));
    }

    if start_raw.is_empty() {
        let suffix = parse_offset(end_raw)?;
        if suffix == 0 {
            return Err(RangeError::OutOfBounds(size));
        }
        let suffix = suffix.min(size);
        return Ok(ByteRange {
            start: size - suffix,
            end: size - 1,
        });
    }

    let start = parse_offset(start_raw)?;
    let end = if end_raw.is_empty() {
        size - 1
    } else {
        parse_offset(end_raw)?
    };

    if start > end || end >= size {
        return Err(RangeError::OutOfBounds(size));
    }
    Ok(ByteRange { start, end })
}

fn parse_offset(raw: &str) -> Result<u64, RangeError> {
    raw.parse::<u64>()
        .map_err(|_| RangeError::Malformed(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_range_is_inclusive() {
        let range = parse_byte_range("bytes=0-99", 1000).expect("range");
        assert_eq!(range, ByteRange { start: 0, end: 99 });
        assert_eq!(range.len(), 100);
        assert_eq!(range.content_range(1000), "bytes 0-99/1000");
    }

    #[test]
    fn suffix_range_selects_tail() {
        let range = parse_byte_range("bytes=-50", 1000).expect("range");
        assert_eq!(range, ByteRange { start: 950, end: 999 });
    }

    #[test]
    fn oversized_suffix_is_clamped() {
        let range = parse_byte_range("bytes=-5000", 1000).expect("range");
        assert_eq!(range, ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        let range = parse_byte_range("bytes=900-", 1000).expect("range");
        assert_eq!(range, ByteRange { start: 900, end: 999 });
    }

    #[test]
    fn rejects_out_of_bounds_and_malformed() {
        assert_eq!(
            parse_byte_range("bytes=0-1000", 1000),
            Err(RangeError::OutOfBounds(1000))
        );
        assert_eq!(
            parse_byte_range("bytes=50-10", 1000),
            Err(RangeError::OutOfBounds(1000))
        );
        assert!(matches!(
            parse_byte_range("bytes=a-b", 1000),
            Err(RangeError::Malformed(_))
        ));
        assert_eq!(
            parse_byte_range("items=0-1", 1000),
            Err(RangeError::UnsupportedUnit)
        );
        assert_eq!(
            parse_byte_range("bytes=0-1,5-6", 1000),
            Err(RangeError::MultipleRanges)
        );
        assert_eq!(
            parse_byte_range("bytes=-0", 1000),
            Err(RangeError::OutOfBounds(1000))
        );
    }
}
