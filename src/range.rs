//! Single byte-range parsing (RFC 7233 subset)

/// Inclusive byte span within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes in the span, never zero
    pub fn span_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a 206 response
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Result of evaluating a `Range` header against a file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable range: serve the whole body with 200
    Full,
    /// Serve this span with 206
    Partial(ByteRange),
    /// Syntactically valid but outside the file: 416
    Unsatisfiable,
}

/// Evaluate a `Range` header value for a file of `size` bytes
///
/// Malformed headers, other units and multi-range requests are ignored
/// (full response), as a server may do.
pub fn evaluate(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(value) = header else {
        return RangeOutcome::Full;
    };
    let Some(set) = value.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if set.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = set.trim().split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: last N bytes
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeOutcome::Full,
        }
    };

    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }

    let end = end.map_or(size - 1, |end| end.min(size - 1));
    RangeOutcome::Partial(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_header_is_full() {
        assert_eq!(evaluate(None, 100), RangeOutcome::Full);
    }

    #[test]
    fn test_closed_range() {
        assert_eq!(
            evaluate(Some("bytes=0-9"), 100),
            RangeOutcome::Partial(ByteRange { start: 0, end: 9 })
        );
        assert_eq!(
            evaluate(Some("bytes=10-19"), 100),
            RangeOutcome::Partial(ByteRange { start: 10, end: 19 })
        );
    }

    #[test]
    fn test_open_ended_range() {
        assert_eq!(
            evaluate(Some("bytes=90-"), 100),
            RangeOutcome::Partial(ByteRange { start: 90, end: 99 })
        );
    }

    #[test]
    fn test_end_is_clamped_to_file() {
        assert_eq!(
            evaluate(Some("bytes=50-5000"), 100),
            RangeOutcome::Partial(ByteRange { start: 50, end: 99 })
        );
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(
            evaluate(Some("bytes=-10"), 100),
            RangeOutcome::Partial(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(
            evaluate(Some("bytes=-500"), 100),
            RangeOutcome::Partial(ByteRange { start: 0, end: 99 })
        );
        assert_eq!(evaluate(Some("bytes=-0"), 100), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_start_past_end_of_file() {
        assert_eq!(evaluate(Some("bytes=9999999-"), 100), RangeOutcome::Unsatisfiable);
        assert_eq!(evaluate(Some("bytes=100-200"), 100), RangeOutcome::Unsatisfiable);
        assert_eq!(evaluate(Some("bytes=0-"), 0), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_ignored_headers() {
        assert_eq!(evaluate(Some("items=0-5"), 100), RangeOutcome::Full);
        assert_eq!(evaluate(Some("bytes=0-5,10-20"), 100), RangeOutcome::Full);
        assert_eq!(evaluate(Some("bytes=abc-"), 100), RangeOutcome::Full);
        assert_eq!(evaluate(Some("bytes=20-10"), 100), RangeOutcome::Full);
    }

    #[test]
    fn test_content_range_header() {
        let range = ByteRange { start: 10, end: 19 };
        assert_eq!(range.span_len(), 10);
        assert_eq!(range.content_range(100), "bytes 10-19/100");
    }
}
