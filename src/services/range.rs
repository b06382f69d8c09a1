/// Outcome of negotiating a `Range` request header against a known content
/// length. Malformed or multi-range headers fall back to a full response
/// rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve the whole body with a 200.
    Full,
    /// Serve `start..=end` with a 206.
    Partial { start: u64, end: u64 },
    /// The range starts past the end of the body; answer 416.
    Unsatisfiable,
}

pub fn negotiate(header: Option<&str>, length: u64) -> RangeOutcome {
    let Some(raw) = header else {
        return RangeOutcome::Full;
    };
    let Some(byte_range) = raw.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if byte_range.contains(',') {
        return RangeOutcome::Full;
    }
    let byte_range = byte_range.trim();
    let Some((first, last)) = byte_range.split_once('-') else {
        return RangeOutcome::Full;
    };
    if first.is_empty() {
        // suffix form: the last `n` bytes
        let Ok(n) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if n == 0 || length == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let n = n.min(length);
        return RangeOutcome::Partial {
            start: length - n,
            end: length - 1,
        };
    }
    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    if start >= length {
        return RangeOutcome::Unsatisfiable;
    }
    let end = if last.is_empty() {
        length - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(length - 1),
            _ => return RangeOutcome::Full,
        }
    };
    RangeOutcome::Partial { start, end }
}
