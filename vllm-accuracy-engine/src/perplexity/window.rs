//! Token windows sent to the server, one request per window

use crate::error::EvalError;

type Result<T> = crate::error::Result<T>;

/// Half-open token range `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub begin: usize,
    pub end: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Non-overlapping chunks of `chunk_size` tokens; the last one may be short.
pub fn fixed_chunks(seq_len: usize, chunk_size: usize) -> Result<Vec<Window>> {
    if chunk_size == 0 {
        return Err(EvalError::Config("chunk size must be positive".into()));
    }
    Ok((0..seq_len.div_ceil(chunk_size))
        .map(|i| Window {
            begin: i * chunk_size,
            end: ((i + 1) * chunk_size).min(seq_len),
        })
        .collect())
}

/// Overlapping windows of up to `max_length` tokens starting every `stride`.
///
/// Every start position is returned, including those after the first window
/// that reaches the end of the sequence: if that window fails, the runner
/// falls through to the next one that also covers the tail.
pub fn sliding_windows(seq_len: usize, max_length: usize, stride: usize) -> Result<Vec<Window>> {
    if max_length == 0 {
        return Err(EvalError::Config("max length must be positive".into()));
    }
    if stride == 0 {
        return Err(EvalError::Config("stride must be positive".into()));
    }
    Ok((0..seq_len)
        .step_by(stride)
        .map(|begin| Window {
            begin,
            end: (begin + max_length).min(seq_len),
        })
        .collect())
}

/// Number of windows a fully successful sliding run sends: up to and
/// including the first one that reaches the end of the sequence.
pub fn expected_sliding_requests(windows: &[Window], seq_len: usize) -> usize {
    windows
        .iter()
        .position(|w| w.end == seq_len)
        .map_or(windows.len(), |i| i + 1)
}
