//! Thinning of raw sample rows into chart points.

use time::Duration;

/// Anything with an epoch-millisecond timestamp.
pub trait Timestamped {
    fn timestamp_ms(&self) -> i64;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ThinError {
    #[error("sampling must be positive, got {0}")]
    InvalidSampling(Duration),
    #[error("no samples in the requested window")]
    NoData,
}

/// Greedy forward thinning. The first sample is always kept; every later
/// sample is kept only if it is at least `sampling` after the last *kept*
/// one. Order is preserved.
///
/// `interval` is the length of the window the samples were drawn from and
/// only sizes the output buffer. Row spacing in the log is irregular, so the
/// output length can be anything from 1 to `samples.len()`.
pub fn thin<S: Timestamped>(
    samples: Vec<S>,
    interval: Duration,
    sampling: Duration,
) -> Result<Vec<S>, ThinError> {
    if sampling <= Duration::ZERO {
        return Err(ThinError::InvalidSampling(sampling));
    }
    if samples.is_empty() {
        return Err(ThinError::NoData);
    }

    let per_window = interval.whole_milliseconds() / sampling.whole_milliseconds().max(1);
    let capacity = per_window.clamp(1, samples.len() as i128) as usize;

    let mut kept = Vec::with_capacity(capacity);
    let mut last_kept: Option<i64> = None;
    for sample in samples {
        let ts = sample.timestamp_ms();
        let keep = match last_kept {
            None => true,
            Some(prev) => Duration::milliseconds(ts - prev) >= sampling,
        };
        if keep {
            last_kept = Some(ts);
            kept.push(sample);
        }
    }

    Ok(kept)
}

// ===========================================================================
// Tests
// ===========================================================================
