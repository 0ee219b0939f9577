//! Batch size limits.
//!
//! A batch up to the nominal `max` is always fine. Up to `ceil(max * 1.1)` is
//! tolerated with a warning. Near the end of a chunk, when no more than
//! `2 * max` paragraphs remain unsubmitted, the ceiling rises to `2 * max` so
//! the model can finish in one call instead of leaving a tiny trailing batch.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuotaDecision {
    Accepted,
    /// Over the nominal size but within the tolerated ceiling.
    AcceptedWithWarning { received: usize, max: usize },
}

impl QuotaDecision {
    pub fn warning(&self) -> Option<String> {
        match self {
            QuotaDecision::Accepted => None,
            QuotaDecision::AcceptedWithWarning { received, max } => Some(format!(
                "batch of {received} paragraphs exceeds the recommended size of {max}; keep later batches at or below {max}"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub received: usize,
    pub allowed: usize,
}

/// `ceil(max * 1.1)` in integer arithmetic.
pub fn tolerated_ceiling(max: usize) -> usize {
    (max * 11).div_ceil(10)
}

/// Remaining unsubmitted paragraphs of a chunk, measured before the current batch.
pub fn remaining_in_chunk(chunk_size: usize, submitted: usize) -> usize {
    chunk_size.saturating_sub(submitted)
}

/// Hard ceiling for one batch. `remaining` is `None` when no chunk size is known.
pub fn batch_ceiling(max: usize, remaining: Option<usize>) -> usize {
    let tolerated = tolerated_ceiling(max);
    match remaining {
        Some(remaining) if remaining <= 2 * max => tolerated.max(2 * max),
        _ => tolerated,
    }
}

pub fn check_batch_size(
    received: usize,
    max: usize,
    remaining: Option<usize>,
) -> Result<QuotaDecision, QuotaExceeded> {
    if received <= max {
        return Ok(QuotaDecision::Accepted);
    }
    let allowed = batch_ceiling(max, remaining);
    if received <= allowed {
        Ok(QuotaDecision::AcceptedWithWarning { received, max })
    } else {
        Err(QuotaExceeded { received, allowed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerated_ceiling_rounds_up_without_float_error() {
        assert_eq!(tolerated_ceiling(10), 11);
        assert_eq!(tolerated_ceiling(20), 22);
        assert_eq!(tolerated_ceiling(5), 6);
        assert_eq!(tolerated_ceiling(1), 2);
    }

    #[test]
    fn at_or_below_max_is_plainly_accepted() {
        assert_eq!(check_batch_size(10, 10, None), Ok(QuotaDecision::Accepted));
        assert_eq!(check_batch_size(1, 10, Some(100)), Ok(QuotaDecision::Accepted));
    }

    #[test]
    fn one_over_max_warns_when_tolerance_allows() {
        let decision = check_batch_size(11, 10, Some(100)).unwrap();
        assert_eq!(
            decision,
            QuotaDecision::AcceptedWithWarning {
                received: 11,
                max: 10
            }
        );
        assert!(decision.warning().unwrap().contains("11"));
    }

    #[test]
    fn over_tolerance_is_rejected_mid_chunk() {
        assert_eq!(
            check_batch_size(12, 10, Some(100)),
            Err(QuotaExceeded {
                received: 12,
                allowed: 11
            })
        );
    }

    #[test]
    fn tail_of_chunk_allows_double() {
        assert!(check_batch_size(20, 10, Some(20)).is_ok());
        assert!(check_batch_size(20, 10, Some(15)).is_ok());
        assert_eq!(
            check_batch_size(20, 10, Some(21)),
            Err(QuotaExceeded {
                received: 20,
                allowed: 11
            })
        );
    }

    #[test]
    fn triple_max_is_always_rejected() {
        assert_eq!(
            check_batch_size(30, 10, Some(100)),
            Err(QuotaExceeded {
                received: 30,
                allowed: 11
            })
        );
        assert_eq!(
            check_batch_size(30, 10, Some(20)),
            Err(QuotaExceeded {
                received: 30,
                allowed: 20
            })
        );
    }

    #[test]
    fn unknown_chunk_size_uses_tolerance_only() {
        assert_eq!(batch_ceiling(10, None), 11);
        assert_eq!(batch_ceiling(10, Some(0)), 20);
    }

    #[test]
    fn remaining_saturates() {
        assert_eq!(remaining_in_chunk(10, 4), 6);
        assert_eq!(remaining_in_chunk(3, 5), 0);
    }
}
