// Frame sampling: decides which decode-order indices survive subsampling.
//
// Extraction and masking both consult the same `FrameInterval` value; neither
// stage derives its own.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Step between kept frames. Built by `compute_interval` or restored from a
/// persisted sampling record; never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct FrameInterval(usize);

impl FrameInterval {
    pub const EVERY_FRAME: Self = Self(1);

    pub fn get(self) -> usize {
        self.0
    }

    pub fn is_kept(self, index: usize) -> bool {
        is_kept(index, self)
    }
}

impl TryFrom<usize> for FrameInterval {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value == 0 {
            Err("frame interval must be at least 1".to_string())
        } else {
            Ok(Self(value))
        }
    }
}

impl From<FrameInterval> for usize {
    fn from(interval: FrameInterval) -> Self {
        interval.0
    }
}

impl std::fmt::Display for FrameInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejects a target rate that can never be valid, independent of any source.
pub fn validate_target(target_fps: Option<f64>) -> PipelineResult<()> {
    match target_fps {
        Some(t) if !t.is_finite() || t <= 0.0 => Err(PipelineError::InvalidTarget(t)),
        _ => Ok(()),
    }
}

/// Computes the keep-every-Nth step for a source/target frame rate pair.
///
/// Halfway quotients round to even (25 fps sampled at 10 fps keeps every 2nd frame).
pub fn compute_interval(source_fps: f64, target_fps: Option<f64>) -> PipelineResult<FrameInterval> {
    if !source_fps.is_finite() || source_fps <= 0.0 {
        return Err(PipelineError::InvalidSource(source_fps));
    }
    validate_target(target_fps)?;

    let interval = match target_fps {
        None => return Ok(FrameInterval::EVERY_FRAME),
        Some(target) if target >= source_fps => 1,
        Some(target) => ((source_fps / target).round_ties_even() as usize).max(1),
    };

    Ok(FrameInterval(interval))
}

pub fn is_kept(index: usize, interval: FrameInterval) -> bool {
    index % interval.0 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subsampling_keeps_every_frame() {
        assert_eq!(compute_interval(30.0, None).unwrap().get(), 1);
        assert_eq!(compute_interval(30.0, Some(30.0)).unwrap().get(), 1);
        assert_eq!(compute_interval(30.0, Some(60.0)).unwrap().get(), 1);
        assert_eq!(compute_interval(240.0, Some(240.0)).unwrap().get(), 1);
    }

    #[test]
    fn test_subsampling_rounds_the_quotient() {
        assert_eq!(compute_interval(240.0, Some(2.0)).unwrap().get(), 120);
        assert_eq!(compute_interval(30.0, Some(2.0)).unwrap().get(), 15);
        assert_eq!(compute_interval(29.97, Some(10.0)).unwrap().get(), 3);
        // Ties go to even
        assert_eq!(compute_interval(25.0, Some(10.0)).unwrap().get(), 2);
        assert_eq!(compute_interval(35.0, Some(10.0)).unwrap().get(), 4);
        // Just below the source rate never yields zero
        assert_eq!(compute_interval(30.0, Some(29.0)).unwrap().get(), 1);
    }

    #[test]
    fn test_invalid_rates_are_rejected() {
        assert!(matches!(
            compute_interval(0.0, Some(2.0)),
            Err(PipelineError::InvalidSource(_))
        ));
        assert!(matches!(
            compute_interval(f64::NAN, None),
            Err(PipelineError::InvalidSource(_))
        ));
        assert!(matches!(
            compute_interval(30.0, Some(0.0)),
            Err(PipelineError::InvalidTarget(_))
        ));
        assert!(matches!(
            compute_interval(30.0, Some(-5.0)),
            Err(PipelineError::InvalidTarget(_))
        ));
        assert!(validate_target(None).is_ok());
        assert!(validate_target(Some(-1.0)).is_err());
    }

    #[test]
    fn test_is_kept_selects_multiples() {
        let interval = compute_interval(30.0, Some(10.0)).unwrap();
        let kept: Vec<usize> = (0..10).filter(|i| interval.is_kept(*i)).collect();
        assert_eq!(kept, vec![0, 3, 6, 9]);

        // Order independent: evaluating in reverse gives the same set
        let mut reversed: Vec<usize> = (0..10).rev().filter(|i| is_kept(*i, interval)).collect();
        reversed.sort_unstable();
        assert_eq!(reversed, kept);
    }

    #[test]
    fn test_interval_serializes_as_plain_number() {
        let interval = compute_interval(60.0, Some(20.0)).unwrap();
        assert_eq!(serde_json::to_string(&interval).unwrap(), "3");
        let back: FrameInterval = serde_json::from_str("3").unwrap();
        assert_eq!(back, interval);
        assert!(serde_json::from_str::<FrameInterval>("0").is_err());
    }
}
