//! Post-session circuit breaker.

use memcurate_state::Threshold;

/// Result of comparing retained core mass against the owner's threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakerVerdict {
    /// Nothing to protect: the store had no core mass before the session.
    Skipped,
    Held { ratio: f64 },
    /// Net retained mass fell below the threshold; the session must roll back.
    Tripped { ratio: f64 },
}

impl BreakerVerdict {
    pub fn ratio(&self) -> Option<f64> {
        match self {
            BreakerVerdict::Skipped => None,
            BreakerVerdict::Held { ratio } | BreakerVerdict::Tripped { ratio } => Some(*ratio),
        }
    }

    pub fn is_tripped(&self) -> bool {
        matches!(self, BreakerVerdict::Tripped { .. })
    }
}

pub fn evaluate(pre_session_mass: u64, post_session_mass: u64, threshold: Threshold) -> BreakerVerdict {
    if pre_session_mass == 0 {
        return BreakerVerdict::Skipped;
    }
    let ratio = post_session_mass as f64 / pre_session_mass as f64;
    if ratio < threshold.value() {
        BreakerVerdict::Tripped { ratio }
    } else {
        BreakerVerdict::Held { ratio }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(v: f64) -> Threshold {
        Threshold::new(v).unwrap()
    }

    #[test]
    fn empty_store_skips() {
        assert_eq!(evaluate(0, 500, t(0.75)), BreakerVerdict::Skipped);
        assert_eq!(evaluate(0, 0, t(1.0)), BreakerVerdict::Skipped);
    }

    #[test]
    fn small_deletion_holds() {
        let v = evaluate(1000, 950, t(0.75));
        assert_eq!(v, BreakerVerdict::Held { ratio: 0.95 });
        assert!(!v.is_tripped());
    }

    #[test]
    fn ratio_equal_to_threshold_holds() {
        assert!(!evaluate(100, 75, t(0.75)).is_tripped());
        assert!(evaluate(100, 74, t(0.75)).is_tripped());
    }

    #[test]
    fn full_threshold_trips_on_any_loss() {
        assert!(evaluate(1000, 999, t(1.0)).is_tripped());
        assert!(!evaluate(1000, 1000, t(1.0)).is_tripped());
        assert!(!evaluate(1000, 1200, t(1.0)).is_tripped());
    }

    #[test]
    fn tiny_threshold_only_trips_on_total_loss() {
        assert!(!evaluate(1000, 1, t(1e-9)).is_tripped());
        assert!(evaluate(1000, 0, t(1e-9)).is_tripped());
    }
}
