//! Final score aggregation over completed reviews.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the scores of several reviewers combine into one final score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    #[default]
    Average,
    Min,
    Max,
}

impl ScoringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Average => "average",
            ScoringMethod::Min => "min",
            ScoringMethod::Max => "max",
        }
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoringMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "average" => Ok(ScoringMethod::Average),
            "min" => Ok(ScoringMethod::Min),
            "max" => Ok(ScoringMethod::Max),
            _ => Err(format!("unknown scoring method: {}", s)),
        }
    }
}

/// Combine reviewer scores. Returns `None` when there is nothing to combine.
pub fn calculate_final_score(scores: &[f64], method: ScoringMethod) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let score = match method {
        ScoringMethod::Average => scores.iter().sum::<f64>() / scores.len() as f64,
        ScoringMethod::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
        ScoringMethod::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_three_reviewers() {
        let scores = [0.6, 0.8, 1.0];
        let avg = calculate_final_score(&scores, ScoringMethod::Average).unwrap();
        assert!(approx_eq(avg, 0.8), "average was {}", avg);
        assert_eq!(calculate_final_score(&scores, ScoringMethod::Min), Some(0.6));
        assert_eq!(calculate_final_score(&scores, ScoringMethod::Max), Some(1.0));
    }

    #[test]
    fn test_empty_scores() {
        assert_eq!(calculate_final_score(&[], ScoringMethod::Average), None);
        assert_eq!(calculate_final_score(&[], ScoringMethod::Min), None);
    }

    #[test]
    fn test_single_score_is_identity() {
        for method in [ScoringMethod::Average, ScoringMethod::Min, ScoringMethod::Max] {
            assert_eq!(calculate_final_score(&[7.5], method), Some(7.5));
        }
    }

    #[test]
    fn test_parse_and_default() {
        assert_eq!(ScoringMethod::default(), ScoringMethod::Average);
        assert_eq!("MAX".parse::<ScoringMethod>(), Ok(ScoringMethod::Max));
        assert!("median".parse::<ScoringMethod>().is_err());
        assert_eq!(
            serde_json::to_string(&ScoringMethod::Min).unwrap(),
            "\"min\""
        );
    }

    proptest! {
        /// The combined score always lies between the lowest and highest input.
        #[test]
        fn final_score_is_bounded(scores in proptest::collection::vec(-100.0f64..100.0, 1..20)) {
            let lo = scores.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for method in [ScoringMethod::Average, ScoringMethod::Min, ScoringMethod::Max] {
                let score = calculate_final_score(&scores, method).unwrap();
                prop_assert!(score >= lo - 1e-9 && score <= hi + 1e-9);
            }
        }
    }
}
