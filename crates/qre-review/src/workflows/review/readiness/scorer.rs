use serde::{Deserialize, Serialize};

use super::super::error::ReviewError;

/// Weight of each readiness dimension. Positive integers summing to 100.
pub const DATA_COMPLETENESS_WEIGHT: u32 = 20;
pub const QUESTIONNAIRE_WEIGHT: u32 = 10;
pub const GAPS_RESOLVED_WEIGHT: u32 = 15;
pub const EVIDENCE_COVERAGE_WEIGHT: u32 = 15;
pub const AI_FRESHNESS_WEIGHT: u32 = 10;
pub const AUTOMATED_REVIEW_WEIGHT: u32 = 20;
pub const DECISIONS_LOCKED_WEIGHT: u32 = 10;

/// The seven 0–100 percentages a study's readiness is built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadinessInputs {
    pub data_completeness: f64,
    pub questionnaire_completeness: f64,
    pub gaps_resolved: f64,
    pub evidence_coverage: f64,
    pub ai_evaluation_freshness: f64,
    pub automated_review_resolved: f64,
    pub study_decisions_locked: f64,
}

impl ReadinessInputs {
    pub const fn complete() -> Self {
        Self {
            data_completeness: 100.0,
            questionnaire_completeness: 100.0,
            gaps_resolved: 100.0,
            evidence_coverage: 100.0,
            ai_evaluation_freshness: 100.0,
            automated_review_resolved: 100.0,
            study_decisions_locked: 100.0,
        }
    }

    /// Each dimension with its name and weight, in display order.
    pub fn components(&self) -> [(&'static str, f64, u32); 7] {
        [
            ("data_completeness", self.data_completeness, DATA_COMPLETENESS_WEIGHT),
            (
                "questionnaire_completeness",
                self.questionnaire_completeness,
                QUESTIONNAIRE_WEIGHT,
            ),
            ("gaps_resolved", self.gaps_resolved, GAPS_RESOLVED_WEIGHT),
            ("evidence_coverage", self.evidence_coverage, EVIDENCE_COVERAGE_WEIGHT),
            (
                "ai_evaluation_freshness",
                self.ai_evaluation_freshness,
                AI_FRESHNESS_WEIGHT,
            ),
            (
                "automated_review_resolved",
                self.automated_review_resolved,
                AUTOMATED_REVIEW_WEIGHT,
            ),
            (
                "study_decisions_locked",
                self.study_decisions_locked,
                DECISIONS_LOCKED_WEIGHT,
            ),
        ]
    }

    /// Reject values outside 0–100 or not finite.
    pub fn validate(&self) -> Result<(), ReviewError> {
        for (name, value, _) in self.components() {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ReviewError::validation(format!(
                    "{name} must be a percentage between 0 and 100"
                )));
            }
        }
        Ok(())
    }
}

/// Weighted aggregate of the inputs on a 0–100 scale. Values are clamped into range first.
pub fn score(inputs: &ReadinessInputs) -> f64 {
    let weighted: f64 = inputs
        .components()
        .iter()
        .map(|(_, value, weight)| clamp_pct(*value) * f64::from(*weight))
        .sum();
    weighted / 100.0
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one_hundred() {
        let total: u32 = ReadinessInputs::complete()
            .components()
            .iter()
            .map(|(_, _, weight)| *weight)
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn complete_inputs_score_one_hundred() {
        assert_eq!(score(&ReadinessInputs::complete()), 100.0);
    }

    #[test]
    fn lowering_any_single_input_lowers_the_score() {
        let baseline = ReadinessInputs {
            data_completeness: 70.0,
            questionnaire_completeness: 60.0,
            gaps_resolved: 50.0,
            evidence_coverage: 40.0,
            ai_evaluation_freshness: 90.0,
            automated_review_resolved: 80.0,
            study_decisions_locked: 30.0,
        };
        let base_score = score(&baseline);
        let lowered = [
            ReadinessInputs { data_completeness: 69.0, ..baseline },
            ReadinessInputs { questionnaire_completeness: 59.0, ..baseline },
            ReadinessInputs { gaps_resolved: 49.0, ..baseline },
            ReadinessInputs { evidence_coverage: 39.0, ..baseline },
            ReadinessInputs { ai_evaluation_freshness: 89.0, ..baseline },
            ReadinessInputs { automated_review_resolved: 79.0, ..baseline },
            ReadinessInputs { study_decisions_locked: 29.0, ..baseline },
        ];
        for inputs in lowered {
            assert!(score(&inputs) < base_score, "{inputs:?}");
        }

        let from_complete = ReadinessInputs {
            study_decisions_locked: 99.0,
            ..ReadinessInputs::complete()
        };
        assert!(score(&from_complete) < 100.0);
    }

    #[test]
    fn out_of_range_inputs_are_rejected_and_clamped() {
        let inputs = ReadinessInputs {
            gaps_resolved: 140.0,
            ..ReadinessInputs::complete()
        };
        assert!(matches!(inputs.validate(), Err(ReviewError::Validation(_))));
        assert_eq!(score(&inputs), 100.0);

        let nan = ReadinessInputs {
            evidence_coverage: f64::NAN,
            ..ReadinessInputs::complete()
        };
        assert!(nan.validate().is_err());
        assert_eq!(score(&nan), 85.0);
    }
}
