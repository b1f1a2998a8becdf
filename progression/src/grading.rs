//! Answer grading.
//!
//! Numeric answers are normalized through [`parse_numeric`] before comparison
//! so `"3/4"`, `"0.75"`, and `" 3/4 "` all grade identically. Comparison is
//! epsilon-guarded: without an explicit tolerance a tiny float-safety margin
//! applies, never a user-visible one.
//!
//! The canonical answer (and the MCQ correct index) must never reach the
//! client before grading; any client-side preview feedback is cosmetic and the
//! authoritative score is recomputed server-side from the canonical set.

use serde::{Deserialize, Serialize};

/// Float-safety margin for exact (tolerance-free) comparison.
const EXACT_EPSILON: f64 = 1e-10;

/// Guard added on top of an explicit tolerance so a value exactly at the
/// boundary is never rejected by float noise.
const TOLERANCE_GUARD: f64 = 1e-9;

/// Why a numeric grade came back incorrect without a value comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeError {
    /// User or canonical answer was absent
    MissingAnswer,
    /// User or canonical answer failed to parse
    InvalidFormat,
}

/// Result of grading a numeric answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericGrade {
    /// Whether the submitted value matched the canonical one
    pub correct: bool,
    /// Parsed user value, when it parsed
    pub user_value: Option<f64>,
    /// Parsed canonical value, when it parsed
    pub correct_value: Option<f64>,
    /// Error tag when grading short-circuited
    pub error: Option<GradeError>,
}

/// Parse a numeric answer string.
///
/// Accepts signed decimals (`"-2.5"`), simple fractions (`"3/4"`), and mixed
/// fractions (`"1 1/2"`, with a leading sign applying to the whole value).
/// Returns `None` on empty input, trailing garbage, zero denominators, and
/// non-finite values.
pub fn parse_numeric(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed).trim_start()),
    };
    if body.is_empty() {
        return None;
    }

    let magnitude = if let Some((whole, frac)) = body.split_once(|c: char| c.is_whitespace()) {
        // Mixed fraction: integer whole part followed by a simple fraction
        let whole = whole.parse::<u64>().ok()?;
        whole as f64 + parse_fraction(frac.trim())?
    } else if body.contains('/') {
        parse_fraction(body)?
    } else {
        let value = body.parse::<f64>().ok()?;
        if !value.is_finite() {
            return None;
        }
        value
    };

    Some(if negative { -magnitude } else { magnitude })
}

/// Parse a simple fraction `a/b` with integer parts and a nonzero denominator.
fn parse_fraction(input: &str) -> Option<f64> {
    let (numerator, denominator) = input.split_once('/')?;
    let numerator = numerator.trim().parse::<u64>().ok()?;
    let denominator = denominator.trim().parse::<u64>().ok()?;
    if denominator == 0 {
        return None;
    }
    Some(numerator as f64 / denominator as f64)
}

/// Grade a numeric answer against the canonical one.
///
/// With no tolerance, the values must match within [`EXACT_EPSILON`]. With a
/// tolerance, a difference of exactly the tolerance passes and anything beyond
/// it fails.
pub fn grade_numeric(
    user: Option<&str>,
    canonical: Option<&str>,
    tolerance: Option<f64>,
) -> NumericGrade {
    let (user, canonical) = match (user, canonical) {
        (Some(u), Some(c)) => (u, c),
        _ => {
            return NumericGrade {
                correct: false,
                user_value: None,
                correct_value: None,
                error: Some(GradeError::MissingAnswer),
            }
        }
    };

    let user_value = parse_numeric(user);
    let correct_value = parse_numeric(canonical);

    let (u, c) = match (user_value, correct_value) {
        (Some(u), Some(c)) => (u, c),
        // Surface whichever side did parse for diagnostics
        _ => {
            return NumericGrade {
                correct: false,
                user_value,
                correct_value,
                error: Some(GradeError::InvalidFormat),
            }
        }
    };

    let allowed = match tolerance {
        Some(t) => t + TOLERANCE_GUARD,
        None => EXACT_EPSILON,
    };

    NumericGrade {
        correct: (u - c).abs() <= allowed,
        user_value: Some(u),
        correct_value: Some(c),
        error: None,
    }
}

/// Grade a multiple-choice answer by index equality.
pub fn grade_mcq(submitted: usize, correct_index: usize) -> bool {
    submitted == correct_index
}
