//! Deterministic scoring and grading.

/// Finding counters feeding the overall score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub console_errors: usize,
    pub network_failures: usize,
    pub ui_errors: usize,
    pub security_issues: usize,
    pub accessibility_violations: usize,
    pub slow_endpoints: usize,
}

/// Compute the production readiness score.
///
/// Deductions, each capped:
/// console errors −2 each (max −20), network failures −3 each (max −20),
/// UI errors −4 each (max −20), security issues −3 each (max −20),
/// accessibility violations −1 each (max −10), slow endpoints −1 each
/// (max −10). Base 100, clamped at 0.
pub fn calculate_score(inputs: ScoreInputs) -> u8 {
    let mut score: i64 = 100;

    score -= (inputs.console_errors as i64 * 2).min(20);
    score -= (inputs.network_failures as i64 * 3).min(20);
    score -= (inputs.ui_errors as i64 * 4).min(20);
    score -= (inputs.security_issues as i64 * 3).min(20);
    score -= (inputs.accessibility_violations as i64).min(10);
    score -= (inputs.slow_endpoints as i64).min(10);

    score.clamp(0, 100) as u8
}

/// Letter grade for a score.
pub fn grade(score: u8) -> &'static str {
    match score {
        90..=100 => "A",
        80..=89 => "B",
        70..=79 => "C",
        60..=69 => "D",
        _ => "F",
    }
}
