//! Validation results and the derived health report.

use serde::Serialize;

/// Outcome of one integrity check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub is_valid: bool,
    pub issue_count: usize,
    pub issues: Vec<String>,
    pub fixes_applied: usize,
    pub duration_seconds: f64,
    pub metadata: serde_json::Value,
}

impl CheckResult {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            is_valid: true,
            issue_count: 0,
            issues: Vec::new(),
            fixes_applied: 0,
            duration_seconds: 0.0,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(message.into());
        self.issue_count += 1;
        self.is_valid = false;
    }

    pub fn fixed(&mut self) {
        self.fixes_applied += 1;
    }
}

/// All nine check results plus aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub results: Vec<CheckResult>,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub total_issues: usize,
    pub total_fixes: usize,
    pub duration_seconds: f64,
}

impl ValidationSummary {
    pub fn from_results(results: Vec<CheckResult>, duration_seconds: f64) -> Self {
        let total_checks = results.len();
        let passed_checks = results.iter().filter(|r| r.is_valid).count();
        let total_issues = results.iter().map(|r| r.issue_count).sum();
        let total_fixes = results.iter().map(|r| r.fixes_applied).sum();
        Self {
            results,
            total_checks,
            passed_checks,
            total_issues,
            total_fixes,
            duration_seconds,
        }
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::from_summary(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Excellent => "EXCELLENT",
            HealthStatus::Good => "GOOD",
            HealthStatus::Fair => "FAIR",
            HealthStatus::Poor => "POOR",
            HealthStatus::Critical => "CRITICAL",
        }
    }
}

/// Score: `passed/total * 100` minus `min(issue_count * 2, 50)`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub score: f64,
    pub status: HealthStatus,
    pub passed_checks: usize,
    pub total_checks: usize,
    pub total_issues: usize,
    pub total_fixes: usize,
}

impl HealthReport {
    pub fn from_summary(summary: &ValidationSummary) -> Self {
        let score = if summary.total_checks == 0 {
            0.0
        } else {
            let base = summary.passed_checks as f64 / summary.total_checks as f64 * 100.0;
            let penalty = (summary.total_issues as f64 * 2.0).min(50.0);
            (base - penalty).max(0.0)
        };
        let status = if score >= 95.0 {
            HealthStatus::Excellent
        } else if score >= 85.0 {
            HealthStatus::Good
        } else if score >= 70.0 {
            HealthStatus::Fair
        } else if score >= 50.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        };
        Self {
            score,
            status,
            passed_checks: summary.passed_checks,
            total_checks: summary.total_checks,
            total_issues: summary.total_issues,
            total_fixes: summary.total_fixes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(passed: usize, total: usize, issues: usize) -> ValidationSummary {
        let mut results = Vec::new();
        for i in 0..total {
            let mut r = CheckResult::new("check");
            if i >= passed {
                // Spread the issues over the failing checks.
                let share = issues / (total - passed).max(1);
                for _ in 0..share {
                    r.issue("x");
                }
            }
            results.push(r);
        }
        // Adjust: make sure the issue total matches exactly.
        let mut s = ValidationSummary::from_results(results, 0.1);
        s.total_issues = issues;
        s
    }

    #[test]
    fn clean_sweep_is_excellent() {
        let report = summary(9, 9, 0).health_report();
        assert_eq!(report.score, 100.0);
        assert_eq!(report.status, HealthStatus::Excellent);
    }

    #[test]
    fn issue_penalty_is_capped_at_fifty() {
        let report = summary(9, 9, 100).health_report();
        assert_eq!(report.score, 50.0);
        assert_eq!(report.status, HealthStatus::Poor);
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(summary(8, 9, 1).health_report().status, HealthStatus::Good);
        assert_eq!(summary(7, 9, 2).health_report().status, HealthStatus::Fair);
        assert_eq!(
            summary(3, 9, 40).health_report().status,
            HealthStatus::Critical
        );
    }

    #[test]
    fn score_never_negative() {
        let report = summary(0, 9, 1000).health_report();
        assert_eq!(report.score, 0.0);
    }
}
