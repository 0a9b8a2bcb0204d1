//! End-of-test verification of counted expectations.

use crate::expectation::{CallBounds, Expectation};
use std::fmt;

/// One counted expectation that failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedExpectation {
    /// 1-based registration position
    pub position: usize,
    pub descriptions: Vec<String>,
    /// Index into `descriptions` of the first validator that never matched
    pub never_matched: Option<usize>,
    pub count: usize,
    pub bounds: CallBounds,
    pub missing_validators: bool,
}

impl UnsatisfiedExpectation {
    fn count_problem(&self) -> Option<String> {
        if self.count < self.bounds.min() {
            Some(format!(
                "expected at least {}, got {}",
                self.bounds.min(),
                self.count
            ))
        } else {
            match self.bounds.max() {
                Some(max) if self.count > max => {
                    Some(format!("expected at most {max}, got {}", self.count))
                }
                _ => None,
            }
        }
    }
}

impl fmt::Display for UnsatisfiedExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}. Expectation", self.position)?;
        if self.missing_validators {
            writeln!(f, "----- no request validation defined")?;
        }
        for (i, description) in self.descriptions.iter().enumerate() {
            if self.never_matched == Some(i) {
                writeln!(f, "----- {description} (never matched)")?;
            } else {
                writeln!(f, "----- {description}")?;
            }
        }
        if let Some(problem) = self.count_problem() {
            writeln!(f, "----- {problem}")?;
        }
        Ok(())
    }
}

/// Aggregated verification failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsatisfied {
    pub expectations: Vec<UnsatisfiedExpectation>,
}

impl fmt::Display for Unsatisfied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "expectation(s) not satisfied:")?;
        for exp in &self.expectations {
            write!(f, "{exp}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Unsatisfied {}

/// Check every counted expectation against its bounds.
///
/// An expectation is unsatisfied when its count lies outside `[min, max]` or
/// when it has no validators at all.
pub fn verify(counted: &[Expectation]) -> Result<(), Unsatisfied> {
    let expectations: Vec<_> = counted
        .iter()
        .enumerate()
        .filter_map(|(i, exp)| {
            let missing_validators = exp.validators().is_empty();
            let out_of_bounds = !exp.bounds().contains(exp.count());
            if !missing_validators && !out_of_bounds {
                return None;
            }
            Some(UnsatisfiedExpectation {
                position: i + 1,
                descriptions: exp.descriptions(),
                never_matched: exp.first_never_matched(),
                count: exp.count(),
                bounds: exp.bounds(),
                missing_validators,
            })
        })
        .collect();

    if expectations.is_empty() {
        Ok(())
    } else {
        Err(Unsatisfied { expectations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::Flavor;
    use crate::validator::{Check, Validator};
    use hyper::Method;

    fn get_users() -> Expectation {
        let mut exp = Expectation::new(Flavor::Counted);
        exp.push(Validator::new(Check::Method(Method::GET), "Method: GET"));
        exp.push(Validator::new(Check::Path("/users".into()), "Path: /users"));
        exp
    }

    #[test]
    fn test_satisfied_is_silent() {
        let mut exp = get_users();
        exp.record_match();
        assert!(verify(&[exp]).is_ok());
        assert!(verify(&[]).is_ok());
    }

    #[test]
    fn test_never_called_reports_count_and_first_unmatched() {
        let report = verify(&[get_users()]).unwrap_err();
        assert_eq!(report.expectations.len(), 1);
        assert_eq!(report.expectations[0].never_matched, Some(0));
        assert_eq!(
            report.to_string(),
            "\nexpectation(s) not satisfied:\n\
             1. Expectation\n\
             ----- Method: GET (never matched)\n\
             ----- Path: /users\n\
             ----- expected at least 1, got 0\n"
        );
    }

    #[test]
    fn test_too_few_calls_after_some_matches() {
        let mut exp = get_users();
        exp.bounds_mut().set_times(3);
        exp.record_match();
        let report = verify(&[exp]).unwrap_err();
        let text = report.to_string();
        assert!(text.contains("expected at least 3, got 1"));
        assert!(!text.contains("never matched"));
    }

    #[test]
    fn test_zero_validators_is_unsatisfied() {
        let mut exp = Expectation::new(Flavor::Counted);
        exp.record_match();
        let report = verify(&[get_users_matched(), exp]).unwrap_err();
        assert_eq!(report.expectations.len(), 1);
        assert_eq!(report.expectations[0].position, 2);
        assert!(report.to_string().contains("----- no request validation defined"));
    }

    #[test]
    fn test_any_times_never_called_passes() {
        let mut exp = get_users();
        exp.bounds_mut().set_any();
        assert!(verify(&[exp]).is_ok());
    }

    fn get_users_matched() -> Expectation {
        let mut exp = get_users();
        exp.record_match();
        exp
    }
}
