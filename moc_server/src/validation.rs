//! Request body field checks, reported as `field: message` details.

use std::str::FromStr;

use crate::error::AppError;

/// Implemented by request bodies; services check them before touching the store.
pub trait Validate {
    fn validate(&self) -> Result<(), AppError>;
}

/// Collects field violations.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn not_blank(mut self, field: &str, value: Option<&str>) -> Self {
        if value.map_or(true, |v| v.trim().is_empty()) {
            self.0.push(format!("{field}: must not be blank"));
        }
        self
    }

    pub fn not_null<T>(mut self, field: &str, value: Option<&T>) -> Self {
        if value.is_none() {
            self.0.push(format!("{field}: must not be null"));
        }
        self
    }

    pub fn in_range(mut self, field: &str, value: Option<f64>, min: f64, max: f64) -> Self {
        if let Some(v) = value {
            if !(min..=max).contains(&v) {
                self.0.push(format!("{field}: must be between {min} and {max}"));
            }
        }
        self
    }

    /// `value` must lie in `(0, 1]`.
    pub fn positive_fraction(mut self, field: &str, value: Option<f64>) -> Self {
        if let Some(v) = value {
            if !(v > 0.0 && v <= 1.0) {
                self.0.push(format!("{field}: must be greater than 0 and at most 1"));
            }
        }
        self
    }

    /// `raw` must parse as one of `T`'s variants.
    pub fn one_of<T: FromStr>(mut self, field: &str, raw: &str) -> Self {
        if raw.parse::<T>().is_err() {
            self.0.push(format!("{field}: unknown value '{raw}'"));
        }
        self
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_violation_in_order() {
        let err = Violations::new()
            .not_blank("title", Some("  "))
            .not_null::<i32>("severity", None)
            .not_blank("source", Some("grafana"))
            .in_range("weight", Some(1.5), 0.0, 1.0)
            .finish()
            .unwrap_err();
        match err {
            AppError::Validation(details) => assert_eq!(
                details,
                [
                    "title: must not be blank",
                    "severity: must not be null",
                    "weight: must be between 0 and 1"
                ]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn positive_fraction_excludes_zero() {
        let err = Violations::new()
            .positive_fraction("weight", Some(0.0))
            .positive_fraction("weight", Some(f64::NAN))
            .finish()
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(d) if d.len() == 2));
        assert!(Violations::new().positive_fraction("weight", Some(1.0)).finish().is_ok());
        assert!(Violations::new().positive_fraction("weight", None).finish().is_ok());
    }

    #[test]
    fn clean_input_passes() {
        assert!(Violations::new().not_blank("title", Some("ok")).finish().is_ok());
    }
}
