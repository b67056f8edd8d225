use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Numeric edge cases (empty windows, zero variance, zero denominators) never
/// produce an error; they degrade to the sentinel documented on each function.
/// Only malformed caller input and exhausted simulation budgets end up here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input for `{field}`: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("simulation cancelled after {completed} of {requested} runs")]
    Cancelled { completed: usize, requested: usize },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

/// Reject NaN/infinite values and negatives.
pub(crate) fn ensure_non_negative(field: &'static str, value: f64) -> EngineResult<f64> {
    if !value.is_finite() {
        return Err(EngineError::invalid(field, format!("{value} is not finite")));
    }
    if value < 0.0 {
        return Err(EngineError::invalid(field, format!("{value} is negative")));
    }
    Ok(value)
}

pub(crate) fn ensure_probability(field: &'static str, value: f64) -> EngineResult<f64> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EngineError::invalid(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(value)
}

pub(crate) fn ensure_finite(field: &'static str, value: f64) -> EngineResult<f64> {
    if !value.is_finite() {
        return Err(EngineError::invalid(field, format!("{value} is not finite")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_and_negative_stakes() {
        assert!(ensure_non_negative("stake", f64::NAN).is_err());
        assert!(ensure_non_negative("stake", -1.0).is_err());
        assert_eq!(ensure_non_negative("stake", 0.0), Ok(0.0));
    }

    #[test]
    fn probability_bounds_are_inclusive() {
        assert!(ensure_probability("p", 0.0).is_ok());
        assert!(ensure_probability("p", 1.0).is_ok());
        assert!(ensure_probability("p", 1.0001).is_err());
        assert!(ensure_probability("p", -0.1).is_err());
    }

    #[test]
    fn error_message_names_the_field() {
        let err = EngineError::invalid("win_probability", "too large");
        assert_eq!(
            err.to_string(),
            "invalid input for `win_probability`: too large"
        );
    }
}
