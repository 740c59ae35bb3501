//! Password policy validation.

use serde::Deserialize;

use crate::services::IamError;

const SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{}|\\;:'\",.<>/?`~";

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_number: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_uppercase: true,
            require_number: true,
            require_special: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordViolation {
    TooShort { min_length: usize, actual_length: usize },
    TooLong { max_length: usize },
    MissingUppercase,
    MissingNumber,
    MissingSpecial,
}

impl std::fmt::Display for PasswordViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordViolation::TooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PasswordViolation::TooLong { max_length } => {
                write!(f, "Password must be at most {} characters", max_length)
            }
            PasswordViolation::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PasswordViolation::MissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PasswordViolation::MissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
        }
    }
}

impl PasswordPolicy {
    /// Every violation, in a stable order.
    pub fn violations(&self, password: &str) -> Vec<PasswordViolation> {
        let mut errors = Vec::new();
        let len = password.chars().count();

        if len < self.min_length {
            errors.push(PasswordViolation::TooShort {
                min_length: self.min_length,
                actual_length: len,
            });
        }
        if len > self.max_length {
            errors.push(PasswordViolation::TooLong {
                max_length: self.max_length,
            });
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(PasswordViolation::MissingUppercase);
        }
        if self.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(PasswordViolation::MissingNumber);
        }
        if self.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            errors.push(PasswordViolation::MissingSpecial);
        }

        errors
    }

    /// First violation as a domain validation error.
    pub fn validate(&self, password: &str) -> Result<(), IamError> {
        match self.violations(password).into_iter().next() {
            Some(v) => Err(IamError::validation("password", v.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_password() {
        assert!(PasswordPolicy::default().validate("Passw0rd!").is_ok());
    }

    #[test]
    fn test_password_missing_special() {
        let violations = PasswordPolicy::default().violations("Passw0rdd");
        assert_eq!(violations, vec![PasswordViolation::MissingSpecial]);
    }

    #[test]
    fn test_validate_all_returns_multiple_errors() {
        let violations = PasswordPolicy::default().violations("short");
        assert_eq!(violations.len(), 4); // Too short, no uppercase, no number, no special
    }

    #[test]
    fn test_lenient_policy() {
        let policy = PasswordPolicy {
            min_length: 1,
            max_length: 64,
            require_uppercase: false,
            require_number: false,
            require_special: false,
        };
        assert!(policy.validate("simple").is_ok());
        assert!(policy.validate(&"x".repeat(65)).is_err());
    }
}
