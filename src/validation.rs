//! Input validation for `POST /task`, adapted from the teacher's
//! `TaskContentValidator` (`validation.rs`): a length cap, an allowlist
//! character regex, and a denylist of known attack patterns (XSS, shell
//! and SQL injection, path traversal).

use crate::error::{HubError, Result};
use regex::Regex;
use std::collections::HashSet;

static SAFE_TASK_CONTENT_REGEX: &str =
    r"^[a-zA-Z0-9\s\.,!?:;()\[\]{}\-_+=@#$%^&*|\\/<>'`~\n\r\t]+$";

static DANGEROUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "vbscript:",
    "&&",
    "||",
    ";rm",
    ";del",
    "`rm",
    "`del",
    "$(rm",
    "$(del",
    "';",
    "\";",
    "union select",
    "drop table",
    "delete from",
    "../",
    "..\\",
    "file://",
    "/etc/passwd",
    "/etc/shadow",
    "c:\\windows\\system32",
];

#[derive(Debug, Clone)]
pub struct TaskContentValidator {
    safe_content_regex: Regex,
    dangerous_patterns: HashSet<String>,
}

impl TaskContentValidator {
    pub fn new() -> Result<Self> {
        let safe_content_regex = Regex::new(SAFE_TASK_CONTENT_REGEX)
            .map_err(|e| HubError::Configuration(format!("invalid validation regex: {e}")))?;
        let dangerous_patterns = DANGEROUS_PATTERNS.iter().map(|s| s.to_lowercase()).collect();
        Ok(Self { safe_content_regex, dangerous_patterns })
    }

    /// Validates task submission text (becomes `title` + `description`).
    /// Returns the trimmed content on success.
    pub fn validate_task_content(&self, content: &str) -> Result<String> {
        if content.len() > crate::constants::MAX_TASK_CONTENT_LENGTH {
            return Err(HubError::Validation(format!(
                "task content exceeds maximum length of {} characters",
                crate::constants::MAX_TASK_CONTENT_LENGTH
            )));
        }

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(HubError::Validation("task content cannot be empty".to_string()));
        }

        let content_lower = content.to_lowercase();
        for pattern in &self.dangerous_patterns {
            if content_lower.contains(pattern) {
                return Err(HubError::Validation(
                    "task content contains disallowed patterns".to_string(),
                ));
            }
        }

        if !self.safe_content_regex.is_match(content) {
            return Err(HubError::Validation(
                "task content contains disallowed characters".to_string(),
            ));
        }

        Ok(trimmed.to_string())
    }
}

impl Default for TaskContentValidator {
    fn default() -> Self {
        Self::new().expect("static validation regex is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_content_passes() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_task_content("print hello world").is_ok());
    }

    #[test]
    fn script_injection_blocked() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_task_content("<script>alert(1)</script>").is_err());
    }

    #[test]
    fn command_injection_blocked() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_task_content("run this && rm -rf /").is_err());
    }

    #[test]
    fn empty_content_blocked() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_task_content("   ").is_err());
    }

    #[test]
    fn content_too_long_blocked() {
        let validator = TaskContentValidator::new().unwrap();
        let long = "a".repeat(crate::constants::MAX_TASK_CONTENT_LENGTH + 1);
        assert!(validator.validate_task_content(&long).is_err());
    }
}
