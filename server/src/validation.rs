//! Input rules shared by the REST and GraphQL transports.
//!
//! Both transports validate the same fields against the same rule lists, and
//! both paginate with [`POSTS_PER_PAGE`]. Keeping the constants here is what
//! keeps the two APIs consistent.

use validator::ValidateEmail;

use crate::error::{FieldError, ServerError};

/// Number of posts returned per feed page.
pub const POSTS_PER_PAGE: u64 = 2;

/// Minimum length of a post title or content after trimming.
pub const MIN_TEXT_LENGTH: usize = 5;

/// Minimum password length accepted at signup.
pub const MIN_PASSWORD_LENGTH: usize = 4;

/// What a [`FieldRule`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Non-empty after trimming.
    NotEmpty,
    /// At least this many characters after trimming.
    MinLength(usize),
    /// At least this many characters, whitespace included.
    RawMinLength(usize),
    /// A well-formed email address.
    Email,
}

/// A declarative rule for one request field.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub check: Check,
    pub message: &'static str,
}

impl FieldRule {
    /// Returns `true` if `value` satisfies this rule. Missing values never do.
    pub fn passes(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };

        match self.check {
            Check::NotEmpty => !value.trim().is_empty(),
            Check::MinLength(min) => value.trim().chars().count() >= min,
            Check::RawMinLength(min) => value.chars().count() >= min,
            Check::Email => value.trim().to_string().validate_email(),
        }
    }
}

/// Rules applied to post title and content on create and update.
pub const POST_RULES: [FieldRule; 2] = [
    FieldRule {
        field: "title",
        check: Check::MinLength(MIN_TEXT_LENGTH),
        message: "Title must be at least 5 characters long.",
    },
    FieldRule {
        field: "content",
        check: Check::MinLength(MIN_TEXT_LENGTH),
        message: "Content must be at least 5 characters long.",
    },
];

/// Rules applied to signup input.
pub const SIGNUP_RULES: [FieldRule; 3] = [
    FieldRule {
        field: "email",
        check: Check::Email,
        message: "Please enter a valid email.",
    },
    FieldRule {
        field: "password",
        check: Check::RawMinLength(MIN_PASSWORD_LENGTH),
        message: "Password must be at least 4 characters long.",
    },
    FieldRule {
        field: "name",
        check: Check::NotEmpty,
        message: "Name must not be empty.",
    },
];

/// Runs every rule against the field values supplied by `lookup`.
///
/// Returns all failures, in rule order.
pub fn check_fields<'a>(
    rules: &[FieldRule],
    lookup: impl Fn(&str) -> Option<&'a str>,
) -> Vec<FieldError> {
    rules
        .iter()
        .filter(|rule| !rule.passes(lookup(rule.field)))
        .map(|rule| FieldError::new(rule.field, rule.message))
        .collect()
}

/// Like [`check_fields`], but turns failures into a [`ServerError::Validation`].
pub fn validate<'a>(
    rules: &[FieldRule],
    message: &str,
    lookup: impl Fn(&str) -> Option<&'a str>,
) -> Result<(), ServerError> {
    let failures = check_fields(rules, lookup);
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ServerError::validation_with(message, failures))
    }
}

/// Validates a post's title and content.
pub fn validate_post(title: &str, content: &str) -> Result<(), ServerError> {
    validate(
        &POST_RULES,
        "Validation failed, entered data is incorrect.",
        |field| match field {
            "title" => Some(title),
            "content" => Some(content),
            _ => None,
        },
    )
}

/// Normalises an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Converts a 1-indexed page number into a skip count, clamping to page 1.
pub fn page_offset(page: i64) -> u64 {
    let page = u64::try_from(page.max(1)).unwrap_or(1);
    (page - 1) * POSTS_PER_PAGE
}
