//! Error types for name and ID parsing.

use thiserror::Error;

/// Errors that can occur when validating a name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length.
    #[error("{kind} '{name}' is longer than {max} bytes")]
    TooLong {
        kind: &'static str,
        name: String,
        max: usize,
    },

    /// The name must start with a lowercase letter or digit.
    #[error("{kind} '{name}' must start with [a-z0-9]")]
    InvalidStart { kind: &'static str, name: String },

    /// The name contains a character outside the allowed alphabet.
    #[error("{kind} '{name}' contains invalid character {ch:?}")]
    InvalidChar {
        kind: &'static str,
        name: String,
        ch: char,
    },
}

impl NameError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, NameError::Empty { .. })
    }
}

/// Errors that can occur when parsing a generated ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ID is missing the underscore separator.
    #[error("ID missing underscore separator")]
    MissingSeparator,

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}
