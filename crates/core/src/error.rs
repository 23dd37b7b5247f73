use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// A value was rejected by the shape registered for its attribute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("attribute {attribute} expects {expected}, got {actual}")]
    WrongType {
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("attribute {attribute}: {value} is outside [{min}, {max}]")]
    OutOfRange {
        attribute: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("attribute {attribute}: text is {len} chars (max {max})")]
    TooLong {
        attribute: String,
        len: usize,
        max: usize,
    },

    #[error("attribute {attribute}: {value:?} is not a #rrggbb colour")]
    BadColor { attribute: String, value: String },

    #[error("attribute {attribute}: missing record field {field}")]
    MissingField { attribute: String, field: String },
}
