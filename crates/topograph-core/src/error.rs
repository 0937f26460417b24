use thiserror::Error;

/// Errors from reading fields out of a metadata tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Field not found: {path}")]
    FieldNotFound { path: String },

    #[error("Field {path} has type {found}, expected {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}
