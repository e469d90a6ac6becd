use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitError {
    #[error("duplicate key `{key}` in decoded map")]
    DuplicateKey { key: String },

    #[error("flattened map ends with key `{key}` and no value")]
    DanglingKey { key: String },

    #[error("expected a string key in flattened map, found {found}")]
    NonStringKey { found: String },
}
