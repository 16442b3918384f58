use thiserror::Error;

/// Errors raised by the ordered-tree engine.
///
/// Structural violations (`DuplicateSlug`, `DanglingParent`, `CycleDetected`,
/// `HasChildren`) are caller errors and are never retried. `OrdinalExhausted`
/// is recovered internally by rebalancing and does not escape the public
/// operations. `ConcurrentModification` is retried exactly once before it is
/// surfaced.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("ordinal already issued: {0}")]
    DuplicateOrdinal(String),

    #[error("slug '{slug}' already used under parent {parent:?}")]
    DuplicateSlug {
        parent: Option<String>,
        slug: String,
    },

    #[error("parent does not exist: {0}")]
    DanglingParent(String),

    #[error("moving {ordinal} under {target} would create a cycle")]
    CycleDetected { ordinal: String, target: String },

    #[error("entry has children and cascade was not requested: {0}")]
    HasChildren(String),

    #[error("invalid sibling index: {0}")]
    InvalidIndex(usize),

    #[error("no ordinal segment fits between {low:?} and {high:?}")]
    OrdinalExhausted {
        low: Option<String>,
        high: Option<String>,
    },

    #[error("store changed underneath the operation")]
    ConcurrentModification,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type TreeResult<T> = Result<T, TreeError>;
