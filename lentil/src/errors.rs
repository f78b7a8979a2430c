//! Error taxonomy.
//!
//! Functions of this crate return `anyhow::Result`; every domain failure
//! is raised as a [`BayesError`] so callers can tell the kinds apart with
//! `err.downcast_ref::<BayesError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BayesError {
    /// missing prior or registration, duplicate key, frozen layout
    #[error("configuration error: {0}")]
    Configuration(String),

    /// vector or matrix shape mismatch
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// unregistered sensor, model error or noise key
    #[error("lookup failure: {0}")]
    Lookup(String),

    /// singular covariance, non-finite residuals
    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl BayesError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_dimension(&self) -> bool {
        matches!(self, Self::Dimension(_))
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical(_))
    }
}

/// Extract the [`BayesError`] carried by an `anyhow::Error`, if any
pub fn bayes_error(err: &anyhow::Error) -> Option<&BayesError> {
    err.downcast_ref::<BayesError>()
}
