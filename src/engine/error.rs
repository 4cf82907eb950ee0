//! Error types for facility registration.

use thiserror::Error;

use crate::model::FacilityId;

/// Error returned by [`LoanProcessor::add_facility`](super::LoanProcessor::add_facility).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("facility {0} is already registered")]
    DuplicateFacility(FacilityId),
}
