//! Loan allocation engine.
//!
//! The engine holds the registered facilities, sorted so the cheapest capital
//! is offered first, and a ledger of the loans each facility has funded.
//! Every loan is offered to the facilities in that order and lands on the
//! first one whose covenants allow it and whose capacity is not exceeded.
//! Also supports an async stream of loans.

use std::collections::HashMap;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Cents;
use crate::model::{Assignment, Facility, FacilityId, FacilityYield, Loan};

mod state;
pub use state::FacilityLedger;

mod error;
pub use error::EngineError;

/// The loan allocation engine.
pub struct LoanProcessor {
    /// Sorted by [`Facility::funding_order`]
    facilities: Vec<Facility>,
    /// One ledger per registered facility
    ledgers: HashMap<FacilityId, FacilityLedger>,
}

/// Public API
impl LoanProcessor {
    pub fn new() -> Self {
        Self {
            facilities: Vec::new(),
            ledgers: HashMap::new(),
        }
    }

    /// Register a facility. Its position depends only on its rate and id,
    /// never on the registration order.
    pub fn add_facility(&mut self, facility: Facility) -> Result<(), EngineError> {
        if self.ledgers.contains_key(&facility.id()) {
            return Err(EngineError::DuplicateFacility(facility.id()));
        }

        info!(
            facility = facility.id(),
            bank = facility.bank().id(),
            rate = facility.interest_rate(),
            capacity = %facility.total_amount(),
            "facility registered"
        );

        let pos = self
            .facilities
            .partition_point(|f| f.funding_order(&facility).is_lt());
        self.ledgers.insert(facility.id(), FacilityLedger::default());
        self.facilities.insert(pos, facility);

        Ok(())
    }

    /// Offer a loan to the facilities, cheapest first, and fund it with the
    /// first one that allows it and still has room for it.
    ///
    /// Returns `None` when no facility can take the loan; the loan is then
    /// left unfunded.
    pub fn process(&mut self, loan: Loan) -> Option<&Facility> {
        let Some(idx) = self
            .facilities
            .iter()
            .position(|facility| self.can_fund(facility, &loan))
        else {
            info!(loan = loan.id(), amount = %loan.amount(), "loan left unfunded");
            return None;
        };

        let facility = &self.facilities[idx];
        info!(
            loan = loan.id(),
            amount = %loan.amount(),
            facility = facility.id(),
            "loan funded"
        );
        self.ledgers.entry(facility.id()).or_default().fund(loan);

        Some(facility)
    }

    /// Run the engine over the given loan stream, one loan at a time in
    /// arrival order.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Loan> + Unpin) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        while let Some(loan) = stream.next().await {
            let loan_id = loan.id();
            let facility = self.process(loan).map(Facility::id);
            assignments.push(Assignment {
                loan: loan_id,
                facility,
            });
        }
        assignments
    }

    /// Return the loans funded by a facility, in funding order.
    pub fn funded_loans(&self, facility: FacilityId) -> &[Loan] {
        self.ledgers
            .get(&facility)
            .map(FacilityLedger::loans)
            .unwrap_or_default()
    }

    /// Return the amount already funded by a facility.
    pub fn funded_amount(&self, facility: FacilityId) -> Cents {
        self.ledgers
            .get(&facility)
            .map_or(Cents::ZERO, FacilityLedger::funded)
    }

    /// Return the registered facilities, cheapest first.
    pub fn facilities(&self) -> impl Iterator<Item = &Facility> + '_ {
        self.facilities.iter()
    }

    pub fn get_facility(&self, facility: FacilityId) -> Option<&Facility> {
        self.facilities.iter().find(|f| f.id() == facility)
    }

    /// Expected yield of every registered facility, by ascending facility id.
    pub fn expected_yields(&self) -> Vec<FacilityYield> {
        let mut yields: Vec<_> = self
            .facilities
            .iter()
            .map(|facility| FacilityYield {
                facility: facility.id(),
                expected_yield: facility.compute_expected_yield(self.funded_loans(facility.id())),
            })
            .collect();
        yields.sort_by_key(|y| y.facility);
        yields
    }
}

/// Private API
impl LoanProcessor {
    /// A facility can fund a loan when its covenants (and its bank's) allow
    /// the loan and the loan fits in the remaining capacity.
    fn can_fund(&self, facility: &Facility, loan: &Loan) -> bool {
        if !facility.is_eligible(loan) {
            return false;
        }

        self.ledgers
            .get(&facility.id())
            .map_or(loan.amount() <= facility.total_amount(), |ledger| {
                ledger.has_room(loan.amount(), facility.total_amount())
            })
    }
}

impl Default for LoanProcessor {
    fn default() -> Self {
        Self::new()
    }
}
