//! Core domain types for the allocation engine.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::Cents;
use crate::covenant::{self, Covenant};

/// Loan identifier.
pub type LoanId = u32;

/// Facility identifier.
pub type FacilityId = u32;

/// Bank identifier.
pub type BankId = u32;

/// Money a consumer asks to borrow at a given interest rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    id: LoanId,
    amount: Cents,
    default_likelihood: f64,
    interest_rate: f64,
    state: String,
}

impl Loan {
    pub fn new(
        id: LoanId,
        amount: Cents,
        default_likelihood: f64,
        interest_rate: f64,
        state: impl Into<String>,
    ) -> Self {
        Self {
            id,
            amount,
            default_likelihood,
            interest_rate,
            state: state.into(),
        }
    }

    pub fn id(&self) -> LoanId {
        self.id
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn default_likelihood(&self) -> f64 {
        self.default_likelihood
    }

    pub fn interest_rate(&self) -> f64 {
        self.interest_rate
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Expected yield in cents of this loan when funded by `facility`:
    /// interest earned on the non-defaulting share, minus expected default
    /// loss, minus the facility's cost of capital. Rounded half away from zero.
    pub fn expected_yield(&self, facility: &Facility) -> i64 {
        let p = self.default_likelihood;
        let amount = self.amount.as_f64();
        let yield_cents = (1.0 - p) * self.interest_rate * amount
            - p * amount
            - facility.interest_rate() * amount;
        yield_cents.round() as i64
    }
}

/// Banking partner whose covenants apply to every facility it provides.
#[derive(Debug, Clone)]
pub struct Bank {
    id: BankId,
    name: String,
    covenants: Vec<Covenant>,
}

impl Bank {
    pub fn new(id: BankId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            covenants: Vec::new(),
        }
    }

    pub fn add_covenant(&mut self, covenant: Covenant) {
        self.covenants.push(covenant);
    }

    pub fn id(&self) -> BankId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn covenants(&self) -> &[Covenant] {
        &self.covenants
    }

    /// Whether every covenant of this bank allows the loan.
    pub fn is_eligible(&self, loan: &Loan) -> bool {
        covenant::all_allow(&self.covenants, loan)
    }
}

/// Capacity-bounded credit line borrowed from a [`Bank`].
///
/// The bank is shared: several facilities may point at the same one. Build
/// the bank completely (covenants included) before wrapping it in an `Arc`.
#[derive(Debug, Clone)]
pub struct Facility {
    id: FacilityId,
    bank: Arc<Bank>,
    interest_rate: f64,
    total_amount: Cents,
    covenants: Vec<Covenant>,
}

impl Facility {
    pub fn new(id: FacilityId, bank: Arc<Bank>, interest_rate: f64, total_amount: Cents) -> Self {
        Self {
            id,
            bank,
            interest_rate,
            total_amount,
            covenants: Vec::new(),
        }
    }

    pub fn add_covenant(&mut self, covenant: Covenant) {
        self.covenants.push(covenant);
    }

    pub fn id(&self) -> FacilityId {
        self.id
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    /// Cost of capital.
    pub fn interest_rate(&self) -> f64 {
        self.interest_rate
    }

    /// Capacity ceiling.
    pub fn total_amount(&self) -> Cents {
        self.total_amount
    }

    pub fn covenants(&self) -> &[Covenant] {
        &self.covenants
    }

    /// Whether both the bank and this facility allow the loan.
    pub fn is_eligible(&self, loan: &Loan) -> bool {
        self.bank.is_eligible(loan) && covenant::all_allow(&self.covenants, loan)
    }

    /// Sum of the per-loan expected yields, each rounded on its own.
    pub fn compute_expected_yield<'a>(&self, loans: impl IntoIterator<Item = &'a Loan>) -> i64 {
        loans
            .into_iter()
            .map(|loan| loan.expected_yield(self))
            .sum()
    }

    /// Order in which facilities are offered a loan: cheapest capital first,
    /// ties broken by ascending id.
    pub fn funding_order(&self, other: &Facility) -> Ordering {
        self.interest_rate
            .total_cmp(&other.interest_rate)
            .then(self.id.cmp(&other.id))
    }
}

/// Outcome of processing one loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub loan: LoanId,
    /// `None` when no facility could fund the loan.
    pub facility: Option<FacilityId>,
}

/// Expected yield of everything a facility funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilityYield {
    pub facility: FacilityId,
    pub expected_yield: i64,
}
