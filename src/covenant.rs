//! Eligibility rules a bank or facility imposes on the loans it funds.

use crate::model::Loan;

/// A single eligibility rule over a loan.
#[derive(Debug, Clone, PartialEq)]
pub enum Covenant {
    /// Loans originated in this state are not funded (exact, case-sensitive match).
    BannedState(String),
    /// Loans whose default likelihood exceeds this threshold are not funded.
    MaxDefaultLikelihood(f64),
}

impl Covenant {
    /// Return `true` if this covenant allows funding the loan.
    pub fn evaluate(&self, loan: &Loan) -> bool {
        match self {
            Covenant::BannedState(state) => loan.state() != state,
            Covenant::MaxDefaultLikelihood(max) => loan.default_likelihood() <= *max,
        }
    }
}

/// Conjunction over a covenant set; an empty set allows everything.
pub fn all_allow(covenants: &[Covenant], loan: &Loan) -> bool {
    covenants.iter().all(|covenant| covenant.evaluate(loan))
}
