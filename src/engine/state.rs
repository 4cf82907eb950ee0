use crate::Cents;
use crate::model::Loan;

/// Loans funded by one facility, with their running total.
#[derive(Debug, Default)]
pub struct FacilityLedger {
    loans: Vec<Loan>,
    funded: Cents,
}

impl FacilityLedger {
    pub fn loans(&self) -> &[Loan] {
        &self.loans
    }

    pub fn funded(&self) -> Cents {
        self.funded
    }

    /// Whether `amount` still fits under `capacity`. A total that overflows
    /// cannot fit.
    pub fn has_room(&self, amount: Cents, capacity: Cents) -> bool {
        self.funded
            .checked_add(amount)
            .is_some_and(|total| total <= capacity)
    }

    pub fn fund(&mut self, loan: Loan) {
        self.funded += loan.amount();
        self.loans.push(loan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(id: u32, amount: i64) -> Loan {
        Loan::new(id, Cents::new(amount), 0.1, 0.1, "CA")
    }

    #[test]
    fn facility_ledger_default() {
        let ledger = FacilityLedger::default();
        assert!(ledger.loans().is_empty());
        assert_eq!(ledger.funded(), Cents::ZERO);
    }

    #[test]
    fn fund_accumulates_amounts() {
        let mut ledger = FacilityLedger::default();
        ledger.fund(loan(1, 100));
        ledger.fund(loan(2, 50));
        assert_eq!(ledger.funded(), Cents::new(150));
        assert_eq!(ledger.loans().len(), 2);
    }

    #[test]
    fn has_room_is_inclusive_of_capacity() {
        let mut ledger = FacilityLedger::default();
        ledger.fund(loan(1, 150));
        assert!(ledger.has_room(Cents::new(50), Cents::new(200)));
        assert!(!ledger.has_room(Cents::new(51), Cents::new(200)));
    }

    #[test]
    fn has_room_is_false_when_total_overflows() {
        let mut ledger = FacilityLedger::default();
        ledger.fund(loan(1, i64::MAX));
        assert!(!ledger.has_room(Cents::new(1), Cents::new(i64::MAX)));
    }
}
