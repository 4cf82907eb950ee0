pub mod amount;
pub mod covenant;
pub mod csv;
pub mod engine;
pub mod model;

pub use amount::Cents;
pub use covenant::Covenant;
pub use engine::LoanProcessor;
pub use model::{Assignment, Bank, BankId, Facility, FacilityId, FacilityYield, Loan, LoanId};
