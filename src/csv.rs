use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::covenant::Covenant;
use crate::{Assignment, Bank, BankId, Cents, Facility, FacilityId, FacilityYield, Loan, LoanId};

pub const BANKS: &str = "banks.csv";
pub const FACILITIES: &str = "facilities.csv";
pub const COVENANTS: &str = "covenants.csv";
pub const LOANS: &str = "loans.csv";

pub const ASSIGNMENTS: &str = "assignments.csv";
pub const YIELDS: &str = "yields.csv";

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: {field} must not be negative, got {value}")]
    Negative {
        line: usize,
        field: &'static str,
        value: f64,
    },

    #[error("line {line}: {field} must be within [0, 1], got {value}")]
    OutOfRange {
        line: usize,
        field: &'static str,
        value: f64,
    },

    #[error("line {line}: {field} {value} is too large")]
    TooLarge {
        line: usize,
        field: &'static str,
        value: f64,
    },

    #[error("line {line}: {field} must be a finite number")]
    NotFinite { line: usize, field: &'static str },

    #[error("line {line}: duplicate {kind} id {id}")]
    DuplicateId {
        line: usize,
        kind: &'static str,
        id: u32,
    },

    #[error("line {line}: unknown bank id {bank}")]
    UnknownBank { line: usize, bank: BankId },

    #[error("line {line}: unknown facility id {facility}")]
    UnknownFacility { line: usize, facility: FacilityId },

    #[error("line {line}: covenant names neither facility_id nor bank_id")]
    UnboundCovenant { line: usize },

    #[error("line {line}: covenant sets neither max_default_likelihood nor banned_state")]
    EmptyCovenant { line: usize },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: csv::Error },

    #[error("failed to flush {}: {source}", path.display())]
    Flush { path: PathBuf, source: io::Error },
}

#[derive(Debug, Deserialize)]
struct BankRow {
    id: BankId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FacilityRow {
    amount: f64,
    interest_rate: f64,
    id: FacilityId,
    bank_id: BankId,
}

#[derive(Debug, Deserialize)]
struct CovenantRow {
    facility_id: Option<FacilityId>,
    max_default_likelihood: Option<f64>,
    bank_id: Option<BankId>,
    banned_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoanRow {
    interest_rate: f64,
    amount: i64,
    id: LoanId,
    default_likelihood: f64,
    state: String,
}

#[derive(Debug, Serialize)]
struct AssignmentRow {
    loan_id: LoanId,
    facility_id: Option<FacilityId>,
}

#[derive(Debug, Serialize)]
struct YieldRow {
    facility_id: FacilityId,
    expected_yield: i64,
}

/// Where a covenant row attaches.
enum Target {
    Facility(FacilityId),
    Bank(BankId),
}

/// Open a csv file and deserialize its rows, tagging each with its line number
fn read_rows<T: DeserializeOwned>(
    path: &Path,
) -> Result<impl Iterator<Item = Result<(usize, T), CsvError>> + use<T>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<T>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            result
                .map(|row| (line, row))
                .map_err(|source| CsvError::Parse { line, source })
        }))
}

fn check_finite(line: usize, field: &'static str, value: f64) -> Result<f64, CsvError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CsvError::NotFinite { line, field })
    }
}

fn check_non_negative(line: usize, field: &'static str, value: f64) -> Result<f64, CsvError> {
    if check_finite(line, field, value)? < 0.0 {
        return Err(CsvError::Negative { line, field, value });
    }
    Ok(value)
}

/// Amounts must convert to `Cents` without saturating.
fn check_cents(line: usize, field: &'static str, value: f64) -> Result<f64, CsvError> {
    if check_non_negative(line, field, value)? >= i64::MAX as f64 {
        return Err(CsvError::TooLarge { line, field, value });
    }
    Ok(value)
}

fn check_probability(line: usize, field: &'static str, value: f64) -> Result<f64, CsvError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CsvError::OutOfRange { line, field, value });
    }
    Ok(value)
}

fn covenant_target(line: usize, row: &CovenantRow) -> Result<Target, CsvError> {
    match (row.facility_id, row.bank_id) {
        (Some(facility), _) => Ok(Target::Facility(facility)),
        (None, Some(bank)) => Ok(Target::Bank(bank)),
        (None, None) => Err(CsvError::UnboundCovenant { line }),
    }
}

/// Build the covenants a row declares; a row may set both rule fields.
fn covenants_of(line: usize, row: CovenantRow) -> Result<Vec<Covenant>, CsvError> {
    let mut covenants = Vec::with_capacity(2);
    if let Some(max) = row.max_default_likelihood {
        let max = check_probability(line, "max_default_likelihood", max)?;
        covenants.push(Covenant::MaxDefaultLikelihood(max));
    }
    if let Some(state) = row.banned_state {
        covenants.push(Covenant::BannedState(state));
    }
    if covenants.is_empty() {
        return Err(CsvError::EmptyCovenant { line });
    }
    Ok(covenants)
}

/// Load banks, facilities and covenants from `dir`.
///
/// Invalid rows are logged and skipped. The returned facilities are sorted
/// by id and carry their own covenants along with their bank's.
pub fn load_facilities(dir: impl AsRef<Path>) -> Result<Vec<Facility>, CsvError> {
    let dir = dir.as_ref();

    let mut banks: HashMap<BankId, Bank> = HashMap::new();
    for result in read_rows::<BankRow>(&dir.join(BANKS))? {
        let added = result.and_then(|(line, row)| {
            if banks.contains_key(&row.id) {
                return Err(CsvError::DuplicateId {
                    line,
                    kind: "bank",
                    id: row.id,
                });
            }
            banks.insert(row.id, Bank::new(row.id, row.name));
            Ok(())
        });
        if let Err(e) = added {
            warn!(file = BANKS, "{e}");
        }
    }

    let mut rows: BTreeMap<FacilityId, FacilityRow> = BTreeMap::new();
    for result in read_rows::<FacilityRow>(&dir.join(FACILITIES))? {
        let added = result.and_then(|(line, row)| {
            check_cents(line, "amount", row.amount)?;
            check_finite(line, "interest_rate", row.interest_rate)?;
            if !banks.contains_key(&row.bank_id) {
                return Err(CsvError::UnknownBank {
                    line,
                    bank: row.bank_id,
                });
            }
            if rows.contains_key(&row.id) {
                return Err(CsvError::DuplicateId {
                    line,
                    kind: "facility",
                    id: row.id,
                });
            }
            rows.insert(row.id, row);
            Ok(())
        });
        if let Err(e) = added {
            warn!(file = FACILITIES, "{e}");
        }
    }

    let mut facility_covenants: HashMap<FacilityId, Vec<Covenant>> = HashMap::new();
    for result in read_rows::<CovenantRow>(&dir.join(COVENANTS))? {
        let added = result.and_then(|(line, row)| {
            let target = covenant_target(line, &row)?;
            match target {
                Target::Facility(facility) => {
                    if !rows.contains_key(&facility) {
                        return Err(CsvError::UnknownFacility { line, facility });
                    }
                    let covenants = covenants_of(line, row)?;
                    facility_covenants
                        .entry(facility)
                        .or_default()
                        .extend(covenants);
                }
                Target::Bank(bank) => {
                    let Some(owner) = banks.get_mut(&bank) else {
                        return Err(CsvError::UnknownBank { line, bank });
                    };
                    for covenant in covenants_of(line, row)? {
                        owner.add_covenant(covenant);
                    }
                }
            }
            Ok(())
        });
        if let Err(e) = added {
            warn!(file = COVENANTS, "{e}");
        }
    }

    // banks are complete from here on, share them
    let banks: HashMap<BankId, Arc<Bank>> = banks
        .into_iter()
        .map(|(id, bank)| (id, Arc::new(bank)))
        .collect();

    let facilities = rows
        .into_values()
        .filter_map(|row| {
            let bank = banks.get(&row.bank_id)?;
            let mut facility = Facility::new(
                row.id,
                Arc::clone(bank),
                row.interest_rate,
                Cents::from_float(row.amount),
            );
            for covenant in facility_covenants.remove(&row.id).unwrap_or_default() {
                facility.add_covenant(covenant);
            }
            Some(facility)
        })
        .collect();

    Ok(facilities)
}

/// Read loans from a csv file, in file order
pub fn read_loans(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Loan, CsvError>>, CsvError> {
    let mut seen: HashSet<LoanId> = HashSet::new();

    Ok(read_rows::<LoanRow>(path.as_ref())?.map(move |result| {
        let (line, row) = result?;
        if row.amount < 0 {
            return Err(CsvError::Negative {
                line,
                field: "amount",
                value: row.amount as f64,
            });
        }
        let default_likelihood =
            check_probability(line, "default_likelihood", row.default_likelihood)?;
        let interest_rate = check_finite(line, "interest_rate", row.interest_rate)?;
        if !seen.insert(row.id) {
            return Err(CsvError::DuplicateId {
                line,
                kind: "loan",
                id: row.id,
            });
        }
        Ok(Loan::new(
            row.id,
            Cents::new(row.amount),
            default_likelihood,
            interest_rate,
            row.state,
        ))
    }))
}

/// Write a header followed by the given rows; the header is written even
/// when there are no rows.
fn write_rows<T: Serialize>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = T>,
) -> Result<(), CsvError> {
    let write_err = |source: csv::Error| CsvError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(write_err)?;
    writer.write_record(header).map_err(write_err)?;
    for row in rows {
        writer.serialize(row).map_err(write_err)?;
    }
    writer.flush().map_err(|source| CsvError::Flush {
        path: path.to_path_buf(),
        source,
    })
}

/// Write loan assignments, an empty `facility_id` marking an unfunded loan
pub fn write_assignments(
    path: impl AsRef<Path>,
    assignments: impl IntoIterator<Item = Assignment>,
) -> Result<(), CsvError> {
    write_rows(
        path.as_ref(),
        &["loan_id", "facility_id"],
        assignments.into_iter().map(|a| AssignmentRow {
            loan_id: a.loan,
            facility_id: a.facility,
        }),
    )
}

/// Write the expected yield of each facility
pub fn write_yields(
    path: impl AsRef<Path>,
    yields: impl IntoIterator<Item = FacilityYield>,
) -> Result<(), CsvError> {
    write_rows(
        path.as_ref(),
        &["facility_id", "expected_yield"],
        yields.into_iter().map(|y| YieldRow {
            facility_id: y.facility,
            expected_yield: y.expected_yield,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn portfolio(banks: &str, facilities: &str, covenants: &str) -> TempDir {
        write_dir(&[
            (BANKS, banks),
            (FACILITIES, facilities),
            (COVENANTS, covenants),
        ])
    }

    fn loan(state: &str, default_likelihood: f64) -> Loan {
        Loan::new(1, Cents::new(100), default_likelihood, 0.1, state)
    }

    #[test]
    fn load_facilities_sorted_by_id() {
        let dir = portfolio(
            "id,name\n1,Chase\n",
            "amount,interest_rate,id,bank_id\n500.0,0.05,2,1\n1000.75,0.07,1,1\n",
            "facility_id,max_default_likelihood,bank_id,banned_state\n",
        );

        let facilities = load_facilities(dir.path()).unwrap();
        assert_eq!(facilities.len(), 2);
        assert_eq!(facilities[0].id(), 1);
        assert_eq!(facilities[0].total_amount(), Cents::new(1000));
        assert_eq!(facilities[0].bank().name(), "Chase");
        assert_eq!(facilities[1].id(), 2);
        assert_eq!(facilities[1].interest_rate(), 0.05);
    }

    #[test]
    fn covenant_with_facility_id_attaches_to_facility() {
        let dir = portfolio(
            "id,name\n1,Chase\n",
            "amount,interest_rate,id,bank_id\n500,0.05,1,1\n500,0.05,2,1\n",
            "facility_id,max_default_likelihood,bank_id,banned_state\n1,,1,MT\n",
        );

        let facilities = load_facilities(dir.path()).unwrap();
        assert!(!facilities[0].is_eligible(&loan("MT", 0.1)));
        assert!(facilities[1].is_eligible(&loan("MT", 0.1)));
        assert!(facilities[0].bank().covenants().is_empty());
    }

    #[test]
    fn covenant_without_facility_id_attaches_to_bank() {
        let dir = portfolio(
            "id,name\n1,Chase\n2,Citi\n",
            "amount,interest_rate,id,bank_id\n500,0.05,1,1\n500,0.05,2,1\n500,0.05,3,2\n",
            "facility_id,max_default_likelihood,bank_id,banned_state\n,,1,MT\n",
        );

        let facilities = load_facilities(dir.path()).unwrap();
        assert!(!facilities[0].is_eligible(&loan("MT", 0.1)));
        assert!(!facilities[1].is_eligible(&loan("MT", 0.1)));
        assert!(facilities[2].is_eligible(&loan("MT", 0.1)));
    }

    #[test]
    fn covenant_row_with_both_rules_yields_two_covenants() {
        let dir = portfolio(
            "id,name\n1,Chase\n",
            "amount,interest_rate,id,bank_id\n500,0.05,1,1\n",
            "facility_id,max_default_likelihood,bank_id,banned_state\n1,0.09,1,MT\n",
        );

        let facilities = load_facilities(dir.path()).unwrap();
        assert_eq!(
            facilities[0].covenants(),
            &[
                Covenant::MaxDefaultLikelihood(0.09),
                Covenant::BannedState("MT".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_rows_are_skipped() {
        let dir = portfolio(
            "id,name\n1,Chase\n1,Duplicate\n",
            "amount,interest_rate,id,bank_id\n500,0.05,1,1\n500,0.05,2,9\n-1,0.05,3,1\n500,0.05,1,1\n",
            "facility_id,max_default_likelihood,bank_id,banned_state\n7,,1,CA\n,,,CA\n1,,1,\n,,9,CA\n1,1.5,1,\n",
        );

        let facilities = load_facilities(dir.path()).unwrap();
        assert_eq!(facilities.len(), 1);
        assert_eq!(facilities[0].id(), 1);
        assert_eq!(facilities[0].bank().name(), "Chase");
        assert!(facilities[0].covenants().is_empty());
        assert!(facilities[0].bank().covenants().is_empty());
    }

    #[test]
    fn facility_amount_beyond_cents_range_is_skipped() {
        let dir = portfolio(
            "id,name\n1,Chase\n",
            "amount,interest_rate,id,bank_id\n1e19,0.05,1,1\n9223372036854775807,0.05,2,1\n500,0.05,3,1\n",
            "facility_id,max_default_likelihood,bank_id,banned_state\n",
        );

        let facilities = load_facilities(dir.path()).unwrap();
        let ids: Vec<_> = facilities.iter().map(Facility::id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn load_facilities_fails_on_missing_file() {
        let dir = write_dir(&[(BANKS, "id,name\n1,Chase\n")]);
        let err = load_facilities(dir.path()).unwrap_err();
        assert!(matches!(err, CsvError::Open { .. }));
    }

    #[test]
    fn read_loan() {
        let dir = write_dir(&[(
            LOANS,
            "interest_rate,amount,id,default_likelihood,state\n0.15,10552,2,0.02,MO\n",
        )]);
        let results: Vec<_> = read_loans(dir.path().join(LOANS)).unwrap().collect();
        assert_eq!(results.len(), 1);

        let loan = results.into_iter().next().unwrap().unwrap();
        assert_eq!(loan.id(), 2);
        assert_eq!(loan.amount(), Cents::new(10552));
        assert_eq!(loan.default_likelihood(), 0.02);
        assert_eq!(loan.interest_rate(), 0.15);
        assert_eq!(loan.state(), "MO");
    }

    #[test]
    fn read_loans_with_whitespace() {
        let dir = write_dir(&[(
            LOANS,
            "interest_rate, amount, id, default_likelihood, state\n0.15, 100, 1, 0.02, MO\n",
        )]);
        let results: Vec<_> = read_loans(dir.path().join(LOANS)).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().state(), "MO");
    }

    #[test]
    fn read_loans_returns_errors_per_row() {
        let dir = write_dir(&[(
            LOANS,
            "interest_rate,amount,id,default_likelihood,state\n\
             0.1,abc,1,0.1,CA\n\
             0.1,-5,2,0.1,CA\n\
             0.1,5,3,1.2,CA\n\
             0.1,5,4,0.1,CA\n\
             0.1,5,4,0.1,CA\n",
        )]);
        let results: Vec<_> = read_loans(dir.path().join(LOANS)).unwrap().collect();
        assert_eq!(results.len(), 5);
        assert!(matches!(results[0], Err(CsvError::Parse { line: 2, .. })));
        assert!(matches!(results[1], Err(CsvError::Negative { line: 3, .. })));
        assert!(matches!(results[2], Err(CsvError::OutOfRange { line: 4, .. })));
        assert!(results[3].is_ok());
        assert!(matches!(
            results[4],
            Err(CsvError::DuplicateId {
                line: 6,
                kind: "loan",
                id: 4
            })
        ));
    }

    #[test]
    fn write_assignments_marks_unfunded_with_empty_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ASSIGNMENTS);
        let assignments = [
            Assignment {
                loan: 1,
                facility: Some(2),
            },
            Assignment {
                loan: 2,
                facility: None,
            },
        ];

        write_assignments(&path, assignments).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "loan_id,facility_id\n1,2\n2,\n");
    }

    #[test]
    fn write_yields_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(YIELDS);
        let yields = [
            FacilityYield {
                facility: 1,
                expected_yield: -55,
            },
            FacilityYield {
                facility: 2,
                expected_yield: 0,
            },
        ];

        write_yields(&path, yields).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "facility_id,expected_yield\n1,-55\n2,0\n");
    }

    #[test]
    fn write_yields_keeps_header_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(YIELDS);

        write_yields(&path, Vec::<FacilityYield>::new()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "facility_id,expected_yield\n");
    }
}
