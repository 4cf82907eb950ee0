use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use loan_alloc::LoanProcessor;
use loan_alloc::csv::{
    ASSIGNMENTS, LOANS, YIELDS, load_facilities, read_loans, write_assignments, write_yields,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let Some(input_dir) = args.next().map(PathBuf::from) else {
        error!("usage: loan-alloc <input-dir> [output-dir]");
        return ExitCode::FAILURE;
    };
    let output_dir = args.next().map_or_else(|| PathBuf::from("."), PathBuf::from);

    let mut processor = LoanProcessor::new();
    match load_facilities(&input_dir) {
        Ok(facilities) => {
            for facility in facilities {
                if let Err(e) = processor.add_facility(facility) {
                    warn!("{e}");
                }
            }
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    }

    let loans = match read_loans(input_dir.join(LOANS)) {
        Ok(loans) => loans,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (loan_sender, loan_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in loans {
            match result {
                Ok(loan) => {
                    if loan_sender.send(loan).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(file = LOANS, "{e}");
                }
            }
        }
    });

    let assignments = processor.run(ReceiverStream::new(loan_receiver)).await;
    let funded = assignments.iter().filter(|a| a.facility.is_some()).count();
    info!(loans = assignments.len(), funded, "loans processed");

    let written = write_assignments(output_dir.join(ASSIGNMENTS), assignments)
        .and_then(|()| write_yields(output_dir.join(YIELDS), processor.expected_yields()));
    if let Err(e) = written {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
