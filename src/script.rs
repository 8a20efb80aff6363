//! CSV scripts of wallet operations and their results.

use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::host::{ServiceError, WalletHandle};

/// Errors that can occur when reading a script
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot open script: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOperation { line: usize, op: String },

    #[error("line {line}: {op} missing amount")]
    MissingAmount { line: usize, op: String },
}

/// One wallet operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Balance,
    Credit(i16),
    Debit(i16),
    ToggleDebug,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Balance => "balance",
            Operation::Credit(_) => "credit",
            Operation::Debit(_) => "debit",
            Operation::ToggleDebug => "toggle_debug",
        }
    }

    pub fn amount(&self) -> Option<i16> {
        match self {
            Operation::Credit(amount) | Operation::Debit(amount) => Some(*amount),
            Operation::Balance | Operation::ToggleDebug => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.amount() {
            Some(amount) => write!(f, "{} {amount}", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// An operation together with the script line it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLine {
    pub line: usize,
    pub operation: Operation,
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    amount: Option<i16>,
}

/// Result of one operation, as written to the output csv.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRow {
    pub line: usize,
    pub op: &'static str,
    pub amount: Option<i16>,
    pub status: &'static str,
    pub balance: Option<i16>,
}

/// Read operations from a csv file with an `op,amount` header.
pub fn read_operations(
    path: &Path,
) -> Result<impl Iterator<Item = Result<ScriptLine, ScriptError>> + use<>, ScriptError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(ScriptError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| ScriptError::Parse { line, source })?;
            let amount = |op: &str| {
                row.amount.ok_or_else(|| ScriptError::MissingAmount {
                    line,
                    op: op.to_string(),
                })
            };
            let operation = match row.op.as_str() {
                "balance" => Operation::Balance,
                "credit" => Operation::Credit(amount("credit")?),
                "debit" => Operation::Debit(amount("debit")?),
                "toggle_debug" => Operation::ToggleDebug,
                other => {
                    return Err(ScriptError::UnrecognizedOperation {
                        line,
                        op: other.to_string(),
                    });
                }
            };
            Ok(ScriptLine { line, operation })
        }))
}

/// Apply every operation of the stream in order through `wallet`.
///
/// A refused operation is logged and recorded; it does not stop the run.
pub async fn run(
    wallet: &WalletHandle,
    mut stream: impl Stream<Item = ScriptLine> + Unpin,
) -> Vec<OutcomeRow> {
    let mut outcomes = Vec::new();
    while let Some(ScriptLine { line, operation }) = stream.next().await {
        let result = match operation {
            Operation::Balance => wallet.balance().await.map(Some),
            Operation::Credit(amount) => wallet.credit(amount).await.map(Some),
            Operation::Debit(amount) => wallet.debit(amount).await.map(Some),
            Operation::ToggleDebug => wallet.toggle_debug().await.map(|()| None),
        };

        let (status, balance) = match result {
            Ok(balance) => ("ok", balance),
            Err(e) => {
                warn!(line, op = %operation, reason = %e, "operation failed");
                (status_label(&e), None)
            }
        };
        outcomes.push(OutcomeRow {
            line,
            op: operation.name(),
            amount: operation.amount(),
            status,
            balance,
        });
    }
    outcomes
}

fn status_label(e: &ServiceError) -> &'static str {
    use crate::host::SessionError;

    match e {
        ServiceError::Session(SessionError::NegativeBalance(_)) => "insufficient_funds",
        ServiceError::Session(SessionError::InvalidAmount(_)) => "invalid_amount",
        ServiceError::NoCard => "no_card",
        _ => "error",
    }
}

/// Write outcome rows in csv format.
pub fn write_outcomes(
    outcomes: impl IntoIterator<Item = OutcomeRow>,
    writer: impl io::Write,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in outcomes {
        writer.serialize(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    use crate::config::SessionConfig;
    use crate::host::{SimulatedReaders, WalletService};

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn read(content: &str) -> Vec<Result<ScriptLine, ScriptError>> {
        let file = write_csv(content);
        read_operations(file.path()).unwrap().collect()
    }

    #[test]
    fn read_all_operations() {
        let results = read("op,amount\ncredit,5\ndebit,250\nbalance,\ntoggle_debug\n");
        let operations: Vec<_> = results
            .into_iter()
            .map(|r| r.unwrap().operation)
            .collect();
        assert_eq!(
            operations,
            vec![
                Operation::Credit(5),
                Operation::Debit(250),
                Operation::Balance,
                Operation::ToggleDebug
            ]
        );
    }

    #[test]
    fn read_with_whitespace() {
        let results = read("op, amount\n credit , 10\n");
        assert_eq!(
            results[0].as_ref().unwrap(),
            &ScriptLine {
                line: 2,
                operation: Operation::Credit(10)
            }
        );
    }

    #[test]
    fn read_returns_error_for_unknown_operation() {
        let results = read("op,amount\ntransfer,1\n");
        assert!(matches!(
            results[0],
            Err(ScriptError::UnrecognizedOperation { line: 2, .. })
        ));
    }

    #[test]
    fn read_returns_error_for_missing_amount() {
        let results = read("op,amount\ncredit,5\ndebit,\n");
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ScriptError::MissingAmount { line: 3, .. })
        ));
    }

    #[test]
    fn read_returns_error_for_out_of_range_amount() {
        let results = read("op,amount\ncredit,40000\n");
        assert!(matches!(results[0], Err(ScriptError::Parse { line: 2, .. })));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        assert!(matches!(
            read_operations(Path::new("does/not/exist.csv")),
            Err(ScriptError::Open(_))
        ));
    }

    #[test]
    fn operations_outlive_the_path() {
        let file = write_csv("op,amount\ncredit,7\n");
        let operations = {
            let path = file.path().to_path_buf();
            read_operations(&path).unwrap()
        };
        let handle = std::thread::spawn(move || operations.collect::<Vec<_>>());
        let lines = handle.join().unwrap();
        assert_eq!(lines[0].as_ref().unwrap().operation, Operation::Credit(7));
    }

    #[test]
    fn write_outcomes_leaves_missing_values_empty() {
        let mut out = Vec::new();
        let rows = vec![
            OutcomeRow {
                line: 2,
                op: "debit",
                amount: Some(10),
                status: "insufficient_funds",
                balance: None,
            },
            OutcomeRow {
                line: 3,
                op: "balance",
                amount: None,
                status: "ok",
                balance: Some(5),
            },
        ];
        write_outcomes(rows, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "line,op,amount,status,balance\n2,debit,10,insufficient_funds,\n3,balance,,ok,5\n"
        );
    }

    #[tokio::test]
    async fn run_continues_after_refused_operation() {
        let config = SessionConfig::default().with_poll_interval(Duration::from_millis(10));
        let (wallet, task) = WalletService::spawn(SimulatedReaders::with_wallet_card(), config);
        wallet.wait_for_card().await.unwrap();

        let lines = [
            Operation::Credit(5),
            Operation::Debit(10),
            Operation::Credit(-1),
            Operation::Balance,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, operation)| ScriptLine {
            line: i + 2,
            operation,
        });

        let outcomes = run(&wallet, tokio_stream::iter(lines)).await;
        let statuses: Vec<_> = outcomes.iter().map(|o| (o.status, o.balance)).collect();
        assert_eq!(
            statuses,
            vec![
                ("ok", Some(5)),
                ("insufficient_funds", None),
                ("invalid_amount", None),
                ("ok", Some(5))
            ]
        );

        wallet.shutdown();
        task.await.unwrap();
    }
}
