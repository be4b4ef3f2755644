//! Final output and exit code.

use crate::error::CliError;
use serde_json::Value;
use std::io::{self, Write};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Writes the outcome of the run and returns the exit code.
///
/// Success prints the result as pretty JSON on `out` and nothing else.
/// Failure prints the error chain on `err`.
pub fn report<O, E>(outcome: &anyhow::Result<Value>, out: &mut O, err: &mut E) -> u8
where
    O: Write,
    E: Write,
{
    match outcome {
        Ok(result) => match write_result(result, out) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                let _ = writeln!(err, "Error: failed to write result: {e}");
                EXIT_FAILURE
            }
        },
        Err(error) => {
            let cancelled = error
                .downcast_ref::<CliError>()
                .is_some_and(CliError::is_cancelled);
            if cancelled {
                tracing::warn!("run cancelled by operator");
            }
            let _ = writeln!(err, "Error: {error:#}");
            EXIT_FAILURE
        }
    }
}

fn write_result<O: Write>(result: &Value, out: &mut O) -> io::Result<()> {
    let text = serde_json::to_string_pretty(result)?;
    writeln!(out, "{text}")?;
    out.flush()
}
