//! Uploads random blobs to a storage service, verifies them and reports timings as CSV.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    blobtester::cli::execute()
}
