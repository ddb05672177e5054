//! Binary entry point for the dedicated zone server.

use std::process::ExitCode;

fn main() -> ExitCode {
    ExitCode::from(sw_core::dedicated_server::run_dedicated_server().clamp(0, 255) as u8)
}
