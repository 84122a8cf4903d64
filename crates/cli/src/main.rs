use std::process::ExitCode;

fn main() -> ExitCode {
    spendgate_cli::run()
}
