use std::process::ExitCode;

fn main() -> ExitCode {
    permitflow_cli::run()
}
