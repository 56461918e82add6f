use std::process::ExitCode;

fn main() -> ExitCode {
    procura_cli::run()
}
