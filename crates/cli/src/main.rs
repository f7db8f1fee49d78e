use std::process::ExitCode;

fn main() -> ExitCode {
    slackwire_cli::run()
}
