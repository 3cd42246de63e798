use std::process::ExitCode;

fn main() -> ExitCode {
    match netscheduled::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("netscheduled: {error}");
            ExitCode::FAILURE
        }
    }
}
