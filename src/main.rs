use std::process::ExitCode;

fn main() -> ExitCode {
    match sdlc_server::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
