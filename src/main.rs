use std::process::ExitCode;

use planwright::{cli, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    logging::init_logging(args.log_level);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("planwright error: {err}");
            ExitCode::FAILURE
        }
    }
}
