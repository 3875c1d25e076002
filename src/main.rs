// src/main.rs

use skytest::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("skytest: failed to initialise logging: {err:?}");
        std::process::exit(2);
    }

    match run(args).await {
        Ok(verdict) => std::process::exit(verdict.exit_code()),
        Err(err) => {
            eprintln!("skytest error: {err:?}");
            let code = if err.is_config_error() { 2 } else { 1 };
            std::process::exit(code);
        }
    }
}
