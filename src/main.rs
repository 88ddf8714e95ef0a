use std::process::ExitCode;

use livegate::app::App;
use livegate::cli::{self, Args};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::from_env() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            eprintln!("{}", cli::usage());
            return ExitCode::from(1);
        }
    };

    if args.help {
        println!("{}", cli::usage());
        return ExitCode::SUCCESS;
    }

    let app = match App::build(args).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            eprintln!("Error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
