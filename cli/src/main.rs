use clap::Parser;
use lincona_cli::Cli;
use lincona_cli::run_main;

fn main() {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(lincona_cli::EXIT_ERROR);
        }
    };
    let code = runtime.block_on(run_main(cli));
    std::process::exit(code);
}
