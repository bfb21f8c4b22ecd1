use std::env;

use console::style;
use offline_shell::cli;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match cli::parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            eprintln!();
            cli::print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run(args).await {
        eprintln!("{} {e}", style("error:").red().bold());
        std::process::exit(1);
    }
}
