use clap::Parser;

use stationd::cli::{self, Cli};
use stationd::telemetry;

fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    if let Err(err) = cli::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
