mod app;
mod args;
mod logging;
mod prompt;
mod resources;

use clap::Parser;

fn main() {
    logging::init();
    let args = args::Args::parse();
    if let Err(err) = app::run(args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
