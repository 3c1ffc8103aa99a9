mod assign;
mod centroid;
mod cli;
mod config;
mod detect;
mod engine;
mod filter;
mod input;
mod ipc;
mod logging;
mod report;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
