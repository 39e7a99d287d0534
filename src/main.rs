use anyhow::Result;
use arbor::{
    SiteConfig, SiteGen,
    cli::{Cli, Commands},
    log,
    reload::Notifier,
    serve::serve_site,
    utils::exec,
};
use clap::Parser;
use std::{
    process::ExitCode,
    sync::{Arc, Mutex},
};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = SiteConfig::load(&cli)?;
    let mut sg = SiteGen::new(config)?;

    match cli.command {
        Commands::Build { .. } => {
            let summary = sg.build_all(false);
            exec::wait_for_detached();
            if summary.is_ok() {
                Ok(ExitCode::SUCCESS)
            } else {
                log!("error"; "{} source(s) failed to build", summary.errors.len());
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Serve { .. } => {
            let summary = sg.build_all(false);
            if !summary.is_ok() {
                log!("error"; "{} source(s) failed to build", summary.errors.len());
            }
            serve_site(Arc::new(Mutex::new(sg)), Notifier::new())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
