use clap::Subcommand;
use plotjob_core::PlotConfig;

use crate::common::{print_json, CliFailure};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Print the config file path
    Path,
}

pub fn run(action: ConfigAction) -> Result<(), CliFailure> {
    match action {
        ConfigAction::Show => {
            let config = PlotConfig::load()?;
            print_json(&config)
        }
        ConfigAction::Path => {
            println!("{}", PlotConfig::path()?.display());
            Ok(())
        }
    }
}
