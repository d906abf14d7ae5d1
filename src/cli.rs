// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hidtray")]
#[command(author, version, about = "Battery monitor for Logitech HID++ and HyperX wireless devices")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (default: ~/.config/hidtray/settings.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch devices and print battery changes (default)
    ///
    /// SIGUSR1 forces a battery refresh, SIGHUP reloads the settings file.
    Run {
        /// Print events as JSON lines instead of tooltips
        #[arg(long)]
        json: bool,

        /// Mirror battery state into sysfs-like files under DIR
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,
    },

    /// List HID interfaces of supported vendors
    #[command(visible_alias = "ls")]
    List,

    /// Write the default settings file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Self::Run {
            json: false,
            export_dir: None,
        }
    }
}
