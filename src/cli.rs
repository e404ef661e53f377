use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Formats a block device against a named format configuration.
    #[clap(name = "dev-format")]
    DevFormat {
        /// Id of the format configuration to apply.
        format_config_id: String,
        /// YAML file listing every format configuration.
        format_configs_file: PathBuf,
        /// JSON file with at least `password-user`, `fs-data`, `enctype-data`.
        params_file: PathBuf,
        /// The block device to format.
        devfile: PathBuf,
        /// Partition table format already laid out on `devfile`.
        #[clap(long, default_value = "gpt")]
        label_type: String,
    },

    /// Unlocks a previously-formatted device.
    Unlock {
        /// The block device to unlock.
        devfile: PathBuf,
        /// Prompted passwords to try, in order, up to the device's
        /// attempt limit.
        #[clap(required = true)]
        passwords: Vec<String>,
        /// Partition table format already laid out on `devfile`.
        #[clap(long, default_value = "gpt")]
        label_type: String,
    },

    /// Builds a live image from a build configuration.
    Build {
        /// YAML build configuration.
        config: PathBuf,
        /// Directory containing every component named in `config`.
        sources_dir: PathBuf,
        /// Directory the produced image and artifacts are written to.
        out_dir: PathBuf,
    },

    /// Validates a build or format configuration file without acting on it.
    Validate {
        /// YAML configuration file.
        config: PathBuf,
    },

    /// Manages the declared users of a formatted device's credential store.
    User {
        #[clap(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Declares a new user, or changes an existing one's password.
    Add {
        dummy_mountpoint: PathBuf,
        cn: String,
        password: String,
    },
    /// Lists every declared user's display name.
    List { dummy_mountpoint: PathBuf },
    /// Changes the password for the user currently authenticated by `current`.
    Passwd {
        dummy_mountpoint: PathBuf,
        current: String,
        new: String,
    },
    /// Removes a declared user.
    Rm {
        dummy_mountpoint: PathBuf,
        cn: String,
    },
}
