use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cloak_core::codec::ValueKind;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cloak",
    about = "Encrypted, typed preferences backed by the OS keyring",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Preference file to use instead of the configured one.
    #[arg(long, global = true, value_name = "PATH")]
    pub file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encrypt and store a value. Set elements are passed as separate words.
    Put {
        key: String,
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
        #[arg(long, value_enum, default_value_t = Kind::String)]
        kind: Kind,
    },
    /// Decrypt and print a value.
    Get {
        key: String,
        #[arg(long, value_enum, default_value_t = Kind::String)]
        kind: Kind,
        /// Printed when the key is absent.
        #[arg(long)]
        default: Option<String>,
    },
    /// Remove one entry.
    Remove { key: String },
    /// Remove every entry.
    Clear,
    /// Report whether an entry exists (without decrypting it).
    Contains { key: String },
    /// List stored keys.
    Keys,
    /// Round-trip a probe value through the keyring and the preference file.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Int,
    Long,
    Float,
    Bool,
    Set,
}

impl From<Kind> for ValueKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::String => ValueKind::String,
            Kind::Int => ValueKind::Int,
            Kind::Long => ValueKind::Long,
            Kind::Float => ValueKind::Float,
            Kind::Bool => ValueKind::Bool,
            Kind::Set => ValueKind::StringSet,
        }
    }
}
