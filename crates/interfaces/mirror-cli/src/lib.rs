pub mod commands;
pub mod persistence;
pub mod profiles;

use clap::ValueEnum;
use mirror_pipeline::CopyMode;

#[derive(ValueEnum, Clone, Debug, Copy)]
pub enum CliCopyMode {
    /// Skip files whose size and modification time already match
    Metadata,
    /// Copy every file on each reconciliation
    Always,
}

impl From<CliCopyMode> for CopyMode {
    fn from(m: CliCopyMode) -> Self {
        match m {
            CliCopyMode::Metadata => CopyMode::MetadataDiff,
            CliCopyMode::Always => CopyMode::AlwaysCopy,
        }
    }
}
