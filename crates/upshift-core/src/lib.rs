mod distribution;
mod move_set;
mod outcome;
mod properties;
mod version;

pub use distribution::Distribution;
pub use move_set::{MoveEntry, MoveSet, SuffixVariant, UPGRADE_DIRS_PROPERTY};
pub use outcome::{CommandOutcome, HostPlatform};
pub use properties::{format_property, parse_properties};
pub use version::{
    parse_installed_version, prevent_version_downgrade, ServerVersion, VersionCheckError,
};

#[cfg(test)]
mod tests;
