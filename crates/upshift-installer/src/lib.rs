mod archive;
mod descriptor;
mod layout;
mod lock;
mod permissions;
mod staging;
mod tree;

pub use archive::{extract_zip, locate_distribution_root, ExtractReport};
pub use descriptor::{read_move_set_descriptor, resolve_move_set, write_move_set_descriptor};
pub use layout::{default_install_root, make_scratch_dir, InstallLayout, INSTALL_ROOT_ENV};
pub use lock::{break_install_lock, InstallLock};
pub use permissions::fix_permissions;
pub use staging::{
    EntryRecord, EntryState, EntryStatus, StageMode, StagingEngine, TerminalOutcome,
};
pub use tree::{
    copy_tree, delete_tree, move_tree, path_exists, rename_entry, tolerate_nothing, CopyReport,
    MissingSubtree,
};
