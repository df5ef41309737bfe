//! Mailbox device path resolution.

use std::path::{Path, PathBuf};

/// Directory holding the mailbox character devices.
pub(crate) const DEFAULT_DEV_DIR: &str = "/dev/mbox/0/";

/// File name prefix of numbered mailbox devices.
const FILE_PREFIX: &str = "mbox";

/// Resolves a mailbox argument to a device path.
///
/// Absolute paths are used as given; anything else is looked up in
/// `dev_dir`, and a bare index such as `3` becomes `mbox3`.
pub(crate) fn expand(arg: &str, dev_dir: &Path) -> PathBuf {
    if arg.starts_with('/') {
        PathBuf::from(arg)
    } else if arg.starts_with(|c: char| c.is_ascii_digit()) {
        dev_dir.join(format!("{FILE_PREFIX}{arg}"))
    } else {
        dev_dir.join(arg)
    }
}

/// Mailbox index encoded in a device name (`.../mbox7` → 7).
pub(crate) fn index(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(FILE_PREFIX)?
        .parse()
        .ok()
}
