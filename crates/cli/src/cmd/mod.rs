mod bundles;
mod generate;
mod lock;
mod publish;
mod which;

use std::path::{Path, PathBuf};

pub use bundles::cmd_bundles;
pub use generate::cmd_generate;
pub use lock::cmd_lock;
pub use publish::cmd_publish;
pub use which::cmd_which;

/// Where generated files go: `out` when given, relative to the working
/// directory, otherwise the repository root.
fn output_root(repo: &Path, out: Option<&Path>) -> PathBuf {
  out.map(Path::to_path_buf).unwrap_or_else(|| repo.to_path_buf())
}
