use std::path::PathBuf;

use crate::consts::{APP_NAME, CACHE_DIR_ENV};

/// Returns the user's home directory, if the environment names one
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if the environment names one
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for cached remote images.
///
/// `$PROTOFORGE_CACHE_DIR` always wins. Otherwise the platform cache location
/// is used. Returns `None` when neither can be determined.
pub fn cache_dir() -> Option<PathBuf> {
  if let Some(dir) = std::env::var_os(CACHE_DIR_ENV)
    && !dir.is_empty()
  {
    return Some(PathBuf::from(dir));
  }
  default_cache_dir()
}

#[cfg(windows)]
fn default_cache_dir() -> Option<PathBuf> {
  std::env::var_os("LOCALAPPDATA").map(|dir| PathBuf::from(dir).join(APP_NAME).join("Cache"))
}

#[cfg(not(windows))]
fn default_cache_dir() -> Option<PathBuf> {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .filter(|dir| !dir.is_empty())
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".cache")))?;
  Some(cache_home.join(APP_NAME))
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn explicit_cache_dir_takes_precedence() {
    temp_env::with_vars(
      [
        (CACHE_DIR_ENV, Some("/custom/images")),
        ("XDG_CACHE_HOME", Some("/custom/cache")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), Some(PathBuf::from("/custom/images")));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_cache_home_is_used() {
    temp_env::with_vars(
      [
        (CACHE_DIR_ENV, None::<&str>),
        ("XDG_CACHE_HOME", Some("/custom/cache")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), Some(PathBuf::from("/custom/cache").join(APP_NAME)));
      },
    );
  }

  #[test]
  #[serial]
  fn falls_back_to_home_cache() {
    temp_env::with_vars(
      [
        (CACHE_DIR_ENV, None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), Some(PathBuf::from("/home/user/.cache").join(APP_NAME)));
      },
    );
  }

  #[test]
  #[serial]
  fn no_home_means_no_cache_dir() {
    temp_env::with_vars(
      [
        (CACHE_DIR_ENV, None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", None::<&str>),
      ],
      || {
        assert_eq!(cache_dir(), None);
      },
    );
  }
}
