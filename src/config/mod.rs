pub mod paths;
pub mod types;

pub use paths::{webdavfs_config_dir, webdavfs_data_dir};
pub use types::{MountConfig, Verbosity};
