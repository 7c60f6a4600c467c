//! Server-driven configuration: the kill switch and its persistence.

mod kill_switch;
mod storage;

pub use kill_switch::KillSwitchConfig;
pub use storage::{default_config_path, ConfigFileError, ConfigStorage, IniFileStorage, InMemoryStorage};
