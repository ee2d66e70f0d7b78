//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                |
//! |----------|---------------------------------|
//! | `serve`  | `Serve`                         |
//! | `run`    | `Trigger`, `Resume`, `Status`   |
//! | `data`   | `Import`, `Db`                  |
//! | `config` | `Config`                        |

pub mod config;
pub mod data;
pub mod run;
pub mod serve;

use std::path::PathBuf;

use anyhow::Result;
use draftline::config::{CONFIG_FILE, DraftlineToml};
use draftline::store::DbHandle;

pub use config::cmd_config;
pub use data::{cmd_db, cmd_import};
pub use run::{cmd_resume, cmd_status, cmd_trigger};
pub use serve::cmd_serve;

/// Directory, config path and loaded configuration shared by every command.
pub struct Workspace {
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub config: DraftlineToml,
}

impl Workspace {
    pub fn load(dir: PathBuf, config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(|| dir.join(CONFIG_FILE));
        let config = if config_path.exists() {
            DraftlineToml::load(&config_path)?
        } else {
            DraftlineToml::default()
        };
        Ok(Self {
            dir,
            config_path,
            config,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.database_path(&self.dir)
    }

    pub fn open_db(&self) -> Result<DbHandle> {
        draftline::server::open_database(&self.database_path())
    }
}
