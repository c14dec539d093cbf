use std::path::PathBuf;
use std::time::Duration;

use harvester_common::{Config, RetailersFile};
use harvester_manager::Manager;
use tokio::sync::RwLock;

use crate::csrf::CsrfStore;
use crate::rate_limit::RateLimiter;

const LOG_POLL_BURST: usize = 30;
const LOG_POLL_WINDOW: Duration = Duration::from_secs(60);

pub struct AppState {
    pub global: Config,
    pub config_path: PathBuf,
    pub retailers: RwLock<RetailersFile>,
    pub manager: Manager,
    pub csrf: CsrfStore,
    pub log_rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(global: Config, config_path: PathBuf, retailers: RetailersFile) -> Self {
        Self {
            global,
            config_path,
            retailers: RwLock::new(retailers),
            manager: Manager::new(),
            csrf: CsrfStore::new(),
            log_rate_limiter: RateLimiter::new(LOG_POLL_BURST, LOG_POLL_WINDOW),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.global.data_dir)
    }
}
