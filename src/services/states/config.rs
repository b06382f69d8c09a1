use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::num::NonZeroU32;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct CommonConfig {
    pub host: Cow<'static, str>,
    pub port: u16,
    pub log_level: Cow<'static, str>,
    pub concurrency_limit: usize,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18080,
            log_level: "info,tusker=debug".into(),
            concurrency_limit: 128,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataBaseConfig {
    pub db_url: Cow<'static, str>,
    pub sqlite_connection_nums: u32,
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite://data/tusker.db".into(),
            sqlite_connection_nums: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Byte ceiling for any single upload; unset means unlimited.
    pub max_size: Option<u64>,
    /// Seconds added to now for each `Upload-Expires` refresh.
    pub expiration_time: u64,
    /// Seconds between expiration sweeps.
    pub sweep_interval: u64,
    /// Storage block size; the first write may fix a smaller one per upload.
    pub chunk_size: NonZeroU32,
    /// `inline` or `attachment` on downloads.
    pub disposition: Cow<'static, str>,
    /// When set, GET answers with a redirect to this template instead of
    /// streaming; `{uid}` is substituted.
    pub redirect_download: Option<String>,
    /// CORS allow-list; empty disables cross-origin reflection.
    pub request_origins: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            expiration_time: 7 * 24 * 60 * 60,
            sweep_interval: 60 * 60,
            chunk_size: NonZeroU32::new(256 * 1024).unwrap(), // 256 kb
            disposition: "inline".into(),
            redirect_download: None,
            request_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub db: DataBaseConfig,
    pub upload: UploadConfig,
}

impl AppConfig {
    pub fn load(cfg_path: &str) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("TUSKER_").split("__").global());
        if Path::new(cfg_path).exists() {
            figment = figment.merge(Toml::file(cfg_path));
        }
        figment.extract().map_err(Into::into)
    }
}
