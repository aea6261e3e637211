//! StoreBuilder - ContentStore の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::app::paths::PathTranslator;
use crate::app::stager::{CacheStager, StagerSettings};
use crate::app::store::ContentStore;
use crate::config::ContentsConfig;
use crate::error::ContentsError;
use crate::ports::{Clock, LocalStore, RemoteEndpoint, SystemClock};

/// StoreBuilder は ContentStore を構築
///
/// # 使用例
/// ```ignore
/// let store = StoreBuilder::new(ContentsConfig::from_env()?)
///     .remote(Arc::new(TransferApiClient::new(&api)?))
///     .local_store(Arc::new(TokioLocalStore::new()))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - remote / local store が未設定なら BuildError
/// - build() 時に ContentsConfig::validate() を実行
/// - clock は省略時 SystemClock
pub struct StoreBuilder {
    config: ContentsConfig,
    remote: Option<Arc<dyn RemoteEndpoint>>,
    local: Option<Arc<dyn LocalStore>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はストア構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No remote endpoint adapter was configured.")]
    MissingRemote,

    #[error("No local store was configured.")]
    MissingLocalStore,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[source] ContentsError),
}

impl StoreBuilder {
    pub fn new(config: ContentsConfig) -> Self {
        Self {
            config,
            remote: None,
            local: None,
            clock: None,
        }
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteEndpoint>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 検証してから ContentStore を生成
    pub fn build(self) -> Result<ContentStore, BuildError> {
        self.config.validate().map_err(BuildError::InvalidConfig)?;
        let remote = self.remote.ok_or(BuildError::MissingRemote)?;
        let local = self.local.ok_or(BuildError::MissingLocalStore)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let config = self.config;
        let staging_timeout = config.staging_timeout();
        let include_hidden = config.include_hidden;
        let stager = CacheStager::new(
            remote.clone(),
            local.clone(),
            clock,
            PathTranslator::from_config(&config),
            StagerSettings {
                remote_endpoint: config.remote_endpoint_id.clone(),
                local_endpoint: config.local_endpoint_id.clone(),
                poll_interval: config.staging_poll_interval(),
            },
        );
        Ok(ContentStore::new(
            remote,
            local,
            stager,
            config.remote_endpoint_id,
            staging_timeout,
            include_hidden,
        ))
    }
}
