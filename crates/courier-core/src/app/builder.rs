//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: store / transport / config が揃っていなければ
//!   `build()` の時点でエラーにする（ループが起動してから落ちるよりずっと分かりやすい）

use std::sync::Arc;

use tracing::info;

use crate::app::ingestion_loop::IngestionLoop;
use crate::app::publisher::Publisher;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::refresh_loop::RefreshLoop;
use crate::app::resync_loop::ResyncLoop;
use crate::app::scheduler::{Scheduler, SchedulerHandle};
use crate::config::{ConfigError, CourierConfig};
use crate::domain::InstanceId;
use crate::ports::{Clock, IdGenerator, SystemClock, TokenStore, Transport, UlidGenerator};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .config(CourierConfig::from_env()?)
///     .store(Arc::new(store))
///     .transport(Arc::new(transport))
///     .build()?;
/// let scheduler = app.start();
/// ```
pub struct AppBuilder {
    config: Option<CourierConfig>,
    store: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no configuration was provided")]
    MissingConfig,

    #[error("no token store was provided")]
    MissingStore,

    #[error("no transport was provided")]
    MissingTransport,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            transport: None,
            clock: None,
            ids: None,
        }
    }

    pub fn config(mut self, config: CourierConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a [`UlidGenerator`] driven by the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let config = self.config.ok_or(BuildError::MissingConfig)?;
        config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let instance_id = ids.generate_instance_id();
        let publisher =
            Publisher::new(transport, config.key_scheme).with_max_body_bytes(config.max_body_bytes);

        let ingestion = Arc::new(IngestionLoop::new(
            Arc::clone(&store),
            publisher.clone(),
            Arc::clone(&clock),
            Arc::clone(&ids),
            instance_id,
            config.source.clone(),
            config.ingestion_limit,
        ));
        let refresh = Arc::new(RefreshLoop::new(
            Arc::clone(&store),
            publisher.clone(),
            Arc::clone(&ids),
            config.source.clone(),
            config.refresh_limit,
        ));
        let resync = Arc::new(ResyncLoop::new(
            Arc::clone(&store),
            publisher,
            Arc::clone(&clock),
            Arc::clone(&ids),
            config.source.clone(),
        ));
        let reaper = Arc::new(ReaperLoop::new(
            Arc::clone(&store),
            clock,
            ids,
            config.source.clone(),
            config.lease_timeout_chrono(),
        ));

        Ok(App {
            instance_id,
            config,
            store,
            ingestion,
            refresh,
            resync,
            reaper,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は組み立て済みの 4 つのループ
///
/// テストやホストは各ループの `run_once()` を直接呼べます。
/// 定期実行は `start()` で。
pub struct App {
    pub instance_id: InstanceId,
    pub config: CourierConfig,
    pub store: Arc<dyn TokenStore>,
    pub ingestion: Arc<IngestionLoop>,
    pub refresh: Arc<RefreshLoop>,
    pub resync: Arc<ResyncLoop>,
    pub reaper: Arc<ReaperLoop>,
}

impl App {
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new()
            .add(self.config.ingestion, self.ingestion.clone())
            .add(self.config.refresh, self.refresh.clone())
            .add(self.config.resync, self.resync.clone())
            .add(self.config.reaper, self.reaper.clone())
    }

    pub fn start(&self) -> SchedulerHandle {
        info!(
            instance = %self.instance_id,
            source = %self.config.source,
            key_scheme = ?self.config.key_scheme,
            "starting courier"
        );
        self.scheduler().start()
    }
}
