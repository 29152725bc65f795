//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてループを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **IngestionLoop**: 未送信トークンの claim → publish → commit
//! - **RefreshLoop**: `need_to_refresh` の再配送とフラグ解除
//! - **ResyncLoop**: metadata 未取得トークンの再配送と `sent_at` の打ち直し
//! - **ReaperLoop**: Lease 期限切れの回収
//! - **Scheduler**: 定期起動・重複起動の抑止・shutdown

pub mod builder;
pub mod ingestion_loop;
pub mod publisher;
pub mod reaper_loop;
pub mod refresh_loop;
pub mod resync_loop;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::ingestion_loop::IngestionLoop;
pub use self::publisher::{PublishOutcome, Publisher};
pub use self::reaper_loop::ReaperLoop;
pub use self::refresh_loop::RefreshLoop;
pub use self::resync_loop::ResyncLoop;
pub use self::scheduler::{Cycle, Firing, OverlapPolicy, Schedule, ScheduledJob, Scheduler, SchedulerHandle};
pub use self::status::TokenCounts;
