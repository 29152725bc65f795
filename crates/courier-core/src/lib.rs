//! courier-core
//!
//! Scheduled publisher that moves token records from a store into a FIFO
//! message queue and keeps their lifecycle fields consistent.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（token, state, transition, message, ids, errors, outcome）
//! - **ports**: 抽象化レイヤー（TokenStore, Transport, Clock, IdGenerator）
//! - **app**: ループとスケジューラ（ingestion, refresh, resync, reaper, builder）
//! - **impls**: 実装（InMemoryTokenStore, InMemoryTransport など開発用）
//! - **config**: 環境変数からの設定読み込み

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use self::app::{App, AppBuilder, BuildError, Cycle, SchedulerHandle};
pub use self::config::{ConfigError, CourierConfig};
