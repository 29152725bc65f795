//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」です。
//! 外部システム（レコード store、メッセージ transport、時計、ID 採番）への
//! インターフェースを定義し、ループのロジックから実装の詳細を切り離します。
//!
//! # 設計原則
//! - store が source of truth（lease も sent_at もここにある）
//! - transport は配送だけ（状態は持たない）
//! - 時刻と ID は差し替え可能にしてテストを決定的にする

pub mod clock;
pub mod id_generator;
pub mod token_store;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::token_store::TokenStore;
pub use self::transport::{PublishFailure, PublishReport, Transport, TransportConfig};
