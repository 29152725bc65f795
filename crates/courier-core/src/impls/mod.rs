//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTokenStore**: 挿入順スキャンのレコード store
//! - **InMemoryTransport**: 重複排除ウィンドウ付き FIFO 配送路
//!
//! 本番用の store / transport クライアントはホスト側が `TokenStore` /
//! `Transport` を実装して差し込みます。

pub mod inmem_store;
pub mod inmem_transport;

pub use self::inmem_store::InMemoryTokenStore;
pub use self::inmem_transport::InMemoryTransport;
