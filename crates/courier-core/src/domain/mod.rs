//! Domain model (token records, transitions, messages, ids, errors).
//!
//! - token: `TokenRecord` と識別子 `TokenKey`
//! - state: フィールドから導出するライフサイクル状態
//! - transition: ループごとの選択述語と変更（純粋関数）
//! - message: レコード → transport メッセージ
//! - outcome: ループ 1 回分のレポート

pub mod errors;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod state;
pub mod token;
pub mod transition;

pub use self::errors::{CourierError, ErrorKind, MessageError, StoreError, TransportError};
pub use self::ids::{InstanceId, RunId};
pub use self::message::{KeyScheme, MAX_BODY_BYTES, MessageBody, QueueMessage};
pub use self::outcome::CycleReport;
pub use self::state::TokenState;
pub use self::token::{FetchResult, TokenKey, TokenRecord};
pub use self::transition::{LoopKind, Transition, lease_expired};
