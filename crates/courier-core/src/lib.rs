//! courier-core
//!
//! managed queue を polling し、取得したメッセージを削除してから
//! subscriber へ転送するパイプラインの中核。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Message, DeleteEntry, DeleteOutcome, QueueMap, SubscribeTarget）
//! - **ports**: 抽象化レイヤー（QueueGateway, StatefulChannel, StatelessChannel）
//! - **impls**: 実装（InMemoryQueueGateway, HttpChannel, SocketChannel, SqsQueueGateway）
//! - **pipeline**: 1 パス分の処理（retrieval → delete → forward）と再配送の上限
//! - **scheduler**: polling 周期を駆動する actor
//! - **cache**: プロセス共有の key-value（scheduler handle の置き場）
//! - **config**: 設定
//! - **app**: 起動処理と cache 経由の clear / restart / shutdown

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod pipeline;
pub mod ports;
pub mod scheduler;

pub use crate::app::Worker;
pub use crate::config::CourierConfig;
pub use crate::error::{CourierError, DispatchError, GatewayError};
