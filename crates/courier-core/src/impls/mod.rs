//! Impls - 実装
//!
//! # 含まれるもの
//! - **InMemoryQueueGateway**: 開発・テスト・`--demo` 用の managed queue
//! - **HttpChannel**: HTTP による stateless 配送
//! - **SocketChannel**: 永続 TCP 接続による stateful 配送
//! - **LoopbackChannel**: 配送を記録するプロセス内 subscriber
//! - **SqsQueueGateway**: AWS SQS（feature `sqs`）

pub mod http_channel;
pub mod inmem_gateway;
pub mod loopback;
pub mod socket_channel;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use self::http_channel::HttpChannel;
pub use self::inmem_gateway::InMemoryQueueGateway;
pub use self::loopback::{Delivery, LoopbackChannel};
pub use self::socket_channel::SocketChannel;
#[cfg(feature = "sqs")]
pub use self::sqs::SqsQueueGateway;
