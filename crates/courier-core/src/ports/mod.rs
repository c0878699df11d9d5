//! Ports - 抽象化レイヤー
//!
//! # 主要な trait
//! - **QueueGateway**: managed queue（receive / delete-batch / send / list）
//! - **StatefulChannel / StatelessChannel**: subscriber への転送

pub mod channel;
pub mod gateway;

pub use self::channel::{DeliveryChannel, StatefulChannel, StatelessChannel};
pub use self::gateway::QueueGateway;
