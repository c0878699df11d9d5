//! App - アプリケーション層
//!
//! pipeline と scheduler を組み合わせ、プロセスの入口を提供します。
//!
//! # 主要コンポーネント
//! - **Worker**: 起動（queue 解決 → 接続 → scheduler 起動 → cache 登録）
//! - **QueueBootstrap**: restart 時にも再実行されるトップレベルの準備処理
//! - **control**: cache 経由の clear / restart / shutdown

pub mod control;
pub mod worker;

// 主要な型を再エクスポート
pub use self::control::{clear, restart, scheduler_status, shutdown, wait_for_failure};
pub use self::worker::{QueueBootstrap, Worker};
