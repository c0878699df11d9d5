//! SchedulerState / SchedulerStatus - 状態機械と公開する status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 動作中のサブモード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollMode {
    /// poll interval の周期 timer
    Polling,
    /// 空のパスのあとの 1 回きりの timer
    Delayed,
}

/// SchedulerState は scheduler の状態
///
/// # 状態遷移
/// - Stopped → Running(Polling): start
/// - Running(Polling) → Running(Delayed): パスがメッセージを見つけなかった
/// - Running(Delayed) → Running(Polling): delay 経過
/// - Running(_) → Stopped: clear、またはパスの失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    Stopped,
    Running(PollMode),
}

impl SchedulerState {
    pub fn is_running(self) -> bool {
        matches!(self, SchedulerState::Running(_))
    }

    pub fn mode(self) -> Option<PollMode> {
        match self {
            SchedulerState::Running(mode) => Some(mode),
            SchedulerState::Stopped => None,
        }
    }
}

/// 変化のたびに公開される snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub queue_urls: Vec<String>,
    /// 終わったパスの数（成否問わず）
    pub passes: u64,
    pub empty_passes: u64,
    /// 前のパスが実行中でスキップした tick
    pub skipped_ticks: u64,
    /// 入れた delay の数
    pub delays_armed: u64,
    pub messages_retrieved: u64,
    pub messages_forwarded: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Stopped,
            queue_urls: Vec::new(),
            passes: 0,
            empty_passes: 0,
            skipped_ticks: 0,
            delays_armed: 0,
            messages_retrieved: 0,
            messages_forwarded: 0,
            last_pass_at: None,
            last_error: None,
        }
    }
}
