//! Scheduler - 一定周期で polling パスを駆動する
//!
//! 1 つの task が scheduler の状態（timer、実行中のパス、公開する status）を
//! すべて持つ。外からは clone できる [`SchedulerHandle`] 経由で操作する
//! （コマンドは `mpsc`、status は `watch`）。
//!
//! # 振る舞い
//! - `start`: すぐに 1 パス、以降 poll interval ごとに 1 パス
//! - 空のパス: 周期 timer を 1 回きりの delay に差し替え、経過後に start からやり直す
//! - single-flight: パス実行中に来た tick はスキップ
//!   （clear 前の古いパスが残っていたら、その完了直後に新しいパスを始める）
//! - `clear`: timer を止める。実行中のパスは最後まで走るが次に繋がらない
//! - パスの失敗: 停止する。restart するかは呼び出し側が決める
//!
//! task は `shutdown` か、handle がすべて drop されたら終わる。

pub mod status;

pub use self::status::{PollMode, SchedulerState, SchedulerStatus};

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::error::CourierError;
use crate::pipeline::{PassSummary, Pipeline};

/// restart 時に再実行するトップレベルの準備処理
///
/// queue 識別子の解決と配送経路の再接続
#[async_trait]
pub trait Bootstrap: Send + Sync {
    async fn prepare(&self) -> Result<Vec<String>, CourierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTiming {
    pub poll_interval: Duration,
    /// 空のパスのあとに入れる delay
    pub empty_delay: Duration,
}

enum Command {
    Start {
        queue_urls: Vec<String>,
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Restart {
        reply: oneshot::Sender<Result<(), CourierError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// scheduler task の制御 handle
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SchedulerStatus>,
}

impl SchedulerHandle {
    /// `queue_urls` の polling を始める（動いているサイクルは置き換える）
    pub async fn start(&self, queue_urls: Vec<String>) -> Result<(), CourierError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { queue_urls, reply }).await?;
        rx.await.map_err(|_| CourierError::SchedulerClosed)
    }

    /// timer を止める。冪等
    pub async fn clear(&self) -> Result<(), CourierError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Clear { reply }).await?;
        rx.await.map_err(|_| CourierError::SchedulerClosed)
    }

    /// clear → 準備処理（queue 解決・再接続）→ start
    pub async fn restart(&self) -> Result<(), CourierError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Restart { reply }).await?;
        rx.await.map_err(|_| CourierError::SchedulerClosed)?
    }

    /// clear して task を終える。終了済みでも成功
    pub async fn shutdown(&self) -> Result<(), CourierError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    /// status が `predicate` を満たすまで待つ
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SchedulerStatus) -> bool,
    ) -> Result<SchedulerStatus, CourierError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| CourierError::SchedulerClosed)?;
        Ok(matched.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), CourierError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CourierError::SchedulerClosed)
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

pub struct Scheduler;

impl Scheduler {
    /// 停止状態の scheduler task を起動する。polling は [`SchedulerHandle::start`] で始まる
    pub fn spawn(
        pipeline: Arc<Pipeline>,
        bootstrap: Arc<dyn Bootstrap>,
        timing: SchedulerTiming,
    ) -> SchedulerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());

        let actor = SchedulerActor {
            pipeline,
            bootstrap,
            timing,
            commands: commands_rx,
            status_tx,
            status: SchedulerStatus::default(),
            timer: None,
            in_flight: None,
            launch_when_idle: false,
            epoch: 0,
        };
        tokio::spawn(actor.run());

        SchedulerHandle {
            commands: commands_tx,
            status: status_rx,
        }
    }
}

enum Timer {
    Recurring(Interval),
    Delay(Pin<Box<Sleep>>),
}

#[derive(Debug, Clone, Copy)]
enum Fired {
    Recurring,
    Delay,
}

type PassResult = Result<PassSummary, CourierError>;

struct InFlight {
    /// パスを始めたときの epoch（clear で進む）
    epoch: u64,
    handle: JoinHandle<PassResult>,
}

struct SchedulerActor {
    pipeline: Arc<Pipeline>,
    bootstrap: Arc<dyn Bootstrap>,
    timing: SchedulerTiming,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SchedulerStatus>,
    status: SchedulerStatus,
    timer: Option<Timer>,
    in_flight: Option<InFlight>,
    /// 古い epoch のパスが終わったらすぐ始めるパスがある
    launch_when_idle: bool,
    epoch: u64,
}

impl SchedulerActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                fired = next_tick(&mut self.timer) => self.on_timer(fired),
                (epoch, joined) = join_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.on_pass_finished(epoch, joined);
                }
            }
        }
        self.clear();
        debug!("scheduler task finished");
    }

    /// task を終えるなら false
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Start { queue_urls, reply } => {
                self.start(queue_urls);
                let _ = reply.send(());
                true
            }
            Command::Clear { reply } => {
                self.clear();
                let _ = reply.send(());
                true
            }
            Command::Restart { reply } => {
                let result = self.restart().await;
                let _ = reply.send(result);
                true
            }
            Command::Shutdown { reply } => {
                self.clear();
                info!("scheduler shut down");
                let _ = reply.send(());
                false
            }
        }
    }

    fn start(&mut self, queue_urls: Vec<String>) {
        info!(queues = ?queue_urls, "start polling messages");
        self.status.queue_urls = queue_urls;
        self.status.last_error = None;
        self.arm_polling();
    }

    fn arm_polling(&mut self) {
        // 最初の tick は即時。これが初回のパス
        let mut interval = tokio::time::interval(self.timing.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(Timer::Recurring(interval));
        self.set_state(SchedulerState::Running(PollMode::Polling));
    }

    fn arm_delay(&mut self) {
        info!(
            delay_secs = self.timing.empty_delay.as_secs(),
            "queues have no messages, delaying polling"
        );
        self.timer = Some(Timer::Delay(Box::pin(tokio::time::sleep(
            self.timing.empty_delay,
        ))));
        self.status.delays_armed += 1;
        self.set_state(SchedulerState::Running(PollMode::Delayed));
    }

    fn clear(&mut self) {
        if self.timer.is_none() && !self.status.state.is_running() {
            debug!("scheduler already stopped");
            return;
        }
        self.timer = None;
        self.launch_when_idle = false;
        self.epoch += 1;
        info!("polling cleared");
        self.set_state(SchedulerState::Stopped);
    }

    async fn restart(&mut self) -> Result<(), CourierError> {
        self.clear();
        let queue_urls = match self.bootstrap.prepare().await {
            Ok(queue_urls) => queue_urls,
            Err(e) => {
                error!(error = %e, "restart failed while preparing");
                self.status.last_error = Some(e.to_string());
                self.publish();
                return Err(e);
            }
        };
        if queue_urls.is_empty() {
            warn!("no queues resolved on restart, scheduler stays stopped");
            return Ok(());
        }
        self.start(queue_urls);
        Ok(())
    }

    fn on_timer(&mut self, fired: Fired) {
        match fired {
            Fired::Recurring => match &self.in_flight {
                Some(pass) if pass.epoch != self.epoch => {
                    debug!("pass from before clear still running, new pass queued");
                    self.launch_when_idle = true;
                }
                Some(_) => {
                    self.status.skipped_ticks += 1;
                    debug!("previous pass still running, tick skipped");
                    self.publish();
                }
                None => self.launch_pass(),
            },
            Fired::Delay => {
                info!("delay elapsed, resuming polling");
                self.arm_polling();
            }
        }
    }

    fn launch_pass(&mut self) {
        let pipeline = self.pipeline.clone();
        let queue_urls = self.status.queue_urls.clone();
        let handle = tokio::spawn(async move {
            // report の drop で配送は切り離される
            let report = pipeline.run_pass(&queue_urls).await?;
            Ok(report.summary())
        });
        self.in_flight = Some(InFlight {
            epoch: self.epoch,
            handle,
        });
    }

    fn on_pass_finished(&mut self, epoch: u64, joined: Result<PassResult, JoinError>) {
        self.status.passes += 1;
        self.status.last_pass_at = Some(Utc::now());

        if epoch != self.epoch || !self.status.state.is_running() {
            debug!("pass finished after clear, result not chained");
            if std::mem::take(&mut self.launch_when_idle) && self.status.state.is_running() {
                self.launch_pass();
            }
            self.publish();
            return;
        }

        let result = joined
            .map_err(|e| CourierError::Scheduler(format!("pass task failed: {e}")))
            .and_then(|result| result);

        match result {
            Ok(summary) => {
                self.status.messages_retrieved += summary.retrieved as u64;
                self.status.messages_forwarded += summary.forwarded as u64;
                if summary.retrieved == 0 {
                    self.status.empty_passes += 1;
                    self.arm_delay();
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "polling pass failed, scheduler stopped");
                self.status.last_error = Some(e.to_string());
                self.timer = None;
                self.epoch += 1;
                self.set_state(SchedulerState::Stopped);
                return;
            }
        }
        self.publish();
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.status.state != state {
            debug!(from = ?self.status.state, to = ?state, "scheduler state changed");
        }
        self.status.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

async fn next_tick(timer: &mut Option<Timer>) -> Fired {
    match timer {
        Some(Timer::Recurring(interval)) => {
            interval.tick().await;
            Fired::Recurring
        }
        Some(Timer::Delay(sleep)) => {
            sleep.as_mut().await;
            Fired::Delay
        }
        None => pending().await,
    }
}

async fn join_in_flight(in_flight: &mut Option<InFlight>) -> (u64, Result<PassResult, JoinError>) {
    match in_flight {
        Some(pass) => {
            let joined = (&mut pass.handle).await;
            (pass.epoch, joined)
        }
        None => pending().await,
    }
}
