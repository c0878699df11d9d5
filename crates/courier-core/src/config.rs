//! Config - プロセス設定
//!
//! TOML から読む。全キーにデフォルトがあり、queue の指定さえあれば
//! 空に近いファイルでも動く（stateless 配送・in_process polling）。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CourierError;
use crate::pipeline::{PipelineOptions, RedeliveryPolicy};

/// managed queue が 1 回の receive で返す最大件数
pub const RECEIVE_MAX_NUMBER_OF_MESSAGES: u32 = 10;

/// 自分で polling するか、外部トリガーを待つか
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    #[default]
    InProcess,
    ExternalTrigger,
}

/// subscriber への配送方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// 永続 socket 接続
    Stateful,
    /// メッセージごとに HTTP 呼び出し
    #[default]
    Stateless,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub polling_mode: PollingMode,
    pub poll_interval_ms: u64,
    /// 空のパスのあと、polling を再開するまでの待ち
    pub empty_delay_ms: u64,
    pub max_messages: u32,
    pub wait_time_secs: u32,
    pub delivery_mode: DeliveryMode,
    pub socket_addr: Option<String>,
    pub http_timeout_ms: u64,
    pub queue_urls: Vec<String>,
    pub queue_name_prefix: Option<String>,
    /// 配送失敗時の再送上限（body ごと）。0 は無制限
    pub max_redeliveries: u32,
    pub dead_letter_queue_url: Option<String>,
    pub batch_deletes: bool,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            polling_mode: PollingMode::InProcess,
            poll_interval_ms: 1_000,
            empty_delay_ms: 10_000,
            max_messages: RECEIVE_MAX_NUMBER_OF_MESSAGES,
            wait_time_secs: 1,
            delivery_mode: DeliveryMode::Stateless,
            socket_addr: None,
            http_timeout_ms: 5_000,
            queue_urls: Vec::new(),
            queue_name_prefix: None,
            max_redeliveries: 5,
            dead_letter_queue_url: None,
            batch_deletes: false,
        }
    }
}

impl CourierConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, CourierError> {
        toml::from_str(s).map_err(|e| CourierError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CourierError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        if self.poll_interval_ms == 0 {
            return Err(CourierError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.empty_delay_ms == 0 {
            return Err(CourierError::Config("empty_delay_ms must be > 0".into()));
        }
        if self.delivery_mode == DeliveryMode::Stateful && self.socket_addr.is_none() {
            return Err(CourierError::Config(
                "stateful delivery needs socket_addr".into(),
            ));
        }
        if self.queue_urls.is_empty() && self.queue_name_prefix.is_none() {
            return Err(CourierError::Config(
                "set queue_urls or queue_name_prefix".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn empty_delay(&self) -> Duration {
        Duration::from_millis(self.empty_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// receive の上限件数（managed queue の許容範囲に丸める）
    pub fn receive_ceiling(&self) -> u32 {
        self.max_messages.clamp(1, RECEIVE_MAX_NUMBER_OF_MESSAGES)
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        let mut policy = if self.max_redeliveries == 0 {
            RedeliveryPolicy::unbounded()
        } else {
            RedeliveryPolicy::bounded(self.max_redeliveries)
        };
        policy.dead_letter_queue_url = self.dead_letter_queue_url.clone();
        policy
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_messages: self.receive_ceiling(),
            batch_deletes: self.batch_deletes,
            redelivery: self.redelivery_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = CourierConfig::from_toml_str("").unwrap();
        assert_eq!(config, CourierConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.empty_delay(), Duration::from_secs(10));
    }

    #[test]
    fn parses_every_section() {
        let config = CourierConfig::from_toml_str(
            r#"
            polling_mode = "external_trigger"
            poll_interval_ms = 250
            empty_delay_ms = 3000
            max_messages = 50
            delivery_mode = "stateful"
            socket_addr = "127.0.0.1:7000"
            queue_urls = ["https://sqs/1/a", "https://sqs/1/b"]
            max_redeliveries = 0
            dead_letter_queue_url = "https://sqs/1/dead"
            batch_deletes = true
            "#,
        )
        .unwrap();

        assert_eq!(config.polling_mode, PollingMode::ExternalTrigger);
        assert_eq!(config.delivery_mode, DeliveryMode::Stateful);
        assert_eq!(config.receive_ceiling(), 10);
        assert_eq!(config.queue_urls.len(), 2);
        assert!(config.batch_deletes);
        config.validate().unwrap();

        let policy = config.redelivery_policy();
        assert_eq!(policy.max_redeliveries, None);
        assert_eq!(policy.dead_letter_queue_url.as_deref(), Some("https://sqs/1/dead"));
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        let err = CourierConfig::from_toml_str(r#"delivery_mode = "carrier_pigeon""#).unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn validate_rejects_incomplete_configs() {
        let mut config = CourierConfig {
            queue_urls: vec!["q".into()],
            ..CourierConfig::default()
        };
        config.validate().unwrap();

        config.delivery_mode = DeliveryMode::Stateful;
        assert!(config.validate().is_err());
        config.socket_addr = Some("127.0.0.1:7000".into());
        config.validate().unwrap();

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.poll_interval_ms = 1;

        config.queue_urls.clear();
        assert!(config.validate().is_err());
        config.queue_name_prefix = Some("orders".into());
        config.validate().unwrap();
    }
}
