use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use courier_core::app::{self, Worker};
use courier_core::config::{CourierConfig, DeliveryMode};
use courier_core::impls::{HttpChannel, InMemoryQueueGateway, LoopbackChannel, SocketChannel};
use courier_core::ports::{DeliveryChannel, QueueGateway};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Delivery {
    Stateful,
    Stateless,
}

/// queue を polling して subscriber へ転送する
#[derive(Debug, Parser)]
#[command(name = "courier", version)]
struct Cli {
    /// 設定ファイル（TOML）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// in-memory queue とループバック subscriber で動かす
    #[arg(long)]
    demo: bool,

    #[arg(long)]
    debug: bool,

    /// 対象 queue（複数指定可）。設定ファイルの queue_urls を上書き
    #[arg(long = "queue-url")]
    queue_urls: Vec<String>,

    #[arg(long)]
    queue_prefix: Option<String>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[arg(long, value_enum)]
    delivery: Option<Delivery>,

    /// stateful 配送先（host:port）
    #[arg(long)]
    socket_addr: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut CourierConfig) {
        if !self.queue_urls.is_empty() {
            config.queue_urls = self.queue_urls.clone();
        }
        if let Some(prefix) = &self.queue_prefix {
            config.queue_name_prefix = Some(prefix.clone());
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(delivery) = self.delivery {
            config.delivery_mode = match delivery {
                Delivery::Stateful => DeliveryMode::Stateful,
                Delivery::Stateless => DeliveryMode::Stateless,
            };
        }
        if let Some(addr) = &self.socket_addr {
            config.socket_addr = Some(addr.clone());
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "courier_core=debug,courier=debug,info"
    } else {
        "courier_core=info,courier=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if debug {
        fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(false).compact().init();
    }
}

/// demo 用の queue を作り、サンプルメッセージを積む
async fn seed_demo(gateway: &InMemoryQueueGateway) -> Result<String, Box<dyn Error>> {
    let queue_url = gateway.create_queue("demo-orders").await;
    let bodies = [
        serde_json::json!({ "endPoint": "http://subscriber.local/orders", "params": "42" })
            .to_string(),
        serde_json::json!({ "endPoint": "http://subscriber.local/orders", "params": { "id": 7 } })
            .to_string(),
        "http://subscriber.local/ping".to_string(),
    ];
    for body in &bodies {
        gateway.send(&queue_url, body).await?;
    }
    info!(queue_url = %queue_url, seeded = bodies.len(), "demo queue ready");
    Ok(queue_url)
}

async fn build_gateway(
    config: &CourierConfig,
) -> Result<Arc<dyn QueueGateway>, Box<dyn Error>> {
    #[cfg(feature = "sqs")]
    {
        let gateway =
            courier_core::impls::SqsQueueGateway::from_env(config.wait_time_secs).await;
        Ok(Arc::new(gateway))
    }
    #[cfg(not(feature = "sqs"))]
    {
        let _ = config;
        Err("no queue backend: build with `--features sqs` or run with `--demo`".into())
    }
}

fn build_channel(config: &CourierConfig) -> Result<DeliveryChannel, Box<dyn Error>> {
    match config.delivery_mode {
        DeliveryMode::Stateful => {
            let addr = config
                .socket_addr
                .clone()
                .ok_or("stateful delivery needs --socket-addr")?;
            Ok(DeliveryChannel::Stateful(Arc::new(SocketChannel::new(addr))))
        }
        DeliveryMode::Stateless => Ok(DeliveryChannel::Stateless(Arc::new(HttpChannel::new(
            config.http_timeout(),
        )?))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = match &cli.config {
        Some(path) => CourierConfig::load(path)?,
        None => CourierConfig::default(),
    };
    cli.apply(&mut config);

    let (gateway, channel): (Arc<dyn QueueGateway>, DeliveryChannel) = if cli.demo {
        let memory = Arc::new(InMemoryQueueGateway::new());
        if config.queue_urls.is_empty() && config.queue_name_prefix.is_none() {
            config.queue_urls = vec![seed_demo(&memory).await?];
        }
        let gateway: Arc<dyn QueueGateway> = memory;
        let loopback = Arc::new(LoopbackChannel::new());
        let channel = match config.delivery_mode {
            DeliveryMode::Stateful => {
                config.socket_addr.get_or_insert_with(|| "loopback".to_string());
                DeliveryChannel::Stateful(loopback)
            }
            DeliveryMode::Stateless => DeliveryChannel::Stateless(loopback),
        };
        (gateway, channel)
    } else {
        (build_gateway(&config).await?, build_channel(&config)?)
    };
    config.validate()?;

    let worker = Worker::new(&config, gateway, channel);
    let Some(handle) = worker.start().await? else {
        warn!("external_trigger mode has no trigger endpoint in this binary, idling");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };
    info!(status = ?handle.status().state, "courier running, ctrl-c to stop");

    // pass が失敗したら止めて非ゼロで終了する。再起動は supervisor に任せる
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutting down");
            app::shutdown(worker.cache()).await?;
            Ok(())
        }
        failure = app::wait_for_failure(&handle) => {
            app::shutdown(worker.cache()).await?;
            Err(failure.into())
        }
    }
}
