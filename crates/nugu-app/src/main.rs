//! # nugu-app
//!
//! `nugu-gateway` CLI 진입점.
//! 설정을 읽어 Transport를 구성하고, 연결 상태와 수신 디렉티브를 출력한다.

mod printer;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use nugu_core::config::TransportConfig;
use nugu_core::models::message::EventMessageRequest;
use nugu_core::models::policy::PolicyCache;
use nugu_core::models::state::DetailedState;
use nugu_core::ports::auth::StaticAuthDelegate;
use nugu_core::ports::gateway::GatewayConnector;
use nugu_core::ports::registry::PolicySource;
use nugu_transport::registry_client::RegistryClient;
use nugu_transport::transport::Transport;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::printer::ConsolePrinter;
use crate::settings::Overrides;

/// 연결 완료 대기 한도 (send-event)
const CONNECT_WAIT: Duration = Duration::from_secs(30);

/// NUGU DeviceGateway 클라이언트
#[derive(Parser, Debug)]
#[command(name = "nugu-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 transport.json)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// 인증 토큰 (`Bearer ...` 형식)
    #[arg(long, env = "NUGU_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// 레지스트리 URL
    #[arg(long, global = true)]
    registry: Option<String>,

    /// 게이트웨이 주소 (`host:port`, 레지스트리 생략 시 사용)
    #[arg(long, global = true)]
    gateway: Option<String>,

    /// 레지스트리를 거치지 않고 게이트웨이에 직접 연결
    #[arg(long, global = true)]
    no_keep_connection: bool,

    /// 디렉티브 서버 스트림 + 단건 이벤트 방식 사용
    #[arg(long, global = true)]
    directives_only: bool,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 연결 후 Ctrl-C까지 상태와 디렉티브 출력
    Connect,
    /// 레지스트리 정책 조회
    Policy,
    /// 전역 플래그(--registry, --gateway 등)를 설정 파일에 저장
    SaveConfig,
    /// 이벤트 하나를 보내고 결과 출력
    SendEvent {
        namespace: String,
        name: String,
        #[arg(long, default_value = "1.0")]
        version: String,
        /// 페이로드 JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        /// 컨텍스트 JSON
        #[arg(long, default_value = "{}")]
        context: String,
        /// 같은 dialogRequestId의 응답 디렉티브까지 대기
        #[arg(long)]
        await_response: bool,
    },
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            registry: self.registry.clone(),
            gateway: self.gateway.clone(),
            no_keep_connection: self.no_keep_connection,
            directives_only: self.directives_only,
        }
    }

    fn token(&self) -> Result<String> {
        self.token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow!("인증 토큰이 필요합니다 (--token 또는 NUGU_TOKEN)"))
    }
}

#[cfg(feature = "grpc")]
fn gateway_connector(config: &TransportConfig) -> Result<Arc<dyn GatewayConnector>> {
    Ok(Arc::new(nugu_transport::grpc::GrpcConnector::new(config)))
}

#[cfg(not(feature = "grpc"))]
fn gateway_connector(_config: &TransportConfig) -> Result<Arc<dyn GatewayConnector>> {
    bail!("게이트웨이 연결에는 grpc feature가 필요합니다")
}

fn build_transport(config: TransportConfig, token: String) -> Result<Transport> {
    let printer = Arc::new(ConsolePrinter);
    let transport = Transport::builder(config.clone())
        .auth(Arc::new(StaticAuthDelegate::new(&token)))
        .consumer(printer.clone())
        .connector(gateway_connector(&config)?)
        .build()
        .context("Transport 생성 실패")?;
    transport.add_status_listener(printer);
    Ok(transport)
}

async fn run_connect(config: TransportConfig, token: String) -> Result<()> {
    let transport = build_transport(config, token)?;
    let mut states = transport.subscribe_states();

    if !transport.connect().await {
        bail!("연결을 시작하지 못했습니다 ({})", transport.reason());
    }

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("종료 요청");
                break Ok(());
            }
            change = states.recv() => match change {
                Ok(change) if change.to == DetailedState::Failed => {
                    break Err(anyhow!("연결 실패: {}", change.reason));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "상태 이벤트 일부 누락"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    transport.shutdown().await;
    result
}

async fn run_policy(config: TransportConfig, token: String) -> Result<()> {
    let registry = RegistryClient::new(&config, PolicyCache::new())?;
    let policy = registry.get_policy(&token).await?;
    registry.shutdown();

    println!("{}", serde_json::to_string_pretty(&policy)?);
    Ok(())
}

async fn wait_connected(transport: &Transport) -> Result<()> {
    let mut states = transport.subscribe_states();
    if !transport.connect().await {
        bail!("연결을 시작하지 못했습니다 ({})", transport.reason());
    }

    let waiting = async {
        loop {
            match states.recv().await {
                Ok(change) if change.to == DetailedState::Connected => return Ok(()),
                Ok(change) if change.to == DetailedState::Failed => {
                    return Err(anyhow!("연결 실패: {}", change.reason));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Err(anyhow!("Transport 종료됨")),
            }
        }
    };

    tokio::time::timeout(CONNECT_WAIT, waiting)
        .await
        .map_err(|_| anyhow!("{}초 안에 연결되지 않았습니다", CONNECT_WAIT.as_secs()))?
}

async fn run_send_event(config: TransportConfig, token: String, event: EventMessageRequest) -> Result<()> {
    let transport = build_transport(config, token)?;
    wait_connected(&transport).await?;

    let dialog_request_id = event.header.dialog_request_id.clone();
    let result = transport.send(event).await;
    transport.shutdown().await;

    match result {
        Ok(()) => {
            println!("[event] 전송 성공 (dialog={dialog_request_id})");
            Ok(())
        }
        Err(e) => Err(anyhow!("이벤트 전송 실패: {e}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "nugu_gateway={},nugu_app={},nugu_core={},nugu_transport={}",
        args.log_level, args.log_level, args.log_level, args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    let manager = settings::open(args.config.as_deref())?;
    if let Command::SaveConfig = args.command {
        let saved = settings::save(&manager, &args.overrides())?;
        println!("[config] {} 저장", manager.config_path().display());
        println!("{}", serde_json::to_string_pretty(&saved)?);
        return Ok(());
    }

    let config = settings::load(&manager, &args.overrides())?;
    info!(
        config = %manager.config_path().display(),
        registry = %config.registry_endpoint,
        keep_connection = config.keep_connection,
        "nugu-gateway 시작"
    );
    let token = args.token()?;

    match args.command {
        Command::Connect => run_connect(config, token).await,
        Command::Policy => run_policy(config, token).await,
        Command::SaveConfig => Ok(()),
        Command::SendEvent {
            namespace,
            name,
            version,
            payload,
            context,
            await_response,
        } => {
            serde_json::from_str::<serde_json::Value>(&payload).context("payload가 JSON이 아닙니다")?;
            serde_json::from_str::<serde_json::Value>(&context).context("context가 JSON이 아닙니다")?;

            let event = EventMessageRequest::builder(namespace, name, version)
                .payload(payload)
                .context(context)
                .await_response(await_response)
                .build();
            run_send_event(config, token, event).await
        }
    }
}
