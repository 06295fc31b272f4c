//! 설정 로드
//!
//! 우선순위: CLI 플래그 > `NUGU_*` 환경변수 > 설정 파일(JSON) > 기본값.
//! 파일 계층은 `ConfigManager`가 담당하고, 그 위에 환경변수와 CLI 값을 얹는다.
//! 환경변수 예: `NUGU_KEEP_CONNECTION=false`, `NUGU_BACKOFF__BASE_DELAY_MS=500`.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment};
use nugu_core::config::{StreamMode, TransportConfig};
use nugu_core::config_manager::ConfigManager;
use tracing::debug;

/// CLI에서 덮어쓸 수 있는 항목
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub registry: Option<String>,
    pub gateway: Option<String>,
    pub no_keep_connection: bool,
    pub directives_only: bool,
}

impl Overrides {
    fn apply(&self, config: &mut TransportConfig) {
        if let Some(registry) = &self.registry {
            config.registry_endpoint = registry.clone();
        }
        if let Some(gateway) = &self.gateway {
            config.gateway_endpoint = gateway.clone();
        }
        if self.no_keep_connection {
            config.keep_connection = false;
        }
        if self.directives_only {
            config.stream_mode = StreamMode::DirectivesOnly;
        }
    }
}

/// 설정 관리자 열기 (파일이 없으면 기본값으로 생성)
pub fn open(explicit: Option<&Path>) -> Result<ConfigManager> {
    match explicit {
        Some(path) => ConfigManager::with_path(path.to_path_buf()),
        None => ConfigManager::new(),
    }
    .context("설정 파일 준비 실패")
}

/// 파일 설정 위에 환경변수와 CLI 값을 얹은 실행 설정
pub fn load(manager: &ConfigManager, overrides: &Overrides) -> Result<TransportConfig> {
    let layered = Config::builder()
        .add_source(Config::try_from(&manager.get()).context("파일 설정 변환 실패")?)
        .add_source(
            Environment::with_prefix("NUGU")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("설정 병합 실패")?;

    let mut config: TransportConfig = layered
        .try_deserialize()
        .context("설정 형식 오류")?;
    overrides.apply(&mut config);

    config.validate()?;
    debug!(path = %manager.config_path().display(), "설정 로드 완료");
    Ok(config)
}

/// CLI 값을 설정 파일에 저장
pub fn save(manager: &ConfigManager, overrides: &Overrides) -> Result<TransportConfig> {
    manager
        .update_with(|config| overrides.apply(config))
        .context("설정 저장 실패")
}
