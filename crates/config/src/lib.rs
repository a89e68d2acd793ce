//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 数据库连接（未配置时使用内存存储）
//! - JWT认证
//! - 实时连接的发送超时和缓冲
//! - 日志输出
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件 -> `APP_` 前缀的环境变量。

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    #[validate(nested)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 数据库配置，`url` 为空时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// JWT配置
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_minutes: i64,
}

// 密钥不进日志
impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("expiration_minutes", &self.expiration_minutes)
            .finish()
    }
}

/// 实时连接配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    /// 单次发送的最长等待时间
    #[validate(range(min = 1))]
    pub send_timeout_ms: u64,
    /// 每个连接的出站缓冲帧数
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
}

impl RealtimeConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// 密码哈希配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PasswordConfig {
    #[validate(range(min = 4, max = 31))]
    pub bcrypt_cost: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self { bcrypt_cost: 12 }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` 语法，`RUST_LOG` 优先
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    /// 开发环境默认值，生产环境必须覆盖 `jwt.secret`
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8000,
                cors_origins: vec!["*".into()],
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                run_migrations: true,
            },
            jwt: JwtConfig {
                secret: "change-me-to-a-strong-secret-of-at-least-32-chars".into(),
                expiration_minutes: 15,
            },
            realtime: RealtimeConfig {
                send_timeout_ms: 5_000,
                outbound_buffer: 64,
            },
            password: PasswordConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的优先级加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));
        Self::from_provider(fig)
    }

    /// 从任意 figment provider 提取并校验配置
    pub fn from_provider(provider: impl Provider) -> Result<Self, ConfigError> {
        let cfg: AppConfig = Figment::from(provider)
            .extract()
            .map_err(|err| ConfigError::Extract(Box::new(err)))?;
        cfg.check()?;
        Ok(cfg)
    }

    /// 校验配置有效性
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if let Some(url) = &self.database.url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "database url must use the postgres:// scheme".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 隐去数据库凭据的连接串，用于日志
    pub fn sanitized_database_url(&self) -> Option<String> {
        self.database.url.as_ref().map(|url| match url.rfind('@') {
            Some(at) => format!("postgres://[REDACTED]@{}", &url[at + 1..]),
            None => url.clone(),
        })
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Extract(Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("invalid database url: {0}")]
    InvalidDatabaseUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_overrides(toml: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_provider(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(toml)),
        )
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.check().is_ok());
        assert!(config.database.url.is_none());
        assert_eq!(config.realtime.send_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn file_values_override_defaults() {
        let config = with_overrides(
            r#"
            [server]
            port = 9100

            [realtime]
            outbound_buffer = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.realtime.outbound_buffer, 8);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let result = with_overrides(
            r#"
            [jwt]
            secret = "short"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_send_timeout_is_rejected() {
        let result = with_overrides(
            r#"
            [realtime]
            send_timeout_ms = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn non_postgres_database_url_is_rejected() {
        let result = with_overrides(
            r#"
            [database]
            url = "mysql://root@localhost/tears"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidDatabaseUrl(_))));
    }

    #[test]
    fn database_credentials_are_redacted() {
        let mut config = AppConfig::default();
        config.database.url = Some("postgres://postgres:secret@db:5432/tears".into());
        assert_eq!(
            config.sanitized_database_url().as_deref(),
            Some("postgres://[REDACTED]@db:5432/tears")
        );
    }

    #[test]
    fn jwt_secret_is_not_debug_printed() {
        let config = AppConfig::default();
        assert!(!format!("{:?}", config.jwt).contains(&config.jwt.secret));
    }
}
