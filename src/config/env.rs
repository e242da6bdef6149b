//! 环境变量配置加载
//!
//! 启动时读取一次，之后以不可变值的形式传给各个组件

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口
    pub port: u16,
    /// 控制器在模块网络中的服务名
    pub controller_svc_name: String,
    /// 对外域名（注入模块环境变量，同时用于 CORS）
    pub host_domain: String,
    /// 运维 API 密钥（`x-access-token`）
    pub admin_api_key: String,
    /// 容器相关配置
    pub docker: DockerConfig,
    /// 控制器状态文件与存储快照所在目录
    pub data_dir: PathBuf,
    /// 各类超时与间隔
    pub timings: Timings,
}

/// 容器配置
#[derive(Clone, Debug)]
pub struct DockerConfig {
    /// 镜像白名单前缀，为空时不限制
    pub image_prefix: String,
    /// 模块网络名（后缀匹配）
    pub module_network_name: String,
    /// bind 路径的项目根目录
    pub project_root: String,
    /// docker 可执行文件
    pub docker_bin: String,
    pub registry: Option<RegistryAuth>,
}

/// 镜像仓库登录信息
#[derive(Clone, Debug)]
pub struct RegistryAuth {
    pub server: String,
    pub user: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct Timings {
    pub health_timeout: Duration,
    pub push_timeout: Duration,
    pub retry_delay: Duration,
    pub snapshot_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(5),
            push_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(30),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image_prefix: String::new(),
            module_network_name: "modules".to_string(),
            project_root: "/opt/dem".to_string(),
            docker_bin: "docker".to_string(),
            registry: None,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            controller_svc_name: "controller".to_string(),
            host_domain: String::new(),
            admin_api_key: "change-me-in-production".to_string(),
            docker: DockerConfig::default(),
            data_dir: PathBuf::from("./data"),
            timings: Timings::default(),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = load_with_fallback("PORT", "CONTROLLER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let admin_api_key = match env::var("ADMIN_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                warn!("ADMIN_API_KEY not set, using the built-in default key");
                defaults.admin_api_key
            }
        };

        Self {
            port,
            controller_svc_name: env::var("CONTROLLER_SVC_NAME")
                .unwrap_or(defaults.controller_svc_name),
            host_domain: env::var("HOST_DOMAIN").unwrap_or_default(),
            admin_api_key,
            docker: DockerConfig::from_env(),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            timings: Timings::from_env(),
        }
    }

    /// 控制器对模块可见的端口
    pub fn controller_port(&self) -> String {
        self.port.to_string()
    }
}

impl DockerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let registry = match (
            env::var("DOCKER_REGISTRY"),
            env::var("DOCKER_USER"),
            env::var("DOCKER_PASSWORD"),
        ) {
            (Ok(server), Ok(user), Ok(password)) if !user.is_empty() => Some(RegistryAuth {
                server,
                user,
                password,
            }),
            _ => None,
        };

        Self {
            image_prefix: env::var("DOCKER_PREFIX").unwrap_or_default(),
            module_network_name: env::var("MODULE_NETWORK_NAME")
                .unwrap_or(defaults.module_network_name),
            project_root: env::var("PROJECT_ROOT").unwrap_or(defaults.project_root),
            docker_bin: env::var("DOCKER_BIN").unwrap_or(defaults.docker_bin),
            registry,
        }
    }
}

impl Timings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            health_timeout: secs_from_env("HEALTH_TIMEOUT_SECS", defaults.health_timeout),
            push_timeout: secs_from_env("PUSH_TIMEOUT_SECS", defaults.push_timeout),
            retry_delay: secs_from_env("RETRY_DELAY_SECS", defaults.retry_delay),
            snapshot_interval: secs_from_env("SNAPSHOT_INTERVAL_SECS", defaults.snapshot_interval),
        }
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 单个 batch 最多包含的元素数
    pub const MAX_BATCH_SIZE: usize = 5000;

    /// 分页默认大小
    pub const DEFAULT_PAGE_SIZE: usize = 20;

    /// 分页大小上限
    pub const MAX_PAGE_SIZE: usize = 1000;

    /// 代理请求体上限
    pub const MAX_PROXY_BODY_BYTES: usize = 10 * 1024 * 1024;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("DEM_TEST_PRIMARY", "primary_value");
        env::set_var("DEM_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("DEM_TEST_PRIMARY", "DEM_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("DEM_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("DEM_TEST_PRIMARY", "DEM_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("DEM_TEST_FALLBACK");
        assert_eq!(load_with_fallback("DEM_TEST_PRIMARY", "DEM_TEST_FALLBACK"), None);
    }

    #[test]
    fn test_secs_from_env() {
        env::set_var("DEM_TEST_SECS", "7");
        assert_eq!(
            secs_from_env("DEM_TEST_SECS", Duration::from_secs(1)),
            Duration::from_secs(7)
        );

        env::set_var("DEM_TEST_SECS", "not-a-number");
        assert_eq!(
            secs_from_env("DEM_TEST_SECS", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
        env::remove_var("DEM_TEST_SECS");
    }

    #[test]
    fn test_default_timings() {
        let t = Timings::default();
        assert_eq!(t.push_timeout, Duration::from_secs(120));
        assert_eq!(t.retry_delay, Duration::from_secs(60));
    }
}
