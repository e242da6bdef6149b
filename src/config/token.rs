//! 内部注册 token
//!
//! 控制器唯一的可变配置项。保存在 `DATA_DIR/controller.json`，
//! 首次完成启动加载时若不存在则生成并持久化，之后用于保护 `/internal` 接口

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

const STATE_FILE_NAME: &str = "controller.json";

/// 控制器状态文件内容
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ControllerStateFile {
    #[serde(default)]
    internal_token: Option<String>,
}

/// 内部 token 单元
pub struct InternalToken {
    path: PathBuf,
    value: RwLock<Option<String>>,
}

impl InternalToken {
    /// 从数据目录加载；文件不存在或损坏时视为未生成
    pub async fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(STATE_FILE_NAME);
        let value = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<ControllerStateFile>(&content) {
                Ok(state) => state.internal_token.filter(|t| !t.is_empty()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse controller state, ignoring");
                    None
                }
            },
            Err(_) => None,
        };

        Self {
            path,
            value: RwLock::new(value),
        }
    }

    /// 当前 token（未生成时为 None）
    pub async fn get(&self) -> Option<String> {
        self.value.read().await.clone()
    }

    /// 校验调用方提供的 token；未生成时一律拒绝
    pub async fn verify(&self, provided: &str) -> bool {
        matches!(self.value.read().await.as_deref(), Some(t) if t == provided)
    }

    /// 不存在时生成并持久化，返回当前 token
    pub async fn ensure(&self) -> anyhow::Result<String> {
        let mut value = self.value.write().await;
        if let Some(token) = value.as_ref() {
            return Ok(token.clone());
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        self.save(&token).await?;
        info!(path = %self.path.display(), "Generated internal token");
        *value = Some(token.clone());
        Ok(token)
    }

    /// 原子写入（临时文件 + rename）
    async fn save(&self, token: &str) -> anyhow::Result<()> {
        let temp_path = self.path.with_extension("json.tmp");

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let state = ControllerStateFile {
            internal_token: Some(token.to_string()),
        };
        let content = serde_json::to_string_pretty(&state)?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
