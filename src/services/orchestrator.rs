//! 容器编排器
//!
//! `run_commands` 同步校验命令后立即返回一个结果流，后台任务按 FIFO 顺序逐条执行。
//! 所有批次共享一把锁，两个批次的引擎调用不会交错。
//!
//! 结果流的约定：一直读到 [`CommandOutcome::Done`] 为止，`Done` 每个批次恰好一次。

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::{EnvConfig, InternalToken};
use crate::domain::container::redact_env;
use crate::domain::{CommandKind, ContainerBatch, ContainerCommand, EntityState, Event, EventType};
use crate::error::{ControllerError, ControllerResult};
use crate::infra::{ContainerEngine, ContainerSpec};
use crate::persistence::ModuleStore;

/// 单条结果
#[derive(Debug)]
pub enum CommandOutcome {
    Event(Event),
    Error(ControllerError),
    Done,
}

/// 一次 `run_commands` 调用的结果流
pub struct CommandStream {
    rx: mpsc::UnboundedReceiver<CommandOutcome>,
}

impl CommandStream {
    /// 下一条结果；`Done` 之后返回 None
    pub async fn next(&mut self) -> Option<CommandOutcome> {
        self.rx.recv().await
    }

    /// 读到 `Done`，收集全部事件与错误
    pub async fn collect(mut self) -> (Vec<Event>, Vec<ControllerError>) {
        let mut events = Vec::new();
        let mut errors = Vec::new();
        while let Some(outcome) = self.next().await {
            match outcome {
                CommandOutcome::Event(e) => events.push(e),
                CommandOutcome::Error(e) => errors.push(e),
                CommandOutcome::Done => break,
            }
        }
        (events, errors)
    }
}

/// 编排器使用的环境设置（启动时确定，不再变化）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub image_prefix: String,
    pub module_network_name: String,
    pub project_root: String,
    pub controller_svc_name: String,
    pub controller_port: String,
    pub host_domain: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &EnvConfig) -> Self {
        Self {
            image_prefix: config.docker.image_prefix.clone(),
            module_network_name: config.docker.module_network_name.clone(),
            project_root: config.docker.project_root.clone(),
            controller_svc_name: config.controller_svc_name.clone(),
            controller_port: config.controller_port(),
            host_domain: config.host_domain.clone(),
        }
    }

    /// 镜像是否来自允许的仓库
    pub fn image_allowed(&self, image_ref: &str) -> bool {
        image_ref.starts_with(&self.image_prefix)
    }
}

/// 容器编排器
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    modules: Arc<dyn ModuleStore>,
    token: Arc<InternalToken>,
    settings: OrchestratorSettings,
    /// 跨批次串行化引擎调用（tokio Mutex 按请求顺序唤醒）
    lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        modules: Arc<dyn ModuleStore>,
        token: Arc<InternalToken>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            engine,
            modules,
            token,
            settings,
            lock: Mutex::new(()),
        }
    }

    /// 提交一批命令
    ///
    /// 镜像不在白名单内的 `create` 命令被直接丢弃，其余命令入队；
    /// 本方法不等待任何引擎调用
    pub fn run_commands(self: &Arc<Self>, batch: ContainerBatch) -> CommandStream {
        let mut queue = VecDeque::with_capacity(batch.containers.len());
        for command in batch.containers {
            if command.command == CommandKind::Create && !self.settings.image_allowed(&command.image_ref) {
                warn!(
                    container = %command.id,
                    image = %command.image_ref,
                    "Image reference not allowed, command dropped"
                );
                continue;
            }
            queue.push_back(command);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drain(queue, tx).await;
        });

        CommandStream { rx }
    }

    /// 当前所有容器名
    pub async fn list_containers(&self) -> ControllerResult<Vec<String>> {
        self.engine.list_containers().await
    }

    async fn drain(
        &self,
        mut queue: VecDeque<ContainerCommand>,
        tx: mpsc::UnboundedSender<CommandOutcome>,
    ) {
        if queue.is_empty() {
            let _ = tx.send(CommandOutcome::Done);
            return;
        }

        let _guard = self.lock.lock().await;
        info!(commands = queue.len(), "Processing container commands");

        while let Some(mut command) = queue.pop_front() {
            if command.command != CommandKind::List {
                if let Err(e) = self.enrich(&mut command).await {
                    error!(container = %command.id, error = %e, "Failed to prepare command");
                    let _ = tx.send(CommandOutcome::Error(e));
                    continue;
                }
            }

            match self.execute(&command).await {
                Ok(Some(event)) => {
                    let _ = tx.send(CommandOutcome::Event(event));
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        container = %command.id,
                        command = ?command.command,
                        error = %e,
                        "Container command failed"
                    );
                    let _ = tx.send(CommandOutcome::Error(e));
                    continue;
                }
            }

            if command.command == CommandKind::Remove {
                match self.modules.delete_by_service_name(&command.id).await {
                    Ok(existed) => {
                        info!(module = %command.id, existed, "Deleted module metadata");
                    }
                    Err(e) => {
                        error!(module = %command.id, error = %e, "Failed to delete module metadata");
                        let _ = tx.send(CommandOutcome::Error(e));
                    }
                }
            }
        }

        let _ = tx.send(CommandOutcome::Done);
    }

    /// 注入控制器环境变量、改写 bind 路径、解析模块网络
    ///
    /// token 尚未生成时先生成；生成失败则放弃该命令
    async fn enrich(&self, command: &mut ContainerCommand) -> ControllerResult<()> {
        let token = self.token.ensure().await.map_err(|e| {
            ControllerError::persistence(format!("internal token unavailable: {e:#}"))
        })?;
        command.env_vars.extend([
            format!("INTERNAL_TOKEN={}", token),
            format!("CONTROLLER_SVC_NAME={}", self.settings.controller_svc_name),
            format!("CONTROLLER_PORT={}", self.settings.controller_port),
            format!("HOST_DOMAIN={}", self.settings.host_domain),
        ]);

        for bind in command.volumes.iter_mut() {
            *bind = format!("{}/{}/{}", self.settings.project_root, command.id, bind);
        }

        let networks = self.engine.list_networks().await?;
        command.network = networks
            .into_iter()
            .find(|name| name.ends_with(&self.settings.module_network_name))
            .ok_or_else(|| {
                ControllerError::configuration(format!(
                    "no network matching {} for {}",
                    self.settings.module_network_name, command.id
                ))
            })?;

        Ok(())
    }

    /// 执行单条命令，成功时返回要报告的事件
    async fn execute(&self, command: &ContainerCommand) -> ControllerResult<Option<Event>> {
        info!(
            container = %command.id,
            command = ?command.command,
            env = ?redact_env(&command.env_vars),
            "Executing container command"
        );

        match command.command {
            CommandKind::PullAndStart => {
                self.engine
                    .pull_and_start(&command.image_ref, &command.id)
                    .await?
            }
            CommandKind::PullAndRestart => {
                self.engine.pull(&command.image_ref).await?;
                self.engine.restart(&command.id).await?;
            }
            CommandKind::Create => {
                let spec = ContainerSpec {
                    name: command.id.clone(),
                    image: command.image_ref.clone(),
                    network: command.network.clone(),
                    binds: command.volumes.clone(),
                    env: command.env_vars.clone(),
                };
                self.engine.create(&spec).await?
            }
            CommandKind::Start => self.engine.start(&command.id).await?,
            CommandKind::Stop => self.engine.stop(&command.id).await?,
            CommandKind::Restart => self.engine.restart(&command.id).await?,
            CommandKind::Remove => self.engine.remove(&command.id).await?,
            CommandKind::List => {
                let names = self.engine.list_containers().await?;
                return Ok(Some(Event::module(
                    EventType::Info,
                    names.join(", "),
                    command.id.clone(),
                    EntityState::None,
                )));
            }
        }

        let state = command.command.to_state();
        Ok(Some(Event::module(
            EventType::Success,
            format!("{} module {}", state.title(), command.name),
            command.id.clone(),
            state,
        )))
    }
}
