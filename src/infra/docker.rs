//! Container engine adapter
//!
//! `ContainerEngine` is the capability surface the orchestrator needs;
//! `DockerCli` drives the docker CLI through `tokio::process::Command`.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::DockerConfig;
use crate::error::{ControllerError, ControllerResult};

/// Stop timeout passed to `docker stop -t`
const STOP_TIMEOUT_SECS: u32 = 30;

/// Everything needed to create a module container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, also used as the network alias
    pub name: String,
    pub image: String,
    pub network: String,
    pub binds: Vec<String>,
    pub env: Vec<String>,
}

/// Container runtime operations used by the orchestrator
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull(&self, image: &str) -> ControllerResult<()>;

    /// Create with restart policy `always`, then start
    async fn create(&self, spec: &ContainerSpec) -> ControllerResult<()>;

    /// Pull, create a bare container named `name`, then start it
    async fn pull_and_start(&self, image: &str, name: &str) -> ControllerResult<()>;

    async fn start(&self, name: &str) -> ControllerResult<()>;

    async fn stop(&self, name: &str) -> ControllerResult<()>;

    async fn restart(&self, name: &str) -> ControllerResult<()>;

    /// Stop, then remove
    async fn remove(&self, name: &str) -> ControllerResult<()>;

    async fn list_networks(&self) -> ControllerResult<Vec<String>>;

    async fn list_containers(&self) -> ControllerResult<Vec<String>>;
}

/// Docker CLI backed engine
pub struct DockerCli {
    config: DockerConfig,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Run `docker <args>` and return stdout, mapping failures to transport errors
    async fn run(&self, args: &[&str]) -> ControllerResult<String> {
        self.run_with_input(args, None).await
    }

    /// Like [`Self::run`], writing `input` to the child's stdin; secrets go here, never on argv
    async fn run_with_input(&self, args: &[&str], input: Option<&[u8]>) -> ControllerResult<String> {
        debug!(bin = %self.config.docker_bin, args = ?args, "Running docker command");

        let spawn_failed = |e: std::io::Error| {
            error!(error = %e, "Failed to run docker");
            ControllerError::transport(format!("failed to run docker: {}", e))
        };

        let mut child = Command::new(&self.config.docker_bin)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(data).await.map_err(spawn_failed)?;
            // close stdin so the child sees EOF
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(spawn_failed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let op = args.first().copied().unwrap_or_default();
            error!(op = %op, stderr = %stderr.trim(), "Docker command failed");
            return Err(ControllerError::transport(format!(
                "docker {} failed: {}",
                op,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Log in to the configured registry, if any
    async fn login(&self) -> ControllerResult<()> {
        let Some(auth) = self.config.registry.as_ref() else {
            return Ok(());
        };

        self.run_with_input(
            &["login", "--username", &auth.user, "--password-stdin", &auth.server],
            Some(auth.password.as_bytes()),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn pull(&self, image: &str) -> ControllerResult<()> {
        self.login().await?;
        self.run(&["pull", "--quiet", image]).await?;
        info!(image = %image, "Pulled image");
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> ControllerResult<()> {
        self.pull(&spec.image).await?;

        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            spec.name.clone(),
            "--restart".into(),
            "always".into(),
            "--network".into(),
            spec.network.clone(),
            "--network-alias".into(),
            spec.name.clone(),
        ];
        for bind in &spec.binds {
            args.push("-v".into());
            args.push(bind.clone());
        }
        for env in &spec.env {
            args.push("-e".into());
            args.push(env.clone());
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;
        self.run(&["start", &spec.name]).await?;

        info!(container = %spec.name, image = %spec.image, network = %spec.network, "Created container");
        Ok(())
    }

    async fn pull_and_start(&self, image: &str, name: &str) -> ControllerResult<()> {
        self.pull(image).await?;
        self.run(&["create", "--name", name, image]).await?;
        self.run(&["start", name]).await?;
        info!(container = %name, image = %image, "Pulled and started container");
        Ok(())
    }

    async fn start(&self, name: &str) -> ControllerResult<()> {
        self.run(&["start", name]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> ControllerResult<()> {
        let timeout = STOP_TIMEOUT_SECS.to_string();
        self.run(&["stop", "-t", &timeout, name]).await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> ControllerResult<()> {
        self.run(&["restart", name]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> ControllerResult<()> {
        self.stop(name).await?;
        self.run(&["rm", name]).await?;
        info!(container = %name, "Removed container");
        Ok(())
    }

    async fn list_networks(&self) -> ControllerResult<Vec<String>> {
        let stdout = self.run(&["network", "ls", "--format", "{{.Name}}"]).await?;
        Ok(parse_lines(&stdout))
    }

    async fn list_containers(&self) -> ControllerResult<Vec<String>> {
        let stdout = self.run(&["ps", "-a", "--format", "{{.Names}}"]).await?;
        // Engine API names carry a leading slash; the console expects that form
        Ok(parse_lines(&stdout)
            .into_iter()
            .map(|name| format!("/{}", name))
            .collect())
    }
}

fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
