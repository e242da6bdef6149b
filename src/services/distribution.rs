//! 分发引擎
//!
//! 每次入库后异步触发一轮 sweep：对每个已配置且健康的 egress 模块，
//! 找出从未尝试过的 batch，按 block-list、allow-list 的顺序分别推送，
//! 并为每个 (module, batch) 写入唯一一行投递状态。
//! sweep 结束后延迟一段时间，对该模块 FAILED 的 batch 重推，只原地更新状态行。

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::{DeliveryStatus, ElementType, ModuleMetadata, ModuleType, PushPayload, UpdateStatus};
use crate::error::ControllerResult;
use crate::infra::ModuleGateway;
use crate::persistence::Repositories;

use super::health::HealthMonitor;

/// 模块接受推送时返回的状态码
const ACCEPTED: u16 = 202;

/// 单次推送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 过滤后没有元素，不算失败
    Empty,
    Accepted,
    Failed,
}

/// 一个模块一轮 sweep 的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub module: String,
    pub accepted: usize,
    pub failed: usize,
    pub empty: usize,
}

impl SweepSummary {
    fn record(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Empty => self.empty += 1,
            PushOutcome::Accepted => self.accepted += 1,
            PushOutcome::Failed => self.failed += 1,
        }
    }
}

/// 分发引擎
pub struct DistributionEngine {
    repos: Repositories,
    gateway: Arc<dyn ModuleGateway>,
    health: Arc<HealthMonitor>,
    retry_delay: Duration,
    /// 同一模块的 sweep 串行执行，不同模块互不影响
    sweep_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl DistributionEngine {
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn ModuleGateway>,
        health: Arc<HealthMonitor>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            repos,
            gateway,
            health,
            retry_delay,
            sweep_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 异步触发一轮分发，不阻塞调用方
    pub fn trigger(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run().await {
                error!(error = %e, "Distribution run failed");
            }
        });
    }

    /// 对所有 egress 模块并发执行 sweep，返回每个实际执行的模块的统计
    pub async fn run(self: &Arc<Self>) -> ControllerResult<Vec<SweepSummary>> {
        let modules = self.repos.modules.all_of_type(ModuleType::Egress).await?;

        let tasks = modules.into_iter().map(|module| {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.sweep_module(module).await })
        });

        let mut summaries = Vec::new();
        for result in join_all(tasks).await {
            match result {
                Ok(Ok(Some(summary))) => summaries.push(summary),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!(error = %e, "Module sweep failed"),
                Err(e) => error!(error = %e, "Module sweep task panicked"),
            }
        }
        Ok(summaries)
    }

    fn sweep_lock(&self, module_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.sweep_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(module_id).or_default().clone()
    }

    /// 单个模块的首轮 sweep；未配置或不健康的模块返回 None
    pub async fn sweep_module(
        self: &Arc<Self>,
        module: ModuleMetadata,
    ) -> ControllerResult<Option<SweepSummary>> {
        if !module.configured {
            debug!(module = %module.module_service_name, "Module not configured, skipping");
            return Ok(None);
        }
        if !self
            .health
            .is_up(&module.module_service_name, &module.internal_port)
            .await
        {
            debug!(module = %module.module_service_name, "Module is not up, cannot push");
            return Ok(None);
        }

        let lock = self.sweep_lock(module.id);
        let _guard = lock.lock().await;

        let types = self.repos.element_types.accepted_types(module.id).await?;

        // 两个列表的待推送 batch 在 sweep 开始时一次取出，
        // 同一 batch 同时含有两类元素时两部分都会被推送
        let block_ids = self
            .repos
            .elements
            .unpushed_batch_ids(module.id, false, &types)
            .await?;
        let allow_ids = self
            .repos
            .elements
            .unpushed_batch_ids(module.id, true, &types)
            .await?;

        let mut summary = SweepSummary {
            module: module.module_service_name.clone(),
            ..Default::default()
        };

        for (safe, ids) in [(false, block_ids), (true, allow_ids)] {
            for batch_id in ids {
                let outcome = self.push_batch(&module, batch_id, &types, safe).await;
                if let Err(e) = self.record_first_attempt(&module, batch_id, outcome).await {
                    error!(module = %module.module_service_name, batch_id, error = %e, "Failed to record status");
                }
                summary.record(outcome);
            }
        }

        info!(
            module = %summary.module,
            accepted = summary.accepted,
            failed = summary.failed,
            empty = summary.empty,
            "Sweep finished"
        );

        self.schedule_retry(module, types);
        Ok(Some(summary))
    }

    /// 延迟后重推该模块 FAILED 的 batch（一旦调度不可取消）
    fn schedule_retry(self: &Arc<Self>, module: ModuleMetadata, types: Vec<ElementType>) {
        let this = Arc::clone(self);
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.retry_failed(&module, &types).await {
                error!(module = %module.module_service_name, error = %e, "Error pushing failed batches");
            }
        });
    }

    /// 重推 FAILED 的 batch；成功则原地更新为 PENDING，再次失败保持 FAILED
    pub async fn retry_failed(
        &self,
        module: &ModuleMetadata,
        types: &[ElementType],
    ) -> ControllerResult<SweepSummary> {
        let mut summary = SweepSummary {
            module: module.module_service_name.clone(),
            ..Default::default()
        };

        let lock = self.sweep_lock(module.id);
        let _guard = lock.lock().await;

        let failed = self
            .repos
            .statuses
            .batch_ids_with_status(module.id, DeliveryStatus::Failed)
            .await?;
        if failed.is_empty() {
            return Ok(summary);
        }

        if !self
            .health
            .is_up(&module.module_service_name, &module.internal_port)
            .await
        {
            debug!(module = %module.module_service_name, "Module is not up, failed batches stay failed");
            return Ok(summary);
        }

        info!(module = %module.module_service_name, batches = failed.len(), "Pushing failed batches");

        for batch_id in failed {
            let block = self.push_batch(module, batch_id, types, false).await;
            let allow = self.push_batch(module, batch_id, types, true).await;
            summary.record(block);
            summary.record(allow);

            let any_failed = block == PushOutcome::Failed || allow == PushOutcome::Failed;
            let any_accepted = block == PushOutcome::Accepted || allow == PushOutcome::Accepted;
            if any_failed || !any_accepted {
                continue;
            }

            if let Err(e) = self
                .repos
                .statuses
                .update_in_place(module.id, batch_id, DeliveryStatus::Pending)
                .await
            {
                error!(module = %module.module_service_name, batch_id, error = %e, "Failed to update status");
            }
        }

        Ok(summary)
    }

    /// 模块回报某个 batch 的最终结果（success / failed），按服务名定位状态行
    pub async fn acknowledge(
        &self,
        service_name: &str,
        batch_id: i64,
        status: DeliveryStatus,
    ) -> ControllerResult<bool> {
        let Some(module) = self.repos.modules.get_by_service_name(service_name).await? else {
            warn!(module = %service_name, batch_id, "Status report from unknown module");
            return Ok(false);
        };

        let updated = self
            .repos
            .statuses
            .update_in_place(module.id, batch_id, status)
            .await?;
        if updated {
            info!(module = %service_name, batch_id, status = status.as_str(), "Batch status reported");
        } else {
            warn!(module = %service_name, batch_id, "Status report for unknown batch");
        }
        Ok(updated)
    }

    /// 首次尝试：不存在时插入；已存在（同一 batch 另一列表已写入）且本次失败时改为 FAILED
    async fn record_first_attempt(
        &self,
        module: &ModuleMetadata,
        batch_id: i64,
        outcome: PushOutcome,
    ) -> ControllerResult<()> {
        let status = match outcome {
            PushOutcome::Empty => return Ok(()),
            PushOutcome::Accepted => DeliveryStatus::Pending,
            PushOutcome::Failed => DeliveryStatus::Failed,
        };

        let row = UpdateStatus::new(module.id, &module.module_service_name, batch_id, status);
        let inserted = self.repos.statuses.insert_if_absent(row).await?;
        if !inserted && status == DeliveryStatus::Failed {
            self.repos
                .statuses
                .update_in_place(module.id, batch_id, DeliveryStatus::Failed)
                .await?;
        }
        Ok(())
    }

    /// 查询过滤后的 batch 并推送
    async fn push_batch(
        &self,
        module: &ModuleMetadata,
        batch_id: i64,
        types: &[ElementType],
        safe: bool,
    ) -> PushOutcome {
        let items = match self.repos.elements.batch_items(batch_id, types, safe).await {
            Ok(items) => items,
            Err(e) => {
                error!(batch_id, error = %e, "Error retrieving batch for pushing");
                return PushOutcome::Failed;
            }
        };
        if items.is_empty() {
            return PushOutcome::Empty;
        }

        let payload = PushPayload {
            safe_list: safe,
            items,
            batch_id,
        };

        match self
            .gateway
            .push(&module.module_service_name, &module.internal_port, &payload)
            .await
        {
            Ok(ACCEPTED) => {
                info!(module = %module.module_service_name, batch_id, safe, "Pushing succeeded");
                PushOutcome::Accepted
            }
            Ok(code) => {
                warn!(module = %module.module_service_name, batch_id, safe, status = code, "Pushing failed");
                PushOutcome::Failed
            }
            Err(e) => {
                warn!(module = %module.module_service_name, batch_id, safe, error = %e, "Error pushing batch");
                PushOutcome::Failed
            }
        }
    }
}
