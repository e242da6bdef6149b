//! 元素入库
//!
//! 单个元素：校验格式 → 分配 batch → 插入 → 异步触发分发。
//! 批量元素：按 `MAX_BATCH_SIZE` 切块，每块一个 batch，全部写入后触发一次分发。

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::constants::MAX_BATCH_SIZE;
use crate::domain::element::{page_count, PaginatedElements, PaginatedStatus};
use crate::domain::{DeliveryStatus, Event, ListElement};
use crate::error::{ControllerError, ControllerResult};
use crate::persistence::Repositories;
use crate::state::event_hub::EventHub;

use super::distribution::DistributionEngine;

/// 批量入库结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// 分配的 batch id，按块顺序
    pub batches: Vec<i64>,
    /// 实际插入数（重复值被跳过）
    pub inserted: usize,
}

/// 入库服务
pub struct IngestService {
    repos: Repositories,
    hub: Arc<EventHub>,
    distribution: Arc<DistributionEngine>,
}

impl IngestService {
    pub fn new(
        repos: Repositories,
        hub: Arc<EventHub>,
        distribution: Arc<DistributionEngine>,
    ) -> Self {
        Self {
            repos,
            hub,
            distribution,
        }
    }

    /// 添加单个元素（运维界面）
    pub async fn add_one(&self, mut element: ListElement) -> ControllerResult<ListElement> {
        if let Err(e) = element.element_type.validate(&element.value) {
            if let ControllerError::Validation(msg) = &e {
                self.hub.publish(Event::element_error(msg.clone(), element.value.clone()));
            }
            return Err(e);
        }

        element.batch_id = self.repos.elements.next_batch_id().await?;
        let result = self.insert_durable(element).await;

        match &result {
            Ok(inserted) => {
                info!(value = %inserted.value, batch_id = inserted.batch_id, "Element added");
            }
            Err(ControllerError::Duplicate(value)) => {
                self.hub.publish(Event::element_error("Cannot add, duplicate value", value.clone()));
            }
            Err(e) => warn!(error = %e, "Failed to insert element"),
        }

        // batch id 已分配，不论插入结果都触发一次
        self.distribution.trigger();
        result
    }

    async fn insert_durable(&self, element: ListElement) -> ControllerResult<ListElement> {
        let inserted = self.repos.elements.insert(element).await?;
        self.repos.elements.persist().await?;
        Ok(inserted)
    }

    /// 批量添加（ingress 模块上报）
    ///
    /// 批量输入不做格式校验；已存在的值被跳过。返回前已落盘
    pub async fn add_many(&self, elements: Vec<ListElement>) -> ControllerResult<IngestSummary> {
        let mut summary = IngestSummary::default();
        if elements.is_empty() {
            return Ok(summary);
        }

        let total = elements.len();
        let mut remaining = elements.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch_id = self.repos.elements.next_batch_id().await?;
            let chunk: Vec<ListElement> = remaining
                .by_ref()
                .take(MAX_BATCH_SIZE)
                .map(|mut e| {
                    e.batch_id = batch_id;
                    e
                })
                .collect();

            summary.inserted += self.repos.elements.batch_insert(chunk).await?;
            summary.batches.push(batch_id);
        }
        self.repos.elements.persist().await?;

        info!(
            received = total,
            inserted = summary.inserted,
            batches = summary.batches.len(),
            "Elements queued"
        );

        self.distribution.trigger();
        Ok(summary)
    }

    /// 显式更新路径（值与 safe 标志）
    pub async fn update(&self, element: ListElement) -> ControllerResult<ListElement> {
        match self.repos.elements.update(&element).await {
            Err(ControllerError::Duplicate(value)) => {
                self.hub.publish(Event::element_error("Cannot update, duplicate value", value.clone()));
                Err(ControllerError::Duplicate(value))
            }
            other => other,
        }
    }

    pub async fn delete(&self, value: &str) -> ControllerResult<()> {
        if self.repos.elements.delete_by_value(value).await? {
            info!(value = %value, "Element deleted");
            Ok(())
        } else {
            Err(ControllerError::not_found(format!("element {}", value)))
        }
    }

    /// 分页列出元素；`page` 从 1 开始
    pub async fn list_page(
        &self,
        page: usize,
        page_size: usize,
        safe: bool,
        search: Option<&str>,
    ) -> ControllerResult<PaginatedElements> {
        let page = page.max(1);
        let search = search.filter(|s| !s.is_empty());
        let offset = (page - 1).saturating_mul(page_size);

        let elements = self
            .repos
            .elements
            .page(offset, page_size, safe, search)
            .await?;
        let total = self.repos.elements.count(safe, search).await?;

        Ok(PaginatedElements {
            elements,
            total_page_count: page_count(total, page_size),
            page_number: page,
        })
    }

    /// 分页列出投递状态
    pub async fn batch_page(
        &self,
        page: usize,
        page_size: usize,
        statuses: &[DeliveryStatus],
    ) -> ControllerResult<PaginatedStatus> {
        let page = page.max(1);
        let offset = (page - 1).saturating_mul(page_size);

        let items = self.repos.statuses.page(offset, page_size, statuses).await?;
        let total = self.repos.statuses.count(statuses).await?;

        Ok(PaginatedStatus {
            items,
            total_page_count: page_count(total, page_size),
            page_number: page,
        })
    }

    /// 导出全部元素
    pub async fn export_all(&self) -> ControllerResult<Vec<ListElement>> {
        self.repos.elements.all().await
    }

    /// 按值精确查找
    pub async fn lookup(&self, value: &str) -> ControllerResult<Vec<ListElement>> {
        Ok(self
            .repos
            .elements
            .find_by_value(value)
            .await?
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ElementType, EventType};
    use crate::persistence::{ElementStore, MemoryStore};
    use crate::services::health::HealthMonitor;
    use crate::testing::FakeGateway;
    use std::collections::HashSet;
    use std::time::Duration;

    fn service() -> (IngestService, Arc<MemoryStore>, Arc<EventHub>) {
        service_on(Arc::new(MemoryStore::new()))
    }

    fn service_on(store: Arc<MemoryStore>) -> (IngestService, Arc<MemoryStore>, Arc<EventHub>) {
        let repos = Repositories::from_memory(store.clone());
        let gateway = Arc::new(FakeGateway::new());
        let health = Arc::new(HealthMonitor::new(gateway.clone(), repos.clone()));
        let distribution = Arc::new(DistributionEngine::new(
            repos.clone(),
            gateway,
            health,
            Duration::from_secs(60),
        ));
        let hub = Arc::new(EventHub::new());
        (
            IngestService::new(repos, hub.clone(), distribution),
            store,
            hub,
        )
    }

    #[tokio::test]
    async fn test_add_one_assigns_batch() {
        let (service, store, _) = service();
        let a = service
            .add_one(ListElement::new(ElementType::Ip, "1.1.1.1", false))
            .await
            .unwrap();
        let b = service
            .add_one(ListElement::new(ElementType::Domain, "example.com", true))
            .await
            .unwrap();

        assert_ne!(a.batch_id, b.batch_id);
        assert!(store.find_by_value("example.com").await.unwrap().unwrap().safe);
    }

    #[tokio::test]
    async fn test_invalid_format_is_rejected_with_event() {
        let (service, store, hub) = service();
        let mut rx = hub.subscribe();

        let err = service
            .add_one(ListElement::new(ElementType::Ip, "not-an-ip", false))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert!(store.find_by_value("not-an-ip").await.unwrap().is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Error);
        assert_eq!(event.value, "Invalid IP Format");
    }

    #[tokio::test]
    async fn test_duplicate_add_is_conflict() {
        let (service, _, _) = service();
        service
            .add_one(ListElement::new(ElementType::Ip, "1.1.1.1", false))
            .await
            .unwrap();
        let err = service
            .add_one(ListElement::new(ElementType::Ip, "1.1.1.1", true))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_bulk_insert_chunks_into_batches() {
        let (service, store, _) = service();
        let n = MAX_BATCH_SIZE * 2 + 17;
        let elements: Vec<ListElement> = (0..n)
            .map(|i| ListElement::new(ElementType::Domain, format!("host{}.example.com", i), false))
            .collect();

        let summary = service.add_many(elements).await.unwrap();
        assert_eq!(summary.batches.len(), 3);
        assert_eq!(summary.inserted, n);

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), n);
        let batches: HashSet<i64> = all.iter().map(|e| e.batch_id).collect();
        assert_eq!(batches, summary.batches.iter().copied().collect());
        for batch in &summary.batches {
            let size = all.iter().filter(|e| e.batch_id == *batch).count();
            assert!(size <= MAX_BATCH_SIZE);
        }
    }

    #[tokio::test]
    async fn test_bulk_insert_exact_multiple_and_empty() {
        let (service, _, _) = service();
        assert!(service.add_many(vec![]).await.unwrap().batches.is_empty());

        let elements: Vec<ListElement> = (0..MAX_BATCH_SIZE)
            .map(|i| ListElement::new(ElementType::Snort, format!("rule {}", i), false))
            .collect();
        assert_eq!(service.add_many(elements).await.unwrap().batches.len(), 1);
    }

    #[tokio::test]
    async fn test_update_duplicate_publishes_error() {
        let (service, _, hub) = service();
        service
            .add_one(ListElement::new(ElementType::Ip, "1.1.1.1", false))
            .await
            .unwrap();
        let mut second = service
            .add_one(ListElement::new(ElementType::Ip, "2.2.2.2", false))
            .await
            .unwrap();
        let mut rx = hub.subscribe();

        second.value = "1.1.1.1".to_string();
        let err = service.update(second).await.unwrap_err();
        assert!(matches!(err, ControllerError::Duplicate(_)));
        assert!(rx.recv().await.unwrap().is_error());
    }

    #[tokio::test]
    async fn test_delete_and_lookup() {
        let (service, _, _) = service();
        service
            .add_one(ListElement::new(ElementType::Ip, "1.1.1.1", false))
            .await
            .unwrap();

        assert_eq!(service.lookup("1.1.1.1").await.unwrap().len(), 1);
        assert!(service.lookup("1.1.1").await.unwrap().is_empty());

        service.delete("1.1.1.1").await.unwrap();
        assert!(matches!(
            service.delete("1.1.1.1").await,
            Err(ControllerError::NotFound(_))
        ));
        assert!(service.export_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_page_counts_pages() {
        let (service, _, _) = service();
        let elements: Vec<ListElement> = (0..45)
            .map(|i| ListElement::new(ElementType::Domain, format!("h{}.example.com", i), false))
            .collect();
        service.add_many(elements).await.unwrap();

        let page = service.list_page(3, 20, false, None).await.unwrap();
        assert_eq!(page.total_page_count, 3);
        assert_eq!(page.page_number, 3);
        assert_eq!(page.elements.len(), 5);

        let searched = service.list_page(1, 20, false, Some("h4")).await.unwrap();
        // h4, h40..h44
        assert_eq!(searched.elements.len(), 6);
        assert!(service.list_page(1, 20, true, None).await.unwrap().elements.is_empty());
    }

    #[tokio::test]
    async fn test_huge_page_is_empty_not_overflow() {
        let (service, _, _) = service();
        service
            .add_one(ListElement::new(ElementType::Ip, "1.1.1.1", false))
            .await
            .unwrap();

        let page = service.list_page(3, usize::MAX, false, None).await.unwrap();
        assert!(page.elements.is_empty());
        assert_eq!(page.total_page_count, 1);

        let batches = service
            .batch_page(usize::MAX, usize::MAX, &[DeliveryStatus::Pending])
            .await
            .unwrap();
        assert!(batches.items.is_empty());
    }

    #[tokio::test]
    async fn test_ingested_elements_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _, _) = service_on(Arc::new(MemoryStore::open(dir.path()).await.unwrap()));

        let summary = service
            .add_many(vec![
                ListElement::new(ElementType::Ip, "1.1.1.1", false).with_service("feed"),
                ListElement::new(ElementType::Domain, "example.com", true).with_service("feed"),
            ])
            .await
            .unwrap();
        service
            .add_one(ListElement::new(ElementType::Ip, "2.2.2.2", false))
            .await
            .unwrap();

        let reopened = MemoryStore::open(dir.path()).await.unwrap();
        let kept = reopened.find_by_value("example.com").await.unwrap().unwrap();
        assert_eq!(kept.batch_id, summary.batches[0]);
        assert!(kept.safe);
        assert!(reopened.find_by_value("2.2.2.2").await.unwrap().is_some());
        assert_eq!(ElementStore::all(&reopened).await.unwrap().len(), 3);
    }
}
