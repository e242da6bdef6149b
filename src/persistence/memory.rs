//! 内存存储 + JSON 快照
//!
//! 所有数据放在一把 `RwLock` 后面，每个方法只持锁一次，
//! 因此每次调用都是一个原子操作。快照以原子方式写入 `DATA_DIR/store.json`。

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::info;

use super::{ElementStore, ElementTypeStore, ModuleStore, StatusStore};
use crate::domain::{
    DeliveryStatus, ElementType, ListElement, ModuleMetadata, ModuleType, UpdateStatus,
};
use crate::error::{ControllerError, ControllerResult};

const SNAPSHOT_FILE_NAME: &str = "store.json";
const SNAPSHOT_VERSION: u32 = 1;

/// 快照内容
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    modules: BTreeMap<i64, ModuleMetadata>,
    #[serde(default)]
    element_types: BTreeMap<i64, Vec<ElementType>>,
    #[serde(default)]
    elements: BTreeMap<i64, ListElement>,
    #[serde(default)]
    statuses: BTreeMap<i64, UpdateStatus>,
    #[serde(default)]
    last_module_id: i64,
    #[serde(default)]
    last_element_id: i64,
    #[serde(default)]
    last_status_id: i64,
    #[serde(default)]
    last_batch_id: i64,

    /// value -> element id
    #[serde(skip)]
    value_index: HashMap<String, i64>,
    /// (module id, batch id) -> status id
    #[serde(skip)]
    status_index: HashMap<(i64, i64), i64>,
}

impl StoreData {
    fn rebuild_indexes(&mut self) {
        self.value_index = self
            .elements
            .values()
            .map(|e| (e.value.clone(), e.id))
            .collect();
        self.status_index = self
            .statuses
            .values()
            .map(|s| ((s.module_id, s.batch_id), s.id))
            .collect();
    }

    fn module_id_by_name(&self, name: &str) -> Option<i64> {
        self.modules
            .values()
            .find(|m| m.module_service_name == name)
            .map(|m| m.id)
    }

    fn insert_element(&mut self, mut element: ListElement) -> ListElement {
        self.last_element_id += 1;
        element.id = self.last_element_id;
        let now = Utc::now();
        element.created_at = now;
        element.updated_at = now;
        self.value_index.insert(element.value.clone(), element.id);
        self.elements.insert(element.id, element.clone());
        element
    }

    /// 追加接受类型，并同步到模块记录
    fn merge_types(&mut self, module_id: i64, types: &[ElementType]) {
        let entry = self.element_types.entry(module_id).or_default();
        for t in types {
            if !entry.contains(t) {
                entry.push(*t);
            }
        }
        let merged = entry.clone();
        if let Some(module) = self.modules.get_mut(&module_id) {
            module.accepted_element_types.element_types = merged;
        }
    }

    fn elements_matching(&self, safe: bool, search: Option<&str>) -> Vec<&ListElement> {
        let mut matched: Vec<&ListElement> = self
            .elements
            .values()
            .filter(|e| e.safe == safe)
            .filter(|e| search.map_or(true, |s| e.value.contains(s)))
            .collect();
        matched.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        matched
    }
}

/// 内存存储
pub struct MemoryStore {
    data: RwLock<StoreData>,
    dirty: AtomicBool,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// 不带快照的存储（测试用）
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData {
                version: SNAPSHOT_VERSION,
                ..Default::default()
            }),
            dirty: AtomicBool::new(false),
            snapshot_path: None,
        }
    }

    /// 打开数据目录中的快照；文件不存在时从空存储开始
    ///
    /// 快照无法读取或解析时返回错误，不会用空存储覆盖已有数据
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(SNAPSHOT_FILE_NAME);

        let mut data = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<StoreData>(&content)
                .with_context(|| format!("Corrupt store snapshot {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read store snapshot {}", path.display())))
            }
        };
        data.version = SNAPSHOT_VERSION;
        data.rebuild_indexes();

        info!(
            path = %path.display(),
            modules = data.modules.len(),
            elements = data.elements.len(),
            statuses = data.statuses.len(),
            "Opened store snapshot"
        );

        Ok(Self {
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
            snapshot_path: Some(path),
        })
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// 有修改时写快照（原子写入：临时文件 + rename）
    pub async fn flush(&self) -> anyhow::Result<bool> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let content = {
            let data = self.data.read().await;
            serde_json::to_string(&*data)?
        };

        let temp_path = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let result = async {
            fs::write(&temp_path, &content).await?;
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = result {
            // 下次再试
            self.mark_dirty();
            return Err(e.into());
        }

        info!(path = %path.display(), bytes = content.len(), "Saved store snapshot");
        Ok(true)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleStore for MemoryStore {
    async fn upsert(&self, module: &ModuleMetadata) -> ControllerResult<i64> {
        let mut data = self.data.write().await;

        let id = match data.module_id_by_name(&module.module_service_name) {
            Some(id) => {
                if let Some(existing) = data.modules.get_mut(&id) {
                    existing.module_description = module.module_description.clone();
                    existing.icon_url = module.icon_url.clone();
                    existing.configured = module.configured;
                    existing.last_ping = module.last_ping;
                    // 端点只追加不删除
                    for endpoint in &module.module_endpoints {
                        if !existing.module_endpoints.contains(endpoint) {
                            existing.module_endpoints.push(endpoint.clone());
                        }
                    }
                }
                id
            }
            None => {
                data.last_module_id += 1;
                let id = data.last_module_id;
                let mut record = module.clone();
                record.id = id;
                data.modules.insert(id, record);
                id
            }
        };

        data.merge_types(id, &module.accepted_element_types.element_types);
        drop(data);

        self.mark_dirty();
        Ok(id)
    }

    async fn all(&self) -> ControllerResult<Vec<ModuleMetadata>> {
        let data = self.data.read().await;
        Ok(data.modules.values().cloned().collect())
    }

    async fn all_of_type(&self, module_type: ModuleType) -> ControllerResult<Vec<ModuleMetadata>> {
        let data = self.data.read().await;
        Ok(data
            .modules
            .values()
            .filter(|m| m.module_type == module_type)
            .cloned()
            .collect())
    }

    async fn get_by_service_name(&self, name: &str) -> ControllerResult<Option<ModuleMetadata>> {
        let data = self.data.read().await;
        Ok(data
            .module_id_by_name(name)
            .and_then(|id| data.modules.get(&id).cloned()))
    }

    async fn delete_by_service_name(&self, name: &str) -> ControllerResult<bool> {
        let mut data = self.data.write().await;
        let Some(id) = data.module_id_by_name(name) else {
            return Ok(false);
        };
        data.modules.remove(&id);
        data.element_types.remove(&id);
        drop(data);

        self.mark_dirty();
        Ok(true)
    }

    async fn ping(&self) -> ControllerResult<()> {
        let _data = self.data.read().await;
        Ok(())
    }
}

#[async_trait]
impl ElementTypeStore for MemoryStore {
    async fn accepted_types(&self, module_id: i64) -> ControllerResult<Vec<ElementType>> {
        let data = self.data.read().await;
        Ok(data.element_types.get(&module_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ElementStore for MemoryStore {
    async fn persist(&self) -> ControllerResult<()> {
        self.flush()
            .await
            .map(|_| ())
            .map_err(|e| ControllerError::persistence(format!("snapshot flush failed: {e:#}")))
    }

    async fn next_batch_id(&self) -> ControllerResult<i64> {
        let mut data = self.data.write().await;
        data.last_batch_id += 1;
        let id = data.last_batch_id;
        drop(data);

        self.mark_dirty();
        Ok(id)
    }

    async fn insert(&self, element: ListElement) -> ControllerResult<ListElement> {
        let mut data = self.data.write().await;
        if data.value_index.contains_key(&element.value) {
            return Err(ControllerError::duplicate(element.value));
        }
        let inserted = data.insert_element(element);
        drop(data);

        self.mark_dirty();
        Ok(inserted)
    }

    async fn batch_insert(&self, elements: Vec<ListElement>) -> ControllerResult<usize> {
        let mut data = self.data.write().await;
        let mut inserted = 0;
        for element in elements {
            if data.value_index.contains_key(&element.value) {
                continue;
            }
            data.insert_element(element);
            inserted += 1;
        }
        drop(data);

        if inserted > 0 {
            self.mark_dirty();
        }
        Ok(inserted)
    }

    async fn update(&self, element: &ListElement) -> ControllerResult<ListElement> {
        let mut data = self.data.write().await;

        if let Some(owner) = data.value_index.get(&element.value) {
            if *owner != element.id {
                return Err(ControllerError::duplicate(element.value.clone()));
            }
        }

        let Some(existing) = data.elements.get_mut(&element.id) else {
            return Err(ControllerError::not_found(format!("element {}", element.id)));
        };
        let old_value = std::mem::replace(&mut existing.value, element.value.clone());
        existing.safe = element.safe;
        existing.updated_at = Utc::now();
        let updated = existing.clone();

        data.value_index.remove(&old_value);
        data.value_index.insert(updated.value.clone(), updated.id);
        drop(data);

        self.mark_dirty();
        Ok(updated)
    }

    async fn delete_by_value(&self, value: &str) -> ControllerResult<bool> {
        let mut data = self.data.write().await;
        let Some(id) = data.value_index.remove(value) else {
            return Ok(false);
        };
        data.elements.remove(&id);
        drop(data);

        self.mark_dirty();
        Ok(true)
    }

    async fn page(
        &self,
        offset: usize,
        size: usize,
        safe: bool,
        search: Option<&str>,
    ) -> ControllerResult<Vec<ListElement>> {
        let data = self.data.read().await;
        Ok(data
            .elements_matching(safe, search)
            .into_iter()
            .skip(offset)
            .take(size)
            .cloned()
            .collect())
    }

    async fn count(&self, safe: bool, search: Option<&str>) -> ControllerResult<usize> {
        let data = self.data.read().await;
        Ok(data.elements_matching(safe, search).len())
    }

    async fn all(&self) -> ControllerResult<Vec<ListElement>> {
        let data = self.data.read().await;
        let mut all: Vec<ListElement> = data.elements.values().cloned().collect();
        all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(all)
    }

    async fn find_by_value(&self, value: &str) -> ControllerResult<Option<ListElement>> {
        let data = self.data.read().await;
        Ok(data
            .value_index
            .get(value)
            .and_then(|id| data.elements.get(id).cloned()))
    }

    async fn latest_for_service(&self, service_name: &str) -> ControllerResult<Option<ListElement>> {
        let data = self.data.read().await;
        Ok(data
            .elements
            .values()
            .filter(|e| e.service_name == service_name)
            .max_by_key(|e| (e.created_at, e.id))
            .cloned())
    }

    async fn unpushed_batch_ids(
        &self,
        module_id: i64,
        safe: bool,
        types: &[ElementType],
    ) -> ControllerResult<Vec<i64>> {
        let data = self.data.read().await;
        let ids: BTreeSet<i64> = data
            .elements
            .values()
            .filter(|e| e.safe == safe && types.contains(&e.element_type))
            .map(|e| e.batch_id)
            .filter(|batch_id| !data.status_index.contains_key(&(module_id, *batch_id)))
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn batch_items(
        &self,
        batch_id: i64,
        types: &[ElementType],
        safe: bool,
    ) -> ControllerResult<Vec<ListElement>> {
        let data = self.data.read().await;
        Ok(data
            .elements
            .values()
            .filter(|e| e.batch_id == batch_id && e.safe == safe && types.contains(&e.element_type))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn insert_if_absent(&self, mut status: UpdateStatus) -> ControllerResult<bool> {
        let mut data = self.data.write().await;
        let key = (status.module_id, status.batch_id);
        if data.status_index.contains_key(&key) {
            return Ok(false);
        }

        data.last_status_id += 1;
        status.id = data.last_status_id;
        let now = Utc::now();
        status.created_at = now;
        status.updated_at = now;
        data.status_index.insert(key, status.id);
        data.statuses.insert(status.id, status);
        drop(data);

        self.mark_dirty();
        Ok(true)
    }

    async fn update_in_place(
        &self,
        module_id: i64,
        batch_id: i64,
        status: DeliveryStatus,
    ) -> ControllerResult<bool> {
        let mut data = self.data.write().await;
        let Some(id) = data.status_index.get(&(module_id, batch_id)).copied() else {
            return Ok(false);
        };
        if let Some(row) = data.statuses.get_mut(&id) {
            row.status = status;
            row.updated_at = Utc::now();
        }
        drop(data);

        self.mark_dirty();
        Ok(true)
    }

    async fn get(&self, module_id: i64, batch_id: i64) -> ControllerResult<Option<UpdateStatus>> {
        let data = self.data.read().await;
        Ok(data
            .status_index
            .get(&(module_id, batch_id))
            .and_then(|id| data.statuses.get(id).cloned()))
    }

    async fn batch_ids_with_status(
        &self,
        module_id: i64,
        status: DeliveryStatus,
    ) -> ControllerResult<Vec<i64>> {
        let data = self.data.read().await;
        let mut ids: Vec<i64> = data
            .statuses
            .values()
            .filter(|s| s.module_id == module_id && s.status == status)
            .map(|s| s.batch_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn latest_delivery(&self, module_id: i64) -> ControllerResult<Option<UpdateStatus>> {
        let data = self.data.read().await;
        Ok(data
            .statuses
            .values()
            .filter(|s| s.module_id == module_id)
            .filter(|s| matches!(s.status, DeliveryStatus::Pending | DeliveryStatus::Success))
            .max_by_key(|s| (s.updated_at, s.id))
            .cloned())
    }

    async fn page(
        &self,
        offset: usize,
        size: usize,
        statuses: &[DeliveryStatus],
    ) -> ControllerResult<Vec<UpdateStatus>> {
        let data = self.data.read().await;
        Ok(data
            .statuses
            .values()
            .rev()
            .filter(|s| statuses.contains(&s.status))
            .skip(offset)
            .take(size)
            .cloned()
            .collect())
    }

    async fn count(&self, statuses: &[DeliveryStatus]) -> ControllerResult<usize> {
        let data = self.data.read().await;
        Ok(data
            .statuses
            .values()
            .filter(|s| statuses.contains(&s.status))
            .count())
    }
}
