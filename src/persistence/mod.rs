//! 持久化协作者
//!
//! 核心只依赖这里的 trait；每个方法都是一次原子操作，
//! 不存在跨模块的长事务。默认实现见 [`memory::MemoryStore`]。

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{
    DeliveryStatus, ElementType, ListElement, ModuleMetadata, ModuleType, UpdateStatus,
};
use crate::error::ControllerResult;

pub use memory::MemoryStore;

/// 模块元数据存储
#[async_trait]
pub trait ModuleStore: Send + Sync {
    /// 按服务名 upsert，返回模块 id
    ///
    /// 冲突时更新描述、图标、configured、last_ping、端点与接受类型
    async fn upsert(&self, module: &ModuleMetadata) -> ControllerResult<i64>;

    async fn all(&self) -> ControllerResult<Vec<ModuleMetadata>>;

    async fn all_of_type(&self, module_type: ModuleType) -> ControllerResult<Vec<ModuleMetadata>>;

    async fn get_by_service_name(&self, name: &str) -> ControllerResult<Option<ModuleMetadata>>;

    /// 删除模块及其端点、接受类型；返回是否存在
    async fn delete_by_service_name(&self, name: &str) -> ControllerResult<bool>;

    /// 存储是否可用
    async fn ping(&self) -> ControllerResult<()>;
}

/// 模块接受的元素类型
#[async_trait]
pub trait ElementTypeStore: Send + Sync {
    async fn accepted_types(&self, module_id: i64) -> ControllerResult<Vec<ElementType>>;
}

/// list element 存储
#[async_trait]
pub trait ElementStore: Send + Sync {
    /// 原子分配一个新的 batch id
    async fn next_batch_id(&self) -> ControllerResult<i64>;

    /// 插入单个元素；值已存在时返回 Duplicate
    async fn insert(&self, element: ListElement) -> ControllerResult<ListElement>;

    /// 批量插入，已存在的值被跳过（保留原记录）；返回实际插入数
    async fn batch_insert(&self, elements: Vec<ListElement>) -> ControllerResult<usize>;

    /// 按 id 更新值与 safe 标志
    async fn update(&self, element: &ListElement) -> ControllerResult<ListElement>;

    async fn delete_by_value(&self, value: &str) -> ControllerResult<bool>;

    /// 把已接受的写入落盘；返回后重启不会丢失
    async fn persist(&self) -> ControllerResult<()>;

    /// 分页查询，按创建时间倒序；`search` 为子串匹配
    async fn page(
        &self,
        offset: usize,
        size: usize,
        safe: bool,
        search: Option<&str>,
    ) -> ControllerResult<Vec<ListElement>>;

    async fn count(&self, safe: bool, search: Option<&str>) -> ControllerResult<usize>;

    /// 全部元素（导出用）
    async fn all(&self) -> ControllerResult<Vec<ListElement>>;

    async fn find_by_value(&self, value: &str) -> ControllerResult<Option<ListElement>>;

    /// 某个服务最近插入的元素
    async fn latest_for_service(&self, service_name: &str) -> ControllerResult<Option<ListElement>>;

    /// 含有至少一个接受类型元素、且该模块从未有状态记录的 batch id（升序）
    async fn unpushed_batch_ids(
        &self,
        module_id: i64,
        safe: bool,
        types: &[ElementType],
    ) -> ControllerResult<Vec<i64>>;

    /// batch 中符合类型与 safe 标志的元素
    async fn batch_items(
        &self,
        batch_id: i64,
        types: &[ElementType],
        safe: bool,
    ) -> ControllerResult<Vec<ListElement>>;
}

/// 投递状态存储
///
/// 每个 (module, batch) 最多一行：首次尝试插入，之后只原地更新
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// 不存在时插入；返回是否插入
    async fn insert_if_absent(&self, status: UpdateStatus) -> ControllerResult<bool>;

    /// 原地更新状态；返回该行是否存在
    async fn update_in_place(
        &self,
        module_id: i64,
        batch_id: i64,
        status: DeliveryStatus,
    ) -> ControllerResult<bool>;

    async fn get(&self, module_id: i64, batch_id: i64) -> ControllerResult<Option<UpdateStatus>>;

    async fn batch_ids_with_status(
        &self,
        module_id: i64,
        status: DeliveryStatus,
    ) -> ControllerResult<Vec<i64>>;

    /// 最近一次 pending/success 的记录
    async fn latest_delivery(&self, module_id: i64) -> ControllerResult<Option<UpdateStatus>>;

    async fn page(
        &self,
        offset: usize,
        size: usize,
        statuses: &[DeliveryStatus],
    ) -> ControllerResult<Vec<UpdateStatus>>;

    async fn count(&self, statuses: &[DeliveryStatus]) -> ControllerResult<usize>;
}

/// 存储集合（类似 DAO）
#[derive(Clone)]
pub struct Repositories {
    pub modules: Arc<dyn ModuleStore>,
    pub element_types: Arc<dyn ElementTypeStore>,
    pub elements: Arc<dyn ElementStore>,
    pub statuses: Arc<dyn StatusStore>,
}

impl Repositories {
    /// 四个存储都由同一个 `MemoryStore` 提供
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            modules: store.clone(),
            element_types: store.clone(),
            elements: store.clone(),
            statuses: store,
        }
    }
}
