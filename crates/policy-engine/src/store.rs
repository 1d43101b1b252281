//! 策略存储管理
//!
//! 使用 DashMap 提供线程安全的已编译策略缓存，支持策略的加载、更新、删除、
//! 批量操作以及从目录或配置加载。

use crate::context::EvalContext;
use crate::declaration::PolicyDeclaration;
use crate::error::{PolicyError, Result};
use crate::policy::{Evaluation, Policy};
use dashmap::DashMap;
use policyline_shared::config::EngineConfig;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 策略存储
#[derive(Clone)]
pub struct PolicyStore {
    /// 编译后的策略缓存
    policies: Arc<DashMap<String, Policy>>,
}

impl PolicyStore {
    /// 创建新的策略存储
    pub fn new() -> Self {
        Self {
            policies: Arc::new(DashMap::new()),
        }
    }

    /// 按引擎配置创建并加载策略
    ///
    /// ```no_run
    /// use policyline::PolicyStore;
    /// use policyline_shared::{config::AppConfig, observability};
    ///
    /// fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = AppConfig::load("policy-service")?;
    ///     let _guard = observability::init(&config.observability)?;
    ///
    ///     let store = PolicyStore::from_config(&config.engine)?;
    ///     println!("已加载策略: {:?}", store.list_ids());
    ///     Ok(())
    /// }
    /// ```
    #[instrument(skip(config), fields(policy_dir = ?config.policy_dir))]
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = Self::new();

        if let Some(dir) = &config.policy_dir {
            store.load_dir(dir)?;
        }
        for path in &config.policy_files {
            store.load_file(path)?;
        }

        info!("策略存储初始化完成: {} 条策略", store.len());
        Ok(store)
    }

    /// 获取当前存储的策略数量
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// 加载策略（从声明），同名策略被替换
    #[instrument(skip(self, declaration))]
    pub fn load(&self, id: &str, declaration: PolicyDeclaration) -> Result<()> {
        let policy = Policy::new(declaration)?;
        self.policies.insert(id.to_string(), policy);

        info!("策略已加载: {}", id);
        Ok(())
    }

    /// 加载策略（从 JSON 字符串）
    ///
    /// 顶层的 `id` 字段作为策略 ID，缺省时生成 UUID。
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let value: JsonValue = serde_json::from_str(json)?;
        self.load_value(value, None)
    }

    /// 更新策略
    #[instrument(skip(self, declaration))]
    pub fn update(&self, id: &str, declaration: PolicyDeclaration) -> Result<()> {
        if !self.policies.contains_key(id) {
            warn!("更新不存在的策略: {}", id);
            return Err(PolicyError::PolicyNotFound(id.to_string()));
        }

        self.load(id, declaration)
    }

    /// 删除策略
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        if self.policies.remove(id).is_some() {
            info!("策略已删除: {}", id);
            Ok(())
        } else {
            warn!("删除不存在的策略: {}", id);
            Err(PolicyError::PolicyNotFound(id.to_string()))
        }
    }

    /// 获取策略
    pub fn get(&self, id: &str) -> Option<Policy> {
        self.policies.get(id).map(|p| p.clone())
    }

    /// 检查策略是否存在
    pub fn contains(&self, id: &str) -> bool {
        self.policies.contains_key(id)
    }

    /// 获取所有策略 ID（已排序）
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.policies.iter().map(|p| p.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 评估指定策略
    pub fn evaluate(&self, id: &str, ctx: &EvalContext) -> Result<Evaluation> {
        let policy = self
            .get(id)
            .ok_or_else(|| PolicyError::PolicyNotFound(id.to_string()))?;
        Ok(policy.evaluate(ctx))
    }

    /// 批量加载策略，失败的条目被跳过并记录
    #[instrument(skip(self, declarations))]
    pub fn load_batch(&self, declarations: Vec<(String, PolicyDeclaration)>) -> Vec<String> {
        let mut loaded_ids = Vec::with_capacity(declarations.len());
        let mut errors = Vec::new();

        for (id, declaration) in declarations {
            match self.load(&id, declaration) {
                Ok(()) => loaded_ids.push(id),
                Err(e) => errors.push((id, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!(
            "批量加载完成: {} 成功, {} 失败",
            loaded_ids.len(),
            errors.len()
        );

        loaded_ids
    }

    /// 加载目录下的全部 `*.json` 策略文件
    ///
    /// 文件内没有 `id` 时以文件名（不含扩展名）作为策略 ID。任一文件失败则返回错误。
    #[instrument(skip(self, dir), fields(dir = %dir.as_ref().display()))]
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let mut paths: Vec<_> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded_ids = Vec::with_capacity(paths.len());
        for path in paths {
            loaded_ids.push(self.load_file(&path)?);
        }

        info!("目录加载完成: {} 个策略", loaded_ids.len());
        Ok(loaded_ids)
    }

    /// 加载单个策略文件
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let value: JsonValue = serde_json::from_str(&content)?;
        let fallback = path.file_stem().and_then(|s| s.to_str());

        self.load_value(value, fallback)
    }

    fn load_value(&self, mut value: JsonValue, fallback_id: Option<&str>) -> Result<String> {
        let declared = match value.as_object_mut().and_then(|obj| obj.remove("id")) {
            Some(JsonValue::String(id)) => Some(id),
            Some(other) => {
                return Err(PolicyError::InvalidDeclaration(format!(
                    "策略 id 必须是字符串: {}",
                    other
                )));
            }
            None => None,
        };

        let id = declared
            .or_else(|| fallback_id.map(str::to_string))
            .unwrap_or_else(|| {
                let generated = uuid::Uuid::new_v4().to_string();
                debug!("策略未声明 id，已生成: {}", generated);
                generated
            });

        let policy = Policy::from_value(value)?;
        self.policies.insert(id.clone(), policy);

        info!("策略已加载: {}", id);
        Ok(id)
    }

    /// 清空所有策略
    pub fn clear(&self) {
        self.policies.clear();
        info!("所有策略已清空");
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
