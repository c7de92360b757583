//! 配置. 所有字段都有默认值, 可以从 JSON 文件读取.
//!
//! ```json
//! {
//!   "stages": [
//!     { "name": "crop", "params": { "low": 56, "high": 184 } },
//!     { "name": "augment", "params": { "ratio": 0.1, "ops": ["rotate", "flip", "shift"] } },
//!     { "name": "normalize", "params": { "policy": { "kind": "z_score" }, "scope": "global" } }
//!   ],
//!   "sink": "store",
//!   "chunk_len": 16
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::consts::{AUGMENT_RATIO, CLASS_DEPTH, CROP_BOUNDS, SPLIT_NAMES, SPLIT_PERCENTS};
use crate::stage::ops::OpRegistry;
use crate::stage::{Augment, AugmentMode, ChannelStats, Crop, LabelRule, Normalize, Policy, Scope, Stage};
use crate::store::DType;
use crate::{PrepError, PrepResult};

/// 输出端种类.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// 每个划分一个分块存储文件.
    #[default]
    Store,

    /// 每个样本一个 `.npz`.
    Npz,

    /// 每个样本一个逐切片记录文件.
    Record,
}

/// 预处理任务的完整配置.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// 依次处理的划分.
    pub splits: Vec<String>,

    /// 整理数据集时的划分百分比.
    pub split_percents: [u32; 3],

    /// 标签文件名包含的子串. 为 `None` 时取排序后最后一个文件.
    pub label_marker: Option<String>,

    /// 加载之后依次运行的阶段.
    pub stages: Vec<StageConfig>,

    /// 输出端.
    pub sink: SinkKind,

    /// 分块存储的块长度.
    pub chunk_len: usize,

    /// 分块存储中 `X` 的元素类型.
    pub x_dtype: DType,

    /// 分块存储中 `Y` 的元素类型.
    pub y_dtype: DType,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            splits: SPLIT_NAMES.iter().map(|s| s.to_string()).collect(),
            split_percents: SPLIT_PERCENTS,
            label_marker: None,
            stages: vec![StageConfig::named("crop"), StageConfig::named("augment")],
            sink: SinkKind::Store,
            chunk_len: 1,
            x_dtype: DType::F32,
            y_dtype: DType::U8,
        }
    }
}

impl PrepConfig {
    /// 从 JSON 文件读取.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(PrepError::io(path))?;
        serde_json::from_str(&text)
            .map_err(|e| PrepError::InvalidConfig(format!("无法解析 `{}`: {e}", path.display())))
    }

    /// 标签规则.
    pub fn label_rule(&self) -> LabelRule {
        match &self.label_marker {
            Some(m) => LabelRule::Marker(m.clone()),
            None => LabelRule::Last,
        }
    }

    /// 是否有阶段需要预先统计全局通道量?
    pub fn needs_stats(&self) -> bool {
        self.stages.iter().any(StageConfig::needs_stats)
    }
}

/// 按名称描述的阶段.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// 阶段名称: `crop`, `augment` 或 `normalize`.
    pub name: String,

    /// 阶段参数. 缺省或为 `null` 时使用默认参数.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// [`Crop`] 的参数.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParams {
    /// 下界.
    pub low: usize,
    /// 上界.
    pub high: usize,
}

impl Default for CropParams {
    fn default() -> Self {
        let (low, high) = CROP_BOUNDS;
        Self { low, high }
    }
}

/// [`Augment`] 的参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentParams {
    /// 被选中切片的比例.
    pub ratio: f64,
    /// 几何操作名称, 按顺序.
    pub ops: Vec<String>,
    /// 派生方式.
    pub mode: AugmentMode,
    /// 随机种子.
    pub seed: Option<u64>,
}

impl Default for AugmentParams {
    fn default() -> Self {
        Self {
            ratio: AUGMENT_RATIO,
            ops: vec!["rotate".into(), "flip".into(), "shift".into()],
            mode: AugmentMode::Chain,
            seed: None,
        }
    }
}

/// 归一化统计量的来源.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// 逐样本.
    #[default]
    PerSample,
    /// 全局.
    Global,
}

/// [`Normalize`] 的参数.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    /// 数值变换方式.
    pub policy: Policy,
    /// 统计量来源.
    pub scope: ScopeKind,
    /// one-hot 深度, `null` 表示保留类别编码.
    pub depth: Option<usize>,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            scope: ScopeKind::PerSample,
            depth: Some(CLASS_DEPTH),
        }
    }
}

impl StageConfig {
    /// 使用默认参数的阶段.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            params: serde_json::Value::Null,
        }
    }

    /// 解析参数.
    pub fn params<T: DeserializeOwned + Default>(&self) -> PrepResult<T> {
        if self.params.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.params.clone()).map_err(|e| {
            PrepError::InvalidConfig(format!("阶段 `{}` 的参数非法: {e}", self.name))
        })
    }

    fn needs_stats(&self) -> bool {
        self.name == "normalize"
            && self
                .params::<NormalizeParams>()
                .is_ok_and(|p| p.scope == ScopeKind::Global)
    }

    /// 构建阶段. 名称未知时返回 `Ok(None)`.
    ///
    /// 全局归一化需要 `stats`, 缺失时返回 [`PrepError::InvalidConfig`].
    pub fn build(
        &self,
        registry: &OpRegistry,
        stats: Option<&ChannelStats>,
    ) -> PrepResult<Option<Box<dyn Stage>>> {
        let stage: Box<dyn Stage> = match self.name.as_str() {
            "crop" => {
                let p: CropParams = self.params()?;
                Box::new(Crop::new(p.low, p.high)?)
            }
            "augment" => {
                let p: AugmentParams = self.params()?;
                Box::new(Augment::new(p.ratio, registry.resolve(&p.ops)?, p.mode, p.seed)?)
            }
            "normalize" => {
                let p: NormalizeParams = self.params()?;
                let scope = match (p.scope, stats) {
                    (ScopeKind::PerSample, _) => Scope::PerSample,
                    (ScopeKind::Global, Some(s)) => Scope::Global(s.clone()),
                    (ScopeKind::Global, None) => {
                        return Err(PrepError::InvalidConfig("全局归一化需要预先统计通道量".into()))
                    }
                };
                Box::new(Normalize::new(p.policy, scope, p.depth)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(stage))
    }
}
