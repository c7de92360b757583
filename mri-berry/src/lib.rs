#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 将多模态 3D MRI 病例 (BraTS 格式: 若干通道 + 一个体素级真值标签)
//! 流式地转换为可供模型训练使用的数据集.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 主要面向 BraTS 数据组织方式: 每个病例一个目录, 目录下按文件名排序后
//!   最后一个文件是标签 (也可以通过标记子串指定). 其他数据源只要按此模式组织即可工作.
//! 2. 所有可预见的失败都通过 [`PrepResult`] 返回, 而不是 panic.
//!
//! # 组成
//!
//! ### 病例与样本 ✅
//!
//! [`Case`] 是一个病例的多通道体数据和标签体数据, 构造时检查形状一致性.
//! [`Sample`] 是在管线中流动的 (特征, 标签) 对.
//!
//! 实现位于 `mri-berry/src/data`.
//!
//! ### 变换阶段 ✅
//!
//! 加载 (含空切片过滤)、裁剪、增强、归一化/编码. 每个阶段消费一个样本,
//! 惰性地产出零个或多个样本.
//!
//! 实现位于 `mri-berry/src/stage`.
//!
//! ### 管线 ✅
//!
//! 按顺序串联所有阶段, 一次只在每一级保留一个样本, 因此内存占用与数据集规模无关.
//!
//! 实现位于 `mri-berry/src/pipeline.rs`.
//!
//! ### 增量分块存储 ✅
//!
//! 单文件、只追加、带类型与形状检查的双数据集 (`X`, `Y`) 容器.
//! 每次追加都会持久化同步, 写入失败不会推进计数器.
//!
//! 实现位于 `mri-berry/src/store`.
//!
//! ### 输出端 ✅
//!
//! 分块存储、逐样本 npz 文件、逐切片序列化记录三种可互换的输出端.
//!
//! 实现位于 `mri-berry/src/sink`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

mod error;

pub use error::{PrepError, PrepResult};

/// 病例与样本的内存表示.
mod data;

pub use data::{Case, LabelRecord, Labels, Sample};

pub mod config;
pub mod dataset;
pub mod pipeline;
pub mod prelude;
pub mod reader;
pub mod sink;
pub mod stage;
pub mod store;
