//! 运行时错误.

use crate::store::DType;
use crate::Idx2d;
use std::path::PathBuf;
use thiserror::Error;

/// 预处理管线与分块存储的运行时错误.
#[derive(Debug, Error)]
pub enum PrepError {
    /// 源文件无法解码. 对该病例是致命的.
    #[error("无法解码 `{path}`: {reason}")]
    Decode {
        /// 出错的文件 (或病例目录).
        path: PathBuf,

        /// 底层原因.
        reason: String,
    },

    /// 通道/标签之间, 或追加记录与声明之间的形状不一致.
    #[error("{what}形状不一致: 期望 {expected:?}, 实际 {found:?}")]
    ShapeMismatch {
        /// 出错的对象.
        what: String,

        /// 期望的形状.
        expected: Vec<usize>,

        /// 实际的形状.
        found: Vec<usize>,
    },

    /// 裁剪边界超出了切片范围.
    #[error("裁剪边界 [{low}, {high}) 超出切片范围 {shape:?}")]
    OutOfBounds {
        /// 下界 (含).
        low: usize,

        /// 上界 (不含).
        high: usize,

        /// 源切片形状 (高, 宽).
        shape: Idx2d,
    },

    /// 标签值不在 `[0, depth)` 内.
    #[error("标签值 {value} 不在 [0, {depth}) 内")]
    InvalidLabel {
        /// 非法的标签值.
        value: u8,

        /// 类别数.
        depth: usize,
    },

    /// 无法创建存储文件.
    #[error("无法创建存储文件 `{path}`")]
    StoreCreate {
        /// 存储文件路径.
        path: PathBuf,

        /// 底层 I/O 错误.
        #[source]
        source: std::io::Error,
    },

    /// 追加记录时发生 I/O 错误. 之前已同步的记录不受影响.
    #[error("写入存储文件 `{path}` 失败")]
    StoreWrite {
        /// 存储文件路径.
        path: PathBuf,

        /// 底层 I/O 错误.
        #[source]
        source: std::io::Error,
    },

    /// 追加记录的元素类型与声明不符.
    #[error("数据集 `{name}` 的元素类型为 {declared}, 但追加的是 {found}")]
    DTypeMismatch {
        /// 数据集名称.
        name: String,

        /// 声明的元素类型.
        declared: DType,

        /// 实际的元素类型.
        found: DType,
    },

    /// 数据集不存在.
    #[error("数据集 `{0}` 不存在")]
    UnknownDataset(String),

    /// 读取的记录下标不小于数据集长度.
    #[error("数据集 `{name}` 只有 {len} 条记录, 无法读取第 {index} 条")]
    RecordOutOfRange {
        /// 数据集名称.
        name: String,

        /// 请求的下标.
        index: usize,

        /// 数据集长度.
        len: usize,
    },

    /// 存储文件内容损坏 (而不仅仅是尾部未写完).
    #[error("存储文件 `{path}` 已损坏: {reason}")]
    CorruptStore {
        /// 存储文件路径.
        path: PathBuf,

        /// 损坏原因.
        reason: String,
    },

    /// 配置非法. 应在处理任何病例之前发现.
    #[error("非法配置: {0}")]
    InvalidConfig(String),

    /// 其他文件系统错误.
    #[error("访问 `{path}` 时发生 I/O 错误")]
    Io {
        /// 出错的路径.
        path: PathBuf,

        /// 底层 I/O 错误.
        #[source]
        source: std::io::Error,
    },
}

/// 管线 / 存储运行时结果.
pub type PrepResult<T> = Result<T, PrepError>;

impl PrepError {
    /// 由任意可显示的底层错误构造 [`PrepError::Decode`].
    pub(crate) fn decode<P: Into<PathBuf>, E: std::fmt::Display>(path: P, err: E) -> Self {
        Self::Decode {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// 构造 [`PrepError::ShapeMismatch`].
    pub(crate) fn shape<S: Into<String>>(what: S, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// 为 [`std::io::Error`] 附上路径.
    pub(crate) fn io<P: Into<PathBuf>>(path: P) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
