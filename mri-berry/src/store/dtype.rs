//! 存储元素类型.

use std::fmt;

use num::NumCast;
use serde::{Deserialize, Serialize};

/// 数据集声明的元素类型. 磁盘上一律按小端序存放.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// `u8`
    U8,
    /// `i8`
    I8,
    /// `u16`
    U16,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
}

impl DType {
    /// 单个元素的字节数.
    pub const fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    /// 小写名称, 如 `"f32"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可存入分块存储的元素.
pub trait Element: Copy + Default + NumCast + Send + Sync + 'static {
    /// 对应的 [`DType`].
    const DTYPE: DType;

    /// 以小端序追加到 `out`.
    fn write_le(&self, out: &mut Vec<u8>);

    /// 从恰好 `DTYPE.size()` 个字节中以小端序读出.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $d:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$d;

                #[inline]
                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_element!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

/// 按运行时的 [`DType`] 选择具体类型 `$t` 执行 `$body`.
macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::store::DType::U8 => {
                type $t = u8;
                $body
            }
            $crate::store::DType::I8 => {
                type $t = i8;
                $body
            }
            $crate::store::DType::U16 => {
                type $t = u16;
                $body
            }
            $crate::store::DType::I16 => {
                type $t = i16;
                $body
            }
            $crate::store::DType::I32 => {
                type $t = i32;
                $body
            }
            $crate::store::DType::I64 => {
                type $t = i64;
                $body
            }
            $crate::store::DType::F32 => {
                type $t = f32;
                $body
            }
            $crate::store::DType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

pub(crate) use with_dtype;
