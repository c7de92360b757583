//! 通用常量.

/// 标签体素值.
pub mod label {
    /// BraTS 数据集中, 背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// BraTS 数据集中, 坏死区的体素值.
    pub const NECROSIS: u8 = 1;

    /// BraTS 数据集中, 水肿区的体素值.
    pub const EDEMA: u8 = 2;

    /// BraTS 数据集中, 非增强肿瘤的体素值.
    pub const NON_ENHANCING: u8 = 3;

    /// BraTS 数据集中, 增强肿瘤的体素值.
    pub const ENHANCING: u8 = 4;

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }
}

/// 标签类别数, 即 one-hot 编码的深度.
pub const CLASS_DEPTH: usize = 5;

/// 默认裁剪边界. 从 240x240 (或 192x192) 的切片中心裁出 128x128.
pub const CROP_BOUNDS: (usize, usize) = (56, 184);

/// 默认的增强切片比例.
pub const AUGMENT_RATIO: f64 = 0.1;

/// 最大值缩放的默认目标峰值, 即 `u8` 的表示范围.
pub const MAX_SCALE_PEAK: f32 = 255.0;

/// 数据集划分名称.
pub const SPLIT_NAMES: [&str; 3] = ["training", "validation", "testing"];

/// 数据集划分的默认百分比, 与 [`SPLIT_NAMES`] 一一对应.
pub const SPLIT_PERCENTS: [u32; 3] = [70, 20, 10];

/// 原始数据集中, 待划分的病例分组目录.
pub const CASE_GROUPS: [&str; 2] = ["HGG", "LGG"];

/// 分块存储中特征数据集的默认名称.
pub const FEATURES: &str = "X";

/// 分块存储中标签数据集的默认名称.
pub const LABELS: &str = "Y";
