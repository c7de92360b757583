//! 几何增强阶段.

use std::sync::Arc;

use ndarray::{concatenate, s, Array3, Array4, Axis};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::ops::GeometricOp;
use super::{emit_one, Emit, Stage};
use crate::consts::AUGMENT_RATIO;
use crate::{Labels, PrepError, PrepResult, Sample};

/// 派生切片的生成方式.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentMode {
    /// 依次组合所有操作, 每个被选中的切片派生一个新切片.
    #[default]
    Chain,

    /// 每个操作单独作用, 每个被选中的切片派生 `ops.len()` 个新切片.
    EachOp,
}

#[allow(clippy::option_if_let_else)]
fn get_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// 随机选取 `round(ratio * z)` 个互不相同的切片, 施加几何操作后作为新切片追加.
///
/// 原始切片保持不变并排在最前. 必须在 one-hot 编码之前运行.
pub struct Augment {
    ratio: f64,
    ops: Vec<Arc<dyn GeometricOp>>,
    mode: AugmentMode,
    rng: ChaCha8Rng,
}

impl std::fmt::Debug for Augment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Augment")
            .field("ratio", &self.ratio)
            .field("ops", &self.ops)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Augment {
    /// `ratio` 需在 `[0, 1]` 内, `ops` 不能为空, 否则返回 [`PrepError::InvalidConfig`].
    /// `seed` 为 `None` 时从系统熵源取种子.
    pub fn new(
        ratio: f64,
        ops: Vec<Arc<dyn GeometricOp>>,
        mode: AugmentMode,
        seed: Option<u64>,
    ) -> PrepResult<Self> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(PrepError::InvalidConfig(format!(
                "增强比例应在 [0, 1] 内, 实际为 {ratio}"
            )));
        }
        if ops.is_empty() {
            return Err(PrepError::InvalidConfig("增强操作列表为空".into()));
        }
        Ok(Self {
            ratio,
            ops,
            mode,
            rng: get_rng(seed),
        })
    }

    /// 默认比例 [`AUGMENT_RATIO`], [`AugmentMode::Chain`].
    pub fn with_ops(ops: Vec<Arc<dyn GeometricOp>>, seed: Option<u64>) -> PrepResult<Self> {
        Self::new(AUGMENT_RATIO, ops, AugmentMode::Chain, seed)
    }

    /// 对 `z` 个切片, 会被选中的切片个数.
    #[inline]
    pub fn picked(&self, z: usize) -> usize {
        ((self.ratio * z as f64).round() as usize).min(z)
    }

    /// 增强单个样本.
    pub fn augment(&mut self, sample: Sample) -> PrepResult<Sample> {
        let (id, x, labels) = sample.into_parts();
        let y = match labels {
            Labels::Codes(y) => y,
            Labels::OneHot(_) => {
                return Err(PrepError::InvalidConfig(
                    "增强阶段必须在 one-hot 编码之前运行".into(),
                ))
            }
        };
        let (c, z, _, _) = x.dim();
        let k = self.picked(z);
        if k == 0 {
            return Sample::new(id, x, Labels::Codes(y));
        }
        let mut picked = index::sample(&mut self.rng, z, k).into_vec();
        picked.sort_unstable();

        let mut new_x = Vec::new();
        let mut new_y = Vec::new();
        for &i in &picked {
            let combined = stack(&x, &y, i);
            let derived = match self.mode {
                AugmentMode::Chain => {
                    let rng = &mut self.rng;
                    vec![self
                        .ops
                        .iter()
                        .fold(combined, |acc, op| op.apply(acc, &mut *rng))]
                }
                AugmentMode::EachOp => self
                    .ops
                    .iter()
                    .map(|op| op.apply(combined.clone(), &mut self.rng))
                    .collect(),
            };
            for d in derived {
                if d.dim() != combined_dim(c, &y) {
                    return Err(PrepError::shape(
                        "增强结果",
                        &[c + 1, y.dim().1, y.dim().2],
                        d.shape(),
                    ));
                }
                let (dx, dy) = d.view().split_at(Axis(0), c);
                new_x.push(dx.insert_axis(Axis(1)).to_owned());
                new_y.push(dy.mapv(|v| v.round().clamp(0.0, u8::MAX as f32) as u8));
            }
        }

        let x = concat(Axis(1), x, new_x)?;
        let y = concat(Axis(0), y, new_y)?;
        Sample::new(id, x, Labels::Codes(y))
    }
}

#[inline]
fn combined_dim(c: usize, y: &Array3<u8>) -> (usize, usize, usize) {
    let (_, h, w) = y.dim();
    (c + 1, h, w)
}

/// 将第 `i` 个切片的所有通道和标签拼成 `(C + 1, H, W)`.
fn stack(x: &Array4<f32>, y: &Array3<u8>, i: usize) -> Array3<f32> {
    let (c, _, h, w) = x.dim();
    let mut ans = Array3::<f32>::zeros((c + 1, h, w));
    ans.slice_mut(s![..c, .., ..]).assign(&x.index_axis(Axis(1), i));
    ans.slice_mut(s![c, .., ..])
        .assign(&y.index_axis(Axis(0), i).mapv(f32::from));
    ans
}

/// 沿 `axis` 将 `extra` 接在 `base` 之后.
fn concat<A: Clone, D: ndarray::RemoveAxis>(
    axis: Axis,
    base: ndarray::Array<A, D>,
    extra: Vec<ndarray::Array<A, D>>,
) -> PrepResult<ndarray::Array<A, D>> {
    if extra.is_empty() {
        return Ok(base);
    }
    let mut views = Vec::with_capacity(extra.len() + 1);
    views.push(base.view());
    views.extend(extra.iter().map(|a| a.view()));
    concatenate(axis, &views).map_err(|e| PrepError::InvalidConfig(format!("拼接增强切片失败: {e}")))
}

impl Stage for Augment {
    fn name(&self) -> &str {
        "augment"
    }

    fn apply(&mut self, sample: Sample) -> Emit {
        emit_one(self.augment(sample))
    }
}
