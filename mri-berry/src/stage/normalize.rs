//! 归一化与标签编码阶段.

use ndarray::{Array4, ArrayView3, ArrayViewMut3, Axis};
use serde::{Deserialize, Serialize};

use super::{emit_one, Emit, Stage};
use crate::consts::{CLASS_DEPTH, MAX_SCALE_PEAK};
use crate::{Labels, PrepError, PrepResult, Sample};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 通道数值变换方式.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Policy {
    /// `x * peak / max`. 最大值不为正的通道保持不变.
    MaxScale {
        /// 目标峰值.
        peak: f32,
    },

    /// `(x - mean) / std`. 标准差为 0 的通道只做中心化.
    ZScore,
}

impl Default for Policy {
    fn default() -> Self {
        Self::MaxScale {
            peak: MAX_SCALE_PEAK,
        }
    }
}

/// 统计量的来源.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Scope {
    /// 由样本自身计算.
    #[default]
    PerSample,

    /// 使用预先在整个划分上统计的逐通道量.
    Global(ChannelStats),
}

/// 逐通道统计量.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// 最大值.
    pub max: Vec<f32>,

    /// 均值.
    pub mean: Vec<f32>,

    /// 总体标准差.
    pub std: Vec<f32>,
}

impl ChannelStats {
    /// 通道个数.
    #[inline]
    pub fn channel_len(&self) -> usize {
        self.max.len()
    }

    /// 三组统计量的通道个数须一致, 否则返回 [`PrepError::ShapeMismatch`].
    pub fn check(&self) -> PrepResult<()> {
        let c = self.channel_len();
        let found = [c, self.mean.len(), self.std.len()];
        if found.iter().any(|&n| n != c) {
            return Err(PrepError::shape("统计量 (max, mean, std) 的通道个数", &[c; 3], &found));
        }
        Ok(())
    }

    /// 单遍流式地统计 `samples` 的逐通道量. 遇到第一个错误即返回.
    pub fn accumulate<I>(samples: I) -> PrepResult<Self>
    where
        I: IntoIterator<Item = PrepResult<Sample>>,
    {
        let mut acc = StatsAccumulator::new();
        for s in samples {
            acc.push(&s?)?;
        }
        acc.finish()
    }
}

/// 单个通道的矩, 可用 Chan 等人的并行公式合并.
#[derive(Debug, Clone, Copy)]
struct Moments {
    count: u64,
    mean: f64,
    m2: f64,
    max: f32,
}

impl Moments {
    const EMPTY: Self = Self {
        count: 0,
        mean: 0.0,
        m2: 0.0,
        max: f32::NEG_INFINITY,
    };

    fn of(v: ArrayView3<f32>) -> Self {
        // Welford.
        v.iter().fold(Self::EMPTY, |mut m, &x| {
            m.count += 1;
            let d = x as f64 - m.mean;
            m.mean += d / m.count as f64;
            m.m2 += d * (x as f64 - m.mean);
            m.max = m.max.max(x);
            m
        })
    }

    fn merge(self, other: Self) -> Self {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let n = (self.count + other.count) as f64;
        let d = other.mean - self.mean;
        Self {
            count: self.count + other.count,
            mean: self.mean + d * other.count as f64 / n,
            m2: self.m2 + other.m2 + d * d * (self.count as f64 * other.count as f64) / n,
            max: self.max.max(other.max),
        }
    }

    #[inline]
    fn std(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

/// 求样本每个通道的矩.
fn channel_moments(x: &Array4<f32>) -> Vec<Moments> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            x.axis_iter(Axis(0)).into_par_iter().map(Moments::of).collect()
        } else {
            x.axis_iter(Axis(0)).map(Moments::of).collect()
        }
    }
}

/// 对每个通道实施 `op`.
fn for_each_channel<F>(x: &mut Array4<f32>, op: F)
where
    F: Fn(usize, ArrayViewMut3<f32>) + Sync + Send,
{
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            x.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(c, v)| op(c, v));
        } else {
            x.axis_iter_mut(Axis(0))
                .enumerate()
                .for_each(|(c, v)| op(c, v));
        }
    }
}

/// [`ChannelStats`] 的流式累加器.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    channels: Vec<Moments>,
}

impl StatsAccumulator {
    /// 空累加器.
    pub fn new() -> Self {
        Self::default()
    }

    /// 累加一个样本. 通道数与之前的样本不一致时返回 [`PrepError::ShapeMismatch`].
    pub fn push(&mut self, sample: &Sample) -> PrepResult<()> {
        let m = channel_moments(sample.features());
        if self.channels.is_empty() {
            self.channels = m;
            return Ok(());
        }
        if m.len() != self.channels.len() {
            return Err(PrepError::shape("通道个数", &[self.channels.len()], &[m.len()]));
        }
        for (a, b) in self.channels.iter_mut().zip(m) {
            *a = a.merge(b);
        }
        Ok(())
    }

    /// 得到统计量. 尚未累加任何体素时返回 [`PrepError::InvalidConfig`].
    pub fn finish(self) -> PrepResult<ChannelStats> {
        if self.channels.iter().all(|m| m.count == 0) {
            return Err(PrepError::InvalidConfig("没有可统计的样本".into()));
        }
        Ok(ChannelStats {
            max: self.channels.iter().map(|m| m.max).collect(),
            mean: self.channels.iter().map(|m| m.mean as f32).collect(),
            std: self.channels.iter().map(|m| m.std() as f32).collect(),
        })
    }
}

/// 将类别编码 `(z, H, W)` 转为 one-hot `(depth, z, H, W)`.
///
/// 任一值不小于 `depth` 时返回 [`PrepError::InvalidLabel`].
///
/// ```
/// use ndarray::Array3;
/// use mri_berry::stage::one_hot;
///
/// let codes = Array3::from_elem((1, 1, 1), 3u8);
/// let y = one_hot(codes.view(), 5).unwrap();
/// assert_eq!(y.iter().copied().collect::<Vec<_>>(), [0.0, 0.0, 0.0, 1.0, 0.0]);
/// assert!(one_hot(Array3::from_elem((1, 1, 1), 5u8).view(), 5).is_err());
/// ```
pub fn one_hot(codes: ArrayView3<u8>, depth: usize) -> PrepResult<Array4<f32>> {
    if let Some(&value) = codes.iter().find(|&&v| v as usize >= depth) {
        return Err(PrepError::InvalidLabel { value, depth });
    }
    let (z, h, w) = codes.dim();
    Ok(Array4::from_shape_fn((depth, z, h, w), |(k, z, h, w)| {
        if codes[(z, h, w)] as usize == k {
            1.0
        } else {
            0.0
        }
    }))
}

/// 归一化通道并 (可选地) 对标签做 one-hot 编码.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalize {
    policy: Policy,
    scope: Scope,
    depth: Option<usize>,
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            scope: Scope::PerSample,
            depth: Some(CLASS_DEPTH),
        }
    }
}

impl Normalize {
    /// `depth` 为 `None` 时保留类别编码.
    ///
    /// `depth == Some(0)` 或峰值不为正时返回 [`PrepError::InvalidConfig`];
    /// 全局统计量的通道个数不一致时返回 [`PrepError::ShapeMismatch`].
    pub fn new(policy: Policy, scope: Scope, depth: Option<usize>) -> PrepResult<Self> {
        if let Scope::Global(stats) = &scope {
            stats.check()?;
        }
        if depth == Some(0) {
            return Err(PrepError::InvalidConfig("one-hot 深度不能为 0".into()));
        }
        if let Policy::MaxScale { peak } = policy {
            if !(peak > 0.0) {
                return Err(PrepError::InvalidConfig(format!("峰值应为正, 实际为 {peak}")));
            }
        }
        Ok(Self {
            policy,
            scope,
            depth,
        })
    }

    /// 数值变换方式.
    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// 统计量来源.
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// one-hot 深度.
    #[inline]
    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    /// 归一化单个样本.
    pub fn normalize(&self, sample: Sample) -> PrepResult<Sample> {
        let (id, mut x, labels) = sample.into_parts();
        let c = x.len_of(Axis(0));

        // (scale, shift): x' = (x - shift) * scale
        let params: Vec<(f32, f32)> = match (&self.scope, self.policy) {
            (Scope::Global(s), _) if s.channel_len() != c => {
                return Err(PrepError::shape("全局统计量通道个数", &[s.channel_len()], &[c]));
            }
            (Scope::Global(s), Policy::MaxScale { peak }) => {
                s.max.iter().map(|&m| max_scale(m, peak)).collect()
            }
            (Scope::Global(s), Policy::ZScore) => s
                .mean
                .iter()
                .zip(&s.std)
                .map(|(&m, &d)| z_score(m as f64, d as f64))
                .collect(),
            (Scope::PerSample, Policy::MaxScale { peak }) => channel_moments(&x)
                .iter()
                .map(|m| max_scale(m.max, peak))
                .collect(),
            (Scope::PerSample, Policy::ZScore) => channel_moments(&x)
                .iter()
                .map(|m| z_score(m.mean, m.std()))
                .collect(),
        };
        for_each_channel(&mut x, |i, mut v| {
            let (scale, shift) = params[i];
            v.mapv_inplace(|p| (p - shift) * scale);
        });

        let labels = match (self.depth, labels) {
            (None, labels) => labels,
            (Some(depth), Labels::Codes(y)) => Labels::OneHot(one_hot(y.view(), depth)?),
            (Some(_), Labels::OneHot(_)) => {
                return Err(PrepError::InvalidConfig("标签已是 one-hot 编码".into()))
            }
        };
        Sample::new(id, x, labels)
    }
}

#[inline]
fn max_scale(max: f32, peak: f32) -> (f32, f32) {
    if max > 0.0 {
        (peak / max, 0.0)
    } else {
        (1.0, 0.0)
    }
}

#[inline]
fn z_score(mean: f64, std: f64) -> (f32, f32) {
    let scale = if std > 0.0 { 1.0 / std } else { 1.0 };
    (scale as f32, mean as f32)
}

impl Stage for Normalize {
    fn name(&self) -> &str {
        "normalize"
    }

    fn apply(&mut self, sample: Sample) -> Emit {
        emit_one(self.normalize(sample))
    }
}
