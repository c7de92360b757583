//! 变换阶段.
//!
//! 每个阶段按值消费一个 [`Sample`], 惰性地产出零个或多个新样本.
//! 产出的序列是有限、不可重启的; 管线每次只从中拉取一个样本.

use crate::{PrepResult, Sample};

mod augment;
mod crop;
mod load;
mod normalize;
pub mod ops;

pub use augment::{Augment, AugmentMode};
pub use crop::Crop;
pub use load::{LabelRule, Loader};
pub use normalize::{one_hot, ChannelStats, Normalize, Policy, Scope, StatsAccumulator};

/// 阶段产出的惰性样本序列.
pub type Emit = Box<dyn Iterator<Item = PrepResult<Sample>>>;

/// 变换阶段.
pub trait Stage {
    /// 阶段名称, 用于日志.
    fn name(&self) -> &str;

    /// 消费 `sample`, 产出零个或多个样本.
    fn apply(&mut self, sample: Sample) -> Emit;
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    #[inline]
    fn name(&self) -> &str {
        (**self).name()
    }

    #[inline]
    fn apply(&mut self, sample: Sample) -> Emit {
        (**self).apply(sample)
    }
}

/// 产出恰好一个结果.
#[inline]
pub(crate) fn emit_one(r: PrepResult<Sample>) -> Emit {
    Box::new(std::iter::once(r))
}

/// 由闭包构造的阶段. 闭包返回的任意可迭代对象都会被惰性地产出.
pub struct FnStage<F> {
    name: String,
    f: F,
}

/// 由闭包 `f` 构造名为 `name` 的阶段.
///
/// ```
/// use mri_berry::stage::{from_fn, Stage};
///
/// // 丢弃切片数少于 4 的样本.
/// let stage = from_fn("min-slices", |s: mri_berry::Sample| {
///     (s.len_z() >= 4).then_some(Ok(s))
/// });
/// assert_eq!(stage.name(), "min-slices");
/// ```
pub fn from_fn<F, I>(name: &str, f: F) -> FnStage<F>
where
    F: FnMut(Sample) -> I,
    I: IntoIterator<Item = PrepResult<Sample>>,
    I::IntoIter: 'static,
{
    FnStage {
        name: name.to_owned(),
        f,
    }
}

impl<F, I> Stage for FnStage<F>
where
    F: FnMut(Sample) -> I,
    I: IntoIterator<Item = PrepResult<Sample>>,
    I::IntoIter: 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, sample: Sample) -> Emit {
        Box::new((self.f)(sample).into_iter())
    }
}
