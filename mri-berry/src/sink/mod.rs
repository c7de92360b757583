//! 输出端. 管线产出的样本最终写入其中之一.

use log::info;

use crate::{PrepResult, Sample};

mod npz;
mod record;
mod store;

pub use npz::NpzSink;
pub use record::{read_records, Example, RecordSink};
pub use store::StoreSink;

/// 样本输出端.
pub trait Sink {
    /// 写入一个样本.
    fn write(&mut self, sample: &Sample) -> PrepResult<()>;

    /// 所有样本写入完毕后调用.
    fn finish(&mut self) -> PrepResult<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    #[inline]
    fn write(&mut self, sample: &Sample) -> PrepResult<()> {
        (**self).write(sample)
    }

    #[inline]
    fn finish(&mut self) -> PrepResult<()> {
        (**self).finish()
    }
}

/// 将 `samples` 逐个写入 `sink` 并调用 [`Sink::finish`], 返回写入的样本数.
///
/// 遇到第一个错误即停止.
pub fn drain<I, S>(samples: I, sink: &mut S) -> PrepResult<usize>
where
    I: IntoIterator<Item = PrepResult<Sample>>,
    S: Sink + ?Sized,
{
    let mut n = 0;
    for sample in samples {
        sink.write(&sample?)?;
        n += 1;
    }
    sink.finish()?;
    info!("Wrote {n} samples");
    Ok(n)
}
