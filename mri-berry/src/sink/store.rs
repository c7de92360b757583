use std::fmt::Display;
use std::path::{Path, PathBuf};

use either::Either;
use log::warn;
use ndarray::{Array, ArrayView, Dimension};
use num::{NumCast, ToPrimitive};

use super::Sink;
use crate::consts::{FEATURES, LABELS};
use crate::store::{with_dtype, ChunkedStore, DType, DatasetSpec, Element};
use crate::{PrepError, PrepResult, Sample};

/// 写入 [`ChunkedStore`] 的输出端. 每个切片对应 `X` 与 `Y` 中各一条记录.
///
/// 数值按数据集声明的元素类型转换; 无法表示的值 (例如向整数类型写入 NaN)
/// 会返回 [`PrepError::InvalidConfig`].
#[derive(Debug)]
pub struct StoreSink {
    path: PathBuf,
    dtypes: (DType, DType),
    chunk_len: usize,
    store: Option<ChunkedStore>,
}

impl StoreSink {
    /// 包装已创建的存储. 存储中必须有名为 `X` 与 `Y` 的数据集.
    pub fn new(store: ChunkedStore) -> PrepResult<Self> {
        let dtypes = (store.spec(FEATURES)?.dtype, store.spec(LABELS)?.dtype);
        Ok(Self {
            path: store.path().to_owned(),
            dtypes,
            chunk_len: store.chunk_len(),
            store: Some(store),
        })
    }

    /// 在写入第一个样本时才创建存储, 记录形状取自该样本.
    pub fn deferred<P: AsRef<Path>>(path: P, x: DType, y: DType, chunk_len: usize) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            dtypes: (x, y),
            chunk_len,
            store: None,
        }
    }

    /// 底层存储. 延迟创建且尚未写入时为 `None`.
    #[inline]
    pub fn store(&self) -> Option<&ChunkedStore> {
        self.store.as_ref()
    }

    /// 消费自我, 获得底层存储.
    #[inline]
    pub fn into_inner(self) -> Option<ChunkedStore> {
        self.store
    }

    fn store_for(&mut self, sample: &Sample) -> PrepResult<&mut ChunkedStore> {
        if self.store.is_none() {
            let (h, w) = sample.slice_shape();
            let specs = vec![
                DatasetSpec::features(vec![sample.channel_len(), h, w], self.dtypes.0),
                DatasetSpec::labels(sample.labels().record_shape(), self.dtypes.1),
            ];
            self.store = Some(ChunkedStore::create(&self.path, specs, self.chunk_len)?);
        }
        match self.store.as_mut() {
            Some(s) => Ok(s),
            None => Err(PrepError::InvalidConfig("存储未创建".into())),
        }
    }
}

impl Sink for StoreSink {
    fn write(&mut self, sample: &Sample) -> PrepResult<()> {
        let (xt, yt) = self.dtypes;
        let store = self.store_for(sample)?;
        for (x, y) in sample.records() {
            append_cast(store, FEATURES, xt, x)?;
            match y {
                Either::Left(codes) => append_cast(store, LABELS, yt, codes)?,
                Either::Right(one_hot) => append_cast(store, LABELS, yt, one_hot)?,
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> PrepResult<()> {
        match &self.store {
            Some(s) if !s.is_aligned() => Err(PrepError::CorruptStore {
                path: self.path.clone(),
                reason: "数据集长度不一致".into(),
            }),
            Some(_) => Ok(()),
            None => {
                warn!("No samples written; {} was not created", self.path.display());
                Ok(())
            }
        }
    }
}

/// 将 `record` 转换为 `dtype` 后追加.
fn append_cast<A, D>(
    store: &mut ChunkedStore,
    name: &str,
    dtype: DType,
    record: ArrayView<'_, A, D>,
) -> PrepResult<()>
where
    A: Copy + ToPrimitive + Display,
    D: Dimension,
{
    with_dtype!(dtype, T => {
        let cast = cast::<A, T, D>(name, record)?;
        store.append(name, cast.view())
    })
}

fn cast<A, T, D>(name: &str, record: ArrayView<'_, A, D>) -> PrepResult<Array<T, D>>
where
    A: Copy + ToPrimitive + Display,
    T: Element,
    D: Dimension,
{
    let mut bad = None;
    let out = record.mapv(|v| match <T as NumCast>::from(v) {
        Some(t) => t,
        None => {
            bad.get_or_insert(v);
            T::default()
        }
    });
    match bad {
        None => Ok(out),
        Some(v) => Err(PrepError::InvalidConfig(format!(
            "数据集 `{name}` 的元素类型 {} 无法表示值 {v}",
            T::DTYPE
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreReader;
    use crate::Labels;
    use ndarray::{Array3, Array4};

    fn sample(z: usize) -> Sample {
        let x = Array4::from_shape_fn((2, z, 4, 4), |(c, z, h, w)| (c + z + h + w) as f32 * 1.5);
        let y = Array3::from_shape_fn((z, 4, 4), |(z, h, _)| ((z + h) % 5) as u8);
        Sample::new("s", x, Labels::Codes(y)).unwrap()
    }

    #[test]
    fn test_one_record_per_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mrs");
        let mut sink = StoreSink::deferred(&path, DType::F32, DType::I64, 2);
        sink.write(&sample(3)).unwrap();
        sink.write(&sample(2)).unwrap();
        sink.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.len("X").unwrap(), 5);
        assert_eq!(reader.spec("X").unwrap().shape, [2, 4, 4]);
        let y = reader.read::<i64>("Y", 4).unwrap();
        assert_eq!(y[[3, 0]], 4);
        let x = reader.read::<f32>("X", 1).unwrap();
        assert_eq!(x[[1, 2, 3]], (1 + 1 + 2 + 3) as f32 * 1.5);
    }

    #[test]
    fn test_unrepresentable_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.mrs");
        let specs = vec![
            DatasetSpec::of::<u8, _>("X", vec![2, 4, 4]),
            DatasetSpec::of::<u8, _>("Y", vec![4, 4]),
        ];
        let mut sink = StoreSink::new(ChunkedStore::create(&path, specs, 1).unwrap()).unwrap();
        let (id, mut x, y) = sample(1).into_parts();
        x[[0, 0, 0, 0]] = f32::NAN;
        let bad = Sample::new(id, x, y).unwrap();
        assert!(matches!(sink.write(&bad), Err(PrepError::InvalidConfig(_))));
        assert_eq!(sink.store().unwrap().len("X").unwrap(), 0);

        let empty = StoreSink::deferred(dir.path().join("never.mrs"), DType::F32, DType::U8, 1);
        assert!(empty.into_inner().is_none());
    }
}
