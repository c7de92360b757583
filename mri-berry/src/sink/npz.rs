use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use ndarray_npy::NpzWriter;

use super::Sink;
use crate::{Labels, PrepError, PrepResult, Sample};

/// 每个样本写为一个 `{prefix}_case_{idx}.npz`, 含数组 `x` `(C, z, H, W)` 与 `y`.
#[derive(Debug, Clone)]
pub struct NpzSink {
    dir: PathBuf,
    prefix: String,
    next: usize,
}

impl NpzSink {
    /// 输出到目录 `dir` (不存在时创建).
    pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> PrepResult<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir).map_err(PrepError::io(&dir))?;
        Ok(Self {
            dir,
            prefix: prefix.to_owned(),
            next: 0,
        })
    }

    /// 下一个样本的输出路径.
    pub fn next_path(&self) -> PathBuf {
        self.dir.join(format!("{}_case_{}.npz", self.prefix, self.next))
    }
}

impl Sink for NpzSink {
    fn write(&mut self, sample: &Sample) -> PrepResult<()> {
        let path = self.next_path();
        let file = File::create(&path).map_err(PrepError::io(&path))?;
        let to_io = |e: ndarray_npy::WriteNpzError| PrepError::Io {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::Other, e),
        };
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array("x", sample.features()).map_err(to_io)?;
        let added = match sample.labels() {
            Labels::Codes(y) => npz.add_array("y", y),
            Labels::OneHot(y) => npz.add_array("y", y),
        };
        added.map_err(to_io)?;
        npz.finish().map_err(to_io)?;
        self.next += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};
    use ndarray_npy::NpzReader;

    #[test]
    fn test_one_file_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = NpzSink::new(dir.path().join("training"), "training").unwrap();
        let x = Array4::from_shape_fn((2, 3, 2, 2), |(c, z, _, _)| (c * 10 + z) as f32);
        let y = Array3::from_elem((3, 2, 2), 4u8);
        let sample = Sample::new("a", x.clone(), Labels::Codes(y.clone())).unwrap();
        sink.write(&sample).unwrap();
        sink.write(&sample).unwrap();

        let second = dir.path().join("training").join("training_case_1.npz");
        let mut npz = NpzReader::new(File::open(second).unwrap()).unwrap();
        let back_x: Array4<f32> = npz.by_name("x.npy").unwrap();
        let back_y: Array3<u8> = npz.by_name("y.npy").unwrap();
        assert_eq!(back_x, x);
        assert_eq!(back_y, y);
        assert!(!sink.next_path().exists());
    }
}
