//! 加载阶段: 病例目录 -> 过滤空切片后的样本.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::reader::VolumeReader;
use crate::{Case, PrepError, PrepResult, Sample};

/// 在病例目录的文件中确定标签文件的规则.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LabelRule {
    /// 按路径排序后的最后一个文件是标签. BraTS 的 `*.OT.*` 目录恰好排在最后.
    #[default]
    Last,

    /// 文件名包含给定子串的 **唯一** 文件是标签.
    Marker(String),
}

/// 病例加载器.
///
/// 递归收集病例目录下 `reader` 能处理的所有文件, 按路径升序排列,
/// 依 [`LabelRule`] 分出通道文件与标签文件, 解码、组装并过滤空切片.
#[derive(Debug, Clone)]
pub struct Loader<R> {
    reader: R,
    rule: LabelRule,
}

impl<R: VolumeReader> Loader<R> {
    /// 使用默认标签规则 [`LabelRule::Last`].
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            rule: LabelRule::Last,
        }
    }

    /// 指定标签规则.
    pub fn with_rule(mut self, rule: LabelRule) -> Self {
        self.rule = rule;
        self
    }

    /// 底层读取器.
    #[inline]
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// 枚举病例目录 `dir`, 返回 (通道文件, 标签文件).
    ///
    /// 可读文件少于两个, 或标签文件无法唯一确定时, 返回 [`PrepError::Decode`].
    pub fn files(&self, dir: &Path) -> PrepResult<(Vec<PathBuf>, PathBuf)> {
        let mut files = Vec::new();
        collect_files(&self.reader, dir, &mut files)?;
        files.sort();
        if files.len() < 2 {
            return Err(PrepError::decode(
                dir,
                format!("至少需要一个通道文件和一个标签文件, 实际找到 {} 个", files.len()),
            ));
        }

        let label_at = match &self.rule {
            LabelRule::Last => files.len() - 1,
            LabelRule::Marker(m) => {
                let hits: Vec<usize> = files
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| {
                        f.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.contains(m.as_str()))
                    })
                    .map(|(i, _)| i)
                    .collect();
                match hits[..] {
                    [i] => i,
                    _ => {
                        return Err(PrepError::decode(
                            dir,
                            format!("文件名包含 `{m}` 的标签文件应恰有 1 个, 实际 {} 个", hits.len()),
                        ))
                    }
                }
            }
        };
        let label = files.remove(label_at);
        Ok((files, label))
    }

    /// 读取病例目录 `dir`, 不做切片过滤.
    pub fn load_case(&self, dir: &Path) -> PrepResult<Case> {
        let (channel_files, label_file) = self.files(dir)?;
        let channels = channel_files
            .iter()
            .map(|f| self.reader.read_scan(f))
            .collect::<PrepResult<Vec<_>>>()?;
        let label = self.reader.read_label(&label_file)?;
        Case::new(dir, channels, label)
    }

    /// 读取病例目录 `dir` 并丢弃标签全为背景的切片.
    pub fn load(&self, dir: &Path) -> PrepResult<Sample> {
        let case = self.load_case(dir)?;
        let before = case.len_z();
        let case = case.non_empty();
        debug!(
            "Loaded {} ({} channels, {} -> {} slices)",
            dir.display(),
            case.channel_len(),
            before,
            case.len_z()
        );
        Ok(case.into_sample())
    }
}

/// 递归收集 `dir` 下 `reader` 能处理的文件.
fn collect_files<R: VolumeReader>(reader: &R, dir: &Path, out: &mut Vec<PathBuf>) -> PrepResult<()> {
    for entry in fs::read_dir(dir).map_err(PrepError::io(dir))? {
        let path = entry.map_err(PrepError::io(dir))?.path();
        if path.is_dir() {
            collect_files(reader, &path, out)?;
        } else if reader.accepts(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::NpyReader;
    use ndarray::Array3;
    use ndarray_npy::write_npy;

    /// 写入一个 2 通道病例, 切片 0 与 2 的标签为空.
    fn write_case(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        let label = Array3::<u8>::from_shape_fn((4, 3, 3), |(z, _, _)| {
            if z == 0 || z == 2 {
                0
            } else {
                2
            }
        });
        let c0 = Array3::<f32>::from_shape_fn((4, 3, 3), |(z, _, _)| z as f32);
        let c1 = Array3::<f32>::from_shape_fn((4, 3, 3), |(z, _, _)| 10.0 + z as f32);
        write_npy(dir.join("a_t1.npy"), &c0).unwrap();
        write_npy(dir.join("sub").join("b_t2.npy"), &c1).unwrap();
        write_npy(dir.join("z_seg.npy"), &label).unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();
    }

    #[test]
    fn test_files_and_load() {
        let root = tempfile::tempdir().unwrap();
        write_case(root.path());
        let loader = Loader::new(NpyReader);

        let (channels, label) = loader.files(root.path()).unwrap();
        assert_eq!(channels.len(), 2);
        assert!(label.ends_with("z_seg.npy"));

        let sample = loader.load(root.path()).unwrap();
        assert_eq!(sample.features().dim(), (2, 2, 3, 3));
        // 保留原始切片 1 和 3.
        assert_eq!(sample.features()[[0, 0, 0, 0]], 1.0);
        assert_eq!(sample.features()[[1, 1, 2, 2]], 13.0);
    }

    #[test]
    fn test_marker_rule() {
        let root = tempfile::tempdir().unwrap();
        write_case(root.path());
        let loader = Loader::new(NpyReader).with_rule(LabelRule::Marker("seg".into()));
        let (_, label) = loader.files(root.path()).unwrap();
        assert!(label.ends_with("z_seg.npy"));

        let loader = Loader::new(NpyReader).with_rule(LabelRule::Marker("nothing".into()));
        assert!(matches!(loader.files(root.path()), Err(PrepError::Decode { .. })));
    }

    #[test]
    fn test_shape_mismatch_and_decode_error() {
        let root = tempfile::tempdir().unwrap();
        write_npy(root.path().join("a.npy"), &Array3::<f32>::zeros((2, 3, 3))).unwrap();
        write_npy(root.path().join("b.npy"), &Array3::<u8>::ones((2, 4, 3))).unwrap();
        let loader = Loader::new(NpyReader);
        assert!(matches!(
            loader.load(root.path()),
            Err(PrepError::ShapeMismatch { .. })
        ));

        fs::write(root.path().join("0_broken.npy"), b"not numpy").unwrap();
        assert!(matches!(loader.load(root.path()), Err(PrepError::Decode { .. })));
    }
}
