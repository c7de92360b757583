//! 数据集操作: 目录定位、病例发现与划分.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{PrepError, PrepResult};

pub mod split;

pub use split::{organize, partition};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 获取 BraTS 数据集基本路径.
///
/// 1. 若环境变量 `$BRATS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brats`. 无法确定主目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("BRATS_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["brats"]),
    }
}

/// 检查 `root` 之下第 `depth` 层目录中是否存在扩展名为 `ext` 的文件.
///
/// `depth == 0` 表示 `root` 自身. 用于在处理前快速确认数据路径.
pub fn check_data_dir<P: AsRef<Path>>(root: P, ext: &str, depth: usize) -> bool {
    let Ok(entries) = fs::read_dir(root.as_ref()) else {
        return false;
    };
    entries.filter_map(Result::ok).any(|e| {
        let path = e.path();
        if depth == 0 {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(ext))
        } else {
            path.is_dir() && check_data_dir(&path, ext, depth - 1)
        }
    })
}

/// 病例发现. 给定划分名称, 返回有序的病例目录列表.
pub trait CaseSource {
    /// 列出划分 `split` 下的所有病例目录.
    fn cases(&self, split: &str) -> PrepResult<Vec<PathBuf>>;
}

impl<F> CaseSource for F
where
    F: Fn(&str) -> PrepResult<Vec<PathBuf>>,
{
    #[inline]
    fn cases(&self, split: &str) -> PrepResult<Vec<PathBuf>> {
        self(split)
    }
}

/// 按目录组织的数据集: `root/{split}/{case}/...`.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    /// 以 `root` 为数据集根目录.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    /// 数据集根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CaseSource for DirSource {
    /// 按名称升序列出 `root/{split}` 下的所有子目录.
    fn cases(&self, split: &str) -> PrepResult<Vec<PathBuf>> {
        let dir = self.root.join(split);
        list_dirs(&dir)
    }
}

/// 按名称升序列出 `dir` 下的所有子目录.
pub(crate) fn list_dirs(dir: &Path) -> PrepResult<Vec<PathBuf>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir).map_err(PrepError::io(dir))? {
        let path = entry.map_err(PrepError::io(dir))?.path();
        if path.is_dir() {
            ans.push(path);
        }
    }
    ans.sort();
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_source_sorted() {
        let root = tempfile::tempdir().unwrap();
        for name in ["case_b", "case_a", "case_c"] {
            fs::create_dir_all(root.path().join("training").join(name)).unwrap();
        }
        fs::write(root.path().join("training").join("README"), b"x").unwrap();

        let source = DirSource::new(root.path());
        let cases = source.cases("training").unwrap();
        let names: Vec<_> = cases
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["case_a", "case_b", "case_c"]);
        assert!(matches!(source.cases("testing"), Err(PrepError::Io { .. })));
    }

    #[test]
    fn test_check_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let deep = root.path().join("HGG").join("case_0");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("t1.nii"), b"").unwrap();

        assert!(check_data_dir(root.path(), ".nii", 2));
        assert!(!check_data_dir(root.path(), ".nii", 1));
        assert!(!check_data_dir(root.path(), ".mha", 2));
    }

    #[test]
    fn test_closure_source() {
        let source = |split: &str| -> PrepResult<Vec<PathBuf>> { Ok(vec![PathBuf::from(split)]) };
        assert_eq!(source.cases("x").unwrap(), [PathBuf::from("x")]);
    }
}
