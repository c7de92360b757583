//! 训练/验证/测试集划分.

use std::fs;
use std::path::Path;

use itertools::Itertools;
use log::info;

use super::list_dirs;
use crate::consts::{CASE_GROUPS, SPLIT_NAMES};
use crate::{PrepError, PrepResult};

/// 按百分比 `percents` 将长度为 `len` 的序列切分为连续区间.
///
/// 切分点为累积百分比乘以 `len` 后四舍五入, 因此区间总长恰为 `len`.
/// `percents` 之和必须为 100, 否则返回 [`PrepError::InvalidConfig`].
pub fn partition(len: usize, percents: &[u32]) -> PrepResult<Vec<std::ops::Range<usize>>> {
    let total: u32 = percents.iter().sum();
    if total != 100 {
        return Err(PrepError::InvalidConfig(format!(
            "划分百分比之和应为 100, 实际为 {total}"
        )));
    }
    let mut acc = 0u32;
    let mut cuts = vec![0usize];
    for p in &percents[..percents.len().saturating_sub(1)] {
        acc += p;
        cuts.push((acc as f64 / 100.0 * len as f64).round() as usize);
    }
    cuts.push(len);
    Ok(cuts.into_iter().tuple_windows().map(|(a, b)| a..b).collect())
}

/// 将 `root/HGG/*` 与 `root/LGG/*` 下的病例目录按 `percents` 移动到
/// `root/{training, validation, testing}` 下.
///
/// 每个分组独立划分, 以保持各划分中分组比例一致. 若 `root/training`
/// 已存在, 则认为已经划分过, 直接返回 `Ok(false)`; 完成划分时返回 `Ok(true)`.
pub fn organize<P: AsRef<Path>>(root: P, percents: &[u32; 3]) -> PrepResult<bool> {
    let root = root.as_ref();
    if root.join(SPLIT_NAMES[0]).is_dir() {
        info!("Skipping dataset splitting as it has already been done.");
        return Ok(false);
    }
    for name in SPLIT_NAMES {
        let dir = root.join(name);
        fs::create_dir_all(&dir).map_err(PrepError::io(&dir))?;
    }
    for group in CASE_GROUPS {
        let group_dir = root.join(group);
        if !group_dir.is_dir() {
            continue;
        }
        let cases = list_dirs(&group_dir)?;
        for (range, split) in partition(cases.len(), percents)?.into_iter().zip(SPLIT_NAMES) {
            for case in &cases[range] {
                let Some(name) = case.file_name() else {
                    continue;
                };
                let dst = root.join(split).join(name);
                fs::rename(case, &dst).map_err(PrepError::io(case))?;
            }
        }
        fs::remove_dir_all(&group_dir).map_err(PrepError::io(&group_dir))?;
    }
    info!("Dataset reorganized under {}", root.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition() {
        assert_eq!(partition(10, &[70, 20, 10]).unwrap(), [0..7, 7..9, 9..10]);
        assert_eq!(partition(3, &[70, 20, 10]).unwrap(), [0..2, 2..3, 3..3]);
        assert_eq!(partition(0, &[70, 20, 10]).unwrap(), [0..0, 0..0, 0..0]);
        assert!(partition(10, &[70, 20]).is_err());
    }

    #[test]
    fn test_organize() {
        let root = tempfile::tempdir().unwrap();
        for i in 0..10 {
            fs::create_dir_all(root.path().join("HGG").join(format!("h{i}"))).unwrap();
        }
        for i in 0..3 {
            fs::create_dir_all(root.path().join("LGG").join(format!("l{i}"))).unwrap();
        }

        assert!(organize(root.path(), &[70, 20, 10]).unwrap());
        let count = |s: &str| fs::read_dir(root.path().join(s)).unwrap().count();
        assert_eq!(count("training"), 7 + 2);
        assert_eq!(count("validation"), 2 + 1);
        assert_eq!(count("testing"), 1);
        assert!(!root.path().join("HGG").exists());

        // 第二次调用不做任何事.
        assert!(!organize(root.path(), &[70, 20, 10]).unwrap());
    }
}
