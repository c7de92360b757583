//! 管线引擎.
//!
//! [`Pipeline`] 持有病例来源、加载器和有序的阶段列表. [`Pipeline::process`]
//! 返回惰性迭代器 [`Process`]: 每一级最多只保留一个尚未耗尽的产出序列,
//! 扩张型阶段 (如增强) 的产出按深度优先被拉取, 因此内存占用与划分规模无关.

use std::path::PathBuf;
use std::vec;

use log::{info, warn};

use crate::config::StageConfig;
use crate::dataset::CaseSource;
use crate::reader::VolumeReader;
use crate::stage::ops::OpRegistry;
use crate::stage::{ChannelStats, Emit, Loader, Stage};
use crate::{PrepError, PrepResult, Sample};

/// 预处理管线.
pub struct Pipeline<R> {
    source: Box<dyn CaseSource>,
    loader: Loader<R>,
    stages: Vec<Box<dyn Stage>>,
}

impl<R: VolumeReader> Pipeline<R> {
    /// 以 `source` 发现病例, 以 `loader` 加载病例. 初始不含任何阶段.
    pub fn new<S: CaseSource + 'static>(source: S, loader: Loader<R>) -> Self {
        Self {
            source: Box::new(source),
            loader,
            stages: Vec::new(),
        }
    }

    /// 加载器.
    #[inline]
    pub fn loader(&self) -> &Loader<R> {
        &self.loader
    }

    /// 在末尾追加阶段.
    pub fn add_operation<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// 在末尾追加已装箱的阶段.
    pub fn add_boxed(&mut self, stage: Box<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// 按配置追加阶段.
    ///
    /// 名称未知时记录警告并返回 `Ok(false)`, 管线保持不变.
    pub fn add_named(
        &mut self,
        spec: &StageConfig,
        registry: &OpRegistry,
        stats: Option<&ChannelStats>,
    ) -> PrepResult<bool> {
        match spec.build(registry, stats)? {
            Some(stage) => {
                self.add_boxed(stage);
                Ok(true)
            }
            None => {
                warn!("Unknown stage `{}` ignored", spec.name);
                Ok(false)
            }
        }
    }

    /// 所有阶段的名称, 按运行顺序.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 划分 `split` 中的病例个数.
    pub fn case_count(&self, split: &str) -> PrepResult<usize> {
        Ok(self.source.cases(split)?.len())
    }

    /// 惰性地处理划分 `split`.
    ///
    /// 病例列表在调用时确定. 默认遇到第一个错误时产出该错误并结束,
    /// 可用 [`Process::skip_errors`] 改为跳过出错的病例.
    pub fn process(&mut self, split: &str) -> PrepResult<Process<'_, R>> {
        let cases = self.source.cases(split)?;
        info!(
            "Processing split `{split}`: {} cases through [load, {}]",
            cases.len(),
            self.stage_names().join(", ")
        );
        Ok(Process {
            split: split.to_owned(),
            cases: cases.into_iter(),
            loader: &self.loader,
            stages: &mut self.stages,
            pending: Vec::new(),
            current: None,
            skip_errors: false,
            skipped: 0,
            dropped: 0,
            loaded: 0,
            done: false,
        })
    }
}

/// 处理单个划分的惰性迭代器.
pub struct Process<'a, R> {
    split: String,
    cases: vec::IntoIter<PathBuf>,
    loader: &'a Loader<R>,
    stages: &'a mut [Box<dyn Stage>],

    /// `pending[i]` 是第 `i` 个阶段尚未耗尽的产出.
    pending: Vec<Emit>,
    current: Option<PathBuf>,
    skip_errors: bool,
    skipped: usize,
    dropped: usize,
    loaded: usize,
    done: bool,
}

impl<'a, R: VolumeReader> Process<'a, R> {
    /// 跳过出错的病例 (记录警告) 而不是终止.
    pub fn skip_errors(mut self) -> Self {
        self.skip_errors = true;
        self
    }

    /// 已跳过的病例个数.
    #[inline]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// 因标签全为背景而被丢弃的病例个数.
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// 划分名称.
    #[inline]
    pub fn split(&self) -> &str {
        &self.split
    }

    /// 出错时: 跳过则返回 `None`, 否则结束迭代并返回该错误.
    fn on_error(&mut self, e: PrepError) -> Option<PrepResult<Sample>> {
        self.pending.clear();
        let case = self.current.take().unwrap_or_default();
        if self.skip_errors {
            warn!("Skipping case {}: {e}", case.display());
            self.skipped += 1;
            None
        } else {
            self.done = true;
            Some(Err(e))
        }
    }
}

impl<'a, R: VolumeReader> Iterator for Process<'a, R> {
    type Item = PrepResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let depth = self.pending.len();
            if let Some(item) = self.pending.last_mut().map(Iterator::next) {
                match item {
                    None => {
                        self.pending.pop();
                    }
                    Some(Err(e)) => {
                        if let Some(r) = self.on_error(e) {
                            return Some(r);
                        }
                    }
                    Some(Ok(s)) if depth == self.stages.len() => return Some(Ok(s)),
                    Some(Ok(s)) => {
                        let emit = self.stages[depth].apply(s);
                        self.pending.push(emit);
                    }
                }
                continue;
            }

            let Some(dir) = self.cases.next() else {
                info!(
                    "Finished split `{}`: {} cases loaded, {} skipped, {} dropped",
                    self.split, self.loaded, self.skipped, self.dropped
                );
                self.done = true;
                return None;
            };
            self.current = Some(dir.clone());
            match self.loader.load(&dir) {
                Ok(s) if s.len_z() == 0 => {
                    info!("Case {} has no labelled slice, dropped", dir.display());
                    self.dropped += 1;
                }
                Ok(s) => {
                    self.loaded += 1;
                    if self.stages.is_empty() {
                        return Some(Ok(s));
                    }
                    let emit = self.stages[0].apply(s);
                    self.pending.push(emit);
                }
                Err(e) => {
                    if let Some(r) = self.on_error(e) {
                        return Some(r);
                    }
                }
            }
        }
    }
}
