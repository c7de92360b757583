//! 逐划分运行管线并写入输出端.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use mri_berry::config::CropParams;
use mri_berry::dataset::check_data_dir;
use mri_berry::prelude::*;
use mri_berry::sink;

use crate::result::{PrepReport, SplitReport};

/// 运行参数.
#[derive(Debug)]
pub struct Options {
    pub data: PathBuf,
    pub out: PathBuf,
    pub config: PrepConfig,
    pub organize: bool,
    pub skip_errors: bool,
}

/// 划分 `split` 的输出端.
fn make_sink(cfg: &PrepConfig, out: &Path, split: &str) -> Result<Box<dyn Sink>> {
    Ok(match cfg.sink {
        SinkKind::Store => Box::new(StoreSink::deferred(
            out.join(format!("{split}.mrs")),
            cfg.x_dtype,
            cfg.y_dtype,
            cfg.chunk_len,
        )),
        SinkKind::Npz => Box::new(NpzSink::new(out.join(split), split)?),
        SinkKind::Record => Box::new(RecordSink::new(out.join(split), split)?),
    })
}

/// 在第一个划分上统计全局通道量. 只运行第一个 `normalize` 之前的阶段.
fn global_stats<R>(opts: &Options, loader: Loader<R>, registry: &OpRegistry) -> Result<ChannelStats>
where
    R: VolumeReader,
{
    let cfg = &opts.config;
    let Some(split) = cfg.splits.first() else {
        bail!("no split configured");
    };
    let mut pipeline = Pipeline::new(DirSource::new(&opts.data), loader);
    for stage in cfg.stages.iter().take_while(|s| s.name != "normalize") {
        pipeline.add_named(stage, registry, None)?;
    }
    info!("Computing channel statistics over split `{split}`");
    let stats = ChannelStats::accumulate(pipeline.process(split)?)
        .with_context(|| format!("failed to compute statistics over `{split}`"))?;
    info!("Channel max: {:?}", stats.max);
    info!("Channel mean: {:?}", stats.mean);
    info!("Channel std: {:?}", stats.std);
    Ok(stats)
}

/// 第一个病例目录, 即 `data/{分组或划分}/{病例}` 按名称排序后的第一个.
fn first_case(data: &Path) -> Result<Option<PathBuf>> {
    let mut groups: Vec<PathBuf> = fs::read_dir(data)
        .with_context(|| format!("cannot read {}", data.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    groups.sort();
    let source = DirSource::new(data);
    for group in groups {
        let Some(name) = group.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(case) = source.cases(name)?.into_iter().next() {
            return Ok(Some(case));
        }
    }
    Ok(None)
}

/// 用第一个病例的切片尺寸检查第一个裁剪阶段的边界.
fn check_crop<R: VolumeReader>(opts: &Options, loader: &Loader<R>) -> Result<()> {
    let Some(stage) = opts.config.stages.iter().find(|s| s.name == "crop") else {
        return Ok(());
    };
    let p: CropParams = stage.params()?;
    let crop = Crop::new(p.low, p.high)?;
    let Some(case) = first_case(&opts.data)? else {
        return Ok(());
    };
    let shape = loader.load_case(&case)?.slice_shape();
    crop.check(shape)
        .with_context(|| format!("crop bounds do not fit case {}", case.display()))?;
    Ok(())
}

/// 运行全部划分.
pub fn run<R>(opts: Options, reader: R, exts: &[&str]) -> Result<PrepReport>
where
    R: VolumeReader + Clone,
{
    let cfg = &opts.config;
    if !opts.data.is_dir() {
        bail!("dataset directory {} does not exist", opts.data.display());
    }
    // 病例目录下直接是体数据, 或再隔一层 (BraTS 2015 的 `.mha` 子目录).
    let found = (2..=3).any(|depth| exts.iter().any(|e| check_data_dir(&opts.data, e, depth)));
    if !found {
        bail!("no {exts:?} file found under {}", opts.data.display());
    }
    let loader = Loader::new(reader).with_rule(cfg.label_rule());
    check_crop(&opts, &loader)?;
    if opts.organize {
        dataset::organize(&opts.data, &cfg.split_percents)?;
    }
    fs::create_dir_all(&opts.out)
        .with_context(|| format!("cannot create {}", opts.out.display()))?;

    let registry = OpRegistry::builtin();
    let stats = if cfg.needs_stats() {
        Some(global_stats(&opts, loader.clone(), &registry)?)
    } else {
        None
    };

    let mut pipeline = Pipeline::new(DirSource::new(&opts.data), loader);
    for stage in &cfg.stages {
        pipeline.add_named(stage, &registry, stats.as_ref())?;
    }

    let mut report = PrepReport::default();
    for split in &cfg.splits {
        let cases = match pipeline.case_count(split) {
            Ok(n) => n,
            Err(e) => {
                warn!("Split `{split}` skipped: {e}");
                continue;
            }
        };
        let start = Instant::now();
        let mut sink = make_sink(cfg, &opts.out, split)?;
        let mut process = pipeline.process(split)?;
        if opts.skip_errors {
            process = process.skip_errors();
        }
        let mut slices = 0;
        let samples = sink::drain(
            process.by_ref().inspect(|r| {
                if let Ok(s) = r {
                    slices += s.len_z();
                }
            }),
            &mut sink,
        )
        .with_context(|| format!("failed to process split `{split}`"))?;
        report.push(SplitReport {
            name: split.clone(),
            cases,
            samples,
            slices,
            skipped: process.skipped(),
            dropped: process.dropped(),
            elapsed: start.elapsed(),
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use ndarray_npy::write_npy;

    fn write_group(root: &Path, n: usize) {
        for i in 0..n {
            let dir = root.join("HGG").join(format!("case_{i}"));
            fs::create_dir_all(&dir).unwrap();
            for name in ["flair", "t1"] {
                let scan = Array3::from_shape_fn((3, 8, 8), |(z, h, w)| (z * 64 + h * 8 + w) as f32);
                write_npy(dir.join(format!("{name}.npy")), &scan).unwrap();
            }
            let label = Array3::from_shape_fn((3, 8, 8), |(z, h, _)| u8::from(z > 0 && h > 3));
            write_npy(dir.join("z_seg.npy"), &label).unwrap();
        }
    }

    #[test]
    fn test_run_organizes_and_writes_every_split() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("brats");
        write_group(&data, 4);
        let config: PrepConfig = serde_json::from_str(
            r#"{
                "stages": [
                    { "name": "crop", "params": { "low": 2, "high": 6 } },
                    { "name": "normalize", "params": { "policy": { "kind": "z_score" }, "scope": "global" } }
                ],
                "sink": "record"
            }"#,
        )
        .unwrap();
        let opts = Options {
            data: data.clone(),
            out: root.path().join("out"),
            config,
            organize: true,
            skip_errors: false,
        };
        let report = run(opts, NpyReader, &[".npy"]).unwrap();
        let counts: Vec<_> = report.splits().iter().map(|r| (r.cases, r.samples, r.slices)).collect();
        assert_eq!(counts, [(3, 3, 6), (1, 1, 2), (0, 0, 0)]);
        assert!(data.join("training").join("case_0").is_dir());
        let written = root.path().join("out").join("training").join("training_case_2.rec");
        assert_eq!(sink::read_records(written).unwrap().len(), 2);
    }

    #[test]
    fn test_bad_crop_fails_before_organize() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("brats");
        write_group(&data, 2);
        let config: PrepConfig = serde_json::from_str(
            r#"{ "stages": [{ "name": "crop", "params": { "low": 0, "high": 64 } }] }"#,
        )
        .unwrap();
        let out = root.path().join("out");
        let opts = Options {
            data: data.clone(),
            out: out.clone(),
            config,
            organize: true,
            skip_errors: false,
        };
        let err = run(opts, NpyReader, &[".npy"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::OutOfBounds { high: 64, .. })
        ));
        assert!(data.join("HGG").join("case_0").is_dir());
        assert!(!data.join("training").exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let opts = Options {
            data: root.path().join("nothing"),
            out: root.path().join("out"),
            config: PrepConfig::default(),
            organize: false,
            skip_errors: false,
        };
        assert!(run(opts, NpyReader, &[".npy"]).is_err());
    }
}
