//! 逐切片的序列化记录文件.
//!
//! 文件由若干帧组成: `长度(u64) 校验(u32) 负载`, 负载为 bincode 编码的 [`Example`].

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use either::Either;
use flate2::Crc;
use serde::{Deserialize, Serialize};

use super::Sink;
use crate::{PrepError, PrepResult, Sample};

/// 单个切片的训练样例.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// `(C, H, W)` 特征的 `f32` 小端序字节.
    pub image: Vec<u8>,

    /// 展平的标签. one-hot 标签按 `(K, H, W)` 展平为 0/1.
    pub ground_truth: Vec<i64>,

    /// 特征形状 `(C, H, W)`.
    pub shape: Vec<usize>,
}

impl Example {
    /// 从特征字节中恢复 `f32` 值.
    pub fn pixels(&self) -> Vec<f32> {
        self.image
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

fn checksum(buf: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(buf);
    crc.sum()
}

/// 每个样本写为一个 `{prefix}_case_{idx}.rec`, 每个切片一帧.
#[derive(Debug, Clone)]
pub struct RecordSink {
    dir: PathBuf,
    prefix: String,
    next: usize,
}

impl RecordSink {
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
        self.dir.join(format!("{}_case_{}.rec", self.prefix, self.next))
    }
}

impl Sink for RecordSink {
    fn write(&mut self, sample: &Sample) -> PrepResult<()> {
        let path = self.next_path();
        let file = File::create(&path).map_err(PrepError::io(&path))?;
        let mut w = BufWriter::new(file);
        for (x, y) in sample.records() {
            let mut image = Vec::with_capacity(x.len() * 4);
            x.iter().for_each(|v| image.extend_from_slice(&v.to_le_bytes()));
            let ground_truth = match y {
                Either::Left(codes) => codes.iter().map(|&v| v as i64).collect(),
                Either::Right(one_hot) => one_hot.iter().map(|&v| v.round() as i64).collect(),
            };
            let example = Example {
                image,
                ground_truth,
                shape: x.shape().to_vec(),
            };
            let payload = bincode::serialize(&example)
                .map_err(|e| PrepError::decode(&path, e))?;
            w.write_all(&(payload.len() as u64).to_le_bytes())
                .and_then(|_| w.write_all(&checksum(&payload).to_le_bytes()))
                .and_then(|_| w.write_all(&payload))
                .map_err(PrepError::io(&path))?;
        }
        w.into_inner()
            .map_err(|e| e.into_error())
            .and_then(|f| f.sync_data())
            .map_err(PrepError::io(&path))?;
        self.next += 1;
        Ok(())
    }
}

/// 读取记录文件中的所有样例. 截断或校验失败时返回 [`PrepError::Decode`].
pub fn read_records<P: AsRef<Path>>(path: P) -> PrepResult<Vec<Example>> {
    let path = path.as_ref();
    let mut r = BufReader::new(File::open(path).map_err(PrepError::io(path))?);
    let mut ans = Vec::new();
    let mut head = [0u8; 12];
    loop {
        match r.read_exact(&mut head[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(PrepError::io(path)(e)),
        }
        r.read_exact(&mut head[1..])
            .map_err(|e| PrepError::decode(path, e))?;
        let mut len = [0u8; 8];
        len.copy_from_slice(&head[..8]);
        let len = u64::from_le_bytes(len) as usize;
        let crc = u32::from_le_bytes([head[8], head[9], head[10], head[11]]);
        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)
            .map_err(|e| PrepError::decode(path, e))?;
        if checksum(&payload) != crc {
            return Err(PrepError::decode(path, "记录校验失败"));
        }
        ans.push(bincode::deserialize(&payload).map_err(|e| PrepError::decode(path, e))?);
    }
    Ok(ans)
}
