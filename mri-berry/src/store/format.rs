//! 存储文件的磁盘格式.
//!
//! ```text
//! 文件   := 前导 帧*
//! 前导   := MAGIC(8) 版本(u16) 头长度(u32) 头(bincode) 头校验(u32)
//! 帧     := FRAME_MAGIC(u32) 数据集(u8) 块号(u64) 槽位(u32) 负载长度(u64) 负载校验(u32) 负载
//! 负载   := zlib(一条记录的小端序原始字节)
//! ```
//!
//! 所有整数均为小端序. 第 `i` 条记录位于块 `i / chunk_len` 的槽位 `i % chunk_len`,
//! 每次追加只写一帧, 文件大小与块长度无关. 文件末尾不完整或校验失败的帧被视为
//! 未提交; 校验失败的帧之后若还有完整的帧, 文件被判定为损坏.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};
use serde::{Deserialize, Serialize};

use super::DatasetSpec;
use crate::{PrepError, PrepResult};

pub(crate) const MAGIC: &[u8; 8] = b"MRSTORE\0";
pub(crate) const VERSION: u16 = 1;
pub(crate) const FRAME_MAGIC: u32 = 0x5246_524d;
pub(crate) const FRAME_HEADER_LEN: usize = 4 + 1 + 8 + 4 + 8 + 4;

/// 文件头.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreHeader {
    pub datasets: Vec<DatasetSpec>,
    pub chunk_len: u64,
}

impl StoreHeader {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.datasets.iter().position(|d| d.name == name)
    }
}

#[inline]
fn crc32(buf: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(buf);
    crc.sum()
}

/// 编码前导.
pub(crate) fn encode_preamble(header: &StoreHeader) -> PrepResult<Vec<u8>> {
    let body = bincode::serialize(header)
        .map_err(|e| PrepError::InvalidConfig(format!("无法序列化存储文件头: {e}")))?;
    let mut out = Vec::with_capacity(8 + 2 + 4 + body.len() + 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32(&body).to_le_bytes());
    Ok(out)
}

/// 读取前导, 返回文件头与帧区的起始偏移.
fn read_preamble<R: Read>(path: &Path, r: &mut R) -> PrepResult<(StoreHeader, u64)> {
    let corrupt = |reason: String| PrepError::CorruptStore {
        path: path.to_owned(),
        reason,
    };
    let mut fixed = [0u8; 14];
    r.read_exact(&mut fixed)
        .map_err(|e| corrupt(format!("无法读取前导: {e}")))?;
    if &fixed[..8] != MAGIC {
        return Err(corrupt("不是存储文件".into()));
    }
    let version = u16::from_le_bytes([fixed[8], fixed[9]]);
    if version != VERSION {
        return Err(corrupt(format!("不支持的版本 {version}")));
    }
    let len = u32::from_le_bytes([fixed[10], fixed[11], fixed[12], fixed[13]]) as usize;
    let mut body = vec![0u8; len + 4];
    r.read_exact(&mut body)
        .map_err(|e| corrupt(format!("无法读取文件头: {e}")))?;
    let (body, crc) = body.split_at(len);
    if crc32(body).to_le_bytes() != crc {
        return Err(corrupt("文件头校验失败".into()));
    }
    let header: StoreHeader =
        bincode::deserialize(body).map_err(|e| corrupt(format!("无法解析文件头: {e}")))?;
    Ok((header, (14 + len + 4) as u64))
}

/// 帧头.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub dataset: u8,
    pub chunk: u64,
    pub slot: u32,
    pub payload_len: u64,
    pub crc: u32,
}

impl FrameHeader {
    fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        out[4] = self.dataset;
        out[5..13].copy_from_slice(&self.chunk.to_le_bytes());
        out[13..17].copy_from_slice(&self.slot.to_le_bytes());
        out[17..25].copy_from_slice(&self.payload_len.to_le_bytes());
        out[25..29].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    /// 魔数不符时返回 `None`.
    fn decode(buf: &[u8; FRAME_HEADER_LEN]) -> Option<Self> {
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let u64_at = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[i..i + 8]);
            u64::from_le_bytes(b)
        };
        (u32_at(0) == FRAME_MAGIC).then(|| Self {
            dataset: buf[4],
            chunk: u64_at(5),
            slot: u32_at(13),
            payload_len: u64_at(17),
            crc: u32_at(25),
        })
    }
}

/// 编码一帧. `raw` 为一条记录的原始字节.
pub(crate) fn encode_frame(dataset: u8, chunk: u64, slot: u32, raw: &[u8]) -> io::Result<Vec<u8>> {
    let mut e = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), Compression::fast());
    e.write_all(raw)?;
    let payload = e.finish()?;
    let header = FrameHeader {
        dataset,
        chunk,
        slot,
        payload_len: payload.len() as u64,
        crc: crc32(&payload),
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// 已提交帧在文件中的位置.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameLoc {
    pub offset: u64,
    pub len: u64,
    pub crc: u32,
}

/// (数据集, 块号, 槽位).
pub(crate) type FrameKey = (u8, u64, u32);

/// 扫描整个文件得到的布局.
#[derive(Debug)]
pub(crate) struct Layout {
    pub header: StoreHeader,

    /// 每条记录所在的帧.
    pub frames: HashMap<FrameKey, FrameLoc>,

    /// 每个数据集的记录数.
    pub lens: Vec<u64>,

    /// 最后一个完整帧之后的偏移.
    pub committed: u64,

    /// 文件实际长度. 大于 `committed` 时存在未提交的尾部.
    pub file_len: u64,
}

impl Layout {
    /// 打开并扫描 `path`.
    ///
    /// 只有位于文件末尾的坏帧被当作未提交的尾部; 坏帧之后还能解析出完整的帧,
    /// 或者某条记录缺失时返回 [`PrepError::CorruptStore`].
    pub fn scan(path: &Path) -> PrepResult<Self> {
        let corrupt = |reason: String| PrepError::CorruptStore {
            path: path.to_owned(),
            reason,
        };
        let file = File::open(path).map_err(PrepError::io(path))?;
        let file_len = file.metadata().map_err(PrepError::io(path))?.len();
        let mut r = BufReader::new(file);
        let (header, mut pos) = read_preamble(path, &mut r)?;
        let n = header.datasets.len();
        let chunk_len = header.chunk_len;

        let mut frames = HashMap::new();
        let mut lens = vec![0u64; n];
        let mut fh = [0u8; FRAME_HEADER_LEN];
        let mut payload = Vec::new();
        loop {
            if !read_or_eof(path, &mut r, &mut fh)? {
                break;
            }
            let Some(h) = FrameHeader::decode(&fh) else {
                break;
            };
            let start = pos + FRAME_HEADER_LEN as u64;
            let Some(end) = start.checked_add(h.payload_len).filter(|&e| e <= file_len) else {
                break;
            };
            payload.resize(h.payload_len as usize, 0);
            if !read_or_eof(path, &mut r, &mut payload)? {
                break;
            }
            if crc32(&payload) != h.crc {
                if end < file_len && followed_by_frame(path, &mut r, end, file_len)? {
                    return Err(corrupt(format!("偏移 {start} 处的帧校验失败, 其后仍有已提交的帧")));
                }
                break;
            }
            let index = h
                .chunk
                .checked_mul(chunk_len)
                .and_then(|i| i.checked_add(h.slot as u64 + 1));
            let valid = (h.dataset as usize) < n && (h.slot as u64) < chunk_len;
            let Some(end_index) = index.filter(|_| valid) else {
                return Err(corrupt(format!("非法帧 {h:?}")));
            };
            frames.insert(
                (h.dataset, h.chunk, h.slot),
                FrameLoc {
                    offset: start,
                    len: h.payload_len,
                    crc: h.crc,
                },
            );
            let len = &mut lens[h.dataset as usize];
            *len = (*len).max(end_index);
            pos = end;
        }

        for (d, &len) in lens.iter().enumerate() {
            let missing = (0..len).find(|&i| {
                !frames.contains_key(&(d as u8, i / chunk_len, (i % chunk_len) as u32))
            });
            if let Some(i) = missing {
                return Err(corrupt(format!(
                    "数据集 `{}` 缺少第 {i} 条记录",
                    header.datasets[d].name
                )));
            }
        }
        Ok(Self {
            header,
            frames,
            lens,
            committed: pos,
            file_len,
        })
    }

    /// 数据集 `dataset` 第 `index` 条记录所在的帧.
    pub fn locate(&self, dataset: usize, index: u64) -> Option<&FrameLoc> {
        let chunk_len = self.header.chunk_len;
        let key = (dataset as u8, index / chunk_len, (index % chunk_len) as u32);
        self.frames.get(&key)
    }
}

/// 读满 `buf`. 遇到文件末尾时返回 `false`.
fn read_or_eof<R: Read>(path: &Path, r: &mut R, buf: &mut [u8]) -> PrepResult<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(PrepError::io(path)(e)),
    }
}

/// 偏移 `at` 处是否是一个完整落在文件内的帧? `r` 须正位于 `at`.
fn followed_by_frame<R: Read>(path: &Path, r: &mut R, at: u64, file_len: u64) -> PrepResult<bool> {
    let mut fh = [0u8; FRAME_HEADER_LEN];
    if !read_or_eof(path, r, &mut fh)? {
        return Ok(false);
    }
    Ok(FrameHeader::decode(&fh).is_some_and(|h| {
        (at + FRAME_HEADER_LEN as u64)
            .checked_add(h.payload_len)
            .is_some_and(|e| e <= file_len)
    }))
}

/// 读出并解压一帧的负载.
pub(crate) fn read_frame(file: &mut File, path: &Path, loc: &FrameLoc) -> PrepResult<Vec<u8>> {
    let mut payload = vec![0u8; loc.len as usize];
    file.seek(SeekFrom::Start(loc.offset))
        .and_then(|_| file.read_exact(&mut payload))
        .map_err(PrepError::io(path))?;
    if crc32(&payload) != loc.crc {
        return Err(PrepError::CorruptStore {
            path: path.to_owned(),
            reason: format!("偏移 {} 处的帧校验失败", loc.offset),
        });
    }
    let mut raw = Vec::new();
    ZlibDecoder::new(payload.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| PrepError::CorruptStore {
            path: path.to_owned(),
            reason: format!("无法解压偏移 {} 处的帧: {e}", loc.offset),
        })?;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_layout() {
        let h = FrameHeader {
            dataset: 1,
            chunk: 7,
            slot: 3,
            payload_len: 99,
            crc: 0xdead_beef,
        };
        let buf = h.encode();
        assert_eq!(buf.len(), 29);
        assert_eq!(FrameHeader::decode(&buf), Some(h));

        let mut bad = buf;
        bad[0] ^= 0xff;
        assert_eq!(FrameHeader::decode(&bad), None);
    }

    #[test]
    fn test_preamble_round_trip() {
        let header = StoreHeader {
            datasets: vec![DatasetSpec::new("X", vec![2, 3], crate::store::DType::F32)],
            chunk_len: 4,
        };
        let buf = encode_preamble(&header).unwrap();
        let (back, start) = read_preamble(Path::new("mem"), &mut buf.as_slice()).unwrap();
        assert_eq!(back, header);
        assert_eq!(start, buf.len() as u64);

        let mut broken = buf.clone();
        let last = broken.len() - 1;
        broken[last] ^= 1;
        assert!(matches!(
            read_preamble(Path::new("mem"), &mut broken.as_slice()),
            Err(PrepError::CorruptStore { .. })
        ));
    }
}
