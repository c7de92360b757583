//! 几何增强操作与其注册表.
//!
//! 操作作用于 "通道 + 标签" 拼接后的 `(C + 1, H, W)` 数组, 同一个随机变换
//! 会同时施加到所有通道上, 因此特征与标签保持对齐.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array3, Axis};
use rand::{Rng, RngCore};

use crate::{PrepError, PrepResult};

/// 几何增强操作. 输出形状必须与输入一致.
pub trait GeometricOp: Send + Sync {
    /// 注册名.
    fn name(&self) -> &str;

    /// 对拼接数组 `combined` 施加变换.
    fn apply(&self, combined: Array3<f32>, rng: &mut dyn RngCore) -> Array3<f32>;
}

impl fmt::Debug for dyn GeometricOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeometricOp({})", self.name())
    }
}

/// 越界采样点的填充方式.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// 取最近的边界像素.
    Nearest,

    /// 取常数.
    Constant(f32),
}

/// 以最近邻插值对每个通道施加同一个逆映射 `inverse`.
///
/// `inverse` 把输出坐标 `(y, x)` 映射回源坐标.
fn warp<F>(src: &Array3<f32>, fill: Fill, inverse: F) -> Array3<f32>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let (c, h, w) = src.dim();
    let mut dst = Array3::<f32>::zeros((c, h, w));
    let (hi, wi) = (h as i64 - 1, w as i64 - 1);
    for y in 0..h {
        for x in 0..w {
            let (sy, sx) = inverse(y as f64, x as f64);
            let (sy, sx) = (sy.round() as i64, sx.round() as i64);
            let inside = (0..=hi).contains(&sy) && (0..=wi).contains(&sx);
            match (inside, fill) {
                (true, _) | (false, Fill::Nearest) => {
                    let (sy, sx) = (sy.clamp(0, hi) as usize, sx.clamp(0, wi) as usize);
                    for ch in 0..c {
                        dst[(ch, y, x)] = src[(ch, sy, sx)];
                    }
                }
                (false, Fill::Constant(v)) => {
                    for ch in 0..c {
                        dst[(ch, y, x)] = v;
                    }
                }
            }
        }
    }
    dst
}

/// 以概率 `prob` 沿宽 (或高) 方向翻转.
#[derive(Debug, Clone, Copy)]
pub struct Flip {
    /// 翻转概率.
    pub prob: f64,

    /// 为真时左右翻转, 否则上下翻转.
    pub horizontal: bool,
}

impl Default for Flip {
    fn default() -> Self {
        Self {
            prob: 0.5,
            horizontal: true,
        }
    }
}

impl GeometricOp for Flip {
    fn name(&self) -> &str {
        "flip"
    }

    fn apply(&self, mut combined: Array3<f32>, rng: &mut dyn RngCore) -> Array3<f32> {
        if rng.gen_bool(self.prob.clamp(0.0, 1.0)) {
            let axis = if self.horizontal { Axis(2) } else { Axis(1) };
            combined.invert_axis(axis);
            combined = combined.as_standard_layout().into_owned();
        }
        combined
    }
}

/// 绕切片中心旋转.
#[derive(Debug, Clone, Copy)]
pub struct Rotate {
    /// 旋转角度 (度). 随机模式下为最大幅度.
    pub degrees: f64,

    /// 为真时在 `[-degrees, degrees]` 内均匀取角度, 否则固定旋转 `degrees`.
    pub random: bool,

    /// 越界填充.
    pub fill: Fill,
}

impl Default for Rotate {
    fn default() -> Self {
        Self {
            degrees: 130.0,
            random: false,
            fill: Fill::Nearest,
        }
    }
}

impl GeometricOp for Rotate {
    fn name(&self) -> &str {
        "rotate"
    }

    fn apply(&self, combined: Array3<f32>, rng: &mut dyn RngCore) -> Array3<f32> {
        let deg = if self.random && self.degrees != 0.0 {
            let d = self.degrees.abs();
            rng.gen_range(-d..=d)
        } else {
            self.degrees
        };
        let (_, h, w) = combined.dim();
        let (cy, cx) = ((h as f64 - 1.0) / 2.0, (w as f64 - 1.0) / 2.0);
        let (sin, cos) = deg.to_radians().sin_cos();
        warp(&combined, self.fill, |y, x| {
            let (dy, dx) = (y - cy, x - cx);
            (cy + dx * sin + dy * cos, cx + dx * cos - dy * sin)
        })
    }
}

/// 随机平移. 平移量为宽/高乘以 `[-rg, rg]` 内的均匀随机数.
#[derive(Debug, Clone, Copy)]
pub struct Shift {
    /// 宽方向的最大平移比例.
    pub wrg: f64,

    /// 高方向的最大平移比例.
    pub hrg: f64,

    /// 越界填充.
    pub fill: Fill,
}

impl Default for Shift {
    fn default() -> Self {
        Self {
            wrg: 0.1,
            hrg: 0.1,
            fill: Fill::Constant(0.0),
        }
    }
}

impl GeometricOp for Shift {
    fn name(&self) -> &str {
        "shift"
    }

    fn apply(&self, combined: Array3<f32>, rng: &mut dyn RngCore) -> Array3<f32> {
        let (_, h, w) = combined.dim();
        let mut offset = |rg: f64, len: usize| {
            let rg = rg.abs();
            if rg == 0.0 {
                0.0
            } else {
                (rng.gen_range(-rg..=rg) * len as f64).round()
            }
        };
        let (ty, tx) = (offset(self.hrg, h), offset(self.wrg, w));
        if ty == 0.0 && tx == 0.0 {
            return combined;
        }
        warp(&combined, self.fill, |y, x| (y - ty, x - tx))
    }
}

/// 按名称查找几何操作的注册表.
///
/// 注册表是普通的值, 由调用者持有并交给 [`Augment`](super::Augment),
/// 不存在进程级的全局注册.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    ops: HashMap<String, Arc<dyn GeometricOp>>,
}

impl OpRegistry {
    /// 空注册表.
    pub fn new() -> Self {
        Self::default()
    }

    /// 含内置操作 `flip`, `rotate`, `shift` 的注册表.
    pub fn builtin() -> Self {
        let mut ans = Self::new();
        ans.register(Flip::default());
        ans.register(Rotate::default());
        ans.register(Shift::default());
        ans
    }

    /// 以 `op.name()` 注册 (或替换) 操作.
    pub fn register<O: GeometricOp + 'static>(&mut self, op: O) -> &mut Self {
        self.ops.insert(op.name().to_owned(), Arc::new(op));
        self
    }

    /// 按名称查找.
    #[inline]
    pub fn get(&self, name: &str) -> Option<Arc<dyn GeometricOp>> {
        self.ops.get(name).cloned()
    }

    /// 所有已注册的名称, 升序.
    pub fn names(&self) -> Vec<&str> {
        let mut ans: Vec<_> = self.ops.keys().map(String::as_str).collect();
        ans.sort_unstable();
        ans
    }

    /// 按顺序解析 `names`. 任一名称未注册时返回 [`PrepError::InvalidConfig`].
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> PrepResult<Vec<Arc<dyn GeometricOp>>> {
        names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                self.get(n).ok_or_else(|| {
                    PrepError::InvalidConfig(format!(
                        "未注册的增强操作 `{n}`, 可用: {:?}",
                        self.names()
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn grid() -> Array3<f32> {
        Array3::from_shape_fn((2, 4, 4), |(c, y, x)| (c * 100 + y * 4 + x) as f32)
    }

    #[test]
    fn test_flip() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let always = Flip {
            prob: 1.0,
            horizontal: true,
        };
        let out = always.apply(grid(), &mut rng);
        assert_eq!(out[(0, 1, 0)], 7.0);
        assert_eq!(out[(1, 1, 3)], 104.0);

        let never = Flip {
            prob: 0.0,
            horizontal: false,
        };
        assert_eq!(never.apply(grid(), &mut rng), grid());
    }

    #[test]
    fn test_rotate_quarter_turns() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let quarter = Rotate {
            degrees: 90.0,
            random: false,
            fill: Fill::Nearest,
        };
        let once = quarter.apply(grid(), &mut rng);
        assert_eq!(once.dim(), (2, 4, 4));
        assert_ne!(once, grid());
        let full = (0..3).fold(once, |a, _| quarter.apply(a, &mut rng));
        assert_eq!(full, grid());
    }

    #[test]
    fn test_shift_keeps_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let shift = Shift {
            wrg: 0.5,
            hrg: 0.0,
            fill: Fill::Constant(-1.0),
        };
        let out = shift.apply(grid(), &mut rng);
        assert_eq!(out.dim(), (2, 4, 4));
        // 只沿宽方向平移, 行内元素集合要么不变要么出现填充值.
        for y in 0..4 {
            for x in 0..4 {
                let v = out[(0, y, x)];
                assert!(v == -1.0 || (v as usize) / 4 == y);
            }
        }
    }

    #[test]
    fn test_registry() {
        let reg = OpRegistry::builtin();
        assert_eq!(reg.names(), ["flip", "rotate", "shift"]);
        let ops = reg.resolve(&["shift", "flip"]).unwrap();
        assert_eq!(ops[0].name(), "shift");
        assert!(matches!(
            reg.resolve(&["elastic"]),
            Err(PrepError::InvalidConfig(_))
        ));
    }
}
