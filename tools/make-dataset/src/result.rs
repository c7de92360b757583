//! 运行结果.

use std::io::{self, Write};
use std::time::Duration;

const SEP: &str = "--------------------------------------------------------";

/// 单个划分的处理结果.
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub name: String,
    pub cases: usize,
    pub samples: usize,
    pub slices: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub elapsed: Duration,
}

/// 将 `r` 的结果写进 `w` 中.
fn describe_into<W: Write>(r: &SplitReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn ratio_to_display(num: usize, den: usize) -> String {
        if den == 0 {
            "/".to_string()
        } else {
            format!("{:.2}", num as f64 / den as f64)
        }
    }

    writeln!(w, "Split `{}`:", r.name)?;
    writeln!(w, "{S4}Cases found: {}", r.cases)?;
    writeln!(w, "{S4}Samples written: {}", r.samples)?;
    writeln!(w, "{S4}Cases skipped: {}", r.skipped)?;
    writeln!(w, "{S4}Cases without labelled slices: {}", r.dropped)?;
    writeln!(w, "{S4}Slices written: {}", r.slices)?;
    writeln!(
        w,
        "{S4}Average slices per sample: {}",
        ratio_to_display(r.slices, r.samples)
    )?;
    write!(w, "{S4}Elapsed: {:.3} s", r.elapsed.as_secs_f64())?;
    Ok(())
}

/// 全部划分的处理结果.
#[derive(Debug, Default)]
pub struct PrepReport {
    splits: Vec<SplitReport>,
}

impl PrepReport {
    pub fn push(&mut self, r: SplitReport) {
        self.splits.push(r);
    }

    /// 各划分的结果, 按处理顺序.
    pub fn splits(&self) -> &[SplitReport] {
        &self.splits
    }

    /// 打印运行结果.
    pub fn analyze(&self) {
        println!("{SEP}");
        let mut buf = Vec::with_capacity(512);
        for r in self.splits() {
            if describe_into(r, &mut buf).is_ok() {
                println!("{}", String::from_utf8_lossy(&buf));
            }
            buf.clear();
            println!("{SEP}");
        }
    }
}
