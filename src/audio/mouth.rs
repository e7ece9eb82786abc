use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouthShape {
    Closed,
    Half,
    Open,
}

impl MouthShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouthShape::Closed => "closed",
            MouthShape::Half => "half",
            MouthShape::Open => "open",
        }
    }
}

impl fmt::Display for MouthShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 把归一化后的每帧音量映射成嘴型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MouthSync {
    /// 低于这个值闭嘴
    pub closed_below: f32,
    /// 不低于这个值张大嘴
    pub open_above: f32,
    /// 新嘴型要持续这么多帧才会切换
    pub min_hold_frames: usize,
}

impl Default for MouthSync {
    fn default() -> Self {
        Self {
            closed_below: 0.1,
            open_above: 0.45,
            min_hold_frames: 2,
        }
    }
}

impl MouthSync {
    pub fn shape(&self, intensity: f32) -> MouthShape {
        if intensity < self.closed_below {
            MouthShape::Closed
        } else if intensity >= self.open_above {
            MouthShape::Open
        } else {
            MouthShape::Half
        }
    }

    /// 每个视频帧一个嘴型，最后一帧总是闭嘴
    pub fn frames(&self, intensities: &[f32]) -> Vec<MouthShape> {
        let hold = self.min_hold_frames.max(1);
        let mut frames = Vec::with_capacity(intensities.len());
        let mut current = MouthShape::Closed;
        let mut pending: Option<(MouthShape, usize)> = None;

        for &intensity in intensities {
            let shape = self.shape(intensity);
            if shape == current {
                pending = None;
            } else {
                let seen = match pending {
                    Some((candidate, n)) if candidate == shape => n + 1,
                    _ => 1,
                };
                if seen >= hold {
                    current = shape;
                    pending = None;
                } else {
                    pending = Some((shape, seen));
                }
            }
            frames.push(current);
        }

        if let Some(last) = frames.last_mut() {
            *last = MouthShape::Closed;
        }
        frames
    }
}

/// 游程编码：连续相同的嘴型合并成 (嘴型, 帧数)
pub fn runs(frames: &[MouthShape]) -> Vec<(MouthShape, usize)> {
    let mut out: Vec<(MouthShape, usize)> = Vec::new();
    for &shape in frames {
        match out.last_mut() {
            Some((last, count)) if *last == shape => *count += 1,
            _ => out.push((shape, 1)),
        }
    }
    out
}
