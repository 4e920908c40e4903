//! 关节控制曲线
//!
//! 控制曲线把两个贡献场梯度夹角的余弦映射到 [0, 1] 的开度，
//! 开度再乘以环境的最大开度得到混合区宽度。
//! 余弦接近 -1（两侧表面相对挤压）时开度应小，得到接触折痕；
//! 余弦接近 1（关节伸直）时开度大，平滑过渡。

use std::fmt;
use std::sync::Arc;

use glam::Vec2;
use once_cell::sync::Lazy;

/// 三个控制点 + 两段刚度的分段平滑曲线
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerShape {
    /// 控制点 (余弦, 开度)，要求 p0.x <= p1.x <= p2.x
    pub p0: Vec2,
    pub p1: Vec2,
    pub p2: Vec2,
    /// 两段的过渡刚度，>= 1
    pub s0: f32,
    pub s1: f32,
}

impl ControllerShape {
    pub fn new(p0: Vec2, p1: Vec2, p2: Vec2, s0: f32, s1: f32) -> Self {
        Self { p0, p1, p2, s0, s1 }
    }

    /// 肘部：弯曲较深时才收紧
    pub fn elbow() -> Self {
        Self::new(
            Vec2::new(-0.8, 0.0),
            Vec2::new(0.0, 0.6),
            Vec2::new(0.8, 1.0),
            2.0,
            1.5,
        )
    }

    /// 手指：较早收紧，保留指节折痕
    pub fn finger() -> Self {
        Self::new(
            Vec2::new(-0.3, 0.0),
            Vec2::new(0.3, 0.4),
            Vec2::new(0.9, 1.0),
            3.0,
            2.0,
        )
    }

    pub fn eval(&self, x: f32) -> f32 {
        if x <= self.p0.x {
            return self.p0.y;
        }
        if x >= self.p2.x {
            return self.p2.y;
        }
        if x <= self.p1.x {
            segment(self.p0, self.p1, self.s0, x)
        } else {
            segment(self.p1, self.p2, self.s1, x)
        }
    }
}

impl Default for ControllerShape {
    fn default() -> Self {
        Self::elbow()
    }
}

/// 两点间的 S 形过渡，刚度 >= 1 时两端导数为 0
fn segment(a: Vec2, b: Vec2, stiffness: f32, x: f32) -> f32 {
    let span = b.x - a.x;
    if span <= 1e-6 {
        return b.y;
    }
    let t = ((x - a.x) / span).clamp(0.0, 1.0);
    let s = stiffness.max(1.0);
    let tp = t.powf(s);
    let up = (1.0 - t).powf(s);
    let e = tp / (tp + up);
    a.y + (b.y - a.y) * e
}

/// 预设曲线表（按名称查找）
static PRESETS: Lazy<Vec<(&'static str, ControllerShape)>> = Lazy::new(|| {
    vec![
        ("elbow", ControllerShape::elbow()),
        ("finger", ControllerShape::finger()),
    ]
});

/// 按名称获取预设曲线
pub fn preset(name: &str) -> Option<ControllerShape> {
    PRESETS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, shape)| *shape)
}

/// 关节控制器：预设曲线或用户自定义函数
#[derive(Clone)]
pub enum Controller {
    Shape(ControllerShape),
    Custom(Arc<dyn Fn(f32) -> f32 + Send + Sync>),
}

impl Controller {
    /// 输入余弦 [-1, 1]，输出开度 [0, 1]
    pub fn eval(&self, cos_angle: f32) -> f32 {
        let v = match self {
            Controller::Shape(shape) => shape.eval(cos_angle),
            Controller::Custom(f) => f(cos_angle),
        };
        if v.is_finite() {
            v.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn shape(&self) -> Option<ControllerShape> {
        match self {
            Controller::Shape(shape) => Some(*shape),
            Controller::Custom(_) => None,
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Controller::Shape(ControllerShape::default())
    }
}

impl From<ControllerShape> for Controller {
    fn from(shape: ControllerShape) -> Self {
        Controller::Shape(shape)
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Controller::Shape(shape) => f.debug_tuple("Shape").field(shape).finish(),
            Controller::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
