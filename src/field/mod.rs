//! 骨骼隐式场
//!
//! 每根骨骼携带一个紧支撑势场，约定如下：
//! - 拟合表面上势能为 [`ISO_VALUE`]（0.5）
//! - 向骨骼内部增大，最大为 1
//! - 超出支撑半径后恰好为 0，梯度为零
//!
//! 没有任何数据的骨骼返回 [`FieldSample::EMPTY`]（势能 -inf），
//! 调用方可以把它当作"无贡献"直接跳过。

mod capsule;
mod hrbf;
mod precomputed;
mod sample;

pub use capsule::CapsuleField;
pub use hrbf::{FitError, HrbfField};
pub use precomputed::PrecomputedField;
pub use sample::InputSample;

use glam::Vec3;

use crate::blending::Aabb;

/// 表面所在的等值
pub const ISO_VALUE: f32 = 0.5;

/// 一次场查询的结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSample {
    pub potential: f32,
    pub gradient: Vec3,
}

impl FieldSample {
    /// 无数据骨骼的哨兵值
    pub const EMPTY: Self = Self {
        potential: f32::NEG_INFINITY,
        gradient: Vec3::ZERO,
    };

    /// 支撑区域之外的基线
    pub const ZERO: Self = Self {
        potential: 0.0,
        gradient: Vec3::ZERO,
    };

    pub fn new(potential: f32, gradient: Vec3) -> Self {
        Self { potential, gradient }
    }

    pub fn is_empty(&self) -> bool {
        !self.potential.is_finite()
    }
}

/// 紧支撑衰减函数
///
/// `d` 为有符号距离（内部为负），`radius` 为支撑半径。
/// 返回 (势能, 对 d 的导数)。在 |d| = radius 处导数为零，保证 C¹ 连续。
pub fn fall_off(d: f32, radius: f32) -> (f32, f32) {
    let t = d / radius;
    if t <= -1.0 {
        return (1.0, 0.0);
    }
    if t >= 1.0 {
        return (0.0, 0.0);
    }
    let t2 = t * t;
    let value = t * (-3.0 / 16.0 * t2 * t2 + 5.0 / 8.0 * t2 - 15.0 / 16.0) + 0.5;
    let one_minus = t2 - 1.0;
    let derivative = -15.0 / 16.0 * one_minus * one_minus / radius;
    (value, derivative)
}

/// 把有符号距离及其梯度转换为紧支撑势能
pub fn to_compact(distance: f32, distance_gradient: Vec3, radius: f32) -> FieldSample {
    let (value, derivative) = fall_off(distance, radius);
    FieldSample::new(value, distance_gradient * derivative)
}

/// 包围盒外 `margin` 范围内从 1 平滑降到 0 的窗口
///
/// 每轴取 1 - smoothstep(e / margin)，e 为点到 `inner` 的轴向距离，三轴相乘。
/// 返回 (窗口值, 对点的梯度)；在 `inner.expanded(margin)` 的边界上值与梯度均为零。
pub fn box_window(point: Vec3, inner: &Aabb, margin: f32) -> (f32, Vec3) {
    let mut w = [1.0f32; 3];
    let mut dw = [0.0f32; 3];
    for axis in 0..3 {
        let below = inner.min[axis] - point[axis];
        let above = point[axis] - inner.max[axis];
        let (e, sign) = if below > 0.0 {
            (below, -1.0)
        } else if above > 0.0 {
            (above, 1.0)
        } else {
            continue;
        };
        let s = e / margin;
        if s >= 1.0 {
            return (0.0, Vec3::ZERO);
        }
        w[axis] = 1.0 - s * s * (3.0 - 2.0 * s);
        dw[axis] = -6.0 * s * (1.0 - s) / margin * sign;
    }
    let value = w[0] * w[1] * w[2];
    let gradient = Vec3::new(dw[0] * w[1] * w[2], w[0] * dw[1] * w[2], w[0] * w[1] * dw[2]);
    (value, gradient)
}

/// HRBF 类型骨骼的场数据
///
/// 拟合场只在采样包围盒附近可信：采样盒外扩一个支撑半径内原样使用，
/// 再外扩一个支撑半径内乘以 [`box_window`] 衰减到 0。
#[derive(Clone, Debug)]
pub struct HrbfPrimitive {
    samples: InputSample,
    sample_bounds: Option<Aabb>,
    pub(crate) radius: f32,
    pub(crate) fitted: Option<HrbfField>,
}

impl HrbfPrimitive {
    pub fn new(radius: f32) -> Self {
        Self {
            samples: InputSample::default(),
            sample_bounds: None,
            radius,
            fitted: None,
        }
    }

    pub(crate) fn set_samples(&mut self, samples: InputSample) {
        self.sample_bounds = samples.bounds();
        self.samples = samples;
    }

    /// 窗口为 1 的区域
    fn trusted_bounds(&self) -> Option<Aabb> {
        self.sample_bounds.map(|b| b.expanded(self.radius))
    }

    fn evaluate(&self, point: Vec3) -> FieldSample {
        let (Some(hrbf), Some(trusted)) = (&self.fitted, self.trusted_bounds()) else {
            return FieldSample::EMPTY;
        };
        let (window, window_gradient) = box_window(point, &trusted, self.radius);
        if window <= 0.0 {
            return FieldSample::ZERO;
        }
        let (distance, gradient) = hrbf.eval(point);
        let s = to_compact(distance, gradient, self.radius);
        FieldSample::new(
            s.potential * window,
            s.gradient * window + window_gradient * s.potential,
        )
    }

    pub fn samples(&self) -> &InputSample {
        &self.samples
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// 骨骼场类型（构造后不可更改）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoneKind {
    Hrbf,
    Precomputed,
    Capsule,
}

/// 骨骼隐式场的具体表示，均定义在骨骼局部空间
#[derive(Clone, Debug)]
pub enum BoneField {
    Hrbf(HrbfPrimitive),
    Precomputed(PrecomputedField),
    Capsule(CapsuleField),
}

impl BoneField {
    pub fn kind(&self) -> BoneKind {
        match self {
            BoneField::Hrbf(_) => BoneKind::Hrbf,
            BoneField::Precomputed(_) => BoneKind::Precomputed,
            BoneField::Capsule(_) => BoneKind::Capsule,
        }
    }

    /// 在骨骼局部空间求值
    pub fn evaluate_local(&self, point: Vec3) -> FieldSample {
        match self {
            BoneField::Hrbf(prim) => prim.evaluate(point),
            BoneField::Precomputed(grid) => grid.evaluate(point),
            BoneField::Capsule(capsule) => capsule.evaluate(point),
        }
    }

    /// 局部空间中的支撑包围盒，空场返回 None
    pub fn local_bounds(&self) -> Option<Aabb> {
        match self {
            BoneField::Hrbf(prim) => {
                prim.fitted.as_ref()?;
                prim.trusted_bounds().map(|b| b.expanded(prim.radius))
            }
            BoneField::Precomputed(grid) => Some(grid.bounds()),
            BoneField::Capsule(capsule) => Some(capsule.bounds()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            BoneField::Hrbf(prim) => prim.fitted.is_none(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fall_off_boundaries() {
        assert_eq!(fall_off(-2.0, 1.0), (1.0, 0.0));
        assert_eq!(fall_off(2.0, 1.0), (0.0, 0.0));
        let (v, _) = fall_off(0.0, 1.0);
        assert!((v - ISO_VALUE).abs() < 1e-6);

        // 边界附近值与导数连续
        let (inside, d_inside) = fall_off(0.999, 1.0);
        assert!(inside < 1e-6);
        assert!(d_inside.abs() < 1e-4);
        let (deep, d_deep) = fall_off(-0.999, 1.0);
        assert!((deep - 1.0).abs() < 1e-6);
        assert!(d_deep.abs() < 1e-4);
    }

    #[test]
    fn test_fall_off_is_decreasing() {
        let mut prev = f32::MAX;
        for i in -10..=10 {
            let (v, d) = fall_off(i as f32 * 0.1, 1.0);
            assert!(v <= prev);
            assert!(d <= 0.0);
            prev = v;
        }
    }

    #[test]
    fn test_box_window_edges() {
        let inner = Aabb { min: Vec3::ZERO, max: Vec3::ONE };
        assert_eq!(box_window(Vec3::splat(0.5), &inner, 0.2), (1.0, Vec3::ZERO));
        assert_eq!(box_window(Vec3::new(1.25, 0.5, 0.5), &inner, 0.2).0, 0.0);
        assert_eq!(box_window(Vec3::new(0.5, -0.3, 0.5), &inner, 0.2), (0.0, Vec3::ZERO));

        let (w, g) = box_window(Vec3::new(1.199, 0.5, 0.5), &inner, 0.2);
        assert!(w < 1e-3);
        assert!(g.length() < 0.2);
    }

    #[test]
    fn test_box_window_gradient_matches_differences() {
        let inner = Aabb { min: Vec3::ZERO, max: Vec3::ONE };
        let p = Vec3::new(1.07, -0.05, 0.4);
        let (_, g) = box_window(p, &inner, 0.2);
        let h = 1e-3;
        for axis in 0..3 {
            let mut step = Vec3::ZERO;
            step[axis] = h;
            let numeric = (box_window(p + step, &inner, 0.2).0 - box_window(p - step, &inner, 0.2).0) / (2.0 * h);
            assert!((numeric - g[axis]).abs() < 1e-2, "axis {}: {} vs {}", axis, numeric, g[axis]);
        }
    }

    #[test]
    fn test_empty_hrbf_field() {
        let field = BoneField::Hrbf(HrbfPrimitive::new(1.0));
        let s = field.evaluate_local(Vec3::ONE);
        assert!(s.is_empty());
        assert_eq!(s.gradient, Vec3::ZERO);
        assert!(field.local_bounds().is_none());
    }
}
