//! 二元混合算子
//!
//! 所有算子都给出对两个输入势能的偏导，复合梯度按链式法则
//! `∂g/∂a · ∇a + ∂g/∂b · ∇b` 得到，与算子本身严格一致。

use glam::Vec3;

use crate::field::{FieldSample, ISO_VALUE};

/// 关节混合类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JointBlending {
    /// 普通并集 max(a, b)，关节处可能鼓包或出现折痕
    Max,
    /// 平滑过渡，结果从不超过 max(a, b)
    #[default]
    BulgeFree,
    /// 平滑过渡并按关节鼓包幅度叠加凸起
    Bulge,
}

impl JointBlending {
    pub fn to_u8(self) -> u8 {
        match self {
            JointBlending::Max => 0,
            JointBlending::BulgeFree => 1,
            JointBlending::Bulge => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(JointBlending::Max),
            1 => Some(JointBlending::BulgeFree),
            2 => Some(JointBlending::Bulge),
            _ => None,
        }
    }
}

/// 开度小于该值时退化为 max
const MIN_OPENING: f32 = 1e-5;

/// 梯度夹角余弦的饱和项，使一侧梯度趋零时余弦连续地趋于 0
const COSINE_EPSILON: f32 = 1e-6;

/// 两个梯度的饱和余弦
pub fn saturated_cosine(ga: Vec3, gb: Vec3) -> f32 {
    let denom = ga.length() * gb.length() + COSINE_EPSILON;
    (ga.dot(gb) / denom).clamp(-1.0, 1.0)
}

/// 组合两个场样本
///
/// `opening` 为混合区宽度（势能单位），`bulge` 为鼓包幅度 [0, 1]。
/// 任一输入为空（-inf）时直接返回另一个。
pub fn blend(kind: JointBlending, a: FieldSample, b: FieldSample, opening: f32, bulge: f32) -> FieldSample {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }

    if kind == JointBlending::Max || opening < MIN_OPENING {
        return if a.potential >= b.potential { a } else { b };
    }

    let diff = a.potential - b.potential;
    let h = (0.5 + 0.5 * diff / opening).clamp(0.0, 1.0);
    if h <= 0.0 {
        return b;
    }
    if h >= 1.0 {
        return a;
    }

    // 平滑阶跃 H(h) = 3h² - 2h³，g = b + H·(a - b)
    let big_h = h * h * (3.0 - 2.0 * h);
    let big_h_prime = 6.0 * h * (1.0 - h);
    let mut value = b.potential + big_h * diff;
    let mut da = big_h + (2.0 * h - 1.0) * 0.5 * big_h_prime;
    // 平移不变：∂g/∂a + ∂g/∂b = 1
    let mut db = 1.0 - da;

    if kind == JointBlending::Bulge && bulge > 0.0 {
        // 凸起 β·w·16 s²·m，s = h(1-h)，在混合区边界处值与导数均为零；
        // m 随两侧势能之和平滑升到 1，支撑区外（a = b = 0）没有凸起
        let s = h * (1.0 - h);
        let q = ((a.potential + b.potential) / (2.0 * ISO_VALUE)).clamp(0.0, 1.0);
        let m = q * q * (3.0 - 2.0 * q);
        let dm = if q > 0.0 && q < 1.0 {
            6.0 * q * (1.0 - q) / (2.0 * ISO_VALUE)
        } else {
            0.0
        };

        let bump = bulge * opening * 16.0 * s * s;
        let d_bump = 16.0 * bulge * s * (1.0 - 2.0 * h);
        value += bump * m;
        da += d_bump * m + bump * dm;
        db += -d_bump * m + bump * dm;
    }

    FieldSample::new(value, a.gradient * da + b.gradient * db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(p: f32, g: Vec3) -> FieldSample {
        FieldSample::new(p, g)
    }

    #[test]
    fn test_empty_is_neutral() {
        let a = sample(0.3, Vec3::X);
        for kind in [JointBlending::Max, JointBlending::BulgeFree, JointBlending::Bulge] {
            assert_eq!(blend(kind, a, FieldSample::EMPTY, 0.3, 0.5), a);
            assert_eq!(blend(kind, FieldSample::EMPTY, a, 0.3, 0.5), a);
        }
        assert!(blend(JointBlending::Max, FieldSample::EMPTY, FieldSample::EMPTY, 0.3, 0.0).is_empty());
    }

    #[test]
    fn test_bulge_free_never_exceeds_max() {
        for i in 0..=20 {
            let pa = i as f32 * 0.05;
            for j in 0..=20 {
                let pb = j as f32 * 0.05;
                let g = blend(JointBlending::BulgeFree, sample(pa, Vec3::X), sample(pb, Vec3::Y), 0.4, 1.0);
                assert!(g.potential <= pa.max(pb) + 1e-6);
                assert!(g.potential >= pa.min(pb) - 1e-6);
            }
        }
    }

    #[test]
    fn test_bulge_exceeds_max_at_equal_inputs() {
        let a = sample(0.5, Vec3::X);
        let b = sample(0.5, Vec3::Y);
        let g = blend(JointBlending::Bulge, a, b, 0.4, 1.0);
        assert!(g.potential > 0.5);
        let none = blend(JointBlending::Bulge, a, b, 0.4, 0.0);
        assert!((none.potential - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_no_bulge_outside_supports() {
        let g = blend(JointBlending::Bulge, FieldSample::ZERO, FieldSample::ZERO, 0.4, 1.0);
        assert_eq!(g.potential, 0.0);
    }

    #[test]
    fn test_matches_inputs_outside_blend_region() {
        let a = sample(0.9, Vec3::X);
        let b = sample(0.1, Vec3::Y);
        assert_eq!(blend(JointBlending::Bulge, a, b, 0.4, 1.0), a);
        assert_eq!(blend(JointBlending::BulgeFree, b, a, 0.4, 1.0), a);
    }

    #[test]
    fn test_gradient_is_consistent_with_value() {
        // 以势能为自变量做数值微分，检查链式法则系数
        let ga = Vec3::X;
        let gb = Vec3::Y;
        for kind in [JointBlending::BulgeFree, JointBlending::Bulge] {
            for &(pa, pb) in &[(0.5, 0.45), (0.3, 0.55), (0.62, 0.5)] {
                let g = blend(kind, sample(pa, ga), sample(pb, gb), 0.4, 0.7);
                let h = 1e-3;
                let da = (blend(kind, sample(pa + h, ga), sample(pb, gb), 0.4, 0.7).potential
                    - blend(kind, sample(pa - h, ga), sample(pb, gb), 0.4, 0.7).potential)
                    / (2.0 * h);
                let db = (blend(kind, sample(pa, ga), sample(pb + h, gb), 0.4, 0.7).potential
                    - blend(kind, sample(pa, ga), sample(pb - h, gb), 0.4, 0.7).potential)
                    / (2.0 * h);
                assert!((g.gradient.x - da).abs() < 1e-2, "{:?} da {} vs {}", kind, g.gradient.x, da);
                assert!((g.gradient.y - db).abs() < 1e-2, "{:?} db {} vs {}", kind, g.gradient.y, db);
            }
        }
    }

    #[test]
    fn test_saturated_cosine_vanishes_with_gradient() {
        assert!((saturated_cosine(Vec3::X, Vec3::X) - 1.0).abs() < 1e-4);
        assert!((saturated_cosine(Vec3::X, -Vec3::X) + 1.0).abs() < 1e-4);
        assert!(saturated_cosine(Vec3::X, Vec3::X * 1e-9).abs() < 1e-2);
        assert_eq!(saturated_cosine(Vec3::X, Vec3::ZERO), 0.0);
    }
}
