//! 沿梯度把顶点推回目标等值面

use glam::Vec3;

use super::DeformConfig;
use crate::blending::BlendingEnv;
use crate::skeleton::Skeleton;

/// 单个顶点的修正结果
#[derive(Clone, Copy, Debug)]
pub struct Correction {
    pub position: Vec3,
    /// 该位置处的全局场梯度，场为空时为零
    pub gradient: Vec3,
    pub iterations: u32,
    /// |目标 - 势能|
    pub error: f32,
}

/// 从 `start` 出发迭代逼近势能 `target`
///
/// 每步沿归一化梯度移动 `step_scale · (target - f) / |∇f|`，步长有上限。
/// 误差足够小、梯度过小、梯度方向突变或达到迭代上限时停止，
/// 返回途中误差最小的位置。
pub fn project_vertex(env: &BlendingEnv, skeleton: &Skeleton, start: Vec3, target: f32, config: &DeformConfig) -> Correction {
    let mut p = start;
    let mut s = env.evaluate(skeleton, p);
    if s.is_empty() || !target.is_finite() {
        return Correction {
            position: start,
            gradient: Vec3::ZERO,
            iterations: 0,
            error: 0.0,
        };
    }

    let mut best = Correction {
        position: p,
        gradient: s.gradient,
        iterations: 0,
        error: (target - s.potential).abs(),
    };
    let min_grad2 = config.min_gradient_norm * config.min_gradient_norm;
    let cos_stop = config.gradient_stop_angle_deg.to_radians().cos();
    let mut prev_dir: Option<Vec3> = None;

    for it in 1..=config.max_correction_iterations {
        let err = target - s.potential;
        if err.abs() < config.potential_tolerance {
            break;
        }
        let g2 = s.gradient.length_squared();
        if g2 < min_grad2 {
            break;
        }
        let dir = s.gradient / g2.sqrt();
        if let Some(prev) = prev_dir {
            if prev.dot(dir) < cos_stop {
                break;
            }
        }
        prev_dir = Some(dir);

        let step = (s.gradient * (config.step_scale * err / g2)).clamp_length_max(config.max_step_length);
        p += step;
        s = env.evaluate(skeleton, p);
        if s.is_empty() {
            break;
        }

        let e = (target - s.potential).abs();
        if e < best.error {
            best = Correction {
                position: p,
                gradient: s.gradient,
                iterations: it,
                error: e,
            };
        }
    }
    best
}
