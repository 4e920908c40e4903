//! 切向拉普拉斯平滑

use glam::Vec3;
use rayon::prelude::*;

use crate::model::SkinnedMesh;

/// 只沿场梯度的切平面做拉普拉斯平滑（Jacobi 双缓冲）
///
/// `movable[i]` 为 false 的顶点不移动，但仍作为邻居参与重心计算。
/// 梯度为零的顶点做普通拉普拉斯平滑。
pub fn tangential_smooth(
    positions: &mut [Vec3],
    gradients: &[Vec3],
    movable: &[bool],
    mesh: &SkinnedMesh,
    iterations: u32,
    strength: f32,
) {
    let strength = strength.clamp(0.0, 1.0);
    if strength == 0.0 {
        return;
    }
    for _ in 0..iterations {
        let current: &[Vec3] = positions;
        let next: Vec<Vec3> = (0..current.len())
            .into_par_iter()
            .map(|i| {
                let p = current[i];
                let ring = mesh.neighbors(i);
                if !movable[i] || ring.is_empty() {
                    return p;
                }
                let centroid = ring.iter().map(|&j| current[j]).sum::<Vec3>() / ring.len() as f32;
                let delta = centroid - p;
                let n = gradients[i].normalize_or_zero();
                let tangential = delta - n * delta.dot(n);
                p + tangential * strength
            })
            .collect();
        positions.copy_from_slice(&next);
    }
}
