//! 顶点蒙皮计算

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use super::{DualQuat, SkinningInput, SkinningOutput, SkinningType};
use crate::model::VertexWeight;

/// 计算蒙皮（按顶点并行）
///
/// 未绑定的顶点保持静止姿态位置与法线。
pub fn compute_skinning(input: &SkinningInput) -> SkinningOutput {
    // 对偶四元数每帧只从矩阵转换一次
    let dual_quats: Vec<DualQuat> = match input.kind {
        SkinningType::DualQuaternion => input.bone_matrices.iter().map(DualQuat::from_mat4).collect(),
        SkinningType::Linear => Vec::new(),
    };

    let (positions, normals) = (0..input.positions.len())
        .into_par_iter()
        .map(|i| {
            compute_single_vertex(
                input.positions[i],
                input.normals[i],
                &input.weights[i],
                input.bone_matrices,
                &dual_quats,
                input.kind,
            )
        })
        .unzip();

    SkinningOutput { positions, normals }
}

/// 单个顶点的蒙皮位置
pub fn skin_vertex(position: Vec3, weight: &VertexWeight, matrices: &[Mat4], kind: SkinningType) -> Vec3 {
    let dual_quats: Vec<DualQuat> = match kind {
        SkinningType::DualQuaternion => matrices.iter().map(DualQuat::from_mat4).collect(),
        SkinningType::Linear => Vec::new(),
    };
    compute_single_vertex(position, Vec3::ZERO, weight, matrices, &dual_quats, kind).0
}

/// 计算单个顶点的蒙皮
fn compute_single_vertex(
    position: Vec3,
    normal: Vec3,
    weight: &VertexWeight,
    matrices: &[Mat4],
    dual_quats: &[DualQuat],
    kind: SkinningType,
) -> (Vec3, Vec3) {
    if weight.is_unbound() {
        return (position, normal);
    }
    match kind {
        SkinningType::Linear => linear(position, normal, weight, matrices),
        SkinningType::DualQuaternion => {
            let dq = DualQuat::blend(
                weight
                    .influences
                    .iter()
                    .map(|&(bone, w)| (dual_quats.get(bone).copied().unwrap_or(DualQuat::IDENTITY), w)),
            );
            (
                dq.transform_point3(position),
                dq.transform_vector3(normal).normalize_or_zero(),
            )
        }
    }
}

fn linear(position: Vec3, normal: Vec3, weight: &VertexWeight, matrices: &[Mat4]) -> (Vec3, Vec3) {
    let mut pos = Vec3::ZERO;
    let mut norm = Vec3::ZERO;
    for &(bone, w) in &weight.influences {
        let m = get_matrix(matrices, bone);
        pos += m.transform_point3(position) * w;
        norm += m.transform_vector3(normal) * w;
    }
    (pos, norm.normalize_or_zero())
}

fn get_matrix(matrices: &[Mat4], index: usize) -> Mat4 {
    matrices.get(index).copied().unwrap_or(Mat4::IDENTITY)
}
