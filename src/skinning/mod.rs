//! 顶点蒙皮计算

mod dual_quat;
mod skinning;

pub use dual_quat::DualQuat;
pub use skinning::{compute_skinning, skin_vertex};

use glam::{Mat4, Vec3};

use crate::model::VertexWeight;

/// 蒙皮方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SkinningType {
    /// 线性混合蒙皮
    Linear,
    /// 对偶四元数蒙皮
    #[default]
    DualQuaternion,
}

/// 蒙皮输入数据
pub struct SkinningInput<'a> {
    /// 静止姿态顶点位置
    pub positions: &'a [Vec3],
    /// 静止姿态顶点法线
    pub normals: &'a [Vec3],
    /// 顶点权重
    pub weights: &'a [VertexWeight],
    /// 骨骼相对绑定姿态的世界变换
    pub bone_matrices: &'a [Mat4],
    pub kind: SkinningType,
}

/// 蒙皮输出数据
pub struct SkinningOutput {
    /// 变换后的顶点位置
    pub positions: Vec<Vec3>,
    /// 变换后的顶点法线
    pub normals: Vec<Vec3>,
}
