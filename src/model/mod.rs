//! 静止姿态网格：顶点、骨骼权重与拓扑

mod mesh;
mod topology;

pub use mesh::SkinnedMesh;
pub use topology::{average_edge_length, compute_normals, one_ring};

use crate::skeleton::BoneId;

/// 权重之和低于该值的顶点视为未绑定
pub const MIN_TOTAL_WEIGHT: f32 = 1e-6;

/// 顶点骨骼权重
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexWeight {
    pub influences: Vec<(BoneId, f32)>,
}

impl VertexWeight {
    pub fn new(influences: Vec<(BoneId, f32)>) -> Self {
        Self { influences }
    }

    /// 单骨骼绑定
    pub fn single(bone: BoneId) -> Self {
        Self::new(vec![(bone, 1.0)])
    }

    /// 两骨骼绑定，`weight` 为第一根骨骼的权重
    pub fn pair(first: BoneId, second: BoneId, weight: f32) -> Self {
        Self::new(vec![(first, weight), (second, 1.0 - weight)])
    }

    pub fn total(&self) -> f32 {
        self.influences.iter().map(|&(_, w)| w.max(0.0)).sum()
    }

    /// 没有有效权重的顶点不参与蒙皮和修正
    pub fn is_unbound(&self) -> bool {
        self.total() < MIN_TOTAL_WEIGHT
    }

    /// 去掉非正权重并归一化
    pub fn normalize(&mut self) {
        self.influences.retain(|&(_, w)| w.is_finite() && w > 0.0);
        let total = self.total();
        if total < MIN_TOTAL_WEIGHT {
            self.influences.clear();
            return;
        }
        for (_, w) in &mut self.influences {
            *w /= total;
        }
    }

    /// 权重最大的骨骼
    pub fn dominant(&self) -> Option<BoneId> {
        self.influences
            .iter()
            .filter(|&&(_, w)| w > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|&(bone, _)| bone)
    }
}
