//! 带骨骼权重的静止姿态网格

use glam::Vec3;

use super::topology::{average_edge_length, compute_normals, one_ring};
use super::VertexWeight;
use crate::{Result, SkinError};

/// 静止姿态网格
///
/// 顶点数在构造后固定；顶点数变化需要重新构造网格，
/// 并重新计算采样与基准势能。
#[derive(Clone, Debug)]
pub struct SkinnedMesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    weights: Vec<VertexWeight>,
    triangles: Vec<[u32; 3]>,
    neighbors: Vec<Vec<usize>>,
    average_edge: f32,
    revision: u64,
}

impl SkinnedMesh {
    /// 由顶点、权重、三角形构造，法线按面积加权计算
    pub fn new(positions: Vec<Vec3>, weights: Vec<VertexWeight>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        let normals = compute_normals_checked(&positions, &triangles)?;
        Self::with_normals(positions, normals, weights, triangles)
    }

    /// 使用外部提供的法线
    pub fn with_normals(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        mut weights: Vec<VertexWeight>,
        triangles: Vec<[u32; 3]>,
    ) -> Result<Self> {
        let n = positions.len();
        if normals.len() != n || weights.len() != n {
            return Err(SkinError::MeshMismatch(format!(
                "{} positions, {} normals, {} weight entries",
                n,
                normals.len(),
                weights.len()
            )));
        }
        check_triangles(n, &triangles)?;

        for w in &mut weights {
            w.normalize();
        }
        let normals = normals.iter().map(|v| v.normalize_or_zero()).collect();
        let neighbors = one_ring(n, &triangles);
        let average_edge = average_edge_length(&positions, &neighbors);

        Ok(Self {
            positions,
            normals,
            weights,
            triangles,
            neighbors,
            average_edge,
            revision: 0,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn weights(&self) -> &[VertexWeight] {
        &self.weights
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn neighbors(&self, vertex: usize) -> &[usize] {
        &self.neighbors[vertex]
    }

    pub fn average_edge_length(&self) -> f32 {
        self.average_edge
    }

    /// 每次修改顶点或权重都会递增
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 替换静止姿态顶点位置（顶点数必须一致），法线随之重算
    pub fn set_positions(&mut self, positions: Vec<Vec3>) -> Result<()> {
        if positions.len() != self.positions.len() {
            return Err(SkinError::MeshMismatch(format!(
                "expected {} positions, got {}",
                self.positions.len(),
                positions.len()
            )));
        }
        self.normals = compute_normals(&positions, &self.triangles);
        self.average_edge = average_edge_length(&positions, &self.neighbors);
        self.positions = positions;
        self.revision += 1;
        Ok(())
    }

    pub fn set_weights(&mut self, mut weights: Vec<VertexWeight>) -> Result<()> {
        if weights.len() != self.positions.len() {
            return Err(SkinError::MeshMismatch(format!(
                "expected {} weight entries, got {}",
                self.positions.len(),
                weights.len()
            )));
        }
        for w in &mut weights {
            w.normalize();
        }
        self.weights = weights;
        self.revision += 1;
        Ok(())
    }

    /// 检查权重引用的骨骼都存在
    pub fn validate_bones(&self, nb_joints: usize) -> Result<()> {
        for (v, w) in self.weights.iter().enumerate() {
            if let Some(&(bone, _)) = w.influences.iter().find(|&&(bone, _)| bone >= nb_joints) {
                return Err(SkinError::MeshMismatch(format!(
                    "vertex {} references bone {} but skeleton has {} joints",
                    v, bone, nb_joints
                )));
            }
        }
        Ok(())
    }
}

fn check_triangles(vertex_count: usize, triangles: &[[u32; 3]]) -> Result<()> {
    for (t, tri) in triangles.iter().enumerate() {
        if let Some(&bad) = tri.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(SkinError::MeshMismatch(format!(
                "triangle {} references vertex {} of {}",
                t, bad, vertex_count
            )));
        }
    }
    Ok(())
}

fn compute_normals_checked(positions: &[Vec3], triangles: &[[u32; 3]]) -> Result<Vec<Vec3>> {
    check_triangles(positions.len(), triangles)?;
    Ok(compute_normals(positions, triangles))
}
