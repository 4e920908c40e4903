//! HRBF 输入采样

use glam::{Mat3, Mat4, Vec3};

use crate::blending::Aabb;

/// 一根骨骼的采样点集合（骨骼局部静止空间中的 位置 + 法线）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputSample {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

impl InputSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个采样点，法线会被归一化
    pub fn push_sample(&mut self, position: Vec3, normal: Vec3) {
        self.positions.push(position);
        self.normals.push(normal.normalize_or_zero());
    }

    /// 追加另一组采样
    pub fn append(&mut self, other: &InputSample) {
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
        self.positions.iter().copied().zip(self.normals.iter().copied())
    }

    /// 用新的坐标系重新表达所有采样
    ///
    /// 位置按点变换，法线按逆转置矩阵变换后重新归一化。
    pub fn transform(&mut self, matrix: &Mat4) {
        let normal_matrix = Mat3::from_mat4(*matrix).inverse().transpose();
        for p in &mut self.positions {
            *p = matrix.transform_point3(*p);
        }
        for n in &mut self.normals {
            *n = (normal_matrix * *n).normalize_or_zero();
        }
    }

    /// 返回变换后的副本
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let mut out = self.clone();
        out.transform(matrix);
        out
    }

    /// 采样点的包围盒
    pub fn bounds(&self) -> Option<Aabb> {
        if self.positions.is_empty() {
            return None;
        }
        let mut aabb = Aabb::empty();
        for p in &self.positions {
            aabb.grow(*p);
        }
        Some(aabb)
    }
}
