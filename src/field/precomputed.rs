//! 预计算网格场
//!
//! 在骨骼局部空间的规则网格上存储势能与梯度，查询时对两者做三线性插值。

use glam::{UVec3, Vec3};
use rayon::prelude::*;

use super::FieldSample;
use crate::blending::Aabb;

/// 每轴节点数上限
const MAX_RESOLUTION: u32 = 128;

#[derive(Clone, Debug, PartialEq)]
pub struct PrecomputedField {
    bounds: Aabb,
    dims: UVec3,
    cell_size: Vec3,
    values: Vec<FieldSample>,
}

impl PrecomputedField {
    /// 在 `bounds` 内以每轴 `resolution` 个节点采样源场，节点数夹到 [2, MAX_RESOLUTION]
    pub fn bake<F>(bounds: Aabb, resolution: u32, source: F) -> Self
    where
        F: Fn(Vec3) -> FieldSample + Sync,
    {
        if resolution > MAX_RESOLUTION {
            log::warn!("预计算网格分辨率 {} 超过上限，使用 {}", resolution, MAX_RESOLUTION);
        }
        let res = resolution.clamp(2, MAX_RESOLUTION) as usize;
        let dims = UVec3::splat(res as u32);
        let extent = bounds.max - bounds.min;
        let cell_size = extent / (res - 1) as f32;

        let count = res * res * res;
        let values: Vec<FieldSample> = (0..count)
            .into_par_iter()
            .map(|idx| {
                let i = idx % res;
                let j = (idx / res) % res;
                let k = idx / (res * res);
                let p = bounds.min + Vec3::new(i as f32, j as f32, k as f32) * cell_size;
                let s = source(p);
                // 网格中不保存 -inf，空场一律视为基线
                if s.is_empty() {
                    FieldSample::ZERO
                } else {
                    s
                }
            })
            .collect();

        Self {
            bounds,
            dims,
            cell_size,
            values,
        }
    }

    /// 由已有节点数据构造，尺寸不符时返回 None
    ///
    /// 节点按 x 最快、z 最慢排列，与 [`values`](Self::values) 一致。
    pub fn from_parts(bounds: Aabb, dims: UVec3, values: Vec<FieldSample>) -> Option<Self> {
        let in_range = |n: u32| (2..=MAX_RESOLUTION).contains(&n);
        if !(in_range(dims.x) && in_range(dims.y) && in_range(dims.z)) {
            return None;
        }
        let extent = bounds.max - bounds.min;
        if !extent.is_finite() || extent.min_element() <= 0.0 {
            return None;
        }
        let count = dims.x as usize * dims.y as usize * dims.z as usize;
        if values.len() != count {
            return None;
        }
        Some(Self {
            bounds,
            dims,
            cell_size: extent / (dims - UVec3::ONE).as_vec3(),
            values,
        })
    }

    pub fn values(&self) -> &[FieldSample] {
        &self.values
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn resolution(&self) -> UVec3 {
        self.dims
    }

    fn node(&self, i: u32, j: u32, k: u32) -> FieldSample {
        let idx = (k * self.dims.y + j) * self.dims.x + i;
        self.values[idx as usize]
    }

    pub fn evaluate(&self, point: Vec3) -> FieldSample {
        if !self.bounds.contains(point) {
            return FieldSample::ZERO;
        }

        let local = (point - self.bounds.min) / self.cell_size;
        let max_cell = (self.dims - UVec3::ONE).as_vec3() - Vec3::splat(1e-4);
        let local = local.clamp(Vec3::ZERO, max_cell);
        let base = local.floor();
        let frac = local - base;
        let (i, j, k) = (base.x as u32, base.y as u32, base.z as u32);

        let mut potential = 0.0;
        let mut gradient = Vec3::ZERO;
        for corner in 0..8u32 {
            let di = corner & 1;
            let dj = (corner >> 1) & 1;
            let dk = (corner >> 2) & 1;
            let w = if di == 1 { frac.x } else { 1.0 - frac.x }
                * if dj == 1 { frac.y } else { 1.0 - frac.y }
                * if dk == 1 { frac.z } else { 1.0 - frac.z };
            if w == 0.0 {
                continue;
            }
            let s = self.node(i + di, j + dj, k + dk);
            potential += w * s.potential;
            gradient += w * s.gradient;
        }

        FieldSample::new(potential, gradient)
    }
}
