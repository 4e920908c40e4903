//! 包围盒与骨骼空间索引

use glam::{Mat4, Vec3};

/// 轴对齐包围盒
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// 变换后 8 个角点的包围盒
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        let mut out = Aabb::empty();
        for corner in 0..8 {
            let p = Vec3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow(m.transform_point3(p));
        }
        out
    }
}

/// 单轴最大格子数
const MAX_CELLS_PER_AXIS: usize = 16;

/// 骨骼支撑包围盒的均匀网格索引
///
/// 查询点落入的格子只列出与之相交的骨骼，再逐个检查包围盒。
#[derive(Clone, Debug, Default)]
pub struct SpatialIndex {
    bounds: Aabb,
    dims: [usize; 3],
    cell_size: Vec3,
    cells: Vec<Vec<usize>>,
    boxes: Vec<Option<Aabb>>,
}

impl SpatialIndex {
    /// `boxes[i]` 为骨骼 i 的世界空间支撑盒，None 表示无场
    pub fn build(boxes: Vec<Option<Aabb>>) -> Self {
        let mut bounds = Aabb::empty();
        for b in boxes.iter().flatten() {
            bounds = bounds.union(b);
        }
        if bounds.is_empty() {
            return Self {
                boxes,
                ..Default::default()
            };
        }

        let extent = (bounds.max - bounds.min).max(Vec3::splat(1e-6));
        let longest = extent.max_element();
        let mut dims = [1usize; 3];
        for axis in 0..3 {
            let n = (extent[axis] / longest * MAX_CELLS_PER_AXIS as f32).ceil() as usize;
            dims[axis] = n.clamp(1, MAX_CELLS_PER_AXIS);
        }
        let cell_size = extent / Vec3::new(dims[0] as f32, dims[1] as f32, dims[2] as f32);

        let mut cells = vec![Vec::new(); dims[0] * dims[1] * dims[2]];
        let mut index = Self {
            bounds,
            dims,
            cell_size,
            cells: Vec::new(),
            boxes,
        };
        for (bone, b) in index.boxes.iter().enumerate() {
            let Some(b) = b else { continue };
            let lo = index.cell_coord(b.min);
            let hi = index.cell_coord(b.max);
            for k in lo[2]..=hi[2] {
                for j in lo[1]..=hi[1] {
                    for i in lo[0]..=hi[0] {
                        cells[(k * dims[1] + j) * dims[0] + i].push(bone);
                    }
                }
            }
        }
        index.cells = cells;
        index
    }

    fn cell_coord(&self, p: Vec3) -> [usize; 3] {
        let local = (p - self.bounds.min) / self.cell_size;
        let mut c = [0usize; 3];
        for axis in 0..3 {
            c[axis] = (local[axis].max(0.0) as usize).min(self.dims[axis] - 1);
        }
        c
    }

    /// 支撑盒包含 `p` 的骨骼
    pub fn query(&self, p: Vec3) -> impl Iterator<Item = usize> + '_ {
        let cell: &[usize] = if self.cells.is_empty() || !self.bounds.contains(p) {
            &[]
        } else {
            let c = self.cell_coord(p);
            &self.cells[(c[2] * self.dims[1] + c[1]) * self.dims[0] + c[0]]
        };
        cell.iter()
            .copied()
            .filter(move |&bone| self.boxes[bone].map_or(false, |b| b.contains(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_returns_overlapping_boxes() {
        let boxes = vec![
            None,
            Some(Aabb { min: Vec3::ZERO, max: Vec3::ONE }),
            Some(Aabb { min: Vec3::splat(0.5), max: Vec3::splat(2.0) }),
        ];
        let index = SpatialIndex::build(boxes);

        let mut hits: Vec<usize> = index.query(Vec3::splat(0.75)).collect();
        hits.sort();
        assert_eq!(hits, vec![1, 2]);
        assert_eq!(index.query(Vec3::splat(1.5)).collect::<Vec<_>>(), vec![2]);
        assert_eq!(index.query(Vec3::splat(5.0)).count(), 0);
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(vec![None, None]);
        assert_eq!(index.query(Vec3::ZERO).count(), 0);
    }

    #[test]
    fn test_transformed_box() {
        let b = Aabb { min: Vec3::ZERO, max: Vec3::ONE };
        let t = b.transformed(&Mat4::from_translation(Vec3::X));
        assert_eq!(t.min, Vec3::X);
        assert_eq!(t.max, Vec3::new(2.0, 1.0, 1.0));
    }
}
