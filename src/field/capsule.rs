//! 胶囊体场（沿骨骼 x 轴的线段加半径）

use glam::Vec3;

use super::{to_compact, FieldSample};
use crate::blending::Aabb;

/// 胶囊体场，局部空间中线段从原点沿 +x 延伸 `length`
#[derive(Clone, Debug, PartialEq)]
pub struct CapsuleField {
    pub length: f32,
    /// 胶囊体表面半径
    pub radius: f32,
    /// 紧支撑半径（表面到势能为 0 处的距离）
    pub support: f32,
}

impl CapsuleField {
    pub fn new(length: f32, radius: f32, support: f32) -> Self {
        Self {
            length,
            radius,
            support,
        }
    }

    pub fn evaluate(&self, point: Vec3) -> FieldSample {
        let t = point.x.clamp(0.0, self.length);
        let offset = point - Vec3::new(t, 0.0, 0.0);
        let dist = offset.length();
        // 轴线上的点取任意垂直方向
        let direction = if dist > 1e-7 { offset / dist } else { Vec3::Y };
        to_compact(dist - self.radius, direction, self.support)
    }

    pub fn bounds(&self) -> Aabb {
        let r = self.radius + self.support;
        Aabb {
            min: Vec3::splat(-r),
            max: Vec3::new(self.length + r, r, r),
        }
    }
}
