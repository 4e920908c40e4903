//! 单位对偶四元数（刚体变换）

use glam::{Mat4, Quat, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DualQuat {
    pub real: Quat,
    pub dual: Quat,
}

impl DualQuat {
    pub const IDENTITY: Self = Self {
        real: Quat::IDENTITY,
        dual: Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
    };

    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        let t = Quat::from_xyzw(translation.x, translation.y, translation.z, 0.0);
        Self {
            real: rotation,
            dual: t * rotation * 0.5,
        }
    }

    /// 忽略矩阵中的缩放
    pub fn from_mat4(m: &Mat4) -> Self {
        let (_, rotation, translation) = m.to_scale_rotation_translation();
        Self::from_rotation_translation(rotation.normalize(), translation)
    }

    pub fn translation(&self) -> Vec3 {
        let t = self.dual * self.real.conjugate() * 2.0;
        Vec3::new(t.x, t.y, t.z)
    }

    pub fn transform_point3(&self, p: Vec3) -> Vec3 {
        self.real * p + self.translation()
    }

    pub fn transform_vector3(&self, v: Vec3) -> Vec3 {
        self.real * v
    }

    /// 加权混合（DLB），与第一项同半球对齐后归一化；权重全为零时返回单位变换
    pub fn blend(items: impl IntoIterator<Item = (DualQuat, f32)>) -> DualQuat {
        let mut real = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        let mut dual = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        let mut pivot: Option<Quat> = None;
        for (dq, w) in items {
            let reference = *pivot.get_or_insert(dq.real);
            let w = if reference.dot(dq.real) < 0.0 { -w } else { w };
            real = real + dq.real * w;
            dual = dual + dq.dual * w;
        }
        let norm = real.length();
        if norm < 1e-8 {
            return DualQuat::IDENTITY;
        }
        DualQuat {
            real: real * (1.0 / norm),
            dual: dual * (1.0 / norm),
        }
    }
}
