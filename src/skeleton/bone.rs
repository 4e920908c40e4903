//! 骨骼节点

use glam::{Mat3, Mat4, Quat, Vec3};

use crate::blending::Aabb;
use crate::field::{
    BoneField, BoneKind, CapsuleField, FieldSample, FitError, HrbfField, HrbfPrimitive, InputSample,
    PrecomputedField,
};
use crate::{Result, SkinError};

/// 骨骼编号，即在骨架中的下标
pub type BoneId = usize;

/// 长度下限，退化骨骼被夹到该值
const MIN_LENGTH: f32 = 1e-6;

/// 一次 HRBF 拟合的结果：`Ok(None)` 表示采样为空，骨骼无场
pub type FitOutcome = std::result::Result<Option<HrbfField>, FitError>;

/// 对骨骼局部空间的采样做拟合，不修改任何骨骼
pub fn fit_local(samples: &InputSample) -> FitOutcome {
    if samples.is_empty() {
        return Ok(None);
    }
    HrbfField::fit(samples).map(Some)
}

/// 支撑半径必须为正的有限值
pub(crate) fn check_radius(bone: BoneId, radius: f32) -> Result<()> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(SkinError::InvalidRadius { bone, radius })
    }
}

/// 骨骼节点
///
/// 骨骼局部空间以 `origin` 为原点、`direction` 为 x 轴。
/// `transform` 是相对绑定姿态的世界变换，绑定姿态下为单位阵。
#[derive(Clone, Debug)]
pub struct Bone {
    id: BoneId,
    origin: Vec3,
    direction: Vec3,
    length: f32,
    /// 骨骼局部 -> 世界（绑定姿态）
    frame: Mat4,
    field: BoneField,
    transform: Mat4,
    // 缓存的逆变换
    rest_to_local: Mat4,
    world_to_local: Mat4,
}

impl Bone {
    pub fn new(id: BoneId, origin: Vec3, direction: Vec3, length: f32, field: BoneField) -> Self {
        let (direction, length) = match direction.try_normalize() {
            Some(dir) if length.is_finite() && length > MIN_LENGTH => (dir, length),
            Some(dir) => (dir, MIN_LENGTH),
            None => (Vec3::X, length.max(MIN_LENGTH)),
        };
        let frame = Mat4::from_rotation_translation(Quat::from_rotation_arc(Vec3::X, direction), origin);
        let rest_to_local = frame.inverse();
        Self {
            id,
            origin,
            direction,
            length,
            frame,
            field,
            transform: Mat4::IDENTITY,
            rest_to_local,
            world_to_local: rest_to_local,
        }
    }

    /// 尚无采样的 HRBF 骨骼
    pub fn hrbf(id: BoneId, origin: Vec3, direction: Vec3, length: f32, radius: f32) -> Self {
        Self::new(id, origin, direction, length, BoneField::Hrbf(HrbfPrimitive::new(radius)))
    }

    pub fn capsule(id: BoneId, origin: Vec3, direction: Vec3, length: f32, radius: f32, support: f32) -> Self {
        let mut bone = Self::new(id, origin, direction, length, BoneField::Hrbf(HrbfPrimitive::new(support)));
        bone.field = BoneField::Capsule(CapsuleField::new(bone.length, radius, support));
        bone
    }

    pub fn precomputed(id: BoneId, origin: Vec3, direction: Vec3, length: f32, grid: PrecomputedField) -> Self {
        Self::new(id, origin, direction, length, BoneField::Precomputed(grid))
    }

    pub fn id(&self) -> BoneId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: BoneId) {
        self.id = id;
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    /// 骨骼末端（绑定姿态）
    pub fn end(&self) -> Vec3 {
        self.origin + self.direction * self.length
    }

    pub fn frame(&self) -> Mat4 {
        self.frame
    }

    pub fn field(&self) -> &BoneField {
        &self.field
    }

    pub fn kind(&self) -> BoneKind {
        self.field.kind()
    }

    pub fn has_field(&self) -> bool {
        !self.field.is_empty()
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// 当前姿态下的骨骼局部 -> 世界
    pub fn current_frame(&self) -> Mat4 {
        self.transform * self.frame
    }

    pub(crate) fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
        self.world_to_local = (transform * self.frame).inverse();
    }

    /// 当前姿态下求值（世界空间）
    pub fn evaluate(&self, point: Vec3) -> FieldSample {
        Self::evaluate_through(&self.field, &self.world_to_local, point)
    }

    /// 绑定姿态下求值（世界空间）
    pub fn evaluate_rest(&self, point: Vec3) -> FieldSample {
        Self::evaluate_through(&self.field, &self.rest_to_local, point)
    }

    fn evaluate_through(field: &BoneField, to_local: &Mat4, point: Vec3) -> FieldSample {
        let s = field.evaluate_local(to_local.transform_point3(point));
        if s.is_empty() {
            return s;
        }
        // ∇(f ∘ W) = Wᵀ ∇f
        let gradient = Mat3::from_mat4(*to_local).transpose() * s.gradient;
        FieldSample::new(s.potential, gradient)
    }

    /// 绑定姿态下的世界空间支撑盒
    pub fn rest_bounds(&self) -> Option<Aabb> {
        self.field.local_bounds().map(|b| b.transformed(&self.frame))
    }

    /// 当前姿态下的世界空间支撑盒
    pub fn world_bounds(&self) -> Option<Aabb> {
        self.field
            .local_bounds()
            .map(|b| b.transformed(&self.current_frame()))
    }

    pub fn hrbf_radius(&self) -> Option<f32> {
        match &self.field {
            BoneField::Hrbf(prim) => Some(prim.radius()),
            _ => None,
        }
    }

    /// 骨骼局部空间中的采样（仅 HRBF 骨骼）
    pub fn samples(&self) -> Option<&InputSample> {
        match &self.field {
            BoneField::Hrbf(prim) => Some(prim.samples()),
            _ => None,
        }
    }

    /// 设置支撑半径
    ///
    /// HRBF 骨骼改变紧支撑半径，胶囊体骨骼改变表面半径；
    /// 预计算骨骼的半径已烘焙进网格，调用被忽略。
    pub fn set_radius(&mut self, radius: f32) -> Result<()> {
        check_radius(self.id, radius)?;
        match &mut self.field {
            BoneField::Hrbf(prim) => prim.radius = radius,
            BoneField::Capsule(capsule) => capsule.radius = radius,
            BoneField::Precomputed(_) => {
                log::warn!("骨骼 {} 为预计算场，忽略半径修改", self.id);
            }
        }
        Ok(())
    }

    /// 用绑定姿态世界空间中的采样重新拟合
    pub fn set_samples(&mut self, samples: &InputSample) -> std::result::Result<(), FitError> {
        let local = samples.transformed(&self.rest_to_local);
        self.set_local_samples(local)
    }

    /// 用骨骼局部空间中的采样重新拟合
    pub fn set_local_samples(&mut self, local: InputSample) -> std::result::Result<(), FitError> {
        let outcome = fit_local(&local);
        self.apply_fit(local, None, outcome)
    }

    /// 写入拟合结果
    ///
    /// 先求解后替换：求解失败（奇异、非有限）时保留原有采样、半径与场；
    /// 采样不足时记录采样与半径但清空场，直到补足采样。
    /// 非 HRBF 骨骼会被转换为 HRBF 骨骼。`radius` 须已通过 [`check_radius`]。
    pub(crate) fn apply_fit(
        &mut self,
        local: InputSample,
        radius: Option<f32>,
        outcome: FitOutcome,
    ) -> std::result::Result<(), FitError> {
        if let Err(ref e) = outcome {
            if !matches!(e, FitError::NotEnoughSamples(_)) {
                return Err(e.clone());
            }
        }

        let mut prim = HrbfPrimitive::new(radius.unwrap_or_else(|| self.default_hrbf_radius()));
        prim.set_samples(local);
        let result = match outcome {
            Ok(fitted) => {
                prim.fitted = fitted;
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.field = BoneField::Hrbf(prim);
        result
    }

    fn default_hrbf_radius(&self) -> f32 {
        match &self.field {
            BoneField::Hrbf(prim) => prim.radius(),
            BoneField::Capsule(capsule) => capsule.support,
            BoneField::Precomputed(_) => (self.length * 0.5).max(MIN_LENGTH),
        }
    }

    /// 把当前场烘焙成预计算网格骨骼，空场返回 None
    pub fn to_precomputed(&self, resolution: u32) -> Option<Bone> {
        let bounds = self.field.local_bounds()?;
        let field = &self.field;
        let grid = PrecomputedField::bake(bounds, resolution, |p| field.evaluate_local(p));
        let mut bone = Bone::precomputed(self.id, self.origin, self.direction, self.length, grid);
        bone.set_transform(self.transform);
        Some(bone)
    }
}
