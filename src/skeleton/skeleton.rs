//! 骨架：骨骼树、关节混合参数与姿态传播

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Quat, Vec3};
use rayon::prelude::*;

use super::bone::{check_radius, fit_local, Bone, BoneId, FitOutcome};
use super::hierarchy::AbsSkeleton;
use crate::blending::{BlendingEnv, Controller, JointBlending};
use crate::field::{BoneKind, FieldSample, FitError, InputSample};
use crate::sampling::SampleSet;
use crate::{Result, SkinError};

/// 骨架代数计数器，每次加载取一个新值
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// 默认的 HRBF 支撑半径与骨骼长度之比
const DEFAULT_RADIUS_RATIO: f32 = 0.5;

/// 关节：骨骼 + 层级关系 + 与子树混合的参数
#[derive(Clone, Debug)]
pub struct SkeletonJoint {
    name: String,
    parent: i32,
    children: Vec<BoneId>,
    bone: Bone,
    blending: JointBlending,
    controller: Controller,
    bulge_magnitude: f32,
}

/// 骨架
///
/// 骨骼按下标存放，父骨骼下标总小于子骨骼，0 号为根。
#[derive(Clone, Debug)]
pub struct Skeleton {
    joints: Vec<SkeletonJoint>,
    order: Vec<BoneId>,
    generation: u64,
    field_revision: u64,
    pose_revision: u64,
}

/// 一批并行拟合的结果，带有发起时的骨架代数
#[derive(Debug)]
pub struct FitBatch {
    generation: u64,
    jobs: Vec<FitJob>,
}

#[derive(Debug)]
struct FitJob {
    bone: BoneId,
    radius: Option<f32>,
    local: InputSample,
    outcome: FitOutcome,
}

impl FitBatch {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// 拟合结果汇总
#[derive(Debug, Default)]
pub struct FitReport {
    /// 成功拟合出场的骨骼
    pub fitted: Vec<BoneId>,
    /// 采样为空的骨骼
    pub empty: Vec<BoneId>,
    pub failed: Vec<(BoneId, FitError)>,
    /// 骨架已重新加载，整批结果被丢弃
    pub discarded: bool,
}

impl Skeleton {
    /// 由抽象层级构造骨架，所有骨骼为尚无采样的 HRBF 骨骼
    pub fn load(abs: &AbsSkeleton) -> Result<Self> {
        abs.validate()?;

        let n = abs.bones.len();
        let mut joints: Vec<SkeletonJoint> = abs
            .bones
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let radius = (b.length * DEFAULT_RADIUS_RATIO).max(1e-3);
                SkeletonJoint {
                    name: b.name.clone(),
                    parent: abs.parents[i],
                    children: Vec::new(),
                    bone: Bone::hrbf(i, b.origin(), b.direction(), b.length, radius),
                    blending: JointBlending::default(),
                    controller: Controller::default(),
                    bulge_magnitude: 0.0,
                }
            })
            .collect();
        for i in 1..n {
            let parent = joints[i].parent as usize;
            joints[parent].children.push(i);
        }

        // 父索引小于子索引，自然顺序即父先子后
        let order = (0..n).collect();
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        log::info!("骨架加载完成: {} 根骨骼, 代数 {}", n, generation);

        Ok(Self {
            joints,
            order,
            generation,
            field_revision: 0,
            pose_revision: 0,
        })
    }

    /// 整体替换为新的层级，失败时保持原骨架不变
    pub fn reload(&mut self, abs: &AbsSkeleton) -> Result<()> {
        let fresh = Self::load(abs)?;
        *self = fresh;
        Ok(())
    }

    fn check(&self, bone: BoneId) -> Result<()> {
        if bone < self.joints.len() {
            Ok(())
        } else {
            Err(SkinError::UnknownBone(bone))
        }
    }

    // ---- 查询 ----

    pub fn nb_joints(&self) -> usize {
        self.joints.len()
    }

    pub fn root(&self) -> BoneId {
        0
    }

    /// 父先子后的遍历顺序
    pub fn order(&self) -> &[BoneId] {
        &self.order
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn field_revision(&self) -> u64 {
        self.field_revision
    }

    pub fn pose_revision(&self) -> u64 {
        self.pose_revision
    }

    pub fn name(&self, bone: BoneId) -> &str {
        &self.joints[bone].name
    }

    pub fn find_bone_by_name(&self, name: &str) -> Option<BoneId> {
        self.joints.iter().position(|j| j.name == name)
    }

    pub fn parent(&self, bone: BoneId) -> Option<BoneId> {
        let p = self.joints[bone].parent;
        (p >= 0).then_some(p as usize)
    }

    pub fn children(&self, bone: BoneId) -> &[BoneId] {
        &self.joints[bone].children
    }

    pub fn is_leaf(&self, bone: BoneId) -> bool {
        self.joints[bone].children.is_empty()
    }

    pub fn is_bone(&self, bone: BoneId) -> bool {
        bone < self.joints.len()
    }

    pub fn bone(&self, bone: BoneId) -> &Bone {
        &self.joints[bone].bone
    }

    pub fn bones(&self) -> impl Iterator<Item = &Bone> {
        self.joints.iter().map(|j| &j.bone)
    }

    pub fn bone_type(&self, bone: BoneId) -> BoneKind {
        self.joints[bone].bone.kind()
    }

    pub fn joint_blending(&self, bone: BoneId) -> JointBlending {
        self.joints[bone].blending
    }

    pub fn joint_controller(&self, bone: BoneId) -> &Controller {
        &self.joints[bone].controller
    }

    pub fn joint_bulge_magnitude(&self, bone: BoneId) -> f32 {
        self.joints[bone].bulge_magnitude
    }

    pub fn hrbf_radius(&self, bone: BoneId) -> Option<f32> {
        self.joints[bone].bone.hrbf_radius()
    }

    pub fn transform(&self, bone: BoneId) -> Mat4 {
        self.joints[bone].bone.transform()
    }

    /// 只读的单骨骼求值句柄
    pub fn bone_handle(&self, bone: BoneId) -> Option<BoneHandle<'_>> {
        self.is_bone(bone).then_some(BoneHandle { skeleton: self, id: bone })
    }

    // ---- 关节参数 ----

    pub fn set_joint_blending(&mut self, bone: BoneId, blending: JointBlending) -> Result<()> {
        self.check(bone)?;
        self.joints[bone].blending = blending;
        self.field_revision += 1;
        Ok(())
    }

    pub fn set_joint_controller(&mut self, bone: BoneId, controller: impl Into<Controller>) -> Result<()> {
        self.check(bone)?;
        self.joints[bone].controller = controller.into();
        self.field_revision += 1;
        Ok(())
    }

    /// 鼓包幅度，夹到 [0, 1]
    pub fn set_joint_bulge_mag(&mut self, bone: BoneId, magnitude: f32) -> Result<()> {
        self.check(bone)?;
        self.joints[bone].bulge_magnitude = if magnitude.is_finite() {
            magnitude.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.field_revision += 1;
        Ok(())
    }

    // ---- 骨骼场 ----

    pub fn set_bone_hrbf_radius(&mut self, bone: BoneId, radius: f32) -> Result<()> {
        self.check(bone)?;
        if self.joints[bone].bone.kind() != BoneKind::Hrbf {
            log::warn!("骨骼 {} 不是 HRBF 骨骼，忽略支撑半径", bone);
            return Ok(());
        }
        self.joints[bone].bone.set_radius(radius)?;
        self.field_revision += 1;
        Ok(())
    }

    /// 胶囊体骨骼的表面半径
    pub fn set_bone_radius(&mut self, bone: BoneId, radius: f32) -> Result<()> {
        self.check(bone)?;
        self.joints[bone].bone.set_radius(radius)?;
        self.field_revision += 1;
        Ok(())
    }

    /// 整体替换一根骨骼，保留当前姿态
    pub fn set_bone(&mut self, bone: BoneId, mut replacement: Bone) -> Result<()> {
        self.check(bone)?;
        replacement.set_id(bone);
        replacement.set_transform(self.joints[bone].bone.transform());
        self.joints[bone].bone = replacement;
        self.field_revision += 1;
        Ok(())
    }

    /// 用绑定姿态世界空间采样重新拟合一根骨骼
    pub fn set_bone_samples(&mut self, bone: BoneId, samples: &InputSample) -> Result<()> {
        self.check(bone)?;
        let result = self.joints[bone].bone.set_samples(samples);
        self.field_revision += 1;
        result.map_err(SkinError::from)
    }

    /// 把一根骨骼的场烘焙为预计算网格
    pub fn precompute_bone(&mut self, bone: BoneId, resolution: u32) -> Result<bool> {
        self.check(bone)?;
        match self.joints[bone].bone.to_precomputed(resolution) {
            Some(baked) => {
                self.joints[bone].bone = baked;
                self.field_revision += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---- 并行拟合 ----

    /// 基于当前骨架快照并行拟合，不修改骨架
    pub fn prepare_fits(&self, set: &SampleSet) -> Result<FitBatch> {
        for &bone in set.samples.keys() {
            self.check(bone)?;
        }

        let jobs = set
            .samples
            .par_iter()
            .map(|(&bone, samples)| {
                let local = samples.transformed(&self.joints[bone].bone.frame().inverse());
                let outcome = fit_local(&local);
                FitJob {
                    bone,
                    radius: set.hrbf_radii.get(&bone).copied(),
                    local,
                    outcome,
                }
            })
            .collect();

        Ok(FitBatch {
            generation: self.generation,
            jobs,
        })
    }

    /// 写入一批拟合结果；骨架在此期间被重新加载时整批丢弃
    pub fn apply_fits(&mut self, batch: FitBatch) -> Result<FitReport> {
        let mut report = FitReport::default();
        if batch.generation != self.generation {
            log::warn!(
                "丢弃过期的拟合结果: 批次代数 {}, 当前代数 {}",
                batch.generation,
                self.generation
            );
            report.discarded = true;
            return Ok(report);
        }

        // 半径先整体校验，非法时整批不写入
        for job in &batch.jobs {
            if let Some(radius) = job.radius {
                check_radius(job.bone, radius)?;
            }
        }

        let mut written = false;
        for job in batch.jobs {
            let bone = &mut self.joints[job.bone].bone;
            let was_empty = job.local.is_empty();
            match bone.apply_fit(job.local, job.radius, job.outcome) {
                Ok(()) if was_empty => {
                    written = true;
                    report.empty.push(job.bone);
                }
                Ok(()) => {
                    written = true;
                    log::debug!("骨骼 {} 拟合完成", job.bone);
                    report.fitted.push(job.bone);
                }
                Err(e) => {
                    // 采样不足时新采样已写入
                    written |= matches!(e, FitError::NotEnoughSamples(_));
                    log::warn!("骨骼 {} 拟合失败: {}", job.bone, e);
                    report.failed.push((job.bone, e));
                }
            }
        }
        if written {
            self.field_revision += 1;
        }

        log::info!(
            "HRBF 拟合: {} 成功, {} 无采样, {} 失败",
            report.fitted.len(),
            report.empty.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// 为采样集合中的每根骨骼拟合 HRBF
    pub fn fit_samples(&mut self, set: &SampleSet) -> Result<FitReport> {
        let batch = self.prepare_fits(set)?;
        self.apply_fits(batch)
    }

    // ---- 姿态 ----

    /// 设置骨骼相对绑定姿态的世界变换；任一编号非法时不做任何修改
    pub fn set_transforms<I>(&mut self, transforms: I) -> Result<()>
    where
        I: IntoIterator<Item = (BoneId, Mat4)>,
    {
        let transforms: Vec<(BoneId, Mat4)> = transforms.into_iter().collect();
        for &(bone, _) in &transforms {
            self.check(bone)?;
        }
        for (bone, m) in transforms {
            self.joints[bone].bone.set_transform(m);
        }
        self.pose_revision += 1;
        Ok(())
    }

    /// 由各关节绕自身原点的旋转推出世界变换，父先子后传播
    ///
    /// 未给出的关节视为不旋转。
    pub fn set_local_rotations(&mut self, rotations: &[(BoneId, Quat)]) -> Result<()> {
        let mut local = vec![Quat::IDENTITY; self.joints.len()];
        for &(bone, q) in rotations {
            self.check(bone)?;
            local[bone] = q;
        }

        let mut world = vec![Mat4::IDENTITY; self.joints.len()];
        for &i in &self.order {
            let origin = self.joints[i].bone.origin();
            let pivot = Mat4::from_translation(origin)
                * Mat4::from_quat(local[i])
                * Mat4::from_translation(-origin);
            world[i] = match self.parent(i) {
                Some(p) => world[p] * pivot,
                None => pivot,
            };
        }
        self.set_transforms(world.into_iter().enumerate())
    }

    /// 通知混合环境姿态已更新
    pub fn update_bones_pose(&self, env: &mut BlendingEnv) {
        env.sync(self);
    }

    /// 回到绑定姿态
    pub fn reset(&mut self) {
        for joint in &mut self.joints {
            joint.bone.set_transform(Mat4::IDENTITY);
        }
        self.pose_revision += 1;
    }
}

/// 单根骨骼的只读求值句柄，供外部等值面提取使用
#[derive(Clone, Copy)]
pub struct BoneHandle<'a> {
    skeleton: &'a Skeleton,
    id: BoneId,
}

impl<'a> BoneHandle<'a> {
    pub fn id(&self) -> BoneId {
        self.id
    }

    pub fn bone(&self) -> &'a Bone {
        self.skeleton.bone(self.id)
    }

    /// 当前姿态下的势能与梯度
    pub fn evaluate(&self, point: Vec3) -> FieldSample {
        self.bone().evaluate(point)
    }

    pub fn evaluate_rest(&self, point: Vec3) -> FieldSample {
        self.bone().evaluate_rest(point)
    }

    pub fn bounds(&self) -> Option<crate::blending::Aabb> {
        self.bone().world_bounds()
    }
}
