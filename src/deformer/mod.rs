//! 逐帧变形控制器
//!
//! 每帧依次执行：
//! 1. 用当前骨骼变换对静止姿态顶点做蒙皮
//! 2. 沿当前全局场梯度把顶点推回它在绑定姿态下的势能（基准势能）
//! 3. 可选的切向平滑，之后再做少量修正
//!
//! 三步都按顶点并行，期间骨架与混合环境只读。

mod config;
mod correction;
mod smoothing;

pub use config::{get_config, reset_config, set_config, DeformConfig};
pub use correction::{project_vertex, Correction};
pub use smoothing::tangential_smooth;

use glam::{Mat4, Quat, Vec3};
use rayon::prelude::*;

use crate::blending::{BlendConfig, BlendingEnv};
use crate::field::FieldSample;
use crate::model::SkinnedMesh;
use crate::sampling::{SampleSet, SampleSettings};
use crate::skeleton::{BoneId, FitReport, Skeleton};
use crate::skinning::{compute_skinning, SkinningInput};
use crate::Result;

/// 基准势能缓存，带有计算时的骨架与网格版本
#[derive(Clone, Debug, Default)]
struct BasePotential {
    values: Vec<FieldSample>,
    generation: u64,
    field_revision: u64,
    mesh_revision: u64,
    valid: bool,
}

/// 隐式蒙皮网格控制器
#[derive(Clone, Debug)]
pub struct AnimatedMesh {
    mesh: SkinnedMesh,
    skeleton: Skeleton,
    env: BlendingEnv,
    config: DeformConfig,
    base: BasePotential,
    skinned: Vec<Vec3>,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl AnimatedMesh {
    pub fn new(mesh: SkinnedMesh, skeleton: Skeleton) -> Result<Self> {
        Self::with_blend_config(mesh, skeleton, BlendConfig::default())
    }

    pub fn with_blend_config(mesh: SkinnedMesh, skeleton: Skeleton, blend: BlendConfig) -> Result<Self> {
        mesh.validate_bones(skeleton.nb_joints())?;
        let env = BlendingEnv::with_config(&skeleton, blend);
        let positions = mesh.positions().to_vec();
        let normals = mesh.normals().to_vec();
        let mut animated = Self {
            mesh,
            skeleton,
            env,
            config: get_config(),
            base: BasePotential::default(),
            skinned: positions.clone(),
            positions,
            normals,
        };
        animated.update_base_potential();
        Ok(animated)
    }

    pub fn mesh(&self) -> &SkinnedMesh {
        &self.mesh
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// 可变访问骨架；场或姿态的修改在下一次求值前自动同步
    pub fn skeleton_mut(&mut self) -> &mut Skeleton {
        &mut self.skeleton
    }

    pub fn env(&self) -> &BlendingEnv {
        &self.env
    }

    pub fn config(&self) -> &DeformConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: DeformConfig) {
        self.config = config;
    }

    pub fn set_do_smoothing(&mut self, enabled: bool) {
        self.config.do_smoothing = enabled;
    }

    pub fn set_blend_config(&mut self, blend: BlendConfig) {
        self.env.set_config(blend);
        self.base.valid = false;
    }

    /// 替换静止姿态网格（拓扑或顶点数变化），重新计算基准势能
    pub fn set_mesh(&mut self, mesh: SkinnedMesh) -> Result<()> {
        mesh.validate_bones(self.skeleton.nb_joints())?;
        self.positions = mesh.positions().to_vec();
        self.normals = mesh.normals().to_vec();
        self.skinned = self.positions.clone();
        self.mesh = mesh;
        self.base.valid = false;
        self.update_base_potential();
        Ok(())
    }

    /// 替换骨架，网格权重必须仍然有效
    pub fn set_skeleton(&mut self, skeleton: Skeleton) -> Result<()> {
        self.mesh.validate_bones(skeleton.nb_joints())?;
        self.skeleton = skeleton;
        self.env.rebuild(&self.skeleton);
        self.update_base_potential();
        Ok(())
    }

    /// 重新选择采样并拟合全部骨骼，然后更新基准势能
    pub fn resample(&mut self, settings: &SampleSettings) -> Result<FitReport> {
        let set = SampleSet::choose(&self.mesh, &self.skeleton, settings);
        let report = self.skeleton.fit_samples(&set)?;
        self.update_base_potential();
        Ok(report)
    }

    /// 设置骨骼相对绑定姿态的世界变换并通知混合环境
    pub fn set_transforms<I>(&mut self, transforms: I) -> Result<()>
    where
        I: IntoIterator<Item = (BoneId, Mat4)>,
    {
        self.skeleton.set_transforms(transforms)?;
        self.skeleton.update_bones_pose(&mut self.env);
        Ok(())
    }

    /// 由各关节的局部旋转设置姿态
    pub fn set_local_rotations(&mut self, rotations: &[(BoneId, Quat)]) -> Result<()> {
        self.skeleton.set_local_rotations(rotations)?;
        self.skeleton.update_bones_pose(&mut self.env);
        Ok(())
    }

    /// 基准势能是否与当前骨架、网格一致
    pub fn is_base_potential_valid(&self) -> bool {
        self.base.valid
            && self.base.generation == self.skeleton.generation()
            && self.base.field_revision == self.skeleton.field_revision()
            && self.base.mesh_revision == self.mesh.revision()
            && self.base.values.len() == self.mesh.vertex_count()
    }

    pub fn base_potential(&self) -> &[FieldSample] {
        &self.base.values
    }

    /// 用绑定姿态下的全局场重新计算每个顶点的基准势能
    pub fn update_base_potential(&mut self) {
        self.env.sync(&self.skeleton);
        let env = &self.env;
        let skeleton = &self.skeleton;
        let values: Vec<FieldSample> = self
            .mesh
            .positions()
            .par_iter()
            .map(|&p| env.evaluate_rest(skeleton, p))
            .collect();

        self.base = BasePotential {
            values,
            generation: skeleton.generation(),
            field_revision: skeleton.field_revision(),
            mesh_revision: self.mesh.revision(),
            valid: true,
        };
        log::debug!("基准势能已更新: {} 个顶点", self.base.values.len());
    }

    /// 当前帧的变形
    pub fn deform_mesh(&mut self) -> &[Vec3] {
        self.env.sync(&self.skeleton);
        if !self.is_base_potential_valid() {
            log::warn!("基准势能已过期，重新计算");
            self.update_base_potential();
        }

        let matrices: Vec<Mat4> = (0..self.skeleton.nb_joints())
            .map(|i| self.skeleton.transform(i))
            .collect();
        let skinned = compute_skinning(&SkinningInput {
            positions: self.mesh.positions(),
            normals: self.mesh.normals(),
            weights: self.mesh.weights(),
            bone_matrices: &matrices,
            kind: self.config.skinning,
        });

        let env = &self.env;
        let skeleton = &self.skeleton;
        let config = &self.config;
        let weights = self.mesh.weights();
        let base = &self.base.values;

        // 未绑定或没有有效目标的顶点保持蒙皮结果
        let movable: Vec<bool> = (0..skinned.positions.len())
            .map(|i| !weights[i].is_unbound() && !base[i].is_empty())
            .collect();

        let corrected: Vec<Correction> = skinned
            .positions
            .par_iter()
            .enumerate()
            .map(|(i, &p)| {
                if movable[i] {
                    project_vertex(env, skeleton, p, base[i].potential, config)
                } else {
                    Correction {
                        position: p,
                        gradient: Vec3::ZERO,
                        iterations: 0,
                        error: 0.0,
                    }
                }
            })
            .collect();

        let mut positions: Vec<Vec3> = corrected.iter().map(|c| c.position).collect();
        if config.do_smoothing && config.smoothing_iterations > 0 {
            let gradients: Vec<Vec3> = corrected.iter().map(|c| c.gradient).collect();
            tangential_smooth(
                &mut positions,
                &gradients,
                &movable,
                &self.mesh,
                config.smoothing_iterations,
                config.smoothing_strength,
            );

            if config.reproject_iterations > 0 {
                let reproject = DeformConfig {
                    max_correction_iterations: config.reproject_iterations,
                    ..config.clone()
                };
                positions = positions
                    .par_iter()
                    .enumerate()
                    .map(|(i, &p)| {
                        if movable[i] {
                            project_vertex(env, skeleton, p, base[i].potential, &reproject).position
                        } else {
                            p
                        }
                    })
                    .collect();
            }
        }

        self.skinned = skinned.positions;
        self.normals = skinned.normals;
        self.positions = positions;
        &self.positions
    }

    /// 最近一次变形的结果
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// 最近一次变形的蒙皮法线
    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// 最近一次变形中未经修正的蒙皮位置
    pub fn skinned_positions(&self) -> &[Vec3] {
        &self.skinned
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ISO_VALUE;
    use crate::SkinError;
    use crate::model::VertexWeight;
    use crate::skeleton::{AbsBone, AbsSkeleton, Bone};
    use crate::skinning::SkinningType;

    const TUBE_RADIUS: f32 = 0.25;

    /// 沿 x 轴 [0, 2] 的圆柱面，权重在 x ∈ [0.8, 1.2] 内线性过渡
    fn tube_mesh(rings: usize, segments: usize) -> SkinnedMesh {
        let mut positions = Vec::new();
        let mut weights = Vec::new();
        for i in 0..rings {
            let x = 2.0 * i as f32 / (rings - 1) as f32;
            let w = ((1.2 - x) / 0.4).clamp(0.0, 1.0);
            for k in 0..segments {
                let a = k as f32 * std::f32::consts::TAU / segments as f32;
                positions.push(Vec3::new(x, TUBE_RADIUS * a.cos(), TUBE_RADIUS * a.sin()));
                weights.push(VertexWeight::pair(1, 2, w));
            }
        }
        let mut triangles = Vec::new();
        for i in 0..rings - 1 {
            for k in 0..segments {
                let a = (i * segments + k) as u32;
                let b = (i * segments + (k + 1) % segments) as u32;
                let c = a + segments as u32;
                let d = b + segments as u32;
                triangles.push([a, b, d]);
                triangles.push([a, d, c]);
            }
        }
        SkinnedMesh::new(positions, weights, triangles).unwrap()
    }

    fn chain() -> Skeleton {
        Skeleton::load(&AbsSkeleton {
            bones: vec![
                AbsBone::new("root", Mat4::IDENTITY, 0.0),
                AbsBone::new("upper", Mat4::IDENTITY, 1.0),
                AbsBone::new("lower", Mat4::from_translation(Vec3::X), 1.0),
            ],
            parents: vec![-1, 0, 1],
        })
        .unwrap()
    }

    fn capsule_chain() -> Skeleton {
        let mut skel = chain();
        for i in 1..3 {
            let b = skel.bone(i);
            let capsule = Bone::capsule(i, b.origin(), b.direction(), b.length(), TUBE_RADIUS, 0.4);
            skel.set_bone(i, capsule).unwrap();
        }
        skel
    }

    fn distance_to_segment(p: Vec3, a: Vec3, b: Vec3) -> f32 {
        let ab = b - a;
        let t = ((p - a).dot(ab) / ab.length_squared()).clamp(0.0, 1.0);
        p.distance(a + ab * t)
    }

    /// 弯曲 90° 后到两段骨骼线段的最近距离
    fn distance_to_bent_skeleton(p: Vec3) -> f32 {
        let upper = distance_to_segment(p, Vec3::ZERO, Vec3::X);
        let lower = distance_to_segment(p, Vec3::X, Vec3::new(1.0, 1.0, 0.0));
        upper.min(lower)
    }

    fn bend(animated: &mut AnimatedMesh) {
        let q = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        animated.set_local_rotations(&[(2, q)]).unwrap();
    }

    #[test]
    fn test_base_potential_is_idempotent() {
        let mut animated = AnimatedMesh::new(tube_mesh(21, 12), capsule_chain()).unwrap();
        let first = animated.base_potential().to_vec();
        animated.update_base_potential();
        assert_eq!(animated.base_potential(), &first[..]);
        assert!(animated.is_base_potential_valid());
    }

    #[test]
    fn test_base_potential_goes_stale_on_field_change() {
        let mut animated = AnimatedMesh::new(tube_mesh(21, 12), capsule_chain()).unwrap();
        animated.skeleton_mut().set_bone_radius(1, 0.3).unwrap();
        assert!(!animated.is_base_potential_valid());
        animated.deform_mesh();
        assert!(animated.is_base_potential_valid());
    }

    #[test]
    fn test_rest_pose_is_fixed_point() {
        // 已在目标等值面上的顶点不应移动
        let mut animated = AnimatedMesh::new(tube_mesh(21, 12), capsule_chain()).unwrap();
        animated.set_do_smoothing(false);
        let rest = animated.mesh().positions().to_vec();
        let out = animated.deform_mesh().to_vec();
        for (a, b) in rest.iter().zip(&out) {
            assert!(a.distance(*b) < 1e-3, "{:?} moved to {:?}", a, b);
        }
    }

    #[test]
    fn test_vertex_on_target_needs_no_iterations() {
        let skel = capsule_chain();
        let env = BlendingEnv::new(&skel);
        let p = Vec3::new(0.3, TUBE_RADIUS, 0.0);
        let target = env.evaluate(&skel, p).potential;
        let c = project_vertex(&env, &skel, p, target, &DeformConfig::default());
        assert_eq!(c.iterations, 0);
        assert_eq!(c.position, p);
    }

    #[test]
    fn test_correction_reaches_target() {
        let skel = capsule_chain();
        let env = BlendingEnv::new(&skel);
        let start = Vec3::new(0.4, 0.1, 0.0);
        let c = project_vertex(&env, &skel, start, ISO_VALUE, &DeformConfig::default());
        assert!(c.error < 1e-3);
        assert!((c.position.y - TUBE_RADIUS).abs() < 1e-2);
    }

    #[test]
    fn test_unweighted_vertices_pass_through() {
        let mut mesh = tube_mesh(11, 8);
        let mut weights = mesh.weights().to_vec();
        weights[0] = VertexWeight::default();
        mesh.set_weights(weights).unwrap();
        let rest0 = mesh.positions()[0];
        let rest5 = mesh.positions()[5];

        let mut animated = AnimatedMesh::new(mesh, capsule_chain()).unwrap();
        animated
            .set_transforms([(1, Mat4::from_translation(Vec3::Z)), (2, Mat4::from_translation(Vec3::Z))])
            .unwrap();
        let out = animated.deform_mesh();
        assert_eq!(out[0], rest0);
        assert!((out[5].z - rest5.z - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_mesh_with_unknown_bone_is_rejected() {
        let mut mesh = tube_mesh(5, 6);
        let mut weights = mesh.weights().to_vec();
        weights[3] = VertexWeight::single(7);
        mesh.set_weights(weights).unwrap();
        assert!(matches!(
            AnimatedMesh::new(mesh, capsule_chain()),
            Err(SkinError::MeshMismatch(_))
        ));
    }

    #[test]
    fn test_capsule_bend_reduces_joint_error() {
        let mut animated = AnimatedMesh::new(tube_mesh(41, 16), capsule_chain()).unwrap();
        let mut config = animated.config().clone();
        config.skinning = SkinningType::Linear;
        animated.set_config(config);
        bend(&mut animated);
        animated.deform_mesh();

        let rotation = Mat4::from_translation(Vec3::X)
            * Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2)
            * Mat4::from_translation(-Vec3::X);
        let (mut lbs_err, mut fixed_err, mut count) = (0.0, 0.0, 0);
        for (i, rest) in animated.mesh().positions().iter().enumerate() {
            let out = animated.positions()[i];
            if rest.x > 1.4 && rest.x < 1.8 {
                // 下臂中段随骨骼刚性转动
                let expected = rotation.transform_point3(*rest);
                assert!(out.distance(expected) < 0.03, "{:?} vs {:?}", out, expected);
            }
            if (rest.x - 1.0).abs() > 0.15 {
                continue;
            }
            lbs_err += (distance_to_bent_skeleton(animated.skinned_positions()[i]) - TUBE_RADIUS).abs();
            fixed_err += (distance_to_bent_skeleton(out) - TUBE_RADIUS).abs();
            count += 1;
        }
        assert!(count > 0);
        assert!(fixed_err < lbs_err * 0.5, "corrected {} vs skinned {}", fixed_err, lbs_err);
    }

    #[test]
    fn test_two_bone_scenario() {
        let mut animated = AnimatedMesh::new(tube_mesh(41, 16), chain()).unwrap();
        let settings = SampleSettings {
            min_sample_distance: 0.12,
            ..Default::default()
        };
        let set = SampleSet::choose(animated.mesh(), animated.skeleton(), &settings);

        // 上臂的采样不进入下臂的关节半径
        let junction = set.junction_radii[&2];
        for p in &set.samples[&1].positions {
            assert!(distance_to_segment(*p, Vec3::X, Vec3::new(2.0, 0.0, 0.0)) >= junction);
        }

        let report = animated.resample(&settings).unwrap();
        assert_eq!(report.fitted, vec![1, 2]);
        assert!(animated.is_base_potential_valid());

        let mut config = animated.config().clone();
        config.skinning = SkinningType::Linear;
        animated.set_config(config);
        bend(&mut animated);
        assert!(animated.deform_mesh().iter().all(|p| p.is_finite()));

        let bent_lower = |p: Vec3| distance_to_segment(p, Vec3::X, Vec3::new(1.0, 1.0, 0.0));
        let (mut lbs_err, mut fixed_err, mut count) = (0.0, 0.0, 0);
        for (i, rest) in animated.mesh().positions().iter().enumerate() {
            let out = animated.positions()[i];
            if rest.x > 1.5 && rest.x < 1.8 {
                // 下臂中段到下臂骨骼的距离保持不变
                let d = bent_lower(out);
                assert!((d - TUBE_RADIUS).abs() < 0.05, "{:?} at distance {}", out, d);
            }
            if (rest.x - 1.0).abs() <= 0.15 {
                lbs_err += (distance_to_bent_skeleton(animated.skinned_positions()[i]) - TUBE_RADIUS).abs();
                fixed_err += (distance_to_bent_skeleton(out) - TUBE_RADIUS).abs();
                count += 1;
            }
        }
        assert!(count > 0);
        assert!(fixed_err < lbs_err, "corrected {} vs skinned {}", fixed_err, lbs_err);
    }
}
