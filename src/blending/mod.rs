//! 混合环境：把各骨骼的场按骨架树组合成一个全局场
//!
//! 组合沿骨架树自叶向根进行：每个关节用自己的混合类型、控制曲线与鼓包幅度，
//! 把本骨骼的场与各子树已组合好的场依次混合。
//! 环境本身不持有任何几何，只缓存遍历顺序和空间索引，
//! 求值时显式传入骨架。

mod controller;
mod operator;
mod spatial;

pub use controller::{preset, Controller, ControllerShape};
pub use operator::{blend, saturated_cosine, JointBlending};
pub use spatial::{Aabb, SpatialIndex};

use std::cell::RefCell;

use glam::Vec3;

use crate::field::FieldSample;
use crate::skeleton::Skeleton;

// 每个线程复用的组合缓冲
thread_local! {
    static COMPOSE_BUFFER: RefCell<Vec<FieldSample>> = RefCell::new(Vec::new());
}

/// 混合环境配置
#[derive(Clone, Debug)]
pub struct BlendConfig {
    /// 控制曲线输出为 1 时的混合区宽度（势能单位）
    pub max_opening: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self { max_opening: 0.35 }
    }
}

/// 求值使用的骨骼姿态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pose {
    /// 绑定姿态
    Rest,
    /// 最近一次 `update_bones_pose` 的姿态
    Current,
}

/// 全局场求值上下文
///
/// 每个加载的骨架构造一个，显式传给每次求值调用。
#[derive(Clone, Debug, Default)]
pub struct BlendingEnv {
    config: BlendConfig,
    generation: u64,
    field_revision: u64,
    pose_revision: u64,
    rest_index: SpatialIndex,
    pose_index: SpatialIndex,
}

impl BlendingEnv {
    pub fn new(skeleton: &Skeleton) -> Self {
        Self::with_config(skeleton, BlendConfig::default())
    }

    pub fn with_config(skeleton: &Skeleton, config: BlendConfig) -> Self {
        let mut env = Self {
            config,
            ..Default::default()
        };
        env.rebuild(skeleton);
        env
    }

    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: BlendConfig) {
        self.config = config;
    }

    /// 骨骼场或关节参数变化后重建全部缓存
    pub fn rebuild(&mut self, skeleton: &Skeleton) {
        let rest_boxes = (0..skeleton.nb_joints())
            .map(|i| skeleton.bone(i).rest_bounds())
            .collect();
        self.rest_index = SpatialIndex::build(rest_boxes);
        self.generation = skeleton.generation();
        self.field_revision = skeleton.field_revision();
        self.update_pose(skeleton);
    }

    /// 骨骼姿态变化：只重建姿态空间索引
    pub fn update_pose(&mut self, skeleton: &Skeleton) {
        let pose_boxes = (0..skeleton.nb_joints())
            .map(|i| skeleton.bone(i).world_bounds())
            .collect();
        self.pose_index = SpatialIndex::build(pose_boxes);
        self.pose_revision = skeleton.pose_revision();
    }

    pub fn is_synced(&self, skeleton: &Skeleton) -> bool {
        self.generation == skeleton.generation()
            && self.field_revision == skeleton.field_revision()
            && self.pose_revision == skeleton.pose_revision()
    }

    /// 与骨架状态对齐，返回是否发生了重建
    pub fn sync(&mut self, skeleton: &Skeleton) -> bool {
        if self.generation != skeleton.generation() || self.field_revision != skeleton.field_revision() {
            self.rebuild(skeleton);
            true
        } else if self.pose_revision != skeleton.pose_revision() {
            self.update_pose(skeleton);
            true
        } else {
            false
        }
    }

    /// 当前姿态下的全局势能与梯度
    pub fn evaluate(&self, skeleton: &Skeleton, point: Vec3) -> FieldSample {
        self.evaluate_pose(skeleton, point, Pose::Current)
    }

    /// 绑定姿态下的全局势能与梯度
    pub fn evaluate_rest(&self, skeleton: &Skeleton, point: Vec3) -> FieldSample {
        self.evaluate_pose(skeleton, point, Pose::Rest)
    }

    pub fn evaluate_pose(&self, skeleton: &Skeleton, point: Vec3, pose: Pose) -> FieldSample {
        if skeleton.nb_joints() == 0 {
            return FieldSample::EMPTY;
        }

        let index = match pose {
            Pose::Rest => &self.rest_index,
            Pose::Current => &self.pose_index,
        };
        let mut hits = index.query(point).peekable();
        if hits.peek().is_none() {
            // 基线与基线混合仍是基线
            return if skeleton.bones().any(|b| b.has_field()) {
                FieldSample::ZERO
            } else {
                FieldSample::EMPTY
            };
        }

        COMPOSE_BUFFER.with(|buf| {
            let mut values = buf.borrow_mut();
            values.clear();
            // 未命中索引的骨骼取基线，不做场求值
            values.extend(skeleton.bones().map(|b| {
                if b.has_field() {
                    FieldSample::ZERO
                } else {
                    FieldSample::EMPTY
                }
            }));

            for bone in hits {
                let b = skeleton.bone(bone);
                values[bone] = match pose {
                    Pose::Rest => b.evaluate_rest(point),
                    Pose::Current => b.evaluate(point),
                };
            }

            // 子节点先于父节点完成组合
            for &i in skeleton.order().iter().rev() {
                let children = skeleton.children(i);
                if children.is_empty() {
                    continue;
                }
                let kind = skeleton.joint_blending(i);
                let controller = skeleton.joint_controller(i);
                let bulge = skeleton.joint_bulge_magnitude(i);

                let mut acc = values[i];
                for &c in children {
                    let child = values[c];
                    let opening = self.config.max_opening
                        * controller.eval(saturated_cosine(acc.gradient, child.gradient));
                    acc = blend(kind, acc, child, opening, bulge);
                }
                values[i] = acc;
            }

            values[skeleton.root()]
        })
    }
}
