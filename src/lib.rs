//! Skin Engine - 基于隐式曲面的骨骼蒙皮变形引擎
//!
//! 在线性/对偶四元数蒙皮之后，用每根骨骼拟合出的隐式场修正顶点位置，
//! 让关节处保持体积与接触折痕：
//! - HRBF 拟合、预计算网格场、胶囊体场
//! - 采样选择（关节半径与 HRBF 支撑半径）
//! - 骨架层级与姿态传播
//! - 按关节组合的场混合环境
//! - 逐帧变形控制器（蒙皮、沿梯度修正、切向平滑）
//! - 绑定数据的二进制存取

pub mod blending;
pub mod deformer;
pub mod field;
pub mod model;
pub mod persist;
pub mod sampling;
pub mod skeleton;
pub mod skinning;

pub use blending::{BlendConfig, BlendingEnv, Controller, ControllerShape, JointBlending, Pose};
pub use deformer::{AnimatedMesh, DeformConfig};
pub use field::{BoneField, BoneKind, FieldSample, FitError, InputSample, ISO_VALUE};
pub use model::{SkinnedMesh, VertexWeight};
pub use persist::RigFile;
pub use sampling::{SampleSet, SampleSettings, VertToBoneInfo};
pub use skeleton::{AbsBone, AbsSkeleton, Bone, BoneHandle, BoneId, Skeleton};
pub use skinning::SkinningType;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkinError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hierarchy: {0}")]
    Hierarchy(String),

    #[error("Unknown bone id: {0}")]
    UnknownBone(usize),

    #[error("Invalid radius {radius} for bone {bone}")]
    InvalidRadius { bone: usize, radius: f32 },

    #[error("Mesh mismatch: {0}")]
    MeshMismatch(String),

    #[error("Rig parse error: {0}")]
    RigParse(String),

    #[error("HRBF fit error: {0}")]
    Fit(#[from] FitError),
}

pub type Result<T> = std::result::Result<T, SkinError>;
