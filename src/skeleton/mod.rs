//! 骨骼、骨架层级与姿态

mod bone;
mod hierarchy;
mod skeleton;

pub use bone::{fit_local, Bone, BoneId, FitOutcome};
pub use hierarchy::{AbsBone, AbsSkeleton};
pub use skeleton::{BoneHandle, FitBatch, FitReport, Skeleton, SkeletonJoint};
