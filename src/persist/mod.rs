//! 绑定数据存取
//!
//! 保存骨架层级、绑定坐标系、每根骨骼的采样与半径以及关节混合参数，
//! 加载后直接重新拟合，不需要再次运行采样选择。

mod rig_file;

pub use rig_file::{RigField, RigFile, RigJoint, RIG_MAGIC, RIG_VERSION};
