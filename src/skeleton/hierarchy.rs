//! 抽象骨架层级（外部导入格式）

use glam::{Mat4, Vec3};

use crate::{Result, SkinError};

/// 外部提供的单根骨骼
#[derive(Clone, Debug)]
pub struct AbsBone {
    pub name: String,
    /// 骨骼局部 -> 世界（绑定姿态），x 轴为骨骼方向
    pub frame: Mat4,
    pub length: f32,
}

impl AbsBone {
    pub fn new(name: impl Into<String>, frame: Mat4, length: f32) -> Self {
        Self {
            name: name.into(),
            frame,
            length,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.frame.w_axis.truncate()
    }

    pub fn direction(&self) -> Vec3 {
        self.frame.x_axis.truncate().normalize_or_zero()
    }
}

/// 骨骼列表 + 父索引（根为 -1）
#[derive(Clone, Debug, Default)]
pub struct AbsSkeleton {
    pub bones: Vec<AbsBone>,
    pub parents: Vec<i32>,
}

impl AbsSkeleton {
    /// 检查层级结构
    ///
    /// 要求：非空，两表等长，恰好一个根且位于 0 号，
    /// 每个父索引都小于自身索引（因此无环且父先于子）。
    pub fn validate(&self) -> Result<()> {
        if self.bones.is_empty() {
            return Err(SkinError::Hierarchy("skeleton has no bones".into()));
        }
        if self.bones.len() != self.parents.len() {
            return Err(SkinError::Hierarchy(format!(
                "{} bones but {} parent entries",
                self.bones.len(),
                self.parents.len()
            )));
        }
        for (i, &parent) in self.parents.iter().enumerate() {
            if i == 0 {
                if parent >= 0 {
                    return Err(SkinError::Hierarchy(format!("bone 0 must be the root, has parent {}", parent)));
                }
                continue;
            }
            if parent < 0 {
                return Err(SkinError::Hierarchy(format!("bone {} is a second root", i)));
            }
            if parent as usize >= i {
                return Err(SkinError::Hierarchy(format!(
                    "bone {} has parent {} which is not an earlier bone",
                    i, parent
                )));
            }
        }
        for (i, bone) in self.bones.iter().enumerate() {
            if !bone.frame.is_finite() || !bone.length.is_finite() {
                return Err(SkinError::Hierarchy(format!("bone {} has non-finite bind data", i)));
            }
        }
        Ok(())
    }

    pub fn children(&self, bone: usize) -> Vec<usize> {
        self.parents
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == bone as i32)
            .map(|(i, _)| i)
            .collect()
    }

    /// 由子骨骼原点推算骨骼长度
    ///
    /// 有子骨骼时长度为子骨骼原点在骨骼方向上投影的平均值；
    /// 叶子骨骼长度不变（为 0 时在构造骨骼时被夹到下限）。
    pub fn compute_bone_lengths(&mut self) {
        for i in 0..self.bones.len() {
            let children = self.children(i);
            if children.is_empty() {
                continue;
            }
            let origin = self.bones[i].origin();
            let dir = self.bones[i].direction();
            let sum: f32 = children
                .iter()
                .map(|&c| (self.bones[c].origin() - origin).dot(dir).max(0.0))
                .sum();
            self.bones[i].length = sum / children.len() as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> AbsSkeleton {
        AbsSkeleton {
            bones: vec![
                AbsBone::new("root", Mat4::IDENTITY, 0.0),
                AbsBone::new("a", Mat4::IDENTITY, 0.0),
                AbsBone::new("b", Mat4::from_translation(Vec3::X * 2.0), 0.0),
            ],
            parents: vec![-1, 0, 1],
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(chain().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_parents() {
        let mut abs = chain();
        abs.parents = vec![-1, 2, 1];
        assert!(matches!(abs.validate(), Err(SkinError::Hierarchy(_))));

        abs.parents = vec![-1, -1, 1];
        assert!(matches!(abs.validate(), Err(SkinError::Hierarchy(_))));

        abs.parents = vec![-1, 0];
        assert!(matches!(abs.validate(), Err(SkinError::Hierarchy(_))));

        assert!(AbsSkeleton::default().validate().is_err());
    }

    #[test]
    fn test_compute_bone_lengths() {
        let mut abs = chain();
        abs.compute_bone_lengths();
        assert_eq!(abs.bones[0].length, 0.0);
        assert!((abs.bones[1].length - 2.0).abs() < 1e-6);
        assert_eq!(abs.bones[2].length, 0.0);
    }
}
