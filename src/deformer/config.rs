//! 变形配置
//!
//! 所有参数扁平化。全局默认值只在构造控制器时读取一次，
//! 之后每个控制器持有自己的副本。

use once_cell::sync::Lazy;
use std::sync::RwLock;

use crate::skinning::SkinningType;

/// 变形配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct DeformConfig {
    // ========== 蒙皮 ==========
    /// 初始蒙皮方式，默认对偶四元数
    pub skinning: SkinningType,

    // ========== 梯度修正 ==========
    /// 每个顶点的最大修正迭代次数，默认 30
    pub max_correction_iterations: u32,
    /// 势能误差小于该值即停止，默认 1e-4
    pub potential_tolerance: f32,
    /// 牛顿步缩放，默认 0.75
    pub step_scale: f32,
    /// 单步最大位移，默认 0.1
    pub max_step_length: f32,
    /// 梯度模长低于该值即停止，默认 1e-4
    pub min_gradient_norm: f32,
    /// 相邻两步梯度夹角超过该值（度）即停止，默认 55
    /// 夹角突变意味着顶点碰到了另一根骨骼的表面
    pub gradient_stop_angle_deg: f32,

    // ========== 平滑 ==========
    /// 是否做切向平滑，默认 true
    pub do_smoothing: bool,
    /// 平滑迭代次数，默认 3
    pub smoothing_iterations: u32,
    /// 每次迭代向邻域重心移动的比例 [0, 1]，默认 0.5
    pub smoothing_strength: f32,
    /// 平滑后再做一次修正的迭代次数，0 表示不做，默认 5
    pub reproject_iterations: u32,
}

impl Default for DeformConfig {
    fn default() -> Self {
        Self {
            skinning: SkinningType::DualQuaternion,

            // ====== 梯度修正 ======
            // 每步沿梯度走 step_scale · (目标 - 当前) / |∇f|
            // step_scale = 1 为纯牛顿步，过大在关节处容易来回震荡
            max_correction_iterations: 30,
            potential_tolerance: 1e-4,
            step_scale: 0.75,
            max_step_length: 0.1,
            min_gradient_norm: 1e-4,
            gradient_stop_angle_deg: 55.0,

            // ====== 平滑 ======
            // 只沿切平面移动，不改变体积
            do_smoothing: true,
            smoothing_iterations: 3,
            smoothing_strength: 0.5,
            reproject_iterations: 5,
        }
    }
}

/// 全局默认配置
static DEFORM_CONFIG: Lazy<RwLock<DeformConfig>> = Lazy::new(|| RwLock::new(DeformConfig::default()));

/// 获取当前默认配置
pub fn get_config() -> DeformConfig {
    match DEFORM_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// 设置默认配置（只影响之后构造的控制器）
pub fn set_config(config: DeformConfig) {
    match DEFORM_CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(DeformConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let c = DeformConfig::default();
        assert!(c.do_smoothing);
        assert_eq!(c.skinning, SkinningType::DualQuaternion);
        assert!(c.step_scale > 0.0 && c.step_scale <= 1.0);
    }
}
