//! HRBF 拟合（Hermite 径向基函数）
//!
//! 核函数 φ(r) = r³，带一次多项式项。对 N 个采样点求解 4N+4 阶对称线性系统：
//!
//! ```text
//! f(x)  = Σ αᵢ φ(x - xᵢ) - βᵢ · ∇φ(x - xᵢ) + a · x + b
//! f(xⱼ) = 0,   ∇f(xⱼ) = nⱼ
//! ```
//!
//! 拟合结果在采样点附近近似有符号距离（外部为正）。

use glam::{DVec3, Vec3};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::InputSample;

/// HRBF 拟合失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("HRBF fit needs at least 4 distinct samples, got {0}")]
    NotEnoughSamples(usize),

    #[error("HRBF linear system is singular")]
    Singular,

    #[error("HRBF solution contains non-finite coefficients")]
    NonFinite,
}

/// 三维拟合所需的最少采样数
pub const MIN_SAMPLES: usize = 4;

/// 距离小于该值的采样点视为重复
const MERGE_DISTANCE: f64 = 1e-5;

/// 依次尝试的对角正则化系数（相对矩阵尺度）
const REGULARIZATION: [f64; 3] = [0.0, 1e-9, 1e-6];

/// 残差容差（相对右端项）
const RESIDUAL_TOLERANCE: f64 = 1e-4;

/// 已拟合的 HRBF（全局支撑）
#[derive(Clone, Debug)]
pub struct HrbfField {
    nodes: Vec<DVec3>,
    alphas: Vec<f64>,
    betas: Vec<DVec3>,
    poly_linear: DVec3,
    poly_constant: f64,
}

impl HrbfField {
    /// 拟合采样集合
    ///
    /// 先合并近似重复的采样，再求解；奇异时逐级加入对角正则化重试。
    /// 拟合失败不会产生部分结果，调用方保留原有场即可。
    pub fn fit(samples: &InputSample) -> Result<Self, FitError> {
        let (nodes, normals) = merge_duplicates(samples);
        let n = nodes.len();
        if n < MIN_SAMPLES {
            return Err(FitError::NotEnoughSamples(n));
        }

        let (matrix, rhs) = build_system(&nodes, &normals);
        let scale = matrix.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);

        let mut last_error = FitError::Singular;
        for &lambda in &REGULARIZATION {
            let mut system = matrix.clone();
            if lambda > 0.0 {
                for d in 0..4 * n {
                    system[(d, d)] += lambda * scale;
                }
            }

            let solution = match system.clone().full_piv_lu().solve(&rhs) {
                Some(x) => x,
                None => {
                    last_error = FitError::Singular;
                    continue;
                }
            };

            if solution.iter().any(|v| !v.is_finite()) {
                last_error = FitError::NonFinite;
                continue;
            }

            let residual = (&system * &solution - &rhs).amax();
            if residual > RESIDUAL_TOLERANCE * (1.0 + rhs.amax()) {
                last_error = FitError::Singular;
                continue;
            }

            return Ok(Self::from_solution(nodes, &solution));
        }

        Err(last_error)
    }

    fn from_solution(nodes: Vec<DVec3>, x: &DVector<f64>) -> Self {
        let n = nodes.len();
        let mut alphas = Vec::with_capacity(n);
        let mut betas = Vec::with_capacity(n);
        for i in 0..n {
            let c = 4 * i;
            alphas.push(x[c]);
            betas.push(DVec3::new(x[c + 1], x[c + 2], x[c + 3]));
        }
        let p = 4 * n;
        Self {
            nodes,
            alphas,
            betas,
            poly_linear: DVec3::new(x[p + 1], x[p + 2], x[p + 3]),
            poly_constant: x[p],
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 求值：返回 (有符号距离, 解析梯度)
    pub fn eval(&self, point: Vec3) -> (f32, Vec3) {
        let x = point.as_dvec3();
        let mut value = self.poly_constant + self.poly_linear.dot(x);
        let mut gradient = self.poly_linear;

        for ((node, &alpha), &beta) in self.nodes.iter().zip(&self.alphas).zip(&self.betas) {
            let v = x - *node;
            let len = v.length();
            // φ、∇φ、Hφ 在 r = 0 处均为零
            if len < 1e-12 {
                continue;
            }
            let v_dot_beta = v.dot(beta);
            value += alpha * len * len * len - 3.0 * len * v_dot_beta;
            gradient += v * (3.0 * alpha * len) - (beta * len + v * (v_dot_beta / len)) * 3.0;
        }

        (value as f32, gradient.as_vec3())
    }
}

/// φ(v) = |v|³ 的 Hessian：3 (|v| I + v vᵀ / |v|)
fn hessian(v: DVec3, len: f64) -> [[f64; 3]; 3] {
    let mut h = [[0.0; 3]; 3];
    if len < 1e-12 {
        return h;
    }
    for (k, row) in h.iter_mut().enumerate() {
        for (l, cell) in row.iter_mut().enumerate() {
            let identity = if k == l { len } else { 0.0 };
            *cell = 3.0 * (identity + v[k] * v[l] / len);
        }
    }
    h
}

/// 组装 [[A, P], [Pᵀ, 0]] 对称系统
fn build_system(nodes: &[DVec3], normals: &[DVec3]) -> (DMatrix<f64>, DVector<f64>) {
    let n = nodes.len();
    let size = 4 * n + 4;
    let p = 4 * n;
    let mut m = DMatrix::<f64>::zeros(size, size);
    let mut rhs = DVector::<f64>::zeros(size);

    for j in 0..n {
        let rj = 4 * j;
        for i in 0..n {
            let ci = 4 * i;
            let v = nodes[j] - nodes[i];
            let len = v.length();
            let grad = v * (3.0 * len);
            let hess = hessian(v, len);

            m[(rj, ci)] = len * len * len;
            for k in 0..3 {
                m[(rj, ci + 1 + k)] = -grad[k];
                m[(rj + 1 + k, ci)] = grad[k];
                for l in 0..3 {
                    m[(rj + 1 + k, ci + 1 + l)] = -hess[k][l];
                }
            }
        }

        // 多项式项 (b, a)
        m[(rj, p)] = 1.0;
        m[(p, rj)] = 1.0;
        for k in 0..3 {
            m[(rj, p + 1 + k)] = nodes[j][k];
            m[(rj + 1 + k, p + 1 + k)] = 1.0;
            m[(p + 1 + k, rj)] = nodes[j][k];
            m[(p + 1 + k, rj + 1 + k)] = 1.0;
            rhs[rj + 1 + k] = normals[j][k];
        }
    }

    (m, rhs)
}

/// 合并近似重复的采样点（法线取平均）
fn merge_duplicates(samples: &InputSample) -> (Vec<DVec3>, Vec<DVec3>) {
    let mut nodes: Vec<DVec3> = Vec::with_capacity(samples.len());
    let mut normals: Vec<DVec3> = Vec::with_capacity(samples.len());

    for (p, n) in samples.iter() {
        let p = p.as_dvec3();
        let n = n.as_dvec3();
        if !p.is_finite() || !n.is_finite() || n.length_squared() < 1e-12 {
            continue;
        }
        match nodes.iter().position(|q| q.distance(p) < MERGE_DISTANCE) {
            Some(idx) => normals[idx] += n,
            None => {
                nodes.push(p);
                normals.push(n);
            }
        }
    }

    for n in &mut normals {
        *n = n.normalize_or_zero();
    }

    // 法线互相抵消的点无法提供梯度约束
    let mut i = 0;
    while i < nodes.len() {
        if normals[i].length_squared() < 1e-12 {
            nodes.swap_remove(i);
            normals.swap_remove(i);
        } else {
            i += 1;
        }
    }

    (nodes, normals)
}
