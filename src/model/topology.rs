//! 三角网格拓扑工具

use glam::Vec3;

/// 面积加权顶点法线
///
/// 未被任何三角形引用的顶点法线为零向量。
pub fn compute_normals(positions: &[Vec3], triangles: &[[u32; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in triangles {
        let [a, b, c] = tri.map(|i| i as usize);
        // 叉积长度为面积的两倍，直接累加即为面积加权
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals.iter().map(|n| n.normalize_or_zero()).collect()
}

/// 一环邻域（按顶点编号排序，无重复）
pub fn one_ring(vertex_count: usize, triangles: &[[u32; 3]]) -> Vec<Vec<usize>> {
    let mut rings = vec![Vec::new(); vertex_count];
    for tri in triangles {
        for k in 0..3 {
            let a = tri[k] as usize;
            let b = tri[(k + 1) % 3] as usize;
            rings[a].push(b);
            rings[b].push(a);
        }
    }
    for ring in &mut rings {
        ring.sort_unstable();
        ring.dedup();
    }
    rings
}

/// 平均边长，网格没有边时为 0
pub fn average_edge_length(positions: &[Vec3], rings: &[Vec<usize>]) -> f32 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (i, ring) in rings.iter().enumerate() {
        for &j in ring.iter().filter(|&&j| j > i) {
            sum += positions[i].distance(positions[j]);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}
