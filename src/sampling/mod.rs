//! HRBF 采样选择
//!
//! 每个顶点先归属到离它最近的骨骼线段（跳过 0 号根骨骼），
//! 每根骨骼只从归属于自己的顶点中取样，再去掉落在相邻骨骼关节半径内的顶点，
//! 这样相邻骨骼不会对同一片皮肤重复取样。

use std::collections::BTreeMap;

use glam::Vec3;

use crate::field::InputSample;
use crate::model::SkinnedMesh;
use crate::skeleton::{BoneId, Skeleton};

/// 默认关节半径 = 骨骼所属顶点平均距离 × 该系数
pub const DEFAULT_JUNCTION_SCALE: f32 = 1.2;

/// 采样参数
#[derive(Clone, Debug)]
pub struct SampleSettings {
    /// 逐骨骼指定的关节半径，未指定的骨骼使用默认值
    pub junction_radius: BTreeMap<BoneId, f32>,
    /// 默认关节半径的缩放
    pub junction_scale: f32,
    /// 采样点之间的最小距离，0 表示不做稀疏化
    pub min_sample_distance: f32,
    /// 去掉法线朝向骨骼轴的顶点
    pub discard_inverted_normals: bool,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            junction_radius: BTreeMap::new(),
            junction_scale: DEFAULT_JUNCTION_SCALE,
            min_sample_distance: 0.0,
            discard_inverted_normals: true,
        }
    }
}

/// 采样结果（绑定姿态世界空间）
#[derive(Clone, Debug, Default)]
pub struct SampleSet {
    pub samples: BTreeMap<BoneId, InputSample>,
    pub hrbf_radii: BTreeMap<BoneId, f32>,
    pub junction_radii: BTreeMap<BoneId, f32>,
}

/// 线段上离 `p` 最近的点
fn closest_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 < 1e-12 {
        return a;
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    a + ab * t
}

/// 顶点与骨骼的归属关系
#[derive(Clone, Debug)]
pub struct VertToBoneInfo {
    /// 每个顶点最近的骨骼，骨架只有根骨骼时为 None
    pub vertex_bone: Vec<Option<BoneId>>,
    /// 顶点到其最近骨骼线段的距离
    pub vertex_distance: Vec<f32>,
    /// 每根骨骼所属的顶点
    pub bone_vertices: Vec<Vec<usize>>,
}

impl VertToBoneInfo {
    pub fn new(skeleton: &Skeleton, mesh: &SkinnedMesh) -> Self {
        let nb = skeleton.nb_joints();
        let mut vertex_bone = Vec::with_capacity(mesh.vertex_count());
        let mut vertex_distance = Vec::with_capacity(mesh.vertex_count());
        let mut bone_vertices = vec![Vec::new(); nb];

        for (v, &p) in mesh.positions().iter().enumerate() {
            let mut best: Option<(BoneId, f32)> = None;
            for bone in skeleton.bones().skip(1) {
                let d = p.distance(closest_on_segment(p, bone.origin(), bone.end()));
                if best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((bone.id(), d));
                }
            }
            match best {
                Some((bone, d)) => {
                    bone_vertices[bone].push(v);
                    vertex_bone.push(Some(bone));
                    vertex_distance.push(d);
                }
                None => {
                    vertex_bone.push(None);
                    vertex_distance.push(f32::INFINITY);
                }
            }
        }

        Self {
            vertex_bone,
            vertex_distance,
            bone_vertices,
        }
    }

    /// 默认关节半径：骨骼所属顶点到骨骼的平均距离 × `scale`
    ///
    /// 没有顶点的骨骼不出现在结果中。
    pub fn default_junction_radius(&self, scale: f32) -> BTreeMap<BoneId, f32> {
        let mut radii = BTreeMap::new();
        for (bone, verts) in self.bone_vertices.iter().enumerate().skip(1) {
            if verts.is_empty() {
                continue;
            }
            let mean = verts.iter().map(|&v| self.vertex_distance[v]).sum::<f32>() / verts.len() as f32;
            radii.insert(bone, mean * scale);
        }
        radii
    }

    /// 默认 HRBF 支撑半径：max(半骨长, 最远所属顶点距离) + 两倍平均边长
    pub fn default_hrbf_radius(&self, skeleton: &Skeleton, mesh: &SkinnedMesh) -> BTreeMap<BoneId, f32> {
        let density = 2.0 * mesh.average_edge_length();
        let mut radii = BTreeMap::new();
        for bone in skeleton.bones().skip(1) {
            let max_distance = self.bone_vertices[bone.id()]
                .iter()
                .map(|&v| self.vertex_distance[v])
                .fold(0.0f32, f32::max);
            let radius = (0.5 * bone.length()).max(max_distance) + density;
            radii.insert(bone.id(), radius.max(1e-3));
        }
        radii
    }
}

/// 与骨骼相邻（父与子）的非根骨骼
fn adjacent_bones(skeleton: &Skeleton, bone: BoneId) -> Vec<BoneId> {
    let mut adjacent: Vec<BoneId> = skeleton.children(bone).to_vec();
    if let Some(parent) = skeleton.parent(bone) {
        if parent != skeleton.root() {
            adjacent.push(parent);
        }
    }
    adjacent
}

/// 为一根骨骼选择 HRBF 采样（绑定姿态世界空间）
pub fn choose_hrbf_samples(
    mesh: &SkinnedMesh,
    skeleton: &Skeleton,
    info: &VertToBoneInfo,
    settings: &SampleSettings,
    junction_radii: &BTreeMap<BoneId, f32>,
    bone: BoneId,
) -> InputSample {
    let mut samples = InputSample::new();
    if bone == skeleton.root() || bone >= info.bone_vertices.len() {
        return samples;
    }

    let junction = |b: BoneId| {
        settings
            .junction_radius
            .get(&b)
            .or_else(|| junction_radii.get(&b))
            .copied()
            .unwrap_or(0.0)
    };
    let neighbors: Vec<(Vec3, Vec3, f32)> = adjacent_bones(skeleton, bone)
        .into_iter()
        .map(|b| {
            let nb = skeleton.bone(b);
            (nb.origin(), nb.end(), junction(b))
        })
        .collect();
    let this = skeleton.bone(bone);

    let min_dist2 = settings.min_sample_distance * settings.min_sample_distance;
    for &v in &info.bone_vertices[bone] {
        let p = mesh.positions()[v];
        let n = mesh.normals()[v];

        if neighbors
            .iter()
            .any(|&(a, b, r)| p.distance(closest_on_segment(p, a, b)) < r)
        {
            continue;
        }
        if settings.discard_inverted_normals {
            let axis_point = closest_on_segment(p, this.origin(), this.end());
            if n.dot(p - axis_point) <= 0.0 {
                continue;
            }
        }
        if min_dist2 > 0.0 && samples.positions.iter().any(|q| q.distance_squared(p) < min_dist2) {
            continue;
        }
        samples.push_sample(p, n);
    }
    samples
}

impl SampleSet {
    /// 对除根骨骼外的所有骨骼选择采样并计算默认半径
    pub fn choose(mesh: &SkinnedMesh, skeleton: &Skeleton, settings: &SampleSettings) -> Self {
        let info = VertToBoneInfo::new(skeleton, mesh);
        let mut junction_radii = info.default_junction_radius(settings.junction_scale);
        for (&bone, &r) in &settings.junction_radius {
            junction_radii.insert(bone, r);
        }
        let hrbf_radii = info.default_hrbf_radius(skeleton, mesh);

        let mut samples = BTreeMap::new();
        for bone in 1..skeleton.nb_joints() {
            let s = choose_hrbf_samples(mesh, skeleton, &info, settings, &junction_radii, bone);
            log::debug!("骨骼 {} 选取 {} 个采样", bone, s.len());
            samples.insert(bone, s);
        }
        log::info!(
            "采样完成: {} 根骨骼, {} 个采样",
            samples.len(),
            samples.values().map(InputSample::len).sum::<usize>()
        );

        Self {
            samples,
            hrbf_radii,
            junction_radii,
        }
    }

    /// 所有骨骼的采样总数
    pub fn total(&self) -> usize {
        self.samples.values().map(InputSample::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VertexWeight;
    use crate::skeleton::{AbsBone, AbsSkeleton};
    use glam::Mat4;

    /// 沿 x 轴 [0, 2] 的圆柱面，两端不封口
    fn tube_mesh(radius: f32, rings: usize, segments: usize) -> SkinnedMesh {
        let mut positions = Vec::new();
        let mut weights = Vec::new();
        for i in 0..rings {
            let x = 2.0 * i as f32 / (rings - 1) as f32;
            for k in 0..segments {
                let a = k as f32 * std::f32::consts::TAU / segments as f32;
                positions.push(Vec3::new(x, radius * a.cos(), radius * a.sin()));
                weights.push(if x < 1.0 {
                    VertexWeight::single(1)
                } else {
                    VertexWeight::single(2)
                });
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

    #[test]
    fn test_vertices_go_to_nearest_bone() {
        let mesh = tube_mesh(0.25, 21, 12);
        let skel = chain();
        let info = VertToBoneInfo::new(&skel, &mesh);
        assert!(info.bone_vertices[0].is_empty());
        for (v, p) in mesh.positions().iter().enumerate() {
            if p.x < 0.99 {
                assert_eq!(info.vertex_bone[v], Some(1));
            } else if p.x > 1.01 {
                assert_eq!(info.vertex_bone[v], Some(2));
            }
        }
        let junction = info.default_junction_radius(1.0);
        assert!((junction[&1] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_junction_radius_exclusivity() {
        let mesh = tube_mesh(0.25, 41, 12);
        let skel = chain();
        let set = SampleSet::choose(&mesh, &skel, &SampleSettings::default());

        // 每个位置至多被一根骨骼取样
        let mut claimed = vec![0usize; mesh.vertex_count()];
        for s in set.samples.values() {
            for p in &s.positions {
                let v = mesh.positions().iter().position(|q| q == p).unwrap();
                claimed[v] += 1;
            }
        }
        assert!(claimed.iter().all(|&c| c <= 1));

        // 上臂的采样不进入下臂的关节半径
        let lower = skel.bone(2);
        let r = set.junction_radii[&2];
        for p in &set.samples[&1].positions {
            assert!(p.distance(closest_on_segment(*p, lower.origin(), lower.end())) >= r);
        }
        assert!(set.samples[&1].len() > 0);
        assert!(set.samples[&2].len() > 0);
        assert!(!set.samples.contains_key(&0));
    }

    #[test]
    fn test_min_sample_distance_thins_samples() {
        let mesh = tube_mesh(0.25, 41, 12);
        let skel = chain();
        let dense = SampleSet::choose(&mesh, &skel, &SampleSettings::default());
        let sparse = SampleSet::choose(
            &mesh,
            &skel,
            &SampleSettings {
                min_sample_distance: 0.2,
                ..Default::default()
            },
        );
        assert!(sparse.total() < dense.total());
        for s in sparse.samples.values() {
            for (i, a) in s.positions.iter().enumerate() {
                for b in &s.positions[i + 1..] {
                    assert!(a.distance(*b) >= 0.2 - 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_default_hrbf_radius_uses_length_and_density() {
        let mesh = tube_mesh(0.25, 21, 12);
        let skel = chain();
        let info = VertToBoneInfo::new(&skel, &mesh);
        let radii = info.default_hrbf_radius(&skel, &mesh);
        let expected = 0.5 + 2.0 * mesh.average_edge_length();
        assert!((radii[&1] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_bone_without_region_gets_no_samples() {
        let mesh = tube_mesh(0.25, 11, 8);
        let skel = Skeleton::load(&AbsSkeleton {
            bones: vec![
                AbsBone::new("root", Mat4::IDENTITY, 0.0),
                AbsBone::new("arm", Mat4::IDENTITY, 2.0),
                AbsBone::new("far", Mat4::from_translation(Vec3::Y * 10.0), 1.0),
            ],
            parents: vec![-1, 0, 0],
        })
        .unwrap();
        let set = SampleSet::choose(&mesh, &skel, &SampleSettings::default());
        assert!(set.samples[&2].is_empty());
        assert!(!set.samples[&1].is_empty());
    }
}
