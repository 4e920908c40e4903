//! 二进制绑定文件（小端序）
//!
//! 布局：
//! - 魔数 `SKRG`，版本 u32，关节数 u32
//! - 每个关节：名称（u32 长度 + UTF-8），父索引 i32，绑定坐标系 16×f32（列主序），
//!   骨长 f32，混合类型 u8，鼓包幅度 f32，控制曲线 8×f32，场类型 u8
//! - HRBF 场：支撑半径 f32，采样数 u32，每个采样 位置 3×f32 + 法线 3×f32（绑定姿态世界空间）
//! - 胶囊体场：半径 f32，支撑半径 f32
//! - 预计算场：包围盒 6×f32，每轴节点数 3×u32，每个节点 势能 f32 + 梯度 3×f32（骨骼局部空间）

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Mat4, UVec3, Vec2, Vec3};

use crate::blending::{ControllerShape, JointBlending};
use crate::blending::Aabb;
use crate::field::{BoneField, FieldSample, InputSample, PrecomputedField};
use crate::sampling::SampleSet;
use crate::skeleton::{AbsBone, AbsSkeleton, Bone, BoneId, Skeleton};
use crate::{Result, SkinError};

pub const RIG_MAGIC: [u8; 4] = *b"SKRG";
pub const RIG_VERSION: u32 = 1;

const FIELD_HRBF: u8 = 0;
const FIELD_CAPSULE: u8 = 1;
const FIELD_PRECOMPUTED: u8 = 2;

/// 名称长度上限，防止损坏文件触发超大分配
const MAX_NAME_LEN: u32 = 1 << 12;
/// 预分配上限
const MAX_PREALLOC: usize = 1 << 16;

/// 关节上骨骼场的可持久化部分
#[derive(Clone, Debug, PartialEq)]
pub enum RigField {
    Hrbf { radius: f32, samples: InputSample },
    Capsule { radius: f32, support: f32 },
    Precomputed { grid: PrecomputedField },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RigJoint {
    pub name: String,
    pub parent: i32,
    pub frame: Mat4,
    pub length: f32,
    pub blending: JointBlending,
    pub bulge_magnitude: f32,
    pub controller: ControllerShape,
    pub field: RigField,
}

/// 绑定文件内容
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RigFile {
    pub joints: Vec<RigJoint>,
}

impl RigFile {
    /// 从骨架提取可持久化状态
    ///
    /// 自定义控制函数无法保存，以默认曲线代替。
    pub fn from_skeleton(skeleton: &Skeleton) -> Self {
        let joints = (0..skeleton.nb_joints())
            .map(|i| {
                let bone = skeleton.bone(i);
                let controller = match skeleton.joint_controller(i).shape() {
                    Some(shape) => shape,
                    None => {
                        log::warn!("关节 {} 使用自定义控制函数，保存为默认曲线", skeleton.name(i));
                        ControllerShape::default()
                    }
                };
                let field = match bone.field() {
                    BoneField::Hrbf(prim) => RigField::Hrbf {
                        radius: prim.radius(),
                        samples: prim.samples().transformed(&bone.frame()),
                    },
                    BoneField::Capsule(capsule) => RigField::Capsule {
                        radius: capsule.radius,
                        support: capsule.support,
                    },
                    BoneField::Precomputed(grid) => RigField::Precomputed { grid: grid.clone() },
                };
                RigJoint {
                    name: skeleton.name(i).to_string(),
                    parent: skeleton.parent(i).map_or(-1, |p| p as i32),
                    frame: bone.frame(),
                    length: bone.length(),
                    blending: skeleton.joint_blending(i),
                    bulge_magnitude: skeleton.joint_bulge_magnitude(i),
                    controller,
                    field,
                }
            })
            .collect();
        Self { joints }
    }

    /// 重建骨架并用保存的采样重新拟合 HRBF 骨骼
    pub fn to_skeleton(&self) -> Result<Skeleton> {
        let abs = AbsSkeleton {
            bones: self
                .joints
                .iter()
                .map(|j| AbsBone::new(j.name.clone(), j.frame, j.length))
                .collect(),
            parents: self.joints.iter().map(|j| j.parent).collect(),
        };
        let mut skeleton = Skeleton::load(&abs)?;

        let mut set = SampleSet::default();
        for (i, joint) in self.joints.iter().enumerate() {
            skeleton.set_joint_blending(i, joint.blending)?;
            skeleton.set_joint_bulge_mag(i, joint.bulge_magnitude)?;
            skeleton.set_joint_controller(i, joint.controller)?;
            match &joint.field {
                RigField::Hrbf { radius, samples } => {
                    set.hrbf_radii.insert(i, *radius);
                    set.samples.insert(i, samples.clone());
                }
                RigField::Capsule { radius, support } => {
                    let b = skeleton.bone(i);
                    let capsule = Bone::capsule(i, b.origin(), b.direction(), b.length(), *radius, *support);
                    skeleton.set_bone(i, capsule)?;
                }
                RigField::Precomputed { grid } => {
                    let b = skeleton.bone(i);
                    let baked = Bone::precomputed(i, b.origin(), b.direction(), b.length(), grid.clone());
                    skeleton.set_bone(i, baked)?;
                }
            }
        }
        skeleton.fit_samples(&set)?;
        Ok(skeleton)
    }

    /// 按骨骼编号整理的非空采样，与 [`SampleSet::samples`] 同构
    pub fn samples(&self) -> BTreeMap<BoneId, InputSample> {
        self.joints
            .iter()
            .enumerate()
            .filter_map(|(i, j)| match &j.field {
                RigField::Hrbf { samples, .. } if !samples.is_empty() => Some((i, samples.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read(&mut reader)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if magic != RIG_MAGIC {
            return Err(SkinError::RigParse("invalid rig magic".to_string()));
        }
        let version = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        if version != RIG_VERSION {
            return Err(SkinError::RigParse(format!("unsupported rig version {}", version)));
        }

        let count = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let mut joints = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            joints.push(read_joint(reader)?);
        }
        Ok(Self { joints })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&RIG_MAGIC)?;
        writer.write_u32::<LittleEndian>(RIG_VERSION)?;
        writer.write_u32::<LittleEndian>(self.joints.len() as u32)?;
        for joint in &self.joints {
            write_joint(writer, joint)?;
        }
        Ok(())
    }
}

/// 文件提前结束视为格式错误
fn truncated(e: io::Error) -> SkinError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SkinError::RigParse("unexpected end of rig file".to_string())
    } else {
        SkinError::Io(e)
    }
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    reader.read_f32::<LittleEndian>().map_err(truncated)
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<Vec3> {
    Ok(Vec3::new(read_f32(reader)?, read_f32(reader)?, read_f32(reader)?))
}

fn read_vec2<R: Read>(reader: &mut R) -> Result<Vec2> {
    Ok(Vec2::new(read_f32(reader)?, read_f32(reader)?))
}

fn read_joint<R: Read>(reader: &mut R) -> Result<RigJoint> {
    let name_len = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    if name_len > MAX_NAME_LEN {
        return Err(SkinError::RigParse(format!("joint name too long ({} bytes)", name_len)));
    }
    let mut name_bytes = vec![0u8; name_len as usize];
    reader.read_exact(&mut name_bytes).map_err(truncated)?;
    let name = String::from_utf8(name_bytes)
        .map_err(|_| SkinError::RigParse("joint name is not valid UTF-8".to_string()))?;

    let parent = reader.read_i32::<LittleEndian>().map_err(truncated)?;
    let mut cols = [0f32; 16];
    for c in &mut cols {
        *c = read_f32(reader)?;
    }
    let frame = Mat4::from_cols_array(&cols);
    let length = read_f32(reader)?;

    let blending_tag = reader.read_u8().map_err(truncated)?;
    let blending = JointBlending::from_u8(blending_tag)
        .ok_or_else(|| SkinError::RigParse(format!("unknown blending type {}", blending_tag)))?;
    let bulge_magnitude = read_f32(reader)?;
    let controller = ControllerShape::new(
        read_vec2(reader)?,
        read_vec2(reader)?,
        read_vec2(reader)?,
        read_f32(reader)?,
        read_f32(reader)?,
    );

    let field = match reader.read_u8().map_err(truncated)? {
        FIELD_HRBF => {
            let radius = read_f32(reader)?;
            let count = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            let mut samples = InputSample::new();
            samples.positions.reserve(count.min(MAX_PREALLOC));
            samples.normals.reserve(count.min(MAX_PREALLOC));
            for _ in 0..count {
                samples.positions.push(read_vec3(reader)?);
                samples.normals.push(read_vec3(reader)?);
            }
            RigField::Hrbf { radius, samples }
        }
        FIELD_CAPSULE => RigField::Capsule {
            radius: read_f32(reader)?,
            support: read_f32(reader)?,
        },
        FIELD_PRECOMPUTED => {
            let bounds = Aabb {
                min: read_vec3(reader)?,
                max: read_vec3(reader)?,
            };
            let mut dims = [0u32; 3];
            for d in &mut dims {
                *d = reader.read_u32::<LittleEndian>().map_err(truncated)?;
            }
            let dims = UVec3::from_array(dims);
            let count = dims.x as usize * dims.y as usize * dims.z as usize;
            let mut values = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                let potential = read_f32(reader)?;
                values.push(FieldSample::new(potential, read_vec3(reader)?));
            }
            let grid = PrecomputedField::from_parts(bounds, dims, values)
                .ok_or_else(|| SkinError::RigParse(format!("invalid precomputed grid {:?}", dims)))?;
            RigField::Precomputed { grid }
        }
        other => return Err(SkinError::RigParse(format!("unknown field type {}", other))),
    };

    Ok(RigJoint {
        name,
        parent,
        frame,
        length,
        blending,
        bulge_magnitude,
        controller,
        field,
    })
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)
}

fn write_joint<W: Write>(writer: &mut W, joint: &RigJoint) -> Result<()> {
    writer.write_u32::<LittleEndian>(joint.name.len() as u32)?;
    writer.write_all(joint.name.as_bytes())?;
    writer.write_i32::<LittleEndian>(joint.parent)?;
    for c in joint.frame.to_cols_array() {
        writer.write_f32::<LittleEndian>(c)?;
    }
    writer.write_f32::<LittleEndian>(joint.length)?;
    writer.write_u8(joint.blending.to_u8())?;
    writer.write_f32::<LittleEndian>(joint.bulge_magnitude)?;

    let shape = &joint.controller;
    for p in [shape.p0, shape.p1, shape.p2] {
        writer.write_f32::<LittleEndian>(p.x)?;
        writer.write_f32::<LittleEndian>(p.y)?;
    }
    writer.write_f32::<LittleEndian>(shape.s0)?;
    writer.write_f32::<LittleEndian>(shape.s1)?;

    match &joint.field {
        RigField::Hrbf { radius, samples } => {
            writer.write_u8(FIELD_HRBF)?;
            writer.write_f32::<LittleEndian>(*radius)?;
            writer.write_u32::<LittleEndian>(samples.len() as u32)?;
            for (p, n) in samples.iter() {
                write_vec3(writer, p)?;
                write_vec3(writer, n)?;
            }
        }
        RigField::Capsule { radius, support } => {
            writer.write_u8(FIELD_CAPSULE)?;
            writer.write_f32::<LittleEndian>(*radius)?;
            writer.write_f32::<LittleEndian>(*support)?;
        }
        RigField::Precomputed { grid } => {
            writer.write_u8(FIELD_PRECOMPUTED)?;
            let bounds = grid.bounds();
            write_vec3(writer, bounds.min)?;
            write_vec3(writer, bounds.max)?;
            for d in grid.resolution().to_array() {
                writer.write_u32::<LittleEndian>(d)?;
            }
            for s in grid.values() {
                writer.write_f32::<LittleEndian>(s.potential)?;
                write_vec3(writer, s.gradient)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blending::Controller;
    use crate::field::BoneKind;
    use std::io::Cursor;
    use std::sync::Arc;

    /// 沿上臂表面的一圈圈采样（绑定姿态世界空间）
    fn ring_samples(x0: f32, x1: f32) -> InputSample {
        let mut s = InputSample::new();
        for i in 0..4 {
            let x = x0 + (x1 - x0) * i as f32 / 3.0;
            for k in 0..6 {
                let a = k as f32 * std::f32::consts::TAU / 6.0;
                let n = Vec3::new(0.0, a.cos(), a.sin());
                s.push_sample(Vec3::new(x, 0.0, 0.0) + n * 0.25, n);
            }
        }
        s
    }

    fn rigged() -> Skeleton {
        let mut skel = Skeleton::load(&AbsSkeleton {
            bones: vec![
                AbsBone::new("root", Mat4::IDENTITY, 0.0),
                AbsBone::new("upper", Mat4::IDENTITY, 1.0),
                AbsBone::new("lower", Mat4::from_translation(Vec3::X), 1.0),
            ],
            parents: vec![-1, 0, 1],
        })
        .unwrap();
        skel.set_bone_samples(1, &ring_samples(0.1, 0.8)).unwrap();
        let lower = skel.bone(2);
        let capsule = Bone::capsule(2, lower.origin(), lower.direction(), 1.0, 0.25, 0.4);
        skel.set_bone(2, capsule).unwrap();
        skel.set_joint_blending(1, JointBlending::Bulge).unwrap();
        skel.set_joint_bulge_mag(1, 0.6).unwrap();
        skel.set_joint_controller(1, ControllerShape::elbow()).unwrap();
        skel
    }

    #[test]
    fn test_write_then_read() {
        let rig = RigFile::from_skeleton(&rigged());
        let mut buf = Vec::new();
        rig.write(&mut buf).unwrap();
        let back = RigFile::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, rig);
        assert_eq!(back.samples()[&1].len(), 24);
    }

    #[test]
    fn test_rebuilt_skeleton_matches_field() {
        let skel = rigged();
        let rebuilt = RigFile::from_skeleton(&skel).to_skeleton().unwrap();

        assert_eq!(rebuilt.nb_joints(), 3);
        assert_eq!(rebuilt.name(2), "lower");
        assert_eq!(rebuilt.parent(2), Some(1));
        assert_eq!(rebuilt.bone_type(1), BoneKind::Hrbf);
        assert_eq!(rebuilt.bone_type(2), BoneKind::Capsule);
        assert_eq!(rebuilt.joint_blending(1), JointBlending::Bulge);
        assert!((rebuilt.joint_bulge_magnitude(1) - 0.6).abs() < 1e-6);
        assert_eq!(rebuilt.joint_controller(1).shape(), Some(ControllerShape::elbow()));

        for p in [Vec3::new(0.5, 0.25, 0.0), Vec3::new(0.3, 0.1, 0.1), Vec3::new(1.5, 0.2, 0.0)] {
            let a = skel.bone(1).evaluate(p);
            let b = rebuilt.bone(1).evaluate(p);
            assert!((a.potential - b.potential).abs() < 1e-4);
            let a = skel.bone(2).evaluate(p);
            let b = rebuilt.bone(2).evaluate(p);
            assert!((a.potential - b.potential).abs() < 1e-6);
        }
    }

    #[test]
    fn test_precomputed_bone_survives_reload() {
        let mut skel = rigged();
        assert!(skel.precompute_bone(2, 12).unwrap());

        let mut buf = Vec::new();
        RigFile::from_skeleton(&skel).write(&mut buf).unwrap();
        let rig = RigFile::read(&mut Cursor::new(buf)).unwrap();
        assert!(matches!(rig.joints[2].field, RigField::Precomputed { .. }));

        let rebuilt = rig.to_skeleton().unwrap();
        assert_eq!(rebuilt.bone_type(2), BoneKind::Precomputed);
        for p in [Vec3::new(1.5, 0.2, 0.0), Vec3::new(1.2, 0.0, 0.3), Vec3::new(1.9, 0.1, -0.1)] {
            let a = skel.bone(2).evaluate(p);
            let b = rebuilt.bone(2).evaluate(p);
            assert!((a.potential - b.potential).abs() < 1e-5);
            assert!((a.gradient - b.gradient).length() < 1e-4);
        }
    }

    #[test]
    fn test_custom_controller_saved_as_default() {
        let mut skel = rigged();
        skel.set_joint_controller(1, Controller::Custom(Arc::new(|_| 0.3))).unwrap();
        let rig = RigFile::from_skeleton(&skel);
        assert_eq!(rig.joints[1].controller, ControllerShape::default());
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = b"NOPE".to_vec();
        buf.extend_from_slice(&RIG_VERSION.to_le_bytes());
        assert!(matches!(
            RigFile::read(&mut Cursor::new(buf)),
            Err(SkinError::RigParse(_))
        ));
    }

    #[test]
    fn test_truncated_file() {
        let mut buf = Vec::new();
        RigFile::from_skeleton(&rigged()).write(&mut buf).unwrap();
        buf.truncate(buf.len() - 7);
        assert!(matches!(
            RigFile::read(&mut Cursor::new(buf)),
            Err(SkinError::RigParse(_))
        ));
    }

    #[test]
    fn test_unknown_version() {
        let mut buf = RIG_MAGIC.to_vec();
        buf.extend_from_slice(&99u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            RigFile::read(&mut Cursor::new(buf)),
            Err(SkinError::RigParse(_))
        ));
    }
}
