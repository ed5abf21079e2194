//! Binary model physics data.
//!
//! A model's physics description is one optional collision shape and a mass
//! record per bone, plus the joints linking bones. Everything is stored
//! little-endian: counts and indices as `u32`, scalars as IEEE-754 `f32`,
//! strings as a `u32` byte length followed by UTF-8.
//!
//! Shapes start with their [`ShapeType`] tag byte:
//!
//! | Tag | Payload |
//! |-----|---------|
//! | `Ray` | nothing |
//! | `Sphere` | radius |
//! | `TriangleMesh` | vertex count, vertices (xyz), triangle count, index triples |
//! | `InfinitePlane` | normal (xyz), offset |
//! | `Multi` | child count, then per child a 3x3 matrix (column major), translation (xyz), shape |

use std::io::{Read, Write};

use glam::{Affine3A, Mat3, Quat, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::body::RigidBody;
use crate::error::{CodecError, ConfigError, PhysicsResult};
use crate::joint::SkeletalJointConstraint;
use crate::mass::MassInfo;
use crate::object::ObjectId;
use crate::shape::{CollisionShape, ShapeType};
use crate::world::{JointId, PhysicsWorld};

/// Upper bound on any length prefix.
pub const MAX_LENGTH: u32 = 1 << 24;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Physics for one bone.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BonePhysics {
    /// Bone name.
    pub name: String,
    /// Collision shape in model space. Bones without one get no body.
    pub shape: Option<CollisionShape>,
    /// Mass properties in model space.
    pub mass_info: MassInfo,
}

/// A joint between two bones.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointPhysics {
    /// Index of the parent bone.
    pub bone_a: u32,
    /// Index of the child bone.
    pub bone_b: u32,
    /// Pivot in model space.
    pub pos: Vec3,
    /// Joint axes in model space.
    pub axes: Quat,
    /// Lower twist/swing/swing limits.
    pub min_extents: Vec3,
    /// Upper twist/swing/swing limits.
    pub max_extents: Vec3,
    /// Lowest motor torque per axis.
    pub min_torque: Vec3,
    /// Highest motor torque per axis.
    pub max_torque: Vec3,
}

/// Physics description of a whole model.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelPhysics {
    /// Per-bone data, indexed by bone.
    pub bones: Vec<BonePhysics>,
    /// Joints between bones.
    pub joints: Vec<JointPhysics>,
}

/// Handles created by [`ModelPhysics::instantiate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInstance {
    /// Body per bone, `None` for bones without a shape.
    pub bodies: Vec<Option<ObjectId>>,
    /// Joints, in the order of [`ModelPhysics::joints`] that could be built.
    pub joints: Vec<JointId>,
}

impl ModelPhysics {
    /// Reads a model from `reader`, validating shapes and bone indices.
    pub fn read<R: Read>(reader: &mut R) -> CodecResult<Self> {
        let bone_count = read_len(reader)?;
        let mut bones = Vec::with_capacity(bone_count.min(1024) as usize);
        for _ in 0..bone_count {
            let name = read_string(reader)?;
            let shape = match read_u8(reader)? {
                0 => None,
                _ => Some(read_shape(reader, false)?),
            };
            let mass_info = read_mass_info(reader)?;
            if !(mass_info.mass >= 0.0 && mass_info.mass.is_finite()) {
                return Err(ConfigError::Mass(mass_info.mass).into());
            }
            bones.push(BonePhysics {
                name,
                shape,
                mass_info,
            });
        }

        let joint_count = read_len(reader)?;
        let mut joints = Vec::with_capacity(joint_count.min(1024) as usize);
        for _ in 0..joint_count {
            let joint = JointPhysics {
                bone_a: read_u32(reader)?,
                bone_b: read_u32(reader)?,
                pos: read_vec3(reader)?,
                axes: read_quat(reader)?,
                min_extents: read_vec3(reader)?,
                max_extents: read_vec3(reader)?,
                min_torque: read_vec3(reader)?,
                max_torque: read_vec3(reader)?,
            };
            for bone in [joint.bone_a, joint.bone_b] {
                if bone >= bone_count {
                    return Err(CodecError::BoneIndex {
                        bone,
                        count: bone_count,
                    });
                }
            }
            joints.push(joint);
        }

        tracing::debug!(bones = bones.len(), joints = joints.len(), "model physics read");
        Ok(Self { bones, joints })
    }

    /// Writes the model to `writer`.
    pub fn write<W: Write>(&self, writer: &mut W) -> CodecResult<()> {
        write_len(writer, self.bones.len())?;
        for bone in &self.bones {
            write_string(writer, &bone.name)?;
            match &bone.shape {
                Some(shape) => {
                    writer.write_all(&[1])?;
                    write_shape(writer, shape)?;
                }
                None => writer.write_all(&[0])?,
            }
            write_mass_info(writer, &bone.mass_info)?;
        }

        write_len(writer, self.joints.len())?;
        for joint in &self.joints {
            writer.write_all(&joint.bone_a.to_le_bytes())?;
            writer.write_all(&joint.bone_b.to_le_bytes())?;
            write_floats(writer, &joint.pos.to_array())?;
            write_floats(writer, &joint.axes.to_array())?;
            write_floats(writer, &joint.min_extents.to_array())?;
            write_floats(writer, &joint.max_extents.to_array())?;
            write_floats(writer, &joint.min_torque.to_array())?;
            write_floats(writer, &joint.max_torque.to_array())?;
        }
        Ok(())
    }

    /// Looks up a bone by name.
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// Adds the model to `world` with its model origin at `origin`.
    ///
    /// Every bone with a shape becomes a rigid body; every joint whose bones
    /// both have bodies becomes a skeletal joint, and the two bones stop
    /// colliding with each other.
    pub fn instantiate(&self, world: &mut PhysicsWorld, origin: Vec3) -> PhysicsResult<ModelInstance> {
        let mut instance = ModelInstance::default();
        for bone in &self.bones {
            let body = match &bone.shape {
                Some(shape) => {
                    let body = RigidBody::new(shape.clone(), bone.mass_info)?.with_position(origin);
                    Some(world.add_rigid_body(body))
                }
                None => None,
            };
            instance.bodies.push(body);
        }

        for (index, joint) in self.joints.iter().enumerate() {
            let body = |bone: u32| instance.bodies.get(bone as usize).copied().flatten();
            let (Some(a), Some(b)) = (body(joint.bone_a), body(joint.bone_b)) else {
                tracing::debug!(joint = index, "joint skipped: bone has no body");
                continue;
            };
            world.disable_collision(a, b)?;
            let limited = world
                .joint_at(a, b, origin + joint.pos, joint.axes)?
                .with_extents(joint.min_extents, joint.max_extents);
            let id = world.add_joint(SkeletalJointConstraint::new(
                limited,
                joint.min_torque,
                joint.max_torque,
            ))?;
            instance.joints.push(id);
        }
        Ok(instance)
    }
}

// ============================================================================
// Shapes
// ============================================================================

/// Reads a tagged shape. Composite shapes may not nest.
pub fn read_shape<R: Read>(reader: &mut R, nested: bool) -> CodecResult<CollisionShape> {
    let tag = read_u8(reader)?;
    let shape_type = ShapeType::from_tag(tag).ok_or(CodecError::UnknownShape(tag))?;
    let shape = match shape_type {
        ShapeType::Ray => CollisionShape::Ray,
        ShapeType::Sphere => CollisionShape::sphere(read_f32(reader)?)?,
        ShapeType::TriangleMesh => {
            let vertex_count = read_len(reader)?;
            let vertices = (0..vertex_count)
                .map(|_| read_vec3(reader))
                .collect::<CodecResult<Vec<_>>>()?;
            let triangle_count = read_len(reader)?;
            let triangles = (0..triangle_count)
                .map(|_| -> CodecResult<[u32; 3]> {
                    Ok([read_u32(reader)?, read_u32(reader)?, read_u32(reader)?])
                })
                .collect::<CodecResult<Vec<_>>>()?;
            CollisionShape::mesh(vertices, triangles)?
        }
        ShapeType::InfinitePlane => {
            let normal = read_vec3(reader)?;
            CollisionShape::plane(normal, read_f32(reader)?)?
        }
        ShapeType::Multi => {
            if nested {
                return Err(ConfigError::DegenerateShape(
                    "multi shape children must be finite, non-composite shapes".into(),
                )
                .into());
            }
            let count = read_len(reader)?;
            let mut children = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                let mut cols = [0.0; 9];
                read_floats(reader, &mut cols)?;
                let translation = read_vec3(reader)?;
                let xform = Affine3A::from_mat3_translation(Mat3::from_cols_array(&cols), translation);
                children.push((read_shape(reader, true)?, xform));
            }
            CollisionShape::multi(children)?
        }
    };
    Ok(shape)
}

/// Writes a tagged shape.
pub fn write_shape<W: Write>(writer: &mut W, shape: &CollisionShape) -> CodecResult<()> {
    writer.write_all(&[shape.shape_type() as u8])?;
    match shape {
        CollisionShape::Ray => {}
        CollisionShape::Sphere { radius } => writer.write_all(&radius.to_le_bytes())?,
        CollisionShape::TriangleMesh(mesh) => {
            write_len(writer, mesh.vertices.len())?;
            for v in &mesh.vertices {
                write_floats(writer, &v.to_array())?;
            }
            write_len(writer, mesh.triangles.len())?;
            for triangle in &mesh.triangles {
                for index in triangle {
                    writer.write_all(&index.to_le_bytes())?;
                }
            }
        }
        CollisionShape::InfinitePlane(plane) => {
            write_floats(writer, &plane.normal.to_array())?;
            writer.write_all(&plane.offset.to_le_bytes())?;
        }
        CollisionShape::Multi(children) => {
            write_len(writer, children.len())?;
            for (child, xform) in children {
                write_floats(writer, &Mat3::from(xform.matrix3).to_cols_array())?;
                write_floats(writer, &Vec3::from(xform.translation).to_array())?;
                write_shape(writer, child)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Primitives
// ============================================================================

fn read_u8<R: Read>(reader: &mut R) -> CodecResult<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> CodecResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> CodecResult<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_floats<R: Read>(reader: &mut R, out: &mut [f32]) -> CodecResult<()> {
    for value in out.iter_mut() {
        *value = read_f32(reader)?;
    }
    Ok(())
}

fn read_len<R: Read>(reader: &mut R) -> CodecResult<u32> {
    let len = read_u32(reader)?;
    if len > MAX_LENGTH {
        return Err(CodecError::Length(len));
    }
    Ok(len)
}

fn read_vec3<R: Read>(reader: &mut R) -> CodecResult<Vec3> {
    let mut v = [0.0; 3];
    read_floats(reader, &mut v)?;
    Ok(Vec3::from_array(v))
}

fn read_quat<R: Read>(reader: &mut R) -> CodecResult<Quat> {
    let mut q = [0.0; 4];
    read_floats(reader, &mut q)?;
    Ok(Quat::from_array(q))
}

fn read_string<R: Read>(reader: &mut R) -> CodecResult<String> {
    let len = read_len(reader)?;
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn read_mass_info<R: Read>(reader: &mut R) -> CodecResult<MassInfo> {
    let mass = read_f32(reader)?;
    let com = read_vec3(reader)?;
    let mut cols = [0.0; 9];
    read_floats(reader, &mut cols)?;
    Ok(MassInfo {
        mass,
        com,
        moi: Mat3::from_cols_array(&cols),
    })
}

fn write_floats<W: Write>(writer: &mut W, values: &[f32]) -> CodecResult<()> {
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn write_len<W: Write>(writer: &mut W, len: usize) -> CodecResult<()> {
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    if len > MAX_LENGTH {
        return Err(CodecError::Length(len));
    }
    writer.write_all(&len.to_le_bytes())?;
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> CodecResult<()> {
    write_len(writer, s.len())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn write_mass_info<W: Write>(writer: &mut W, info: &MassInfo) -> CodecResult<()> {
    writer.write_all(&info.mass.to_le_bytes())?;
    write_floats(writer, &info.com.to_array())?;
    write_floats(writer, &info.moi.to_cols_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Physics;
    use crate::constraint::PhysicsConstraint;
    use std::io::Cursor;

    fn arm() -> ModelPhysics {
        let upper = CollisionShape::sphere(0.5).unwrap();
        let lower = CollisionShape::multi(vec![(
            CollisionShape::sphere(0.4).unwrap(),
            Affine3A::from_translation(Vec3::new(0.0, -1.0, 0.0)),
        )])
        .unwrap();
        ModelPhysics {
            bones: vec![
                BonePhysics {
                    name: "upper".into(),
                    mass_info: upper.compute_mass_info(),
                    shape: Some(upper),
                },
                BonePhysics {
                    name: "lower".into(),
                    mass_info: lower.compute_mass_info(),
                    shape: Some(lower),
                },
                BonePhysics {
                    name: "marker".into(),
                    shape: None,
                    mass_info: MassInfo::ZERO,
                },
            ],
            joints: vec![JointPhysics {
                bone_a: 0,
                bone_b: 1,
                pos: Vec3::new(0.0, -0.5, 0.0),
                axes: Quat::IDENTITY,
                min_extents: Vec3::splat(-0.5),
                max_extents: Vec3::splat(0.5),
                min_torque: Vec3::splat(-2.0),
                max_torque: Vec3::splat(2.0),
            }],
        }
    }

    fn encode(model: &ModelPhysics) -> Vec<u8> {
        let mut bytes = Vec::new();
        model.write(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_model_survives_write_read() {
        let model = arm();
        let bytes = encode(&model);
        let back = ModelPhysics::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, model);
        assert_eq!(back.bone_index("lower"), Some(1));
    }

    #[test]
    fn test_little_endian_layout() {
        let mut bytes = Vec::new();
        write_shape(&mut bytes, &CollisionShape::sphere(2.0).unwrap()).unwrap();
        assert_eq!(bytes, [1, 0x00, 0x00, 0x00, 0x40]);
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = encode(&arm());
        let err = ModelPhysics::read(&mut Cursor::new(&bytes[..bytes.len() - 3])).unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }

    #[test]
    fn test_unknown_shape_tag() {
        let err = read_shape(&mut Cursor::new([9u8]), false).unwrap_err();
        assert!(matches!(err, CodecError::UnknownShape(9)));
    }

    #[test]
    fn test_nested_multi_rejected() {
        let mut bytes = vec![ShapeType::Multi as u8];
        bytes.extend(1u32.to_le_bytes());
        for v in Mat3::IDENTITY.to_cols_array().iter().chain(&[0.0; 3]) {
            bytes.extend(v.to_le_bytes());
        }
        bytes.push(ShapeType::Multi as u8);
        let err = read_shape(&mut Cursor::new(bytes), false).unwrap_err();
        assert!(matches!(err, CodecError::Shape(ConfigError::DegenerateShape(_))));
    }

    #[test]
    fn test_dangling_bone_index() {
        let mut model = arm();
        model.joints[0].bone_b = 7;
        let err = ModelPhysics::read(&mut Cursor::new(encode(&model))).unwrap_err();
        assert!(matches!(err, CodecError::BoneIndex { bone: 7, count: 3 }));
    }

    #[test]
    fn test_oversized_length() {
        let bytes = (MAX_LENGTH + 1).to_le_bytes();
        let err = ModelPhysics::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CodecError::Length(_)));
    }

    #[test]
    fn test_bad_radius_rejected() {
        let mut bytes = vec![ShapeType::Sphere as u8];
        bytes.extend((-1.0f32).to_le_bytes());
        let err = read_shape(&mut Cursor::new(bytes), false).unwrap_err();
        assert!(matches!(err, CodecError::Shape(_)));
    }

    #[test]
    fn test_instantiate() {
        let mut world = PhysicsWorld::new(Physics::default()).unwrap();
        let instance = arm().instantiate(&mut world, Vec3::new(0.0, 10.0, 0.0)).unwrap();
        assert_eq!(instance.bodies.len(), 3);
        assert!(instance.bodies[2].is_none());
        assert_eq!(instance.joints.len(), 1);
        let joint = world.joint(instance.joints[0]).unwrap();
        assert!(matches!(joint, PhysicsConstraint::Skeletal(_)));

        let upper = instance.bodies[0].unwrap();
        let lower = instance.bodies[1].unwrap();
        assert_eq!(world.body(upper).unwrap().position(), Vec3::new(0.0, 10.0, 0.0));
        assert!(world.object(upper).unwrap().core().collision_disabled(lower));
        assert!(world.object(lower).unwrap().core().collision_disabled(upper));
    }
}
