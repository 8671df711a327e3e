//! Binary transformation files.
//!
//! Every record is big-endian:
//!
//! ```text
//! u32 magic (815007)
//! u32 type code
//! payload
//! ```
//!
//! Payloads by type code:
//! * 1 homogeneous, 2 rigid, 3 affine: `u32 n`, then `n` times `f64 value, i32 status`
//! * 4 B-spline FFD: `u32 nx ny nz`, `f64` origin (3), spacing (3),
//!   direction (9, row-major), then the DOF block as above
//! * 7 multi-level: `u32 count`, then `count` complete records
//!
//! Input without the magic number is handed to the legacy text importers.
//! Counts are checked against the bytes left in the input before anything is
//! allocated.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Matrix3;
use crate::error::{Result, TransformError};
use crate::image::ImageGeometry;
use crate::spatial::{Direction3, Point3, Spacing3};
use super::{legacy, BSplineFfd, DofStatus, HomogeneousKind, HomogeneousTransform, MultiLevelTransform, Transform, Transformation};

pub const TRANSFORMATION_MAGIC: u32 = 815007;

pub const TYPE_HOMOGENEOUS: u32 = 1;
pub const TYPE_RIGID: u32 = 2;
pub const TYPE_AFFINE: u32 = 3;
pub const TYPE_BSPLINE_FFD: u32 = 4;
pub const TYPE_MULTI_LEVEL: u32 = 7;

/// Type code written for a transformation.
pub fn type_code(transformation: &Transformation) -> u32 {
    match transformation {
        Transformation::Homogeneous(t) => match t.kind() {
            HomogeneousKind::Matrix => TYPE_HOMOGENEOUS,
            HomogeneousKind::Rigid => TYPE_RIGID,
            HomogeneousKind::Affine => TYPE_AFFINE,
        },
        Transformation::FreeForm(_) => TYPE_BSPLINE_FFD,
        Transformation::MultiLevel(_) => TYPE_MULTI_LEVEL,
    }
}

/// Write a complete record.
pub fn write_transformation<W: Write>(transformation: &Transformation, writer: &mut W) -> Result<()> {
    writer.write_u32::<BigEndian>(TRANSFORMATION_MAGIC)?;
    writer.write_u32::<BigEndian>(type_code(transformation))?;

    match transformation {
        Transformation::Homogeneous(t) => write_dofs(t, writer),
        Transformation::FreeForm(t) => {
            let lattice = t.lattice();
            for n in lattice.dims() {
                write_count(writer, n, "lattice dimension")?;
            }
            for a in 0..3 {
                writer.write_f64::<BigEndian>(lattice.origin()[a])?;
            }
            for a in 0..3 {
                writer.write_f64::<BigEndian>(lattice.spacing()[a])?;
            }
            for r in 0..3 {
                for c in 0..3 {
                    writer.write_f64::<BigEndian>(lattice.direction()[(r, c)])?;
                }
            }
            write_dofs(t, writer)
        }
        Transformation::MultiLevel(t) => {
            write_count(writer, t.number_of_levels(), "level count")?;
            for level in t.levels() {
                write_transformation(level, writer)?;
            }
            Ok(())
        }
    }
}

/// Read a transformation, accepting binary records and legacy text files.
pub fn read_transformation<R: Read>(reader: &mut R) -> Result<Transformation> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    if bytes.len() >= 4 && u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == TRANSFORMATION_MAGIC {
        let mut cursor = Cursor::new(bytes.as_slice());
        return read_record(&mut cursor);
    }
    legacy::import(&bytes)
}

impl Transformation {
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_transformation(self, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        read_transformation(&mut reader)
    }
}

/// Bytes of one `f64 value, i32 status` entry.
const DOF_ENTRY_BYTES: usize = 12;

fn write_count<W: Write>(writer: &mut W, n: usize, what: &str) -> Result<()> {
    let n = u32::try_from(n)
        .map_err(|_| TransformError::unsupported(format!("{} {} does not fit the 32-bit file field", what, n)))?;
    writer.write_u32::<BigEndian>(n)?;
    Ok(())
}

fn write_dofs<T: Transform, W: Write>(t: &T, writer: &mut W) -> Result<()> {
    let n = t.number_of_dofs();
    write_count(writer, n, "DOF count")?;
    for i in 0..n {
        writer.write_f64::<BigEndian>(t.dof(i)?)?;
        writer.write_i32::<BigEndian>(t.status(i)?.code())?;
    }
    Ok(())
}

fn remaining(reader: &Cursor<&[u8]>) -> usize {
    let position = usize::try_from(reader.position()).unwrap_or(usize::MAX);
    reader.get_ref().len().saturating_sub(position)
}

fn read_dofs(reader: &mut Cursor<&[u8]>) -> Result<(Vec<f64>, Vec<DofStatus>)> {
    let n = reader.read_u32::<BigEndian>()? as usize;
    let available = remaining(reader);
    if n.checked_mul(DOF_ENTRY_BYTES).map_or(true, |bytes| bytes > available) {
        return Err(TransformError::parse(format!(
            "DOF block declares {} entries but only {} bytes remain",
            n, available
        )));
    }
    let mut values = Vec::with_capacity(n);
    let mut status = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(reader.read_f64::<BigEndian>()?);
        status.push(DofStatus::from_code(reader.read_i32::<BigEndian>()?));
    }
    Ok((values, status))
}

fn read_record(reader: &mut Cursor<&[u8]>) -> Result<Transformation> {
    let magic = reader.read_u32::<BigEndian>()?;
    if magic != TRANSFORMATION_MAGIC {
        return Err(TransformError::InvalidMagic {
            expected: TRANSFORMATION_MAGIC,
            found: magic,
        });
    }

    let code = reader.read_u32::<BigEndian>()?;
    match code {
        TYPE_HOMOGENEOUS | TYPE_RIGID | TYPE_AFFINE => {
            let kind = match code {
                TYPE_RIGID => HomogeneousKind::Rigid,
                TYPE_AFFINE => HomogeneousKind::Affine,
                _ => HomogeneousKind::Matrix,
            };
            let (values, status) = read_dofs(reader)?;
            let mut t = HomogeneousTransform::with_parameters(kind, values)?;
            for (i, s) in status.into_iter().enumerate() {
                t.put_status(i, s)?;
            }
            Ok(t.into())
        }
        TYPE_BSPLINE_FFD => {
            let mut dims = [0usize; 3];
            for n in dims.iter_mut() {
                *n = reader.read_u32::<BigEndian>()? as usize;
            }
            let mut origin = [0.0; 3];
            for v in origin.iter_mut() {
                *v = reader.read_f64::<BigEndian>()?;
            }
            let mut spacing = [0.0; 3];
            for v in spacing.iter_mut() {
                *v = reader.read_f64::<BigEndian>()?;
            }
            let mut direction = Matrix3::<f64>::zeros();
            for r in 0..3 {
                for c in 0..3 {
                    direction[(r, c)] = reader.read_f64::<BigEndian>()?;
                }
            }
            let lattice = ImageGeometry::new(
                dims,
                Point3::new(origin),
                Spacing3::new(spacing),
                Direction3::from_matrix(direction),
            )
            .map_err(|e| TransformError::invalid_lattice(e.to_string()))?;
            let expected = BSplineFfd::dofs_for(dims)?;
            let (values, status) = read_dofs(reader)?;
            if values.len() != expected {
                return Err(TransformError::dof_count(expected, values.len()));
            }
            Ok(BSplineFfd::new(lattice).with_parameters(values, status)?.into())
        }
        TYPE_MULTI_LEVEL => {
            let count = reader.read_u32::<BigEndian>()?;
            let mut chain = MultiLevelTransform::default();
            for _ in 0..count {
                chain.push(read_record(reader)?);
            }
            Ok(chain.into())
        }
        other => Err(TransformError::UnknownTypeCode(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(t: &Transformation) -> Transformation {
        let mut buffer = Vec::new();
        write_transformation(t, &mut buffer).unwrap();
        read_transformation(&mut buffer.as_slice()).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let mut buffer = Vec::new();
        write_transformation(&Transformation::rigid(), &mut buffer).unwrap();
        assert_eq!(&buffer[0..4], &815007u32.to_be_bytes());
        assert_eq!(&buffer[4..8], &TYPE_RIGID.to_be_bytes());
        assert_eq!(&buffer[8..12], &6u32.to_be_bytes());
        assert_eq!(buffer.len(), 12 + 6 * 12);
    }

    #[test]
    fn test_homogeneous_roundtrip_keeps_status() {
        let mut t = HomogeneousTransform::rigid_from([1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        t.put_status(5, DofStatus::Passive).unwrap();
        let back = roundtrip(&t.clone().into());

        match back {
            Transformation::Homogeneous(b) => {
                assert_eq!(b.kind(), HomogeneousKind::Rigid);
                assert_eq!(b.parameters(), t.parameters());
                assert_eq!(b.status(5).unwrap(), DofStatus::Passive);
                assert_eq!(b.status(4).unwrap(), DofStatus::Active);
            }
            other => panic!("unexpected variant {}", other.name()),
        }
    }

    #[test]
    fn test_unknown_type_code() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&TRANSFORMATION_MAGIC.to_be_bytes());
        buffer.extend_from_slice(&99u32.to_be_bytes());
        let result = read_transformation(&mut buffer.as_slice());
        assert!(matches!(result, Err(TransformError::UnknownTypeCode(99))));
    }

    fn ffd_header(dims: [u32; 3]) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&TRANSFORMATION_MAGIC.to_be_bytes());
        buffer.extend_from_slice(&TYPE_BSPLINE_FFD.to_be_bytes());
        for n in dims {
            buffer.extend_from_slice(&n.to_be_bytes());
        }
        for v in [0.0f64, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0] {
            buffer.extend_from_slice(&v.to_be_bytes());
        }
        buffer
    }

    #[test]
    fn test_oversized_lattice_is_rejected_before_allocation() {
        let mut buffer = ffd_header([u32::MAX; 3]);
        buffer.extend_from_slice(&u32::MAX.to_be_bytes());
        let result = read_transformation(&mut buffer.as_slice());
        assert!(
            matches!(result, Err(TransformError::InvalidLattice(_)) | Err(TransformError::Parse(_))),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_dof_count_beyond_payload_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&TRANSFORMATION_MAGIC.to_be_bytes());
        buffer.extend_from_slice(&TYPE_AFFINE.to_be_bytes());
        buffer.extend_from_slice(&u32::MAX.to_be_bytes());
        buffer.extend_from_slice(&[0u8; 24]);
        assert!(matches!(read_transformation(&mut buffer.as_slice()), Err(TransformError::Parse(_))));
    }

    #[test]
    fn test_lattice_and_dof_block_must_agree() {
        let mut buffer = ffd_header([2, 2, 2]);
        buffer.extend_from_slice(&3u32.to_be_bytes());
        for _ in 0..3 {
            buffer.extend_from_slice(&0.0f64.to_be_bytes());
            buffer.extend_from_slice(&1i32.to_be_bytes());
        }
        let result = read_transformation(&mut buffer.as_slice());
        assert!(matches!(
            result,
            Err(TransformError::DofCountMismatch { expected: 24, actual: 3 })
        ));
    }

    #[test]
    fn test_lattice_size_overflow() {
        assert_eq!(BSplineFfd::dofs_for([2, 3, 4]).unwrap(), 72);
        assert!(matches!(
            BSplineFfd::dofs_for([usize::MAX, 2, 1]),
            Err(TransformError::InvalidLattice(_))
        ));
    }

    #[test]
    fn test_truncated_record_is_io_error() {
        let mut buffer = Vec::new();
        write_transformation(&Transformation::affine(), &mut buffer).unwrap();
        buffer.truncate(40);
        assert!(matches!(read_transformation(&mut buffer.as_slice()), Err(TransformError::Io(_))));
    }
}
