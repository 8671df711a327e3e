//! Import of legacy text transformation files.
//!
//! Files without the binary magic number are matched against each legacy
//! signature in turn: rigid, affine, B-spline FFD, multi-level. The first
//! parser that consumes the whole file wins.
//!
//! ```text
//! DOF: 6                      rigid, one "value [status]" line per DOF
//! DOF: 12                     affine, same body
//! FFD: nx ny nz ox oy oz sx sy sz
//!                             B-spline, one "dx dy dz" line per control point
//! MFFD: n                     multi-level, followed by n blocks of the above
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::error::{Result, TransformError};
use crate::image::ImageGeometry;
use crate::spatial::{Direction3, Point3, Spacing3};
use super::{BSplineFfd, DofStatus, HomogeneousKind, HomogeneousTransform, MultiLevelTransform, Transform, Transformation};

type Parser = fn(&mut &[&str]) -> Result<Transformation>;

const SIGNATURES: [(&str, Parser); 4] = [
    ("rigid", parse_rigid),
    ("affine", parse_affine),
    ("bspline-ffd", parse_ffd),
    ("multi-level", parse_multi_level),
];

/// Sniff and parse a legacy file.
pub fn import(bytes: &[u8]) -> Result<Transformation> {
    let text = std::str::from_utf8(bytes).map_err(|_| {
        TransformError::UnrecognizedFormat("no magic number and not a text file".to_string())
    })?;
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    for (name, parser) in SIGNATURES {
        let mut rest = lines.as_slice();
        match parser(&mut rest) {
            Ok(t) if rest.is_empty() => {
                tracing::warn!("Imported legacy {} transformation with {} DOFs", name, t.number_of_dofs());
                return Ok(t);
            }
            Ok(_) => tracing::debug!("Legacy {} signature matched but trailing data remained", name),
            Err(e) => tracing::debug!("Legacy {} signature rejected: {}", name, e),
        }
    }
    Err(TransformError::UnrecognizedFormat(
        "no magic number and no legacy signature matched".to_string(),
    ))
}

fn next_line<'a, 'b>(lines: &mut &'b [&'a str]) -> Result<&'a str> {
    let slice: &'b [&'a str] = *lines;
    let (first, rest) = slice
        .split_first()
        .ok_or_else(|| TransformError::parse("unexpected end of file"))?;
    *lines = rest;
    Ok(*first)
}

fn numbers(text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|_| TransformError::parse(format!("not a number: {}", t))))
        .collect()
}

fn header<'a>(line: &'a str, tag: &str) -> Result<&'a str> {
    line.strip_prefix(tag)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| TransformError::parse(format!("expected {} header, found {:?}", tag, line)))
}

fn parse_homogeneous(lines: &mut &[&str], kind: HomogeneousKind) -> Result<HomogeneousTransform> {
    let count = numbers(header(next_line(lines)?, "DOF")?)?;
    if count.len() != 1 || count[0] as usize != kind.number_of_dofs() {
        return Err(TransformError::parse(format!("expected DOF: {}", kind.number_of_dofs())));
    }

    let mut values = Vec::with_capacity(kind.number_of_dofs());
    let mut status = Vec::with_capacity(kind.number_of_dofs());
    for _ in 0..kind.number_of_dofs() {
        let fields = numbers(next_line(lines)?)?;
        match fields.as_slice() {
            [value] => {
                values.push(*value);
                status.push(DofStatus::Active);
            }
            [value, code] => {
                values.push(*value);
                status.push(DofStatus::from_code(*code as i32));
            }
            _ => return Err(TransformError::parse("expected \"value [status]\"")),
        }
    }

    let mut t = HomogeneousTransform::with_parameters(kind, values)?;
    for (i, s) in status.into_iter().enumerate() {
        t.put_status(i, s)?;
    }
    Ok(t)
}

fn parse_rigid(lines: &mut &[&str]) -> Result<Transformation> {
    parse_homogeneous(lines, HomogeneousKind::Rigid).map(Into::into)
}

fn parse_affine(lines: &mut &[&str]) -> Result<Transformation> {
    parse_homogeneous(lines, HomogeneousKind::Affine).map(Into::into)
}

fn parse_ffd(lines: &mut &[&str]) -> Result<Transformation> {
    let fields = numbers(header(next_line(lines)?, "FFD")?)?;
    if fields.len() != 9 || fields[..3].iter().any(|&n| n < 1.0 || n.fract() != 0.0 || n > u32::MAX as f64) {
        return Err(TransformError::parse("expected FFD: nx ny nz ox oy oz sx sy sz"));
    }
    let dims = [fields[0] as usize, fields[1] as usize, fields[2] as usize];
    let control_points = BSplineFfd::dofs_for(dims)? / 3;
    if control_points > lines.len() {
        return Err(TransformError::parse(format!(
            "FFD lattice {:?} needs {} displacement lines, {} remain",
            dims,
            control_points,
            lines.len()
        )));
    }
    let lattice = ImageGeometry::new(
        dims,
        Point3::new([fields[3], fields[4], fields[5]]),
        Spacing3::new([fields[6], fields[7], fields[8]]),
        Direction3::identity(),
    )
    .map_err(|e| TransformError::invalid_lattice(e.to_string()))?;

    let mut ffd = BSplineFfd::new(lattice);
    let n = ffd.number_of_control_points();
    for cp in 0..n {
        let displacement = numbers(next_line(lines)?)?;
        if displacement.len() != 3 {
            return Err(TransformError::parse("expected \"dx dy dz\""));
        }
        for (axis, value) in displacement.into_iter().enumerate() {
            ffd.put_dof(axis * n + cp, value)?;
        }
    }
    Ok(ffd.into())
}

fn parse_multi_level(lines: &mut &[&str]) -> Result<Transformation> {
    let count = numbers(header(next_line(lines)?, "MFFD")?)?;
    if count.len() != 1 || count[0] < 0.0 || count[0].fract() != 0.0 {
        return Err(TransformError::parse("expected MFFD: n"));
    }

    let mut chain = MultiLevelTransform::default();
    for _ in 0..count[0] as usize {
        let level = [parse_rigid as Parser, parse_affine, parse_ffd]
            .into_iter()
            .find_map(|parser| {
                let mut attempt = *lines;
                parser(&mut attempt).ok().map(|t| (t, attempt))
            });
        match level {
            Some((t, rest)) => {
                chain.push(t);
                *lines = rest;
            }
            None => return Err(TransformError::parse("unreadable level in MFFD block")),
        }
    }
    Ok(chain.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Vector3;

    #[test]
    fn test_rigid_signature() {
        let text = "DOF: 6\n1\n2\n3\n0\n0 0\n90\n";
        let t = import(text.as_bytes()).unwrap();
        assert_eq!(t.name(), "rigid");
        assert_eq!(t.status(4).unwrap(), DofStatus::Passive);
        let q = t.transform_point(&Point3::new([1.0, 0.0, 0.0]));
        assert!(q.distance(&Point3::new([1.0, 3.0, 3.0])) < 1e-12);
    }

    #[test]
    fn test_affine_signature() {
        let mut text = String::from("# exported\nDOF: 12\n");
        for v in [0, 0, 0, 0, 0, 0, 200, 100, 100, 0, 0, 0] {
            text.push_str(&format!("{}\n", v));
        }
        let t = import(text.as_bytes()).unwrap();
        assert_eq!(t.name(), "affine");
        let q = t.transform_point(&Point3::new([1.5, 1.0, 1.0]));
        assert!(q.distance(&Point3::new([3.0, 1.0, 1.0])) < 1e-12);
    }

    #[test]
    fn test_oversized_ffd_header_is_rejected() {
        let text = "FFD: 4294967295 4294967295 4294967295 0 0 0 1 1 1\n0 0 0\n";
        let mut lines: &[&str] = &["FFD: 4294967295 4294967295 4294967295 0 0 0 1 1 1", "0 0 0"];
        assert!(matches!(parse_ffd(&mut lines), Err(TransformError::InvalidLattice(_))));
        assert!(matches!(import(text.as_bytes()), Err(TransformError::UnrecognizedFormat(_))));

        let mut short: &[&str] = &["FFD: 1000 1000 1000 0 0 0 1 1 1", "0 0 0"];
        assert!(matches!(parse_ffd(&mut short), Err(TransformError::Parse(_))));

        let mut huge: &[&str] = &["FFD: 1e30 1 1 0 0 0 1 1 1"];
        assert!(matches!(parse_ffd(&mut huge), Err(TransformError::Parse(_))));
    }

    #[test]
    fn test_ffd_signature() {
        let mut text = String::from("FFD: 1 1 2 0 0 0 10 10 10\n");
        text.push_str("0 0 0\n1 -1 0.5\n");
        let t = import(text.as_bytes()).unwrap();
        match &t {
            Transformation::FreeForm(ffd) => {
                assert_eq!(ffd.control_point(0, 0, 1), Vector3::new([1.0, -1.0, 0.5]));
            }
            other => panic!("unexpected variant {}", other.name()),
        }
    }

    #[test]
    fn test_multi_level_signature() {
        let text = "MFFD: 2\nDOF: 6\n1\n0\n0\n0\n0\n0\nFFD: 1 1 1 0 0 0 1 1 1\n0 0 0\n";
        let t = import(text.as_bytes()).unwrap();
        assert_eq!(t.name(), "multi-level");
        assert_eq!(t.number_of_dofs(), 9);
    }

    #[test]
    fn test_unrecognized_file() {
        let result = import(b"DOF: 7\n1\n");
        assert!(matches!(result, Err(TransformError::UnrecognizedFormat(_))));
        let result = import(&[0xff, 0xfe, 0x00, 0x01]);
        assert!(matches!(result, Err(TransformError::UnrecognizedFormat(_))));
    }

    #[test]
    fn test_trailing_data_is_rejected() {
        let text = "DOF: 6\n0\n0\n0\n0\n0\n0\nextra\n";
        assert!(import(text.as_bytes()).is_err());
    }
}
