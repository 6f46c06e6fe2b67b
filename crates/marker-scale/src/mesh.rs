//! Point-cloud files: landmark dumps as OBJ/PLY and in-place rescaling of PLY
//! vertex data.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use nalgebra::Point3;

#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    #[error("unsupported mesh format for {path} (expected .obj or .ply)")]
    UnknownFormat { path: PathBuf },
    #[error("mesh I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed PLY {path}: {msg}")]
    Ply { path: PathBuf, msg: String },
}

impl MeshError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MeshError::UnknownFormat { .. } => 2,
            MeshError::Io { .. } | MeshError::Ply { .. } => 7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshFormat {
    Obj,
    Ply,
}

impl MeshFormat {
    pub fn from_path(path: &Path) -> Result<Self, MeshError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("obj") => Ok(MeshFormat::Obj),
            Some("ply") => Ok(MeshFormat::Ply),
            _ => Err(MeshError::UnknownFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

pub fn obj_string(points: &[Point3<f64>]) -> String {
    let mut out = String::new();
    for p in points {
        let _ = writeln!(out, "v {} {} {}", p.x, p.y, p.z);
    }
    out
}

/// ASCII PLY with every vertex coloured yellow.
pub fn ply_string(points: &[Point3<f64>]) -> String {
    let mut out = String::new();
    out.push_str("ply\nformat ascii 1.0\n");
    let _ = writeln!(out, "element vertex {}", points.len());
    out.push_str(
        "property float x\nproperty float y\nproperty float z\n\
         property uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n",
    );
    for p in points {
        let _ = writeln!(out, "{} {} {} 255 255 0", p.x, p.y, p.z);
    }
    out
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), MeshError> {
    let io = |source| MeshError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, contents).map_err(io)
}

/// Write `points` as OBJ or PLY, chosen by the file extension.
pub fn write_points(path: &Path, points: &[Point3<f64>]) -> Result<(), MeshError> {
    let text = match MeshFormat::from_path(path)? {
        MeshFormat::Obj => obj_string(points),
        MeshFormat::Ply => ply_string(points),
    };
    write_file(path, text.as_bytes())?;
    info!("wrote {} point(s) to {}", points.len(), path.display());
    Ok(())
}

/// Read the vertices of an OBJ file or an ASCII PLY file.
pub fn read_points(path: &Path) -> Result<Vec<Point3<f64>>, MeshError> {
    let format = MeshFormat::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|source| MeshError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ply_err = |msg: &str| MeshError::Ply {
        path: path.to_path_buf(),
        msg: msg.to_string(),
    };
    let parse_xyz = |mut tokens: std::str::SplitWhitespace<'_>| -> Option<Point3<f64>> {
        let x = tokens.next()?.parse().ok()?;
        let y = tokens.next()?.parse().ok()?;
        let z = tokens.next()?.parse().ok()?;
        Some(Point3::new(x, y, z))
    };

    match format {
        MeshFormat::Obj => Ok(text
            .lines()
            .filter_map(|l| l.trim().strip_prefix("v "))
            .filter_map(|rest| parse_xyz(rest.split_whitespace()))
            .collect()),
        MeshFormat::Ply => {
            let header = PlyHeader::parse(text.as_bytes()).map_err(|m| ply_err(&m))?;
            if header.format != PlyFormat::Ascii {
                return Err(ply_err("only ASCII PLY can be read back"));
            }
            let body = &text[header.body_offset..];
            body.lines()
                .take(header.vertex_count)
                .map(|l| parse_xyz(l.split_whitespace()).ok_or_else(|| ply_err("bad vertex line")))
                .collect()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScalarType {
    F32,
    F64,
    Other(usize),
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            "char" | "int8" | "uchar" | "uint8" => ScalarType::Other(1),
            "short" | "int16" | "ushort" | "uint16" => ScalarType::Other(2),
            "int" | "int32" | "uint" | "uint32" => ScalarType::Other(4),
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::F32 => 4,
            ScalarType::F64 => 8,
            ScalarType::Other(n) => n,
        }
    }
}

#[derive(Debug)]
struct PlyHeader {
    format: PlyFormat,
    vertex_count: usize,
    /// `(name, type)` of every vertex property, in record order.
    properties: Vec<(String, ScalarType)>,
    body_offset: usize,
}

impl PlyHeader {
    fn parse(bytes: &[u8]) -> Result<Self, String> {
        let mut format = None;
        let mut vertex_count = None;
        let mut properties = Vec::new();
        let mut in_vertex = false;
        let mut seen_element = false;
        let mut offset = 0;

        loop {
            let rest = &bytes[offset..];
            let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
                return Err("header is not terminated by end_header".into());
            };
            let line = std::str::from_utf8(&rest[..nl])
                .map_err(|_| "header is not UTF-8".to_string())?
                .trim();
            offset += nl + 1;

            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("ply") | Some("comment") | Some("obj_info") | None => {}
                Some("format") => {
                    format = Some(match tokens.next() {
                        Some("ascii") => PlyFormat::Ascii,
                        Some("binary_little_endian") => PlyFormat::BinaryLittleEndian,
                        Some("binary_big_endian") => PlyFormat::BinaryBigEndian,
                        other => return Err(format!("unknown format {other:?}")),
                    });
                }
                Some("element") => {
                    let name = tokens.next().unwrap_or_default();
                    in_vertex = name == "vertex";
                    if in_vertex {
                        if seen_element {
                            return Err("vertex must be the first element".into());
                        }
                        vertex_count = tokens.next().and_then(|n| n.parse().ok());
                    }
                    seen_element = true;
                }
                Some("property") if in_vertex => {
                    let ty = tokens.next().unwrap_or_default();
                    if ty == "list" {
                        return Err("list vertex properties are not supported".into());
                    }
                    let ty = ScalarType::parse(ty).ok_or(format!("unknown type `{ty}`"))?;
                    let name = tokens.next().ok_or("property without a name")?;
                    properties.push((name.to_string(), ty));
                }
                Some("property") => {}
                Some("end_header") => break,
                Some(other) => return Err(format!("unexpected header line `{other}`")),
            }
        }

        Ok(Self {
            format: format.ok_or("missing format line")?,
            vertex_count: vertex_count.ok_or("missing vertex element")?,
            properties,
            body_offset: offset,
        })
    }

    fn property(&self, name: &str) -> Option<(usize, ScalarType)> {
        self.properties
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| (i, self.properties[i].1))
    }
}

/// Multiply the vertex coordinates of a PLY file by `scale`.
///
/// Everything but `x`, `y` and `z` is copied byte for byte, including faces
/// and other elements that follow the vertices.
pub fn scale_ply(input: &Path, output: &Path, scale: f64) -> Result<(), MeshError> {
    let bytes = fs::read(input).map_err(|source| MeshError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let scaled = scale_ply_bytes(&bytes, scale).map_err(|msg| MeshError::Ply {
        path: input.to_path_buf(),
        msg,
    })?;
    write_file(output, &scaled)?;
    info!("scaled {} by {scale} into {}", input.display(), output.display());
    Ok(())
}

fn scale_ply_bytes(bytes: &[u8], scale: f64) -> Result<Vec<u8>, String> {
    let header = PlyHeader::parse(bytes)?;
    let axes = ["x", "y", "z"]
        .map(|a| header.property(a).ok_or(format!("vertex property `{a}` is missing")));
    let [x, y, z] = axes;
    let axes = [x?, y?, z?];

    let mut out = bytes[..header.body_offset].to_vec();
    let body = &bytes[header.body_offset..];

    match header.format {
        PlyFormat::Ascii => {
            let mut rest = body;
            for i in 0..header.vertex_count {
                let nl = rest
                    .iter()
                    .position(|&b| b == b'\n')
                    .ok_or(format!("vertex {i} is truncated"))?;
                let line = std::str::from_utf8(&rest[..nl])
                    .map_err(|_| format!("vertex {i} is not UTF-8"))?;
                let mut tokens: Vec<String> =
                    line.split_whitespace().map(str::to_owned).collect();
                for &(idx, _) in &axes {
                    let v: f64 = tokens
                        .get(idx)
                        .and_then(|t| t.parse().ok())
                        .ok_or(format!("vertex {i} has no numeric property {idx}"))?;
                    tokens[idx] = (v * scale).to_string();
                }
                out.extend_from_slice(tokens.join(" ").as_bytes());
                out.push(b'\n');
                rest = &rest[nl + 1..];
            }
            out.extend_from_slice(rest);
        }
        PlyFormat::BinaryLittleEndian | PlyFormat::BinaryBigEndian => {
            let little = header.format == PlyFormat::BinaryLittleEndian;
            let offsets: Vec<usize> = header
                .properties
                .iter()
                .scan(0, |acc, (_, ty)| {
                    let at = *acc;
                    *acc += ty.size();
                    Some(at)
                })
                .collect();
            let stride: usize = header.properties.iter().map(|(_, t)| t.size()).sum();
            let vertex_bytes = stride * header.vertex_count;
            if body.len() < vertex_bytes {
                return Err(format!(
                    "expected {vertex_bytes} bytes of vertex data, found {}",
                    body.len()
                ));
            }
            let mut vertices = body[..vertex_bytes].to_vec();
            for record in vertices.chunks_exact_mut(stride) {
                for &(idx, ty) in &axes {
                    let field = &mut record[offsets[idx]..offsets[idx] + ty.size()];
                    scale_binary_field(field, ty, little, scale)?;
                }
            }
            out.extend_from_slice(&vertices);
            out.extend_from_slice(&body[vertex_bytes..]);
        }
    }
    Ok(out)
}

fn scale_binary_field(
    field: &mut [u8],
    ty: ScalarType,
    little: bool,
    scale: f64,
) -> Result<(), String> {
    match ty {
        ScalarType::F32 => {
            let raw: [u8; 4] = field.try_into().map_err(|_| "short float field")?;
            let v = if little { f32::from_le_bytes(raw) } else { f32::from_be_bytes(raw) };
            let s = (v as f64 * scale) as f32;
            field.copy_from_slice(&if little { s.to_le_bytes() } else { s.to_be_bytes() });
        }
        ScalarType::F64 => {
            let raw: [u8; 8] = field.try_into().map_err(|_| "short double field")?;
            let v = if little { f64::from_le_bytes(raw) } else { f64::from_be_bytes(raw) };
            let s = v * scale;
            field.copy_from_slice(&if little { s.to_le_bytes() } else { s.to_be_bytes() });
        }
        ScalarType::Other(_) => return Err("coordinates must be float or double".into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Point3<f64>> {
        vec![Point3::new(0.5, -1.0, 2.0), Point3::new(1.0, 2.0, 3.25)]
    }

    #[test]
    fn obj_and_ply_round_trip() {
        let dir = tempfile::tempdir().expect("tmp");
        for name in ["pts.obj", "nested/pts.PLY"] {
            let path = dir.path().join(name);
            write_points(&path, &points()).expect("write");
            assert_eq!(read_points(&path).expect("read"), points());
        }
        let text = fs::read_to_string(dir.path().join("nested/pts.PLY")).expect("ply");
        assert!(text.contains("element vertex 2\n"));
        assert!(text.contains("0.5 -1 2 255 255 0\n"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = write_points(Path::new("pts.xyz"), &points()).expect_err("format");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn ascii_ply_scaling_keeps_other_columns_and_faces() {
        let ply = "ply\nformat ascii 1.0\nelement vertex 2\nproperty uchar red\n\
                   property float x\nproperty float y\nproperty float z\n\
                   element face 1\nproperty list uchar int vertex_indices\nend_header\n\
                   7 1 2 3\n8 -0.5 0 4\n3 0 1 1\n";
        let out = scale_ply_bytes(ply.as_bytes(), 2.0).expect("scale");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.ends_with("end_header\n7 2 4 6\n8 -1 0 8\n3 0 1 1\n"), "{text}");
    }

    fn binary_ply(little: bool) -> Vec<u8> {
        let fmt = if little { "binary_little_endian" } else { "binary_big_endian" };
        let mut bytes = format!(
            "ply\nformat {fmt} 1.0\ncomment test\nelement vertex 2\nproperty float x\n\
             property double y\nproperty float z\nproperty uchar red\nend_header\n"
        )
        .into_bytes();
        for (x, y, z, r) in [(1.0f32, 2.0f64, 3.0f32, 9u8), (-1.5, 0.25, 8.0, 10)] {
            if little {
                bytes.extend(x.to_le_bytes());
                bytes.extend(y.to_le_bytes());
                bytes.extend(z.to_le_bytes());
            } else {
                bytes.extend(x.to_be_bytes());
                bytes.extend(y.to_be_bytes());
                bytes.extend(z.to_be_bytes());
            }
            bytes.push(r);
        }
        bytes.extend_from_slice(b"trailing");
        bytes
    }

    #[test]
    fn binary_ply_scaling_in_both_byte_orders() {
        for little in [true, false] {
            let input = binary_ply(little);
            let out = scale_ply_bytes(&input, 2.0).expect("scale");
            let header = PlyHeader::parse(&out).expect("header");
            let body = &out[header.body_offset..];
            let y = &body[17 + 4..17 + 12];
            let y = if little {
                f64::from_le_bytes(y.try_into().expect("8 bytes"))
            } else {
                f64::from_be_bytes(y.try_into().expect("8 bytes"))
            };
            assert_eq!(y, 0.5);
            let x0 = &body[..4];
            let x0 = if little {
                f32::from_le_bytes(x0.try_into().expect("4 bytes"))
            } else {
                f32::from_be_bytes(x0.try_into().expect("4 bytes"))
            };
            assert_eq!(x0, 2.0);
            assert_eq!(body[16], 9);
            assert!(out.ends_with(b"trailing"));
            assert_eq!(out.len(), input.len());
        }
    }

    #[test]
    fn ply_without_coordinates_is_rejected() {
        let ply = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nend_header\n1\n";
        assert!(scale_ply_bytes(ply.as_bytes(), 2.0).is_err());
    }
}
