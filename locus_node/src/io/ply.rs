// locus_node/src/io/ply.rs

//! PLY reader for `ascii` and `binary_little_endian` files whose first
//! element is `vertex`.

use locus_core::messages::{Point, PointCloud};
use std::io::BufRead;

use super::{read_records, MapLoadError, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
}

struct VertexLayout {
    properties: Vec<(String, Scalar)>,
    count: usize,
}

impl VertexLayout {
    fn index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|(n, _)| n == name)
    }

    fn xyz(&self) -> Result<[usize; 3], MapLoadError> {
        let find = |name: &str| {
            self.index(name)
                .ok_or_else(|| MapLoadError::Parse(format!("PLY vertex has no '{name}' property")))
        };
        Ok([find("x")?, find("y")?, find("z")?])
    }
}

fn scalar_from_name(name: &str) -> Option<Scalar> {
    match name {
        "char" | "int8" => Some(Scalar::I8),
        "uchar" | "uint8" => Some(Scalar::U8),
        "short" | "int16" => Some(Scalar::I16),
        "ushort" | "uint16" => Some(Scalar::U16),
        "int" | "int32" => Some(Scalar::I32),
        "uint" | "uint32" => Some(Scalar::U32),
        "float" | "float32" => Some(Scalar::F32),
        "double" | "float64" => Some(Scalar::F64),
        _ => None,
    }
}

/// Reads a PLY file.
pub fn read_ply<R: BufRead>(mut reader: R) -> Result<PointCloud, MapLoadError> {
    let (layout, encoding) = read_header(&mut reader)?;
    let points = match encoding {
        Encoding::Ascii => read_ascii(reader, &layout)?,
        Encoding::BinaryLittleEndian => read_binary(reader, &layout)?,
    };
    Ok(PointCloud::new(String::new(), 0.0, points))
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<(VertexLayout, Encoding), MapLoadError> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(MapLoadError::Parse("missing 'ply' magic line".to_string()));
    }

    let mut encoding = None;
    let mut vertex: Option<VertexLayout> = None;
    // Set once an element other than `vertex` starts; its properties are ignored.
    let mut past_vertex = false;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(MapLoadError::Parse("unexpected EOF in PLY header".to_string()));
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["format", "ascii", ..] => encoding = Some(Encoding::Ascii),
            ["format", "binary_little_endian", ..] => encoding = Some(Encoding::BinaryLittleEndian),
            ["format", other, ..] => {
                return Err(MapLoadError::UnsupportedFormat(format!("PLY format {other}")));
            }
            ["element", "vertex", count] => {
                if past_vertex {
                    return Err(MapLoadError::UnsupportedFormat(
                        "PLY vertex element must come first".to_string(),
                    ));
                }
                let count = count
                    .parse()
                    .map_err(|_| MapLoadError::Parse(format!("invalid vertex count '{count}'")))?;
                vertex = Some(VertexLayout {
                    properties: Vec::new(),
                    count,
                });
            }
            ["element", ..] => past_vertex = true,
            ["property", "list", ..] if !past_vertex && vertex.is_some() => {
                return Err(MapLoadError::UnsupportedFormat(
                    "list properties on vertices".to_string(),
                ));
            }
            ["property", kind, name] if !past_vertex => {
                let layout = vertex
                    .as_mut()
                    .ok_or_else(|| MapLoadError::Parse("PLY property before any element".to_string()))?;
                let scalar = scalar_from_name(kind)
                    .ok_or_else(|| MapLoadError::Parse(format!("unknown PLY property type '{kind}'")))?;
                layout.properties.push((name.to_string(), scalar));
            }
            ["end_header"] => break,
            // comment, obj_info and properties of later elements
            _ => {}
        }
    }

    let encoding = encoding.ok_or_else(|| MapLoadError::Parse("PLY header has no format line".to_string()))?;
    let vertex = vertex.ok_or_else(|| MapLoadError::Parse("PLY header has no vertex element".to_string()))?;
    Ok((vertex, encoding))
}

fn read_ascii<R: BufRead>(reader: R, layout: &VertexLayout) -> Result<Vec<Point>, MapLoadError> {
    let [x, y, z] = layout.xyz()?;
    let intensity = layout.index("intensity");
    let mut points = Vec::new();
    let mut lines = reader.lines();
    while points.len() < layout.count {
        let line = lines
            .next()
            .ok_or_else(|| MapLoadError::Parse("unexpected EOF in PLY vertex data".to_string()))??;
        let values: Vec<f64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|e| MapLoadError::Parse(format!("bad PLY value in '{}': {e}", line.trim())))?;
        if values.len() < layout.properties.len() {
            return Err(MapLoadError::Parse(format!("short PLY vertex row '{}'", line.trim())));
        }
        let mut point = Point::new(values[x], values[y], values[z]);
        point.intensity = intensity.map(|i| values[i] as f32);
        points.push(point);
    }
    Ok(points)
}

fn read_binary<R: BufRead>(reader: R, layout: &VertexLayout) -> Result<Vec<Point>, MapLoadError> {
    let [x, y, z] = layout.xyz()?;
    let intensity = layout.index("intensity");

    let mut offsets = Vec::with_capacity(layout.properties.len());
    let mut stride = 0;
    for (_, scalar) in &layout.properties {
        offsets.push(stride);
        stride += scalar.size();
    }
    let read = |record: &[u8], i: usize| layout.properties[i].1.read_le(&record[offsets[i]..]);

    let data = read_records(reader, layout.count, stride)?;
    let points = data
        .chunks_exact(stride)
        .take(layout.count)
        .map(|record| {
            let mut point = Point::new(read(record, x), read(record, y), read(record, z));
            point.intensity = intensity.map(|i| read(record, i) as f32);
            point
        })
        .collect();
    Ok(points)
}
