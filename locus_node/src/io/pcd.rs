// locus_node/src/io/pcd.rs

//! PCD (Point Cloud Data) reader, the native format of PCL maps.
//!
//! Supports `DATA ascii` and uncompressed `DATA binary`. Only `x`, `y`, `z`
//! and an optional `intensity` field are kept.

use locus_core::messages::{Point, PointCloud};
use std::io::BufRead;

use super::{read_records, MapLoadError, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Ascii,
    Binary,
}

#[derive(Debug, Default)]
struct Header {
    fields: Vec<String>,
    sizes: Vec<usize>,
    types: Vec<char>,
    counts: Vec<usize>,
    width: usize,
    height: usize,
    points: Option<usize>,
}

impl Header {
    fn point_count(&self) -> Result<usize, MapLoadError> {
        match self.points {
            Some(points) => Ok(points),
            None => self
                .width
                .checked_mul(self.height.max(1))
                .ok_or_else(|| MapLoadError::Parse(format!("PCD size {}x{} overflows", self.width, self.height))),
        }
    }

    fn count(&self, field: usize) -> usize {
        self.counts.get(field).copied().unwrap_or(1)
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn scalar(&self, field: usize) -> Result<Scalar, MapLoadError> {
        let size = self.sizes.get(field).copied().unwrap_or(4);
        let kind = self.types.get(field).copied().unwrap_or('F');
        match (kind, size) {
            ('I', 1) => Ok(Scalar::I8),
            ('U', 1) => Ok(Scalar::U8),
            ('I', 2) => Ok(Scalar::I16),
            ('U', 2) => Ok(Scalar::U16),
            ('I', 4) => Ok(Scalar::I32),
            ('U', 4) => Ok(Scalar::U32),
            ('F', 4) => Ok(Scalar::F32),
            ('F', 8) => Ok(Scalar::F64),
            _ => Err(MapLoadError::Parse(format!(
                "unsupported PCD field type {kind}{size} for '{}'",
                self.fields[field]
            ))),
        }
    }
}

/// Field indices of the values we keep.
struct Layout {
    xyz: [usize; 3],
    intensity: Option<usize>,
}

impl Layout {
    fn find(header: &Header) -> Result<Self, MapLoadError> {
        let find = |name: &str| {
            header
                .field_index(name)
                .ok_or_else(|| MapLoadError::Parse(format!("PCD file has no '{name}' field")))
        };
        let layout = Self {
            xyz: [find("x")?, find("y")?, find("z")?],
            intensity: header.field_index("intensity"),
        };
        for field in layout.xyz.into_iter().chain(layout.intensity) {
            if header.count(field) == 0 {
                return Err(MapLoadError::Parse(format!(
                    "PCD field '{}' has COUNT 0",
                    header.fields[field]
                )));
            }
        }
        Ok(layout)
    }
}

/// Start of every field within a record, plus the record length, where one
/// field element occupies `unit(field)` positions.
fn field_offsets(header: &Header, unit: impl Fn(usize) -> usize) -> Result<(Vec<usize>, usize), MapLoadError> {
    let mut offsets = Vec::with_capacity(header.fields.len());
    let mut offset = 0usize;
    for field in 0..header.fields.len() {
        offsets.push(offset);
        offset = unit(field)
            .checked_mul(header.count(field))
            .and_then(|width| offset.checked_add(width))
            .ok_or_else(|| MapLoadError::Parse("PCD record size overflows".to_string()))?;
    }
    Ok((offsets, offset))
}

/// Reads a PCD file.
pub fn read_pcd<R: BufRead>(mut reader: R) -> Result<PointCloud, MapLoadError> {
    let (header, format) = read_header(&mut reader)?;
    let count = header.point_count()?;

    let points = match format {
        DataFormat::Ascii => read_ascii(reader, &header, count)?,
        DataFormat::Binary => read_binary(reader, &header, count)?,
    };
    Ok(PointCloud::new(String::new(), 0.0, points))
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<(Header, DataFormat), MapLoadError> {
    let mut header = Header::default();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(MapLoadError::Parse("unexpected EOF in PCD header".to_string()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let values = &parts[1..];
        match parts[0] {
            "FIELDS" => header.fields = values.iter().map(|s| s.to_string()).collect(),
            "SIZE" => header.sizes = parse_all(values, "SIZE")?,
            "TYPE" => header.types = values.iter().filter_map(|s| s.chars().next()).collect(),
            "COUNT" => header.counts = parse_all(values, "COUNT")?,
            "WIDTH" => header.width = parse_one(values, "WIDTH")?,
            "HEIGHT" => header.height = parse_one(values, "HEIGHT")?,
            "POINTS" => header.points = Some(parse_one(values, "POINTS")?),
            "DATA" => {
                let format = match values.first().copied() {
                    Some("ascii") => DataFormat::Ascii,
                    Some("binary") => DataFormat::Binary,
                    Some(other) => {
                        return Err(MapLoadError::UnsupportedFormat(format!("PCD DATA {other}")))
                    }
                    None => return Err(MapLoadError::Parse("PCD DATA line has no format".into())),
                };
                return Ok((header, format));
            }
            // VERSION, VIEWPOINT and anything unknown carry nothing we need.
            _ => {}
        }
    }
}

fn parse_one(values: &[&str], key: &str) -> Result<usize, MapLoadError> {
    values
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MapLoadError::Parse(format!("invalid PCD {key} line")))
}

fn parse_all(values: &[&str], key: &str) -> Result<Vec<usize>, MapLoadError> {
    values
        .iter()
        .map(|v| v.parse().map_err(|_| MapLoadError::Parse(format!("invalid PCD {key} value '{v}'"))))
        .collect()
}

fn read_ascii<R: BufRead>(reader: R, header: &Header, count: usize) -> Result<Vec<Point>, MapLoadError> {
    let layout = Layout::find(header)?;
    let (offsets, _) = field_offsets(header, |_| 1)?;
    let mut points = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let values: Vec<f64> = trimmed
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| MapLoadError::Parse(format!("bad PCD value in '{trimmed}': {e}")))?;
        let get = |i: usize| {
            values
                .get(i)
                .copied()
                .ok_or_else(|| MapLoadError::Parse(format!("short PCD row '{trimmed}'")))
        };
        let [x, y, z] = layout.xyz.map(|field| offsets[field]);
        let mut point = Point::new(get(x)?, get(y)?, get(z)?);
        if let Some(field) = layout.intensity {
            point.intensity = Some(get(offsets[field])? as f32);
        }
        if point_is_finite(&point) {
            points.push(point);
        }
        if points.len() == count {
            break;
        }
    }
    Ok(points)
}

fn read_binary<R: BufRead>(reader: R, header: &Header, count: usize) -> Result<Vec<Point>, MapLoadError> {
    let scalars: Vec<Scalar> = (0..header.fields.len())
        .map(|i| header.scalar(i))
        .collect::<Result<_, _>>()?;
    let layout = Layout::find(header)?;
    let (offsets, stride) = field_offsets(header, |i| scalars[i].size())?;
    let read = |record: &[u8], field: usize| scalars[field].read_le(&record[offsets[field]..]);

    let data = read_records(reader, count, stride)?;
    let points = data
        .chunks_exact(stride)
        .take(count)
        .filter_map(|record| {
            let [x, y, z] = layout.xyz.map(|field| read(record, field));
            let mut point = Point::new(x, y, z);
            if let Some(field) = layout.intensity {
                point.intensity = Some(read(record, field) as f32);
            }
            point_is_finite(&point).then_some(point)
        })
        .collect();
    Ok(points)
}

/// PCL writes NaN for invalid returns in organized clouds.
fn point_is_finite(point: &Point) -> bool {
    point.position.coords.iter().all(|v| v.is_finite())
}
