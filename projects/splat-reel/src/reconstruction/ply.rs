// PLY vertex tables
//
// Reads ascii, binary_little_endian and binary_big_endian files. Only the
// `vertex` element is kept; other elements are skipped. Tables are written back
// as binary_little_endian with their original property types.

use crate::error::{PipelineError, PipelineResult};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Zeroth-order spherical harmonic basis constant.
pub const SH_C0: f32 = 0.282_094_8;

const VERTEX: &str = "vertex";
// Header counts are untrusted; rows past this grow the table as they are read
const MAX_PREALLOCATED_ROWS: usize = 1 << 20;

fn ply_err(message: impl Into<String>) -> PipelineError {
    PipelineError::Ply(message.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarKind {
    fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "char" | "int8" => Self::Char,
            "uchar" | "uint8" => Self::UChar,
            "short" | "int16" => Self::Short,
            "ushort" | "uint16" => Self::UShort,
            "int" | "int32" => Self::Int,
            "uint" | "uint32" => Self::UInt,
            "float" | "float32" => Self::Float,
            "double" | "float64" => Self::Double,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    fn size(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Double => 8,
        }
    }

    fn read<R: Read>(self, reader: &mut R, big_endian: bool) -> PipelineResult<f64> {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..self.size()];
        reader
            .read_exact(bytes)
            .map_err(|e| ply_err(format!("truncated binary body: {e}")))?;
        if big_endian {
            bytes.reverse();
        }
        let b = buf;
        let value = match self {
            Self::Char => i8::from_le_bytes([b[0]]) as f64,
            Self::UChar => b[0] as f64,
            Self::Short => i16::from_le_bytes([b[0], b[1]]) as f64,
            Self::UShort => u16::from_le_bytes([b[0], b[1]]) as f64,
            Self::Int => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::UInt => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::Float => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::Double => f64::from_le_bytes(b),
        };
        Ok(value)
    }

    fn write<W: Write>(self, writer: &mut W, value: f64) -> std::io::Result<()> {
        match self {
            Self::Char => writer.write_all(&(value as i8).to_le_bytes()),
            Self::UChar => writer.write_all(&(value as u8).to_le_bytes()),
            Self::Short => writer.write_all(&(value as i16).to_le_bytes()),
            Self::UShort => writer.write_all(&(value as u16).to_le_bytes()),
            Self::Int => writer.write_all(&(value as i32).to_le_bytes()),
            Self::UInt => writer.write_all(&(value as u32).to_le_bytes()),
            Self::Float => writer.write_all(&(value as f32).to_le_bytes()),
            Self::Double => writer.write_all(&value.to_le_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyProperty {
    pub name: String,
    pub kind: ScalarKind,
}

impl PlyProperty {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug)]
enum PropertyDecl {
    Scalar(PlyProperty),
    List {
        name: String,
        count: ScalarKind,
        item: ScalarKind,
    },
}

#[derive(Debug)]
struct ElementDecl {
    name: String,
    count: usize,
    properties: Vec<PropertyDecl>,
}

struct Header {
    encoding: Encoding,
    elements: Vec<ElementDecl>,
}

fn read_header<R: BufRead>(reader: &mut R) -> PipelineResult<Header> {
    let mut line = String::new();
    let mut next_line = |line: &mut String| -> PipelineResult<()> {
        line.clear();
        if reader.read_line(line)? == 0 {
            return Err(ply_err("header ended before end_header"));
        }
        Ok(())
    };

    next_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(ply_err("missing 'ply' magic"));
    }

    let mut encoding = None;
    let mut elements: Vec<ElementDecl> = Vec::new();
    loop {
        next_line(&mut line)?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["format", format, _version] => {
                encoding = Some(match *format {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::BinaryLittleEndian,
                    "binary_big_endian" => Encoding::BinaryBigEndian,
                    other => return Err(ply_err(format!("unknown format '{other}'"))),
                });
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_| ply_err(format!("bad element count '{count}'")))?;
                elements.push(ElementDecl {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| ply_err("property before any element"))?;
                element.properties.push(PropertyDecl::List {
                    name: name.to_string(),
                    count: parse_kind(count)?,
                    item: parse_kind(item)?,
                });
            }
            ["property", kind, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| ply_err("property before any element"))?;
                element
                    .properties
                    .push(PropertyDecl::Scalar(PlyProperty::new(*name, parse_kind(kind)?)));
            }
            _ => return Err(ply_err(format!("unexpected header line '{}'", line.trim()))),
        }
    }

    let encoding = encoding.ok_or_else(|| ply_err("header has no format line"))?;
    Ok(Header { encoding, elements })
}

fn parse_kind(name: &str) -> PipelineResult<ScalarKind> {
    ScalarKind::parse(name).ok_or_else(|| ply_err(format!("unknown property type '{name}'")))
}

fn scalar_properties(element: &ElementDecl) -> PipelineResult<Vec<PlyProperty>> {
    element
        .properties
        .iter()
        .map(|p| match p {
            PropertyDecl::Scalar(prop) => Ok(prop.clone()),
            PropertyDecl::List { name, .. } => Err(ply_err(format!(
                "list property '{name}' on the vertex element is not supported"
            ))),
        })
        .collect()
}

/// The vertex element of a PLY file. Values are held as `f64`, which is exact
/// for every PLY scalar type.
#[derive(Debug, Clone, PartialEq)]
pub struct PlyTable {
    properties: Vec<PlyProperty>,
    rows: Vec<Vec<f64>>,
}

impl PlyTable {
    pub fn new(properties: Vec<PlyProperty>) -> Self {
        Self {
            properties,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<f64>) -> PipelineResult<()> {
        if row.len() != self.properties.len() {
            return Err(ply_err(format!(
                "row has {} values for {} properties",
                row.len(),
                self.properties.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn properties(&self) -> &[PlyProperty] {
        &self.properties
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn read<R: BufRead>(mut reader: R) -> PipelineResult<Self> {
        let header = read_header(&mut reader)?;
        match header.encoding {
            Encoding::Ascii => Self::read_ascii(reader, &header),
            Encoding::BinaryLittleEndian => Self::read_binary(reader, &header, false),
            Encoding::BinaryBigEndian => Self::read_binary(reader, &header, true),
        }
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let file = File::open(path)
            .map_err(|e| ply_err(format!("cannot open {}: {e}", path.display())))?;
        Self::read(BufReader::new(file))
    }

    fn read_ascii<R: BufRead>(mut reader: R, header: &Header) -> PipelineResult<Self> {
        let mut body = String::new();
        reader.read_to_string(&mut body)?;
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());

        for element in &header.elements {
            if element.name != VERTEX {
                for _ in 0..element.count {
                    lines
                        .next()
                        .ok_or_else(|| ply_err(format!("truncated '{}' element", element.name)))?;
                }
                continue;
            }

            let mut table = Self::new(scalar_properties(element)?);
            table.rows.reserve(element.count.min(MAX_PREALLOCATED_ROWS));
            for i in 0..element.count {
                let line = lines
                    .next()
                    .ok_or_else(|| ply_err(format!("truncated vertex data at row {i}")))?;
                let row = line
                    .split_whitespace()
                    .take(table.properties.len())
                    .map(|t| t.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ply_err(format!("bad vertex row {i}: {e}")))?;
                table.push_row(row)?;
            }
            return Ok(table);
        }
        Err(ply_err("no vertex element"))
    }

    fn read_binary<R: BufRead>(mut reader: R, header: &Header, big_endian: bool) -> PipelineResult<Self> {
        for element in &header.elements {
            if element.name != VERTEX {
                for _ in 0..element.count {
                    for property in &element.properties {
                        match property {
                            PropertyDecl::Scalar(p) => {
                                p.kind.read(&mut reader, big_endian)?;
                            }
                            PropertyDecl::List { count, item, .. } => {
                                let n = count.read(&mut reader, big_endian)? as usize;
                                for _ in 0..n {
                                    item.read(&mut reader, big_endian)?;
                                }
                            }
                        }
                    }
                }
                continue;
            }

            let mut table = Self::new(scalar_properties(element)?);
            table.rows.reserve(element.count.min(MAX_PREALLOCATED_ROWS));
            for _ in 0..element.count {
                let row = table
                    .properties
                    .iter()
                    .map(|p| p.kind.read(&mut reader, big_endian))
                    .collect::<PipelineResult<Vec<_>>>()?;
                table.rows.push(row);
            }
            return Ok(table);
        }
        Err(ply_err("no vertex element"))
    }

    /// Writes the table as binary_little_endian PLY.
    pub fn write<W: Write>(&self, writer: &mut W) -> PipelineResult<()> {
        writeln!(writer, "ply")?;
        writeln!(writer, "format binary_little_endian 1.0")?;
        writeln!(writer, "element {} {}", VERTEX, self.rows.len())?;
        for property in &self.properties {
            writeln!(writer, "property {} {}", property.kind.name(), property.name)?;
        }
        writeln!(writer, "end_header")?;
        for row in &self.rows {
            for (property, value) in self.properties.iter().zip(row) {
                property.kind.write(writer, *value)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes to `path`, failing if the file already exists.
    pub fn save_new(&self, path: &Path) -> PipelineResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        self.write(&mut writer)
    }
}

/// Renderable points derived from a vertex table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 3]>,
}

const DEFAULT_COLOR: [u8; 3] = [200, 200, 200];

fn unit_to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions come from `x`/`y`/`z`. Colors come from `red`/`green`/`blue`
    /// (0-255 integers or 0-1 floats), else from Gaussian splat `f_dc_*`
    /// coefficients, else a flat gray.
    pub fn from_table(table: &PlyTable) -> PipelineResult<Self> {
        let column = |name: &str| {
            table
                .column(name)
                .ok_or_else(|| ply_err(format!("missing '{name}' property")))
        };
        let (x, y, z) = (column("x")?, column("y")?, column("z")?);

        let rgb = match (table.column("red"), table.column("green"), table.column("blue")) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };
        let dc = match (table.column("f_dc_0"), table.column("f_dc_1"), table.column("f_dc_2")) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };

        let mut cloud = Self::default();
        cloud.positions.reserve(table.len());
        cloud.colors.reserve(table.len());
        for row in table.rows() {
            cloud
                .positions
                .push([row[x] as f32, row[y] as f32, row[z] as f32]);
            let color = if let Some(cols) = rgb {
                cols.map(|c| match table.properties[c].kind {
                    ScalarKind::Float | ScalarKind::Double => unit_to_u8(row[c]),
                    _ => row[c].clamp(0.0, 255.0) as u8,
                })
            } else if let Some(cols) = dc {
                cols.map(|c| unit_to_u8(0.5 + (SH_C0 as f64) * row[c]))
            } else {
                DEFAULT_COLOR
            };
            cloud.colors.push(color);
        }
        Ok(cloud)
    }

    /// Float positions with uchar colors.
    #[cfg(test)]
    pub fn to_table(&self) -> PlyTable {
        let mut table = PlyTable::new(vec![
            PlyProperty::new("x", ScalarKind::Float),
            PlyProperty::new("y", ScalarKind::Float),
            PlyProperty::new("z", ScalarKind::Float),
            PlyProperty::new("red", ScalarKind::UChar),
            PlyProperty::new("green", ScalarKind::UChar),
            PlyProperty::new("blue", ScalarKind::UChar),
        ]);
        for (p, c) in self.positions.iter().zip(&self.colors) {
            table.rows.push(vec![
                p[0] as f64,
                p[1] as f64,
                p[2] as f64,
                c[0] as f64,
                c[1] as f64,
                c[2] as f64,
            ]);
        }
        table
    }
}
