//! Polygon meshes and point clouds: Wavefront OBJ, OFF, ASCII PLY, STL and XYZ.
//!
//! Polygons are fan-triangulated, so `faces` is always `[m, 3]`. Faces that reference missing
//! vertices are dropped with a warning.

use std::fs;

use crate::error::{LoadError, LoadResult};
use crate::types::{ElementType, Mesh, NativeValue, NumericArray};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};

/// Lines parsed between cancellation checks.
const LINES_PER_CHECK: usize = 4096;

#[derive(Debug, Default)]
struct MeshBuilder {
    vertices: Vec<f64>,
    normals: Vec<f64>,
    colors: Vec<f64>,
    color_channels: usize,
    color_type: Option<ElementType>,
    faces: Vec<f64>,
    dropped_faces: usize,
    skipped_lines: usize,
}

impl MeshBuilder {
    fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    fn push_vertex(&mut self, xyz: &[f64]) {
        self.vertices.extend_from_slice(&xyz[..3]);
    }

    fn push_color(&mut self, rgb: &[f64], element_type: ElementType) {
        if self.color_channels == 0 {
            self.color_channels = rgb.len();
            self.color_type = Some(element_type);
        }
        if rgb.len() == self.color_channels {
            self.colors.extend_from_slice(rgb);
        }
    }

    /// Fan-triangulate a polygon of zero-based indices.
    fn push_polygon(&mut self, indices: &[i64]) {
        let n = self.vertex_count() as i64;
        if indices.len() < 3 || indices.iter().any(|&i| i < 0 || i >= n) {
            self.dropped_faces += 1;
            return;
        }
        for k in 1..indices.len() - 1 {
            self.faces
                .extend([indices[0] as f64, indices[k] as f64, indices[k + 1] as f64]);
        }
    }

    fn finish(self, format: &str) -> LoadResult<Loaded> {
        let n = self.vertex_count();
        if n == 0 {
            return Err(LoadError::corrupt(format, "no vertices found"));
        }
        let array = |et, cols: usize, values: Vec<f64>| {
            NumericArray::from_shape_vec(et, &[values.len() / cols.max(1), cols], values)
                .ok_or_else(|| LoadError::corrupt(format, "inconsistent vertex attribute count"))
        };

        let mut warnings = Vec::new();
        let normals = if self.normals.len() == n * 3 {
            Some(array(ElementType::Float32, 3, self.normals)?)
        } else {
            if !self.normals.is_empty() {
                warnings.push(format!(
                    "{} normals for {n} vertices; normals ignored",
                    self.normals.len() / 3
                ));
            }
            None
        };
        let colors = match self.color_type {
            Some(et) if self.colors.len() == n * self.color_channels => {
                Some(array(et, self.color_channels, self.colors)?)
            }
            Some(_) => {
                warnings.push("colors are not given for every vertex; colors ignored".to_string());
                None
            }
            None => None,
        };
        let faces = if self.faces.is_empty() {
            None
        } else {
            Some(array(ElementType::Int64, 3, self.faces)?)
        };
        if self.dropped_faces > 0 {
            warnings.push(format!(
                "{} faces reference missing vertices and were dropped",
                self.dropped_faces
            ));
        }
        if self.skipped_lines > 0 {
            log::debug!("{format}: skipped {} unparsable lines", self.skipped_lines);
        }

        let mesh = Mesh {
            vertices: array(ElementType::Float32, 3, self.vertices)?,
            faces,
            normals,
            colors,
        };
        let (vertices, face_count) = (mesh.vertex_count(), mesh.face_count());
        let mut loaded = Loaded::new(NativeValue::Mesh(mesh))
            .attr("vertices", vertices)
            .attr("faces", face_count);
        for w in warnings {
            loaded.warn(w);
        }
        Ok(loaded)
    }
}

fn floats<'a>(tokens: impl Iterator<Item = &'a str>) -> Option<Vec<f64>> {
    tokens.map(|t| t.parse::<f64>().ok()).collect()
}

fn text_lines<'a>(
    ctx: &LoadContext<'_>,
    text: &'a str,
) -> impl Iterator<Item = LoadResult<&'a str>> {
    let cancel = ctx.cancel.clone();
    text.lines().enumerate().map(move |(i, line)| {
        if i % LINES_PER_CHECK == 0 {
            cancel.check()?;
        }
        Ok(line)
    })
}

fn next_line<'a>(
    lines: &mut impl Iterator<Item = LoadResult<&'a str>>,
) -> LoadResult<Option<&'a str>> {
    lines.next().transpose()
}

fn read_text(ctx: &LoadContext<'_>, format: &str) -> LoadResult<String> {
    let bytes = fs::read(ctx.path)?;
    String::from_utf8(bytes)
        .map_err(|e| LoadError::corrupt_with(format, "file is not valid utf-8 text", e))
}

/// Loader for Wavefront `.obj` meshes (`v`, `vn` and `f` records).
#[derive(Debug, Clone, Copy)]
pub struct ObjPlugin;

impl LoaderPlugin for ObjPlugin {
    fn format_tag(&self) -> &'static str {
        "obj"
    }

    fn description(&self) -> &'static str {
        "Wavefront OBJ mesh"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["obj"]
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let text = read_text(ctx, "obj")?;
        parse_obj(ctx, &text)?.finish("obj")
    }
}

fn parse_obj(ctx: &LoadContext<'_>, text: &str) -> LoadResult<MeshBuilder> {
    let mut mesh = MeshBuilder::default();
    for item in text_lines(ctx, text) {
        let line = item?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => match floats(tokens) {
                Some(v) if v.len() >= 3 => {
                    mesh.push_vertex(&v);
                    if v.len() >= 6 {
                        mesh.push_color(&v[3..6], ElementType::Float32);
                    }
                }
                _ => mesh.skipped_lines += 1,
            },
            Some("vn") => match floats(tokens) {
                Some(v) if v.len() >= 3 => mesh.normals.extend_from_slice(&v[..3]),
                _ => mesh.skipped_lines += 1,
            },
            Some("f") => {
                let n = mesh.vertex_count() as i64;
                // `v`, `v/vt`, `v//vn` or `v/vt/vn`; indices are 1-based, negatives count back.
                let indices: Option<Vec<i64>> = tokens
                    .map(|t| {
                        let idx = t.split('/').next()?.parse::<i64>().ok()?;
                        match idx {
                            0 => None,
                            i if i > 0 => Some(i - 1),
                            i => Some(n + i),
                        }
                    })
                    .collect();
                match indices {
                    Some(indices) => mesh.push_polygon(&indices),
                    None => mesh.dropped_faces += 1,
                }
            }
            _ => {}
        }
    }
    Ok(mesh)
}

/// Loader for Object File Format (`.off`) meshes.
#[derive(Debug, Clone, Copy)]
pub struct OffPlugin;

impl LoaderPlugin for OffPlugin {
    fn format_tag(&self) -> &'static str {
        "off"
    }

    fn description(&self) -> &'static str {
        "Object File Format mesh"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["off"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        [&b"OFF"[..], b"COFF", b"NOFF", b"CNOFF"].iter().any(|magic| {
            peeked.starts_with(magic)
                && peeked
                    .get(magic.len())
                    .is_none_or(|b| b.is_ascii_whitespace())
        })
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let text = read_text(ctx, "off")?;
        parse_off(ctx, &text)?.finish("off")
    }
}

fn parse_off(ctx: &LoadContext<'_>, text: &str) -> LoadResult<MeshBuilder> {
    let corrupt = |m: String| LoadError::corrupt("off", m);
    let mut lines = text_lines(ctx, text).filter(|item| {
        item.as_ref()
            .map(|l| {
                let l = l.trim();
                !l.is_empty() && !l.starts_with('#')
            })
            .unwrap_or(true)
    });

    let header = next_line(&mut lines)?.ok_or_else(|| corrupt("empty file".into()))?;
    let header = header.trim();
    let magic_len = header.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(header.len());
    let (magic, rest) = header.split_at(magic_len);
    if !magic.ends_with("OFF") {
        return Err(corrupt(format!("expected OFF header, found '{magic}'")));
    }
    // Counts may share the header line.
    let counts_line = if rest.trim().is_empty() {
        next_line(&mut lines)?.ok_or_else(|| corrupt("missing element counts".into()))?
    } else {
        rest
    };
    let counts: Vec<usize> = counts_line
        .split_whitespace()
        .map(|t| t.parse().map_err(|_| corrupt(format!("invalid count '{t}'"))))
        .collect::<LoadResult<_>>()?;
    let (&nv, &nf) = (
        counts.first().ok_or_else(|| corrupt("missing vertex count".into()))?,
        counts.get(1).ok_or_else(|| corrupt("missing face count".into()))?,
    );

    let mut mesh = MeshBuilder::default();
    for i in 0..nv {
        let line = next_line(&mut lines)?
            .ok_or_else(|| corrupt(format!("expected {nv} vertices, found {i}")))?;
        let v = floats(line.split_whitespace())
            .ok_or_else(|| corrupt(format!("invalid vertex line '{line}'")))?;
        if v.len() < 3 {
            return Err(corrupt(format!("vertex {i} has fewer than 3 coordinates")));
        }
        mesh.push_vertex(&v);
        if magic.starts_with('C') && v.len() >= 6 {
            mesh.push_color(&v[3..], ElementType::Float32);
        }
    }
    for i in 0..nf {
        let Some(line) = next_line(&mut lines)? else {
            return Err(corrupt(format!("expected {nf} faces, found {i}")));
        };
        let tokens: Vec<i64> = line
            .split_whitespace()
            .map_while(|t| t.parse::<i64>().ok())
            .collect();
        match tokens.split_first() {
            Some((&k, rest)) if k >= 0 && rest.len() >= k as usize => {
                mesh.push_polygon(&rest[..k as usize])
            }
            _ => mesh.dropped_faces += 1,
        }
    }
    Ok(mesh)
}

/// Loader for ASCII Stanford `.ply` meshes.
#[derive(Debug, Clone, Copy)]
pub struct PlyPlugin;

#[derive(Debug)]
enum PlyProperty {
    Scalar(String),
    List(String),
}

#[derive(Debug)]
struct PlyElement {
    name: String,
    count: usize,
    properties: Vec<PlyProperty>,
}

impl LoaderPlugin for PlyPlugin {
    fn format_tag(&self) -> &'static str {
        "ply"
    }

    fn description(&self) -> &'static str {
        "Stanford PLY mesh (ASCII)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ply"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        peeked.starts_with(b"ply\n") || peeked.starts_with(b"ply\r\n")
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let bytes = fs::read(ctx.path)?;
        parse_ply(ctx, &bytes)?.finish("ply")
    }
}

fn parse_ply(ctx: &LoadContext<'_>, bytes: &[u8]) -> LoadResult<MeshBuilder> {
    let corrupt = |m: String| LoadError::corrupt("ply", m);
    let header_end = bytes
        .windows(b"end_header".len())
        .position(|w| w == b"end_header")
        .ok_or_else(|| corrupt("missing end_header".into()))?;
    let header = String::from_utf8_lossy(&bytes[..header_end]);

    let mut elements: Vec<PlyElement> = Vec::new();
    for line in header.lines().skip(1) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["format", "ascii", ..] => {}
            ["format", encoding, ..] => {
                return Err(corrupt(format!("{encoding} encoding is not supported, only ascii")));
            }
            ["element", name, count] => elements.push(PlyElement {
                name: (*name).to_string(),
                count: count
                    .parse()
                    .map_err(|_| corrupt(format!("invalid element count '{count}'")))?,
                properties: Vec::new(),
            }),
            ["property", "list", _, _, name] => {
                if let Some(el) = elements.last_mut() {
                    el.properties.push(PlyProperty::List((*name).to_string()));
                }
            }
            ["property", _, name] => {
                if let Some(el) = elements.last_mut() {
                    el.properties.push(PlyProperty::Scalar((*name).to_string()));
                }
            }
            _ => {}
        }
    }

    let body = std::str::from_utf8(&bytes[header_end + b"end_header".len()..])
        .map_err(|e| LoadError::corrupt_with("ply", "body is not ascii text", e))?;
    let mut lines = text_lines(ctx, body)
        .filter(|item| item.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true));
    let mut mesh = MeshBuilder::default();

    for element in &elements {
        let scalar_index = |name: &str| {
            element
                .properties
                .iter()
                .position(|p| matches!(p, PlyProperty::Scalar(n) if n == name))
        };
        let xyz = ["x", "y", "z"].map(|n| scalar_index(n));
        let nxyz = ["nx", "ny", "nz"].map(|n| scalar_index(n));
        let rgb = ["red", "green", "blue"].map(|n| scalar_index(n));

        for i in 0..element.count {
            let line = next_line(&mut lines)?.ok_or_else(|| {
                corrupt(format!(
                    "expected {} '{}' records, found {i}",
                    element.count, element.name
                ))
            })?;
            let values = floats(line.split_whitespace())
                .ok_or_else(|| corrupt(format!("invalid {} record '{line}'", element.name)))?;

            // Scalar properties are positional; a list property consumes its count plus entries.
            let mut scalars: Vec<f64> = Vec::with_capacity(element.properties.len());
            let mut list: Option<Vec<i64>> = None;
            let mut pos = 0usize;
            for prop in &element.properties {
                match prop {
                    PlyProperty::Scalar(_) => {
                        scalars.push(values.get(pos).copied().unwrap_or(f64::NAN));
                        pos += 1;
                    }
                    PlyProperty::List(name) => {
                        let remaining = values.len().saturating_sub(pos + 1);
                        let k = match values.get(pos).copied() {
                            None => 0,
                            Some(c) if c >= 0.0 && c.fract() == 0.0 && c <= remaining as f64 => {
                                c as usize
                            }
                            Some(c) => {
                                return Err(corrupt(format!(
                                    "list length {c} in {} record '{line}' exceeds its \
                                     {remaining} values",
                                    element.name
                                )));
                            }
                        };
                        let items = values.get(pos + 1..pos + 1 + k).unwrap_or(&[]);
                        if name == "vertex_indices" || name == "vertex_index" {
                            list = Some(items.iter().map(|&v| v as i64).collect());
                        }
                        pos += 1 + k;
                        scalars.push(f64::NAN);
                    }
                }
            }

            let pick = |idx: [Option<usize>; 3]| -> Option<[f64; 3]> {
                Some([scalars[idx[0]?], scalars[idx[1]?], scalars[idx[2]?]])
            };
            if element.name == "vertex" {
                let p = pick(xyz).ok_or_else(|| corrupt("vertex element lacks x/y/z".into()))?;
                mesh.push_vertex(&p);
                if let Some(n) = pick(nxyz) {
                    mesh.normals.extend_from_slice(&n);
                }
                if let Some(c) = pick(rgb) {
                    mesh.push_color(&c, ElementType::UInt8);
                }
            } else if element.name == "face" {
                match list {
                    Some(indices) => mesh.push_polygon(&indices),
                    None => mesh.dropped_faces += 1,
                }
            }
        }
    }
    Ok(mesh)
}

/// Loader for STL meshes, binary or ASCII.
#[derive(Debug, Clone, Copy)]
pub struct StlPlugin;

impl LoaderPlugin for StlPlugin {
    fn format_tag(&self) -> &'static str {
        "stl"
    }

    fn description(&self) -> &'static str {
        "STL triangle mesh (binary or ASCII)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["stl"]
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let bytes = fs::read(ctx.path)?;
        let mesh = if is_binary_stl(&bytes) {
            parse_binary_stl(ctx, &bytes)?
        } else {
            let text = std::str::from_utf8(&bytes).map_err(|e| {
                LoadError::corrupt_with("stl", "neither binary STL nor ASCII text", e)
            })?;
            parse_ascii_stl(ctx, text)?
        };
        mesh.finish("stl")
    }
}

/// Binary STL: 80-byte header, `u32` triangle count, 50 bytes per triangle.
fn is_binary_stl(bytes: &[u8]) -> bool {
    match bytes.get(80..84) {
        Some(n) => {
            let n = u64::from(u32::from_le_bytes([n[0], n[1], n[2], n[3]]));
            84 + n * 50 == bytes.len() as u64 || !bytes.starts_with(b"solid")
        }
        None => false,
    }
}

fn parse_binary_stl(ctx: &LoadContext<'_>, bytes: &[u8]) -> LoadResult<MeshBuilder> {
    let n = u64::from(u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]));
    let body = &bytes[84..];
    if (body.len() as u64) < n * 50 {
        return Err(LoadError::corrupt(
            "stl",
            format!("{n} triangles need {} bytes, found {}", n * 50, body.len()),
        ));
    }
    let n = n as usize;
    let f = |c: &[u8], at: usize| {
        f64::from(f32::from_le_bytes([c[at], c[at + 1], c[at + 2], c[at + 3]]))
    };
    let mut mesh = MeshBuilder::default();
    for (t, tri) in body.chunks_exact(50).take(n).enumerate() {
        if t % LINES_PER_CHECK == 0 {
            ctx.check_cancelled()?;
        }
        let normal = [f(tri, 0), f(tri, 4), f(tri, 8)];
        let base = mesh.vertex_count() as i64;
        for v in 0..3 {
            let at = 12 + v * 12;
            mesh.push_vertex(&[f(tri, at), f(tri, at + 4), f(tri, at + 8)]);
            mesh.normals.extend_from_slice(&normal);
        }
        mesh.push_polygon(&[base, base + 1, base + 2]);
    }
    Ok(mesh)
}

fn parse_ascii_stl(ctx: &LoadContext<'_>, text: &str) -> LoadResult<MeshBuilder> {
    let mut mesh = MeshBuilder::default();
    let mut normal = [0.0; 3];
    let mut in_facet = 0usize;
    for item in text_lines(ctx, text) {
        let line = item?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("facet") => {
                let v = floats(tokens.skip(1)).unwrap_or_default();
                normal = [0, 1, 2].map(|i| v.get(i).copied().unwrap_or(0.0));
                in_facet = 0;
            }
            Some("vertex") => match floats(tokens) {
                Some(v) if v.len() >= 3 => {
                    mesh.push_vertex(&v);
                    mesh.normals.extend_from_slice(&normal);
                    in_facet += 1;
                }
                _ => mesh.skipped_lines += 1,
            },
            Some("endloop") => {
                let n = mesh.vertex_count() as i64;
                let k = in_facet as i64;
                let polygon: Vec<i64> = (n - k..n).collect();
                mesh.push_polygon(&polygon);
                in_facet = 0;
            }
            _ => {}
        }
    }
    Ok(mesh)
}

/// Loader for plain-text point clouds: `x y z [r g b]` per line.
#[derive(Debug, Clone, Copy)]
pub struct XyzPlugin;

impl LoaderPlugin for XyzPlugin {
    fn format_tag(&self) -> &'static str {
        "xyz"
    }

    fn description(&self) -> &'static str {
        "XYZ point cloud"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xyz", "pts"]
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let text = read_text(ctx, "xyz")?;
        let mut mesh = MeshBuilder::default();
        for item in text_lines(ctx, &text) {
            let line = item?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            match floats(line.split([' ', '\t', ',', ';']).filter(|t| !t.is_empty())) {
                Some(v) if v.len() >= 3 => {
                    mesh.push_vertex(&v);
                    if v.len() >= 6 {
                        let et = if v[3..6].iter().any(|c| *c > 1.0) {
                            ElementType::UInt8
                        } else {
                            ElementType::Float32
                        };
                        mesh.push_color(&v[3..6], et);
                    }
                }
                _ => mesh.skipped_lines += 1,
            }
        }
        mesh.finish("xyz")
    }
}
