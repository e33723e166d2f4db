use std::{
    io::{Cursor, Read},
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use byteorder::{LittleEndian as LE, ReadBytesExt};
use glam::Vec3;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Could not read geometry ({path}): {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed STL file ({path}): {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Geometry contains no triangles ({0})")]
    Empty(PathBuf),
}

impl LoadError {
    fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, bytemuck::NoUninit)]
#[repr(C)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Non-indexed triangle list in meters.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub min: Vec3,
    pub max: Vec3,
}

impl Mesh {
    /// Build a mesh from triangles, calculating flat face normals. Normals stored in CAD files
    /// are often missing or zero, so they are never trusted.
    pub fn from_triangles(name: impl Into<String>, triangles: impl Iterator<Item = [Vec3; 3]>) -> Self {
        let mut vertices = Vec::new();
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);

        for [a, b, c] in triangles {
            let normal = (b - a).cross(c - a).normalize_or_zero();
            for position in [a, b, c] {
                min = min.min(position);
                max = max.max(position);
                vertices.push(Vertex { position, normal });
            }
        }

        if vertices.is_empty() {
            min = Vec3::ZERO;
            max = Vec3::ZERO;
        }

        Self {
            name: name.into(),
            vertices,
            min,
            max,
        }
    }

    /// Move the mesh so that `pivot` ends up at the origin.
    pub fn recentered(mut self, pivot: Vec3) -> Self {
        if pivot == Vec3::ZERO {
            return self;
        }
        self.vertices
            .iter_mut()
            .for_each(|vertex| vertex.position -= pivot);
        self.min -= pivot;
        self.max -= pivot;
        self
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }
}

/// A loaded mesh shared read-only between the kinematic tree and the renderer.
#[derive(Clone, Debug)]
pub struct GeometryResource(Arc<Mesh>);

impl GeometryResource {
    pub fn new(mesh: Mesh) -> Self {
        Self(Arc::new(mesh))
    }
}

impl Deref for GeometryResource {
    type Target = Mesh;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// A single geometry to load for a joint.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryRequest {
    pub path: PathBuf,
    /// Position of the joint pivot in the file's frame, after scaling.
    pub pivot: Vec3,
}

pub trait GeometryLoader {
    fn load(
        &self,
        request: &GeometryRequest,
    ) -> impl std::future::Future<Output = Result<Mesh, LoadError>>;
}

/// Loads every joint's geometry in kinematic order, base first. The first failure aborts the
/// whole arm; a partial arm is never returned.
pub async fn load_arm_geometries<L: GeometryLoader>(
    loader: &L,
    requests: &[GeometryRequest],
) -> Result<Vec<GeometryResource>, LoadError> {
    let mut geometries = Vec::with_capacity(requests.len());

    for (index, request) in requests.iter().enumerate() {
        let mesh = loader.load(request).await?;
        tracing::info!(
            "Loaded joint {} geometry \"{}\" ({} triangles)",
            index,
            mesh.name,
            mesh.triangle_count()
        );
        geometries.push(GeometryResource::new(mesh));
    }

    Ok(geometries)
}

/// Reads binary or ASCII STL files relative to a root directory.
pub struct StlLoader {
    root: PathBuf,
    /// Multiplied into every position, converting the file's units into meters.
    scale: f32,
}

impl StlLoader {
    pub fn new(root: impl AsRef<Path>, scale: f32) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            scale,
        }
    }
}

impl GeometryLoader for StlLoader {
    async fn load(&self, request: &GeometryRequest) -> Result<Mesh, LoadError> {
        let path = self.root.join(&request.path);
        let data = std::fs::read(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;

        let mesh = parse_stl(&path, &data, self.scale)?;
        if mesh.vertices.is_empty() {
            return Err(LoadError::Empty(path));
        }

        Ok(mesh.recentered(request.pivot))
    }
}

const STL_HEADER_LEN: usize = 80;
const STL_TRIANGLE_LEN: usize = 50;

fn parse_stl(path: &Path, data: &[u8], scale: f32) -> Result<Mesh, LoadError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    // ASCII files start with "solid", but so do some binary exporters' headers, so the size of
    // a binary file is checked first.
    if data.len() >= STL_HEADER_LEN + 4 {
        let count = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;
        if data.len() == STL_HEADER_LEN + 4 + count * STL_TRIANGLE_LEN {
            return parse_binary_stl(path, name, data, scale);
        }
    }

    if data.starts_with(b"solid") {
        let text = std::str::from_utf8(data)
            .map_err(|_| LoadError::malformed(path, "ASCII STL is not valid UTF-8"))?;
        return parse_ascii_stl(path, name, text, scale);
    }

    Err(LoadError::malformed(path, "not a binary or ASCII STL file"))
}

fn parse_binary_stl(
    path: &Path,
    name: String,
    data: &[u8],
    scale: f32,
) -> Result<Mesh, LoadError> {
    let io = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut cursor = Cursor::new(&data[STL_HEADER_LEN..]);
    let count = cursor.read_u32::<LE>().map_err(io)? as usize;

    let mut triangles = Vec::with_capacity(count);
    for _ in 0..count {
        let _normal = read_vec3(&mut cursor).map_err(io)?;
        let a = read_vec3(&mut cursor).map_err(io)?;
        let b = read_vec3(&mut cursor).map_err(io)?;
        let c = read_vec3(&mut cursor).map_err(io)?;
        let _attributes = cursor.read_u16::<LE>().map_err(io)?;
        triangles.push([a * scale, b * scale, c * scale]);
    }

    let mut rest = Vec::new();
    cursor.read_to_end(&mut rest).map_err(io)?;
    if !rest.is_empty() {
        return Err(LoadError::malformed(path, "trailing data after triangles"));
    }

    Ok(Mesh::from_triangles(name, triangles.into_iter()))
}

fn read_vec3(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec3> {
    Ok(Vec3::new(
        cursor.read_f32::<LE>()?,
        cursor.read_f32::<LE>()?,
        cursor.read_f32::<LE>()?,
    ))
}

fn parse_ascii_stl(path: &Path, name: String, text: &str, scale: f32) -> Result<Mesh, LoadError> {
    let mut positions = Vec::new();
    let mut tokens = text.split_whitespace();

    while let Some(token) = tokens.next() {
        if token != "vertex" {
            continue;
        }

        let mut component = || -> Result<f32, LoadError> {
            tokens
                .next()
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| LoadError::malformed(path, "vertex needs three numbers"))
        };
        positions.push(Vec3::new(component()?, component()?, component()?) * scale);
    }

    if positions.len() % 3 != 0 {
        return Err(LoadError::malformed(
            path,
            format!("{} vertices do not form whole triangles", positions.len()),
        ));
    }

    Ok(Mesh::from_triangles(
        name,
        positions.chunks_exact(3).map(|t| [t[0], t[1], t[2]]),
    ))
}

/// Generates a box for every request so the arm can be shown without CAD files. The boxes are
/// built around the origin, so pivots are ignored.
pub struct PlaceholderLoader {
    pub half_extent: f32,
}

impl Default for PlaceholderLoader {
    fn default() -> Self {
        Self { half_extent: 0.06 }
    }
}

impl GeometryLoader for PlaceholderLoader {
    async fn load(&self, request: &GeometryRequest) -> Result<Mesh, LoadError> {
        let name = request.path.to_string_lossy().into_owned();
        Ok(box_mesh(name, Vec3::splat(self.half_extent)))
    }
}

pub fn box_mesh(name: impl Into<String>, half: Vec3) -> Mesh {
    let corner = |x: f32, y: f32, z: f32| Vec3::new(x * half.x, y * half.y, z * half.z);

    #[rustfmt::skip]
    let faces = [
        // +X / -X
        [corner( 1.0, -1.0, -1.0), corner( 1.0,  1.0, -1.0), corner( 1.0,  1.0,  1.0), corner( 1.0, -1.0,  1.0)],
        [corner(-1.0, -1.0,  1.0), corner(-1.0,  1.0,  1.0), corner(-1.0,  1.0, -1.0), corner(-1.0, -1.0, -1.0)],
        // +Y / -Y
        [corner(-1.0,  1.0, -1.0), corner(-1.0,  1.0,  1.0), corner( 1.0,  1.0,  1.0), corner( 1.0,  1.0, -1.0)],
        [corner(-1.0, -1.0,  1.0), corner(-1.0, -1.0, -1.0), corner( 1.0, -1.0, -1.0), corner( 1.0, -1.0,  1.0)],
        // +Z / -Z
        [corner(-1.0, -1.0,  1.0), corner( 1.0, -1.0,  1.0), corner( 1.0,  1.0,  1.0), corner(-1.0,  1.0,  1.0)],
        [corner( 1.0, -1.0, -1.0), corner(-1.0, -1.0, -1.0), corner(-1.0,  1.0, -1.0), corner( 1.0,  1.0, -1.0)],
    ];

    Mesh::from_triangles(
        name,
        faces
            .into_iter()
            .flat_map(|[a, b, c, d]| [[a, b, c], [a, c, d]]),
    )
}

#[cfg(test)]
mod tests {
    use byteorder::WriteBytesExt;

    use super::*;

    fn binary_stl(triangles: &[[Vec3; 3]]) -> Vec<u8> {
        let mut data = vec![0_u8; STL_HEADER_LEN];
        // Binary exporters often start the header with "solid" as well.
        data[..5].copy_from_slice(b"solid");
        data.write_u32::<LE>(triangles.len() as u32).unwrap();
        for triangle in triangles {
            for _ in 0..3 {
                data.write_f32::<LE>(0.0).unwrap();
            }
            for v in triangle {
                data.write_f32::<LE>(v.x).unwrap();
                data.write_f32::<LE>(v.y).unwrap();
                data.write_f32::<LE>(v.z).unwrap();
            }
            data.write_u16::<LE>(0).unwrap();
        }
        data
    }

    const TRIANGLE: [Vec3; 3] = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1000.0, 0.0, 0.0),
        Vec3::new(0.0, 1000.0, 0.0),
    ];

    #[test]
    fn binary_stl_is_scaled_into_meters() {
        let data = binary_stl(&[TRIANGLE]);
        let mesh = parse_stl(Path::new("link1.stl"), &data, 0.001).unwrap();

        assert_eq!(mesh.name, "link1");
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertices[1].position, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(mesh.vertices[0].normal, Vec3::Z);
        assert_eq!(mesh.max, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn ascii_stl() {
        let text = "solid part
  facet normal 0 0 0
    outer loop
      vertex 0 0 0
      vertex 1000 0 0
      vertex 0 1000 0
    endloop
  endfacet
endsolid part
";
        let mesh = parse_stl(Path::new("part.stl"), text.as_bytes(), 0.001).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertices[2].position, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn ascii_stl_with_broken_vertex_is_malformed() {
        let text = "solid part\n vertex 0 0\nendsolid part\n";
        assert!(matches!(
            parse_stl(Path::new("part.stl"), text.as_bytes(), 1.0),
            Err(LoadError::Malformed { .. })
        ));
    }

    #[test]
    fn garbage_is_not_an_stl() {
        assert!(matches!(
            parse_stl(Path::new("part.stl"), b"hello", 1.0),
            Err(LoadError::Malformed { .. })
        ));
    }

    #[test]
    fn recentering_moves_the_pivot_to_the_origin() {
        let mesh = Mesh::from_triangles("t", [TRIANGLE].into_iter())
            .recentered(Vec3::new(1000.0, 0.0, 0.0));

        assert_eq!(mesh.vertices[1].position, Vec3::ZERO);
        assert_eq!(mesh.min, Vec3::new(-1000.0, 0.0, 0.0));
    }

    #[test]
    fn placeholder_box_is_closed() {
        let mesh = box_mesh("box", Vec3::splat(0.5));
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.min, Vec3::splat(-0.5));
        assert_eq!(mesh.max, Vec3::splat(0.5));
        assert!(mesh.vertices.iter().all(|v| v.normal.length() > 0.99));
    }

    struct FailingLoader {
        fail_at: PathBuf,
    }

    impl GeometryLoader for FailingLoader {
        async fn load(&self, request: &GeometryRequest) -> Result<Mesh, LoadError> {
            if request.path == self.fail_at {
                Err(LoadError::Empty(request.path.clone()))
            } else {
                Ok(box_mesh("box", Vec3::ONE))
            }
        }
    }

    fn requests(count: usize) -> Vec<GeometryRequest> {
        (0..count)
            .map(|i| GeometryRequest {
                path: PathBuf::from(format!("joint{i}.stl")),
                pivot: Vec3::ZERO,
            })
            .collect()
    }

    #[test]
    fn loads_every_geometry_in_order() {
        let geometries =
            pollster::block_on(load_arm_geometries(&PlaceholderLoader::default(), &requests(6)))
                .unwrap();

        assert_eq!(geometries.len(), 6);
        assert_eq!(geometries[3].name, "joint3.stl");
    }

    #[test]
    fn one_failure_fails_the_whole_arm() {
        let loader = FailingLoader {
            fail_at: PathBuf::from("joint4.stl"),
        };
        let result = pollster::block_on(load_arm_geometries(&loader, &requests(6)));
        assert!(matches!(result, Err(LoadError::Empty(path)) if path == Path::new("joint4.stl")));
    }
}
