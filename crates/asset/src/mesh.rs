//! CPU-side mesh buffers ready for upload.

/// Indexed triangle mesh: tightly packed `(x, y, z)` positions and
/// 0-based `u16` index triples, both in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<[u16; 3]>,
}

impl MeshData {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<[u16; 3]>) -> Self {
        Self { positions, indices }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.indices.len()
    }

    /// Number of indices one draw of the whole mesh consumes.
    pub fn index_count(&self) -> usize {
        self.indices.len() * 3
    }

    /// Positions as a flat `x, y, z, x, y, z, ...` slice.
    pub fn floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Indices as a flat slice.
    pub fn flat_indices(&self) -> &[u16] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Native-endian vertex buffer contents.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Native-endian index buffer contents.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Returns `true` if both vertex and index buffers are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.positions.is_empty() && !self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_data_validity() {
        let data = MeshData::new(vec![[0.0; 3]], vec![[0, 0, 0]]);
        assert!(data.is_valid());
        assert!(!MeshData::default().is_valid());
    }

    #[test]
    fn flat_views_are_packed() {
        let data = MeshData::new(vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], vec![[0, 1, 0]]);
        assert_eq!(data.floats(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(data.flat_indices(), &[0, 1, 0]);
        assert_eq!(data.vertex_bytes().len(), 2 * 3 * 4);
        assert_eq!(data.index_bytes().len(), 3 * 2);
        assert_eq!(data.index_count(), 3);
        assert_eq!(&data.vertex_bytes()[..4], &1.0f32.to_ne_bytes());
    }
}
