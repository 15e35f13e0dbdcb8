//! Fixed, versioned, little-endian wire records for mesh and data exchange.
//!
//! Every multi-byte field is stored pre-converted with `.to_le()` (floats
//! via their bit pattern) and decoded with `.from_le()`, so the byte layout
//! does not depend on the host.

use crate::coupling_error::CouplingError;
use crate::geometry::bounding_box::Box3d;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr`].
pub mod kind {
    pub const MESH: u16 = 1;
    pub const BOUNDING_BOX: u16 = 2;
}

/// Fails with [`CouplingError::WireError`] unless `actual == expected`.
pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), CouplingError> {
    if actual == expected {
        Ok(())
    } else {
        Err(CouplingError::WireError(format!(
            "expected {expected} bytes, got {actual}"
        )))
    }
}

/// Reinterprets a received byte buffer as records, copying to fix alignment.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, CouplingError> {
    let size = size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(CouplingError::WireError(format!(
            "{} bytes do not hold whole records of {size} bytes",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }

    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }

    /// Checks version and kind of a received header.
    pub fn check_kind(&self, kind: u16) -> Result<(), CouplingError> {
        if self.version() != WIRE_VERSION {
            return Err(CouplingError::WireError(format!(
                "wire version {} is not supported (expected {WIRE_VERSION})",
                self.version()
            )));
        }
        if self.kind() != kind {
            return Err(CouplingError::WireError(format!(
                "expected message kind {kind}, got {}",
                self.kind()
            )));
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }

    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Entity counts leading a mesh message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMeshCounts {
    pub hdr: WireHdr,
    pub dimensions: WireCount,
    pub vertices: WireCount,
    pub edges: WireCount,
    pub triangles: WireCount,
}

/// Vertex coordinates plus global index (`u64::MAX` if unset).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireVertex {
    pub coords_le: [u64; 3],
    pub global_le: u64,
}

impl WireVertex {
    const NO_GLOBAL: u64 = u64::MAX;

    pub fn new(coords: [f64; 3], global: Option<usize>) -> Self {
        Self {
            coords_le: coords.map(|c| c.to_bits().to_le()),
            global_le: global.map_or(Self::NO_GLOBAL, |g| g as u64).to_le(),
        }
    }

    pub fn coords(&self) -> [f64; 3] {
        self.coords_le.map(|c| f64::from_bits(u64::from_le(c)))
    }

    pub fn global(&self) -> Option<usize> {
        match u64::from_le(self.global_le) {
            Self::NO_GLOBAL => None,
            g => Some(g as usize),
        }
    }
}

/// Edge as a pair of vertex indices.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEdge {
    pub vertices_le: [u64; 2],
}

impl WireEdge {
    pub fn new(vertices: [usize; 2]) -> Self {
        Self {
            vertices_le: vertices.map(|v| (v as u64).to_le()),
        }
    }

    pub fn vertices(&self) -> [usize; 2] {
        self.vertices_le.map(|v| u64::from_le(v) as usize)
    }
}

/// Triangle as a triple of edge indices.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireTriangle {
    pub edges_le: [u64; 3],
}

impl WireTriangle {
    pub fn new(edges: [usize; 3]) -> Self {
        Self {
            edges_le: edges.map(|e| (e as u64).to_le()),
        }
    }

    pub fn edges(&self) -> [usize; 3] {
        self.edges_le.map(|e| u64::from_le(e) as usize)
    }
}

/// Bounding box message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBox {
    pub hdr: WireHdr,
    pub min_le: [u64; 3],
    pub max_le: [u64; 3],
}

impl WireBox {
    pub fn new(b: &Box3d) -> Self {
        Self {
            hdr: WireHdr::new(kind::BOUNDING_BOX),
            min_le: b.min.map(|c| c.to_bits().to_le()),
            max_le: b.max.map(|c| c.to_bits().to_le()),
        }
    }

    pub fn to_box(&self) -> Box3d {
        let decode = |c: u64| f64::from_bits(u64::from_le(c));
        Box3d::new(self.min_le.map(decode), self.max_le.map(decode))
    }
}

const _: () = {
    assert!(size_of::<WireHdr>() == 8);
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireMeshCounts>() == 24);
    assert!(size_of::<WireVertex>() == 32);
    assert!(align_of::<WireVertex>() == 8);
    assert!(size_of::<WireEdge>() == 16);
    assert!(size_of::<WireTriangle>() == 24);
    assert!(size_of::<WireBox>() == 56);
};
