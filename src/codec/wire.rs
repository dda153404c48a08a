//! Fixed, versioned, little-endian byte form of exchange buffers.
//!
//! Layout: one [`WireHdr`] followed by the point reals and then the integer
//! payload (cell runs or edge records). All multi-byte values are little-endian.

use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use super::{ContourBuffer, EdgeForm, ExchangeBuffer, MeshBuffer};
use crate::bridge_error::BridgeError;

pub const WIRE_MAGIC: [u8; 4] = *b"XGRD";

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

pub const KIND_MESH: u16 = 1;
pub const KIND_CONTOUR_PLAIN: u16 = 2;
pub const KIND_CONTOUR_TAGGED: u16 = 3;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub magic: [u8; 4],
    pub version_le: u16,
    pub kind_le: u16,
    /// Number of reals in the point buffer.
    pub n_reals_le: u32,
    /// Cell count for meshes, edge count for contours.
    pub n_items_le: u32,
    /// Number of integers in the payload.
    pub n_ints_le: u32,
    pub reserved_le: u32,
}

const_assert_eq!(size_of::<WireHdr>(), 24);

impl WireHdr {
    fn new(kind: u16, n_reals: u32, n_items: u32, n_ints: u32) -> Self {
        Self {
            magic: WIRE_MAGIC,
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            n_reals_le: n_reals.to_le(),
            n_items_le: n_items.to_le(),
            n_ints_le: n_ints.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn n_reals(&self) -> usize {
        u32::from_le(self.n_reals_le) as usize
    }
    pub fn n_items(&self) -> usize {
        u32::from_le(self.n_items_le) as usize
    }
    pub fn n_ints(&self) -> usize {
        u32::from_le(self.n_ints_le) as usize
    }
}

fn count_u32(value: usize, what: &'static str) -> Result<u32, BridgeError> {
    u32::try_from(value).map_err(|_| BridgeError::IndexOverflow { what, value })
}

fn write(kind: u16, reals: &[f64], n_items: usize, ints: &[i32]) -> Result<Bytes, BridgeError> {
    let hdr = WireHdr::new(
        kind,
        count_u32(reals.len(), "wire reals")?,
        count_u32(n_items, "wire items")?,
        count_u32(ints.len(), "wire ints")?,
    );
    let mut out = BytesMut::with_capacity(
        size_of::<WireHdr>() + reals.len() * size_of::<f64>() + ints.len() * size_of::<i32>(),
    );
    out.put_slice(bytemuck::bytes_of(&hdr));
    for &r in reals {
        out.put_f64_le(r);
    }
    for &i in ints {
        out.put_i32_le(i);
    }
    Ok(out.freeze())
}

/// Serializes a buffer into its byte image.
pub fn to_bytes(buffer: &ExchangeBuffer) -> Result<Bytes, BridgeError> {
    match buffer {
        ExchangeBuffer::Mesh(m) => write(KIND_MESH, &m.points, m.n_cells, &m.cells),
        ExchangeBuffer::Contour(c) => {
            let kind = match c.form {
                EdgeForm::Plain => KIND_CONTOUR_PLAIN,
                EdgeForm::Tagged => KIND_CONTOUR_TAGGED,
            };
            write(kind, &c.points, c.n_edges(), &c.edges)
        }
    }
}

fn contour_buffer(
    n_edges: usize,
    points: Vec<f64>,
    edges: Vec<i32>,
    form: EdgeForm,
) -> Result<ExchangeBuffer, BridgeError> {
    if n_edges * form.stride() != edges.len() {
        return Err(BridgeError::MalformedBuffer(format!(
            "{n_edges} edges do not fill {} integers",
            edges.len()
        )));
    }
    Ok(ExchangeBuffer::Contour(ContourBuffer {
        points,
        edges,
        form,
    }))
}

/// Parses a byte image produced by [`to_bytes`].
///
/// Only framing is validated here: magic, version, kind and exact length. Index
/// validity is checked when the buffer is unpacked.
pub fn from_bytes(mut bytes: &[u8]) -> Result<ExchangeBuffer, BridgeError> {
    let hdr_len = size_of::<WireHdr>();
    if bytes.len() < hdr_len {
        return Err(BridgeError::MalformedBuffer(format!(
            "expected at least {hdr_len} header bytes, got {}",
            bytes.len()
        )));
    }
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..hdr_len]);
    bytes.advance(hdr_len);
    if hdr.magic != WIRE_MAGIC {
        return Err(BridgeError::MalformedBuffer("bad magic".into()));
    }
    if hdr.version() != WIRE_VERSION {
        return Err(BridgeError::MalformedBuffer(format!(
            "unsupported version {}",
            hdr.version()
        )));
    }
    let expected = hdr.n_reals() * size_of::<f64>() + hdr.n_ints() * size_of::<i32>();
    if bytes.remaining() != expected {
        return Err(BridgeError::MalformedBuffer(format!(
            "expected {expected} payload bytes, got {}",
            bytes.remaining()
        )));
    }
    let points: Vec<f64> = (0..hdr.n_reals()).map(|_| bytes.get_f64_le()).collect();
    let ints: Vec<i32> = (0..hdr.n_ints()).map(|_| bytes.get_i32_le()).collect();

    match hdr.kind() {
        KIND_MESH => Ok(ExchangeBuffer::Mesh(MeshBuffer {
            points,
            n_cells: hdr.n_items(),
            cells: ints,
        })),
        KIND_CONTOUR_PLAIN => contour_buffer(hdr.n_items(), points, ints, EdgeForm::Plain),
        KIND_CONTOUR_TAGGED => contour_buffer(hdr.n_items(), points, ints, EdgeForm::Tagged),
        other => Err(BridgeError::MalformedBuffer(format!("unknown kind {other}"))),
    }
}
