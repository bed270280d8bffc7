//! Orientation geometry for the correction pass.
//!
//! This module provides the precomputed quad layouts used to rotate and/or
//! vertically flip a rendered frame without touching pixel data. Each of the
//! eight (rotation × flip) combinations is a fixed assignment of texture
//! coordinates to the four corners of a fullscreen quad; the GPU does the
//! rest in a single draw.
//!
//! The table is derived algebraically rather than stored: a 90° rotation is
//! a quarter-turn of the UV corner assignment, and a vertical flip mirrors
//! the V coordinate. [`OrientFormat::map_uv`] exposes the same mapping as a
//! pure function over UV space so callers (and tests) can reason about where
//! any source texel ends up.

/// Source rotation of an incoming frame, in 90° steps counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// No rotation.
    #[default]
    Deg0,
    /// Rotated 90°.
    Deg90,
    /// Rotated 180°.
    Deg180,
    /// Rotated 270°.
    Deg270,
}

impl Orientation {
    /// All orientations, in quarter-turn order.
    pub const ALL: [Orientation; 4] = [
        Orientation::Deg0,
        Orientation::Deg90,
        Orientation::Deg180,
        Orientation::Deg270,
    ];

    /// Number of quarter turns (0..=3).
    pub fn quarter_turns(self) -> usize {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 1,
            Orientation::Deg180 => 2,
            Orientation::Deg270 => 3,
        }
    }

    fn from_quarter_turns(turns: usize) -> Self {
        Self::ALL[turns % 4]
    }
}

/// A complete orientation-correction request: rotation plus vertical flip.
///
/// The identity format (no rotation, no flip) is special-cased throughout
/// the pipeline: it skips the GPU correction pass entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrientFormat {
    /// Rotation to correct for.
    pub orientation: Orientation,
    /// Whether to mirror the image vertically after rotation.
    pub y_flip: bool,
}

impl OrientFormat {
    /// Create a format from its parts.
    pub fn new(orientation: Orientation, y_flip: bool) -> Self {
        Self {
            orientation,
            y_flip,
        }
    }

    /// Returns true for the no-op format (0°, no flip).
    pub fn is_identity(&self) -> bool {
        self.orientation == Orientation::Deg0 && !self.y_flip
    }

    /// The format that undoes this one.
    ///
    /// A flipped format is its own inverse (mirror conjugates the rotation
    /// direction); a pure rotation inverts to the complementary rotation.
    pub fn inverse(&self) -> Self {
        if self.y_flip {
            *self
        } else {
            Self {
                orientation: Orientation::from_quarter_turns(
                    4 - self.orientation.quarter_turns(),
                ),
                y_flip: false,
            }
        }
    }

    /// Map a destination UV coordinate to the source UV it samples.
    ///
    /// `uv` is in texture space: `(0, 0)` top-left, `(1, 1)` bottom-right.
    /// This is the analytic form of the quad table produced by
    /// [`quad_vertices`]; the two agree at all four corners.
    pub fn map_uv(&self, uv: [f32; 2]) -> [f32; 2] {
        let [mut u, mut v] = uv;
        for _ in 0..self.orientation.quarter_turns() {
            (u, v) = (v, 1.0 - u);
        }
        if self.y_flip {
            v = 1.0 - v;
        }
        [u, v]
    }
}

/// A single vertex of the correction quad: clip-space position plus the
/// source texture coordinate sampled at that corner.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    /// Clip-space position.
    pub position: [f32; 3],
    /// Source texture coordinate.
    pub tex_coord: [f32; 2],
}

impl QuadVertex {
    /// Vertex buffer layout for the correction pipeline.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            // texture coord
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };
}

/// Index list covering the quad as two triangles.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 3, 1, 2, 3];

// Corner order: top-right, bottom-right, bottom-left, top-left.
const POSITIONS: [[f32; 3]; 4] = [
    [1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [-1.0, 1.0, 0.0],
];

// UVs each corner samples when no correction is applied.
const IDENTITY_UVS: [[f32; 2]; 4] = [[1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]];

/// Build the quad for one of the eight orientation-correction entries.
///
/// Rotation shifts which identity UV each corner samples; the flip then
/// mirrors V. Selection is a pure function of the format — there is no
/// hidden state and every call with the same format yields the same quad.
pub fn quad_vertices(format: OrientFormat) -> [QuadVertex; 4] {
    let turns = format.orientation.quarter_turns();
    std::array::from_fn(|corner| {
        let mut uv = IDENTITY_UVS[(corner + 4 - turns) % 4];
        if format.y_flip {
            uv[1] = 1.0 - uv[1];
        }
        QuadVertex {
            position: POSITIONS[corner],
            tex_coord: uv,
        }
    })
}
