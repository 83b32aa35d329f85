/*
 * SPDX-FileCopyrightText: 2025 The hemoflow developers
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The D3Q15 lattice model and the packed per-site data word.
//!
//! Everything that must agree bit-for-bit with the geometry file writer
//! lives here: the direction vectors and their ordering, the inverse
//! direction table, and the masks and shifts of the 32-bit site word. The
//! rest of the crate consumes these through [`SiteData`] and the free
//! functions; no other module builds or picks apart the word.

use bitflags::bitflags;

/// Number of distribution directions, including the rest vector.
pub const NUM_VECTORS: usize = 15;

/// A direction index in `0..NUM_VECTORS`.
pub type Direction = usize;

/// x components of the lattice vectors.
pub const CX: [i32; NUM_VECTORS] = [0, 1, -1, 0, 0, 0, 0, 1, -1, 1, -1, 1, -1, 1, -1];
/// y components of the lattice vectors.
pub const CY: [i32; NUM_VECTORS] = [0, 0, 0, 1, -1, 0, 0, 1, -1, 1, -1, -1, 1, -1, 1];
/// z components of the lattice vectors.
pub const CZ: [i32; NUM_VECTORS] = [0, 0, 0, 0, 0, 1, -1, 1, -1, -1, 1, 1, -1, -1, 1];

/// For each direction, the direction with the opposite vector.
pub const INVERSE: [Direction; NUM_VECTORS] = [0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13];

/// Quadrature weights of the model.
pub const WEIGHTS: [f64; NUM_VECTORS] = [
    2.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 9.0,
    1.0 / 72.0,
    1.0 / 72.0,
    1.0 / 72.0,
    1.0 / 72.0,
    1.0 / 72.0,
    1.0 / 72.0,
    1.0 / 72.0,
    1.0 / 72.0,
];

/// Square of the lattice speed of sound.
pub const CS2: f64 = 1.0 / 3.0;

// Physical constants used by the unit conversions.
pub const REFERENCE_PRESSURE_MMHG: f64 = 80.0;
pub const MMHG_TO_PASCAL: f64 = 133.3223874;
pub const BLOOD_DENSITY_KG_PER_M3: f64 = 1000.0;
pub const BLOOD_VISCOSITY_PA_S: f64 = 0.004;
pub const PULSATILE_PERIOD_S: f64 = 60.0 / 70.0;

/// Computes the equilibrium distribution for the given density and
/// momentum.
///
/// With zero momentum this reduces to `WEIGHTS[l] * density`, so a lattice
/// initialised at equilibrium and left alone reproduces itself exactly.
pub fn equilibrium(density: f64, momentum: [f64; 3]) -> [f64; NUM_VECTORS] {
    let [mx, my, mz] = momentum;
    let momentum_sq = mx * mx + my * my + mz * mz;
    let mut f_eq = [0.0; NUM_VECTORS];
    for l in 0..NUM_VECTORS {
        let c_dot_m = CX[l] as f64 * mx + CY[l] as f64 * my + CZ[l] as f64 * mz;
        f_eq[l] = WEIGHTS[l]
            * (density + 3.0 * c_dot_m + (4.5 * c_dot_m * c_dot_m - 1.5 * momentum_sq) / density);
    }
    f_eq
}

/// Density and momentum moments of one site's distributions.
pub fn moments(f: &[f64]) -> (f64, [f64; 3]) {
    let mut density = 0.0;
    let mut momentum = [0.0; 3];
    for l in 0..NUM_VECTORS {
        density += f[l];
        momentum[0] += CX[l] as f64 * f[l];
        momentum[1] += CY[l] as f64 * f[l];
        momentum[2] += CZ[l] as f64 * f[l];
    }
    (density, momentum)
}

/// Basic type of a lattice site, the low two bits of the site word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SiteType {
    Solid = 0,
    Fluid = 1,
    Inlet = 2,
    Outlet = 3,
}

bitflags! {
    /// Flag set describing the collision behaviour of a site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        const FLUID = 1;
        const INLET = 2;
        const OUTLET = 4;
        const EDGE = 8;
    }
}

/// The six collision classes, in the fixed range-grouping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionClass {
    Bulk = 0,
    Wall = 1,
    Inlet = 2,
    Outlet = 3,
    InletWall = 4,
    OutletWall = 5,
}

/// Number of collision classes.
pub const COLLISION_CLASSES: usize = 6;

impl CollisionClass {
    pub const ALL: [CollisionClass; COLLISION_CLASSES] = [
        CollisionClass::Bulk,
        CollisionClass::Wall,
        CollisionClass::Inlet,
        CollisionClass::Outlet,
        CollisionClass::InletWall,
        CollisionClass::OutletWall,
    ];

    pub fn flags(self) -> ClassFlags {
        match self {
            CollisionClass::Bulk => ClassFlags::FLUID,
            CollisionClass::Wall => ClassFlags::EDGE,
            CollisionClass::Inlet => ClassFlags::INLET,
            CollisionClass::Outlet => ClassFlags::OUTLET,
            CollisionClass::InletWall => ClassFlags::INLET.union(ClassFlags::EDGE),
            CollisionClass::OutletWall => ClassFlags::OUTLET.union(ClassFlags::EDGE),
        }
    }
}

// Field widths of the packed site word. The boundary-configuration field
// has one bit per non-rest direction; the layout must stay byte-compatible
// with the setup tool that writes geometry files.
const SITE_TYPE_BITS: u32 = 2;
const BOUNDARY_CONFIG_BITS: u32 = NUM_VECTORS as u32 - 1;
const BOUNDARY_DIR_BITS: u32 = 4;
const BOUNDARY_ID_BITS: u32 = 10;

const BOUNDARY_CONFIG_SHIFT: u32 = SITE_TYPE_BITS;
const BOUNDARY_DIR_SHIFT: u32 = BOUNDARY_CONFIG_SHIFT + BOUNDARY_CONFIG_BITS;
const BOUNDARY_ID_SHIFT: u32 = BOUNDARY_DIR_SHIFT + BOUNDARY_DIR_BITS;

const SITE_TYPE_MASK: u32 = (1 << SITE_TYPE_BITS) - 1;
const BOUNDARY_CONFIG_MASK: u32 = ((1 << BOUNDARY_CONFIG_BITS) - 1) << BOUNDARY_CONFIG_SHIFT;
const BOUNDARY_DIR_MASK: u32 = ((1 << BOUNDARY_DIR_BITS) - 1) << BOUNDARY_DIR_SHIFT;
const BOUNDARY_ID_MASK: u32 = ((1 << BOUNDARY_ID_BITS) - 1) << BOUNDARY_ID_SHIFT;
const PRESSURE_EDGE_MASK: u32 = 1 << (BOUNDARY_ID_SHIFT + BOUNDARY_ID_BITS + 1);

/// The packed 32-bit per-site data word:
/// `[type:2 | boundary-config | direction:4 | boundary-id:10 | pressure-edge]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SiteData(pub u32);

impl SiteData {
    pub fn site_type(self) -> SiteType {
        match self.0 & SITE_TYPE_MASK {
            0 => SiteType::Solid,
            1 => SiteType::Fluid,
            2 => SiteType::Inlet,
            _ => SiteType::Outlet,
        }
    }

    pub fn is_solid(self) -> bool {
        self.site_type() == SiteType::Solid
    }

    /// Whether streaming along `direction` from this site crosses the wall
    /// surface (the corresponding boundary-configuration bit is set).
    pub fn has_wall_link(self, direction: Direction) -> bool {
        debug_assert!(direction > 0 && direction < NUM_VECTORS);
        self.0 & (1 << (BOUNDARY_CONFIG_SHIFT + direction as u32 - 1)) != 0
    }

    /// Index into the inlet or outlet table, meaningful for iolet sites.
    pub fn boundary_id(self) -> usize {
        ((self.0 & BOUNDARY_ID_MASK) >> BOUNDARY_ID_SHIFT) as usize
    }

    pub fn boundary_direction(self) -> Direction {
        ((self.0 & BOUNDARY_DIR_MASK) >> BOUNDARY_DIR_SHIFT) as Direction
    }

    pub fn has_pressure_edge(self) -> bool {
        self.0 & PRESSURE_EDGE_MASK != 0
    }

    /// The flag set driving collision-kernel selection.
    ///
    /// A word that is pure fluid (no boundary bits at all) is bulk; a fluid
    /// word with any boundary configuration is wall-adjacent; iolet words
    /// split on the pressure-edge bit.
    pub fn class_flags(self) -> ClassFlags {
        if self.0 == SiteType::Fluid as u32 {
            return ClassFlags::FLUID;
        }
        match self.site_type() {
            SiteType::Solid => ClassFlags::empty(),
            SiteType::Fluid => ClassFlags::EDGE,
            SiteType::Inlet => {
                if self.has_pressure_edge() {
                    ClassFlags::INLET | ClassFlags::EDGE
                } else {
                    ClassFlags::INLET
                }
            }
            SiteType::Outlet => {
                if self.has_pressure_edge() {
                    ClassFlags::OUTLET | ClassFlags::EDGE
                } else {
                    ClassFlags::OUTLET
                }
            }
        }
    }

    /// The collision class of a non-solid site.
    pub fn collision_class(self) -> CollisionClass {
        let flags = self.class_flags();
        *CollisionClass::ALL
            .iter()
            .find(|c| c.flags() == flags)
            .expect("solid sites have no collision class")
    }

    /// Whether the site record in the geometry file carries wall-surface
    /// payload (normals, distances, cut distances).
    pub fn has_surface_payload(self) -> bool {
        !self.is_solid() && self.class_flags() != ClassFlags::FLUID
    }

    /// Whether the record carries the iolet normal and distance.
    pub fn has_iolet_payload(self) -> bool {
        matches!(self.site_type(), SiteType::Inlet | SiteType::Outlet)
    }

    /// Whether the record carries the wall normal and distance.
    pub fn has_wall_payload(self) -> bool {
        self.class_flags().contains(ClassFlags::EDGE)
    }
}

/// Builds a site word from its fields; the inverse of the accessors above.
/// Used by the geometry writer and by tests constructing lattices by hand.
pub fn pack_site_data(
    site_type: SiteType,
    wall_links: u32,
    boundary_direction: Direction,
    boundary_id: usize,
    pressure_edge: bool,
) -> SiteData {
    let mut word = site_type as u32;
    word |= (wall_links << BOUNDARY_CONFIG_SHIFT) & BOUNDARY_CONFIG_MASK;
    word |= ((boundary_direction as u32) << BOUNDARY_DIR_SHIFT) & BOUNDARY_DIR_MASK;
    word |= ((boundary_id as u32) << BOUNDARY_ID_SHIFT) & BOUNDARY_ID_MASK;
    if pressure_edge {
        word |= PRESSURE_EDGE_MASK;
    }
    SiteData(word)
}
