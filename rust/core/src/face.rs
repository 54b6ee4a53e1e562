// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Face-type bitmask carried by every tile vertex and triangle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitmask describing which surface of a voxel a face belongs to
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceType(pub u8);

impl FaceType {
    pub const NONE: FaceType = FaceType(0);
    /// Top of the uppermost stratum (terrain surface)
    pub const TOP_GROUND: FaceType = FaceType(1);
    /// Bottom of the lowest stratum
    pub const BASE_BEDROCK: FaceType = FaceType(2);
    /// Side wall on the tile border or on a clip boundary
    pub const BOUNDARY_SIDE: FaceType = FaceType(4);
    /// Interior side wall shared by two voxels
    pub const SIDE: FaceType = FaceType(8);
    /// Top of a voxel below the ground surface
    pub const TOP: FaceType = FaceType(16);
    /// Bottom of a voxel above the bedrock
    pub const BASE: FaceType = FaceType(32);

    /// Face types that survive shell extraction
    pub const SHELL: FaceType = FaceType(1 | 2 | 4);
    /// Every face type that forms the upper surface of a voxel
    pub const TOP_SURFACES: FaceType = FaceType(1 | 16);
    /// Every face type that forms the lower surface of a voxel
    pub const BASE_SURFACES: FaceType = FaceType(2 | 32);

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True when any bit is shared with `other`
    #[inline]
    pub fn intersects(self, other: FaceType) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every bit of `other` is set
    #[inline]
    pub fn contains(self, other: FaceType) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FaceType {
    type Output = FaceType;

    fn bitor(self, rhs: FaceType) -> FaceType {
        FaceType(self.0 | rhs.0)
    }
}

impl BitOrAssign for FaceType {
    fn bitor_assign(&mut self, rhs: FaceType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FaceType {
    type Output = FaceType;

    fn bitand(self, rhs: FaceType) -> FaceType {
        FaceType(self.0 & rhs.0)
    }
}

impl From<u8> for FaceType {
    fn from(bits: u8) -> Self {
        FaceType(bits)
    }
}

impl fmt::Debug for FaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FaceType, &str); 6] = [
            (FaceType::TOP_GROUND, "TopGround"),
            (FaceType::BASE_BEDROCK, "BaseBedrock"),
            (FaceType::BOUNDARY_SIDE, "BoundarySide"),
            (FaceType::SIDE, "Side"),
            (FaceType::TOP, "Top"),
            (FaceType::BASE, "Base"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.intersects(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "FaceType(None)")
        } else {
            write!(f, "FaceType({})", names.join(" | "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_mask() {
        assert!(FaceType::TOP_GROUND.intersects(FaceType::SHELL));
        assert!(FaceType::BASE_BEDROCK.intersects(FaceType::SHELL));
        assert!(FaceType::BOUNDARY_SIDE.intersects(FaceType::SHELL));
        assert!(!FaceType::SIDE.intersects(FaceType::SHELL));
        assert!(!FaceType::TOP.intersects(FaceType::SHELL));
        assert!(!FaceType::BASE.intersects(FaceType::SHELL));
    }

    #[test]
    fn test_contains_and_or() {
        let mixed = FaceType::TOP | FaceType::SIDE;
        assert!(mixed.contains(FaceType::TOP));
        assert!(!mixed.contains(FaceType::TOP_SURFACES));
        assert!(mixed.intersects(FaceType::TOP_SURFACES));
        assert_eq!(format!("{:?}", mixed), "FaceType(Side | Top)");
    }
}
