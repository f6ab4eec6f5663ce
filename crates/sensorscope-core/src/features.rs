//! Feature keys for identifier-encoding materials.

/// Key selecting an identifier-encoding material variant.
///
/// Picking redraws each item with an encode material whose vertex stage must
/// match the original material's vertex transform, otherwise the picked pixel
/// will not line up with the visible surface. Three independent traits
/// determine that vertex behavior, giving a closed set of 8 variants used as
/// the material cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EncodeKey(u8);

impl EncodeKey {
    /// The item is an instanced mesh (per-instance transforms).
    pub const INSTANCED: u8 = 1 << 0;
    /// The item is a sprite/billboard quad.
    pub const SPRITE: u8 = 1 << 1;
    /// The item's screen size attenuates with camera distance.
    pub const SIZE_ATTENUATION: u8 = 1 << 2;

    /// Builds a key from individual feature traits.
    #[must_use]
    pub fn new(instanced: bool, sprite: bool, size_attenuation: bool) -> Self {
        let mut bits = 0;
        if instanced {
            bits |= Self::INSTANCED;
        }
        if sprite {
            bits |= Self::SPRITE;
        }
        if size_attenuation {
            bits |= Self::SIZE_ATTENUATION;
        }
        Self(bits)
    }

    /// Whether the instanced bit is set.
    #[must_use]
    pub fn instanced(self) -> bool {
        self.0 & Self::INSTANCED != 0
    }

    /// Whether the sprite bit is set.
    #[must_use]
    pub fn sprite(self) -> bool {
        self.0 & Self::SPRITE != 0
    }

    /// Whether the size-attenuation bit is set.
    #[must_use]
    pub fn size_attenuation(self) -> bool {
        self.0 & Self::SIZE_ATTENUATION != 0
    }

    /// The raw bit pattern.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}
