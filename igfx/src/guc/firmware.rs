//! Substitute firmware images.
//!
//! The images themselves are supplied by the host at start-up (they are
//! built into the kext as data). This module only orders them into the
//! slots the driver allocates shared buffers for.

use num_enum::TryFromPrimitive;

/// Size of a GuC RSA signature.
pub const SIGNATURE_SIZE: usize = 256;

/// Shared buffers the driver allocates during a firmware load, in the order
/// it requests them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(usize)]
pub enum SlotKind {
    Huc = 0,
    HucSignature = 1,
    Guc = 2,
    GucPublicKey = 3,
}

impl SlotKind {
    pub const COUNT: usize = 4;

    /// Slots in allocation order.
    pub const ALL: [SlotKind; Self::COUNT] =
        [Self::Huc, Self::HucSignature, Self::Guc, Self::GucPublicKey];

    /// Slots uploaded by DMA, in transfer order.
    pub const DMA_ORDER: [SlotKind; 2] = [Self::Huc, Self::Guc];

    pub fn name(self) -> &'static str {
        match self {
            Self::Huc => "HuC",
            Self::HucSignature => "HuC signature",
            Self::Guc => "GuC",
            Self::GucPublicKey => "GuC public key",
        }
    }
}

/// One image and the signature appended after it when staged.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareImage {
    pub binary: &'static [u8],
    pub signature: &'static [u8],
}

impl FirmwareImage {
    pub const fn new(binary: &'static [u8], signature: &'static [u8]) -> Self {
        Self { binary, signature }
    }

    /// Bytes occupied in a staging buffer.
    pub fn staged_len(&self) -> usize {
        self.binary.len() + self.signature.len()
    }

    /// Copy binary then signature into `dest`.
    ///
    /// Returns `false` without writing if `dest` is too short.
    pub fn stage_into(&self, dest: &mut [u8]) -> bool {
        if dest.len() < self.staged_len() {
            return false;
        }
        let (binary, rest) = dest.split_at_mut(self.binary.len());
        binary.copy_from_slice(self.binary);
        rest[..self.signature.len()].copy_from_slice(self.signature);
        true
    }
}

/// The substitutes available for this GPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirmwareSet {
    slots: [Option<FirmwareImage>; SlotKind::COUNT],
}

impl FirmwareSet {
    pub const fn empty() -> Self {
        Self {
            slots: [None; SlotKind::COUNT],
        }
    }

    pub fn with(mut self, kind: SlotKind, image: FirmwareImage) -> Self {
        self.slots[kind as usize] = Some(image);
        self
    }

    pub fn image(&self, kind: SlotKind) -> Option<&FirmwareImage> {
        self.slots[kind as usize].as_ref()
    }

    /// A slot is intercepted only when a substitute exists for it.
    pub fn is_interceptable(&self, kind: SlotKind) -> bool {
        self.image(kind).is_some()
    }

    /// RSA signature for the uKernel scratch words.
    pub fn guc_signature(&self) -> &'static [u8] {
        self.image(SlotKind::Guc).map_or(&[][..], |image| image.signature)
    }
}
