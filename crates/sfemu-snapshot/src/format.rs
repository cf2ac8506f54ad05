pub const SNAPSHOT_MAGIC: &[u8; 8] = b"SFEMSNAP";
pub const SNAPSHOT_VERSION_V1: u16 = 1;
pub const SNAPSHOT_ENDIANNESS_LITTLE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

impl SectionId {
    pub const META: SectionId = SectionId(1);
    pub const CPU: SectionId = SectionId(2);
    /// Contents of every writable (RAM) region. ROM is never stored.
    pub const MEMORY: SectionId = SectionId(3);
    /// MMIO device state blobs keyed by region base.
    pub const DEVICES: SectionId = SectionId(4);
    /// Hook registry descriptors and id allocator.
    pub const PATCHES: SectionId = SectionId(5);

    pub fn name(self) -> Option<&'static str> {
        match self {
            SectionId::META => Some("META"),
            SectionId::CPU => Some("CPU"),
            SectionId::MEMORY => Some("MEMORY"),
            SectionId::DEVICES => Some("DEVICES"),
            SectionId::PATCHES => Some("PATCHES"),
            _ => None,
        }
    }
}

impl core::fmt::Display for SectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name}({})", self.0)
        } else {
            write!(f, "SectionId({})", self.0)
        }
    }
}
