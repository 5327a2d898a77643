// FAT32 directory entry types

pub const DIR_ENTRY_SIZE: usize = 32;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_LONG_NAME: u8 = 0x0F;

/// FAT32 short directory entry (32 bytes on disk)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 11], // 8.3 filename
    pub attr: u8,
    pub cluster_high: u16,
    pub cluster_low: u16,
    pub file_size: u32,
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            name: [0; 11],
            attr: 0,
            cluster_high: 0,
            cluster_low: 0,
            file_size: 0,
        }
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);
        Self {
            name,
            attr: raw[11],
            cluster_high: u16::from_le_bytes([raw[20], raw[21]]),
            cluster_low: u16::from_le_bytes([raw[26], raw[27]]),
            file_size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    /// Timestamps are left zero.
    pub fn encode(&self, raw: &mut [u8]) {
        raw[..DIR_ENTRY_SIZE].fill(0);
        raw[0..11].copy_from_slice(&self.name);
        raw[11] = self.attr;
        raw[20..22].copy_from_slice(&self.cluster_high.to_le_bytes());
        raw[26..28].copy_from_slice(&self.cluster_low.to_le_bytes());
        raw[28..32].copy_from_slice(&self.file_size.to_le_bytes());
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == 0x00 || self.name[0] == 0xE5
    }

    /// Marks the end of the directory; no entries follow.
    pub fn is_end(&self) -> bool {
        self.name[0] == 0x00
    }

    /// Long-name fragments and the volume label are not files.
    pub fn is_visible(&self) -> bool {
        !self.is_free()
            && self.attr & ATTR_LONG_NAME != ATTR_LONG_NAME
            && self.attr & ATTR_VOLUME_ID == 0
    }

    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = short_name(name);
    }

    pub fn first_cluster(&self) -> u32 {
        ((self.cluster_high as u32) << 16) | (self.cluster_low as u32)
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.cluster_high = (cluster >> 16) as u16;
        self.cluster_low = (cluster & 0xFFFF) as u16;
    }
}

/// Whether `name` is representable as an 8.3 short name without loss.
///
/// Longer names would be truncated by [`short_name`] and could collide.
pub fn fits_short_name(name: &str) -> bool {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let valid = |part: &str| part.bytes().all(|b| b.is_ascii_graphic() && b != b'.' && b != b'/');
    (1..=8).contains(&base.len()) && ext.len() <= 3 && valid(base) && valid(ext)
}

/// Convert to 8.3 format (simple, no LFN): upper-cased, base and extension
/// truncated to 8 and 3 bytes.
pub fn short_name(name: &str) -> [u8; 11] {
    let mut out = [0x20; 11];

    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, ext),
        _ => (name, ""),
    };

    for (slot, byte) in out[..8].iter_mut().zip(base.bytes()) {
        *slot = byte.to_ascii_uppercase();
    }
    for (slot, byte) in out[8..].iter_mut().zip(ext.bytes()) {
        *slot = byte.to_ascii_uppercase();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names() {
        assert_eq!(&short_name("BOOTX64.EFI"), b"BOOTX64 EFI");
        assert_eq!(&short_name("grub.cfg"), b"GRUB    CFG");
        assert_eq!(&short_name("EFI"), b"EFI        ");
        assert_eq!(&short_name("verylongname.text"), b"VERYLONGTEX");
    }

    #[test]
    fn test_fits_short_name() {
        assert!(fits_short_name("BOOTX64.EFI"));
        assert!(fits_short_name("grub.cfg"));
        assert!(fits_short_name("EFI"));
        assert!(!fits_short_name("LONGNAME1.BIN"));
        assert!(!fits_short_name("kernel.text"));
        assert!(!fits_short_name("a.b.c"));
        assert!(!fits_short_name(".hidden"));
        assert!(!fits_short_name("TWO WORD"));
        assert!(!fits_short_name(""));
    }

    #[test]
    fn test_entry_round_trip() {
        let mut entry = DirEntry::empty();
        entry.set_name("kernel.elf");
        entry.attr = ATTR_ARCHIVE;
        entry.set_first_cluster(0x0001_0005);
        entry.file_size = 12345;

        let mut raw = [0xAAu8; DIR_ENTRY_SIZE];
        entry.encode(&mut raw);
        assert_eq!(&raw[20..22], &[0x01, 0x00]);
        assert_eq!(&raw[26..28], &[0x05, 0x00]);
        assert_eq!(DirEntry::decode(&raw), entry);
    }
}
