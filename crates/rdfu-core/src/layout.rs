//! Flash layout discovery from DFU descriptor strings
//!
//! STM32 DFU bootloaders advertise their memory map through interface
//! string descriptors shaped like
//! `@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg`: a memory
//! type, a start address, and a comma-separated list of
//! `<count>*<size><unit><mode>` sector groups. This module turns those
//! strings into [`FlashLayout`] geometry; fetching them from the device
//! lives in the USB backend crate.

/// One group of equally sized, individually erasable pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    /// Address of the first page in the group.
    pub start_address: u32,
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Number of pages in the group.
    pub num_pages: u32,
    /// `page_size * num_pages`.
    pub total_size: u32,
}

impl Sector {
    /// Address of page `page` within this sector group.
    pub fn page_address(&self, page: u32) -> u32 {
        self.start_address + page * self.page_size
    }
}

/// Geometry of one memory region advertised by the bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    /// Region name from the descriptor, e.g. `Internal Flash`.
    pub memory_type: String,
    /// Start address of the region.
    pub start_address: u32,
    /// Sector groups laid out back-to-back from `start_address`.
    pub sectors: Vec<Sector>,
    /// Total region size; always the sum of the sector group sizes.
    pub total_size: u32,
    /// The cleaned descriptor string this layout was parsed from.
    pub descriptor: String,
}

impl FlashLayout {
    /// Parse a descriptor string. Returns `None` for anything that does not
    /// follow the `@type/start/sectors` shape; callers skip such regions
    /// rather than failing discovery outright.
    pub fn parse(descriptor: &str) -> Option<FlashLayout> {
        // Drop non-printable characters; descriptors read over the wire can
        // carry stray control bytes.
        let cleaned: String = descriptor
            .chars()
            .filter(|c| (' '..='~').contains(c))
            .collect();

        let mut parts: Vec<&str> = cleaned.split('/').collect();

        // Some parts (G4 series) append extra segments; only the first
        // three carry the layout.
        if parts.len() > 3 {
            parts.truncate(3);
        }
        if parts.len() < 3 || !parts[0].starts_with('@') {
            return None;
        }

        let memory_type = parts[0].trim().replace('@', "");
        let start_address = parse_hex_u32(parts[1])?;

        let mut sectors = Vec::new();
        let mut total_size: u64 = 0;

        for sector_str in parts[2].split(',') {
            if !sector_str.contains('*') {
                continue;
            }

            let pieces: Vec<&str> = sector_str.split('*').collect();
            if pieces.len() != 2 {
                return None;
            }
            let (num_str, size_str) = (pieces[0], pieces[1]);
            let num_pages: u32 = num_str.trim().parse().ok()?;

            let size_numeric: String = size_str.chars().filter(char::is_ascii_digit).collect();
            if size_numeric.is_empty() {
                continue;
            }
            let mut page_size: u64 = size_numeric.parse().ok()?;

            // Unit letter sits just before the trailing mode flag.
            let chars: Vec<char> = size_str.chars().collect();
            if chars.len() >= 2 {
                match chars[chars.len() - 2] {
                    'M' => page_size = page_size.checked_mul(1024 * 1024)?,
                    'K' => page_size = page_size.checked_mul(1024)?,
                    _ => {}
                }
            }

            let group_size = u64::from(num_pages).checked_mul(page_size)?;
            sectors.push(Sector {
                start_address: start_address.checked_add(u32::try_from(total_size).ok()?)?,
                page_size: u32::try_from(page_size).ok()?,
                num_pages,
                total_size: u32::try_from(group_size).ok()?,
            });
            total_size += group_size;
        }

        if sectors.is_empty() {
            return None;
        }

        Some(FlashLayout {
            memory_type,
            start_address,
            sectors,
            total_size: u32::try_from(total_size).ok()?,
            descriptor: cleaned,
        })
    }

    /// Lookup key for this region: lowercase with spaces as underscores,
    /// e.g. `internal_flash`.
    pub fn key(&self) -> String {
        self.memory_type.to_lowercase().replace(' ', "_")
    }
}

/// All memory regions the device advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// Regions in alternate-setting order; unparseable descriptors are
    /// dropped here.
    pub regions: Vec<FlashLayout>,
}

impl ChipInfo {
    /// Parse every descriptor string, keeping the ones that describe a
    /// memory region.
    pub fn parse<S: AsRef<str>>(descriptors: &[S]) -> ChipInfo {
        let regions = descriptors
            .iter()
            .filter_map(|d| FlashLayout::parse(d.as_ref()))
            .collect();
        ChipInfo { regions }
    }

    /// True when no descriptor parsed.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Find a region by its normalized key.
    pub fn region(&self, key: &str) -> Option<&FlashLayout> {
        self.regions.iter().find(|r| r.key() == key)
    }

    /// The internal flash region, the only one this tool writes to.
    pub fn internal_flash(&self) -> Option<&FlashLayout> {
        self.region("internal_flash")
    }
}

fn parse_hex_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const F4_DESCRIPTOR: &str = "@Internal Flash /0x08000000/04*016Kg,01*064Kg,07*128Kg";

    #[test]
    fn f4_descriptor_parses_to_expected_sectors() {
        let layout = FlashLayout::parse(F4_DESCRIPTOR).unwrap();
        assert_eq!(layout.memory_type, "Internal Flash");
        assert_eq!(layout.start_address, 0x0800_0000);
        assert_eq!(
            layout.sectors,
            vec![
                Sector {
                    start_address: 0x0800_0000,
                    page_size: 16384,
                    num_pages: 4,
                    total_size: 65536,
                },
                Sector {
                    start_address: 0x0801_0000,
                    page_size: 65536,
                    num_pages: 1,
                    total_size: 65536,
                },
                Sector {
                    start_address: 0x0802_0000,
                    page_size: 131072,
                    num_pages: 7,
                    total_size: 917504,
                },
            ]
        );
        assert_eq!(layout.total_size, 1_048_576);
    }

    #[test]
    fn parsing_is_idempotent() {
        let a = FlashLayout::parse(F4_DESCRIPTOR).unwrap();
        let b = FlashLayout::parse(F4_DESCRIPTOR).unwrap();
        assert_eq!(a, b);
        let sector_sum: u32 = a.sectors.iter().map(|s| s.total_size).sum();
        assert_eq!(a.total_size, sector_sum);
    }

    #[test]
    fn h7_descriptor_parses() {
        let layout = FlashLayout::parse("@Internal Flash   /0x08000000/16*128Kg").unwrap();
        assert_eq!(layout.sectors.len(), 1);
        assert_eq!(layout.sectors[0].page_size, 131072);
        assert_eq!(layout.sectors[0].num_pages, 16);
        assert_eq!(layout.total_size, 2 * 1024 * 1024);
    }

    #[test]
    fn short_size_spelling_parses() {
        // F72x units come through as "64Kg" rather than "064Kg".
        let layout =
            FlashLayout::parse("@Internal Flash  /0x08000000/04*016Kg,01*64Kg,03*128Kg").unwrap();
        assert_eq!(layout.sectors[1].page_size, 65536);
        assert_eq!(layout.total_size, 512 * 1024);
    }

    #[test]
    fn extra_segments_are_truncated() {
        // G4 bootloaders append further "/..." segments after the sectors.
        let layout =
            FlashLayout::parse("@Internal Flash/0x08000000/64*002Kg/0x1FFF7800/01*024 e").unwrap();
        assert_eq!(layout.sectors.len(), 1);
        assert_eq!(layout.total_size, 128 * 1024);
    }

    #[test]
    fn non_printable_characters_are_stripped() {
        let layout =
            FlashLayout::parse("@Internal Flash\u{0} /0x08000000/04*016K\u{7f}g").unwrap();
        assert_eq!(layout.memory_type, "Internal Flash");
        assert_eq!(layout.sectors[0].page_size, 16384);
    }

    #[test]
    fn descriptor_without_marker_is_rejected() {
        assert!(FlashLayout::parse("Internal Flash /0x08000000/04*016Kg").is_none());
        assert!(FlashLayout::parse("@Internal Flash /0x08000000").is_none());
        assert!(FlashLayout::parse("").is_none());
    }

    #[test]
    fn mega_unit_multiplies_by_1024_squared() {
        let layout = FlashLayout::parse("@External Flash /0x90000000/01*001Mg").unwrap();
        assert_eq!(layout.sectors[0].page_size, 1024 * 1024);
    }

    #[test]
    fn oversized_page_size_rejects_the_region() {
        // u64::MAX as the size numeric; the unit multiplier must not wrap.
        assert!(
            FlashLayout::parse("@Internal Flash /0x08000000/01*18446744073709551615Mg")
                .is_none()
        );
    }

    #[test]
    fn oversized_sector_group_rejects_the_region() {
        // num_pages * page_size exceeds u64 once the K unit is applied.
        assert!(
            FlashLayout::parse("@Internal Flash /0x08000000/4294967295*4294967295Kg").is_none()
        );
    }

    #[test]
    fn segments_without_counts_are_skipped() {
        let layout = FlashLayout::parse("@Internal Flash /0x08000000/junk,04*016Kg").unwrap();
        assert_eq!(layout.sectors.len(), 1);
    }

    #[test]
    fn all_skippable_segments_reject_the_region() {
        assert!(FlashLayout::parse("@Internal Flash /0x08000000/junk").is_none());
    }

    #[test]
    fn region_key_normalizes_type() {
        let layout = FlashLayout::parse(F4_DESCRIPTOR).unwrap();
        assert_eq!(layout.key(), "internal_flash");
    }

    #[test]
    fn chip_info_selects_internal_flash() {
        let info = ChipInfo::parse(&[
            "@Option Bytes  /0x1FFFC000/01*016 e",
            F4_DESCRIPTOR,
            "not a descriptor",
        ]);
        assert_eq!(info.regions.len(), 2);
        let flash = info.internal_flash().unwrap();
        assert_eq!(flash.total_size, 1_048_576);
        assert!(info.region("option_bytes").is_some());
    }

    #[test]
    fn chip_info_without_regions_is_empty() {
        let info = ChipInfo::parse(&["garbage", ""]);
        assert!(info.is_empty());
        assert!(info.internal_flash().is_none());
    }

    #[test]
    fn sector_page_addresses() {
        let layout = FlashLayout::parse(F4_DESCRIPTOR).unwrap();
        assert_eq!(layout.sectors[0].page_address(0), 0x0800_0000);
        assert_eq!(layout.sectors[0].page_address(3), 0x0800_C000);
        assert_eq!(layout.sectors[2].page_address(1), 0x0804_0000);
    }
}
