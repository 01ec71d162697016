//! Erase planning
//!
//! Settings survive a firmware update because only the pages the new image
//! actually lands on get erased. The plan is the exact set of
//! (sector, page) pairs whose address range intersects a firmware block;
//! everything else is left untouched.

use crate::hex::FirmwareImage;
use crate::layout::FlashLayout;

/// One page scheduled for erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasePage {
    /// Index into [`FlashLayout::sectors`].
    pub sector: usize,
    /// Page index within the sector group.
    pub page: u32,
    /// Resolved page start address.
    pub address: u32,
    /// Page size in bytes.
    pub page_size: u32,
}

/// The ordered set of pages to erase before writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasePlan {
    /// Pages in (sector, page) order; each appears at most once.
    pub pages: Vec<ErasePage>,
}

impl ErasePlan {
    /// Walk every page of the layout and keep those overlapping any
    /// firmware block. A page is included when a block starts in it, ends
    /// in it, or spans it entirely; the first matching block settles the
    /// page.
    pub fn build(image: &FirmwareImage, layout: &FlashLayout) -> ErasePlan {
        let mut pages = Vec::new();

        for (sector_idx, sector) in layout.sectors.iter().enumerate() {
            for page in 0..sector.num_pages {
                let page_start = i64::from(sector.page_address(page));
                let page_end = page_start + i64::from(sector.page_size) - 1;

                for block in &image.blocks {
                    let block_start = i64::from(block.address);
                    let block_end = block_start + block.len() as i64 - 1;

                    let starts_in_page = page_start <= block_start && block_start <= page_end;
                    let ends_in_page = page_start <= block_end && block_end <= page_end;
                    let spans_page = block_start < page_start && block_end > page_end;

                    if starts_in_page || ends_in_page || spans_page {
                        pages.push(ErasePage {
                            sector: sector_idx,
                            page,
                            address: sector.page_address(page),
                            page_size: sector.page_size,
                        });
                        break;
                    }
                }
            }
        }

        ErasePlan { pages }
    }

    /// Number of pages in the plan.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True when no page overlaps the image.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total bytes the plan will erase.
    pub fn total_bytes(&self) -> u64 {
        self.pages.iter().map(|p| u64::from(p.page_size)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::DataBlock;

    fn f4_layout() -> FlashLayout {
        FlashLayout::parse("@Internal Flash /0x08000000/04*016Kg,01*064Kg,07*128Kg").unwrap()
    }

    fn image(blocks: Vec<(u32, usize)>) -> FirmwareImage {
        let blocks: Vec<DataBlock> = blocks
            .into_iter()
            .map(|(address, len)| DataBlock {
                address,
                data: vec![0xA5; len],
            })
            .collect();
        let total_bytes = blocks.iter().map(|b| b.len()).sum();
        FirmwareImage {
            blocks,
            total_bytes,
        }
    }

    #[test]
    fn small_block_touches_exactly_one_page() {
        let plan = ErasePlan::build(&image(vec![(0x0800_0000, 16)]), &f4_layout());
        assert_eq!(plan.pages.len(), 1);
        assert_eq!((plan.pages[0].sector, plan.pages[0].page), (0, 0));
        assert_eq!(plan.pages[0].address, 0x0800_0000);
        assert_eq!(plan.total_bytes(), 16384);
    }

    #[test]
    fn block_crossing_sector_boundary_takes_pages_from_both() {
        // Last 16K page ends at 0x0800FFFF; 64K sector starts at 0x08010000.
        let plan = ErasePlan::build(&image(vec![(0x0800_FFF0, 0x20)]), &f4_layout());
        let pairs: Vec<(usize, u32)> = plan.pages.iter().map(|p| (p.sector, p.page)).collect();
        assert_eq!(pairs, vec![(0, 3), (1, 0)]);
    }

    #[test]
    fn block_spanning_whole_sector_takes_every_page() {
        // Covers all four 16K pages and reaches into the 64K sector.
        let plan = ErasePlan::build(&image(vec![(0x0800_0000, 0x11000)]), &f4_layout());
        let pairs: Vec<(usize, u32)> = plan.pages.iter().map(|p| (p.sector, p.page)).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 0)]);
    }

    #[test]
    fn plan_stays_within_touched_sectors() {
        // Entirely inside the third 128K page of the last sector group.
        let plan = ErasePlan::build(&image(vec![(0x0806_0000, 0x100)]), &f4_layout());
        assert_eq!(plan.pages.len(), 1);
        assert_eq!((plan.pages[0].sector, plan.pages[0].page), (2, 2));
        assert_eq!(plan.pages[0].address, 0x0806_0000);
    }

    #[test]
    fn multiple_blocks_dedupe_within_a_page() {
        let plan = ErasePlan::build(
            &image(vec![(0x0800_0000, 16), (0x0800_0100, 16)]),
            &f4_layout(),
        );
        assert_eq!(plan.pages.len(), 1);
    }

    #[test]
    fn pages_are_unique_and_ordered() {
        let plan = ErasePlan::build(
            &image(vec![(0x0800_0000, 0x8000), (0x0802_0000, 0x100)]),
            &f4_layout(),
        );
        let mut pairs: Vec<(usize, u32)> = plan.pages.iter().map(|p| (p.sector, p.page)).collect();
        let ordered = pairs.clone();
        pairs.sort_unstable();
        pairs.dedup();
        assert_eq!(pairs, ordered);
    }

    #[test]
    fn empty_image_yields_empty_plan() {
        let plan = ErasePlan::build(&image(vec![]), &f4_layout());
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn blocks_outside_flash_yield_empty_plan() {
        let plan = ErasePlan::build(&image(vec![(0x2000_0000, 64)]), &f4_layout());
        assert!(plan.is_empty());
    }
}
