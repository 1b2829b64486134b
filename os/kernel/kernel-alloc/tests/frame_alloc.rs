use kernel_alloc::PmmError;
use kernel_alloc::frame_alloc::{BitmapFrameAllocator, FrameLayout};
use kernel_info::boot::{E820Entry, MemoryMap, MemoryRegionType};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

const MIB: u64 = 1024 * 1024;

fn layout_for(map: &MemoryMap<'_>, kernel_end: u32) -> FrameLayout {
    FrameLayout::compute(map, PhysicalAddress::new(kernel_end)).unwrap()
}

fn count_set_bits(pmm: &BitmapFrameAllocator<'_>) -> u32 {
    (0..pmm.total_pages())
        .filter(|&i| pmm.is_page_used(PhysicalPage::from_index(i)) == Some(true))
        .count() as u32
}

#[test]
fn sixteen_mib_end_to_end() {
    let entries = [E820Entry::new(0, 16 * MIB, MemoryRegionType::Usable)];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x10_5000);
    assert_eq!(layout.total_pages, 4096);
    assert_eq!(layout.bitmap_len, 512);
    assert_eq!(layout.bitmap_start, PhysicalAddress::new(0x10_5000));

    let mut storage = vec![0u8; layout.bitmap_len];
    let mut pmm = BitmapFrameAllocator::init(&map, &layout, &mut storage).unwrap();

    // 256 low-memory frames, 0x100..0x105 for the kernel, one for the bitmap.
    let reserved = 256 + 5 + 1;
    assert_eq!(pmm.total_pages(), 4096);
    assert_eq!(pmm.free_pages(), 4096 - reserved);

    let pages: Vec<_> = (0..3).map(|_| pmm.alloc_page().unwrap()).collect();
    assert_eq!(
        pages,
        [0x10_6000, 0x10_7000, 0x10_8000].map(PhysicalAddress::new)
    );
    let before = pmm.free_pages();

    pmm.free_page(pages[1]).unwrap();
    assert_eq!(pmm.free_pages(), before + 1);
    assert_eq!(pmm.is_page_used(pages[0].page()), Some(true));
    assert_eq!(pmm.is_page_used(pages[1].page()), Some(false));
    assert_eq!(pmm.is_page_used(pages[2].page()), Some(true));

    // Frames 0x106 and 0x108 sit in bitmap bytes 32 and 33.
    assert_eq!(pmm.bitmap()[32] & 0b1100_0000, 0b0100_0000);
    assert_eq!(pmm.bitmap()[33] & 1, 1);

    // First fit hands the hole out again.
    assert_eq!(pmm.alloc_page(), Ok(pages[1]));
}

#[test]
fn free_count_matches_clear_bits() {
    let entries = [
        E820Entry::new(0, 0x9_FC00, MemoryRegionType::Usable),
        E820Entry::new(0x9_FC00, 0x400, MemoryRegionType::Reserved),
        E820Entry::new(0xF_0000, 0x1_0000, MemoryRegionType::Reserved),
        E820Entry::new(0x10_0000, 7 * MIB, MemoryRegionType::Usable),
        E820Entry::new(0x80_0000, 0x1_0000, MemoryRegionType::AcpiReclaimable),
        E820Entry::new(0xFFFC_0000, 0x4_0000, MemoryRegionType::Reserved),
    ];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x3_0000);
    let mut storage = vec![0u8; layout.bitmap_len];
    let mut pmm = BitmapFrameAllocator::init(&map, &layout, &mut storage).unwrap();

    assert_eq!(pmm.total_pages(), 0x800);
    assert_eq!(pmm.total_pages() - count_set_bits(&pmm), pmm.free_pages());
    assert_eq!(pmm.used_pages() + pmm.free_pages(), pmm.total_pages());

    let mut taken = Vec::new();
    while let Ok(addr) = pmm.alloc_page() {
        assert!(addr.as_u64() >= 0x10_0000, "handed out low memory {addr}");
        assert!(addr.is_page_aligned());
        taken.push(addr);
        assert_eq!(pmm.total_pages() - count_set_bits(&pmm), pmm.free_pages());
    }
    assert_eq!(pmm.free_pages(), 0);
    assert_eq!(taken.len(), 0x700);

    for addr in taken.iter().rev() {
        pmm.free_page(*addr).unwrap();
    }
    assert_eq!(pmm.free_pages(), 0x700);
    assert_eq!(pmm.total_pages() - count_set_bits(&pmm), pmm.free_pages());
}

#[test]
fn alloc_then_free_restores_state() {
    let entries = [E820Entry::new(0, 4 * MIB, MemoryRegionType::Usable)];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x8000);
    let mut storage = vec![0u8; layout.bitmap_len];
    let mut pmm = BitmapFrameAllocator::init(&map, &layout, &mut storage).unwrap();

    let free = pmm.free_pages();
    let snapshot = pmm.bitmap().to_vec();

    let addr = pmm.alloc_page().unwrap();
    assert_eq!(pmm.free_pages(), free - 1);
    pmm.free_page(addr).unwrap();

    assert_eq!(pmm.free_pages(), free);
    assert_eq!(pmm.bitmap(), snapshot.as_slice());
}

#[test]
fn invalid_frees_change_nothing() {
    let entries = [E820Entry::new(0, 2 * MIB, MemoryRegionType::Usable)];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x8000);
    let mut storage = vec![0u8; layout.bitmap_len];
    let mut pmm = BitmapFrameAllocator::init(&map, &layout, &mut storage).unwrap();

    let addr = pmm.alloc_page().unwrap();
    let free = pmm.free_pages();
    let snapshot = pmm.bitmap().to_vec();

    let unaligned = PhysicalAddress::new(addr.as_u32() + 0x10);
    assert_eq!(pmm.free_page(unaligned), Err(PmmError::Unaligned(unaligned)));

    let beyond = PhysicalAddress::new(0x20_0000);
    assert_eq!(pmm.free_page(beyond), Err(PmmError::OutOfRange(beyond)));

    let never_used = PhysicalAddress::new(0x1F_F000);
    assert_eq!(pmm.free_page(never_used), Err(PmmError::DoubleFree(never_used)));

    assert_eq!(pmm.free_pages(), free);
    assert_eq!(pmm.bitmap(), snapshot.as_slice());

    pmm.free_page(addr).unwrap();
    assert_eq!(pmm.free_page(addr), Err(PmmError::DoubleFree(addr)));
    assert_eq!(pmm.free_pages(), free + 1);
}

#[test]
fn exhaustion_reports_out_of_memory() {
    // Only 1 MiB of RAM: everything is reserved low memory.
    let entries = [E820Entry::new(0, MIB, MemoryRegionType::Usable)];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x8000);
    let mut storage = vec![0u8; layout.bitmap_len];
    let mut pmm = BitmapFrameAllocator::init(&map, &layout, &mut storage).unwrap();

    assert_eq!(pmm.free_pages(), 0);
    assert_eq!(pmm.alloc_page(), Err(PmmError::OutOfMemory));
}

#[test]
fn region_marking_is_idempotent() {
    let entries = [E820Entry::new(0, 4 * MIB, MemoryRegionType::Usable)];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x8000);
    let mut storage = vec![0u8; layout.bitmap_len];
    let mut pmm = BitmapFrameAllocator::init(&map, &layout, &mut storage).unwrap();
    let free = pmm.free_pages();

    // 0x20_0800..0x20_2800 touches three frames.
    let base = PhysicalAddress::new(0x20_0800);
    assert_eq!(pmm.mark_region_used(base, 0x2000), 3);
    assert_eq!(pmm.mark_region_used(base, 0x2000), 0);
    assert_eq!(pmm.free_pages(), free - 3);

    // Releasing rounds inwards: only 0x20_1000 is fully covered.
    assert_eq!(pmm.mark_region_free(base, 0x2000), 1);
    assert_eq!(pmm.mark_region_free(base, 0x2000), 0);
    assert_eq!(pmm.free_pages(), free - 2);

    // Nothing beyond the tracked range is touched.
    assert_eq!(
        pmm.mark_region_used(PhysicalAddress::new(0x40_0000), 0x10_0000),
        0
    );
    assert_eq!(pmm.is_page_used(PhysicalPage::from_index(0x400)), None);
}

#[test]
fn map_beyond_four_gib_is_clamped() {
    let entries = [
        E820Entry::new(0, 0x9_F000, MemoryRegionType::Usable),
        E820Entry::new(0x10_0000, 0x1_0000_0000, MemoryRegionType::Usable),
    ];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x8000);
    assert_eq!(layout.total_pages, 0xF_FFFF);
    assert_eq!(layout.bitmap_len, 0x2_0000);
}

#[test]
fn short_storage_is_refused() {
    let entries = [E820Entry::new(0, 16 * MIB, MemoryRegionType::Usable)];
    let map = MemoryMap::new(&entries);
    let layout = layout_for(&map, 0x8000);
    let mut storage = vec![0u8; 100];
    assert!(matches!(
        BitmapFrameAllocator::init(&map, &layout, &mut storage),
        Err(PmmError::BitmapTooSmall {
            needed: 512,
            actual: 100
        })
    ));
}
