use std::fs;

use rawbuf::{
    AnonBacking, Backing, Error, FileBacking, HeapBacking, MIN_CAPACITY, PAGE_SIZE, Result,
    grown_capacity,
};
use tempfile::TempDir;

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Writes `values` into the first slots of a backing.
fn fill<T: rawbuf::Slot, B: Backing<T>>(backing: &mut B, values: &[T]) {
    assert!(values.len() <= backing.capacity());
    for (i, value) in values.iter().enumerate() {
        // SAFETY: i < capacity, slots are disjoint.
        unsafe { backing.ptr().add(i).write(*value) };
    }
}

/// Reads the first `len` slots back out.
fn collect<T: rawbuf::Slot, B: Backing<T>>(backing: &B, len: usize) -> Vec<T> {
    assert!(len <= backing.capacity());
    (0..len)
        // SAFETY: i < capacity.
        .map(|i| unsafe { backing.ptr().add(i).read() })
        .collect()
}

#[test]
fn test_growth_policy() {
    // Small buffers jump to the minimum.
    assert_eq!(grown_capacity(0, 1), 16);
    assert_eq!(grown_capacity(8, 10), 16);
    // Demand already satisfied.
    assert_eq!(grown_capacity(16, 16), 16);
    assert_eq!(grown_capacity(16, 10), 16);
    // Doubling from the current capacity.
    assert_eq!(grown_capacity(16, 17), 32);
    assert_eq!(grown_capacity(16, 100), 128);
    assert_eq!(grown_capacity(20, 21), 40);
    assert_eq!(grown_capacity(1024, 5000), 8192);
}

#[test]
fn test_heap_starts_at_minimum() -> Result<()> {
    let backing = HeapBacking::<u64>::new()?;
    assert_eq!(backing.capacity(), MIN_CAPACITY);
    assert_eq!(backing.backing_len(), 0);
    Ok(())
}

#[test]
fn test_heap_with_capacity_floors() -> Result<()> {
    let backing = HeapBacking::<u64>::with_capacity(4)?;
    assert_eq!(backing.capacity(), MIN_CAPACITY);
    let backing = HeapBacking::<u64>::with_capacity(100)?;
    assert_eq!(backing.capacity(), 100);
    Ok(())
}

#[test]
fn test_heap_grow_preserves_slots() -> Result<()> {
    let mut backing = HeapBacking::<u32>::new()?;
    let values: Vec<u32> = (0..16).collect();
    fill(&mut backing, &values);

    backing.grow_to(1000)?;
    assert!(backing.capacity() >= 1000);
    assert_eq!(collect(&backing, 16), values);
    Ok(())
}

#[test]
fn test_heap_grow_below_capacity_is_noop() -> Result<()> {
    let mut backing = HeapBacking::<u32>::with_capacity(64)?;
    backing.grow_to(10)?;
    assert_eq!(backing.capacity(), 64);
    Ok(())
}

#[test]
fn test_anon_spans_a_page() -> Result<()> {
    let backing = AnonBacking::<u32>::new()?;
    assert_eq!(backing.capacity(), PAGE_SIZE / size_of::<u32>());
    // Fresh anonymous memory reads as zeroes.
    assert!(collect(&backing, backing.capacity()).iter().all(|&v| v == 0));
    Ok(())
}

#[test]
fn test_anon_large_slots_floor_at_minimum() -> Result<()> {
    // One page holds fewer than 16 of these, so the floor wins.
    let backing = AnonBacking::<[u64; 64]>::new()?;
    assert_eq!(backing.capacity(), MIN_CAPACITY);
    Ok(())
}

#[test]
fn test_anon_grow_preserves_slots() -> Result<()> {
    let mut backing = AnonBacking::<u64>::new()?;
    let initial = backing.capacity();
    let values: Vec<u64> = (0..initial as u64).collect();
    fill(&mut backing, &values);

    backing.grow_to(initial * 8)?;
    assert_eq!(backing.capacity(), initial * 8);
    assert_eq!(collect(&backing, initial), values);
    Ok(())
}

#[test]
fn test_file_open_creates_with_minimum() -> TestResult {
    let temp = TempDir::new()?;
    let path = temp.path().join("fresh.bin");

    let backing = FileBacking::<u32>::open(&path)?;
    assert_eq!(backing.capacity(), MIN_CAPACITY);
    assert_eq!(backing.backing_len(), 0);
    assert_eq!(
        fs::metadata(&path)?.len(),
        (MIN_CAPACITY * size_of::<u32>()) as u64
    );
    Ok(())
}

#[test]
fn test_file_trims_on_drop_and_reopens() -> TestResult {
    let temp = TempDir::new()?;
    let path = temp.path().join("trim.bin");

    {
        let mut backing = FileBacking::<u32>::open(&path)?;
        fill(&mut backing, &[10u32, 20, 30]);
        backing.sync(3);
    }
    assert_eq!(fs::metadata(&path)?.len(), 12);

    let backing = FileBacking::<u32>::open(&path)?;
    assert_eq!(backing.backing_len(), 3);
    assert_eq!(backing.capacity(), MIN_CAPACITY);
    assert_eq!(collect(&backing, 3), vec![10, 20, 30]);
    // Reopening extends the file back out to the capacity.
    assert_eq!(
        fs::metadata(&path)?.len(),
        (MIN_CAPACITY * size_of::<u32>()) as u64
    );
    Ok(())
}

#[test]
fn test_file_without_sync_keeps_nothing() -> TestResult {
    let temp = TempDir::new()?;
    let path = temp.path().join("unsynced.bin");

    {
        let mut backing = FileBacking::<u32>::open(&path)?;
        fill(&mut backing, &[1u32, 2, 3]);
        // No sync: the backing believes nothing is stored.
    }
    assert_eq!(fs::metadata(&path)?.len(), 0);
    Ok(())
}

#[test]
fn test_file_rejects_misaligned_length() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("torn.bin");
    fs::write(&path, [0u8; 7]).unwrap();

    match FileBacking::<u32>::open(&path) {
        Err(Error::CorruptedFile { file_len, slot_size }) => {
            assert_eq!(file_len, 7);
            assert_eq!(slot_size, 4);
        }
        other => panic!("expected CorruptedFile, got {other:?}"),
    }
}

#[test]
fn test_file_grow_matches_file_length() -> TestResult {
    let temp = TempDir::new()?;
    let path = temp.path().join("grow.bin");

    let mut backing = FileBacking::<u32>::open(&path)?;
    let values: Vec<u32> = (0..16).collect();
    fill(&mut backing, &values);

    backing.grow_to(100)?;
    assert_eq!(backing.capacity(), 100);
    assert_eq!(fs::metadata(&path)?.len(), 400);
    assert_eq!(collect(&backing, 16), values);
    Ok(())
}

#[test]
fn test_file_grow_shrinks_to_exact_demand() -> TestResult {
    let temp = TempDir::new()?;
    let path = temp.path().join("shrink.bin");

    let mut backing = FileBacking::<u32>::open(&path)?;
    backing.grow_to(128)?;
    assert_eq!(backing.capacity(), 128);

    backing.grow_to(20)?;
    assert_eq!(backing.capacity(), 20);
    assert_eq!(fs::metadata(&path)?.len(), 80);

    // Shrinking floors at the minimum capacity while mapped.
    backing.grow_to(2)?;
    assert_eq!(backing.capacity(), MIN_CAPACITY);
    assert_eq!(
        fs::metadata(&path)?.len(),
        (MIN_CAPACITY * size_of::<u32>()) as u64
    );
    Ok(())
}

#[test]
fn test_file_reopen_after_partial_use() -> TestResult {
    let temp = TempDir::new()?;
    let path = temp.path().join("partial.bin");

    {
        let mut backing = FileBacking::<u64>::open(&path)?;
        backing.grow_to(50)?;
        let values: Vec<u64> = (0..40).collect();
        fill(&mut backing, &values);
        backing.sync(40);
    }
    assert_eq!(fs::metadata(&path)?.len(), 320);

    let backing = FileBacking::<u64>::open(&path)?;
    assert_eq!(backing.backing_len(), 40);
    assert_eq!(backing.capacity(), 40);
    assert_eq!(collect(&backing, 40), (0..40).collect::<Vec<u64>>());
    Ok(())
}
