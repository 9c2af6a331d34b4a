//! Integration tests for the buffer pool manager

use std::sync::Arc;
use std::thread;

use burrow::buffer::BufferPoolManager;
use burrow::common::{BurrowError, PageId, PAGE_SIZE};
use burrow::storage::disk::DiskManager;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = BufferPoolManager::new(pool_size, 2, dm);
    (bpm, temp_file)
}

#[test]
fn test_buffer_pool_basic_operations() {
    let (bpm, _temp) = create_bpm(10);

    // page 0 is the header page, so the first data page is 1
    let page_id = {
        let mut guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(1));
        guard.data_mut()[0] = 0xDE;
        guard.data_mut()[1] = 0xAD;
        guard.data_mut()[2] = 0xBE;
        guard.data_mut()[3] = 0xEF;
        guard.page_id()
    };

    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(&guard.data()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn test_buffer_pool_guard_releases_pin() {
    let (bpm, _temp) = create_bpm(10);

    let guard = bpm.new_page().unwrap();
    let page_id = guard.page_id();
    assert_eq!(bpm.get_pin_count(page_id), Some(1));
    assert_eq!(bpm.pinned_frame_count(), 1);

    drop(guard);
    assert_eq!(bpm.get_pin_count(page_id), Some(0));
    assert_eq!(bpm.pinned_frame_count(), 0);

    // two readers share the frame
    let r1 = bpm.fetch_page_read(page_id).unwrap();
    let r2 = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(bpm.get_pin_count(page_id), Some(2));
    drop(r1);
    drop(r2);
    assert_eq!(bpm.get_pin_count(page_id), Some(0));
}

#[test]
fn test_buffer_pool_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_id;
    let test_data = b"Persistence test data";

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, 2, dm);

        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[..test_data.len()].copy_from_slice(test_data);
        page_id = guard.page_id();
        drop(guard);

        bpm.flush_page(page_id).unwrap();
    }

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, 2, dm);

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(&guard.data()[..test_data.len()], test_data);
    }
}

#[test]
fn test_buffer_pool_eviction() {
    let (bpm, _temp) = create_bpm(3);

    let mut page_ids = Vec::new();
    for i in 0..3u8 {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = i;
        page_ids.push(guard.page_id());
    }

    for &pid in &page_ids {
        assert_eq!(bpm.get_pin_count(pid), Some(0));
    }
    assert_eq!(bpm.free_frame_count(), 0);

    // creating one more page evicts somebody, writing the victim back
    let new_pid = bpm.new_page().unwrap().page_id();
    assert_eq!(new_pid, PageId::new(4));

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8);
    }
}

#[test]
fn test_buffer_pool_pin_prevents_eviction() {
    let (bpm, _temp) = create_bpm(2);

    let _guard1 = bpm.new_page().unwrap();
    let _guard2 = bpm.new_page().unwrap();

    let result = bpm.new_page();
    assert!(matches!(result, Err(BurrowError::BufferPoolFull)));
}

#[test]
fn test_buffer_pool_delete_page() {
    let (bpm, _temp) = create_bpm(10);

    let pid = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = 42;
        guard.page_id()
    };

    assert!(bpm.delete_page(pid).unwrap());
    assert_eq!(bpm.get_pin_count(pid), None);
    assert_eq!(bpm.free_frame_count(), 10);

    // non-resident delete is a no-op success
    assert!(bpm.delete_page(pid).unwrap());

    // the frame and the id are both reusable
    let guard = bpm.new_page().unwrap();
    assert_eq!(guard.page_id(), pid);
}

#[test]
fn test_buffer_pool_cannot_delete_pinned_page() {
    let (bpm, _temp) = create_bpm(10);

    let guard = bpm.new_page().unwrap();
    let pid = guard.page_id();

    let result = bpm.delete_page(pid);
    assert!(matches!(result, Err(BurrowError::PageStillPinned(_))));
}

#[test]
fn test_buffer_pool_flush_all() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_ids;
    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, 2, dm);

        page_ids = (0..5u8)
            .map(|i| {
                let mut guard = bpm.new_page().unwrap();
                guard.data_mut()[0] = i;
                guard.page_id()
            })
            .collect::<Vec<_>>();

        bpm.flush_all_pages().unwrap();
    }

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, 2, dm);

        for (i, &pid) in page_ids.iter().enumerate() {
            let guard = bpm.fetch_page_read(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8);
        }
    }
}

#[test]
fn test_buffer_pool_clean_fetch_is_idempotent_on_disk() {
    let (bpm, _temp) = create_bpm(10);

    let page_id = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[123] = 7;
        guard.page_id()
    };
    bpm.flush_page(page_id).unwrap();
    let writes_before = bpm.disk_manager().num_writes();

    // fetch + clean unpin leaves the on-disk bytes untouched
    {
        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[123], 7);
    }
    bpm.flush_all_pages().unwrap();
    assert_eq!(bpm.disk_manager().num_writes(), writes_before);
}

#[test]
fn test_buffer_pool_concurrent_readers() {
    let (bpm, _temp) = create_bpm(10);
    let bpm = Arc::new(bpm);

    let page_id = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = 99;
        guard.page_id()
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for _ in 0..100 {
                    let guard = bpm.fetch_page_read(page_id).unwrap();
                    assert_eq!(guard.data()[0], 99);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_buffer_pool_large_workload() {
    let (bpm, _temp) = create_bpm(5); // small pool to force evictions

    let page_ids: Vec<_> = (0..20)
        .map(|_| {
            let mut guard = bpm.new_page().unwrap();
            let pid = guard.page_id();
            guard.data_mut()[..4].copy_from_slice(&pid.as_u32().to_le_bytes());
            pid
        })
        .collect();

    for &pid in &page_ids {
        let guard = bpm.fetch_page_read(pid).unwrap();
        let id_bytes: [u8; 4] = guard.data()[..4].try_into().unwrap();
        assert_eq!(u32::from_le_bytes(id_bytes), pid.as_u32());
    }
    assert_eq!(bpm.pinned_frame_count(), 0);
}

#[test]
fn test_buffer_pool_page_sized_writes() {
    let (bpm, _temp) = create_bpm(4);

    let mut guard = bpm.new_page().unwrap();
    guard.data_mut()[PAGE_SIZE - 1] = 0xAB;
    let pid = guard.page_id();
    drop(guard);

    bpm.flush_page(pid).unwrap();
    let guard = bpm.fetch_page_read(pid).unwrap();
    assert_eq!(guard.data()[PAGE_SIZE - 1], 0xAB);
}
