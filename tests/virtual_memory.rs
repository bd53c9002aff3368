//! Integration tests for the virtual memory engine.
//!
//! These exercise full reserve/commit/decommit/release cycles against real kernel mappings,
//! including the zero-fill guarantee for recommitted pages and page-state reporting.

use std::{ptr, sync::Arc, thread};

use dotpal::{memory::page_size, prelude::*};

fn engine() -> VirtualMemory {
    VirtualMemory::default()
}

/// Reserve 1 MiB, commit the first 4 KiB, write, decommit, recommit: the bytes read zero.
#[test]
fn recommitted_pages_are_zero_filled() -> Result<()> {
    let vm = engine();
    let base = vm.alloc(
        ptr::null_mut(),
        1 << 20,
        AllocationType::RESERVE,
        Protection::NoAccess,
    )?;

    let page = vm.alloc(
        base.as_ptr(),
        0x1000,
        AllocationType::COMMIT,
        Protection::ReadWrite,
    )?;
    unsafe { ptr::write_bytes(page.as_ptr(), 0x5A, 0x1000) };

    vm.free(page.as_ptr(), 0x1000, FreeType::DECOMMIT)?;
    let page = vm.alloc(
        base.as_ptr(),
        0x1000,
        AllocationType::COMMIT,
        Protection::ReadWrite,
    )?;

    let bytes = unsafe { std::slice::from_raw_parts(page.as_ptr(), 0x1000) };
    assert!(bytes.iter().all(|&b| b == 0));

    vm.free(base.as_ptr(), 0, FreeType::RELEASE)?;
    Ok(())
}

#[test]
fn hinted_reservation_is_aligned_to_granularity() -> Result<()> {
    let vm = engine();
    let granularity = vm.allocation_granularity();

    // Other tests map concurrently and may take the scouted hole; retry a few times.
    for _ in 0..8 {
        let scout = vm.alloc(
            ptr::null_mut(),
            granularity * 4,
            AllocationType::RESERVE,
            Protection::NoAccess,
        )?;
        let aligned = (scout.as_ptr() as usize + granularity - 1) & !(granularity - 1);
        vm.free(scout.as_ptr(), 0, FreeType::RELEASE)?;

        let hint = (aligned + 0x1234) as *mut u8;
        let base = match vm.alloc(hint, 0x100, AllocationType::RESERVE, Protection::NoAccess) {
            Ok(base) => base,
            Err(Error::InvalidAddress { .. }) => continue,
            Err(error) => return Err(error),
        };
        assert_eq!(base.as_ptr() as usize, aligned);

        let info = vm.query(hint);
        assert_eq!(info.allocation_base, aligned);
        assert_eq!(info.state, MemoryState::Reserve);

        vm.free(base.as_ptr(), 0, FreeType::RELEASE)?;
        return Ok(());
    }
    panic!("no free aligned range could be reserved");
}

#[test]
fn hinted_reserve_commit_returns_releasable_base() -> Result<()> {
    let vm = engine();
    let granularity = vm.allocation_granularity();
    let flags = AllocationType::RESERVE | AllocationType::COMMIT;

    for _ in 0..8 {
        let scout = vm.alloc(
            ptr::null_mut(),
            granularity * 4,
            AllocationType::RESERVE,
            Protection::NoAccess,
        )?;
        let aligned = (scout.as_ptr() as usize + granularity - 1) & !(granularity - 1);
        vm.free(scout.as_ptr(), 0, FreeType::RELEASE)?;

        let hint = (aligned + 0x3000) as *mut u8;
        let base = match vm.alloc(hint, 0x1000, flags, Protection::ReadWrite) {
            Ok(base) => base,
            Err(Error::InvalidAddress { .. }) => continue,
            Err(error) => return Err(error),
        };
        assert_eq!(base.as_ptr() as usize, aligned);
        assert_eq!(base.as_ptr() as usize % granularity, 0);
        assert_eq!(vm.allocation_type(base.as_ptr()), Some(flags));

        // Everything from the base through the end of the hinted range is committed.
        unsafe { hint.add(0xFFF).write(1) };
        let info = vm.query(base.as_ptr());
        assert_eq!(info.state, MemoryState::Commit);
        assert_eq!(info.region_size, 0x4000_usize.next_multiple_of(page_size()));

        vm.free(base.as_ptr(), 0, FreeType::RELEASE)?;
        assert_eq!(vm.region_count(), 0);
        assert_eq!(vm.allocation_type(base.as_ptr()), None);
        return Ok(());
    }
    panic!("no free aligned range could be reserved");
}

#[test]
fn hint_inside_existing_reservation_is_rejected() -> Result<()> {
    let vm = engine();
    let granularity = vm.allocation_granularity();
    let base = vm.alloc(
        ptr::null_mut(),
        granularity * 2,
        AllocationType::RESERVE,
        Protection::NoAccess,
    )?;
    let inside = (base.as_ptr() as usize + granularity - 1) & !(granularity - 1);

    let result = vm.alloc(
        inside as *mut u8,
        0x1000,
        AllocationType::RESERVE,
        Protection::NoAccess,
    );
    assert!(matches!(result, Err(Error::InvalidAddress { .. })));
    assert_eq!(vm.region_count(), 1);
    Ok(())
}

#[test]
fn release_of_sub_range_fails() -> Result<()> {
    let vm = engine();
    let base = vm.alloc(
        ptr::null_mut(),
        page_size() * 4,
        AllocationType::RESERVE | AllocationType::COMMIT,
        Protection::ReadWrite,
    )?;

    let inner = unsafe { base.as_ptr().add(page_size()) };
    let error = vm.free(inner, 0, FreeType::RELEASE).unwrap_err();
    assert_eq!(error.code(), ErrorCode::INVALID_ADDRESS);

    vm.free(base.as_ptr(), 0, FreeType::RELEASE)?;
    assert_eq!(vm.query(base.as_ptr()).state, MemoryState::Free);
    Ok(())
}

#[test]
fn decommit_with_zero_size_fails() -> Result<()> {
    let vm = engine();
    let base = vm.alloc(
        ptr::null_mut(),
        page_size(),
        AllocationType::COMMIT,
        Protection::ReadWrite,
    )?;
    let error = vm.free(base.as_ptr(), 0, FreeType::DECOMMIT).unwrap_err();
    assert_eq!(error.code(), ErrorCode::INVALID_PARAMETER);
    Ok(())
}

#[test]
fn protect_on_reserved_pages_fails() -> Result<()> {
    let vm = engine();
    let base = vm.alloc(
        ptr::null_mut(),
        page_size(),
        AllocationType::RESERVE,
        Protection::NoAccess,
    )?;
    let error = vm
        .protect(base.as_ptr(), page_size(), Protection::ReadWrite)
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::INVALID_ADDRESS);
    Ok(())
}

#[test]
fn protection_changes_are_reported_by_query() -> Result<()> {
    let vm = engine();
    let page = page_size();
    let base = vm.alloc(
        ptr::null_mut(),
        page * 3,
        AllocationType::RESERVE | AllocationType::COMMIT,
        Protection::ReadWrite,
    )?;
    let middle = unsafe { base.as_ptr().add(page) };

    let previous = vm.protect(middle, page, Protection::ReadOnly)?;
    assert_eq!(previous, Protection::ReadWrite);

    let head = vm.query(base.as_ptr());
    assert_eq!(head.region_size, page);
    assert_eq!(head.protect, Some(Protection::ReadWrite));
    assert_eq!(head.allocation_protect, Some(Protection::ReadWrite));

    let mid = vm.query(middle);
    assert_eq!(mid.region_size, page);
    assert_eq!(mid.protect, Some(Protection::ReadOnly));

    unsafe { assert_eq!(middle.read(), 0) };
    Ok(())
}

#[test]
fn untracked_addresses() {
    let vm = engine();
    let mut local = 0u8;
    let address: *mut u8 = &mut local;

    assert!(matches!(
        vm.free(address, 0, FreeType::RELEASE),
        Err(Error::InvalidAddress { .. })
    ));
    assert!(matches!(
        vm.free(address, 1, FreeType::DECOMMIT),
        Err(Error::InvalidAddress { .. })
    ));
    assert!(matches!(
        vm.protect(address, 1, Protection::ReadOnly),
        Err(Error::InvalidAddress { .. })
    ));
    assert_eq!(vm.query(address).state, MemoryState::Free);
}

#[test]
fn concurrent_reservations_never_overlap() {
    let vm = Arc::new(engine());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let vm = Arc::clone(&vm);
            thread::spawn(move || {
                (0..16)
                    .map(|_| {
                        vm.alloc(
                            ptr::null_mut(),
                            0x10000,
                            AllocationType::RESERVE | AllocationType::COMMIT,
                            Protection::ReadWrite,
                        )
                        .unwrap()
                        .as_ptr() as usize
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut bases: Vec<usize> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    bases.sort_unstable();
    for pair in bases.windows(2) {
        assert!(pair[0] + 0x10000 <= pair[1]);
    }
    assert_eq!(vm.region_count(), 128);
}
