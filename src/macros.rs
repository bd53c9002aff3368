#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut regions = lock!(self.regions);
///  regions.insert(base, region);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro that runs a fallible expression and records a failure into the calling thread's
/// error state before handing back the sentinel.
///
/// ```rust, ignore
///  let ptr = sentinel!(pal.heap().alloc(flags, size), std::ptr::null_mut(), |p| p.as_ptr());
/// ```
macro_rules! sentinel {
    ($result:expr, $failure:expr, $map:expr) => {
        match $result {
            Ok(value) => $map(value),
            Err(error) => {
                log::debug!("{} failed: {}", function_name!(), error);
                error.record();
                $failure
            }
        }
    };
}

/// Expands to the name of the enclosing function.
///
/// ```rust, ignore
///  fn virtual_alloc() { assert!(function_name!().ends_with("virtual_alloc")); }
/// ```
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        name.strip_suffix("::f").unwrap_or(name)
    }};
}
