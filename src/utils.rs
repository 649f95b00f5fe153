//! Utility functions: cache key hashing, disk space queries, count formatting

use sha2::{Digest, Sha256};
use std::path::Path;
use url::Url;

/// Stable file-system key for a resource address (hex SHA-256 of the URL)
///
/// ```
/// use media_cache_dl::utils::cache_key;
/// use url::Url;
///
/// let key = cache_key(&Url::parse("https://cdn.example.com/v/1.mp4").unwrap());
/// assert_eq!(key.len(), 64);
/// ```
pub fn cache_key(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    format!("{:x}", digest)
}

/// Short human-readable count: `999`, `1K`, `2M`, `3B`
///
/// Values are truncated, not rounded, to the unit shown.
///
/// ```
/// use media_cache_dl::utils::format_count;
///
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1_500), "1K");
/// assert_eq!(format_count(2_500_000), "2M");
/// ```
pub fn format_count(count: i64) -> String {
    if count < 1_000 {
        format!("{}", count)
    } else if count < 1_000_000 {
        format!("{}K", count / 1_000)
    } else if count < 1_000_000_000 {
        format!("{}M", count / 1_000_000)
    } else {
        format!("{}B", count / 1_000_000_000)
    }
}

/// Free bytes on the filesystem holding `path`, as seen by an unprivileged user
///
/// `statvfs` on Unix, `GetDiskFreeSpaceExW` on Windows. Other platforms
/// report [`std::io::ErrorKind::Unsupported`].
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    free_bytes(path)
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: c_path is NUL-terminated; stat is initialised when statvfs returns 0
    let stat = unsafe {
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        stat.assume_init()
    };

    #[allow(clippy::unnecessary_cast)]
    let (blocks, fragment) = (stat.f_bavail as u64, stat.f_frsize as u64);
    Ok(blocks.saturating_mul(fragment))
}

#[cfg(windows)]
fn free_bytes(path: &Path) -> std::io::Result<u64> {
    use std::os::windows::ffi::OsStrExt;
    use winapi::um::fileapi::GetDiskFreeSpaceExW;

    let wide: Vec<u16> = path.as_os_str().encode_wide().chain([0]).collect();
    let mut available: u64 = 0;

    // SAFETY: wide is NUL-terminated; ULARGE_INTEGER has the layout of a u64;
    // the totals are optional and passed as null
    let ok = unsafe {
        GetDiskFreeSpaceExW(
            wide.as_ptr(),
            (&mut available as *mut u64).cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(available)
}

#[cfg(not(any(unix, windows)))]
fn free_bytes(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "free space query not available on this platform",
    ))
}

/// Available disk space in whole MiB
pub fn get_available_space_mb(path: &Path) -> std::io::Result<u64> {
    Ok(get_available_space(path)? / (1024 * 1024))
}
