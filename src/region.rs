//! Executable code-region discovery.
//!
//! Returns the extent of the process's own text section. Three host
//! environments are supported, selected at build time: link-time bracket
//! symbols (`linker-region` feature), Mach-O segment introspection
//! (macOS), and memory-map parsing (Linux). Anywhere else the region is
//! reported unavailable and the caller degrades.
//!
//! Discovery is pure: it mutates no monitor state and is safe to call
//! repeatedly during integrity checks.

#[cfg(all(target_os = "linux", not(feature = "linker-region")))]
use std::io::BufRead;

/// The in-memory extent of the executable text section.
pub(crate) struct TextRegion {
    pub(crate) start: *const u8,
    pub(crate) len: usize,
}

/// Memory-map lines scanned before giving up. Keeps the parse bounded on
/// processes with pathological numbers of mappings.
#[cfg(all(target_os = "linux", not(feature = "linker-region")))]
const MAX_MAP_LINES: usize = 4096;

/// Locate the executable region, or `None` when this environment cannot
/// provide one.
pub(crate) fn locate() -> Option<TextRegion> {
    locate_impl()
}

/// Link-time bracket symbols. `__executable_start` and `etext` delimit
/// the text output section on GNU-style link steps.
#[cfg(feature = "linker-region")]
fn locate_impl() -> Option<TextRegion> {
    unsafe extern "C" {
        static __executable_start: u8;
        static etext: u8;
    }
    // SAFETY: only the addresses of the bracket symbols are taken; the
    // bytes behind them are never read here.
    let start = unsafe { &raw const __executable_start };
    let end = unsafe { &raw const etext };
    let len = (end as usize).checked_sub(start as usize)?;
    if len == 0 {
        return None;
    }
    Some(TextRegion { start, len })
}

/// Memory-map parsing: first mapping that is readable and executable.
#[cfg(all(target_os = "linux", not(feature = "linker-region")))]
fn locate_impl() -> Option<TextRegion> {
    let path = crate::config::config()
        .maps_path
        .as_deref()
        .unwrap_or(std::path::Path::new("/proc/self/maps"));
    let file = std::fs::File::open(path).ok()?;
    first_executable_region(std::io::BufReader::new(file))
}

/// Scan memory-map lines for the first executable region. Malformed
/// lines are skipped; the scan is bounded by [`MAX_MAP_LINES`].
#[cfg(all(target_os = "linux", not(feature = "linker-region")))]
fn first_executable_region(reader: impl BufRead) -> Option<TextRegion> {
    reader
        .lines()
        .map_while(Result::ok)
        .take(MAX_MAP_LINES)
        .find_map(|line| parse_map_line(&line))
}

/// Parse one `start-end perms ...` line, returning the region when its
/// permissions start with the readable bit and include the execute bit.
#[cfg(all(target_os = "linux", not(feature = "linker-region")))]
fn parse_map_line(line: &str) -> Option<TextRegion> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?.as_bytes();

    // Permissions look like "r-xp": readable first, execute third.
    if perms.len() < 3 || perms[0] != b'r' || perms[2] != b'x' {
        return None;
    }

    let (lo, hi) = range.split_once('-')?;
    let start = usize::from_str_radix(lo, 16).ok()?;
    let end = usize::from_str_radix(hi, 16).ok()?;
    let len = end.checked_sub(start)?;
    if len == 0 {
        return None;
    }
    Some(TextRegion {
        start: start as *const u8,
        len,
    })
}

/// Mach-O segment introspection: ask the first loaded image for its
/// `__TEXT,__text` section.
#[cfg(all(target_os = "macos", not(feature = "linker-region")))]
fn locate_impl() -> Option<TextRegion> {
    #[repr(C)]
    struct MachHeader64 {
        magic: u32,
        cputype: i32,
        cpusubtype: i32,
        filetype: u32,
        ncmds: u32,
        sizeofcmds: u32,
        flags: u32,
        reserved: u32,
    }

    unsafe extern "C" {
        static _mh_execute_header: MachHeader64;
        fn getsectiondata(
            mhp: *const MachHeader64,
            segname: *const libc::c_char,
            sectname: *const libc::c_char,
            size: *mut libc::c_ulong,
        ) -> *mut u8;
    }

    let mut size: libc::c_ulong = 0;
    // SAFETY: the main-image header symbol is provided by the macOS
    // linker, and `size` is a valid out-pointer.
    let ptr = unsafe {
        getsectiondata(
            &raw const _mh_execute_header,
            c"__TEXT".as_ptr(),
            c"__text".as_ptr(),
            &mut size,
        )
    };
    if ptr.is_null() || size == 0 {
        return None;
    }
    Some(TextRegion {
        start: ptr as *const u8,
        len: size as usize,
    })
}

/// No discovery mechanism on this target.
#[cfg(not(any(
    feature = "linker-region",
    target_os = "linux",
    target_os = "macos"
)))]
fn locate_impl() -> Option<TextRegion> {
    None
}
