//! Discovery of the process's own loaded images, via `/proc/self/maps`.

use std::fs;
use std::ops::Range;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// One loaded executable or shared object mapped into this process.
#[derive(Clone, Debug)]
pub struct File {
    pub name: PathBuf,
    pub range: Range<usize>,
    /// Lowest runtime address at which any segment of this image is
    /// mapped, regardless of permissions. Used to compute `load_offset`
    /// once the image's own declared base (its lowest `PT_LOAD` vaddr) is
    /// known, since the two segments that end up in `range` (the
    /// executable ones) do not themselves have to be the image's first
    /// segment.
    pub image_base: usize,
}

/// Parses the executable text mappings of the calling process from
/// `/proc/self/maps`, merging consecutive `r-xp` mappings of the same
/// backing file into one [`File`] spanning their full range.
///
/// `exclude` is matched against each mapping's path with [`str::contains`]
/// and lets the caller skip its own image and the images of libraries it
/// does not want to attribute samples into (the hardware-counter and
/// disassembler dependencies, typically).
pub fn discover_loaded_files(exclude: &[&str]) -> Result<Vec<File>> {
    let contents =
        fs::read_to_string("/proc/self/maps").map_err(Error::ProcessMapUnreadable)?;

    let mut image_bases: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for line in contents.lines() {
        let Some(mapping) = parse_maps_line(line) else {
            continue;
        };
        let base = image_bases.entry(mapping.path.clone()).or_insert(mapping.range.start);
        *base = (*base).min(mapping.range.start);
    }

    let mut files: Vec<File> = Vec::new();
    for line in contents.lines() {
        let Some(mapping) = parse_maps_line(line) else {
            continue;
        };
        if !mapping.executable {
            continue;
        }
        if exclude.iter().any(|pat| mapping.path.contains(pat)) {
            continue;
        }

        if let Some(last) = files.last_mut() {
            if last.name.as_os_str() == mapping.path.as_str() && last.range.end == mapping.range.start
            {
                last.range.end = mapping.range.end;
                continue;
            }
        }

        files.push(File {
            name: PathBuf::from(&mapping.path),
            range: mapping.range,
            image_base: image_bases.get(&mapping.path).copied().unwrap_or(0),
        });
    }

    Ok(files)
}

struct MapsLine {
    range: Range<usize>,
    executable: bool,
    path: String,
}

fn parse_maps_line(line: &str) -> Option<MapsLine> {
    // Format: "base-limit perms offset dev inode  path"
    let mut fields = line.split_whitespace();
    let range_field = fields.next()?;
    let perms = fields.next()?;
    let _offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next()?;

    if !path.starts_with('/') {
        return None;
    }

    let (base_str, limit_str) = range_field.split_once('-')?;
    let base = usize::from_str_radix(base_str, 16).ok()?;
    let limit = usize::from_str_radix(limit_str, 16).ok()?;

    Some(MapsLine {
        range: base..limit,
        executable: perms.as_bytes().get(2) == Some(&b'x'),
        path: path.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_executable_mapping() {
        let line = "55a1e2400000-55a1e2420000 r-xp 00001000 08:01 131 /usr/bin/cat";
        let m = parse_maps_line(line).unwrap();
        assert!(m.executable);
        assert_eq!(m.range, 0x55a1e2400000..0x55a1e2420000);
        assert_eq!(m.path, "/usr/bin/cat");
    }

    #[test]
    fn ignores_anonymous_and_non_executable_mappings() {
        let anon = "7f0000000000-7f0000021000 rw-p 00000000 00:00 0 ";
        assert!(parse_maps_line(anon).is_none());

        let ro = "55a1e2400000-55a1e2420000 r--p 00001000 08:01 131 /usr/bin/cat";
        assert!(!parse_maps_line(ro).unwrap().executable);
    }
}
