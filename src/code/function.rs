//! Function discovery from a loaded image's symbol table.

use std::ops::Range;

use object::{Object, ObjectKind, ObjectSegment, ObjectSymbol, SymbolKind};

use super::block::BasicBlock;
use super::file::File;
use crate::error::{Error, Result};

/// One function found in a loaded image's symbol table.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// Runtime address range, already shifted by `load_offset`.
    pub range: Range<usize>,
    /// The shift applied to the symbol table's declared range to get
    /// `range`. Zero for non-position-independent images. Kept around
    /// (rather than discarded once applied) purely for introspection —
    /// `dump` mode reports it alongside each function.
    pub load_offset: usize,
    /// `None` until the first sample inside this function triggers block
    /// discovery; `Some` thereafter, and immutable from that point on.
    pub blocks: Option<Vec<BasicBlock>>,
}

impl Function {
    pub fn is_processed(&self) -> bool {
        self.blocks.is_some()
    }
}

/// Reads the symbol table of `file` (backed by the file at `file.name`) and
/// returns every `STT_FUNC` symbol with a nonzero size, its address shifted
/// by `file.load_offset`.
///
/// Returns [`Error::SymbolTableUnreadable`] rather than panicking: callers
/// are expected to log and skip the file, attributing its samples to the
/// orphan sink, rather than abort the whole profiler over one unreadable
/// image.
pub fn discover_functions(file: &File) -> Result<Vec<Function>> {
    let data = std::fs::read(&file.name).map_err(|e| Error::SymbolTableUnreadable {
        path: file.name.clone(),
        source: object::Error::from(std::io::Error::new(e.kind(), e.to_string())),
    })?;

    let obj = object::File::parse(&*data).map_err(|source| Error::SymbolTableUnreadable {
        path: file.name.clone(),
        source,
    })?;

    // Position-independent images (ET_DYN: PIE executables and shared
    // objects) declare symbol addresses relative to a base of 0 (or
    // whatever the lowest `PT_LOAD` segment's vaddr is); the loader picks
    // the actual runtime base. Non-PIE executables (ET_EXEC) declare
    // absolute addresses that already match where they run, so no shift
    // is needed. Record the offset at discovery time, not at lookup.
    let load_offset = if obj.kind() == ObjectKind::Dynamic {
        let lowest_vaddr = obj
            .segments()
            .map(|seg| seg.address())
            .min()
            .unwrap_or(0) as usize;
        file.image_base.wrapping_sub(lowest_vaddr)
    } else {
        0
    };

    let mut functions = Vec::new();
    for sym in obj.symbols() {
        if sym.kind() != SymbolKind::Text {
            continue;
        }
        if sym.size() == 0 {
            continue;
        }
        let Ok(name) = sym.name() else { continue };
        if name.is_empty() {
            continue;
        }

        let base = sym.address() as usize + load_offset;
        let limit = base + sym.size() as usize;
        functions.push(Function {
            name: name.to_string(),
            range: base..limit,
            load_offset,
            blocks: None,
        });
    }

    Ok(functions)
}

#[cfg(test)]
mod test;
