//! Address resolution: block -> function -> file -> orphan, as described for
//! component C1. Block discovery (C2) is triggered lazily from here the
//! first time a sample lands in an unprocessed function.

use std::collections::BTreeMap;

use super::block::{self, BasicBlock};
use super::file::{self, File};
use super::function::{self, Function};
use super::interval::Interval;
use crate::error::{Error, Result};

/// What a sampled address resolved to. Exactly one of these is returned by
/// [`CodeMap::resolve`]; the caller picks which counter to bump.
pub enum Resolution<'a> {
    Block {
        function_index: usize,
        block_index: usize,
        block: &'a mut BasicBlock,
    },
    /// Hit a known function whose blocks have not been discovered yet. Call
    /// [`CodeMap::ensure_processed`] and resolve again.
    UnprocessedFunction { function_index: usize },
    File,
    Orphan,
}

/// The process-wide code map: one disjoint interval map per granularity.
///
/// Mutated only from the profiler thread, after the one-time write during
/// initialization; this single-writer discipline is a documented invariant,
/// not one enforced by the type system (matching the reference runtime).
pub struct CodeMap {
    files: BTreeMap<Interval, usize>,
    file_storage: Vec<File>,
    functions: BTreeMap<Interval, usize>,
    function_storage: Vec<Function>,
    function_file: Vec<usize>,
    function_code: Vec<Option<Vec<u8>>>,
    blocks: BTreeMap<Interval, (usize, usize)>,
    pub orphan_samples: u64,
}

impl CodeMap {
    /// Builds the map from the process's own loaded images, excluding any
    /// path containing one of `exclude`.
    pub fn discover(exclude: &[&str]) -> Result<CodeMap> {
        let loaded = file::discover_loaded_files(exclude)?;

        let mut files = BTreeMap::new();
        let mut file_storage = Vec::new();
        let mut functions = BTreeMap::new();
        let mut function_storage = Vec::new();
        let mut function_file = Vec::new();
        let mut function_code = Vec::new();

        for f in loaded {
            let functions_in_file = match function::discover_functions(&f) {
                Ok(fns) => fns,
                Err(e) => {
                    log::warn!("skipping {:?}: {}", f.name, e);
                    continue;
                }
            };

            let file_interval = Interval::new(f.range.clone());
            if let Some(&existing) = files.get(&file_interval) {
                return Err(Error::OverlappingRanges {
                    a: file_storage[existing].range.clone(),
                    b: f.range.clone(),
                });
            }

            let file_index = file_storage.len();
            files.insert(file_interval, file_index);
            file_storage.push(f);

            for func in functions_in_file {
                if func.range.start >= func.range.end {
                    continue;
                }
                let function_interval = Interval::new(func.range.clone());
                if let Some(&existing) = functions.get(&function_interval) {
                    return Err(Error::OverlappingRanges {
                        a: function_storage[existing].range.clone(),
                        b: func.range.clone(),
                    });
                }

                let function_index = function_storage.len();
                functions.insert(function_interval, function_index);
                function_storage.push(func);
                function_file.push(file_index);
                function_code.push(None);
            }
        }

        Ok(CodeMap {
            files,
            file_storage,
            functions,
            function_storage,
            function_file,
            function_code,
            blocks: BTreeMap::new(),
            orphan_samples: 0,
        })
    }

    /// Supplies the raw bytes backing a function's address range, read once
    /// by the caller (typically by re-reading the owning file's mapping).
    /// Required before [`ensure_processed`](Self::ensure_processed) can run
    /// block discovery for that function.
    pub fn set_function_code(&mut self, function_index: usize, code: Vec<u8>) {
        self.function_code[function_index] = Some(code);
    }

    pub fn resolve(&mut self, address: usize) -> Resolution<'_> {
        let point = Interval::at(address);

        if let Some(&(function_index, block_index)) = self.blocks.get(&point) {
            let blocks = self.function_storage[function_index]
                .blocks
                .as_mut()
                .expect("block map entry implies the function is processed");
            return Resolution::Block {
                function_index,
                block_index,
                block: &mut blocks[block_index],
            };
        }

        if let Some(&function_index) = self.functions.get(&point) {
            if !self.function_storage[function_index].is_processed() {
                return Resolution::UnprocessedFunction { function_index };
            }
            // Processed but the point query missed every block: should not
            // happen since blocks partition the whole range, but degrade to
            // the orphan sink rather than panic.
            self.orphan_samples += 1;
            return Resolution::Orphan;
        }

        if self.files.get(&point).is_some() {
            return Resolution::File;
        }

        self.orphan_samples += 1;
        Resolution::Orphan
    }

    /// Runs basic-block discovery for a function previously reported as
    /// [`Resolution::UnprocessedFunction`]. Must be called from the
    /// profiler thread, never from signal context: disassembly allocates.
    pub fn ensure_processed(&mut self, function_index: usize) {
        if self.function_storage[function_index].is_processed() {
            return;
        }
        let Some(code) = self.function_code[function_index].take() else {
            log::warn!(
                "cannot discover blocks for {:?}: no code bytes supplied",
                self.function_storage[function_index].name
            );
            return;
        };

        let base = self.function_storage[function_index].range.start;
        let discovered = block::discover(&code, base);

        for (block_index, b) in discovered.iter().enumerate() {
            self.blocks
                .insert(Interval::new(b.range.clone()), (function_index, block_index));
        }
        self.function_storage[function_index].blocks = Some(discovered);
    }

    pub fn function(&self, index: usize) -> &Function {
        &self.function_storage[index]
    }

    /// The file that owns the given function, by index.
    pub fn file_for_function(&self, function_index: usize) -> &File {
        &self.file_storage[self.function_file[function_index]]
    }

    pub fn file(&self, index: usize) -> &File {
        &self.file_storage[index]
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.function_storage.iter()
    }

    /// Pairs each function with the file that owns it, for reporting.
    pub fn functions_with_file(&self) -> impl Iterator<Item = (&Function, &File)> {
        self.function_storage
            .iter()
            .zip(self.function_file.iter().map(|&i| &self.file_storage[i]))
    }
}
