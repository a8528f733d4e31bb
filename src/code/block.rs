//! Lazy basic-block discovery by forward disassembly from a function's entry
//! points.

use std::collections::BTreeSet;
use std::ops::Range;

use iced_x86::{Decoder, DecoderOptions, FlowControl};

use crate::sample::Kind;

/// A maximal straight-line instruction sequence inside one function.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub range: Range<usize>,
    pub entry: bool,
    pub length: usize,
    pub cycle_samples: u64,
    pub inst_samples: u64,
}

impl BasicBlock {
    pub fn record_sample(&mut self, kind: Kind) {
        match kind {
            Kind::Cycle => self.cycle_samples += 1,
            Kind::Instruction => self.inst_samples += 1,
        }
    }
}

/// Partitions `code[..]` (the bytes of the function, mapped at `base`) into
/// basic blocks by a forward work-list walk starting at `base`.
///
/// Indirect and otherwise statically-unresolvable branches are logged and
/// ignored: the walk simply does not follow that edge, which can merge
/// unreachable code into its textual predecessor block but never produces an
/// unsound (overlapping) partition, since every block boundary still comes
/// from a statically discovered entry address.
pub fn discover(code: &[u8], base: usize) -> Vec<BasicBlock> {
    let limit = base + code.len();

    let mut worklist = vec![base];
    let mut entries: BTreeSet<usize> = BTreeSet::new();

    while let Some(p) = worklist.pop() {
        if p < base || p >= limit || entries.contains(&p) {
            continue;
        }
        entries.insert(p);

        let offset = p - base;
        let mut decoder = Decoder::with_ip(
            64,
            &code[offset..],
            p as u64,
            DecoderOptions::NONE,
        );

        while decoder.can_decode() {
            let insn = decoder.decode();
            let falls_through = matches!(
                insn.flow_control(),
                FlowControl::Next | FlowControl::Call | FlowControl::ConditionalBranch
            );

            match insn.flow_control() {
                FlowControl::ConditionalBranch | FlowControl::UnconditionalBranch => {
                    let target = insn.near_branch_target() as usize;
                    if target >= base && target < limit {
                        worklist.push(target);
                    } else {
                        log::debug!(
                            "block discovery: branch target {:#x} outside function range {:#x}-{:#x}",
                            target,
                            base,
                            limit
                        );
                    }
                }
                FlowControl::IndirectBranch | FlowControl::IndirectCall => {
                    log::debug!(
                        "block discovery: dynamic branch at {:#x}, not following",
                        insn.ip()
                    );
                }
                _ => {}
            }

            if !falls_through {
                break;
            }
        }
    }

    let mut bounds: Vec<usize> = entries.into_iter().collect();
    bounds.push(limit);

    let mut blocks = Vec::with_capacity(bounds.len().saturating_sub(1));
    for (i, window) in bounds.windows(2).enumerate() {
        let (start, end) = (window[0], window[1]);
        let length = instruction_count(&code[start - base..end - base], start);
        blocks.push(BasicBlock {
            range: start..end,
            entry: i == 0,
            length,
            cycle_samples: 0,
            inst_samples: 0,
        });
    }
    blocks
}

/// Second, independent decode pass: counts instructions in a known block
/// range. Kept separate from [`discover`]'s walk so each loop stays simple
/// and separately testable.
fn instruction_count(code: &[u8], base: usize) -> usize {
    let mut decoder = Decoder::with_ip(64, code, base as u64, DecoderOptions::NONE);
    let mut count = 0;
    while decoder.can_decode() {
        decoder.decode();
        count += 1;
    }
    count
}
