//! Static control-flow analysis over a cartridge image.
//!
//! A worklist walk seeded from the program entry, the RST vectors, and the
//! interrupt vectors discovers basic blocks and function entries across ROM
//! banks. Addresses at or above `0x4000` are resolved against the bank the
//! walking path selected; a constant write to the bank-select window that
//! reaches a following call or jump pins the target bank, and non-constant
//! writes fall back to a conservative superset over every bank any path has
//! been observed to select.
//!
//! Dynamic transfers (`JP HL`, `RET`, computed dispatch) contribute no
//! static successors; the runtime interpreter is the correctness mechanism
//! for them, and analysis here is purely an optimization of the common case.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use log::{debug, warn};
use runtime_core::decoder::{self, Flow, Instruction, Op, Reg8};
use runtime_core::Cartridge;

use crate::errors::TranslateError;

/// A bank-qualified address. Addresses below `0x4000` always carry bank 0;
/// banked addresses never carry bank 0.
pub type BankAddr = (u16, u16);

/// The program entry point.
pub const ENTRY_POINT: u16 = 0x0100;

/// All RST vectors, each of which is always a function entry.
pub const RST_VECTORS: [u16; 8] = [0x00, 0x08, 0x10, 0x18, 0x20, 0x28, 0x30, 0x38];

/// All interrupt vectors, each of which is always a function entry.
pub const INTERRUPT_VECTORS: [u16; 5] = [0x40, 0x48, 0x50, 0x58, 0x60];

/// Bank knowledge accumulated while scanning a block for writes into the
/// bank-select window (`0x2000..=0x3FFF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankSelect {
    /// No bank write seen; targets inherit the walking bank.
    Inherit,
    /// A constant reached the select register with no intervening branch.
    Constant(u16),
    /// A non-constant value reached the select register.
    Unknown,
}

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone)]
pub struct Block {
    /// Bank the block was discovered under (0 for the fixed region).
    pub bank: u16,
    /// Entry address.
    pub entry: u16,
    /// Ordered decoded instructions; the last one terminates the block.
    pub instructions: Vec<Instruction>,
    /// Intra-procedural successor block keys.
    pub successors: Vec<BankAddr>,
    /// Function entries discovered at this block's terminator.
    pub entries: Vec<BankAddr>,
    /// Bank knowledge in effect at the terminator.
    pub bank_select: BankSelect,
}

impl Block {
    /// Key of this block in the analysis maps.
    #[must_use]
    pub fn key(&self) -> BankAddr {
        (self.bank, self.entry)
    }

    /// Bank used to fetch bytes at or above `0x4000` for this block.
    #[must_use]
    pub fn fetch_bank(&self) -> u16 {
        self.bank.max(1)
    }

    /// Resolves a static branch target to a bank-qualified key, or `None`
    /// when the bank is not statically known and the dispatcher must decide
    /// at runtime.
    #[must_use]
    pub fn resolve_target(&self, target: u16) -> Option<BankAddr> {
        if target < 0x4000 {
            return Some((0, target));
        }
        match self.bank_select {
            BankSelect::Inherit => Some((self.fetch_bank(), target)),
            BankSelect::Constant(bank) => Some((bank, target)),
            BankSelect::Unknown => None,
        }
    }

    /// Resolves a sequential continuation (fallthrough, call return). These
    /// always stay on the block's own bank.
    #[must_use]
    pub fn resolve_continuation(&self, addr: u16) -> BankAddr {
        if addr < 0x4000 {
            (0, addr)
        } else {
            (self.fetch_bank(), addr)
        }
    }
}

/// A discovered function: an entry plus every block reachable from it
/// without crossing another function entry.
#[derive(Debug, Clone)]
pub struct Function {
    /// Bank of the entry block.
    pub bank: u16,
    /// Entry address.
    pub entry: u16,
    /// Keys of the blocks emitted into this function's body, in address
    /// order. Blocks reachable from several functions appear in each.
    pub blocks: Vec<BankAddr>,
}

impl Function {
    /// Symbolic name used for the emitted native function.
    #[must_use]
    pub fn symbol(&self) -> String {
        format!("func_{:02x}_{:04x}", self.bank, self.entry)
    }
}

/// Analyzer knobs surfaced on the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzerOptions {
    /// Log every analyzed instruction.
    pub trace: bool,
    /// Abort after this many decoded instructions.
    pub limit: Option<usize>,
}

/// Complete reachability output.
#[derive(Debug)]
pub struct Analysis {
    /// Every discovered block, keyed by bank-qualified entry address.
    pub blocks: BTreeMap<BankAddr, Block>,
    /// Every discovered function, keyed by bank-qualified entry address.
    pub functions: BTreeMap<BankAddr, Function>,
    /// Banks any path has been observed to select, plus the reset default.
    pub observed_banks: BTreeSet<u16>,
    /// Total instructions decoded during analysis.
    pub instructions_analyzed: usize,
}

impl Analysis {
    /// Looks up the function that owns an entry key.
    #[must_use]
    pub fn function_at(&self, key: BankAddr) -> Option<&Function> {
        self.functions.get(&key)
    }
}

/// Runs the full reachability analysis.
///
/// # Errors
///
/// Returns [`TranslateError::AnalyzerLimitReached`] when `--limit` is set
/// and exceeded. Undefined opcodes are not errors; they terminate the
/// enclosing block and are reported at warn level.
pub fn analyze(cart: &Cartridge, opts: &AnalyzerOptions) -> Result<Analysis, TranslateError> {
    Analyzer::new(cart, opts).run()
}

struct Analyzer<'a> {
    cart: &'a Cartridge,
    opts: &'a AnalyzerOptions,
    blocks: BTreeMap<BankAddr, Block>,
    /// Maps every decoded instruction address to its owning block entry,
    /// for interior-target block splitting.
    instr_owner: HashMap<BankAddr, BankAddr>,
    /// First function to claim each block, for cross-function split
    /// promotion.
    block_fn: HashMap<BankAddr, BankAddr>,
    functions: BTreeMap<BankAddr, Function>,
    entry_queue: VecDeque<BankAddr>,
    known_entries: HashSet<BankAddr>,
    observed_banks: BTreeSet<u16>,
    instructions_analyzed: usize,
}

impl<'a> Analyzer<'a> {
    fn new(cart: &'a Cartridge, opts: &'a AnalyzerOptions) -> Self {
        let mut analyzer = Self {
            cart,
            opts,
            blocks: BTreeMap::new(),
            instr_owner: HashMap::new(),
            block_fn: HashMap::new(),
            functions: BTreeMap::new(),
            entry_queue: VecDeque::new(),
            known_entries: HashSet::new(),
            observed_banks: BTreeSet::from([1]),
            instructions_analyzed: 0,
        };

        for vector in RST_VECTORS {
            analyzer.enqueue_entry((0, vector));
        }
        for vector in INTERRUPT_VECTORS {
            analyzer.enqueue_entry((0, vector));
        }
        analyzer.enqueue_entry((0, ENTRY_POINT));
        analyzer
    }

    fn run(mut self) -> Result<Analysis, TranslateError> {
        while let Some(entry) = self.entry_queue.pop_front() {
            if self.functions.contains_key(&entry) {
                continue;
            }
            self.walk_function(entry)?;
        }

        Ok(Analysis {
            blocks: self.blocks,
            functions: self.functions,
            observed_banks: self.observed_banks,
            instructions_analyzed: self.instructions_analyzed,
        })
    }

    fn enqueue_entry(&mut self, key: BankAddr) {
        if self.known_entries.insert(key) {
            self.entry_queue.push_back(key);
        }
    }

    /// Collects the intra-procedural closure of one function entry.
    fn walk_function(&mut self, entry: BankAddr) -> Result<(), TranslateError> {
        let mut owned = BTreeSet::new();
        let mut work = vec![entry];
        let mut seen = HashSet::new();

        while let Some(key) = work.pop() {
            if !seen.insert(key) {
                continue;
            }
            // Branches onto another function's entry leave this function
            // through the dispatcher instead of growing the closure.
            if key != entry && self.known_entries.contains(&key) {
                continue;
            }

            self.ensure_block(key, entry)?;
            owned.insert(key);

            let block = &self.blocks[&key];
            let successors = block.successors.clone();
            let entries = block.entries.clone();
            for succ in successors {
                work.push(succ);
            }
            for new_entry in entries {
                self.enqueue_entry(new_entry);
            }
        }

        for key in &owned {
            self.block_fn.entry(*key).or_insert(entry);
        }
        self.functions.insert(
            entry,
            Function {
                bank: entry.0,
                entry: entry.1,
                blocks: owned.into_iter().collect(),
            },
        );
        Ok(())
    }

    /// Decodes the block at `key` if it does not exist yet, splitting an
    /// existing block when `key` lands in its interior.
    fn ensure_block(&mut self, key: BankAddr, current: BankAddr) -> Result<(), TranslateError> {
        if self.blocks.contains_key(&key) {
            return Ok(());
        }
        if let Some(owner) = self.instr_owner.get(&key).copied() {
            self.split_block(owner, key, current);
            return Ok(());
        }
        self.decode_block(key)
    }

    fn decode_block(&mut self, key: BankAddr) -> Result<(), TranslateError> {
        let (bank, entry) = key;
        let fetch_bank = bank.max(1);
        let mut instructions = Vec::new();
        let mut fallthrough_into = None;
        let mut cursor = entry;

        loop {
            if let Some(limit) = self.opts.limit {
                if self.instructions_analyzed >= limit {
                    return Err(TranslateError::AnalyzerLimitReached { limit });
                }
            }

            let instr = decoder::decode(
                |addr| {
                    let fetch = if addr < 0x4000 { 0 } else { fetch_bank };
                    self.cart.read_banked(fetch, addr)
                },
                cursor,
            );
            self.instructions_analyzed += 1;

            if self.opts.trace {
                debug!("{bank:02x}:{cursor:04x}: {}", instr.op);
            }
            if let Op::Invalid(opcode) = instr.op {
                warn!("undefined opcode {opcode:#04x} at {bank:02x}:{cursor:04x}; block ends");
            }

            let ikey = self.normalize(bank, cursor);
            self.instr_owner.entry(ikey).or_insert(key);
            instructions.push(instr);

            if instr.flow.terminates_block() {
                break;
            }

            let next = instr.next_addr();
            let nkey = self.normalize(bank, next);
            if self.blocks.contains_key(&nkey) || self.known_entries.contains(&nkey) {
                fallthrough_into = Some(nkey);
                break;
            }
            cursor = next;
        }

        let block = self.finalize_block(bank, entry, instructions, fallthrough_into);
        self.blocks.insert(key, block);
        Ok(())
    }

    /// Splits the block owning `at` so that `at` becomes a block entry of
    /// its own. The head keeps the leading instructions and falls through
    /// into the tail; the tail inherits the terminator, the successor set,
    /// and the discovered entries.
    fn split_block(&mut self, owner: BankAddr, at: BankAddr, current: BankAddr) {
        // A split inside a block some earlier function already emitted
        // label-locally leaves that function exiting to `at` through the
        // dispatcher, so `at` must become dispatchable.
        if self
            .block_fn
            .get(&owner)
            .is_some_and(|claimed| *claimed != current)
        {
            self.enqueue_entry(at);
        }

        let Some(original) = self.blocks.remove(&owner) else {
            return;
        };
        let Some(index) = original
            .instructions
            .iter()
            .position(|instr| self.normalize(original.bank, instr.addr) == at)
        else {
            // Interior address points between instruction boundaries;
            // leave the original block alone and let a fresh decode
            // produce the overlapping stream.
            self.blocks.insert(owner, original);
            return;
        };

        let bank = original.bank;
        let mut head_instructions = original.instructions;
        let tail_instructions = head_instructions.split_off(index);
        for instr in &tail_instructions {
            let ikey = self.normalize(bank, instr.addr);
            self.instr_owner.insert(ikey, at);
        }

        let mut tail =
            self.finalize_block_with_successors(bank, at.1, tail_instructions, original.successors);
        tail.entries = original.entries;
        let head =
            self.finalize_block_with_successors(bank, original.entry, head_instructions, vec![at]);

        self.blocks.insert(owner, head);
        self.blocks.insert(at, tail);
    }

    fn normalize(&self, bank: u16, addr: u16) -> BankAddr {
        if addr < 0x4000 {
            (0, addr)
        } else {
            (bank.max(1), addr)
        }
    }

    /// Computes bank-select knowledge and the successor/entry sets for a
    /// finished instruction list.
    fn finalize_block(
        &mut self,
        bank: u16,
        entry: u16,
        instructions: Vec<Instruction>,
        fallthrough_into: Option<BankAddr>,
    ) -> Block {
        let bank_select = scan_bank_select(&instructions);
        if let BankSelect::Constant(selected) = bank_select {
            self.observed_banks.insert(selected);
        }

        let mut block = Block {
            bank,
            entry,
            instructions,
            successors: Vec::new(),
            entries: Vec::new(),
            bank_select,
        };

        if let Some(target) = fallthrough_into {
            block.successors.push(target);
            return block;
        }

        let Some(last) = block.instructions.last().copied() else {
            return block;
        };

        match last.flow {
            Flow::Fallthrough => {}
            Flow::Jump(target) => self.add_branch_target(&mut block, target),
            Flow::CondJump { taken, fall } => {
                self.add_branch_target(&mut block, taken);
                let cont = block.resolve_continuation(fall);
                block.successors.push(cont);
            }
            Flow::Call { target, ret } | Flow::CondCall { target, ret } => {
                self.add_call_target(&mut block, target);
                let cont = block.resolve_continuation(ret);
                block.successors.push(cont);
            }
            Flow::Rst { vector, ret } => {
                block.entries.push((0, vector));
                let cont = block.resolve_continuation(ret);
                block.successors.push(cont);
            }
            Flow::CondRet { fall } => {
                let cont = block.resolve_continuation(fall);
                block.successors.push(cont);
            }
            Flow::Halt => {
                let cont = block.resolve_continuation(last.next_addr());
                block.successors.push(cont);
            }
            Flow::DynamicJump | Flow::Ret | Flow::Stop | Flow::Invalid => {}
        }

        block
    }

    fn finalize_block_with_successors(
        &mut self,
        bank: u16,
        entry: u16,
        instructions: Vec<Instruction>,
        successors: Vec<BankAddr>,
    ) -> Block {
        let bank_select = scan_bank_select(&instructions);
        Block {
            bank,
            entry,
            instructions,
            successors,
            entries: Vec::new(),
            bank_select,
        }
    }

    /// Adds a jump target: statically resolvable banks stay in the closure;
    /// an unknown bank promotes the target to a function entry under every
    /// observed bank so the dispatcher can route it at runtime.
    fn add_branch_target(&self, block: &mut Block, target: u16) {
        match block.resolve_target(target) {
            Some(key) => block.successors.push(key),
            None => {
                for &bank in &self.observed_banks {
                    block.entries.push((bank, target));
                }
            }
        }
    }

    /// Adds a call target as a function entry; cross-bank calls always
    /// generate one per candidate bank.
    fn add_call_target(&self, block: &mut Block, target: u16) {
        match block.resolve_target(target) {
            Some(key) => block.entries.push(key),
            None => {
                for &bank in &self.observed_banks {
                    block.entries.push((bank, target));
                }
            }
        }
    }
}

/// Scans a block for the pattern `LD A, n` reaching a store into the
/// bank-select window with no intervening clobber of A. Zero constants are
/// promoted to one, matching the bank register's semantics.
fn scan_bank_select(instructions: &[Instruction]) -> BankSelect {
    let mut last_a: Option<u8> = None;
    let mut select = BankSelect::Inherit;

    for instr in instructions {
        match instr.op {
            Op::LdRImm(Reg8::A, value) => last_a = Some(value),
            Op::LdMemImmA(target) if (0x2000..=0x3FFF).contains(&target) => {
                select = match last_a {
                    Some(value) => BankSelect::Constant(u16::from(value).max(1)),
                    None => BankSelect::Unknown,
                };
            }
            ref op if writes_accumulator(op) => last_a = None,
            _ => {}
        }
    }

    select
}

/// Whether an operation overwrites A, invalidating constant tracking.
fn writes_accumulator(op: &Op) -> bool {
    use runtime_core::decoder::{AluOp, Target8};
    match op {
        Op::LdRR(Reg8::A, _)
        | Op::LdRImm(Reg8::A, _)
        | Op::LdRMemHl(Reg8::A)
        | Op::LdAMemBc
        | Op::LdAMemDe
        | Op::LdAMemImm(_)
        | Op::LdhAImm(_)
        | Op::LdhAC
        | Op::LdAMemHlInc
        | Op::LdAMemHlDec
        | Op::IncR(Reg8::A)
        | Op::DecR(Reg8::A)
        | Op::Daa
        | Op::Cpl
        | Op::Rlca
        | Op::Rla
        | Op::Rrca
        | Op::Rra
        | Op::Pop(runtime_core::decoder::Reg16::AF)
        | Op::Rot(_, Target8::Reg(Reg8::A))
        | Op::Res(_, Target8::Reg(Reg8::A))
        | Op::Set(_, Target8::Reg(Reg8::A)) => true,
        Op::Alu(alu_op, _) => *alu_op != AluOp::Cp,
        _ => false,
    }
}
