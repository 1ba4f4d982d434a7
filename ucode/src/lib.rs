extern crate strum;

use std::cmp::Ordering;

use strum::IntoEnumIterator;
use tracing::{debug, info, trace};

use common::*;

mod error;
pub mod render;

pub use error::UcodeError;

pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 0;
pub const PATCH_VERSION: u8 = 0;

/// Steps 1..=7 hold the user steps followed by the mandatory sequencer reset.
pub const MAX_MICROPROGRAM_STEPS: usize = STEP_COUNT - 2;

/// Words occupied by one opcode across every step and flag combination.
pub const SLOT_WORDS: usize = STEP_COUNT * FLAG_COMBINATIONS;

/// The control words an instruction runs after the fetch step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Microprogram {
    steps: Vec<ControlWord>,
}

impl Microprogram {
    pub fn new(steps: Vec<ControlWord>) -> Result<Microprogram, UcodeError> {
        if steps.len() > MAX_MICROPROGRAM_STEPS {
            return Err(UcodeError::MicroprogramTooLong(steps.len()));
        }
        Ok(Microprogram { steps })
    }

    pub fn steps(&self) -> &[ControlWord] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Expands the program into the eight words of one (opcode, flags) slot:
    /// fetch, the user steps, one sequencer reset, then NOP padding.
    pub fn slot(&self) -> [ControlWord; STEP_COUNT] {
        let mut slot = [ControlWord::NOP; STEP_COUNT];
        slot[0] = ControlWord::FETCH;

        for (step, word) in slot.iter_mut().enumerate().skip(1) {
            *word = match (self.steps.len() + 1).cmp(&step) {
                Ordering::Greater => self.steps[step - 1],
                Ordering::Equal => ControlWord::SEQUENCER_RESET,
                // never reached, the sequencer has already reset
                Ordering::Less => ControlWord::NOP,
            };
        }

        slot
    }
}

impl TryFrom<Vec<ControlWord>> for Microprogram {
    type Error = UcodeError;

    fn try_from(steps: Vec<ControlWord>) -> Result<Self, Self::Error> {
        Microprogram::new(steps)
    }
}

impl TryFrom<&[ControlWord]> for Microprogram {
    type Error = UcodeError;

    fn try_from(steps: &[ControlWord]) -> Result<Self, Self::Error> {
        Microprogram::new(steps.to_vec())
    }
}

fn check_opcode(opcode: u32) -> Result<u8, UcodeError> {
    u8::try_from(opcode).map_err(|_| UcodeError::OpcodeOutOfRange(opcode))
}

/// The control store ROM: one 32-bit control word per (opcode, step, flags).
///
/// Entries start as NOP and are only written through the `encode*` methods,
/// which fill whole (opcode, flags) slots.
#[derive(Clone, PartialEq, Eq)]
pub struct ControlStore {
    words: Vec<u32>,
}

impl Default for ControlStore {
    fn default() -> Self {
        ControlStore::new()
    }
}

impl std::fmt::Debug for ControlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ControlStore {{ populated: {}, fingerprint: {:#010x} }}", self.populated(), self.fingerprint())
    }
}

impl ControlStore {
    pub fn new() -> ControlStore {
        ControlStore {
            words: vec![0; ROM_SIZE],
        }
    }

    /// Writes the eight steps of `opcode` for a single flag combination.
    pub fn encode_instruction_flags(&mut self, opcode: u32, flags: Flags, program: &Microprogram) -> Result<(), UcodeError> {
        let opcode = check_opcode(opcode)?;
        self.write_slot(opcode, flags, program);
        Ok(())
    }

    /// Writes `steps` for every flag combination of `opcode`.
    pub fn encode(&mut self, opcode: u32, steps: &[ControlWord]) -> Result<(), UcodeError> {
        let opcode = check_opcode(opcode)?;
        let program = Microprogram::try_from(steps)?;
        self.write_all_flags(opcode, |_| &program);
        Ok(())
    }

    pub fn encode_program(&mut self, opcode: u32, program: &Microprogram) -> Result<(), UcodeError> {
        let opcode = check_opcode(opcode)?;
        self.write_all_flags(opcode, |_| program);
        Ok(())
    }

    /// Writes a distinct microprogram per flag combination. All sixteen programs
    /// are produced before the first write, so a failure leaves the store untouched.
    pub fn encode_conditional<F>(&mut self, opcode: u32, mut program_for: F) -> Result<(), UcodeError>
    where
        F: FnMut(Flags) -> Result<Microprogram, UcodeError>,
    {
        let opcode = check_opcode(opcode)?;
        let programs = Flags::combinations()
            .map(&mut program_for)
            .collect::<Result<Vec<_>, _>>()?;

        self.write_all_flags(opcode, |flags| &programs[flags.bits() as usize]);
        Ok(())
    }

    fn write_all_flags<'p, F>(&mut self, opcode: u8, program_for: F)
    where
        F: Fn(Flags) -> &'p Microprogram,
    {
        debug!(opcode, "encoding all flag combinations");
        for flags in Flags::combinations() {
            self.write_slot(opcode, flags, program_for(flags));
        }
    }

    fn write_slot(&mut self, opcode: u8, flags: Flags, program: &Microprogram) {
        trace!(opcode, flags = flags.bits(), steps = program.len(), "writing slot");
        for (step, word) in program.slot().iter().enumerate() {
            self.words[MicroAddress::index_of(opcode, step as u8, flags.bits())] = word.bits();
        }
    }

    pub fn get(&self, address: MicroAddress) -> u32 {
        self.words[address.index()]
    }

    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// The eight steps of one (opcode, flags) slot, step 0 first.
    pub fn instruction(&self, opcode: u8, flags: Flags) -> [u32; STEP_COUNT] {
        let mut slot = [0; STEP_COUNT];
        for (step, word) in slot.iter_mut().enumerate() {
            *word = self.words[MicroAddress::index_of(opcode, step as u8, flags.bits())];
        }
        slot
    }

    pub fn non_zero(&self) -> impl Iterator<Item = (MicroAddress, u32)> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            // every index of the table is below ROM_SIZE
            .map(|(i, w)| (MicroAddress::from_index(i).expect("control store index is in range"), *w))
    }

    pub fn populated(&self) -> usize {
        self.words.iter().filter(|w| **w != 0).count()
    }

    pub fn fingerprint(&self) -> u32 {
        self.words.iter().fold(0u32, |acc, w| acc.rotate_left(5) ^ w)
    }
}

fn read_pc() -> ControlWord {
    ControlWord::new()
        .address(AddressBusOut::ProgramCounter)
        .out(DataBusOut::Memory)
}

fn read_address() -> ControlWord {
    ControlWord::new()
        .address(AddressBusOut::MemoryAddress)
        .out(DataBusOut::Memory)
}

fn load_immediate(dest: DataBusIn) -> Vec<ControlWord> {
    vec![read_pc().load(dest)]
}

fn load_zero_page(dest: DataBusIn) -> Vec<ControlWord> {
    vec![
        ControlWord::new().with_mar(),
        read_pc().load(DataBusIn::AddressLow).with_pc_increment(),
        read_address().load(dest),
    ]
}

fn load_absolute(dest: DataBusIn) -> Vec<ControlWord> {
    vec![
        read_pc().load(DataBusIn::AddressLow).with_pc_increment(),
        read_pc().load(DataBusIn::AddressHigh).with_pc_increment(),
        read_address().load(dest),
    ]
}

fn mov(src: DataBusOut, dest: DataBusIn) -> Vec<ControlWord> {
    vec![ControlWord::new().out(src).load(dest)]
}

/// Steps executed after fetch for each defined instruction.
pub fn microprogram(opcode: Opcode) -> Vec<ControlWord> {
    match opcode {
        Opcode::Nop => vec![ControlWord::NOP],

        Opcode::LdaImm => load_immediate(DataBusIn::A),
        Opcode::LdaZeroPage => load_zero_page(DataBusIn::A),
        Opcode::LdaAbs => load_absolute(DataBusIn::A),

        Opcode::LdbImm => load_immediate(DataBusIn::B),
        Opcode::LdbZeroPage => load_zero_page(DataBusIn::B),
        Opcode::LdbAbs => load_absolute(DataBusIn::B),

        Opcode::LdcImm => load_immediate(DataBusIn::C),
        Opcode::LdcZeroPage => load_zero_page(DataBusIn::C),
        Opcode::LdcAbs => load_absolute(DataBusIn::C),

        Opcode::LddImm => load_immediate(DataBusIn::D),
        Opcode::LddZeroPage => load_zero_page(DataBusIn::D),
        Opcode::LddAbs => load_absolute(DataBusIn::D),

        Opcode::MovAB => mov(DataBusOut::A, DataBusIn::B),
        Opcode::MovAC => mov(DataBusOut::A, DataBusIn::C),
        Opcode::MovAD => mov(DataBusOut::A, DataBusIn::D),

        Opcode::MovBA => mov(DataBusOut::B, DataBusIn::A),
        Opcode::MovBC => mov(DataBusOut::B, DataBusIn::C),
        Opcode::MovBD => mov(DataBusOut::B, DataBusIn::D),

        Opcode::MovCA => mov(DataBusOut::C, DataBusIn::A),
        Opcode::MovCB => mov(DataBusOut::C, DataBusIn::B),
        Opcode::MovCD => mov(DataBusOut::C, DataBusIn::D),

        Opcode::MovDA => mov(DataBusOut::D, DataBusIn::A),
        Opcode::MovDB => mov(DataBusOut::D, DataBusIn::B),
        Opcode::MovDC => mov(DataBusOut::D, DataBusIn::C),
    }
}

/// The instruction table: every defined opcode with its validated microprogram.
pub fn isa() -> Result<Vec<(Opcode, Microprogram)>, UcodeError> {
    Opcode::iter()
        .map(|opcode| Ok((opcode, Microprogram::new(microprogram(opcode))?)))
        .collect()
}

/// Builds a fresh control store from the instruction table.
pub fn ucode() -> Result<ControlStore, UcodeError> {
    let mut store = ControlStore::new();

    for (opcode, program) in isa()? {
        debug!(%opcode, steps = program.len(), "defining instruction");
        store.encode_program(opcode as u32, &program)?;
    }

    info!(populated = store.populated(), fingerprint = store.fingerprint(), "control store built");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mov_a_b() -> ControlWord {
        ControlWord::new().out(DataBusOut::A).load(DataBusIn::B)
    }

    #[test]
    fn slot_layout() {
        let program = Microprogram::new(vec![mov_a_b()]).unwrap();
        let slot = program.slot();
        assert_eq!(ControlWord::FETCH, slot[0]);
        assert_eq!(mov_a_b(), slot[1]);
        assert_eq!(ControlWord::SEQUENCER_RESET, slot[2]);
        assert!(slot[3..].iter().all(|w| w.is_nop()));
    }

    #[test]
    fn empty_program_resets_after_fetch() {
        let slot = Microprogram::default().slot();
        assert_eq!(ControlWord::FETCH, slot[0]);
        assert_eq!(ControlWord::SEQUENCER_RESET, slot[1]);
        assert!(slot[2..].iter().all(|w| w.is_nop()));
    }

    #[test]
    fn full_program_ends_on_last_step() {
        let steps: Vec<_> = (0..MAX_MICROPROGRAM_STEPS).map(|_| mov_a_b()).collect();
        let slot = Microprogram::new(steps).unwrap().slot();
        assert!(slot[1..=MAX_MICROPROGRAM_STEPS].iter().all(|w| *w == mov_a_b()));
        assert_eq!(ControlWord::SEQUENCER_RESET, slot[STEP_COUNT - 1]);
    }

    #[test]
    fn too_long() {
        let steps = vec![mov_a_b(); MAX_MICROPROGRAM_STEPS + 1];
        assert!(matches!(Microprogram::new(steps), Err(UcodeError::MicroprogramTooLong(7))));
    }

    #[test]
    fn single_flag_slot() {
        let mut store = ControlStore::new();
        let program = Microprogram::new(vec![mov_a_b()]).unwrap();
        store.encode_instruction_flags(13, Flags::F1, &program).unwrap();

        assert_eq!(3, store.populated());
        assert_eq!(ControlWord::FETCH.bits(), store.instruction(13, Flags::F1)[0]);
        assert_eq!([0; STEP_COUNT], store.instruction(13, Flags::empty()));
    }

    #[test]
    fn opcode_range() {
        let mut store = ControlStore::new();
        assert!(store.encode(255, &[]).is_ok());
        assert!(matches!(store.encode(256, &[]), Err(UcodeError::OpcodeOutOfRange(256))));
    }

    #[test]
    fn opcode_checked_before_length() {
        let mut store = ControlStore::new();
        let steps = vec![mov_a_b(); 7];
        assert!(matches!(store.encode(300, &steps), Err(UcodeError::OpcodeOutOfRange(300))));
        assert_eq!(0, store.populated());
    }

    #[test]
    fn conditional() {
        let mut store = ControlStore::new();
        let taken = ControlWord::new().out(DataBusOut::Memory).load(DataBusIn::PcLow);
        store.encode_conditional(0x40, |flags| {
            if flags.contains(Flags::F0) {
                Microprogram::new(vec![taken])
            } else {
                Ok(Microprogram::default())
            }
        }).unwrap();

        for flags in Flags::combinations() {
            let slot = store.instruction(0x40, flags);
            assert_eq!(ControlWord::FETCH.bits(), slot[0]);
            if flags.contains(Flags::F0) {
                assert_eq!(taken.bits(), slot[1]);
                assert_eq!(ControlWord::SEQUENCER_RESET.bits(), slot[2]);
            } else {
                assert_eq!(ControlWord::SEQUENCER_RESET.bits(), slot[1]);
                assert_eq!(0, slot[2]);
            }
        }
    }

    #[test]
    fn conditional_failure_writes_nothing() {
        let mut store = ControlStore::new();
        let result = store.encode_conditional(0x41, |flags| {
            let len = if flags == Flags::all() { 7 } else { 1 };
            Microprogram::new(vec![mov_a_b(); len])
        });
        assert!(matches!(result, Err(UcodeError::MicroprogramTooLong(7))));
        assert_eq!(ControlStore::new(), store);
    }

    #[test]
    fn failure_keeps_earlier_opcodes() {
        let mut store = ControlStore::new();
        store.encode(13, &[mov_a_b()]).unwrap();
        let before = store.clone();
        assert!(store.encode(14, &[mov_a_b(); 7]).is_err());
        assert_eq!(before, store);
        assert_eq!(48, store.populated());
    }

    #[test]
    fn lookups() {
        let store = ucode().unwrap();
        assert_eq!(ControlWord::SEQUENCER_RESET.bits(), store.get(MicroAddress::new(13, 2, 5).unwrap()));
        assert_eq!(ControlWord::FETCH.bits(), store.get(MicroAddress::new(0x18, 0, 15).unwrap()));
        assert_eq!(Some(ControlWord::FETCH.bits()), store.word(MicroAddress::index_of(13, 0, 0)));
        assert_eq!(Some(0), store.word(ROM_SIZE - 1));
        assert_eq!(None, store.word(ROM_SIZE));
    }

    #[test]
    fn non_zero_addresses() {
        let mut store = ControlStore::new();
        let program = Microprogram::new(vec![mov_a_b()]).unwrap();
        store.encode_instruction_flags(0xFF, Flags::F0 | Flags::F3, &program).unwrap();

        let entries: Vec<_> = store.non_zero().collect();
        assert_eq!(3, entries.len());
        for (step, (address, word)) in entries.iter().enumerate() {
            assert_eq!(0xFF, address.opcode);
            assert_eq!(step as u8, *address.step);
            assert_eq!(Flags::F0 | Flags::F3, address.status());
            assert_eq!(store.get(*address), *word);
        }
    }

    #[test]
    fn isa_table() {
        let isa = isa().unwrap();
        assert_eq!(25, isa.len());
        let (opcode, program) = &isa[2];
        assert_eq!(Opcode::LdaZeroPage, *opcode);
        assert_eq!(3, program.len());
        assert_eq!(vec![ControlWord::NOP], isa[0].1.steps());
    }

    #[test]
    fn nop_instruction() {
        let store = ucode().unwrap();
        let slot = store.instruction(Opcode::Nop as u8, Flags::empty());
        assert_eq!([ControlWord::FETCH.bits(), 0, 1, 0, 0, 0, 0, 0], slot);
    }

    #[test]
    fn undefined_opcodes_stay_nop() {
        let store = ucode().unwrap();
        let defined = Opcode::iter().count() * SLOT_WORDS;
        assert!(store.words()[defined..].iter().all(|w| *w == 0));
    }

    #[test]
    fn version_bump() {
        let store = ucode().unwrap();
        assert_eq!(1440, store.populated());
        assert_eq!(2537384130, store.fingerprint()); // if you have to change this, also change the version
        assert_eq!(MAJOR_VERSION, 1);
        assert_eq!(MINOR_VERSION, 0);
        assert_eq!(PATCH_VERSION, 0);
    }
}
