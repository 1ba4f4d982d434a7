extern crate strum;
#[macro_use]
extern crate strum_macros;

extern crate packed_struct;
extern crate packed_struct_codegen;
use std::fmt;

use packed_struct::prelude::*;

#[macro_use]
extern crate bitflags;

pub mod hexfile;

pub const OPCODE_COUNT: usize = 1 << 8;
pub const STEP_COUNT: usize = 1 << 3;
pub const FLAG_COMBINATIONS: usize = 1 << 4;
pub const ROM_SIZE: usize = OPCODE_COUNT * STEP_COUNT * FLAG_COMBINATIONS;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("control word {0:#010x} selects an undefined micro-operation")]
    InvalidControlWord(u32),
    #[error("step {step} / flags {flags} do not fit the microcode address")]
    InvalidAddress { step: u8, flags: u8 },
    #[error("index {0} is outside the control store")]
    IndexOutOfRange(usize),
}

bitflags! {
    /// Status register bits latched into the low nibble of the microcode address.
    pub struct Flags: u8 {
        const F0 = 0b0001;
        const F1 = 0b0010;
        const F2 = 0b0100;
        const F3 = 0b1000;
    }
}

impl Flags {
    pub fn combinations() -> impl Iterator<Item = Flags> {
        (0..FLAG_COMBINATIONS as u8).map(Flags::from_bits_truncate)
    }
}

#[derive(Clone, Copy, Display, Debug, Default, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum AluOperator {
    #[default]
    #[strum(to_string = "ADD")]
    Add = 0,
    #[strum(to_string = "SUB")]
    Sub = 1,
    #[strum(to_string = "AND")]
    And = 2,
    #[strum(to_string = "OR")]
    Or = 3,
    #[strum(to_string = "XOR")]
    Xor = 4,
}

/// Register pair routed into the ALU, left operand first.
#[derive(Clone, Copy, Display, Debug, Default, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum AluOperand {
    #[default]
    AA = 0,
    AB = 1,
    AC = 2,
    AD = 3,
    BA = 4,
    BB = 5,
    BC = 6,
    BD = 7,
    CA = 8,
    CB = 9,
    CC = 10,
    CD = 11,
    DA = 12,
    DB = 13,
    DC = 14,
    DD = 15,
}

#[derive(Clone, Copy, Display, Debug, Default, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum DataBusOut {
    #[default]
    #[strum(to_string = "-")]
    None = 0,
    #[strum(to_string = "ARO")]
    A = 1,
    #[strum(to_string = "BRO")]
    B = 2,
    #[strum(to_string = "CRO")]
    C = 3,
    #[strum(to_string = "DRO")]
    D = 4,
    #[strum(to_string = "RAO")]
    Rao = 5,
    #[strum(to_string = "ROO")]
    Roo = 6,
    #[strum(to_string = "INO")]
    Instruction = 7,
    #[strum(to_string = "FRO")]
    Flags = 8,
    #[strum(to_string = "BLO")]
    Blo = 9,
    #[strum(to_string = "BMO")]
    Bmo = 10,
    #[strum(to_string = "ALO")]
    Alu = 11,
    /// Memory read onto the data bus.
    #[strum(to_string = "MIO")]
    Memory = 12,
}

#[derive(Clone, Copy, Display, Debug, Default, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum AddressBusOut {
    #[default]
    #[strum(to_string = "-")]
    None = 0,
    #[strum(to_string = "PCO")]
    ProgramCounter = 1,
    #[strum(to_string = "MAO")]
    MemoryAddress = 2,
    #[strum(to_string = "SPO")]
    StackPointer = 3,
}

#[derive(Clone, Copy, Display, Debug, Default, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum DataBusIn {
    #[default]
    #[strum(to_string = "-")]
    None = 0,
    #[strum(to_string = "ARI")]
    A = 1,
    #[strum(to_string = "BRI")]
    B = 2,
    #[strum(to_string = "CRI")]
    C = 3,
    #[strum(to_string = "DRI")]
    D = 4,
    #[strum(to_string = "RAI")]
    Rai = 5,
    /// Output register.
    #[strum(to_string = "ORI")]
    Output = 6,
    #[strum(to_string = "INI")]
    Instruction = 7,
    #[strum(to_string = "FRI")]
    Flags = 8,
    /// Low byte of the memory address register.
    #[strum(to_string = "MLI")]
    AddressLow = 9,
    #[strum(to_string = "MMI")]
    AddressHigh = 10,
    #[strum(to_string = "PLI")]
    PcLow = 11,
    #[strum(to_string = "PMI")]
    PcHigh = 12,
}

#[derive(Clone, Copy, Display, Debug, Default, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum StackOp {
    #[default]
    #[strum(to_string = "-")]
    None = 0,
    #[strum(to_string = "SIN")]
    Increment = 1,
    #[strum(to_string = "SDE")]
    Decrement = 2,
    #[strum(to_string = "SCL")]
    Clear = 3,
}

/// One step of the control store. Each field holds a single selector, so two
/// micro-operations competing for the same field can't be expressed.
///
/// ```text
/// 31      28 27     24 23     20 19     16 15     12 11      8 7       4 3       0
/// [ALU op  ][operand ][bus out ][addr out][bus in  ][MAR,MCE,SC][-,HLT,PCR,PCE][-,-,FLS,SSR]
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[derive(PackedStruct)]
#[packed_struct(size_bytes = "4", endian = "msb", bit_numbering = "lsb0")]
pub struct ControlWord {
    #[packed_field(bits = "0")]
    pub step_reset: bool,
    #[packed_field(bits = "1")]
    pub flag_select: bool,
    #[packed_field(bits = "4")]
    pub pc_increment: bool,
    #[packed_field(bits = "5")]
    pub pc_reset: bool,
    #[packed_field(bits = "6")]
    pub halt: bool,
    #[packed_field(bits = "8..=9", ty = "enum")]
    pub stack: StackOp,
    #[packed_field(bits = "10")]
    pub mar_count: bool,
    #[packed_field(bits = "11")]
    pub mar: bool,
    #[packed_field(bits = "12..=15", ty = "enum")]
    pub bus_in: DataBusIn,
    #[packed_field(bits = "16..=19", ty = "enum")]
    pub address_out: AddressBusOut,
    #[packed_field(bits = "20..=23", ty = "enum")]
    pub bus_out: DataBusOut,
    #[packed_field(bits = "24..=27", ty = "enum")]
    pub alu_operand: AluOperand,
    #[packed_field(bits = "28..=31", ty = "enum")]
    pub alu_op: AluOperator,
}

impl ControlWord {
    pub const NOP: ControlWord = ControlWord {
        step_reset: false,
        flag_select: false,
        pc_increment: false,
        pc_reset: false,
        halt: false,
        stack: StackOp::None,
        mar_count: false,
        mar: false,
        bus_in: DataBusIn::None,
        address_out: AddressBusOut::None,
        bus_out: DataBusOut::None,
        alu_operand: AluOperand::AA,
        alu_op: AluOperator::Add,
    };

    /// Step 0 of every instruction: PCO | MIO | INI | PCE.
    pub const FETCH: ControlWord = ControlWord {
        address_out: AddressBusOut::ProgramCounter,
        bus_out: DataBusOut::Memory,
        bus_in: DataBusIn::Instruction,
        pc_increment: true,
        ..ControlWord::NOP
    };

    /// Returns the step counter to 0, ending the instruction.
    pub const SEQUENCER_RESET: ControlWord = ControlWord {
        step_reset: true,
        ..ControlWord::NOP
    };

    pub fn new() -> ControlWord {
        ControlWord::NOP
    }

    pub fn alu(mut self, op: AluOperator) -> ControlWord {
        self.alu_op = op;
        self
    }

    pub fn operands(mut self, operand: AluOperand) -> ControlWord {
        self.alu_operand = operand;
        self
    }

    pub fn out(mut self, out: DataBusOut) -> ControlWord {
        self.bus_out = out;
        self
    }

    pub fn address(mut self, address: AddressBusOut) -> ControlWord {
        self.address_out = address;
        self
    }

    pub fn load(mut self, load: DataBusIn) -> ControlWord {
        self.bus_in = load;
        self
    }

    pub fn stack_op(mut self, op: StackOp) -> ControlWord {
        self.stack = op;
        self
    }

    pub fn with_mar(mut self) -> ControlWord {
        self.mar = true;
        self
    }

    pub fn with_mar_count(mut self) -> ControlWord {
        self.mar_count = true;
        self
    }

    pub fn with_pc_increment(mut self) -> ControlWord {
        self.pc_increment = true;
        self
    }

    pub fn with_pc_reset(mut self) -> ControlWord {
        self.pc_reset = true;
        self
    }

    pub fn with_halt(mut self) -> ControlWord {
        self.halt = true;
        self
    }

    pub fn with_step_reset(mut self) -> ControlWord {
        self.step_reset = true;
        self
    }

    pub fn with_flag_select(mut self) -> ControlWord {
        self.flag_select = true;
        self
    }

    pub fn bits(&self) -> u32 {
        // every field is an enum or a bool, so packing can't overflow
        let bytes = self.pack().expect("control word fields always fit their bit ranges");
        u32::from_be_bytes(bytes)
    }

    pub fn from_bits(bits: u32) -> Result<ControlWord, EncodingError> {
        let word = ControlWord::unpack(&bits.to_be_bytes())
            .map_err(|_| EncodingError::InvalidControlWord(bits))?;
        // unused bits are dropped by unpack
        if word.bits() != bits {
            return Err(EncodingError::InvalidControlWord(bits));
        }
        Ok(word)
    }

    pub fn is_nop(&self) -> bool {
        *self == ControlWord::NOP
    }

    /// Active selectors as `|` separated mnemonics, `NOP` for the zero word.
    pub fn mnemonics(&self) -> Mnemonics<'_> {
        Mnemonics(self)
    }

    fn active_selectors(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.alu_op != AluOperator::Add {
            names.push(self.alu_op.to_string());
        }
        if self.alu_operand != AluOperand::AA {
            names.push(self.alu_operand.to_string());
        }
        if self.bus_out != DataBusOut::None {
            names.push(self.bus_out.to_string());
        }
        if self.address_out != AddressBusOut::None {
            names.push(self.address_out.to_string());
        }
        if self.bus_in != DataBusIn::None {
            names.push(self.bus_in.to_string());
        }
        if self.stack != StackOp::None {
            names.push(self.stack.to_string());
        }
        let lines = [
            (self.mar_count, "MCE"),
            (self.mar, "MAR"),
            (self.pc_increment, "PCE"),
            (self.pc_reset, "PCR"),
            (self.halt, "HLT"),
            (self.step_reset, "SSR"),
            (self.flag_select, "FLS"),
        ];
        names.extend(lines.iter().filter(|(on, _)| *on).map(|(_, n)| n.to_string()));
        names
    }
}

/// Display adapter returned by [`ControlWord::mnemonics`]. The derived
/// `Display` on `ControlWord` is the packed bit dump.
pub struct Mnemonics<'a>(&'a ControlWord);

impl fmt::Display for Mnemonics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.0.active_selectors();
        if names.is_empty() {
            write!(f, "NOP")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// A control store address: opcode, execution step and status flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(PackedStruct)]
#[packed_struct(size_bytes = "2", endian = "msb", bit_numbering = "lsb0")]
pub struct MicroAddress {
    #[packed_field(bits = "0..=3")]
    pub flags: Integer<u8, packed_bits::Bits::<4>>,
    #[packed_field(bits = "4..=6")]
    pub step: Integer<u8, packed_bits::Bits::<3>>,
    #[packed_field(bits = "7..=14")]
    pub opcode: u8,
}

impl MicroAddress {
    pub fn new(opcode: u8, step: u8, flags: u8) -> Result<MicroAddress, EncodingError> {
        if step as usize >= STEP_COUNT || flags as usize >= FLAG_COMBINATIONS {
            return Err(EncodingError::InvalidAddress { step, flags });
        }

        Ok(MicroAddress {
            flags: flags.into(),
            step: step.into(),
            opcode,
        })
    }

    pub const fn index_of(opcode: u8, step: u8, flags: u8) -> usize {
        (opcode as usize) << 7 | (step as usize) << 4 | flags as usize
    }

    pub fn index(&self) -> usize {
        let bytes = self.pack().expect("address fields are range checked on construction");
        u16::from_be_bytes(bytes) as usize
    }

    pub fn from_index(index: usize) -> Result<MicroAddress, EncodingError> {
        if index >= ROM_SIZE {
            return Err(EncodingError::IndexOutOfRange(index));
        }
        MicroAddress::unpack(&(index as u16).to_be_bytes())
            .map_err(|_| EncodingError::IndexOutOfRange(index))
    }

    pub fn status(&self) -> Flags {
        Flags::from_bits_truncate(*self.flags)
    }
}

#[derive(Clone, Copy, Display, Debug, PartialEq, Eq)]
#[derive(EnumCount, EnumIter, EnumString)]
#[derive(PrimitiveEnum_u8)]
pub enum Opcode {
    #[strum(to_string = "NOP")]
    Nop = 0x00,

    #[strum(to_string = "LDA #")]
    LdaImm = 0x01, // A <- [8-bit constant]
    #[strum(to_string = "LDA zp")]
    LdaZeroPage = 0x02, // A <- MEM[00:8-bit constant]
    #[strum(to_string = "LDA abs")]
    LdaAbs = 0x03, // A <- MEM[16-bit constant]

    #[strum(to_string = "LDB #")]
    LdbImm = 0x04,
    #[strum(to_string = "LDB zp")]
    LdbZeroPage = 0x05,
    #[strum(to_string = "LDB abs")]
    LdbAbs = 0x06,

    #[strum(to_string = "LDC #")]
    LdcImm = 0x07,
    #[strum(to_string = "LDC zp")]
    LdcZeroPage = 0x08,
    #[strum(to_string = "LDC abs")]
    LdcAbs = 0x09,

    #[strum(to_string = "LDD #")]
    LddImm = 0x0A,
    #[strum(to_string = "LDD zp")]
    LddZeroPage = 0x0B,
    #[strum(to_string = "LDD abs")]
    LddAbs = 0x0C,

    #[strum(to_string = "MOV A,B")]
    MovAB = 0x0D, // A -> B
    #[strum(to_string = "MOV A,C")]
    MovAC = 0x0E,
    #[strum(to_string = "MOV A,D")]
    MovAD = 0x0F,

    #[strum(to_string = "MOV B,A")]
    MovBA = 0x10,
    #[strum(to_string = "MOV B,C")]
    MovBC = 0x11,
    #[strum(to_string = "MOV B,D")]
    MovBD = 0x12,

    #[strum(to_string = "MOV C,A")]
    MovCA = 0x13,
    #[strum(to_string = "MOV C,B")]
    MovCB = 0x14,
    #[strum(to_string = "MOV C,D")]
    MovCD = 0x15,

    #[strum(to_string = "MOV D,A")]
    MovDA = 0x16,
    #[strum(to_string = "MOV D,B")]
    MovDB = 0x17,
    #[strum(to_string = "MOV D,C")]
    MovDC = 0x18,
}
