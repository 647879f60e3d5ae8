/*!
  Representation of VM instructions abstractly and as decoded records.
*/

use std::fmt::{Display, Formatter};

use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

// If you change this you must also change the encode and decode methods of everything that
// serializes to Words.
pub type Word = u32;

/// Number of general purpose registers.
pub const MAX_REGISTER: usize = 16;
/// Stack pointer register (r13 by convention).
pub const SP: u8 = 13;
/// Link register (r14). Reserved; never written by this core.
pub const LR: u8 = 14;
/// Program counter register (r15), measured in instruction slots.
pub const PC: u8 = 15;

/**
  Opcodes of the virtual machine.

  Rust stores enum variants as bytes. As in C, enum values are represented by consecutive
  natural numbers and can be treated as numeric types. The opcodes are grouped by execution
  mode so that an opcode's mode can be determined with a trivial comparison. Consequently,
  the order the opcodes are listed below is significant. Order-dependencies:
      ```
      Opcode::mode()
      binary::encode_instruction()
      binary::try_decode_instruction()
      ```
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug,         Hash
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Opcode {
  // Data processing opcodes //
  Mov,               // mov( rd, rs|#imm )
  Add,               // add( rd, ra, rb|#imm )
  Sub,               // sub( rd, ra, rb|#imm )
  Rsb,               // rsb( rd, ra, rb|#imm ), computes (rb|#imm) - ra
  Mul,               // mul( rd, ra, rb|#imm )
  Div,               // div( rd, ra, rb|#imm )
  And,               // and( rd, ra, rb|#imm )
  Xor,               // xor( rd, ra, rb|#imm )
  Orr,               // orr( rd, ra, rb|#imm )
  Lsl,               // lsl( rd, ra, rb|#imm )
  Lsr,               // lsr( rd, ra, rb|#imm )
  Cmp,               // cmp( ra, rb )
  // Opcode 11

  // Data transfer opcodes //
  Ldm,               // ldm( rd, ra|#addr ), memory[addr] -> rd
  Stm,               // stm( rd, ra|#addr ), rd -> memory[addr]
  // Opcode 13

  // Branching opcodes //
  Call,              // call( label )
  Ret,               // ret
}

pub const MAX_DATA_PROCESSING_OPCODE :  Word  = 11;
pub const MAX_DATA_TRANSFER_OPCODE   :  Word  = 13;

impl Opcode {

  /// Gives the 4-bit numeric value that represents the opcode, padded with zeros to
  /// make a `Word`.
  pub fn code(&self) -> Word {
    let val: u8 = (*self).into();
    val as Word
  }

  /// The execution mode is determined by the opcode, never stored or encoded.
  pub fn mode(&self) -> Mode {
    match self.code() {
      value if value <= MAX_DATA_PROCESSING_OPCODE => Mode::DataProcessing,
      value if value <= MAX_DATA_TRANSFER_OPCODE   => Mode::DataTransfer,
      _value                                       => Mode::Branching
    }
  }

  /// Returns the number of operands the opcode takes in assembly source.
  pub fn arity(&self) -> usize {
    match self {
      | Opcode::Mov
      | Opcode::Cmp
      | Opcode::Ldm
      | Opcode::Stm  => 2,

      Opcode::Call   => 1,
      Opcode::Ret    => 0,

      // The remaining data processing opcodes: add, sub, rsb, mul, div, and, xor,
      // orr, lsl, lsr.
      _three_operand => 3
    }
  }
}

/**
  Condition codes, selecting when an instruction executes against the condition word
  latched by the previous instruction. `Al` ("always") is the no-condition value.

  The variants are listed in wire order: the 4-bit condition field of an encoded
  instruction holds the discriminant.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug,         Hash
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Condition {
  Al,                // always; no suffix in assembly
  Eq,                // condition word == 0
  Ne,                // condition word != 0
  Gt,                // condition word >  0
  Lt,                // condition word <  0
  Gte,               // condition word >= 0
  Lte,               // condition word <= 0
}

impl Condition {

  /// Gives the 4-bit numeric value that represents the condition, padded with zeros
  /// to make a `Word`.
  pub fn code(&self) -> Word {
    let val: u8 = (*self).into();
    val as Word
  }
}

/// Execution modes. Dispatch in the interpreter is first on mode, then on opcode.
#[derive(StrumDisplay, Clone, Copy, Eq, PartialEq, Debug)]
pub enum Mode {
  DataProcessing,
  DataTransfer,
  Branching,
}

/**
  Holds the unencoded components of an instruction. Both the assembler and the
  interpreter hold instructions in this form; the 32-bit word layout in
  `bytecode::binary` is the only other representation.

  The second source operand is either the `ops2` register or, when `immediate` is
  set, the (already decoded) 32-bit constant in `value`. Label operands are resolved
  to slot indices before the record is encoded, so no label form exists here.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Instruction {
  pub cond      :  Condition,
  pub s_flag    :  bool,
  pub op        :  Opcode,
  pub dst       :  u8,
  pub ops1      :  u8,
  pub ops2      :  u8,
  pub immediate :  bool,
  pub value     :  Word,
}

impl Default for Instruction {
  fn default() -> Instruction {
    Instruction {
      cond      :  Condition::Al,
      s_flag    :  false,
      op        :  Opcode::Mov,
      dst       :  0,
      ops1      :  0,
      ops2      :  0,
      immediate :  false,
      value     :  0,
    }
  }
}

impl Instruction {

  /// The execution mode, derived from the opcode.
  pub fn mode(&self) -> Mode {
    self.op.mode()
  }

  /// The second source, immediate constant or `ops2` register, rendered for display.
  fn source_operand(&self) -> String {
    match self.immediate {
      true  => format!("#{}", self.value),
      false => format!("r{}", self.ops2),
    }
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    // Reconstruct the mnemonic: base, then a condition suffix or the S flag.
    match self.cond {
      Condition::Al => {
        match self.s_flag {
          true  => write!(f, "{}s", self.op)?,
          false => write!(f, "{}", self.op)?,
        }
      }
      cond => write!(f, "{}{}", self.op, cond)?,
    }

    match self.op {

      Opcode::Mov => {
        // For mov, ops1/value is the source.
        match self.immediate {
          true  => write!(f, " r{}, #{}", self.dst, self.value),
          false => write!(f, " r{}, r{}", self.dst, self.ops1),
        }
      }

      Opcode::Cmp => {
        write!(f, " r{}, r{}", self.dst, self.ops1)
      }

      | Opcode::Ldm
      | Opcode::Stm => {
        // The address doubles as ops1/value.
        match self.immediate {
          true  => write!(f, " r{}, #{}", self.dst, self.value),
          false => write!(f, " r{}, r{}", self.dst, self.ops1),
        }
      }

      Opcode::Call => {
        write!(f, " {}", self.value)
      }

      Opcode::Ret => Ok(()),

      _three_operand => {
        write!(f, " r{}, r{}, {}", self.dst, self.ops1, self.source_operand())
      }

    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;

  #[test]
  fn opcode_modes_follow_wire_order() {
    assert_eq!(Opcode::Mov.mode(),  Mode::DataProcessing);
    assert_eq!(Opcode::Cmp.mode(),  Mode::DataProcessing);
    assert_eq!(Opcode::Ldm.mode(),  Mode::DataTransfer);
    assert_eq!(Opcode::Stm.mode(),  Mode::DataTransfer);
    assert_eq!(Opcode::Call.mode(), Mode::Branching);
    assert_eq!(Opcode::Ret.mode(),  Mode::Branching);
  }

  #[test]
  fn mnemonic_round_trip() {
    assert_eq!(Opcode::from_str("mov"), Ok(Opcode::Mov));
    assert_eq!(Opcode::from_str("rsb"), Ok(Opcode::Rsb));
    assert_eq!(format!("{}", Opcode::Lsr), "lsr");
    assert!(Opcode::from_str("bogus").is_err());
  }

  #[test]
  fn display_reconstructs_assembly() {
    let instr = Instruction {
      op: Opcode::Sub,
      s_flag: true,
      immediate: true,
      value: 1,
      ..Instruction::default()
    };
    assert_eq!(format!("{}", instr), "subs r0, r0, #1");

    let instr = Instruction {
      op: Opcode::Mov,
      cond: Condition::Eq,
      dst: 15,
      immediate: true,
      value: 7,
      ..Instruction::default()
    };
    assert_eq!(format!("{}", instr), "moveq r15, #7");
  }
}
