/*!
  Error taxonomies for the two halves of the pipeline. Assembly errors abort the
  whole `assemble` call; runtime errors abort `exec` but leave the machine state
  as of the failing instruction observable.
*/

use thiserror::Error;

use crate::bytecode::Word;
use crate::vm::Target;

/// Errors surfaced while assembling source text into bytecode.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AssemblyError {
  /// Wrong number of operands for a mnemonic.
  #[error("[ {op} ] requires {want} arguments but got {got}")]
  ArityMismatch {
    op   :  &'static str,
    want :  usize,
    got  :  usize
  },

  /// An operand position that only accepts a register got something else.
  #[error("{op}: expected register, got {operand}")]
  ExpectedRegister {
    op      :  &'static str,
    operand :  String
  },

  /// The mnemonic is not an opcode, a pseudo-op, or a suffixed form of either.
  #[error("unknown mnemonic: {0}")]
  UnknownMnemonic(String),

  /// An operand referenced a label that no line defines.
  #[error("unknown label: {0}")]
  UnknownLabel(String),

  /// The same label was defined on two lines.
  #[error("duplicate label: {0}")]
  DuplicateLabel(String),

  /// No rotation fits the constant into the 8+4 immediate representation.
  #[error("{op}: unencodable constant: {value}")]
  UnencodableConstant {
    op    :  &'static str,
    value :  Word
  },

  /// An operand that is not a register, an immediate, or a label legal in its
  /// position.
  #[error("{op}: malformed operand: {operand}")]
  MalformedOperand {
    op      :  &'static str,
    operand :  String
  },
}

/// Errors surfaced while executing bytecode.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum RuntimeError {
  /// The word at the program counter does not decode to an instruction.
  #[error("invalid instruction word: {0:#010x}")]
  InvalidOpcode(Word),

  /// A register or memory access landed outside the segment.
  #[error("{segment} access out of range: {loc}")]
  MemoryOutOfRange {
    segment :  Target,
    loc     :  Word
  },

  /// The access target is not backed by any segment (`Stack`, or a write to
  /// `Dec`).
  #[error("invalid access target: {0}")]
  InvalidTarget(Target),

  /// The call stack grew past its fixed depth.
  #[error("call stack overflow at depth {0}")]
  CallStackOverflow(usize),

  /// Division by a zero operand.
  #[error("{op}: division by zero")]
  DivisionByZero {
    op :  &'static str
  },

  /// The code stream ended in the middle of an instruction word.
  #[error("truncated instruction at byte {0}")]
  TruncatedCode(usize),
}
