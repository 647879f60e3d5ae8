/*!

  The single-pass assembler. Source text goes in, big-endian bytecode comes out.

  The dialect is line oriented:

    * Comments run from `;` to the end of the line.
    * A label is a line of the form `name:` and aliases the slot of the next
      instruction; it emits nothing.
    * An instruction is a mnemonic followed by whitespace-separated operands.
      Registers are `r` plus a decimal index, immediates are `#` plus a decimal
      integer, and a bare identifier is a label reference, legal only where an
      immediate could stand.
    * A mnemonic may carry one suffix: a condition code (`eq`, `ne`, `gt`, `lt`,
      `gte`, `lte`) or `s` to request condition-word latching. The two are
      mutually exclusive.

  Instructions are parsed and appended in one pass. An operand that names a label
  is recorded against its instruction's slot; after the whole source is parsed,
  `link` rewrites each recorded slot with the label's address. Only then is each
  record encoded to its 32-bit word.

*/

use std::collections::HashMap;
use std::str::FromStr;

use nom::{
  branch::alt,
  bytes::complete::is_not,
  character::complete::{char as one_char, digit1, satisfy, space1},
  combinator::{all_consuming, map, map_res, opt, recognize},
  multi::many0,
  sequence::{pair, preceded, terminated},
  IResult,
};
use strum_macros::{EnumString, IntoStaticStr};

use crate::bytecode::{encode_instruction, Condition, Instruction, Opcode, Word,
                      MAX_REGISTER, SP};
use crate::errors::AssemblyError;

const COMMENT_CHAR    :  char  = ';';
const LABEL_SUFFIX    :  char  = ':';
const REGISTER_PREFIX :  char  = 'r';
const NUMBER_PREFIX   :  char  = '#';

/// Assembles source text into bytecode, four big-endian bytes per instruction.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblyError> {
  Assembler::new().assemble(source)
}

/// Mnemonics that expand into instruction sequences instead of encoding directly.
#[derive(
  EnumString, IntoStaticStr,
  Clone,      Copy,          Eq, PartialEq, Debug
)]
#[strum(serialize_all = "lowercase")]
enum PseudoOp {
  Push,              // push( rd ): sub sp, sp, #1 ; stm rd, sp
  Pop,               // pop( rd ):  ldm rd, sp ; add sp, sp, #1
}

/// A mnemonic base, before any condition or S suffix.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Mnemonic {
  Op(Opcode),
  Pseudo(PseudoOp),
}

impl FromStr for Mnemonic {
  type Err = strum::ParseError;

  fn from_str(text: &str) -> Result<Mnemonic, Self::Err> {
    Opcode::from_str(text)
      .map(Mnemonic::Op)
      .or_else(|_e| PseudoOp::from_str(text).map(Mnemonic::Pseudo))
  }
}

/// One source line after comment stripping.
#[derive(Debug, Eq, PartialEq)]
enum Line<'a> {
  Blank,
  Label(&'a str),
  Instruction {
    mnemonic :  &'a str,
    operands :  Vec<&'a str>
  },
}

/// A classified operand token.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Operand<'a> {
  Register(u8),
  Immediate(Word),
  Label(&'a str),
}

// region Line grammar

/// An identifier: a letter or underscore followed by letters, digits, underscores.
fn identifier(input: &str) -> IResult<&str, &str> {
  recognize(pair(
    satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
    many0(satisfy(|c: char| c.is_ascii_alphanumeric() || c == '_')),
  ))(input)
}

/// Any run of non-blank characters, taken as one mnemonic or operand token.
fn token(input: &str) -> IResult<&str, &str> {
  is_not(" \t")(input)
}

fn label_line(input: &str) -> IResult<&str, Line> {
  map(terminated(identifier, one_char(LABEL_SUFFIX)), Line::Label)(input)
}

fn instruction_line(input: &str) -> IResult<&str, Line> {
  map(
    pair(token, many0(preceded(space1, token))),
    |(mnemonic, operands)| Line::Instruction { mnemonic, operands },
  )(input)
}

/// Parses one raw source line into its `Line` form. Never fails: any non-blank
/// line tokenizes, and a token that is no mnemonic surfaces later as
/// `UnknownMnemonic`.
fn parse_line(line: &str) -> Line {
  let content = match line.find(COMMENT_CHAR) {
    Some(index) => &line[..index],
    None        => line,
  };
  let content = content.trim();
  if content.is_empty() {
    return Line::Blank;
  }

  let result: IResult<&str, Line> =
    all_consuming(alt((label_line, instruction_line)))(content);
  match result {
    Ok((_rest, parsed)) => parsed,
    Err(_e) => Line::Instruction { mnemonic: content, operands: vec![] },
  }
}

fn immediate_operand(input: &str) -> IResult<&str, Operand> {
  map_res(
    preceded(one_char(NUMBER_PREFIX), recognize(pair(opt(one_char('-')), digit1))),
    |digits: &str| digits.parse::<i64>().map(|value| Operand::Immediate(value as Word)),
  )(input)
}

fn register_operand(input: &str) -> IResult<&str, Operand> {
  map_res(
    preceded(one_char(REGISTER_PREFIX), digit1),
    |digits: &str| digits.parse::<u8>().map(Operand::Register),
  )(input)
}

fn label_operand(input: &str) -> IResult<&str, Operand> {
  map(identifier, Operand::Label)(input)
}

/**
  Classifies an operand token. Each alternative must consume the whole token, so
  that `r2x` falls through the register form and classifies as a label rather
  than as `r2` with trailing garbage.
*/
fn classify_operand<'a>(op: &'static str, token: &'a str)
  -> Result<Operand<'a>, AssemblyError>
{
  let result: IResult<&str, Operand> = alt((
    all_consuming(immediate_operand),
    all_consuming(register_operand),
    all_consuming(label_operand),
  ))(token);

  match result {
    Ok((_rest, operand)) => Ok(operand),
    Err(_e) => Err(AssemblyError::MalformedOperand { op, operand: token.to_string() }),
  }
}

// endregion

// region Mnemonic suffixes

/**
  Splits a mnemonic into its base, condition code, and S flag. Three-letter
  condition suffixes are tried before two-letter ones so that `lte` is never read
  as `lt` plus garbage, and the trailing `s` is recognized only when no condition
  suffix matched. A suffix applies only when the remaining base is itself a known
  mnemonic.
*/
fn parse_mnemonic(text: &str) -> Result<(Mnemonic, Condition, bool), AssemblyError> {
  let unknown = || AssemblyError::UnknownMnemonic(text.to_string());
  if !text.is_ascii() {
    return Err(unknown());
  }

  if text.len() > 3 {
    // Only gte and lte have three-letter names.
    if let Ok(cond) = Condition::from_str(&text[text.len() - 3..]) {
      if let Ok(mnemonic) = Mnemonic::from_str(&text[..text.len() - 3]) {
        return Ok((mnemonic, cond, false));
      }
    }
  }

  if text.len() > 2 {
    if let Ok(cond) = Condition::from_str(&text[text.len() - 2..]) {
      // `al` is the no-condition value, not a suffix.
      if cond != Condition::Al {
        if let Ok(mnemonic) = Mnemonic::from_str(&text[..text.len() - 2]) {
          return Ok((mnemonic, cond, false));
        }
      }
    }
  }

  if let Some(base) = text.strip_suffix('s') {
    if let Ok(mnemonic) = Mnemonic::from_str(base) {
      return Ok((mnemonic, Condition::Al, true));
    }
  }

  match Mnemonic::from_str(text) {
    Ok(mnemonic) => Ok((mnemonic, Condition::Al, false)),
    Err(_e)      => Err(unknown()),
  }
}

// endregion

/// Checks a register index parsed from source against the register file size.
fn check_register(op: &'static str, token: &str, index: u8) -> Result<u8, AssemblyError> {
  match (index as usize) < MAX_REGISTER {
    true  => Ok(index),
    false => Err(AssemblyError::MalformedOperand { op, operand: token.to_string() }),
  }
}

/// Classifies `token` and requires an in-range register.
fn expect_register(op: &'static str, token: &str) -> Result<u8, AssemblyError> {
  match classify_operand(op, token)? {
    Operand::Register(index) => check_register(op, token, index),
    _operand => Err(AssemblyError::ExpectedRegister { op, operand: token.to_string() }),
  }
}

/// Carries the label state of a single `assemble` call.
struct Assembler {
  /// Label definitions, name to instruction slot.
  labels     :  HashMap<String, Word>,
  /// Instructions whose immediate awaits a label, slot to name.
  set_labels :  HashMap<usize, String>,
  /// Running instruction counter, in slots.
  pc         :  usize,
}

impl Assembler {

  fn new() -> Assembler {
    Assembler {
      labels     :  HashMap::new(),
      set_labels :  HashMap::new(),
      pc         :  0,
    }
  }

  fn assemble(mut self, source: &str) -> Result<Vec<u8>, AssemblyError> {
    let mut instructions: Vec<Instruction> = Vec::new();

    for line in source.lines() {
      match parse_line(line) {

        Line::Blank => {}

        Line::Label(name) => {
          self.define_label(name)?;
        }

        Line::Instruction { mnemonic, operands } => {
          let parsed = self.parse_instruction(mnemonic, &operands)?;
          // Pseudo-ops expand to more than one slot.
          self.pc += parsed.len();
          instructions.extend(parsed);
        }

      }
    }

    self.link(&mut instructions)?;

    let mut code = Vec::with_capacity(instructions.len() * 4);
    for instr in &instructions {
      code.extend_from_slice(&encode_instruction(instr)?.to_be_bytes());
    }
    Ok(code)
  }

  /// Records a label as an alias for the next instruction's slot.
  fn define_label(&mut self, name: &str) -> Result<(), AssemblyError> {
    if self.labels.insert(name.to_string(), self.pc as Word).is_some() {
      return Err(AssemblyError::DuplicateLabel(name.to_string()));
    }
    Ok(())
  }

  /// Rewrites every recorded instruction slot with its label's address.
  fn link(&self, instructions: &mut [Instruction]) -> Result<(), AssemblyError> {
    for (&slot, name) in &self.set_labels {
      let address = self.labels.get(name)
        .ok_or_else(|| AssemblyError::UnknownLabel(name.clone()))?;
      instructions[slot].immediate = true;
      instructions[slot].value = *address;
    }
    Ok(())
  }

  /// Parses one instruction line into the instruction(s) it assembles to.
  fn parse_instruction(&mut self, mnemonic_text: &str, operands: &[&str])
    -> Result<Vec<Instruction>, AssemblyError>
  {
    let (mnemonic, cond, s_flag) = parse_mnemonic(mnemonic_text)?;

    match mnemonic {
      // Condition and S suffixes do not survive pseudo expansion.
      Mnemonic::Pseudo(pseudo) => self.expand_pseudo(pseudo, operands),
      Mnemonic::Op(op) => {
        Ok(vec![self.parse_operands(op, cond, s_flag, operands)?])
      }
    }
  }

  /**
    Expands a pseudo-op into its two-instruction sequence:

      push rd  ->  sub sp, sp, #1 ; stm rd, sp
      pop rd   ->  ldm rd, sp ; add sp, sp, #1
  */
  fn expand_pseudo(&self, pseudo: PseudoOp, operands: &[&str])
    -> Result<Vec<Instruction>, AssemblyError>
  {
    let op_name: &'static str = pseudo.into();
    if operands.len() != 1 {
      return Err(AssemblyError::ArityMismatch { op: op_name, want: 1, got: operands.len() });
    }
    let dst = expect_register(op_name, operands[0])?;

    let bump = |op: Opcode| Instruction {
      op,
      dst: SP,
      ops1: SP,
      immediate: true,
      value: 1,
      ..Instruction::default()
    };
    let transfer = |op: Opcode| Instruction {
      op,
      dst,
      ops1: SP,
      ..Instruction::default()
    };

    match pseudo {
      PseudoOp::Push => Ok(vec![bump(Opcode::Sub), transfer(Opcode::Stm)]),
      PseudoOp::Pop  => Ok(vec![transfer(Opcode::Ldm), bump(Opcode::Add)]),
    }
  }

  /// Parses the operand list of a real opcode into its instruction record.
  fn parse_operands(&mut self, op: Opcode, cond: Condition, s_flag: bool, operands: &[&str])
    -> Result<Instruction, AssemblyError>
  {
    let op_name: &'static str = op.into();
    if operands.len() != op.arity() {
      return Err(AssemblyError::ArityMismatch {
        op:   op_name,
        want: op.arity(),
        got:  operands.len()
      });
    }

    let mut instr = Instruction { cond, s_flag, op, ..Instruction::default() };

    match op {

      Opcode::Cmp => {
        instr.dst  = expect_register(op_name, operands[0])?;
        instr.ops1 = expect_register(op_name, operands[1])?;
      }

      | Opcode::Mov
      | Opcode::Ldm
      | Opcode::Stm => {
        instr.dst = expect_register(op_name, operands[0])?;
        // The source position accepts a register, an immediate, or a label.
        match classify_operand(op_name, operands[1])? {
          Operand::Register(index) => {
            instr.ops1 = check_register(op_name, operands[1], index)?;
          }
          Operand::Immediate(value) => {
            instr.immediate = true;
            instr.value = value;
          }
          Operand::Label(name) => {
            // Left as a zero immediate until `link` fills the address in.
            self.set_labels.insert(self.pc, name.to_string());
          }
        }
      }

      Opcode::Call => {
        match classify_operand(op_name, operands[0])? {
          Operand::Label(name) => {
            self.set_labels.insert(self.pc, name.to_string());
          }
          Operand::Immediate(value) => {
            instr.immediate = true;
            instr.value = value;
          }
          Operand::Register(_index) => {
            return Err(AssemblyError::MalformedOperand {
              op:      op_name,
              operand: operands[0].to_string()
            });
          }
        }
      }

      Opcode::Ret => {}

      // Three-operand data processing: add, sub, rsb, mul, div, and, xor, orr,
      // lsl, lsr.
      _three_operand => {
        instr.dst  = expect_register(op_name, operands[0])?;
        instr.ops1 = expect_register(op_name, operands[1])?;
        match classify_operand(op_name, operands[2])? {
          Operand::Register(index) => {
            instr.ops2 = check_register(op_name, operands[2], index)?;
          }
          Operand::Immediate(value) => {
            instr.immediate = true;
            instr.value = value;
          }
          // A label is only legal where an immediate address stands alone.
          Operand::Label(_name) => {
            return Err(AssemblyError::MalformedOperand {
              op:      op_name,
              operand: operands[2].to_string()
            });
          }
        }
      }

    }

    Ok(instr)
  }

}
