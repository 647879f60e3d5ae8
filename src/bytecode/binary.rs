/*!
  This module is responsible for the encoding and decoding of binary instructions.

  The 32-bit big-endian instruction word is laid out as follows:

  ```text
   31..28 | 27    | 26..25 | 24     | 23..20 | 19..16 | 15..12 | 11..8 | 7..0
   cond   | S-flg | (rsvd) | I-flag | opcode | Dst    | Ops1   | Ops2  |
                                                               |     imm12    |
  ```

  When the I-flag is set, bits 11..0 hold a 12-bit immediate instead of Ops2: a
  4-bit rotation count in bits 11..8 and an 8-bit value in bits 7..0. The
  represented constant is the 8-bit value rotated right by twice the rotation
  count. A 32-bit integer is encodable if and only if some rotation brings it
  into a single byte.
*/

use crate::errors::AssemblyError;
use super::instruction::{Condition, Instruction, Opcode, Word};

// If you change these you must also change `encode_instruction` and
// `try_decode_instruction`.
pub const COND_POS           :  Word  = 28;
pub const S_FLAG_POS         :  Word  = 27;
pub const IMMEDIATE_FLAG_POS :  Word  = 24;
pub const OPCODE_POS         :  Word  = 20;
pub const DST_POS            :  Word  = 16;
pub const OPS1_POS           :  Word  = 12;
pub const OPS2_POS           :  Word  = 8;
pub const ROTATE_POS         :  Word  = 8;

/// Is the bit at `bit` set in `n`?
fn is_set(n: Word, bit: Word) -> bool {
  (n >> bit) & 1 == 1
}

/// Extracts the `bits`-wide field of `n` starting at `offset`.
fn get_bits(n: Word, offset: Word, bits: Word) -> Word {
  (n >> offset) & ((1 << bits) - 1)
}

/**
  Encodes the instruction into its 32-bit word. Fails only when the instruction
  carries an immediate that no rotation can fit into the 8+4 representation.
*/
pub fn encode_instruction(instr: &Instruction) -> Result<Word, AssemblyError> {
  let mut encoded: Word = 0;
  encoded |= instr.cond.code()     << COND_POS;
  encoded |= instr.op.code()       << OPCODE_POS;
  encoded |= (instr.dst  as Word)  << DST_POS;
  encoded |= (instr.ops1 as Word)  << OPS1_POS;

  if instr.s_flag {
    encoded |= 1 << S_FLAG_POS;
  }

  match instr.immediate {

    true  => {
      encoded |= 1 << IMMEDIATE_FLAG_POS;
      let immediate =
        encode_immediate(instr.value).ok_or(
          AssemblyError::UnencodableConstant {
            op    :  instr.op.into(),
            value :  instr.value
          }
        )?;
      encoded |= immediate;
    }

    false => {
      encoded |= (instr.ops2 as Word) << OPS2_POS;
    }

  }

  Ok(encoded)
}

/**
  Decodes a 32-bit word back into an `Instruction`, the inverse of
  `encode_instruction`. Returns `None` when the condition field holds a value with
  no corresponding condition code. Every value of the 4-bit opcode field is a
  valid opcode, so the opcode itself cannot fail to decode.
*/
pub fn try_decode_instruction(word: Word) -> Option<Instruction> {
  let cond = match Condition::try_from(get_bits(word, COND_POS, 4) as u8) {
    Ok(cond) => cond,
    Err(_e)  => { return None; }
  };
  let op = match Opcode::try_from(get_bits(word, OPCODE_POS, 4) as u8) {
    Ok(op)  => op,
    Err(_e) => { return None; }
  };

  let immediate = is_set(word, IMMEDIATE_FLAG_POS);

  Some(Instruction {
    cond,
    s_flag: is_set(word, S_FLAG_POS),
    op,
    dst:  get_bits(word, DST_POS, 4) as u8,
    ops1: get_bits(word, OPS1_POS, 4) as u8,
    // With the I-flag set, bits 11..8 are the rotation count, not a register.
    ops2: match immediate {
      true  => 0,
      false => get_bits(word, OPS2_POS, 4) as u8,
    },
    immediate,
    value: match immediate {
      true  => decode_immediate(get_bits(word, 0, 12)),
      false => 0,
    },
  })
}

/**
  Encodes a 32-bit constant as a 12-bit immediate: an 8-bit value and a 4-bit
  rotate-right count (applied doubled). The rotations are enumerated in order and
  the first that lands the constant in a byte wins, so encoding is deterministic.
  Returns `None` for constants outside the representable set.
*/
pub fn encode_immediate(n: Word) -> Option<Word> {
  for rotate in 0..16 {
    let m = n.rotate_left(rotate * 2);
    if m < 256 {
      return Some((rotate << ROTATE_POS) | m);
    }
  }
  None
}

/// Expands a 12-bit immediate field back into the 32-bit constant it represents.
pub fn decode_immediate(n: Word) -> Word {
  let rotate = get_bits(n, ROTATE_POS, 4);
  get_bits(n, 0, 8).rotate_right(rotate * 2)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::instruction::Condition;

  #[test]
  fn immediate_round_trip() {
    for value in [0u32, 1, 2, 127, 255, 256, 260, 1020, 0x3F0, 0xFF00_0000, 0xF000_000F] {
      let encoded = encode_immediate(value)
        .unwrap_or_else(|| panic!("{} should be encodable", value));
      assert!(encoded <= 0xFFF);
      assert_eq!(decode_immediate(encoded), value);
    }
  }

  #[test]
  fn immediate_picks_first_rotation() {
    // 260 needs the full rotation sweep: value 65 rotated right by 30.
    assert_eq!(encode_immediate(260), Some((15 << 8) | 65));
    // 256 is a byte rotated right by 24.
    assert_eq!(encode_immediate(256), Some((12 << 8) | 1));
  }

  #[test]
  fn unencodable_immediates() {
    // 258 and 0x101 set bits that no even rotation brings into one byte.
    assert_eq!(encode_immediate(258), None);
    assert_eq!(encode_immediate(0x101), None);
    assert_eq!(encode_immediate(u32::MAX), None);
  }

  #[test]
  fn instruction_round_trip_register_form() {
    let instr = Instruction {
      cond: Condition::Gte,
      op:   Opcode::Add,
      dst:  3,
      ops1: 4,
      ops2: 5,
      ..Instruction::default()
    };
    let word = encode_instruction(&instr).unwrap();
    assert_eq!(try_decode_instruction(word), Some(instr));
  }

  #[test]
  fn instruction_round_trip_immediate_form() {
    let instr = Instruction {
      op:        Opcode::Mov,
      dst:       1,
      immediate: true,
      value:     260,
      ..Instruction::default()
    };
    let word = encode_instruction(&instr).unwrap();
    assert!(is_set(word, IMMEDIATE_FLAG_POS));
    assert_eq!(try_decode_instruction(word), Some(instr));
  }

  #[test]
  fn instruction_round_trip_s_flag() {
    let instr = Instruction {
      op:        Opcode::Sub,
      s_flag:    true,
      dst:       0,
      ops1:      0,
      immediate: true,
      value:     1,
      ..Instruction::default()
    };
    let word = encode_instruction(&instr).unwrap();
    assert_eq!(try_decode_instruction(word), Some(instr));
  }

  #[test]
  fn unencodable_constant_is_an_error() {
    let instr = Instruction {
      op:        Opcode::Mov,
      immediate: true,
      value:     258,
      ..Instruction::default()
    };
    assert_eq!(
      encode_instruction(&instr),
      Err(AssemblyError::UnencodableConstant { op: "mov", value: 258 })
    );
  }

  #[test]
  fn bad_condition_field_fails_to_decode() {
    // Condition codes stop at 6; 0b1111 in the condition field is garbage.
    let word: Word = 0xF << COND_POS;
    assert_eq!(try_decode_instruction(word), None);
  }
}
