/*!

  The VM uses a 32 bit big-endian word size, and every instruction is exactly one
  word. The program counter therefore counts in 4-byte instruction slots, not
  bytes. The sizes of the instruction components are as follows:

    Condition:  4 bits
    S flag:     1 bit
    (reserved): 2 bits
    I flag:     1 bit
    Opcode:     4 bits
    Dst:        4 bits
    Ops1:       4 bits
    Ops2:       4 bits  (overlaid by the immediate's rotation when I is set)
    Immediate: 12 bits  (4-bit rotate-right count + 8-bit value)

  Labels do not appear explicitly in the bytecode. They are symbolic aliases for
  instruction slots, resolved by the assembler before encoding; a branch arrives
  here as an ordinary immediate.

  One design decision that needed to be made is whether to store the components of
  an instruction as data members of enum variants, with one variant per opcode.
  Because every instruction of this machine carries the same field set and differs
  only in which fields it reads, a single plain struct wastes nothing and keeps the
  encoder and decoder symmetrical. An enum is only used for the opcode itself, and
  inhabits a single byte.

*/

mod binary;
mod instruction;

pub use binary::{encode_instruction, try_decode_instruction,
                 encode_immediate, decode_immediate};
pub use instruction::{Condition, Instruction, Mode, Opcode, Word,
                      MAX_REGISTER, LR, PC, SP};
