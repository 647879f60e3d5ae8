/*!
  Structures and functions for the Tiny Virtual Machine: a register machine with
  sixteen 32-bit registers and a flat word-addressable memory whose top end serves
  as the program stack.

  Control state is deliberately small. There is no NZCV flag register; a single
  signed condition word, latched by `cmp` or by an S-flagged instruction and
  consumed by the next instruction's condition check, carries all conditional
  state. Return addresses live on a call stack internal to `exec`, never in
  program-visible memory.
*/

use std::fmt::{Display, Formatter};

use prettytable::{format as TableFormat, Table};
use strum_macros::Display as StrumDisplay;

use crate::bytecode::{try_decode_instruction, Condition, Instruction, Mode, Opcode, Word,
                      MAX_REGISTER, PC, SP};
use crate::errors::RuntimeError;

/// Size of memory in words. The stack pointer starts at the top and grows down.
pub const STACK_SIZE: usize = 1024;
/// Maximum depth of the internal call stack.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Access targets for `VM::set` and `VM::get`. `Dec` passes the location through
/// unchanged so that literals travel the same path as register and memory reads.
/// `Stack` is not backed by a segment of its own; the program stack is reached
/// through `sp` with explicit memory transfers.
#[derive(
  StrumDisplay,
  Clone,        Copy, Eq, PartialEq, Debug
)]
#[strum(serialize_all = "lowercase")]
pub enum Target {
  Reg,
  Mem,
  Dec,
  Stack,
}

pub struct VM {

  // Memory stores //
  registers :  [Word; MAX_REGISTER], // General purpose registers; r13 = sp, r15 = pc
  memory    :  Vec<Word>,            // Flat word-addressable memory, stack at the top

  debug     :  bool,                 // Per-instruction tracing to stderr

}

impl VM {

  // region Low-level utility methods

  /// Returns a new initialised VM with the stack pointer at the top of memory.
  pub fn new(debug: bool) -> VM {
    let mut vm = VM {
      registers :  [0; MAX_REGISTER],
      memory    :  vec![0; STACK_SIZE],
      debug,
    };
    vm.registers[SP as usize] = (STACK_SIZE - 1) as Word;
    vm
  }

  /// Sets the value at the receiver's location. Only registers and memory can be
  /// written.
  pub fn set(&mut self, target: Target, loc: Word, value: Word) -> Result<(), RuntimeError> {
    match target {

      Target::Reg => {
        match self.registers.get_mut(loc as usize) {
          Some(register) => {
            *register = value;
            Ok(())
          }
          None => Err(RuntimeError::MemoryOutOfRange { segment: Target::Reg, loc }),
        }
      }

      Target::Mem => self.write_memory(loc, value),

      target => Err(RuntimeError::InvalidTarget(target)),

    }
  }

  /// Retrieves the value from the given target's location.
  pub fn get(&self, target: Target, loc: Word) -> Result<Word, RuntimeError> {
    match target {

      Target::Reg => {
        match self.registers.get(loc as usize) {
          Some(register) => Ok(*register),
          None => Err(RuntimeError::MemoryOutOfRange { segment: Target::Reg, loc }),
        }
      }

      Target::Mem => self.read_memory(loc),

      Target::Dec => Ok(loc),

      Target::Stack => Err(RuntimeError::InvalidTarget(Target::Stack)),

    }
  }

  fn read_memory(&self, address: Word) -> Result<Word, RuntimeError> {
    match self.memory.get(address as usize) {
      Some(value) => Ok(*value),
      None => Err(RuntimeError::MemoryOutOfRange { segment: Target::Mem, loc: address }),
    }
  }

  fn write_memory(&mut self, address: Word, value: Word) -> Result<(), RuntimeError> {
    match self.memory.get_mut(address as usize) {
      Some(cell) => {
        *cell = value;
        Ok(())
      }
      None => Err(RuntimeError::MemoryOutOfRange { segment: Target::Mem, loc: address }),
    }
  }

  /// The first source: the immediate or the `ops1` register. For `mov`, `ldm`,
  /// and `stm` this is the instruction's single source.
  fn ops1_value(&self, instr: &Instruction) -> Word {
    match instr.immediate {
      true  => instr.value,
      false => self.registers[instr.ops1 as usize],
    }
  }

  /// The second source: the immediate or the `ops2` register.
  fn ops2_value(&self, instr: &Instruction) -> Word {
    match instr.immediate {
      true  => instr.value,
      false => self.registers[instr.ops2 as usize],
    }
  }

  // endregion

  // region Execution

  /**
    Executes the given bytecode until the program counter walks off the end of
    the code, or until `ret` runs with no caller to return to.

    The register file and memory are left as of the last executed instruction,
    also when an error cuts execution short, so the caller can inspect the
    machine afterward through `get`.
  */
  pub fn exec(&mut self, code: &[u8]) -> Result<(), RuntimeError> {
    // Return addresses, private to this call. Never visible to the program.
    let mut call_stack: Vec<Word> = Vec::new();
    // The condition word. Latched by cmp or an S-flagged instruction, consumed
    // and cleared by the following instruction's condition check.
    let mut condition_value: i32 = 0;

    let mut byte_pos = self.registers[PC as usize] as usize * 4;
    while byte_pos < code.len() {
      if byte_pos + 4 > code.len() {
        return Err(RuntimeError::TruncatedCode(byte_pos));
      }

      let word = Word::from_be_bytes([
        code[byte_pos],
        code[byte_pos + 1],
        code[byte_pos + 2],
        code[byte_pos + 3],
      ]);
      let instr = match try_decode_instruction(word) {
        Some(instr) => instr,
        None        => { return Err(RuntimeError::InvalidOpcode(word)); }
      };

      // `pc` is the local slot counter; `branch_base` detects a rewritten r15.
      let mut pc = self.registers[PC as usize];
      let branch_base = pc;

      if self.debug {
        eprintln!("instruction: {:032b}", word);
        eprintln!("state: cv={}", condition_value);
        eprintln!("{}  (pc={} dst=r{} ops1=r{} ops2=r{} I={} S={})",
                  instr, pc, instr.dst, instr.ops1, instr.ops2,
                  instr.immediate, instr.s_flag);
      }

      let skip = match instr.cond {
        Condition::Al  => false,
        Condition::Eq  => condition_value != 0,
        Condition::Ne  => condition_value == 0,
        Condition::Lt  => condition_value >= 0,
        Condition::Gt  => condition_value <= 0,
        Condition::Lte => condition_value < 0,
        Condition::Gte => condition_value > 0,
      };
      // The condition word lives across exactly one instruction boundary.
      condition_value = 0;

      match skip {

        true => {
          // A skipped instruction still occupies its slot.
          pc += 1;
        }

        false => {
          match instr.mode() {

            Mode::DataProcessing => {
              self.data_processing(&instr, &mut condition_value)?;
              pc += 1;
            }

            Mode::DataTransfer => {
              self.data_transfer(&instr)?;
              pc += 1;
            }

            Mode::Branching => {
              match instr.op {

                Opcode::Call => {
                  if call_stack.len() >= MAX_CALL_DEPTH {
                    return Err(RuntimeError::CallStackOverflow(call_stack.len()));
                  }
                  call_stack.push(pc + 1);
                  self.registers[PC as usize] = instr.value;
                }

                Opcode::Ret => {
                  match call_stack.pop() {
                    Some(address) => { pc = address; }
                    // Returning with no caller ends the program.
                    None          => { return Ok(()); }
                  }
                }

                _op => unreachable!("non-branching opcode dispatched as branching"),
              }
            }

          } // end match on mode

          if instr.s_flag && instr.mode() != Mode::Branching {
            // Latch the written destination for the next instruction.
            condition_value = self.registers[instr.dst as usize] as i32;
          }
        }

      } // end match on skip

      // A branch has already rewritten r15; otherwise the local counter advances
      // it. This lets branches override the program counter without being
      // clobbered.
      if branch_base == self.registers[PC as usize] {
        self.registers[PC as usize] = pc;
      }
      byte_pos = self.registers[PC as usize] as usize * 4;
    } // end loop over instructions

    Ok(())
  }

  fn data_processing(&mut self, instr: &Instruction, condition_value: &mut i32)
    -> Result<(), RuntimeError>
  {
    let dst = instr.dst as usize;

    match instr.op {

      Opcode::Mov => {
        self.registers[dst] = self.ops1_value(instr);
      }

      Opcode::Cmp => {
        // Signed comparison. No register is written.
        let a = self.registers[dst] as i32;
        let b = self.registers[instr.ops1 as usize] as i32;
        *condition_value = a.wrapping_sub(b);
      }

      op => {
        let a = self.registers[instr.ops1 as usize];
        let b = self.ops2_value(instr);
        self.registers[dst] = match op {
          Opcode::Add => a.wrapping_add(b),
          Opcode::Sub => a.wrapping_sub(b),
          Opcode::Rsb => b.wrapping_sub(a),
          Opcode::Mul => a.wrapping_mul(b),

          Opcode::Div => {
            if b == 0 {
              return Err(RuntimeError::DivisionByZero { op: op.into() });
            }
            a / b
          }

          Opcode::And => a & b,
          Opcode::Xor => a ^ b,
          Opcode::Orr => a | b,

          // A shift by 32 or more drains every bit.
          Opcode::Lsl => a.checked_shl(b).unwrap_or(0),
          Opcode::Lsr => a.checked_shr(b).unwrap_or(0),

          _op => unreachable!("non-data-processing opcode dispatched as data processing"),
        };
      }

    }

    Ok(())
  }

  fn data_transfer(&mut self, instr: &Instruction) -> Result<(), RuntimeError> {
    let address = self.ops1_value(instr);

    match instr.op {

      Opcode::Ldm => {
        self.registers[instr.dst as usize] = self.read_memory(address)?;
      }

      Opcode::Stm => {
        self.write_memory(address, self.registers[instr.dst as usize])?;
      }

      _op => unreachable!("non-transfer opcode dispatched as data transfer"),
    }

    Ok(())
  }

  // endregion

  // region Display methods

  fn make_register_table(&self) -> Table {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Register", ubl->"Contents"]);

    for (index, value) in self.registers.iter().enumerate() {
      table.add_row(row![r->format!("r{} =", index), format!("{}", value)]);
    }
    table
  }

  /**
    Prints the machine's internal statistics: the register file, then every
    memory word as big-endian bytes with a printable-ASCII gloss.
  */
  pub fn stats(&self) {
    println!("regs:");
    println!("{}", self.make_register_table());

    println!("mem:");
    for (address, value) in self.memory.iter().enumerate() {
      let bytes = value.to_be_bytes();
      let gloss: String =
        bytes.iter()
             .map(|b| match *b {
               0 => '.',
               b if b.is_ascii_graphic() || b == b' ' => b as char,
               _unprintable => '?',
             })
             .collect();
      println!("{:04}: {:02x} {:02x} {:02x} {:02x}  {}",
               address, bytes[0], bytes[1], bytes[2], bytes[3], gloss);
    }
    println!();
  }

  // endregion

}

impl Display for VM {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.make_register_table())
  }
}

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::assembler::assemble;

  /// Assembles and runs `source` on a fresh machine.
  fn run(source: &str) -> VM {
    let code = assemble(source).expect("assembly failed");
    let mut vm = VM::new(false);
    vm.exec(&code).expect("execution failed");
    vm
  }

  fn register(vm: &VM, index: Word) -> Word {
    vm.get(Target::Reg, index).unwrap()
  }

  #[test]
  fn data_processing_results() {
    // Each program leaves its result in r0.
    for (i, (source, expected)) in [
      ("mov r0 #10",              10),
      ("add r0 r0 #1",            1),
      ("mov r0 #2\nsub r0 r0 #1", 1),
      ("mov r0 #1\nrsb r0 r0 #2", 1),
      ("mov r0 #2\nmul r0 r0 #2", 4),
      ("mov r0 #2\ndiv r0 r0 #2", 1),
      ("mov r0 #1\nand r0 r0 #2", 0),
      ("mov r0 #2\nxor r0 r0 #1", 3),
      ("mov r0 #1\norr r0 r0 #2", 3),
      ("mov r0 #1\nlsl r0 r0 #1", 2),
      ("mov r0 #2\nlsr r0 r0 #1", 1),
    ].iter().enumerate() {
      assert_eq!(register(&run(source), 0), *expected, "case {} failed: {}", i, source);
    }
  }

  #[test]
  fn subtraction_wraps() {
    let vm = run("sub r0 r0 #1");
    assert_eq!(register(&vm, 0), u32::MAX);
  }

  #[test]
  fn shift_counts_past_the_word_drain_it() {
    let vm = run("mov r0 #1\nmov r1 #40\nlsl r0 r0 r1");
    assert_eq!(register(&vm, 0), 0);
  }

  #[test]
  fn push_grows_the_stack_downward() {
    let vm = run("mov r0 #1\npush r0\npush r0");
    assert_eq!(register(&vm, 0), 1);
    assert_eq!(register(&vm, SP as Word), (STACK_SIZE - 3) as Word);
    assert_eq!(vm.get(Target::Mem, (STACK_SIZE - 2) as Word).unwrap(), 1);
    assert_eq!(vm.get(Target::Mem, (STACK_SIZE - 3) as Word).unwrap(), 1);
  }

  #[test]
  fn push_then_pop_restores_the_stack_pointer() {
    let vm = run("mov r0 #1\npush r0\npop r1");
    assert_eq!(register(&vm, 0), 1);
    assert_eq!(register(&vm, 1), 1);
    assert_eq!(register(&vm, SP as Word), (STACK_SIZE - 1) as Word);
  }

  #[test]
  fn load_and_store_round_trip_through_memory() {
    let vm = run("mov r0 #77\nstm r0 #5\nldm r1 #5");
    assert_eq!(register(&vm, 1), 77);
    assert_eq!(vm.get(Target::Mem, 5).unwrap(), 77);
  }

  #[test]
  fn call_and_ret_resume_after_the_call() {
    let source = "mov r1 #3\n\
                  call double\n\
                  mov r0 r1\n\
                  mov r15 end\n\
                  double:\n\
                  add r1 r1 r1\n\
                  ret\n\
                  end:";
    let vm = run(source);
    assert_eq!(register(&vm, 0), 6);
  }

  #[test]
  fn ret_without_caller_terminates() {
    let vm = run("mov r0 #9\nret\nmov r0 #1");
    assert_eq!(register(&vm, 0), 9);
  }

  #[test]
  fn cmp_against_equal_values_enables_eq() {
    let vm = run("mov r0 #5\nmov r1 #5\ncmp r0 r1\nmoveq r2 #1");
    assert_eq!(register(&vm, 2), 1);
    // cmp writes no register.
    assert_eq!(register(&vm, 0), 5);
    assert_eq!(register(&vm, 1), 5);
  }

  #[test]
  fn condition_word_lives_one_instruction() {
    // cmp latches 1; the first movne consumes it, the second sees it cleared.
    let vm = run("mov r0 #2\nmov r1 #1\ncmp r0 r1\nmovne r2 #1\nmovne r3 #1");
    assert_eq!(register(&vm, 2), 1);
    assert_eq!(register(&vm, 3), 0);
  }

  #[test]
  fn skipped_instructions_write_nothing() {
    // cv = -1, so the gt form is skipped and the lt form runs.
    let vm = run("mov r0 #1\nmov r1 #2\ncmp r0 r1\nmovgt r2 #7");
    assert_eq!(register(&vm, 2), 0);
    let vm = run("mov r0 #1\nmov r1 #2\ncmp r0 r1\nmovlt r2 #7");
    assert_eq!(register(&vm, 2), 7);
  }

  #[test]
  fn cmp_is_signed() {
    // 0 - 1 wraps to u32::MAX; signed comparison must still see -1.
    let vm = run("sub r0 r0 #1\nmov r1 #0\ncmp r0 r1\nmovlt r2 #1");
    assert_eq!(register(&vm, 2), 1);
  }

  #[test]
  fn s_flag_latches_the_destination() {
    let vm = run("movs r0 #0\nmoveq r1 #1");
    assert_eq!(register(&vm, 1), 1);

    let vm = run("movs r0 #1\nmoveq r1 #1\nmov r2 #1");
    assert_eq!(register(&vm, 1), 0);
    assert_eq!(register(&vm, 2), 1);
  }

  #[test]
  fn fibonacci_with_a_conditional_loop() {
    let source = "mov r1 #1\n\
                  mov r2 #0\n\
                  mov r3 #4\n\
                  loop:\n\
                  cmp r3 r4\n\
                  moveq r15 end\n\
                  add r5 r1 r2\n\
                  mov r2 r1\n\
                  mov r1 r5\n\
                  sub r3 r3 #1\n\
                  mov r15 loop\n\
                  end:\n\
                  mov r0 r1";
    let vm = run(source);
    assert_eq!(register(&vm, 1), 5);
    assert_eq!(register(&vm, 0), 5);
  }

  #[test]
  fn seeded_registers_are_visible_to_the_program() {
    let code = assemble("add r0 r3 #1").unwrap();
    let mut vm = VM::new(false);
    vm.set(Target::Reg, 3, 41).unwrap();
    vm.exec(&code).unwrap();
    assert_eq!(register(&vm, 0), 42);
  }

  #[test]
  fn dec_target_passes_literals_through() {
    let vm = VM::new(false);
    assert_eq!(vm.get(Target::Dec, 123).unwrap(), 123);
  }

  #[test]
  fn stack_target_is_rejected() {
    let mut vm = VM::new(false);
    assert_eq!(vm.get(Target::Stack, 0), Err(RuntimeError::InvalidTarget(Target::Stack)));
    assert_eq!(vm.set(Target::Stack, 0, 1), Err(RuntimeError::InvalidTarget(Target::Stack)));
  }

  #[test]
  fn register_access_is_bounds_checked() {
    let vm = VM::new(false);
    assert_eq!(
      vm.get(Target::Reg, 16),
      Err(RuntimeError::MemoryOutOfRange { segment: Target::Reg, loc: 16 })
    );
  }

  #[test]
  fn division_by_zero_is_fatal_but_keeps_state() {
    let code = assemble("mov r0 #4\ndiv r1 r0 r2").unwrap();
    let mut vm = VM::new(false);
    assert_eq!(vm.exec(&code), Err(RuntimeError::DivisionByZero { op: "div" }));
    assert_eq!(register(&vm, 0), 4);
  }

  #[test]
  fn memory_access_is_bounds_checked() {
    let code = assemble("mov r0 #2000\nstm r1 r0").unwrap();
    let mut vm = VM::new(false);
    assert_eq!(
      vm.exec(&code),
      Err(RuntimeError::MemoryOutOfRange { segment: Target::Mem, loc: 2000 })
    );
  }

  #[test]
  fn unbounded_recursion_overflows_the_call_stack() {
    let code = assemble("fun:\ncall fun").unwrap();
    let mut vm = VM::new(false);
    assert_eq!(vm.exec(&code), Err(RuntimeError::CallStackOverflow(MAX_CALL_DEPTH)));
  }

  #[test]
  fn truncated_code_is_an_error() {
    let mut vm = VM::new(false);
    assert_eq!(vm.exec(&[0, 0, 0]), Err(RuntimeError::TruncatedCode(0)));
  }

  #[test]
  fn garbage_words_fail_to_decode() {
    let mut vm = VM::new(false);
    let word: Word = 0xF000_0000;
    assert_eq!(vm.exec(&word.to_be_bytes()), Err(RuntimeError::InvalidOpcode(word)));
  }
}
