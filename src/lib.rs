/*!

  TinyVM is an ARM-inspired register virtual machine with a companion assembler.

  A source program in a small textual assembly dialect is translated into a
  stream of fixed-width 32-bit big-endian instruction words, which a register
  machine interpreter then executes against sixteen 32-bit registers and a flat
  word-addressable memory. The byte stream is the sole contract between the two
  halves:

  ```text
  source text -> [assembler] -> bytecode -> [vm] -> final register/memory state
  ```

  The interesting machinery lives at that contract: a 12-bit rotate-right
  immediate encoding, condition codes carried by a single signed condition word
  rather than processor flags, and a branch model where writing the program
  counter register is the only jump.

*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod assembler;
pub mod bytecode;
pub mod errors;
pub mod vm;

/// Version of the machine, as reported by the command line driver.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
