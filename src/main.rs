/*!
  The command line driver: reads an assembly source file, assembles it, and runs
  the result on a fresh machine. Everything interesting happens in the library;
  this file only moves bytes between the filesystem, the flags, and the VM.
*/

use std::fs;
use std::process;

use clap::{Arg, ArgAction, Command};

use tinyvm::assembler::assemble;
use tinyvm::bytecode::MAX_REGISTER;
use tinyvm::vm::{Target, VM};
use tinyvm::VERSION;

fn command() -> Command {
  let mut command = Command::new("tinyvm")
    .version(VERSION)
    .about("An ARM-inspired register virtual machine and assembler")
    .arg(
      Arg::new("file")
        .value_name("FILE")
        .required(true)
        .help("assembly source file to run"),
    )
    .arg(
      Arg::new("vmstats")
        .long("vmstats")
        .action(ArgAction::SetTrue)
        .help("display virtual machine stats after execution"),
    )
    .arg(
      Arg::new("printcode")
        .long("printcode")
        .action(ArgAction::SetTrue)
        .help("print the compiled code in hex and binary"),
    )
    .arg(
      Arg::new("debug")
        .long("debug")
        .action(ArgAction::SetTrue)
        .help("print debug information during execution"),
    );

  // One seed flag per register, as in --r7=42.
  for index in 0..MAX_REGISTER {
    let name = format!("r{}", index);
    command = command.arg(
      Arg::new(name.clone())
        .long(name)
        .value_name("INT")
        .value_parser(clap::value_parser!(i64))
        .allow_hyphen_values(true)
        .help(format!("sets the r{} register prior to execution", index)),
    );
  }

  command
}

fn main() {
  let matches = command().get_matches();

  println!("TinyVM {}", VERSION);

  let path = matches.get_one::<String>("file").expect("FILE is required");
  let source = match fs::read_to_string(path) {
    Ok(source) => source,
    Err(e) => {
      eprintln!("{}: {}", path, e);
      process::exit(1);
    }
  };

  let code = match assemble(&source) {
    Ok(code) => code,
    Err(e) => {
      eprintln!("{}", e);
      process::exit(1);
    }
  };

  if matches.get_flag("printcode") {
    print_code(&code);
  }

  let mut vm = VM::new(matches.get_flag("debug"));
  for index in 0..MAX_REGISTER {
    if let Some(value) = matches.get_one::<i64>(&format!("r{}", index)) {
      // Seeds are plain integers; negatives wrap like any other 32-bit value.
      if let Err(e) = vm.set(Target::Reg, index as u32, *value as u32) {
        eprintln!("{}", e);
        process::exit(1);
      }
    }
  }

  if let Err(e) = vm.exec(&code) {
    eprintln!("{}", e);
    process::exit(1);
  }

  match vm.get(Target::Reg, 0) {
    Ok(value) => println!("exit: {}", value),
    Err(e) => {
      eprintln!("{}", e);
      process::exit(1);
    }
  }

  if matches.get_flag("vmstats") {
    vm.stats();
  }
}

/// Dumps the encoded program: all bytes in hex, then word by word in binary.
fn print_code(code: &[u8]) {
  print!("(len={}) ", code.len());
  for byte in code {
    print!("{:02x}", byte);
  }
  println!();

  for word in code.chunks(4) {
    for byte in word {
      print!("{:08b}", byte);
    }
    print!(" ");
  }
  println!();
}
