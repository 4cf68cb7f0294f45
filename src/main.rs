use std::io::{self, BufRead, Write};
use std::process::exit;

use loon::config::{Cli, VmConfig};
use loon::vm::{InterpretResult, Vm};
use structopt::clap::ErrorKind;
use structopt::StructOpt;

fn main() {
    let cli = match Cli::from_args_safe() {
        Ok(cli) => cli,
        Err(e) => {
            print!("{}", e.message);
            match e.kind {
                ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => exit(0),
                _ => exit(64),
            }
        }
    };
    let config = VmConfig::from(&cli);
    let mut vm = Vm::new(config);
    vm.output.set_buffered(cli.buffered_output);

    let exit_code = match &cli.path {
        Some(path) => run_file(&mut vm, path),
        None => {
            repl(&mut vm);
            0
        }
    };

    vm.output.flush();
    if cli.report_memory {
        println!("Unreclaimed memory: {} bytes", vm.heap.bytes_allocated);
    }
    exit(exit_code);
}

fn repl(vm: &mut Vm) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return;
        }
        match lines.next() {
            Some(Ok(line)) => {
                vm.interpret(&line);
            }
            _ => {
                println!();
                return;
            }
        }
    }
}

fn run_file(vm: &mut Vm, path: &std::path::PathBuf) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path.display());
            return 74;
        }
    };

    match vm.interpret(&source) {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 65,
        InterpretResult::RuntimeError => 70,
    }
}
