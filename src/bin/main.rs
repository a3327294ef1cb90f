//! CLI over the filter assembler boundary

use seccomp_policy_compiler::bpf::{asm, opcodes};
use seccomp_policy_compiler::CompilerResult;

fn main() -> CompilerResult<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let mut disassemble = false;
    let mut input_file = None;
    let mut output_file = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => disassemble = true,
            "-o" => {
                i += 1;
                output_file = args.get(i).cloned();
            }
            other => input_file = Some(other.to_string()),
        }
        i += 1;
    }
    let input_file = match input_file {
        Some(path) => path,
        None => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    if disassemble {
        let bytes = std::fs::read(&input_file)?;
        let program = asm::decode(&bytes)?;
        let text = asm::disassemble(&program)?;
        match output_file {
            Some(path) => std::fs::write(path, text)?,
            None => print!("{}", text),
        }
    } else {
        let text = std::fs::read_to_string(&input_file)?;
        let program = asm::assemble(&text)?;
        let output = output_file.unwrap_or_else(|| "filter.bpf".to_string());
        std::fs::write(&output, opcodes::encode(&program))?;
        println!("✓ Assembled {} instructions into {}", program.len(), output);
    }

    Ok(())
}

fn print_usage(program: &str) {
    println!("BPF Filter Assembler");
    println!();
    println!("USAGE:");
    println!("    {} <input.s> [-o <output.bpf>]", program);
    println!("    {} -d <input.bpf> [-o <output.s>]", program);
    println!();
    println!("OPTIONS:");
    println!("    -d                  Disassemble a binary filter to text");
    println!("    -o <file>           Output file (assembly defaults to filter.bpf,");
    println!("                        disassembly to stdout)");
    println!();
    println!("EXAMPLES:");
    println!("    {} filter.s", program);
    println!("    {} filter.s -o filter.bpf", program);
    println!("    {} -d filter.bpf", program);
}
