use std::fs;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use isohart_core::hart::csr;
use isohart_core::log_sink::FileLog;
use isohart_core::resources::ram::Ram;
use isohart_core::{Config, Hart};
use log::{debug, info, warn};
use stderrlog::LogLevelNum;

/// Number of instructions executed per `step` call.
const INTERLEAVE: u64 = 5000;

/// `dcsr.ebreakm`, `dcsr.ebreaks` and `dcsr.ebreaku`.
const DCSR_EBREAK_ALL: u64 = (1 << 15) | (1 << 13) | (1 << 12);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Binary file to execute.
    binary: PathBuf,
    /// Load the binary as a raw image at the start of RAM instead of as an ELF file.
    #[arg(long)]
    raw: bool,
    /// ISA string of the hart.
    #[arg(long, default_value = "rv64imafd")]
    isa: String,
    /// Supported privilege modes.
    #[arg(long, default_value = "msu")]
    modes: String,
    /// Base address of RAM.
    #[arg(long, default_value = "0x80000000", value_parser = parse_u64)]
    ram_base: u64,
    /// Size of RAM in bytes.
    #[arg(long, default_value = "0x4000000", value_parser = parse_u64)]
    ram_size: u64,
    /// Stop after this many retired instructions.
    #[arg(short = 'n', long, default_value_t = 100_000_000)]
    max_instructions: u64,
    /// Watch a range for stores, as `BASE:LENGTH`. May be repeated.
    #[arg(short, long = "watch", value_parser = parse_range)]
    watches: Vec<(u64, u64)>,
    /// Also watch loads.
    #[arg(long)]
    watch_loads: bool,
    /// Directory the isolation logs are written to.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
    /// Log every retired register write.
    #[arg(long)]
    commit_log: bool,
    /// Trace every executed instruction. Forces the slow path.
    #[arg(long)]
    trace: bool,
    /// Print the most executed addresses at the end.
    #[arg(long)]
    histogram: bool,
    /// Keep running on `ebreak` instead of halting.
    #[arg(long)]
    no_ebreak_halt: bool,
    /// Log verbosity, repeat for more.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let verbosity = match args.verbose {
        0 => LogLevelNum::Warn,
        1 => LogLevelNum::Info,
        2 => LogLevelNum::Debug,
        _ => LogLevelNum::Trace,
    };
    stderrlog::new()
        .verbosity(verbosity)
        .modules([module_path!(), "isohart_core"])
        .init()
        .map_err(io::Error::other)?;

    let buf = fs::read(&args.binary)?;

    let ram_size = usize::try_from(args.ram_size).map_err(io::Error::other)?;
    let mut ram = Ram::new(args.ram_base, ram_size)
        .ok_or_else(|| io::Error::other("RAM does not fit in the address space"))?;
    let entry = if args.raw {
        load(&mut ram, args.ram_base, &buf)?;
        args.ram_base
    } else {
        load_elf(&mut ram, &buf)?
    };

    let config = Config {
        isa: args.isa.clone(),
        privilege_modes: args.modes.clone(),
        reset_vector: entry,
        commit_log: args.commit_log,
        ..Config::default()
    };
    let mut hart = Hart::new(0, config, ram).map_err(io::Error::other)?;
    hart.set_debug(args.trace);
    hart.set_histogram(args.histogram);
    if !args.no_ebreak_halt {
        let dcsr = hart.get_csr(csr::DCSR).map_err(io::Error::other)?;
        hart.set_csr(csr::DCSR, dcsr | DCSR_EBREAK_ALL)
            .map_err(io::Error::other)?;
    }

    fs::create_dir_all(&args.log_dir)?;
    hart.set_log_sink(Box::new(FileLog::new(&args.log_dir, hart.id())));
    if !args.watches.is_empty() {
        hart.isolation_mut().set_enable_word(1);
        hart.isolation_mut().set_watch_loads(args.watch_loads);
    }
    for &(base, length) in &args.watches {
        hart.isolation_mut().watch(base, length);
    }

    let exit = run(&mut hart, args.max_instructions);
    println!("exit: {exit:?}");
    summarize(&hart);

    Ok(())
}

/// Copies `image` into RAM at `address`.
fn load(ram: &mut Ram, address: u64, image: &[u8]) -> io::Result<()> {
    debug!(
        "loading {:#x} bytes at [{address:#010x}..{:#010x}]",
        image.len(),
        address + image.len() as u64
    );
    match ram.load(address, image) {
        true => Ok(()),
        false => Err(io::Error::other(format!(
            "image at {address:#x} does not fit in RAM"
        ))),
    }
}

/// Copies the allocatable sections of an ELF file into RAM and returns its entry point.
fn load_elf(ram: &mut Ram, program_elf: &[u8]) -> io::Result<u64> {
    let elf_header = goblin::elf::Elf::parse(program_elf).map_err(io::Error::other)?;

    let sections = elf_header
        .section_headers
        .iter()
        .filter(|h| h.is_alloc() && h.sh_type != goblin::elf::section_header::SHT_NOBITS);

    for h in sections {
        debug!(
            "loading section {:?}",
            elf_header.shdr_strtab.get_at(h.sh_name).unwrap_or("?")
        );
        let range = h
            .file_range()
            .ok_or_else(|| io::Error::other("section has no file range"))?;
        let buf = program_elf
            .get(range)
            .ok_or_else(|| io::Error::other("section extends past the end of the file"))?;
        load(ram, h.sh_addr, buf)?;
    }

    Ok(elf_header.entry)
}

/// Why [`run`] stopped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Exit {
    Halted,
    /// A `step` call neither retired an instruction nor moved `pc`, e.g. a trap handler that
    /// faults on its own first instruction. Nothing would change on the next call either.
    Stuck,
    InstructionLimit,
}

/// Steps the hart until it halts, gets stuck, or `max_instructions` have retired.
fn run(hart: &mut Hart<Ram>, max_instructions: u64) -> Exit {
    while hart.state().minstret < max_instructions {
        let before = (hart.state().minstret, hart.registers().pc());
        let remaining = max_instructions - hart.state().minstret;
        hart.step(remaining.min(INTERLEAVE));
        if hart.halted() {
            info!(
                "hart {} halted ({:?}) at {:#x}",
                hart.id(),
                hart.state().dcsr.cause(),
                hart.state().dpc
            );
            return Exit::Halted;
        }
        if before == (hart.state().minstret, hart.registers().pc()) {
            warn!(
                "hart {} is stuck at {:#x} (mcause {:#x})",
                hart.id(),
                before.1,
                hart.get_csr(csr::MCAUSE).unwrap_or_default()
            );
            return Exit::Stuck;
        }
    }
    warn!("instruction limit of {max_instructions} reached");
    Exit::InstructionLimit
}

fn summarize(hart: &Hart<Ram>) {
    let state = hart.state();
    println!("instructions retired: {}", state.minstret);
    println!("pc: {:#x}", state.registers.pc());
    let counters = hart.isolation().counters();
    println!(
        "isolation: {} stores, {} loads, {} protected region accesses",
        counters.stores, counters.loads, counters.faults
    );
    if let Some(histogram) = hart.histogram() {
        let mut entries: Vec<_> = histogram.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (pc, count) in entries.into_iter().take(20) {
            println!("{pc:#018x} {count}");
        }
    }
}

fn parse_u64(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid number {value:?}: {err}"))
}

fn parse_range(value: &str) -> Result<(u64, u64), String> {
    let (base, length) = value
        .split_once(':')
        .ok_or_else(|| format!("expected BASE:LENGTH, got {value:?}"))?;
    Ok((parse_u64(base)?, parse_u64(length)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(Ok((0x1000, 0x100)), parse_range("0x1000:0x100"));
        assert_eq!(Ok((4096, 256)), parse_range("4096:256"));
        assert!(parse_range("0x1000").is_err());
        assert!(parse_range("0x1000:zz").is_err());
    }

    fn hart_with(code: &[u32]) -> Hart<Ram> {
        let mut ram = Ram::new(0x8000_0000, 0x1000).unwrap();
        let bytes: Vec<u8> = code.iter().flat_map(|word| word.to_le_bytes()).collect();
        load(&mut ram, 0x8000_0000, &bytes).unwrap();
        let config = Config {
            reset_vector: 0x8000_0000,
            ..Config::default()
        };
        Hart::new(0, config, ram).unwrap()
    }

    #[test]
    fn test_run_stops_when_nothing_retires() {
        // ecall traps to the reset mtvec of 0, where fetching faults forever.
        let mut hart = hart_with(&[0x0000_0073]);
        assert_eq!(Exit::Stuck, run(&mut hart, 1_000_000));
        assert_eq!(0, hart.state().minstret);
        assert_eq!(0, hart.registers().pc());
    }

    #[test]
    fn test_run_limits() {
        // addi x1, x1, 1; jal x0, -4
        let mut hart = hart_with(&[0x0010_8093, 0xFFDF_F06F]);
        assert_eq!(Exit::InstructionLimit, run(&mut hart, 12_345));
        assert_eq!(12_345, hart.state().minstret);

        // ebreak
        let mut hart = hart_with(&[0x0010_0073]);
        hart.set_csr(csr::DCSR, DCSR_EBREAK_ALL).unwrap();
        assert_eq!(Exit::Halted, run(&mut hart, 1_000));
    }

    #[test]
    fn test_raw_load_bounds() {
        let mut ram = Ram::new(0x8000_0000, 0x10).unwrap();
        assert!(load(&mut ram, 0x8000_0000, &[0; 0x10]).is_ok());
        assert!(load(&mut ram, 0x8000_0008, &[0; 0x10]).is_err());
    }
}
