use class2reg::alloc::AllocationStrategy;
use class2reg::classfile::reader;
use class2reg::target::Emitter;

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

fn main() -> ExitCode {
    env_logger::init();

    let matches = Command::new(clap::crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .arg(
            Arg::new("dest")
                .short('d')
                .long("dest")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value(".")
                .action(ArgAction::Set)
                .help("Destination directory for the assembly output"),
        )
        .arg(
            Arg::new("allocator")
                .long("allocator")
                .value_name("STRATEGY")
                .value_parser(["naive", "graph"])
                .default_value("graph")
                .action(ArgAction::Set)
                .help("Register allocation strategy"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Dump tuples, HIR, LIR, liveness sets and intervals to stdout"),
        )
        .arg(
            Arg::new("INPUT")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .action(ArgAction::Set)
                .index(1)
                .help("Class file to compile"),
        )
        .get_matches();

    let input: &PathBuf = matches.get_one::<PathBuf>("INPUT").unwrap();
    let dest: &PathBuf = matches.get_one::<PathBuf>("dest").unwrap();
    let strategy = AllocationStrategy::from_str(
        matches.get_one::<String>("allocator").unwrap(),
    )
    .expect("clap restricts the allocator values");
    let verbose = matches.get_flag("verbose");

    log::info!("reading '{}'", input.display());
    let class = match reader::read_class_file(input) {
        Ok(class) => class,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut emitter = Emitter::new(input, &class, strategy, verbose);
    if let Err(err) = emitter.write(dest) {
        eprintln!("Error: {}", err);
        return ExitCode::FAILURE;
    }

    if emitter.error_has_occurred() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
