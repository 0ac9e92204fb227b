use bc2ir::builder::{build_graph, Settings};
use bc2ir::jvm::{MethodAccessFlags, MethodInfo, SimpleConstantPool};

use clap::{value_parser, Arg, ArgAction, ArgGroup, Command};
use std::error::Error;
use std::fs;
use std::process;

fn main() {
    env_logger::init();

    let matches = Command::new("JVM bytecode to IR graph builder")
        .version(clap::crate_version!())
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Build the sea-of-nodes graph of a single method and print it")
        .arg(
            Arg::new("descriptor")
                .long("descriptor")
                .value_name("DESCRIPTOR")
                .default_value("()V")
                .help("Method descriptor (eg. `(IJ)V`)"),
        )
        .arg(
            Arg::new("max-locals")
                .long("max-locals")
                .value_name("N")
                .value_parser(value_parser!(u16))
                .help("Number of local variable slots (defaults to the slots of the parameters)"),
        )
        .arg(
            Arg::new("static")
                .long("static")
                .action(ArgAction::SetTrue)
                .help("Method has no receiver"),
        )
        .arg(
            Arg::new("synchronized")
                .long("synchronized")
                .action(ArgAction::SetTrue)
                .help("Method holds its monitor while running"),
        )
        .arg(
            Arg::new("max-nodes")
                .long("max-nodes")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Give up on graphs with more nodes than this"),
        )
        .arg(
            Arg::new("no-dce")
                .long("no-dce")
                .action(ArgAction::SetTrue)
                .help("Skip dead code elimination"),
        )
        .arg(
            Arg::new("no-devirtualize")
                .long("no-devirtualize")
                .action(ArgAction::SetTrue)
                .help("Keep virtual calls virtual"),
        )
        .arg(
            Arg::new("hex")
                .long("hex")
                .value_name("HEX")
                .help("Bytecode written out in hexadecimal (eg. `1a 04 60 ac`)"),
        )
        .arg(
            Arg::new("INPUT")
                .help("File containing the raw bytecode")
                .index(1),
        )
        .group(
            ArgGroup::new("code")
                .args(["hex", "INPUT"])
                .required(true),
        )
        .get_matches();

    let mut access_flags = MethodAccessFlags::empty();
    if matches.get_flag("static") {
        access_flags |= MethodAccessFlags::STATIC;
    }
    if matches.get_flag("synchronized") {
        access_flags |= MethodAccessFlags::SYNCHRONIZED;
    }

    let mut settings = Settings::new();
    if let Some(max_nodes) = matches.get_one::<usize>("max-nodes") {
        settings.max_graph_nodes = *max_nodes;
    }
    settings.eliminate_dead_code = !matches.get_flag("no-dce");
    settings.devirtualize = !matches.get_flag("no-devirtualize");

    let code: Result<Vec<u8>, Box<dyn Error>> = match (
        matches.get_one::<String>("hex"),
        matches.get_one::<String>("INPUT"),
    ) {
        (Some(hex), _) => parse_hex(hex),
        (None, Some(input)) => {
            log::info!("Reading '{}'", input);
            fs::read(input).map_err(Box::<dyn Error>::from)
        }
        (None, None) => Err("no bytecode given".into()),
    };
    let code = code.unwrap_or_else(|err| exit_with(err.as_ref()));

    let descriptor = matches
        .get_one::<String>("descriptor")
        .map_or("()V", String::as_str);
    let method = MethodInfo::new("Main", "method", descriptor, access_flags, 0, code)
        .unwrap_or_else(|err| exit_with(&err));
    let parameter_slots = method.parameter_slots() as u16;
    let method = MethodInfo {
        max_locals: matches
            .get_one::<u16>("max-locals")
            .copied()
            .unwrap_or(parameter_slots),
        ..method
    };

    let pool = SimpleConstantPool::new();
    match build_graph(&method, &pool, &settings) {
        Ok(graph) => print!("{}", graph),
        Err(bailout) => exit_with(&bailout),
    }
}

fn parse_hex(hex: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err("odd number of hexadecimal digits".into());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair: String = pair.iter().collect();
            u8::from_str_radix(&pair, 16).map_err(Box::<dyn Error>::from)
        })
        .collect()
}

fn exit_with(err: &dyn Error) -> ! {
    eprintln!("error: {}", err);
    process::exit(1)
}
