use anyhow::Context;
use clap::{crate_version, App, Arg};
use penguin::driver;

use std::{
    fs::{self, File},
    io::BufReader,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    process,
};

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let args = App::new("penguin compiler")
        .version(crate_version!())
        .about("Compiles penguin sources to Game Boy assembly (RGBDS)")
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .required(true)
                .help("Input .penguin source path"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .value_name("FILE")
                .help("Output assembly path (default: input with .asm extension)"),
        )
        .get_matches();

    let input = args.value_of("input").unwrap();
    let output = args
        .value_of("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(input).with_extension("asm"));

    let reader = match open_input(input) {
        Ok(reader) => reader,
        Err(error) => {
            eprintln!("penguinc: {:#}", error);
            return 2;
        }
    };

    // Las rutas de assets se interpretan relativas al archivo fuente
    let asset_root = Path::new(input).parent().map(PathBuf::from);

    let compiled = panic::catch_unwind(AssertUnwindSafe(|| {
        driver::compile(reader, input, asset_root.as_deref())
    }));

    match compiled {
        Err(_) => {
            eprintln!("penguinc: internal compiler error, this is a bug in the compiler");
            70
        }

        Ok(Err(diagnostics)) => {
            eprint!("{}", diagnostics);
            if diagnostics.has_ice() {
                70
            } else {
                1
            }
        }

        Ok(Ok(assembly)) => match write_output(&output, &assembly) {
            Ok(()) => 0,
            Err(error) => {
                // El ensamblador nunca debe ver una salida a medias
                let _ = fs::remove_file(&output);
                eprintln!("penguinc: {:#}", error);
                2
            }
        },
    }
}

fn open_input(path: &str) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open for reading: {}", path))?;
    Ok(BufReader::new(file))
}

fn write_output(path: &Path, assembly: &[u8]) -> anyhow::Result<()> {
    fs::write(path, assembly)
        .with_context(|| format!("Failed to write output: {}", path.display()))
}
