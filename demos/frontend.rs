use penguin::driver;

fn main() {
    let stdin = std::io::stdin();
    let stdin = stdin.lock();

    match driver::compile(stdin, "<stdin>", None) {
        Err(diagnostics) => eprint!("{}", diagnostics),
        Ok(assembly) => print!("{}", String::from_utf8_lossy(&assembly)),
    }
}
