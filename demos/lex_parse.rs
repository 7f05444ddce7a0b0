use penguin::{lex::Lexer, parse, source};

fn main() {
    let stdin = std::io::stdin();
    let stdin = stdin.lock();

    let (start, stream) = source::consume(stdin, "<stdin>");
    match Lexer::new(start.clone(), stream).try_exhaustive() {
        Err(errors) => eprintln!("{:#?}", errors),

        Ok(tokens) => {
            println!("Tokens: {:#?}", tokens);
            println!();

            match parse::parse(tokens, start) {
                Err(errors) => eprintln!("{:#?}", errors),
                Ok(ast) => print!("{}", ast),
            }
        }
    }
}
