//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios se descartan durante esta operación. Cada
//! token emitido esta asociado a una ubicación en el código fuente original,
//! lo cual permite rastrear errores en tanto los mismos como constructos
//! más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Este lexer no produce lexemas para casos donde no son necesarios o terminan
//! siendo más complicados. Por ejemplo, operadores, puntuación y palabras clave
//! se identifican por el hecho de lo que son y no incluyen lexemas. Por su parte,
//! los identificadores y las rutas de assets sí incluyen su texto original. Las
//! constantes literales se resuelven a sus valores en vez de preservar sus
//! lexemas.
//!
//! # Reglas importantes del lenguaje
//! - El lenguaje es case-sensitive: `loop` es palabra clave, `Loop` es
//!   un identificador.
//! - Los identificadores comienzan con letra o `'_'`.
//! - Las constantes enteras admiten las formas decimal, `0x…` y `0b…`.
//! - Las cadenas van entre comillas dobles, sin secuencias de escape y
//!   sin saltos de línea.
//!
//! # Errores
//! El lexer se recupera de condiciones de error consumiendo un carácter
//! y reiniciando su máquina de estados, por lo cual una misma ejecución
//! puede reportar múltiples errores léxicos. Si ocurrió al menos uno, la
//! compilación no avanza a las fases siguientes.

use crate::source::{InputStream, Located, Location};
use std::{
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S originado por el [`InputStream`].
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Se esperaba un carácter específico en esta posición.
    #[error("Expected {0:?}")]
    Expected(char),

    /// Una constante entera no es representable.
    #[error("Integer literal overflow")]
    IntOverflow,

    /// Un prefijo `0x`/`0b` sin dígitos.
    #[error("Expected digits after numeric base prefix")]
    MissingDigits,

    /// Una cadena sin comilla de cierre en la misma línea.
    #[error("Unterminated string literal")]
    UnterminatedString,
}

impl crate::error::Classify for LexerError {
    fn class(&self) -> &'static str {
        "lex-error"
    }
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(fmt)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(u32),

    /// Literal de cadena (ruta de asset).
    StrLiteral(Rc<str>),

    /// `=`
    Assign,

    /// `,`
    Comma,

    /// `.`
    Period,

    /// `;`
    Semicolon,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenBracket,

    /// `]`
    CloseBracket,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `~`
    Tilde,

    /// `<<`
    Shl,

    /// `>>`
    Shr,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `<=`
    LessEq,

    /// `>=`
    GreaterEq,

    /// `==`
    Eq,

    /// `!=`
    NotEq,

    /// `&`
    Amp,

    /// `^`
    Caret,

    /// `|`
    Pipe,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            StrLiteral(string) => write!(fmt, "literal `\"{}\"`", string),
            Assign => fmt.write_str("`=`"),
            Comma => fmt.write_str("`,`"),
            Period => fmt.write_str("`.`"),
            Semicolon => fmt.write_str("`;`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseCurly => fmt.write_str("`}`"),
            OpenBracket => fmt.write_str("`[`"),
            CloseBracket => fmt.write_str("`]`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Tilde => fmt.write_str("`~`"),
            Shl => fmt.write_str("`<<`"),
            Shr => fmt.write_str("`>>`"),
            Less => fmt.write_str("`<`"),
            Greater => fmt.write_str("`>`"),
            LessEq => fmt.write_str("`<=`"),
            GreaterEq => fmt.write_str("`>=`"),
            Eq => fmt.write_str("`==`"),
            NotEq => fmt.write_str("`!=`"),
            Amp => fmt.write_str("`&`"),
            Caret => fmt.write_str("`^`"),
            Pipe => fmt.write_str("`|`"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Loop,
    Procedure,
    Return,
    List,
    Not,
    And,
    Or,
    Xor,
    Int,
    Sprite,
    Tileset,
    Tilemap,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            If        => "if",
            Else      => "else",
            Loop      => "loop",
            Procedure => "procedure",
            Return    => "return",
            List      => "list",
            Not       => "not",
            And       => "and",
            Or        => "or",
            Xor       => "xor",
            Int       => "int",
            Sprite    => "sprite",
            Tileset   => "tileset",
            Tilemap   => "tilemap",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(&str, Keyword)] = &[
            ("if",        If),
            ("else",      Else),
            ("loop",      Loop),
            ("procedure", Procedure),
            ("return",    Return),
            ("list",      List),
            ("not",       Not),
            ("and",       And),
            ("or",        Or),
            ("xor",       Xor),
            ("int",       Int),
            ("sprite",    Sprite),
            ("tileset",   Tileset),
            ("tilemap",   Tilemap),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Se encontró `/`.
    ///
    /// Debería seguir otro `/` para entrar en un comentario.
    Slash,

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`.
    Comment,

    /// Se encontró `0`, que puede iniciar un literal decimal,
    /// hexadecimal (`0x`) o binario (`0b`).
    Zero,

    /// Constante entera decimal.
    Integer(u32),

    /// Se encontró el prefijo `0x` y aún no hay dígitos.
    HexPrefix,

    /// Constante entera hexadecimal.
    Hex(u32),

    /// Se encontró el prefijo `0b` y aún no hay dígitos.
    BinPrefix,

    /// Constante entera binaria.
    Bin(u32),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Interior de un literal de cadena.
    Str(String),

    /// Se encontró `<`; puede seguir `<` o `=`.
    Lt,

    /// Se encontró `>`; puede seguir `>` o `=`.
    Gt,

    /// Se encontró `=`; puede seguir otro `=`.
    EqStart,

    /// Se encontró `!`; debe seguir `=`.
    Bang,
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Reduce la entrada completa a tokens y errores.
    ///
    /// A diferencia de un lexer que se detiene en el primer problema,
    /// este continúa tras cada error para acumular todos los errores
    /// léxicos de una misma ejecución. Los tokens solo se entregan si
    /// no ocurrió ningún error.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => errors.push(error),
            }
        }

        if errors.is_empty() {
            Ok(tokens)
        } else {
            Err(errors)
        }
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use {State::*, Token::*};

        let mut last_accepted = self.start.clone();
        let token = loop {
            // Se espera un siguiente carácter, fallando si hay error de E/S
            let next_char = match self.source.peek() {
                None => None,
                Some(Ok((c, _))) => Some(*c),
                Some(Err(_)) => break Err(self.source.next().unwrap().err().unwrap().into()),
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = self.next.clone();
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some('.')) => self.state = Complete(Period),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('[')) => self.state = Complete(OpenBracket),
                (Start, Some(']')) => self.state = Complete(CloseBracket),
                (Start, Some('+')) => self.state = Complete(Plus),
                (Start, Some('-')) => self.state = Complete(Minus),
                (Start, Some('*')) => self.state = Complete(Times),
                (Start, Some('~')) => self.state = Complete(Tilde),
                (Start, Some('&')) => self.state = Complete(Amp),
                (Start, Some('^')) => self.state = Complete(Caret),
                (Start, Some('|')) => self.state = Complete(Pipe),

                // Operadores que pueden extenderse con un segundo carácter
                (Start, Some('=')) => self.state = EqStart,
                (Start, Some('<')) => self.state = Lt,
                (Start, Some('>')) => self.state = Gt,
                (Start, Some('!')) => self.state = Bang,
                (Start, Some('/')) => self.state = Slash,

                // Literales de cadena
                (Start, Some('"')) => self.state = Str(String::new()),

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // Inicio de una constante numérica. `0` es especial por
                // los prefijos de base; los demás dígitos no se consumen
                // aquí, ya que la lógica de acumulación está en el caso
                // del estado de constante entera.
                (Start, Some('0')) => self.state = Zero,
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_ascii_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(std::mem::replace(value, Plus)),

                (EqStart, Some('=')) => self.state = Complete(Eq),
                (EqStart, _) => break Ok(Assign),

                (Lt, Some('<')) => self.state = Complete(Shl),
                (Lt, Some('=')) => self.state = Complete(LessEq),
                (Lt, _) => break Ok(Less),

                (Gt, Some('>')) => self.state = Complete(Shr),
                (Gt, Some('=')) => self.state = Complete(GreaterEq),
                (Gt, _) => break Ok(Greater),

                (Bang, Some('=')) => self.state = Complete(NotEq),
                (Bang, _) => break Err(LexerError::Expected('=')),

                // `/` siempre debería iniciar un comentario de la forma `//`
                (Slash, Some('/')) => self.state = Comment,
                (Slash, _) => break Err(LexerError::Expected('/')),

                // Los comentarios descartan la línea donde ocurren
                (Comment, Some('\n')) => self.state = Start,
                (Comment, Some(_)) => (),
                (Comment, None) => self.state = Start,

                // `0` puede continuar como decimal o cambiar de base
                (Zero, Some('x')) => self.state = HexPrefix,
                (Zero, Some('b')) => self.state = BinPrefix,
                (Zero, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }
                (Zero, _) => break Ok(IntLiteral(0)),

                (HexPrefix, Some(c)) if c.is_ascii_hexdigit() => {
                    self.state = Hex(0);
                    continue;
                }
                (HexPrefix, _) => break Err(LexerError::MissingDigits),

                (BinPrefix, Some(c)) if c == '0' || c == '1' => {
                    self.state = Bin(0);
                    continue;
                }
                (BinPrefix, _) => break Err(LexerError::MissingDigits),

                // Acumulación dígito por dígito de constantes enteras
                (Integer(accumulated), Some(digit)) if digit.is_ascii_digit() => {
                    match push_digit(*accumulated, 10, digit.to_digit(10).unwrap()) {
                        Some(result) => *accumulated = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }
                (Integer(integer), _) => break Ok(IntLiteral(*integer)),

                (Hex(accumulated), Some(digit)) if digit.is_ascii_hexdigit() => {
                    match push_digit(*accumulated, 16, digit.to_digit(16).unwrap()) {
                        Some(result) => *accumulated = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }
                (Hex(integer), _) => break Ok(IntLiteral(*integer)),

                (Bin(accumulated), Some(digit)) if digit == '0' || digit == '1' => {
                    match push_digit(*accumulated, 2, digit.to_digit(2).unwrap()) {
                        Some(result) => *accumulated = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }
                (Bin(integer), _) => break Ok(IntLiteral(*integer)),

                // Extensión de términos
                (Word(word), Some(c)) if is_word_char(c) => {
                    word.push(c);
                }

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    if let Ok(keyword) = self::Keyword::from_str(word) {
                        break Ok(Keyword(keyword));
                    } else {
                        break Ok(Id(Identifier(Rc::from(std::mem::take(word).as_str()))));
                    }
                }

                // Las cadenas terminan en la misma línea donde comienzan
                (Str(string), Some('"')) => {
                    let value = Rc::from(std::mem::take(string).as_str());
                    self.state = Complete(StrLiteral(value));
                }
                (Str(_), Some('\n')) | (Str(_), None) => {
                    break Err(LexerError::UnterminatedString)
                }
                (Str(string), Some(c)) => string.push(c),
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some(Ok((_, next_position))) = self.source.next() {
                last_accepted = std::mem::replace(&mut self.next, next_position);
            }
        };

        token.map(|token| Some((token, last_accepted)))
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                // Resincronización: se consume el carácter ofensor y
                // se reinicia la máquina de estados
                let location = self.next.clone();
                if let Some(Ok((_, next_position))) = self.source.next() {
                    self.next = next_position;
                }

                self.state = State::Start;
                Some(Err(Located::at(error, location)))
            }
        }
    }
}

/// Agrega un dígito a una constante en acumulación.
fn push_digit(accumulated: u32, base: u32, digit: u32) -> Option<u32> {
    accumulated
        .checked_mul(base)
        .and_then(|n| n.checked_add(digit))
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c.is_ascii_digit() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn lex(input: &str) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let (start, stream) = source::consume(input.as_bytes(), "<test>");
        Lexer::new(start, stream).try_exhaustive()
    }

    fn kinds(input: &str) -> Vec<Token> {
        lex(input)
            .expect("lexing failed")
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        use Keyword::*;

        assert_eq!(
            kinds("loop Loop int foo_2"),
            vec![
                Token::Keyword(Loop),
                Token::Id(Identifier::from("Loop")),
                Token::Keyword(Int),
                Token::Id(Identifier::from("foo_2")),
            ]
        );
    }

    #[test]
    fn integer_bases() {
        assert_eq!(
            kinds("0 255 0x1F 0b1010 0xFFFF"),
            vec![
                Token::IntLiteral(0),
                Token::IntLiteral(255),
                Token::IntLiteral(0x1F),
                Token::IntLiteral(0b1010),
                Token::IntLiteral(0xFFFF),
            ]
        );
    }

    #[test]
    fn literal_beyond_sixteen_bits_is_lexed() {
        // El límite de 16 bits es un asunto de tipos, no léxico
        assert_eq!(kinds("65536"), vec![Token::IntLiteral(65536)]);
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("<< >> <= >= == != < > ="),
            vec![
                Token::Shl,
                Token::Shr,
                Token::LessEq,
                Token::GreaterEq,
                Token::Eq,
                Token::NotEq,
                Token::Less,
                Token::Greater,
                Token::Assign,
            ]
        );
    }

    #[test]
    fn strings_and_comments() {
        assert_eq!(
            kinds("tileset bg = \"assets/bg.2bpp\"; // binario\n"),
            vec![
                Token::Keyword(Keyword::Tileset),
                Token::Id(Identifier::from("bg")),
                Token::Assign,
                Token::StrLiteral(Rc::from("assets/bg.2bpp")),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn unterminated_string() {
        let errors = lex("\"sin cierre\n int x;").unwrap_err();
        assert!(matches!(
            errors[0].val(),
            LexerError::UnterminatedString
        ));
    }

    #[test]
    fn bad_character_reports_and_resumes() {
        let errors = lex("int $ x; @ ?").unwrap_err();
        let bad: Vec<char> = errors
            .iter()
            .filter_map(|error| match error.val() {
                LexerError::BadChar(c) => Some(*c),
                _ => None,
            })
            .collect();

        assert_eq!(bad, vec!['$', '@', '?']);
    }

    #[test]
    fn token_locations_track_lines() {
        let tokens = lex("int a;\nint b;").unwrap();
        let last = tokens.last().unwrap();
        assert_eq!(last.location().start().line(), 2);
    }

    #[test]
    fn lone_slash_is_an_error() {
        let errors = lex("a / b").unwrap_err();
        assert!(matches!(errors[0].val(), LexerError::Expected('/')));
    }
}
