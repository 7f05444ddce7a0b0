//! Análisis sintáctico y árbol de sintaxis abstracta.
//!
//! El parser es de descenso recursivo sobre la gramática del lenguaje,
//! con una tabla fija de precedencias para expresiones binarias. El
//! árbol resultante no contiene información de tipos ni de alcances;
//! esas anotaciones pertenecen a la fase semántica.
//!
//! # Recuperación de errores
//! Ante un error en un statement, el parser registra el diagnóstico y
//! descarta tokens hasta la siguiente frontera de statement (`;`, `}`
//! o una palabra clave que inicia statement), de manera que una misma
//! ejecución reporta múltiples errores sintácticos.
//!
//! # Impresión canónica
//! Todo árbol sabe imprimirse como código fuente canónico mediante
//! [`std::fmt::Display`]. Reparsear esa impresión produce un árbol
//! estructuralmente idéntico.

use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
};

use crate::{
    error::Classify,
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};
use thiserror::Error;

/// Error de análisis sintáctico.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    /// Se encontró un token que no corresponde a la gramática.
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: Token,
    },

    /// El programa terminó antes de completar un constructo.
    #[error("Expected {0}, found end of input")]
    UnexpectedEof(&'static str),

    /// Un programa sin statements no es válido.
    #[error("Empty program")]
    EmptyProgram,
}

impl Classify for ParserError {
    fn class(&self) -> &'static str {
        "parse-error"
    }
}

/// Árbol de sintaxis abstracta de un programa completo.
#[derive(Debug)]
pub struct Ast {
    statements: Vec<Statement>,
    eof: Location,
}

impl Ast {
    /// Statements de nivel superior, en orden de aparición.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Ubicación del final del programa.
    pub fn eof(&self) -> &Location {
        &self.eof
    }
}

/// Tipo anotado en el código fuente.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Sprite,
    Tileset,
    Tilemap,
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::Sprite => fmt.write_str("sprite"),
            Type::Tileset => fmt.write_str("tileset"),
            Type::Tilemap => fmt.write_str("tilemap"),
        }
    }
}

/// Un statement del lenguaje.
#[derive(Debug)]
pub enum Statement {
    /// `T name ;`
    Declaration {
        of: Located<Type>,
        name: Located<Identifier>,
    },

    /// `T name = expr ;`
    Initialization {
        of: Located<Type>,
        name: Located<Identifier>,
        value: Located<Expr>,
    },

    /// `list name = [ expr, … ] ;`
    ListInit {
        name: Located<Identifier>,
        values: Vec<Located<Expr>>,
    },

    /// `lvalue = expr ;`
    Assignment {
        target: Located<Place>,
        value: Located<Expr>,
    },

    /// `if ( expr ) { … } [else { … }]`
    If {
        condition: Located<Expr>,
        then_body: Vec<Statement>,
        else_body: Option<Vec<Statement>>,
    },

    /// `loop ( expr ) { … }`
    Loop {
        condition: Located<Expr>,
        body: Vec<Statement>,
    },

    /// `procedure [T] name ( … ) { … }`
    Procedure(Procedure),

    /// `return [expr] ;`
    Return {
        value: Option<Located<Expr>>,
        at: Location,
    },

    /// `call ;`
    Call(Located<Call>),
}

/// Declaración de un procedimiento.
#[derive(Debug)]
pub struct Procedure {
    returns: Option<Located<Type>>,
    name: Located<Identifier>,
    parameters: Vec<Parameter>,
    body: Vec<Statement>,
}

impl Procedure {
    /// Tipo de retorno declarado, si existe.
    pub fn returns(&self) -> Option<&Located<Type>> {
        self.returns.as_ref()
    }

    /// Nombre del procedimiento.
    pub fn name(&self) -> &Located<Identifier> {
        &self.name
    }

    /// Parámetros formales.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Cuerpo del procedimiento.
    pub fn body(&self) -> &[Statement] {
        &self.body
    }
}

/// Parámetro formal de un procedimiento.
#[derive(Debug)]
pub struct Parameter {
    of: Located<Type>,
    name: Located<Identifier>,
}

impl Parameter {
    /// Tipo del parámetro.
    pub fn of(&self) -> &Located<Type> {
        &self.of
    }

    /// Nombre del parámetro.
    pub fn name(&self) -> &Located<Identifier> {
        &self.name
    }
}

/// Una ruta de acceso: identificador base seguido de selectores.
///
/// Tanto lvalues como lecturas de variables son rutas. Esto modela
/// casos como `display.oam[i].x`, donde `display` es la base y le
/// siguen los selectores `.oam`, `[i]` y `.x`.
#[derive(Debug, Clone)]
pub struct Place {
    base: Located<Identifier>,
    path: Vec<Located<Selector>>,
}

impl Place {
    /// Identificador base.
    pub fn base(&self) -> &Located<Identifier> {
        &self.base
    }

    /// Selectores en orden de aplicación.
    pub fn path(&self) -> &[Located<Selector>] {
        &self.path
    }
}

/// Un selector dentro de una ruta.
#[derive(Debug, Clone)]
pub enum Selector {
    /// `[ expr ]`
    Index(Located<Expr>),

    /// `. name`
    Attr(Located<Identifier>),
}

/// Invocación de un procedimiento, como statement o como expresión.
#[derive(Debug, Clone)]
pub struct Call {
    target: Located<Place>,
    arguments: Vec<Located<Expr>>,
}

impl Call {
    /// Ruta del procedimiento invocado.
    pub fn target(&self) -> &Located<Place> {
        &self.target
    }

    /// Argumentos reales.
    pub fn arguments(&self) -> &[Located<Expr>] {
        &self.arguments
    }
}

/// Una expresión.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Constante entera, en cualquiera de sus bases.
    Integer(u32),

    /// Literal de cadena (ruta de asset).
    Str(Rc<str>),

    /// Lectura de una ruta.
    Read(Place),

    /// Invocación con valor de retorno.
    Call(Call),

    /// Operación unaria.
    Unary {
        op: UnaryOp,
        operand: Box<Located<Expr>>,
    },

    /// Operación binaria.
    Binary {
        op: BinaryOp,
        lhs: Box<Located<Expr>>,
        rhs: Box<Located<Expr>>,
    },
}

/// Operador unario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    Not,
}

/// Operador binario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
    Xor,
}

impl Display for BinaryOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinaryOp::*;
        let string = match self {
            Mul => "*",
            Add => "+",
            Sub => "-",
            Shl => "<<",
            Shr => ">>",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
            Eq => "==",
            Ne => "!=",
            BitAnd => "&",
            BitXor => "^",
            BitOr => "|",
            And => "and",
            Or => "or",
            Xor => "xor",
        };

        fmt.write_str(string)
    }
}

/// Precedencia de un operador binario; mayor es más estrecha.
fn precedence(op: BinaryOp) -> u8 {
    use BinaryOp::*;

    match op {
        Xor => 1,
        Or => 2,
        And => 3,
        BitOr => 4,
        BitXor => 5,
        BitAnd => 6,
        Eq | Ne => 7,
        Lt | Gt | Le | Ge => 8,
        Shl | Shr => 9,
        Add | Sub => 10,
        Mul => 11,
    }
}

/// Traduce un token a operador binario, si corresponde.
fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::Times => BinaryOp::Mul,
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Shl => BinaryOp::Shl,
        Token::Shr => BinaryOp::Shr,
        Token::Less => BinaryOp::Lt,
        Token::Greater => BinaryOp::Gt,
        Token::LessEq => BinaryOp::Le,
        Token::GreaterEq => BinaryOp::Ge,
        Token::Eq => BinaryOp::Eq,
        Token::NotEq => BinaryOp::Ne,
        Token::Amp => BinaryOp::BitAnd,
        Token::Caret => BinaryOp::BitXor,
        Token::Pipe => BinaryOp::BitOr,
        Token::Keyword(Keyword::And) => BinaryOp::And,
        Token::Keyword(Keyword::Or) => BinaryOp::Or,
        Token::Keyword(Keyword::Xor) => BinaryOp::Xor,
        _ => return None,
    };

    Some(op)
}

type Parse<T> = Result<T, Located<ParserError>>;

/// Parsea una secuencia completa de tokens.
///
/// El parámetro `fallback` es la ubicación a reportar cuando el
/// programa está vacío o termina abruptamente.
pub fn parse(
    tokens: Vec<Located<Token>>,
    fallback: Location,
) -> Result<Ast, Vec<Located<ParserError>>> {
    let eof = tokens
        .last()
        .map(|token| token.location().clone())
        .unwrap_or_else(|| fallback.clone());

    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
        last: fallback,
        errors: Vec::new(),
    };

    let statements = parser.statements_until(None);

    if statements.is_empty() && parser.errors.is_empty() {
        parser
            .errors
            .push(Located::at(ParserError::EmptyProgram, eof.clone()));
    }

    if parser.errors.is_empty() {
        Ok(Ast { statements, eof })
    } else {
        Err(parser.errors)
    }
}

struct Parser {
    tokens: Peekable<std::vec::IntoIter<Located<Token>>>,
    last: Location,
    errors: Vec<Located<ParserError>>,
}

impl Parser {
    /// Parsea statements hasta el final o hasta un token de cierre,
    /// el cual no se consume.
    fn statements_until(&mut self, end: Option<&Token>) -> Vec<Statement> {
        let mut statements = Vec::new();

        loop {
            match self.tokens.peek() {
                None => break,
                Some(token) if end == Some(token.as_ref()) => break,
                Some(_) => match self.statement() {
                    Ok(statement) => statements.push(statement),
                    Err(error) => {
                        self.errors.push(error);
                        self.recover();
                    }
                },
            }
        }

        statements
    }

    /// Descarta tokens hasta la siguiente frontera de statement.
    fn recover(&mut self) {
        loop {
            match self.tokens.peek().map(Located::as_ref) {
                None => break,
                Some(Token::Semicolon) => {
                    self.advance();
                    break;
                }
                Some(Token::CloseCurly) => break,
                Some(token) if starts_statement(token) => break,
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn statement(&mut self) -> Parse<Statement> {
        match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Keyword(
                Keyword::Int | Keyword::Sprite | Keyword::Tileset | Keyword::Tilemap,
            )) => self.declaration(),

            Some(Token::Keyword(Keyword::List)) => self.list_init(),
            Some(Token::Keyword(Keyword::If)) => self.conditional(),
            Some(Token::Keyword(Keyword::Loop)) => self.repetition(),
            Some(Token::Keyword(Keyword::Procedure)) => self.procedure(),
            Some(Token::Keyword(Keyword::Return)) => self.ret(),
            Some(Token::Id(_)) => self.assignment_or_call(),

            Some(_) => {
                let token = self.advance().unwrap();
                let (location, found) = token.split();
                Err(Located::at(
                    ParserError::UnexpectedToken {
                        expected: "a statement",
                        found,
                    },
                    location,
                ))
            }

            None => Err(Located::at(
                ParserError::UnexpectedEof("a statement"),
                self.last.clone(),
            )),
        }
    }

    /// `T name ;` o `T name = expr ;`
    fn declaration(&mut self) -> Parse<Statement> {
        let of = self.annotated_type()?;
        let name = self.identifier()?;

        match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Assign) => {
                self.advance();
                let value = self.expression()?;
                self.expect(Token::Semicolon, "`;`")?;

                Ok(Statement::Initialization { of, name, value })
            }

            _ => {
                self.expect(Token::Semicolon, "`;` or `=`")?;
                Ok(Statement::Declaration { of, name })
            }
        }
    }

    /// `list name = [ expr, … ] ;`
    fn list_init(&mut self) -> Parse<Statement> {
        self.advance();
        let name = self.identifier()?;
        self.expect(Token::Assign, "`=`")?;
        self.expect(Token::OpenBracket, "`[`")?;

        let mut values = vec![self.expression()?];
        while self.eat(&Token::Comma).is_some() {
            values.push(self.expression()?);
        }

        self.expect(Token::CloseBracket, "`]` or `,`")?;
        self.expect(Token::Semicolon, "`;`")?;

        Ok(Statement::ListInit { name, values })
    }

    /// `if ( expr ) { … } [else { … }]`
    fn conditional(&mut self) -> Parse<Statement> {
        self.advance();
        self.expect(Token::OpenParen, "`(`")?;
        let condition = self.expression()?;
        self.expect(Token::CloseParen, "`)`")?;

        let then_body = self.block()?;

        let else_body = match self.eat(&Token::Keyword(Keyword::Else)) {
            Some(_) => Some(self.block()?),
            None => None,
        };

        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    /// `loop ( expr ) { … }`
    fn repetition(&mut self) -> Parse<Statement> {
        self.advance();
        self.expect(Token::OpenParen, "`(`")?;
        let condition = self.expression()?;
        self.expect(Token::CloseParen, "`)`")?;

        let body = self.block()?;

        Ok(Statement::Loop { condition, body })
    }

    /// `procedure [T] name ( [T p, …] ) { … }`
    fn procedure(&mut self) -> Parse<Statement> {
        self.advance();

        let returns = match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Keyword(
                Keyword::Int | Keyword::Sprite | Keyword::Tileset | Keyword::Tilemap,
            )) => Some(self.annotated_type()?),
            _ => None,
        };

        let name = self.identifier()?;
        self.expect(Token::OpenParen, "`(`")?;

        let mut parameters = Vec::new();
        if !matches!(
            self.tokens.peek().map(Located::as_ref),
            Some(Token::CloseParen)
        ) {
            loop {
                let of = self.annotated_type()?;
                let name = self.identifier()?;
                parameters.push(Parameter { of, name });

                if self.eat(&Token::Comma).is_none() {
                    break;
                }
            }
        }

        self.expect(Token::CloseParen, "`)`")?;
        let body = self.block()?;

        Ok(Statement::Procedure(Procedure {
            returns,
            name,
            parameters,
            body,
        }))
    }

    /// `return [expr] ;`
    fn ret(&mut self) -> Parse<Statement> {
        let keyword = self.advance().unwrap();
        let at = keyword.location().clone();

        let value = match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Semicolon) => None,
            _ => Some(self.expression()?),
        };

        self.expect(Token::Semicolon, "`;`")?;

        let at = match &value {
            Some(value) => Location::span(at, value.location()),
            None => at,
        };

        Ok(Statement::Return { value, at })
    }

    /// `lvalue = expr ;` o `call ;`
    fn assignment_or_call(&mut self) -> Parse<Statement> {
        let place = self.place()?;

        match self.tokens.peek().map(Located::as_ref) {
            Some(Token::OpenParen) => {
                let (arguments, close) = self.arguments()?;
                let location = Location::span(place.location().clone(), &close);
                self.expect(Token::Semicolon, "`;`")?;

                Ok(Statement::Call(Located::at(
                    Call {
                        target: place,
                        arguments,
                    },
                    location,
                )))
            }

            _ => {
                self.expect(Token::Assign, "`=` or `(`")?;
                let value = self.expression()?;
                self.expect(Token::Semicolon, "`;`")?;

                Ok(Statement::Assignment {
                    target: place,
                    value,
                })
            }
        }
    }

    /// `{ statement… }`
    fn block(&mut self) -> Parse<Vec<Statement>> {
        self.expect(Token::OpenCurly, "`{`")?;
        let statements = self.statements_until(Some(&Token::CloseCurly));
        self.expect(Token::CloseCurly, "`}`")?;

        Ok(statements)
    }

    /// Ruta: identificador base más selectores `.attr` y `[indice]`.
    fn place(&mut self) -> Parse<Located<Place>> {
        let base = self.identifier()?;
        let mut end = base.location().clone();
        let mut path = Vec::new();

        loop {
            match self.tokens.peek().map(Located::as_ref) {
                Some(Token::Period) => {
                    self.advance();
                    let attr = self.identifier()?;
                    end = attr.location().clone();
                    let location = end.clone();
                    path.push(Located::at(Selector::Attr(attr), location));
                }

                Some(Token::OpenBracket) => {
                    let open = self.advance().unwrap().location().clone();
                    let index = self.expression()?;
                    let close = self.expect(Token::CloseBracket, "`]`")?;
                    end = close.clone();
                    path.push(Located::at(
                        Selector::Index(index),
                        Location::span(open, &close),
                    ));
                }

                _ => break,
            }
        }

        let location = Location::span(base.location().clone(), &end);
        Ok(Located::at(Place { base, path }, location))
    }

    /// `( [expr, …] )`; retorna los argumentos y la ubicación del cierre.
    fn arguments(&mut self) -> Parse<(Vec<Located<Expr>>, Location)> {
        self.expect(Token::OpenParen, "`(`")?;

        let mut arguments = Vec::new();
        if !matches!(
            self.tokens.peek().map(Located::as_ref),
            Some(Token::CloseParen)
        ) {
            loop {
                arguments.push(self.expression()?);
                if self.eat(&Token::Comma).is_none() {
                    break;
                }
            }
        }

        let close = self.expect(Token::CloseParen, "`)` or `,`")?;
        Ok((arguments, close))
    }

    fn expression(&mut self) -> Parse<Located<Expr>> {
        self.binary(0)
    }

    /// Escalado de precedencias; todos los operadores asocian a la izquierda.
    fn binary(&mut self, min_bp: u8) -> Parse<Located<Expr>> {
        let mut lhs = self.unary()?;

        loop {
            let op = match self.tokens.peek().map(Located::as_ref).and_then(binary_op) {
                Some(op) => op,
                None => break,
            };

            let bp = precedence(op);
            if bp < min_bp {
                break;
            }

            self.advance();
            let rhs = self.binary(bp + 1)?;

            let location = Location::span(lhs.location().clone(), rhs.location());
            lhs = Located::at(
                Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            );
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Parse<Located<Expr>> {
        let op = match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Minus) => Some(UnaryOp::Minus),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            Some(Token::Keyword(Keyword::Not)) => Some(UnaryOp::Not),
            _ => None,
        };

        match op {
            None => self.primary(),
            Some(op) => {
                let start = self.advance().unwrap().location().clone();
                let operand = self.unary()?;

                let location = Location::span(start, operand.location());
                Ok(Located::at(
                    Expr::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                ))
            }
        }
    }

    fn primary(&mut self) -> Parse<Located<Expr>> {
        match self.tokens.peek().map(Located::as_ref) {
            Some(Token::IntLiteral(_)) => {
                let token = self.advance().unwrap();
                Ok(token.map(|token| match token {
                    Token::IntLiteral(value) => Expr::Integer(value),
                    _ => unreachable!(),
                }))
            }

            Some(Token::StrLiteral(_)) => {
                let token = self.advance().unwrap();
                Ok(token.map(|token| match token {
                    Token::StrLiteral(value) => Expr::Str(value),
                    _ => unreachable!(),
                }))
            }

            Some(Token::OpenParen) => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Token::CloseParen, "`)`")?;

                Ok(inner)
            }

            Some(Token::Id(_)) => {
                let place = self.place()?;

                match self.tokens.peek().map(Located::as_ref) {
                    Some(Token::OpenParen) => {
                        let (arguments, close) = self.arguments()?;
                        let location = Location::span(place.location().clone(), &close);

                        Ok(Located::at(
                            Expr::Call(Call {
                                target: place,
                                arguments,
                            }),
                            location,
                        ))
                    }

                    _ => Ok(place.map(Expr::Read)),
                }
            }

            Some(_) => {
                let token = self.tokens.peek().unwrap();
                Err(Located::at(
                    ParserError::UnexpectedToken {
                        expected: "an expression",
                        found: token.as_ref().clone(),
                    },
                    token.location().clone(),
                ))
            }

            None => Err(Located::at(
                ParserError::UnexpectedEof("an expression"),
                self.last.clone(),
            )),
        }
    }

    /// Tipo anotado: `int`, `sprite`, `tileset` o `tilemap`.
    fn annotated_type(&mut self) -> Parse<Located<Type>> {
        let of = match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Keyword(Keyword::Int)) => Type::Int,
            Some(Token::Keyword(Keyword::Sprite)) => Type::Sprite,
            Some(Token::Keyword(Keyword::Tileset)) => Type::Tileset,
            Some(Token::Keyword(Keyword::Tilemap)) => Type::Tilemap,

            Some(_) => {
                let token = self.tokens.peek().unwrap();
                return Err(Located::at(
                    ParserError::UnexpectedToken {
                        expected: "a type",
                        found: token.as_ref().clone(),
                    },
                    token.location().clone(),
                ));
            }

            None => {
                return Err(Located::at(
                    ParserError::UnexpectedEof("a type"),
                    self.last.clone(),
                ))
            }
        };

        let location = self.advance().unwrap().location().clone();
        Ok(Located::at(of, location))
    }

    fn identifier(&mut self) -> Parse<Located<Identifier>> {
        match self.tokens.peek().map(Located::as_ref) {
            Some(Token::Id(_)) => {
                let token = self.advance().unwrap();
                Ok(token.map(|token| match token {
                    Token::Id(id) => id,
                    _ => unreachable!(),
                }))
            }

            Some(_) => {
                let token = self.tokens.peek().unwrap();
                Err(Located::at(
                    ParserError::UnexpectedToken {
                        expected: "an identifier",
                        found: token.as_ref().clone(),
                    },
                    token.location().clone(),
                ))
            }

            None => Err(Located::at(
                ParserError::UnexpectedEof("an identifier"),
                self.last.clone(),
            )),
        }
    }

    /// Consume el siguiente token si es igual al esperado.
    fn eat(&mut self, token: &Token) -> Option<Location> {
        match self.tokens.peek() {
            Some(found) if found.as_ref() == token => {
                Some(self.advance().unwrap().location().clone())
            }
            _ => None,
        }
    }

    /// Exige el siguiente token; retorna su ubicación.
    fn expect(&mut self, token: Token, what: &'static str) -> Parse<Location> {
        match self.tokens.peek() {
            Some(found) if *found.as_ref() == token => {
                Ok(self.advance().unwrap().location().clone())
            }

            Some(found) => Err(Located::at(
                ParserError::UnexpectedToken {
                    expected: what,
                    found: found.as_ref().clone(),
                },
                found.location().clone(),
            )),

            None => Err(Located::at(
                ParserError::UnexpectedEof(what),
                self.last.clone(),
            )),
        }
    }

    fn advance(&mut self) -> Option<Located<Token>> {
        let token = self.tokens.next();
        if let Some(token) = &token {
            self.last = token.location().clone();
        }

        token
    }
}

/// Determina si un token puede iniciar un statement.
fn starts_statement(token: &Token) -> bool {
    use Keyword::*;

    matches!(token, Token::Id(_))
        || matches!(
            token,
            Token::Keyword(Int | Sprite | Tileset | Tilemap | List | If | Loop | Procedure | Return)
        )
}

// Impresión canónica

impl Display for Ast {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write_statement(fmt, statement, 0)?;
        }

        Ok(())
    }
}

fn write_indent(fmt: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        fmt.write_str("    ")?;
    }

    Ok(())
}

fn write_statement(fmt: &mut fmt::Formatter<'_>, statement: &Statement, depth: usize) -> fmt::Result {
    write_indent(fmt, depth)?;

    match statement {
        Statement::Declaration { of, name } => {
            writeln!(fmt, "{} {};", of.as_ref(), name.as_ref())
        }

        Statement::Initialization { of, name, value } => {
            writeln!(fmt, "{} {} = {};", of.as_ref(), name.as_ref(), value.as_ref())
        }

        Statement::ListInit { name, values } => {
            write!(fmt, "list {} = [", name.as_ref())?;
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    fmt.write_str(", ")?;
                }
                write!(fmt, "{}", value.as_ref())?;
            }
            fmt.write_str("];\n")
        }

        Statement::Assignment { target, value } => {
            writeln!(fmt, "{} = {};", target.as_ref(), value.as_ref())
        }

        Statement::If {
            condition,
            then_body,
            else_body,
        } => {
            writeln!(fmt, "if ({}) {{", condition.as_ref())?;
            for statement in then_body {
                write_statement(fmt, statement, depth + 1)?;
            }
            write_indent(fmt, depth)?;

            match else_body {
                None => fmt.write_str("}\n"),
                Some(else_body) => {
                    fmt.write_str("} else {\n")?;
                    for statement in else_body {
                        write_statement(fmt, statement, depth + 1)?;
                    }
                    write_indent(fmt, depth)?;
                    fmt.write_str("}\n")
                }
            }
        }

        Statement::Loop { condition, body } => {
            writeln!(fmt, "loop ({}) {{", condition.as_ref())?;
            for statement in body {
                write_statement(fmt, statement, depth + 1)?;
            }
            write_indent(fmt, depth)?;
            fmt.write_str("}\n")
        }

        Statement::Procedure(procedure) => {
            fmt.write_str("procedure ")?;
            if let Some(returns) = procedure.returns() {
                write!(fmt, "{} ", returns.as_ref())?;
            }

            write!(fmt, "{}(", procedure.name().as_ref())?;
            for (i, parameter) in procedure.parameters().iter().enumerate() {
                if i > 0 {
                    fmt.write_str(", ")?;
                }
                write!(fmt, "{} {}", parameter.of().as_ref(), parameter.name().as_ref())?;
            }

            fmt.write_str(") {\n")?;
            for statement in procedure.body() {
                write_statement(fmt, statement, depth + 1)?;
            }
            write_indent(fmt, depth)?;
            fmt.write_str("}\n")
        }

        Statement::Return { value, .. } => match value {
            None => fmt.write_str("return;\n"),
            Some(value) => writeln!(fmt, "return {};", value.as_ref()),
        },

        Statement::Call(call) => writeln!(fmt, "{};", call.as_ref()),
    }
}

impl Display for Place {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.base.as_ref())?;
        for selector in &self.path {
            match selector.as_ref() {
                Selector::Attr(attr) => write!(fmt, ".{}", attr.as_ref())?,
                Selector::Index(index) => write!(fmt, "[{}]", index.as_ref())?,
            }
        }

        Ok(())
    }
}

impl Display for Call {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}(", self.target.as_ref())?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                fmt.write_str(", ")?;
            }
            write!(fmt, "{}", argument.as_ref())?;
        }

        fmt.write_str(")")
    }
}

impl Display for Expr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Integer(value) => write!(fmt, "{}", value),
            Expr::Str(value) => write!(fmt, "\"{}\"", value),
            Expr::Read(place) => write!(fmt, "{}", place),
            Expr::Call(call) => write!(fmt, "{}", call),

            Expr::Unary { op, operand } => {
                match op {
                    UnaryOp::Plus => fmt.write_str("+")?,
                    UnaryOp::Minus => fmt.write_str("-")?,
                    UnaryOp::BitNot => fmt.write_str("~")?,
                    UnaryOp::Not => fmt.write_str("not ")?,
                }

                match operand.val() {
                    Expr::Binary { .. } => write!(fmt, "({})", operand.val()),
                    operand => write!(fmt, "{}", operand),
                }
            }

            Expr::Binary { op, lhs, rhs } => {
                write_operand(fmt, lhs.val(), precedence(*op), false)?;
                write!(fmt, " {} ", op)?;
                write_operand(fmt, rhs.val(), precedence(*op), true)
            }
        }
    }
}

/// Escribe un operando, agregando paréntesis solo si la precedencia
/// natural no reconstruiría el mismo árbol.
fn write_operand(
    fmt: &mut fmt::Formatter<'_>,
    operand: &Expr,
    parent: u8,
    is_right: bool,
) -> fmt::Result {
    let grouped = match operand {
        Expr::Binary { op, .. } => {
            let bp = precedence(*op);
            bp < parent || (is_right && bp == parent)
        }
        _ => false,
    };

    if grouped {
        write!(fmt, "({})", operand)
    } else {
        write!(fmt, "{}", operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn parse_str(input: &str) -> Result<Ast, Vec<Located<ParserError>>> {
        let (start, stream) = source::consume(input.as_bytes(), "<test>");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .expect("lexing failed");

        parse(tokens, start)
    }

    fn ast(input: &str) -> Ast {
        parse_str(input).expect("parsing failed")
    }

    #[test]
    fn print_reparse_is_stable() {
        let sources = [
            "int a = 5;\nint b = a + 3;",
            "int n = 0;\nloop (n < 4) { n = n + 1; }",
            "procedure int sq(int x) { return x * x; }\nint r = sq(7);",
            "display.oam[0].x = 16;",
            "if (a and b | c) { foo(); } else { bar(1, 2); }",
            "list xs = [1, 2, 0x10];\nxs[0] = xs[1] + 1;",
            "int y = not (a or b) ^ ~c - -2;",
            "tileset bg = \"assets/bg.2bpp\";\ndisplay.tileset0 = bg;",
        ];

        for source in &sources {
            let first = ast(source).to_string();
            let second = ast(&first).to_string();
            assert_eq!(first, second, "unstable print for {:?}", source);
        }
    }

    #[test]
    fn precedence_crosses_families() {
        // `*` por encima de `+`, bitwise por encima de lógicos
        let printed = ast("int x = 1 + 2 * 3 and 4 | 5;").to_string();
        assert_eq!(printed, "int x = 1 + 2 * 3 and 4 | 5;\n");

        let printed = ast("int x = (1 + 2) * 3;").to_string();
        assert_eq!(printed, "int x = (1 + 2) * 3;\n");
    }

    #[test]
    fn binary_operators_are_left_associative() {
        let program = ast("int x = 10 - 4 - 3;");
        match &program.statements()[0] {
            Statement::Initialization { value, .. } => match value.as_ref() {
                Expr::Binary { op, lhs, .. } => {
                    assert_eq!(*op, BinaryOp::Sub);
                    assert!(matches!(
                        lhs.val(),
                        Expr::Binary { op: BinaryOp::Sub, .. }
                    ));
                }
                other => panic!("unexpected expression {:?}", other),
            },
            _ => panic!("unexpected statement"),
        }
    }

    #[test]
    fn xor_is_loosest() {
        let printed = ast("int x = a xor b or c and d;").to_string();
        assert_eq!(printed, "int x = a xor b or c and d;\n");

        let program = ast("int x = a xor b or c;");
        match &program.statements()[0] {
            Statement::Initialization { value, .. } => {
                assert!(matches!(
                    value.as_ref(),
                    Expr::Binary { op: BinaryOp::Xor, .. }
                ));
            }
            _ => panic!("unexpected statement"),
        }
    }

    #[test]
    fn hardware_place_chain() {
        let program = ast("display.oam[i + 1].tile = pengu;");
        match &program.statements()[0] {
            Statement::Assignment { target, .. } => {
                assert_eq!(target.as_ref().base().as_ref().as_ref(), "display");
                assert_eq!(target.as_ref().path().len(), 3);
            }
            _ => panic!("unexpected statement"),
        }
    }

    #[test]
    fn empty_program_is_rejected() {
        let errors = parse_str("// solo un comentario\n").unwrap_err();
        assert!(matches!(errors[0].val(), ParserError::EmptyProgram));
    }

    #[test]
    fn recovery_reports_multiple_errors() {
        let errors = parse_str("int = 5; int b = ; int c = 1;").unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn recovery_resumes_at_next_statement() {
        // El primer statement es inválido; el segundo debe reportarse
        // también a pesar de la recuperación
        let errors = parse_str("int 5; procedure foo( { }").unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn bare_and_valued_returns() {
        let program = ast("procedure f() { return; }\nprocedure int g() { return 1; }");
        assert_eq!(program.statements().len(), 2);
    }

    #[test]
    fn procedure_without_parameters() {
        let program = ast("procedure f() { }\nf();");
        match &program.statements()[1] {
            Statement::Call(call) => assert!(call.as_ref().arguments().is_empty()),
            _ => panic!("unexpected statement"),
        }
    }
}
