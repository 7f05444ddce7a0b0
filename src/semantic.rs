//! Análisis semántico.
//!
//! Esta fase se realiza en dos pasadas sobre el árbol sintáctico. La
//! primera registra en el scope raíz todos los procedimientos y las
//! declaraciones globales, de manera que las referencias hacia
//! adelante resuelvan. La segunda recorre el árbol completo con una
//! pila de scopes, verificando tipos, aridades y el uso correcto del
//! namespace de hardware (`display`, `input`, `control`).
//!
//! Los errores se acumulan: un subárbol fallido adquiere el tipo
//! [`Type::Error`], el cual se propaga en silencio para no reportar
//! cascadas sobre el mismo rango de código.
//!
//! El analizador también es el dueño del asignador de direcciones de
//! WRAM: toda variable y todo parámetro reciben aquí su ranura fija
//! de 16 bits, información que fases posteriores consumen tal cual.

use thiserror::Error;

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Display},
    rc::Rc,
};

use crate::{
    error::Classify,
    ir::{Asset, AssetKind, ProcSig},
    lex::Identifier,
    parse::{self, Ast, Call, Expr, Place, Selector, Statement},
    sm83::{self, ControlOp, OamField},
    source::{Located, Location},
};

pub type Semantic<T> = Result<T, Located<SemanticError>>;

/// Error de análisis semántico.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Redefinition of `{0}` in the same scope")]
    Redeclaration(Identifier),

    #[error("`{0}` is a reserved hardware namespace")]
    ReservedName(Identifier),

    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Namespace `{namespace}` has no member `{attribute}`")]
    UnknownAttribute {
        namespace: &'static str,
        attribute: Identifier,
    },

    #[error("Invalid access to hardware namespace `{0}`")]
    BadHardwareAccess(&'static str),

    #[error("Type mismatch: expected `{expected}`, found `{found}`")]
    ExpectedType { expected: Type, found: Type },

    #[error("Type mismatch: expected `int` or `sprite`, found `{0}`")]
    TileMismatch(Type),

    #[error("Integer literal {0} is out of range, valid range is [0, 65535]")]
    IntOutOfRange(u32),

    #[error("String literals can only initialize sprite, tileset and tilemap assets")]
    StrayString,

    #[error("Asset declarations require a string literal initializer")]
    MissingAssetPath,

    #[error("Type `{0}` cannot be indexed")]
    NotIndexable(Type),

    #[error("Type `{0}` has no attributes")]
    NoAttributes(Type),

    #[error("Lists are flat and take exactly one index")]
    ExtraIndices,

    #[error("Expected a value, found procedure `{0}`")]
    ExpectedVar(Identifier),

    #[error("`{0}` is not a procedure")]
    NotCallable(String),

    #[error("`{0}` cannot be read as a value")]
    NotReadable(&'static str),

    #[error("`{0}` cannot be assigned to")]
    NotAssignable(String),

    #[error("Expected {expected} argument(s), got {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("`return` outside of a procedure")]
    ReturnOutsideProcedure,

    #[error("This procedure does not declare a return type")]
    ReturnValueInVoid,

    #[error("Procedures may only be declared at the top level")]
    NestedProcedure,

    #[error("Only `int` parameters are supported, found `{0}`")]
    ParameterType(parse::Type),

    #[error("Only `int` return values are supported, found `{0}`")]
    ReturnType(parse::Type),

    #[error("`{0}` is already bound to a different asset")]
    Rebound(&'static str),

    #[error("Out of work RAM for variable storage")]
    StorageExhausted,
}

impl Classify for SemanticError {
    fn class(&self) -> &'static str {
        use SemanticError::*;

        match self {
            Redeclaration(_) | ReservedName(_) | Rebound(_) => "redeclaration",
            Undefined(_) | UnknownAttribute { .. } | BadHardwareAccess(_) => "unknown-name",
            ArityMismatch { .. } => "arity-mismatch",
            NotAssignable(_) => "not-assignable",
            ReturnOutsideProcedure => "return-outside-procedure",
            ReturnValueInVoid => "return-type-mismatch",
            NestedProcedure => "parse-error",
            StorageExhausted => "storage-exhausted",
            _ => "type-mismatch",
        }
    }
}

/// El universo cerrado de tipos del lenguaje.
///
/// No existe un tipo booleano: las condiciones son enteros y todo
/// valor distinto de cero es verdadero. `Unit` es interno, para
/// posiciones de statement y procedimientos sin retorno; `Error`
/// marca subárboles fallidos para suprimir cascadas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Sprite,
    Tileset,
    Tilemap,
    List,
    Unit,
    Error,
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::Sprite => fmt.write_str("sprite"),
            Type::Tileset => fmt.write_str("tileset"),
            Type::Tilemap => fmt.write_str("tilemap"),
            Type::List => fmt.write_str("list"),
            Type::Unit => fmt.write_str("void"),
            Type::Error => fmt.write_str("<error>"),
        }
    }
}

/// Un símbolo resuelto, con su descriptor de almacenamiento.
#[derive(Clone, Debug)]
pub enum Symbol {
    /// Variable entera en una ranura de WRAM.
    Int { addr: u16 },

    /// Lista plana de enteros; `length` elementos de 2 bytes.
    List { addr: u16, length: u16 },

    /// Asset enlazado a un archivo en disco.
    Asset(Rc<Asset>),

    /// Procedimiento generado.
    Proc(Rc<ProcSig>),

    /// Símbolo envenenado por un error previo; no produce cascadas.
    Error,
}

/// Resultado del análisis semántico.
///
/// Contiene el scope raíz resuelto, el calendario de declaraciones
/// locales en orden de recorrido (consumido por la fase de lowering
/// para reconstruir los mismos scopes), los assets y los enlaces del
/// hardware de video.
#[derive(Debug)]
pub struct Analysis {
    root: HashMap<Identifier, Symbol>,
    schedule: Vec<Symbol>,
    pub assets: Vec<Rc<Asset>>,

    /// Ubicación de la declaración de cada asset, alineada con
    /// `assets`; el driver la usa para reportar archivos faltantes.
    pub asset_sites: Vec<Location>,

    pub tileset0: Option<Rc<Asset>>,
    pub tilemap0: Option<Rc<Asset>>,
    pub data_end: u16,
}

impl Analysis {
    /// Busca un símbolo global.
    pub fn global(&self, name: &Identifier) -> Option<&Symbol> {
        self.root.get(name)
    }

    /// Declaraciones locales en orden de recorrido del árbol.
    pub fn schedule(&self) -> &[Symbol] {
        &self.schedule
    }
}

/// Referencia resuelta dentro del namespace de hardware.
///
/// La clasificación es puramente sintáctica: los nombres `display`,
/// `input` y `control` están reservados y no pueden ser sombreados,
/// por lo cual toda ruta con una de esas bases es de hardware.
pub enum BuiltinPlace<'a> {
    Control(ControlOp),
    Input(u8),
    Tileset0,
    Tilemap0,
    TilemapCell {
        x: &'a Located<Expr>,
        y: &'a Located<Expr>,
    },
    OamField {
        index: &'a Located<Expr>,
        field: OamField,
    },
}

/// Determina si un identificador es una raíz reservada de hardware.
pub fn is_reserved(name: &Identifier) -> bool {
    matches!(name.as_ref(), "display" | "input" | "control")
}

/// Clasifica una ruta contra el namespace de hardware.
///
/// Retorna `None` si la base no es reservada (ruta de usuario).
pub fn builtin_place(place: &Place) -> Option<Semantic<BuiltinPlace<'_>>> {
    let namespace = match place.base().val().as_ref() {
        "control" => "control",
        "input" => "input",
        "display" => "display",
        _ => return None,
    };

    Some(classify(namespace, place))
}

fn classify<'a>(namespace: &'static str, place: &'a Place) -> Semantic<BuiltinPlace<'a>> {
    let path = place.path();
    let bad = || {
        Located::at(
            SemanticError::BadHardwareAccess(namespace),
            place.base().location().clone(),
        )
    };

    match namespace {
        "control" => match path {
            [only] => {
                let (attr, at) = attr_of(only).ok_or_else(bad)?;
                match ControlOp::by_name(attr.as_ref()) {
                    Some(op) => Ok(BuiltinPlace::Control(op)),
                    None => Err(unknown(namespace, attr, at)),
                }
            }
            _ => Err(bad()),
        },

        "input" => match path {
            [only] => {
                let (attr, at) = attr_of(only).ok_or_else(bad)?;
                match sm83::button_index(attr.as_ref()) {
                    Some(index) => Ok(BuiltinPlace::Input(index)),
                    None => Err(unknown(namespace, attr, at)),
                }
            }
            _ => Err(bad()),
        },

        "display" => match path {
            [only] => {
                let (attr, at) = attr_of(only).ok_or_else(bad)?;
                match attr.as_ref() {
                    "tileset0" => Ok(BuiltinPlace::Tileset0),
                    "tilemap0" => Ok(BuiltinPlace::Tilemap0),
                    _ => Err(unknown(namespace, attr, at)),
                }
            }

            [first, x, y] if attr_is(first, "tilemap0") => {
                match (index_of(x), index_of(y)) {
                    (Some(x), Some(y)) => Ok(BuiltinPlace::TilemapCell { x, y }),
                    _ => Err(bad()),
                }
            }

            [first, index, field] if attr_is(first, "oam") => {
                let index = index_of(index).ok_or_else(bad)?;
                let (attr, at) = attr_of(field).ok_or_else(bad)?;

                match OamField::by_name(attr.as_ref()) {
                    Some(field) => Ok(BuiltinPlace::OamField { index, field }),
                    None => Err(unknown(namespace, attr, at)),
                }
            }

            _ => Err(bad()),
        },

        _ => unreachable!(),
    }
}

fn unknown(namespace: &'static str, attr: &Identifier, at: &Location) -> Located<SemanticError> {
    Located::at(
        SemanticError::UnknownAttribute {
            namespace,
            attribute: attr.clone(),
        },
        at.clone(),
    )
}

fn attr_of(selector: &Located<Selector>) -> Option<(&Identifier, &Location)> {
    match selector.val() {
        Selector::Attr(attr) => Some((attr.val(), attr.location())),
        Selector::Index(_) => None,
    }
}

fn attr_is(selector: &Located<Selector>, name: &str) -> bool {
    matches!(attr_of(selector), Some((attr, _)) if attr.as_ref() == name)
}

fn index_of(selector: &Located<Selector>) -> Option<&Located<Expr>> {
    match selector.val() {
        Selector::Index(index) => Some(index),
        Selector::Attr(_) => None,
    }
}

/// Asignador monotónico de ranuras de WRAM.
struct Allocator {
    cursor: u16,
}

impl Allocator {
    fn new() -> Self {
        Allocator {
            cursor: sm83::USER_WRAM,
        }
    }

    /// Reserva `words` palabras de 16 bits contiguas.
    fn alloc(&mut self, words: u16) -> Option<u16> {
        let bytes = words.checked_mul(2)?;
        let addr = self.cursor;
        let end = addr.checked_add(bytes)?;

        if end > sm83::USER_WRAM_END {
            None
        } else {
            self.cursor = end;
            Some(addr)
        }
    }
}

impl Ast {
    /// Analiza semánticamente el programa completo.
    pub fn resolve(&self) -> Result<Analysis, Vec<Located<SemanticError>>> {
        let mut checker = Checker {
            wram: Allocator::new(),
            root: HashMap::new(),
            frames: Vec::new(),
            schedule: Vec::new(),
            assets: Vec::new(),
            asset_sites: Vec::new(),
            labels: HashSet::new(),
            tileset0: None,
            tilemap0: None,
            next_tile: 0,
            returns: None,
            errors: Vec::new(),
        };

        checker.collect(self);
        checker.check(self);

        if checker.errors.is_empty() {
            Ok(Analysis {
                root: checker.root,
                schedule: checker.schedule,
                assets: checker.assets,
                asset_sites: checker.asset_sites,
                tileset0: checker.tileset0,
                tilemap0: checker.tilemap0,
                data_end: checker.wram.cursor,
            })
        } else {
            Err(checker.errors)
        }
    }
}

struct Checker {
    wram: Allocator,
    root: HashMap<Identifier, Symbol>,
    frames: Vec<HashMap<Identifier, Symbol>>,
    schedule: Vec<Symbol>,
    assets: Vec<Rc<Asset>>,
    asset_sites: Vec<Location>,
    labels: HashSet<String>,
    tileset0: Option<Rc<Asset>>,
    tilemap0: Option<Rc<Asset>>,
    next_tile: u16,
    returns: Option<bool>,
    errors: Vec<Located<SemanticError>>,
}

impl Checker {
    fn report(&mut self, error: SemanticError, at: &Location) {
        self.errors.push(Located::at(error, at.clone()));
    }

    /// Primera pasada: registra procedimientos y globales en el scope
    /// raíz para que las referencias hacia adelante resuelvan.
    fn collect(&mut self, ast: &Ast) {
        for statement in ast.statements() {
            match statement {
                Statement::Declaration { of, name } => {
                    self.declare_global(of, name, None);
                }

                Statement::Initialization { of, name, value } => {
                    self.declare_global(of, name, Some(value));
                }

                Statement::ListInit { name, values } => {
                    self.declare_global_list(name, values.len());
                }

                Statement::Procedure(procedure) => self.declare_procedure(procedure),

                _ => (),
            }
        }
    }

    fn declare_global(
        &mut self,
        of: &Located<parse::Type>,
        name: &Located<Identifier>,
        init: Option<&Located<Expr>>,
    ) {
        if is_reserved(name.val()) {
            self.report(SemanticError::ReservedName(name.val().clone()), name.location());
            return;
        }

        if self.root.contains_key(name.val()) {
            self.report(SemanticError::Redeclaration(name.val().clone()), name.location());
            return;
        }

        let symbol = self.make_symbol(of, name, init);
        self.root.insert(name.val().clone(), symbol);
    }

    fn declare_global_list(&mut self, name: &Located<Identifier>, length: usize) {
        if is_reserved(name.val()) {
            self.report(SemanticError::ReservedName(name.val().clone()), name.location());
            return;
        }

        if self.root.contains_key(name.val()) {
            self.report(SemanticError::Redeclaration(name.val().clone()), name.location());
            return;
        }

        let symbol = self.make_list_symbol(name, length);
        self.root.insert(name.val().clone(), symbol);
    }

    fn declare_procedure(&mut self, procedure: &parse::Procedure) {
        let name = procedure.name();

        if is_reserved(name.val()) {
            self.report(SemanticError::ReservedName(name.val().clone()), name.location());
            return;
        }

        if self.root.contains_key(name.val()) {
            self.report(SemanticError::Redeclaration(name.val().clone()), name.location());
            return;
        }

        let returns = match procedure.returns() {
            None => false,
            Some(of) => {
                if *of.val() != parse::Type::Int {
                    self.report(SemanticError::ReturnType(*of.val()), of.location());
                }
                true
            }
        };

        let mut params = Vec::new();
        for parameter in procedure.parameters() {
            if *parameter.of().val() != parse::Type::Int {
                self.report(
                    SemanticError::ParameterType(*parameter.of().val()),
                    parameter.of().location(),
                );
            }

            let addr = match self.wram.alloc(1) {
                Some(addr) => addr,
                None => {
                    self.report(SemanticError::StorageExhausted, parameter.name().location());
                    0
                }
            };

            params.push(addr);
        }

        let sig = Rc::new(ProcSig {
            label: format!("user_{}", name.val()),
            params,
            returns,
        });

        self.root.insert(name.val().clone(), Symbol::Proc(sig));
    }

    /// Construye el símbolo de una declaración no-lista.
    fn make_symbol(
        &mut self,
        of: &Located<parse::Type>,
        name: &Located<Identifier>,
        init: Option<&Located<Expr>>,
    ) -> Symbol {
        match of.val() {
            parse::Type::Int => match self.wram.alloc(1) {
                Some(addr) => Symbol::Int { addr },
                None => {
                    self.report(SemanticError::StorageExhausted, name.location());
                    Symbol::Error
                }
            },

            kind => {
                let kind = match kind {
                    parse::Type::Sprite => AssetKind::Sprite,
                    parse::Type::Tileset => AssetKind::Tileset,
                    parse::Type::Tilemap => AssetKind::Tilemap,
                    parse::Type::Int => unreachable!(),
                };

                match init.map(|value| (value.val(), value.location())) {
                    Some((Expr::Str(path), _)) => {
                        Symbol::Asset(self.bind_asset(kind, name, path))
                    }

                    Some((_, at)) => {
                        let at = at.clone();
                        self.report(SemanticError::MissingAssetPath, &at);
                        Symbol::Error
                    }

                    None => {
                        self.report(SemanticError::MissingAssetPath, name.location());
                        Symbol::Error
                    }
                }
            }
        }
    }

    fn make_list_symbol(&mut self, name: &Located<Identifier>, length: usize) -> Symbol {
        match self.wram.alloc(length as u16) {
            Some(addr) => Symbol::List {
                addr,
                length: length as u16,
            },
            None => {
                self.report(SemanticError::StorageExhausted, name.location());
                Symbol::Error
            }
        }
    }

    fn bind_asset(&mut self, kind: AssetKind, name: &Located<Identifier>, path: &Rc<str>) -> Rc<Asset> {
        let mut label = format!("asset_{}", name.val());
        if !self.labels.insert(label.clone()) {
            label = format!("asset_{}_{}", name.val(), self.assets.len());
            self.labels.insert(label.clone());
        }

        let tile = match kind {
            AssetKind::Sprite => {
                let tile = self.next_tile;
                self.next_tile += 1;

                if tile > 0xFF {
                    self.report(SemanticError::StorageExhausted, name.location());
                    Some(0)
                } else {
                    Some(tile as u8)
                }
            }
            _ => None,
        };

        let asset = Rc::new(Asset {
            label,
            path: Rc::clone(path),
            kind,
            tile,
        });

        self.assets.push(Rc::clone(&asset));
        self.asset_sites.push(name.location().clone());
        asset
    }

    /// Segunda pasada: verificación completa con pila de scopes.
    fn check(&mut self, ast: &Ast) {
        for statement in ast.statements() {
            match statement {
                Statement::Procedure(procedure) => self.check_procedure(procedure),
                statement => self.check_statement(statement),
            }
        }
    }

    fn check_procedure(&mut self, procedure: &parse::Procedure) {
        let sig = match self.root.get(procedure.name().val()) {
            Some(Symbol::Proc(sig)) => Some(Rc::clone(sig)),
            _ => None,
        };

        self.returns = Some(match &sig {
            Some(sig) => sig.returns,
            None => procedure.returns().is_some(),
        });

        self.frames.push(HashMap::new());

        for (position, parameter) in procedure.parameters().iter().enumerate() {
            let name = parameter.name();
            if is_reserved(name.val()) {
                self.report(SemanticError::ReservedName(name.val().clone()), name.location());
                continue;
            }

            if self.frames.last().unwrap().contains_key(name.val()) {
                self.report(SemanticError::Redeclaration(name.val().clone()), name.location());
                continue;
            }

            let symbol = match &sig {
                Some(sig) => match sig.params.get(position) {
                    Some(addr) => Symbol::Int { addr: *addr },
                    None => Symbol::Error,
                },
                None => Symbol::Error,
            };

            self.frames.last_mut().unwrap().insert(name.val().clone(), symbol);
        }

        for statement in procedure.body() {
            self.check_statement(statement);
        }

        self.frames.pop();
        self.returns = None;
    }

    fn check_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Declaration { of, name } => {
                if !self.frames.is_empty() {
                    self.declare_local(of, name, None);
                }
            }

            Statement::Initialization { of, name, value } => {
                if self.frames.is_empty() {
                    // El símbolo global ya existe desde la primera pasada;
                    // aquí solo se verifica el tipo del inicializador
                    if let parse::Type::Int = of.val() {
                        let found = self.eval(value);
                        self.expect_int(found, value.location());
                    }
                } else {
                    self.declare_local(of, name, Some(value));
                }
            }

            Statement::ListInit { name, values } => {
                for value in values {
                    let found = self.eval(value);
                    self.expect_int(found, value.location());
                }

                if !self.frames.is_empty() {
                    self.declare_local_list(name, values.len());
                }
            }

            Statement::Assignment { target, value } => self.check_assignment(target, value),

            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                let found = self.eval(condition);
                self.expect_int(found, condition.location());

                self.check_block(then_body);
                if let Some(else_body) = else_body {
                    self.check_block(else_body);
                }
            }

            Statement::Loop { condition, body } => {
                let found = self.eval(condition);
                self.expect_int(found, condition.location());

                self.check_block(body);
            }

            Statement::Procedure(procedure) => {
                self.report(
                    SemanticError::NestedProcedure,
                    procedure.name().location(),
                );
            }

            Statement::Return { value, at } => match (self.returns, value) {
                (None, _) => self.report(SemanticError::ReturnOutsideProcedure, at),

                (Some(_), None) => (),

                (Some(true), Some(value)) => {
                    let found = self.eval(value);
                    self.expect_int(found, value.location());
                }

                (Some(false), Some(value)) => {
                    self.eval(value);
                    self.report(SemanticError::ReturnValueInVoid, value.location());
                }
            },

            Statement::Call(call) => {
                self.eval_call(call.val(), call.location());
            }
        }
    }

    fn check_block(&mut self, body: &[Statement]) {
        self.frames.push(HashMap::new());
        for statement in body {
            self.check_statement(statement);
        }
        self.frames.pop();
    }

    fn declare_local(
        &mut self,
        of: &Located<parse::Type>,
        name: &Located<Identifier>,
        init: Option<&Located<Expr>>,
    ) {
        // El inicializador se evalúa antes de insertar el símbolo, por
        // lo cual `int x = x;` refiere a un `x` exterior o es error
        if let (parse::Type::Int, Some(value)) = (of.val(), init) {
            let found = self.eval(value);
            self.expect_int(found, value.location());
        }

        let symbol = if is_reserved(name.val()) {
            self.report(SemanticError::ReservedName(name.val().clone()), name.location());
            Symbol::Error
        } else if self.frames.last().unwrap().contains_key(name.val()) {
            self.report(SemanticError::Redeclaration(name.val().clone()), name.location());
            Symbol::Error
        } else {
            let symbol = self.make_symbol(of, name, init);
            self.frames
                .last_mut()
                .unwrap()
                .insert(name.val().clone(), symbol.clone());
            symbol
        };

        self.schedule.push(symbol);
    }

    fn declare_local_list(&mut self, name: &Located<Identifier>, length: usize) {
        let symbol = if is_reserved(name.val()) {
            self.report(SemanticError::ReservedName(name.val().clone()), name.location());
            Symbol::Error
        } else if self.frames.last().unwrap().contains_key(name.val()) {
            self.report(SemanticError::Redeclaration(name.val().clone()), name.location());
            Symbol::Error
        } else {
            let symbol = self.make_list_symbol(name, length);
            self.frames
                .last_mut()
                .unwrap()
                .insert(name.val().clone(), symbol.clone());
            symbol
        };

        self.schedule.push(symbol);
    }

    fn lookup(&self, name: &Identifier) -> Option<Symbol> {
        for frame in self.frames.iter().rev() {
            if let Some(symbol) = frame.get(name) {
                return Some(symbol.clone());
            }
        }

        self.root.get(name).cloned()
    }

    fn check_assignment(&mut self, target: &Located<Place>, value: &Located<Expr>) {
        let place = target.val();

        match builtin_place(place) {
            Some(Ok(BuiltinPlace::Tileset0)) => {
                self.bind_display(value, AssetKind::Tileset);
            }

            Some(Ok(BuiltinPlace::Tilemap0)) => {
                self.bind_display(value, AssetKind::Tilemap);
            }

            Some(Ok(BuiltinPlace::TilemapCell { x, y })) => {
                let found = self.eval(x);
                self.expect_int(found, x.location());
                let found = self.eval(y);
                self.expect_int(found, y.location());

                let found = self.eval(value);
                self.expect_int(found, value.location());
            }

            Some(Ok(BuiltinPlace::OamField { index, field })) => {
                let found = self.eval(index);
                self.expect_int(found, index.location());

                let found = self.eval(value);
                match (field, found) {
                    (OamField::Tile, Type::Sprite) => (),
                    (OamField::Tile, Type::Int) | (OamField::Tile, Type::Error) => (),
                    (OamField::Tile, found) => {
                        self.report(SemanticError::TileMismatch(found), value.location());
                    }
                    (_, found) => {
                        self.expect_int(found, value.location());
                    }
                }
            }

            Some(Ok(BuiltinPlace::Input(_))) => {
                self.report(
                    SemanticError::NotAssignable(String::from("input flags are read-only; `input`")),
                    target.location(),
                );
                self.eval(value);
            }

            Some(Ok(BuiltinPlace::Control(_))) => {
                self.report(
                    SemanticError::NotAssignable(String::from("`control`")),
                    target.location(),
                );
                self.eval(value);
            }

            Some(Err(error)) => {
                self.errors.push(error);
                self.eval(value);
            }

            None => self.check_user_assignment(place, target.location(), value),
        }
    }

    fn bind_display(&mut self, value: &Located<Expr>, expected: AssetKind) {
        let found = self.eval(value);

        let matches = match (expected, found) {
            (AssetKind::Tileset, Type::Tileset) => true,
            (AssetKind::Tilemap, Type::Tilemap) => true,
            (_, Type::Error) => return,
            _ => false,
        };

        if !matches {
            let wanted = match expected {
                AssetKind::Tileset => Type::Tileset,
                AssetKind::Tilemap => Type::Tilemap,
                AssetKind::Sprite => unreachable!(),
            };

            self.report(
                SemanticError::ExpectedType {
                    expected: wanted,
                    found,
                },
                value.location(),
            );
            return;
        }

        let asset = match self.value_asset(value) {
            Some(asset) => asset,
            None => return,
        };

        let (bound, which) = match expected {
            AssetKind::Tileset => (&self.tileset0, "display.tileset0"),
            AssetKind::Tilemap => (&self.tilemap0, "display.tilemap0"),
            AssetKind::Sprite => unreachable!(),
        };

        match bound {
            Some(bound) if !Rc::ptr_eq(bound, &asset) => {
                self.report(SemanticError::Rebound(which), value.location());
            }

            _ => match expected {
                AssetKind::Tileset => self.tileset0 = Some(asset),
                AssetKind::Tilemap => self.tilemap0 = Some(asset),
                AssetKind::Sprite => unreachable!(),
            },
        }
    }

    /// Resuelve el asset nombrado por una expresión de lectura simple.
    fn value_asset(&self, value: &Located<Expr>) -> Option<Rc<Asset>> {
        match value.val() {
            Expr::Read(place) if place.path().is_empty() => {
                match self.lookup(place.base().val()) {
                    Some(Symbol::Asset(asset)) => Some(asset),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn check_user_assignment(
        &mut self,
        place: &Place,
        at: &Location,
        value: &Located<Expr>,
    ) {
        let base = place.base();

        match self.lookup(base.val()) {
            None => {
                self.report(SemanticError::Undefined(base.val().clone()), base.location());
                self.eval(value);
            }

            Some(Symbol::Error) => {
                self.eval(value);
            }

            Some(Symbol::Int { .. }) => {
                if !place.path().is_empty() {
                    self.report(SemanticError::NotIndexable(Type::Int), at);
                }

                let found = self.eval(value);
                self.expect_int(found, value.location());
            }

            Some(Symbol::List { .. }) => {
                match place.path() {
                    [only] => match index_of(only) {
                        Some(index) => {
                            let found = self.eval(index);
                            self.expect_int(found, index.location());
                        }
                        None => self.report(SemanticError::NoAttributes(Type::List), at),
                    },

                    [] => self.report(
                        SemanticError::NotAssignable(format!("list `{}`", base.val())),
                        at,
                    ),

                    _ => self.report(SemanticError::ExtraIndices, at),
                }

                let found = self.eval(value);
                self.expect_int(found, value.location());
            }

            Some(Symbol::Asset(_)) => {
                self.report(
                    SemanticError::NotAssignable(format!("asset `{}`", base.val())),
                    at,
                );
                self.eval(value);
            }

            Some(Symbol::Proc(_)) => {
                self.report(
                    SemanticError::NotAssignable(format!("procedure `{}`", base.val())),
                    at,
                );
                self.eval(value);
            }
        }
    }

    fn eval(&mut self, expr: &Located<Expr>) -> Type {
        match expr.val() {
            Expr::Integer(value) => {
                if *value > 0xFFFF {
                    let error = SemanticError::IntOutOfRange(*value);
                    self.report(error, expr.location());
                    Type::Error
                } else {
                    Type::Int
                }
            }

            Expr::Str(_) => {
                self.report(SemanticError::StrayString, expr.location());
                Type::Error
            }

            Expr::Read(place) => self.eval_read(place, expr.location()),

            Expr::Call(call) => self.eval_call(call, expr.location()),

            Expr::Unary { operand, .. } => {
                let found = self.eval(operand);
                self.expect_int(found, operand.location())
            }

            Expr::Binary { lhs, rhs, .. } => {
                let left = self.eval(lhs);
                let left = self.expect_int(left, lhs.location());
                let right = self.eval(rhs);
                let right = self.expect_int(right, rhs.location());

                match (left, right) {
                    (Type::Int, Type::Int) => Type::Int,
                    _ => Type::Error,
                }
            }
        }
    }

    fn expect_int(&mut self, found: Type, at: &Location) -> Type {
        match found {
            Type::Int => Type::Int,
            Type::Error => Type::Error,
            found => {
                self.report(
                    SemanticError::ExpectedType {
                        expected: Type::Int,
                        found,
                    },
                    at,
                );
                Type::Error
            }
        }
    }

    fn eval_read(&mut self, place: &Place, at: &Location) -> Type {
        match builtin_place(place) {
            Some(Ok(BuiltinPlace::Input(_))) => Type::Int,

            Some(Ok(BuiltinPlace::OamField { index, .. })) => {
                let found = self.eval(index);
                self.expect_int(found, index.location());
                Type::Int
            }

            Some(Ok(BuiltinPlace::TilemapCell { x, y })) => {
                let found = self.eval(x);
                self.expect_int(found, x.location());
                let found = self.eval(y);
                self.expect_int(found, y.location());
                Type::Int
            }

            Some(Ok(BuiltinPlace::Tileset0)) | Some(Ok(BuiltinPlace::Tilemap0)) => {
                self.report(SemanticError::NotReadable("display"), at);
                Type::Error
            }

            Some(Ok(BuiltinPlace::Control(_))) => {
                self.report(SemanticError::NotReadable("control"), at);
                Type::Error
            }

            Some(Err(error)) => {
                self.errors.push(error);
                Type::Error
            }

            None => {
                let base = place.base();
                match self.lookup(base.val()) {
                    None => {
                        self.report(SemanticError::Undefined(base.val().clone()), base.location());
                        Type::Error
                    }

                    Some(Symbol::Error) => Type::Error,

                    Some(Symbol::Int { .. }) => {
                        if place.path().is_empty() {
                            Type::Int
                        } else {
                            self.report(SemanticError::NotIndexable(Type::Int), at);
                            Type::Error
                        }
                    }

                    Some(Symbol::List { .. }) => match place.path() {
                        [] => Type::List,

                        [only] => match index_of(only) {
                            Some(index) => {
                                let found = self.eval(index);
                                self.expect_int(found, index.location());
                                Type::Int
                            }
                            None => {
                                self.report(SemanticError::NoAttributes(Type::List), at);
                                Type::Error
                            }
                        },

                        _ => {
                            self.report(SemanticError::ExtraIndices, at);
                            Type::Error
                        }
                    },

                    Some(Symbol::Asset(asset)) => {
                        if !place.path().is_empty() {
                            let found = match asset.kind {
                                AssetKind::Sprite => Type::Sprite,
                                AssetKind::Tileset => Type::Tileset,
                                AssetKind::Tilemap => Type::Tilemap,
                            };
                            self.report(SemanticError::NoAttributes(found), at);
                            return Type::Error;
                        }

                        match asset.kind {
                            AssetKind::Sprite => Type::Sprite,
                            AssetKind::Tileset => Type::Tileset,
                            AssetKind::Tilemap => Type::Tilemap,
                        }
                    }

                    Some(Symbol::Proc(_)) => {
                        self.report(SemanticError::ExpectedVar(base.val().clone()), at);
                        Type::Error
                    }
                }
            }
        }
    }

    fn eval_call(&mut self, call: &Call, at: &Location) -> Type {
        let place = call.target().val();

        match builtin_place(place) {
            Some(Ok(BuiltinPlace::Control(_))) => {
                if !call.arguments().is_empty() {
                    self.report(
                        SemanticError::ArityMismatch {
                            expected: 0,
                            found: call.arguments().len(),
                        },
                        at,
                    );
                }

                for argument in call.arguments() {
                    self.eval(argument);
                }

                Type::Unit
            }

            Some(Ok(_)) => {
                self.report(
                    SemanticError::NotCallable(place.to_string()),
                    call.target().location(),
                );
                self.eval_arguments(call);
                Type::Error
            }

            Some(Err(error)) => {
                self.errors.push(error);
                self.eval_arguments(call);
                Type::Error
            }

            None => {
                if !place.path().is_empty() {
                    self.report(
                        SemanticError::NotCallable(place.to_string()),
                        call.target().location(),
                    );
                    self.eval_arguments(call);
                    return Type::Error;
                }

                let base = place.base();
                match self.lookup(base.val()) {
                    Some(Symbol::Proc(sig)) => {
                        if call.arguments().len() != sig.params.len() {
                            self.report(
                                SemanticError::ArityMismatch {
                                    expected: sig.params.len(),
                                    found: call.arguments().len(),
                                },
                                at,
                            );
                        }

                        for argument in call.arguments() {
                            let found = self.eval(argument);
                            self.expect_int(found, argument.location());
                        }

                        if sig.returns {
                            Type::Int
                        } else {
                            Type::Unit
                        }
                    }

                    Some(Symbol::Error) => {
                        self.eval_arguments(call);
                        Type::Error
                    }

                    Some(_) => {
                        self.report(
                            SemanticError::NotCallable(base.val().to_string()),
                            base.location(),
                        );
                        self.eval_arguments(call);
                        Type::Error
                    }

                    None => {
                        self.report(SemanticError::Undefined(base.val().clone()), base.location());
                        self.eval_arguments(call);
                        Type::Error
                    }
                }
            }
        }
    }

    fn eval_arguments(&mut self, call: &Call) {
        for argument in call.arguments() {
            self.eval(argument);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn analyze(input: &str) -> Result<Analysis, Vec<Located<SemanticError>>> {
        let (start, stream) = source::consume(input.as_bytes(), "<test>");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .expect("lexing failed");
        let ast = parse::parse(tokens, start).expect("parsing failed");

        ast.resolve()
    }

    fn first_error(input: &str) -> SemanticError {
        let mut errors = analyze(input).err().expect("no errors reported");
        errors.remove(0).into_inner()
    }

    #[test]
    fn globals_get_distinct_word_slots() {
        let analysis = analyze("int a = 1; int b = 2;").unwrap();

        let a = match analysis.global(&Identifier::from("a")) {
            Some(Symbol::Int { addr }) => *addr,
            _ => panic!("a is not an int"),
        };
        let b = match analysis.global(&Identifier::from("b")) {
            Some(Symbol::Int { addr }) => *addr,
            _ => panic!("b is not an int"),
        };

        assert_eq!(a, sm83::USER_WRAM);
        assert_eq!(b, a + 2);
        assert!(b + 2 <= sm83::USER_WRAM_END);
    }

    #[test]
    fn lists_reserve_length_words() {
        let analysis = analyze("list xs = [1, 2, 3]; int after = 0;").unwrap();

        let (addr, length) = match analysis.global(&Identifier::from("xs")) {
            Some(Symbol::List { addr, length }) => (*addr, *length),
            _ => panic!("xs is not a list"),
        };
        let after = match analysis.global(&Identifier::from("after")) {
            Some(Symbol::Int { addr }) => *addr,
            _ => panic!("after is not an int"),
        };

        assert_eq!(length, 3);
        assert_eq!(after, addr + 6);
    }

    #[test]
    fn forward_references_resolve() {
        assert!(analyze("int a = b + sq(2); int b = 2; procedure int sq(int x) { return x * x; }").is_ok());
    }

    #[test]
    fn redeclaration_in_same_scope() {
        assert!(matches!(
            first_error("int a = 1; int a = 2;"),
            SemanticError::Redeclaration(_)
        ));
    }

    #[test]
    fn shadowing_in_inner_scope_is_allowed() {
        assert!(analyze("int a = 1; if (a) { int a = 2; a = 3; }").is_ok());
    }

    #[test]
    fn reserved_roots_cannot_be_declared() {
        let error = first_error("int display = 5;");
        assert!(matches!(error, SemanticError::ReservedName(_)));
        assert_eq!(error.class(), "redeclaration");
    }

    #[test]
    fn string_initializer_for_int_is_a_type_mismatch() {
        let error = first_error("int x = \"hello\";");
        assert!(matches!(error, SemanticError::StrayString));
        assert_eq!(error.class(), "type-mismatch");
    }

    #[test]
    fn literal_out_of_range() {
        assert!(matches!(
            first_error("int x = 65536;"),
            SemanticError::IntOutOfRange(65536)
        ));
        assert!(analyze("int x = 65535;").is_ok());
    }

    #[test]
    fn arity_mismatch_is_reported_at_the_call() {
        let error = first_error("procedure foo(int a) { return; } foo();");
        match error {
            SemanticError::ArityMismatch { expected, found } => {
                assert_eq!((expected, found), (1, 0));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn return_outside_procedure() {
        let error = first_error("int a = 1; return a;");
        assert!(matches!(error, SemanticError::ReturnOutsideProcedure));
        assert_eq!(error.class(), "return-outside-procedure");
    }

    #[test]
    fn valued_return_in_void_procedure() {
        let error = first_error("procedure f() { return 1; }");
        assert!(matches!(error, SemanticError::ReturnValueInVoid));
        assert_eq!(error.class(), "return-type-mismatch");
    }

    #[test]
    fn oam_tile_accepts_sprites_and_ints() {
        assert!(analyze("sprite pengu = \"pengu.2bpp\"; display.oam[0].tile = pengu;").is_ok());
        assert!(analyze("display.oam[0].tile = 7;").is_ok());
        assert!(matches!(
            first_error("tilemap m = \"m.map\"; display.oam[0].tile = m;"),
            SemanticError::TileMismatch(Type::Tilemap)
        ));
    }

    #[test]
    fn oam_position_without_prior_tile_is_fine() {
        assert!(analyze("display.oam[0].x = 16;").is_ok());
    }

    #[test]
    fn input_flags_are_read_only() {
        assert!(analyze("int fire = input.A;").is_ok());
        assert!(matches!(
            first_error("input.A = 1;"),
            SemanticError::NotAssignable(_)
        ));
    }

    #[test]
    fn unknown_hardware_member() {
        let error = first_error("int x = input.C;");
        assert!(matches!(error, SemanticError::UnknownAttribute { .. }));
        assert_eq!(error.class(), "unknown-name");
    }

    #[test]
    fn display_bindings_demand_matching_assets() {
        assert!(analyze(
            "tileset t = \"t.2bpp\"; tilemap m = \"m.map\"; display.tileset0 = t; display.tilemap0 = m;"
        )
        .is_ok());

        assert!(matches!(
            first_error("tilemap m = \"m.map\"; display.tileset0 = m;"),
            SemanticError::ExpectedType {
                expected: Type::Tileset,
                ..
            }
        ));
    }

    #[test]
    fn control_operations_take_no_arguments() {
        assert!(analyze("control.waitVBlank();").is_ok());
        assert!(matches!(
            first_error("control.LCDon(1);"),
            SemanticError::ArityMismatch { expected: 0, found: 1 }
        ));
    }

    #[test]
    fn condition_must_be_an_integer() {
        assert!(matches!(
            first_error("sprite s = \"s.2bpp\"; loop (s) { }"),
            SemanticError::ExpectedType { expected: Type::Int, found: Type::Sprite }
        ));
    }

    #[test]
    fn procedures_are_not_values() {
        assert!(matches!(
            first_error("procedure f() { } int x = f;"),
            SemanticError::ExpectedVar(_)
        ));
    }

    #[test]
    fn sprites_get_sequential_tiles() {
        let analysis =
            analyze("sprite a = \"a.2bpp\"; sprite b = \"b.2bpp\"; sprite c = \"c.2bpp\";").unwrap();

        let tiles: Vec<Option<u8>> = analysis.assets.iter().map(|asset| asset.tile).collect();
        assert_eq!(tiles, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn errors_do_not_cascade() {
        // `y` es indefinida una sola vez; el uso posterior del
        // subárbol fallido no debe duplicar el reporte
        let errors = analyze("int x = y + 1;").unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
