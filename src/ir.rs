//! Representación intermedia de código.
//!
//! La representación intermedia es lineal y recuerda ligeramente
//! a lenguajes ensambladores. Idealmente, debe ser simple traducir
//! un programa semánticamente analizado a representación intermedia,
//! y a su vez debe ser simple traducir código IR al ensamblador
//! objetivo.
//!
//! # Locales
//! Todo procedimiento generado dispone de un número de "locales",
//! cada una de las cuales se identifica por índice. Las locales son
//! celdas de memoria de 16 bits que el generador de código ubica en
//! WRAM, en un marco fijo por procedimiento. Los parámetros no son
//! locales: viven en ranuras propias descritas por [`ProcSig`].
//!
//! # Etiquetas
//! El control de flujo se realiza a través de etiquetas y saltos. Las
//! etiquetas, al igual que las locales, existen por el hecho de ser
//! identificadas numéricamente y no se declaran de alguna otra manera.
//! Un bloque básico termina exactamente en un salto, una bifurcación
//! o un retorno.
//!
//! # Símbolos
//! Para este punto del proceso de compilación, las variables ya son
//! direcciones absolutas de WRAM y los assets son etiquetas listas
//! para ensamblarse.

use std::rc::Rc;

/// Un programa en representación intermedia.
pub struct Program {
    /// Procedimientos generados; el primero es el punto de entrada.
    pub procedures: Vec<Procedure>,

    /// Assets referenciados por el programa, en orden de declaración.
    pub assets: Vec<Rc<Asset>>,

    /// Copias de ROM a VRAM que el stub de arranque realiza con el
    /// LCD apagado.
    pub startup: Vec<StartupCopy>,

    /// Límite superior exclusivo de la WRAM asignada a variables.
    pub data_end: u16,
}

/// Un procedimiento generado.
pub struct Procedure {
    pub sig: Rc<ProcSig>,
    pub locals: u32,
    pub body: Vec<Instruction>,
}

/// Interfaz invocable de un procedimiento.
///
/// Los argumentos se copian a ranuras fijas de WRAM, una por
/// parámetro, y el valor de retorno a una ranura compartida; no
/// existe convención de llamada basada en pila.
#[derive(Debug)]
pub struct ProcSig {
    pub label: String,
    pub params: Vec<u16>,
    pub returns: bool,
}

/// Un archivo binario incluido en la ROM.
#[derive(Debug)]
pub struct Asset {
    pub label: String,
    pub path: Rc<str>,
    pub kind: AssetKind,

    /// Índice de tile asignado; solo para sprites.
    pub tile: Option<u8>,
}

/// Clase de asset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Sprite,
    Tileset,
    Tilemap,
}

/// Una copia de asset a VRAM durante el arranque.
pub struct StartupCopy {
    pub asset: Rc<Asset>,
    pub vram: u16,
}

/// Las etiquetas están constituidas por identificadores arbitrarios,
/// no necesariamente secuenciales pero sí únicos por procedimiento.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(pub u32);

/// Las locales se identifican por índices secuenciales.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Local(pub u32);

/// Ancho de un acceso a memoria.
///
/// Los valores del lenguaje son de 16 bits, pero los accesos a
/// hardware de video (OAM, tilemap) son de un byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
}

/// Operación binaria de la representación intermedia.
///
/// La multiplicación no aparece aquí: se reduce a una llamada al
/// helper `__mul_u16`. Los operadores lógicos del lenguaje tampoco:
/// se reducen a comparaciones contra cero y operaciones de bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
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
}

/// Operación unaria de la representación intermedia.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BitNot,
}

/// Destino de una llamada.
pub enum Target {
    /// Procedimiento generado por el compilador.
    User(Rc<ProcSig>),

    /// Multiplicación por software; toma dos argumentos y produce
    /// un resultado, todos en registros.
    Mul,

    /// Helper de runtime sin argumentos ni resultado.
    Runtime(&'static str),
}

/// Una instrucción de representación intermedia.
pub enum Instruction {
    /// Establecer la ubicación de una etiqueta al punto donde ocurre
    /// esta instrucción en la secuencia del programa.
    SetLabel(Label),

    /// Saltar incondicionalmente a una etiqueta.
    Jump(Label),

    /// Saltar a una etiqueta si y solo si el valor de una local es cero.
    /// De lo contrario, no se realiza ninguna acción.
    JumpIfZero(Local, Label),

    /// Sobreescribir los contenidos de una local con una constante.
    Const(Local, u16),

    /// Copiar de una dirección absoluta a una local.
    Load {
        dst: Local,
        addr: u16,
        width: Width,
    },

    /// Copiar de una local a una dirección absoluta.
    Store {
        addr: u16,
        src: Local,
        width: Width,
    },

    /// Copiar una local a otra.
    Move { dst: Local, src: Local },

    /// Operación binaria entre locales.
    BinOp {
        dst: Local,
        op: BinOp,
        lhs: Local,
        rhs: Local,
    },

    /// Operación unaria sobre una local.
    UnOp { dst: Local, op: UnOp, src: Local },

    /// Carga indexada: `dst = [base + index * stride]`.
    LoadIndirect {
        dst: Local,
        base: u16,
        index: Local,
        stride: u16,
        width: Width,
    },

    /// Almacenamiento indexado: `[base + index * stride] = src`.
    StoreIndirect {
        base: u16,
        index: Local,
        stride: u16,
        src: Local,
        width: Width,
    },

    /// Llamar a un destino, copiando los argumentos desde las locales
    /// indicadas. Opcionalmente el valor de retorno se escribe a una
    /// local. Los contenidos de locales se preservan tras la llamada.
    Call {
        dst: Option<Local>,
        target: Target,
        args: Vec<Local>,
    },

    /// Retornar, opcionalmente con un valor.
    Return(Option<Local>),
}

impl Procedure {
    /// Revisa la buena formación del cuerpo: todo salto aterriza en
    /// una etiqueta definida y la última instrucción es terminal.
    ///
    /// Una violación aquí es un defecto del compilador, nunca un
    /// error del programa fuente.
    pub fn verify(&self) -> Result<(), String> {
        let defined: Vec<Label> = self
            .body
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::SetLabel(label) => Some(*label),
                _ => None,
            })
            .collect();

        for instruction in &self.body {
            let target = match instruction {
                Instruction::Jump(label) => Some(label),
                Instruction::JumpIfZero(_, label) => Some(label),
                _ => None,
            };

            if let Some(label) = target {
                if !defined.contains(label) {
                    return Err(format!(
                        "jump to undefined label {:?} in `{}`",
                        label, self.sig.label
                    ));
                }
            }
        }

        match self.body.last() {
            Some(Instruction::Return(_)) | Some(Instruction::Jump(_)) => Ok(()),
            _ => Err(format!("`{}` does not end in a terminator", self.sig.label)),
        }
    }
}
