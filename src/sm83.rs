//! Detalles del procesador y el mapa de memoria objetivo.
//!
//! El objetivo de compilación es el Game Boy original (DMG), cuyo
//! procesador SM83 expone un bus de direcciones de 16 bits con un
//! mapa fijo: ROM en `$0000-$7FFF`, VRAM en `$8000-$9FFF`, WRAM en
//! `$C000-$DFFF`, OAM en `$FE00-$FE9F` y registros de E/S a partir
//! de `$FF00`. Este módulo centraliza esas direcciones junto con la
//! distribución de WRAM que el compilador reserva para sí.

use std::fmt::{self, Display};

/// Bloque de tiles para sprites (OBJ), siempre en `$8000`.
pub const OBJ_TILE_DATA: u16 = 0x8000;

/// Bloque de tiles de fondo. Se usa el bloque 2, que corresponde
/// a los índices 0..=127 cuando LCDC.4 está apagado.
pub const BG_TILE_DATA: u16 = 0x9000;

/// Primer tilemap de fondo.
pub const TILEMAP0: u16 = 0x9800;

/// Lado de un tilemap, en tiles.
pub const TILEMAP_SIDE: u16 = 32;

/// Object Attribute Memory: 40 ranuras de sprite.
pub const OAM: u16 = 0xFE00;

/// Bytes por ranura de OAM.
pub const OAM_STRIDE: u16 = 4;

/// Cantidad de ranuras de OAM.
pub const OAM_SLOTS: u16 = 40;

/// Bytes por tile en formato 2bpp.
pub const TILE_BYTES: u16 = 16;

/// Inicio de la WRAM.
pub const WRAM: u16 = 0xC000;

/// Ranura compartida para valores de retorno de procedimientos.
pub const RETURN_SLOT: u16 = 0xC000;

/// Espejo en WRAM de las ocho banderas del joypad, una palabra
/// de 16 bits por bandera, actualizado por `updateInput`.
pub const INPUT_MIRROR: u16 = 0xC002;

/// Primera dirección disponible para almacenamiento de programa.
pub const USER_WRAM: u16 = 0xC020;

/// Límite superior exclusivo del almacenamiento de programa. El
/// espacio restante queda para la pila.
pub const USER_WRAM_END: u16 = 0xDF00;

/// Valor inicial del stack pointer; la pila crece hacia abajo.
pub const STACK_INIT: u16 = 0xDFFF;

/// Registro del joypad.
pub const REG_P1: u16 = 0xFF00;

/// Registro de control del LCD.
pub const REG_LCDC: u16 = 0xFF40;

/// Línea de barrido actual.
pub const REG_LY: u16 = 0xFF44;

/// Paleta de fondo.
pub const REG_BGP: u16 = 0xFF47;

/// Paleta de objetos 0.
pub const REG_OBP0: u16 = 0xFF48;

/// Una dirección absoluta en notación RGBDS (`$ABCD`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Addr(pub u16);

impl Display for Addr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Addr(address) = self;
        write!(fmt, "${:04X}", address)
    }
}

/// Par de registros de 16 bits usado como scratch.
///
/// El generador de código no asigna registros: todo valor vive en
/// WRAM y los pares se usan únicamente dentro de la traducción de
/// una instrucción individual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pair {
    BC,
    DE,
    HL,
}

impl Pair {
    /// Registro de 8 bits con el byte bajo.
    pub fn low(self) -> &'static str {
        match self {
            Pair::BC => "c",
            Pair::DE => "e",
            Pair::HL => "l",
        }
    }

    /// Registro de 8 bits con el byte alto.
    pub fn high(self) -> &'static str {
        match self {
            Pair::BC => "b",
            Pair::DE => "d",
            Pair::HL => "h",
        }
    }
}

impl Display for Pair {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pair::BC => fmt.write_str("bc"),
            Pair::DE => fmt.write_str("de"),
            Pair::HL => fmt.write_str("hl"),
        }
    }
}

/// Campo de una ranura de OAM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OamField {
    Y,
    X,
    Tile,
    Attr,
}

impl OamField {
    /// Desplazamiento del campo dentro de su ranura.
    pub fn offset(self) -> u16 {
        match self {
            OamField::Y => 0,
            OamField::X => 1,
            OamField::Tile => 2,
            OamField::Attr => 3,
        }
    }

    /// Busca un campo por su nombre en el lenguaje fuente.
    pub fn by_name(name: &str) -> Option<OamField> {
        match name {
            "y" => Some(OamField::Y),
            "x" => Some(OamField::X),
            "tile" => Some(OamField::Tile),
            "attr" => Some(OamField::Attr),
            _ => None,
        }
    }
}

/// Operación del namespace `control`, servida por el runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlOp {
    LcdOn,
    LcdOff,
    WaitVBlank,
    UpdateInput,
}

impl ControlOp {
    /// Etiqueta del helper de runtime que implementa la operación.
    pub fn runtime_label(self) -> &'static str {
        match self {
            ControlOp::LcdOn => "PenguinLCDon",
            ControlOp::LcdOff => "PenguinLCDoff",
            ControlOp::WaitVBlank => "PenguinWaitVBlank",
            ControlOp::UpdateInput => "PenguinUpdateInput",
        }
    }

    /// Busca una operación por su nombre en el lenguaje fuente.
    pub fn by_name(name: &str) -> Option<ControlOp> {
        match name {
            "LCDon" => Some(ControlOp::LcdOn),
            "LCDoff" => Some(ControlOp::LcdOff),
            "waitVBlank" => Some(ControlOp::WaitVBlank),
            "updateInput" => Some(ControlOp::UpdateInput),
            _ => None,
        }
    }
}

/// Las ocho banderas del joypad, en el orden de sus espejos en WRAM.
pub const BUTTONS: &[&str] = &[
    "Right", "Left", "Up", "Down", "A", "B", "Start", "Select",
];

/// Índice de una bandera del joypad por su nombre fuente.
pub fn button_index(name: &str) -> Option<u8> {
    BUTTONS
        .iter()
        .position(|button| *button == name)
        .map(|index| index as u8)
}

/// Dirección del espejo en WRAM de una bandera del joypad.
pub fn button_mirror(index: u8) -> u16 {
    INPUT_MIRROR + 2 * index as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oam_field_offsets() {
        assert_eq!(OamField::Y.offset(), 0);
        assert_eq!(OamField::X.offset(), 1);
        assert_eq!(OamField::Tile.offset(), 2);
        assert_eq!(OamField::Attr.offset(), 3);
    }

    #[test]
    fn reserved_wram_precedes_user_wram() {
        assert!(RETURN_SLOT >= WRAM);
        assert!(button_mirror(7) < USER_WRAM);
        assert!(USER_WRAM_END < STACK_INIT);
    }

    #[test]
    fn addresses_render_in_rgbds_notation() {
        assert_eq!(Addr(0xFE00).to_string(), "$FE00");
        assert_eq!(Addr(0x0042).to_string(), "$0042");
    }
}
