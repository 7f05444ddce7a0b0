//! Emisión de ensamblador RGBDS.
//!
//! El generador consume la representación intermedia procedimiento
//! por procedimiento. No se intenta asignación de registros: toda
//! local virtual vive en una ranura de WRAM dentro de un marco fijo
//! por procedimiento, y los pares `BC`/`DE`/`HL` junto con `A` se
//! usan solo como scratch dentro de la traducción de cada
//! instrucción individual. Correctitud por encima de velocidad.
//!
//! # Distribución de la salida
//! 1. Constantes de hardware, para no depender de `hardware.inc`.
//! 2. La sección de encabezado en `$0100`; los bytes reservados los
//!    completa `rgbfix` después del enlazado.
//! 3. El stub de arranque: pila, limpieza de WRAM, paletas, copias
//!    de assets a VRAM con el LCD apagado, y el salto a `__entry`.
//! 4. Los helpers de runtime, ensamblador escrito a mano.
//! 5. Una sección por procedimiento compilado, en orden de
//!    declaración.
//! 6. La sección de assets con una directiva `INCBIN` por archivo.
//!
//! Los fallos aquí son únicamente de consistencia interna: un
//! programa que llega a esta fase ya no puede producir errores de
//! usuario.

use crate::{
    ir::{BinOp, Instruction, Label, Local, Procedure, Program, Target, Width},
    sm83::{self, Addr, Pair},
};

use std::io::{self, Write};

use thiserror::Error;

/// Error de emisión.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EmitError {
    /// Error de E/S del flujo de salida.
    #[error("I/O error")]
    Io(#[from] io::Error),

    /// Inconsistencia interna; nunca es un error del programa fuente.
    #[error("internal compiler error: {0}")]
    Ice(String),
}

/// Emite el programa completo como texto ensamblador.
pub fn emit<W: Write>(program: &Program, output: &mut W) -> Result<(), EmitError> {
    // Los marcos de temporales se ubican después de las variables
    let mut cursor = program.data_end;
    let mut frames = Vec::with_capacity(program.procedures.len());
    for procedure in &program.procedures {
        procedure.verify().map_err(EmitError::Ice)?;

        frames.push(cursor);
        let bytes = procedure
            .locals
            .checked_mul(2)
            .filter(|bytes| *bytes <= u16::MAX as u32)
            .ok_or_else(|| EmitError::Ice(String::from("temporary frame overflow")))?;

        cursor = cursor
            .checked_add(bytes as u16)
            .filter(|end| *end <= sm83::USER_WRAM_END)
            .ok_or_else(|| EmitError::Ice(String::from("out of work RAM for temporaries")))?;
    }

    let mut cx = Context {
        output,
        frame: 0,
        seq: 0,
    };

    write_constants(&mut cx)?;
    write_header(&mut cx)?;
    write_entry(&mut cx, program, cursor)?;
    write_runtime(&mut cx)?;

    for (procedure, frame) in program.procedures.iter().zip(frames) {
        cx.frame = frame;
        cx.seq = 0;
        write_procedure(&mut cx, procedure)?;
    }

    write_assets(&mut cx, program)?;

    Ok(())
}

struct Context<'a, W> {
    output: &'a mut W,

    /// Base del marco de temporales del procedimiento actual.
    frame: u16,

    /// Secuencia para etiquetas internas del generador.
    seq: u32,
}

impl<W: Write> Context<'_, W> {
    /// Dirección WRAM de una local del procedimiento actual.
    fn local(&self, Local(index): Local) -> u16 {
        self.frame + 2 * index as u16
    }

    /// Etiqueta interna fresca, local a la sección actual.
    fn fresh(&mut self) -> String {
        let label = format!(".Ls{}", self.seq);
        self.seq += 1;

        label
    }

    /// Copia una palabra de WRAM a un par de registros.
    fn load_pair(&mut self, pair: Pair, addr: u16) -> io::Result<()> {
        emit!(self, "ld a, [{}]", Addr(addr))?;
        emit!(self, "ld {}, a", pair.low())?;
        emit!(self, "ld a, [{}]", Addr(addr + 1))?;
        emit!(self, "ld {}, a", pair.high())
    }

    /// Copia `HL` a una palabra de WRAM.
    fn store_hl(&mut self, addr: u16) -> io::Result<()> {
        emit!(self, "ld a, l")?;
        emit!(self, "ld [{}], a", Addr(addr))?;
        emit!(self, "ld a, h")?;
        emit!(self, "ld [{}], a", Addr(addr + 1))
    }

    /// Copia una palabra de WRAM a otra a través de `A`.
    fn copy_word(&mut self, from: u16, to: u16) -> io::Result<()> {
        emit!(self, "ld a, [{}]", Addr(from))?;
        emit!(self, "ld [{}], a", Addr(to))?;
        emit!(self, "ld a, [{}]", Addr(from + 1))?;
        emit!(self, "ld [{}], a", Addr(to + 1))
    }

    /// Deja en `HL` la dirección efectiva `base + index * stride`.
    ///
    /// Los strides del compilador son potencias de dos, por lo cual
    /// la multiplicación se reduce a duplicaciones de `HL`.
    fn effective_address(&mut self, base: u16, index: u16, stride: u16) -> io::Result<()> {
        self.load_pair(Pair::HL, index)?;
        for _ in 0..stride.trailing_zeros() {
            emit!(self, "add hl, hl")?;
        }

        emit!(self, "ld de, {}", Addr(base))?;
        emit!(self, "add hl, de")
    }
}

fn write_constants<W: Write>(cx: &mut Context<'_, W>) -> io::Result<()> {
    writeln!(cx.output, "; Registros de hardware")?;
    writeln!(cx.output, "DEF rP1   EQU {}", Addr(sm83::REG_P1))?;
    writeln!(cx.output, "DEF rLCDC EQU {}", Addr(sm83::REG_LCDC))?;
    writeln!(cx.output, "DEF rLY   EQU {}", Addr(sm83::REG_LY))?;
    writeln!(cx.output, "DEF rBGP  EQU {}", Addr(sm83::REG_BGP))?;
    writeln!(cx.output, "DEF rOBP0 EQU {}", Addr(sm83::REG_OBP0))?;
    writeln!(cx.output)
}

fn write_header<W: Write>(cx: &mut Context<'_, W>) -> io::Result<()> {
    // El logo, los checksums y el tipo de cartucho los rellena el
    // pase de rgbfix del ensamblador
    writeln!(cx.output, "SECTION \"Header\", ROM0[$100]")?;
    emit!(cx, "jp PenguinEntry")?;
    emit!(cx, "ds $150 - @, 0")?;
    writeln!(cx.output)
}

fn write_entry<W: Write>(cx: &mut Context<'_, W>, program: &Program, wram_end: u16) -> io::Result<()> {
    writeln!(cx.output, "SECTION \"Entry\", ROM0")?;
    writeln!(cx.output, "PenguinEntry:")?;
    emit!(cx, "di")?;
    emit!(cx, "ld sp, {}", Addr(sm83::STACK_INIT))?;

    // Limpieza de la WRAM usada, ranuras reservadas incluidas
    let used = wram_end - sm83::WRAM;
    emit!(cx, "ld hl, {}", Addr(sm83::WRAM))?;
    emit!(cx, "ld bc, {}", Addr(used))?;
    writeln!(cx.output, ".clear:")?;
    emit!(cx, "xor a")?;
    emit!(cx, "ld [hli], a")?;
    emit!(cx, "dec bc")?;
    emit!(cx, "ld a, b")?;
    emit!(cx, "or a, c")?;
    emit!(cx, "jp nz, .clear")?;

    // VRAM y OAM solo se tocan con el LCD apagado
    emit!(cx, "call PenguinWaitVBlank")?;
    emit!(cx, "call PenguinLCDoff")?;

    emit!(cx, "ld a, %11100100")?;
    emit!(cx, "ldh [rBGP], a")?;
    emit!(cx, "ld a, %11100100")?;
    emit!(cx, "ldh [rOBP0], a")?;

    for copy in &program.startup {
        emit!(cx, "ld de, {}Start", copy.asset.label)?;
        emit!(cx, "ld hl, {}", Addr(copy.vram))?;
        emit!(cx, "ld bc, {0}End - {0}Start", copy.asset.label)?;
        emit!(cx, "call PenguinMemCopy")?;
    }

    emit!(cx, "call PenguinLCDon")?;
    emit!(cx, "call __entry")?;
    writeln!(cx.output, "PenguinDone:")?;
    emit!(cx, "nop")?;
    emit!(cx, "jp PenguinDone")?;
    writeln!(cx.output)
}

/// Helpers de runtime, emitidos tal cual.
fn write_runtime<W: Write>(cx: &mut Context<'_, W>) -> io::Result<()> {
    writeln!(cx.output, "SECTION \"PenguinRuntime\", ROM0")?;

    writeln!(cx.output, "PenguinMemCopy:")?;
    emit!(cx, "ld a, [de]")?;
    emit!(cx, "ld [hli], a")?;
    emit!(cx, "inc de")?;
    emit!(cx, "dec bc")?;
    emit!(cx, "ld a, b")?;
    emit!(cx, "or a, c")?;
    emit!(cx, "jp nz, PenguinMemCopy")?;
    emit!(cx, "ret")?;
    writeln!(cx.output)?;

    // Preserva los pares de scratch alrededor de una llamada. El
    // retorno se hace por salto porque la dirección queda debajo de
    // los valores apilados.
    writeln!(cx.output, "PenguinPush:")?;
    emit!(cx, "pop hl")?;
    emit!(cx, "push bc")?;
    emit!(cx, "push de")?;
    emit!(cx, "jp hl")?;
    writeln!(cx.output)?;

    writeln!(cx.output, "PenguinPop:")?;
    emit!(cx, "pop hl")?;
    emit!(cx, "pop de")?;
    emit!(cx, "pop bc")?;
    emit!(cx, "jp hl")?;
    writeln!(cx.output)?;

    // Multiplicación por corrimiento y suma: HL = HL * DE mod 2^16
    writeln!(cx.output, "__mul_u16:")?;
    emit!(cx, "ld b, h")?;
    emit!(cx, "ld c, l")?;
    emit!(cx, "ld hl, 0")?;
    writeln!(cx.output, ".loop:")?;
    emit!(cx, "ld a, d")?;
    emit!(cx, "or a, e")?;
    emit!(cx, "ret z")?;
    emit!(cx, "srl d")?;
    emit!(cx, "rr e")?;
    emit!(cx, "jr nc, .skip")?;
    emit!(cx, "add hl, bc")?;
    writeln!(cx.output, ".skip:")?;
    emit!(cx, "sla c")?;
    emit!(cx, "rl b")?;
    emit!(cx, "jr .loop")?;
    writeln!(cx.output)?;

    writeln!(cx.output, "PenguinWaitVBlank:")?;
    emit!(cx, "ldh a, [rLY]")?;
    emit!(cx, "cp 144")?;
    emit!(cx, "jp c, PenguinWaitVBlank")?;
    emit!(cx, "ret")?;
    writeln!(cx.output)?;

    writeln!(cx.output, "PenguinLCDon:")?;
    emit!(cx, "ld a, %10000011")?;
    emit!(cx, "ldh [rLCDC], a")?;
    emit!(cx, "ret")?;
    writeln!(cx.output)?;

    writeln!(cx.output, "PenguinLCDoff:")?;
    emit!(cx, "xor a")?;
    emit!(cx, "ldh [rLCDC], a")?;
    emit!(cx, "ret")?;
    writeln!(cx.output)?;

    // Lee ambos nibbles del joypad (activos en bajo) y refleja cada
    // bandera como 0/1 de 16 bits en su ranura de WRAM
    writeln!(cx.output, "PenguinUpdateInput:")?;
    emit!(cx, "ld a, $20")?;
    emit!(cx, "ldh [rP1], a")?;
    emit!(cx, "ldh a, [rP1]")?;
    emit!(cx, "ldh a, [rP1]")?;
    emit!(cx, "cpl")?;
    emit!(cx, "and a, $0F")?;
    emit!(cx, "ld b, a")?;
    emit!(cx, "ld a, $10")?;
    emit!(cx, "ldh [rP1], a")?;
    emit!(cx, "ldh a, [rP1]")?;
    emit!(cx, "ldh a, [rP1]")?;
    emit!(cx, "ldh a, [rP1]")?;
    emit!(cx, "cpl")?;
    emit!(cx, "and a, $0F")?;
    emit!(cx, "ld c, a")?;
    emit!(cx, "ld a, $30")?;
    emit!(cx, "ldh [rP1], a")?;
    emit!(cx, "ld hl, {}", Addr(sm83::INPUT_MIRROR))?;
    for (position, mask) in [
        ("b", 0x01), // Right
        ("b", 0x02), // Left
        ("b", 0x04), // Up
        ("b", 0x08), // Down
        ("c", 0x01), // A
        ("c", 0x02), // B
        ("c", 0x08), // Start
        ("c", 0x04), // Select
    ]
    .iter()
    {
        emit!(cx, "ld a, {}", position)?;
        emit!(cx, "and a, ${:02X}", mask)?;
        emit!(cx, "call .flag")?;
    }
    emit!(cx, "ret")?;
    writeln!(cx.output, ".flag:")?;
    emit!(cx, "jr z, .store")?;
    emit!(cx, "ld a, 1")?;
    writeln!(cx.output, ".store:")?;
    emit!(cx, "ld [hli], a")?;
    emit!(cx, "xor a")?;
    emit!(cx, "ld [hli], a")?;
    emit!(cx, "ret")?;
    writeln!(cx.output)
}

fn write_procedure<W: Write>(cx: &mut Context<'_, W>, procedure: &Procedure) -> io::Result<()> {
    writeln!(cx.output, "SECTION \"{0}\", ROM0", procedure.sig.label)?;
    writeln!(cx.output, "{}:", procedure.sig.label)?;

    for instruction in &procedure.body {
        write_instruction(cx, instruction)?;
    }

    writeln!(cx.output)
}

fn write_instruction<W: Write>(cx: &mut Context<'_, W>, instruction: &Instruction) -> io::Result<()> {
    use Instruction::*;

    match instruction {
        SetLabel(Label(label)) => writeln!(cx.output, ".L{}:", label),

        Jump(Label(label)) => emit!(cx, "jp .L{}", label),

        JumpIfZero(condition, Label(label)) => {
            let addr = cx.local(*condition);
            emit!(cx, "ld a, [{}]", Addr(addr))?;
            emit!(cx, "ld b, a")?;
            emit!(cx, "ld a, [{}]", Addr(addr + 1))?;
            emit!(cx, "or a, b")?;
            emit!(cx, "jp z, .L{}", label)
        }

        Const(dst, value) => {
            let addr = cx.local(*dst);
            emit!(cx, "ld a, ${:02X}", value & 0xFF)?;
            emit!(cx, "ld [{}], a", Addr(addr))?;
            emit!(cx, "ld a, ${:02X}", value >> 8)?;
            emit!(cx, "ld [{}], a", Addr(addr + 1))
        }

        Load { dst, addr, width } => {
            let dst = cx.local(*dst);
            match width {
                Width::Word => cx.copy_word(*addr, dst),
                Width::Byte => {
                    emit!(cx, "ld a, [{}]", Addr(*addr))?;
                    emit!(cx, "ld [{}], a", Addr(dst))?;
                    emit!(cx, "xor a")?;
                    emit!(cx, "ld [{}], a", Addr(dst + 1))
                }
            }
        }

        Store { addr, src, width } => {
            let src = cx.local(*src);
            match width {
                Width::Word => cx.copy_word(src, *addr),
                Width::Byte => {
                    emit!(cx, "ld a, [{}]", Addr(src))?;
                    emit!(cx, "ld [{}], a", Addr(*addr))
                }
            }
        }

        Move { dst, src } => {
            let dst = cx.local(*dst);
            let src = cx.local(*src);
            cx.copy_word(src, dst)
        }

        BinOp { dst, op, lhs, rhs } => write_binop(cx, *dst, *op, *lhs, *rhs),

        UnOp { dst, op, src } => {
            cx.load_pair(Pair::HL, cx.local(*src))?;

            match op {
                crate::ir::UnOp::Neg => {
                    emit!(cx, "xor a")?;
                    emit!(cx, "sub a, l")?;
                    emit!(cx, "ld l, a")?;
                    emit!(cx, "ld a, 0")?;
                    emit!(cx, "sbc a, h")?;
                    emit!(cx, "ld h, a")?;
                }

                crate::ir::UnOp::BitNot => {
                    emit!(cx, "ld a, l")?;
                    emit!(cx, "cpl")?;
                    emit!(cx, "ld l, a")?;
                    emit!(cx, "ld a, h")?;
                    emit!(cx, "cpl")?;
                    emit!(cx, "ld h, a")?;
                }
            }

            cx.store_hl(cx.local(*dst))
        }

        LoadIndirect {
            dst,
            base,
            index,
            stride,
            width,
        } => {
            cx.effective_address(*base, cx.local(*index), *stride)?;
            let dst = cx.local(*dst);

            match width {
                Width::Byte => {
                    emit!(cx, "ld a, [hl]")?;
                    emit!(cx, "ld [{}], a", Addr(dst))?;
                    emit!(cx, "xor a")?;
                    emit!(cx, "ld [{}], a", Addr(dst + 1))
                }

                Width::Word => {
                    emit!(cx, "ld a, [hli]")?;
                    emit!(cx, "ld [{}], a", Addr(dst))?;
                    emit!(cx, "ld a, [hl]")?;
                    emit!(cx, "ld [{}], a", Addr(dst + 1))
                }
            }
        }

        StoreIndirect {
            base,
            index,
            stride,
            src,
            width,
        } => {
            cx.effective_address(*base, cx.local(*index), *stride)?;
            let src = cx.local(*src);

            match width {
                Width::Byte => {
                    emit!(cx, "ld a, [{}]", Addr(src))?;
                    emit!(cx, "ld [hl], a")
                }

                Width::Word => {
                    emit!(cx, "ld a, [{}]", Addr(src))?;
                    emit!(cx, "ld [hli], a")?;
                    emit!(cx, "ld a, [{}]", Addr(src + 1))?;
                    emit!(cx, "ld [hl], a")
                }
            }
        }

        Call { dst, target, args } => match target {
            Target::Mul => {
                cx.load_pair(Pair::HL, cx.local(args[0]))?;
                cx.load_pair(Pair::DE, cx.local(args[1]))?;
                emit!(cx, "call __mul_u16")?;
                cx.store_hl(cx.local(dst.expect("multiplication without destination")))
            }

            Target::Runtime(label) => emit!(cx, "call {}", label),

            Target::User(sig) => {
                emit!(cx, "call PenguinPush")?;

                for (argument, param) in args.iter().zip(sig.params.iter()) {
                    cx.copy_word(cx.local(*argument), *param)?;
                }

                emit!(cx, "call {}", sig.label)?;
                emit!(cx, "call PenguinPop")?;

                match dst {
                    Some(dst) => cx.copy_word(sm83::RETURN_SLOT, cx.local(*dst)),
                    None => Ok(()),
                }
            }
        },

        Return(value) => {
            if let Some(value) = value {
                cx.copy_word(cx.local(*value), sm83::RETURN_SLOT)?;
            }

            emit!(cx, "ret")
        }
    }
}

fn write_binop<W: Write>(
    cx: &mut Context<'_, W>,
    dst: Local,
    op: BinOp,
    lhs: Local,
    rhs: Local,
) -> io::Result<()> {
    cx.load_pair(Pair::HL, cx.local(lhs))?;
    cx.load_pair(Pair::DE, cx.local(rhs))?;

    match op {
        BinOp::Add => emit!(cx, "add hl, de")?,

        BinOp::Sub => {
            emit!(cx, "ld a, l")?;
            emit!(cx, "sub a, e")?;
            emit!(cx, "ld l, a")?;
            emit!(cx, "ld a, h")?;
            emit!(cx, "sbc a, d")?;
            emit!(cx, "ld h, a")?;
        }

        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            let mnemonic = match op {
                BinOp::BitAnd => "and",
                BinOp::BitOr => "or",
                BinOp::BitXor => "xor",
                _ => unreachable!(),
            };

            emit!(cx, "ld a, l")?;
            emit!(cx, "{} a, e", mnemonic)?;
            emit!(cx, "ld l, a")?;
            emit!(cx, "ld a, h")?;
            emit!(cx, "{} a, d", mnemonic)?;
            emit!(cx, "ld h, a")?;
        }

        BinOp::Shl | BinOp::Shr => {
            let head = cx.fresh();
            let done = cx.fresh();

            writeln!(cx.output, "{}:", head)?;
            emit!(cx, "ld a, d")?;
            emit!(cx, "or a, e")?;
            emit!(cx, "jp z, {}", done)?;

            match op {
                BinOp::Shl => emit!(cx, "add hl, hl")?,
                BinOp::Shr => {
                    emit!(cx, "srl h")?;
                    emit!(cx, "rr l")?;
                }
                _ => unreachable!(),
            }

            emit!(cx, "dec de")?;
            emit!(cx, "jp {}", head)?;
            writeln!(cx.output, "{}:", done)?;
        }

        BinOp::Eq | BinOp::Ne => {
            emit!(cx, "ld a, l")?;
            emit!(cx, "sub a, e")?;
            emit!(cx, "ld b, a")?;
            emit!(cx, "ld a, h")?;
            emit!(cx, "sbc a, d")?;
            emit!(cx, "or a, b")?;

            let done = cx.fresh();
            emit!(cx, "ld hl, 0")?;
            match op {
                BinOp::Eq => emit!(cx, "jp nz, {}", done)?,
                BinOp::Ne => emit!(cx, "jp z, {}", done)?,
                _ => unreachable!(),
            }
            emit!(cx, "ld l, 1")?;
            writeln!(cx.output, "{}:", done)?;
        }

        BinOp::Lt | BinOp::Ge => {
            // El acarreo de HL - DE decide ambas comparaciones
            emit!(cx, "ld a, l")?;
            emit!(cx, "sub a, e")?;
            emit!(cx, "ld a, h")?;
            emit!(cx, "sbc a, d")?;

            let done = cx.fresh();
            emit!(cx, "ld hl, 0")?;
            match op {
                BinOp::Lt => emit!(cx, "jp nc, {}", done)?,
                BinOp::Ge => emit!(cx, "jp c, {}", done)?,
                _ => unreachable!(),
            }
            emit!(cx, "ld l, 1")?;
            writeln!(cx.output, "{}:", done)?;
        }

        BinOp::Gt | BinOp::Le => {
            // Con la resta invertida, el acarreo de DE - HL decide
            emit!(cx, "ld a, e")?;
            emit!(cx, "sub a, l")?;
            emit!(cx, "ld a, d")?;
            emit!(cx, "sbc a, h")?;

            let done = cx.fresh();
            emit!(cx, "ld hl, 0")?;
            match op {
                BinOp::Gt => emit!(cx, "jp nc, {}", done)?,
                BinOp::Le => emit!(cx, "jp c, {}", done)?,
                _ => unreachable!(),
            }
            emit!(cx, "ld l, 1")?;
            writeln!(cx.output, "{}:", done)?;
        }
    }

    cx.store_hl(cx.local(dst))
}

fn write_assets<W: Write>(cx: &mut Context<'_, W>, program: &Program) -> io::Result<()> {
    if program.assets.is_empty() {
        return Ok(());
    }

    writeln!(cx.output, "SECTION \"Assets\", ROMX")?;
    for asset in &program.assets {
        writeln!(cx.output, "{}Start:", asset.label)?;
        emit!(cx, "INCBIN \"{}\"", asset.path)?;
        writeln!(cx.output, "{}End:", asset.label)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{lex::Lexer, lower, parse, source};

    fn assemble(input: &str) -> String {
        let (start, stream) = source::consume(input.as_bytes(), "<test>");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .expect("lexing failed");
        let ast = parse::parse(tokens, start).expect("parsing failed");
        let analysis = ast.resolve().expect("analysis failed");
        let program = lower::lower(&ast, &analysis);

        let mut output = Vec::new();
        super::emit(&program, &mut output).expect("emission failed");
        String::from_utf8(output).expect("emitted assembly is not UTF-8")
    }

    #[test]
    fn header_and_entry_are_present() {
        let asm = assemble("int a = 5;");
        assert!(asm.contains("SECTION \"Header\", ROM0[$100]"));
        assert!(asm.contains("jp PenguinEntry"));
        assert!(asm.contains("ds $150 - @, 0"));
        assert!(asm.contains("ld sp, $DFFF"));
        assert!(asm.contains("call __entry"));
    }

    #[test]
    fn runtime_helpers_are_always_emitted() {
        let asm = assemble("int a = 0;");
        for helper in [
            "PenguinMemCopy:",
            "PenguinPush:",
            "PenguinPop:",
            "__mul_u16:",
            "PenguinWaitVBlank:",
            "PenguinLCDon:",
            "PenguinLCDoff:",
            "PenguinUpdateInput:",
        ]
        .iter()
        {
            assert!(asm.contains(helper), "missing helper {}", helper);
        }
    }

    #[test]
    fn constants_store_both_bytes() {
        let asm = assemble("int a = 5; int b = a + 3;");
        // 5 en el primer temporal, byte bajo y alto por separado
        assert!(asm.contains("ld a, $05"));
        assert!(asm.contains("add hl, de"));
    }

    #[test]
    fn multiplication_calls_the_helper() {
        let asm = assemble("procedure int sq(int x) { return x * x; } int r = sq(7);");
        assert!(asm.contains("call __mul_u16"));
        assert!(asm.contains("SECTION \"user_sq\", ROM0"));
    }

    #[test]
    fn oam_store_is_a_single_byte_write() {
        let asm = assemble("display.oam[0].x = 16;");
        // base = $FE00 + 1 (campo x), stride 4
        assert!(asm.contains("ld de, $FE01"));

        let byte_stores = asm.matches("ld [hl], a").count();
        assert_eq!(byte_stores, 1);
    }

    #[test]
    fn assets_are_included_with_bracketing_labels() {
        let asm = assemble(
            "tileset bg = \"assets/bg.2bpp\";\n\
             display.tileset0 = bg;",
        );

        assert!(asm.contains("SECTION \"Assets\", ROMX"));
        assert!(asm.contains("asset_bgStart:"));
        assert!(asm.contains("INCBIN \"assets/bg.2bpp\""));
        assert!(asm.contains("asset_bgEnd:"));
        assert!(asm.contains("ld bc, asset_bgEnd - asset_bgStart"));
        assert!(asm.contains("ld hl, $9000"));
    }

    #[test]
    fn no_assets_no_asset_section() {
        let asm = assemble("int a = 1;");
        assert!(!asm.contains("SECTION \"Assets\""));
    }

    #[test]
    fn user_calls_bracket_push_with_pop() {
        let asm = assemble(
            "procedure int twice(int x) { return x + x; }\n\
             int a = twice(2);\n\
             int b = twice(twice(3));",
        );

        let pushes = asm.matches("call PenguinPush").count();
        let pops = asm.matches("call PenguinPop").count();
        assert_eq!(pushes, pops);
        assert_eq!(pushes, 3);
    }

    #[test]
    fn procedures_end_in_ret() {
        let asm = assemble("procedure f() { } f();");
        let section = asm
            .split("SECTION \"user_f\", ROM0")
            .nth(1)
            .expect("missing user_f section");
        assert!(section.trim_start().starts_with("user_f:"));
        assert!(section.contains("ret"));
    }

    #[test]
    fn output_uses_lf_line_endings() {
        let asm = assemble("int a = 1;");
        assert!(!asm.contains('\r'));
    }
}
