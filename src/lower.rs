//! Reducción del árbol sintáctico a representación intermedia.
//!
//! Esta fase solo se ejecuta sobre programas que pasaron el análisis
//! semántico completo, por lo cual no reporta errores de usuario:
//! toda inconsistencia encontrada aquí es un defecto del compilador.
//!
//! Las expresiones se reducen de abajo hacia arriba, produciendo una
//! local virtual nueva por resultado intermedio; las locales se
//! reutilizan entre statements. El control de flujo se reduce a
//! etiquetas numéricas y saltos condicionales sobre cero.
//!
//! Los statements de nivel superior que no son procedimientos forman
//! el procedimiento implícito `__entry`, invocado por el stub de
//! arranque.

use std::{collections::HashMap, rc::Rc};

use crate::{
    ir::{
        self, AssetKind, Instruction, Label, Local, ProcSig, Program, StartupCopy, Target, Width,
    },
    lex::Identifier,
    parse::{self, Ast, BinaryOp, Call, Expr, Place, Selector, Statement, UnaryOp},
    semantic::{builtin_place, Analysis, BuiltinPlace, Symbol},
    sm83,
    source::Located,
};

/// Reduce un programa analizado a representación intermedia.
pub fn lower(ast: &Ast, analysis: &Analysis) -> Program {
    let mut lowerer = Lowerer {
        analysis,
        schedule: analysis.schedule().iter(),
        frames: Vec::new(),
        body: Vec::new(),
        locals: 0,
        max_locals: 0,
        next_label: 0,
    };

    // El recorrido replica el orden de la fase semántica: los cuerpos
    // de procedimientos se reducen al encontrarlos, intercalados con
    // los statements del programa principal
    let mut user = Vec::new();
    for statement in ast.statements() {
        match statement {
            Statement::Procedure(procedure) => {
                let body = std::mem::take(&mut lowerer.body);
                let locals = std::mem::replace(&mut lowerer.locals, 0);
                let max_locals = std::mem::replace(&mut lowerer.max_locals, 0);
                let next_label = std::mem::replace(&mut lowerer.next_label, 0);

                user.push(lowerer.procedure(procedure));

                lowerer.body = body;
                lowerer.locals = locals;
                lowerer.max_locals = max_locals;
                lowerer.next_label = next_label;
            }

            statement => lowerer.statement(statement),
        }
    }

    lowerer.terminate();

    let entry = ir::Procedure {
        sig: Rc::new(ProcSig {
            label: String::from("__entry"),
            params: Vec::new(),
            returns: false,
        }),
        locals: lowerer.max_locals,
        body: std::mem::take(&mut lowerer.body),
    };

    let mut procedures = vec![entry];
    procedures.extend(user);

    let mut startup = Vec::new();
    for asset in &analysis.assets {
        if asset.kind == AssetKind::Sprite {
            let tile = asset.tile.expect("sprite without tile index") as u16;
            startup.push(StartupCopy {
                asset: Rc::clone(asset),
                vram: sm83::OBJ_TILE_DATA + sm83::TILE_BYTES * tile,
            });
        }
    }

    if let Some(asset) = &analysis.tileset0 {
        startup.push(StartupCopy {
            asset: Rc::clone(asset),
            vram: sm83::BG_TILE_DATA,
        });
    }

    if let Some(asset) = &analysis.tilemap0 {
        startup.push(StartupCopy {
            asset: Rc::clone(asset),
            vram: sm83::TILEMAP0,
        });
    }

    Program {
        procedures,
        assets: analysis.assets.clone(),
        startup,
        data_end: analysis.data_end,
    }
}

struct Lowerer<'a> {
    analysis: &'a Analysis,
    schedule: std::slice::Iter<'a, Symbol>,
    frames: Vec<HashMap<Identifier, Symbol>>,
    body: Vec<Instruction>,
    locals: u32,
    max_locals: u32,
    next_label: u32,
}

impl<'a> Lowerer<'a> {
    fn procedure(&mut self, procedure: &parse::Procedure) -> ir::Procedure {
        let sig = match self.analysis.global(procedure.name().val()) {
            Some(Symbol::Proc(sig)) => Rc::clone(sig),
            _ => unreachable!("procedure vanished after analysis"),
        };

        self.frames.push(HashMap::new());
        for (parameter, addr) in procedure.parameters().iter().zip(sig.params.iter()) {
            self.frames
                .last_mut()
                .unwrap()
                .insert(parameter.name().val().clone(), Symbol::Int { addr: *addr });
        }

        for statement in procedure.body() {
            self.statement(statement);
        }

        self.frames.pop();
        self.terminate();

        ir::Procedure {
            sig,
            locals: self.max_locals,
            body: std::mem::take(&mut self.body),
        }
    }

    /// Garantiza que el cuerpo termina en un retorno.
    fn terminate(&mut self) {
        match self.body.last() {
            Some(Instruction::Return(_)) => (),
            _ => self.body.push(Instruction::Return(None)),
        }
    }

    fn statement(&mut self, statement: &Statement) {
        // Las locales temporales no viven entre statements
        self.locals = 0;

        match statement {
            Statement::Declaration { name, .. } => {
                self.declare(name.val());
            }

            Statement::Initialization { of, name, value } => match of.val() {
                parse::Type::Int => {
                    let result = self.eval(value);
                    match self.declare(name.val()) {
                        Symbol::Int { addr } => self.body.push(Instruction::Store {
                            addr,
                            src: result,
                            width: Width::Word,
                        }),
                        _ => unreachable!("int initialization of non-int symbol"),
                    }
                }

                // Los assets no producen código: quedan ligados a sus
                // archivos para la emisión de INCBIN
                _ => {
                    self.declare(name.val());
                }
            },

            Statement::ListInit { name, values } => {
                let results: Vec<Local> = values.iter().map(|value| self.eval(value)).collect();

                match self.declare(name.val()) {
                    Symbol::List { addr, .. } => {
                        for (position, result) in results.into_iter().enumerate() {
                            self.body.push(Instruction::Store {
                                addr: addr + 2 * position as u16,
                                src: result,
                                width: Width::Word,
                            });
                        }
                    }
                    _ => unreachable!("list initialization of non-list symbol"),
                }
            }

            Statement::Assignment { target, value } => self.assignment(target.val(), value),

            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.eval(condition);

                match else_body {
                    None => {
                        let end = self.label();
                        self.body.push(Instruction::JumpIfZero(condition, end));
                        self.block(then_body);
                        self.body.push(Instruction::SetLabel(end));
                    }

                    Some(else_body) => {
                        let otherwise = self.label();
                        let end = self.label();

                        self.body.push(Instruction::JumpIfZero(condition, otherwise));
                        self.block(then_body);
                        self.body.push(Instruction::Jump(end));
                        self.body.push(Instruction::SetLabel(otherwise));
                        self.block(else_body);
                        self.body.push(Instruction::SetLabel(end));
                    }
                }
            }

            Statement::Loop { condition, body } => {
                let head = self.label();
                let exit = self.label();

                self.body.push(Instruction::SetLabel(head));
                let condition = self.eval(condition);
                self.body.push(Instruction::JumpIfZero(condition, exit));

                self.block(body);

                self.body.push(Instruction::Jump(head));
                self.body.push(Instruction::SetLabel(exit));
            }

            Statement::Return { value, .. } => {
                let result = value.as_ref().map(|value| self.eval(value));
                self.body.push(Instruction::Return(result));
            }

            Statement::Call(call) => {
                self.call(call.val(), false);
            }

            Statement::Procedure(_) => unreachable!("nested procedure after analysis"),
        }
    }

    fn block(&mut self, body: &[Statement]) {
        self.frames.push(HashMap::new());
        for statement in body {
            self.statement(statement);
        }
        self.frames.pop();
    }

    /// Materializa la siguiente declaración local, o resuelve el
    /// símbolo global ya registrado si estamos a nivel superior.
    fn declare(&mut self, name: &Identifier) -> Symbol {
        if self.frames.is_empty() {
            self.analysis
                .global(name)
                .cloned()
                .unwrap_or_else(|| unreachable!("global vanished after analysis"))
        } else {
            let symbol = self
                .schedule
                .next()
                .expect("declaration schedule drained early")
                .clone();

            self.frames
                .last_mut()
                .unwrap()
                .insert(name.clone(), symbol.clone());

            symbol
        }
    }

    fn lookup(&self, name: &Identifier) -> Symbol {
        for frame in self.frames.iter().rev() {
            if let Some(symbol) = frame.get(name) {
                return symbol.clone();
            }
        }

        self.analysis
            .global(name)
            .cloned()
            .unwrap_or_else(|| unreachable!("name vanished after analysis"))
    }

    fn assignment(&mut self, place: &Place, value: &Located<Expr>) {
        match builtin_place(place) {
            // Los enlaces de video son estáticos: el stub de arranque
            // realiza la copia, aquí no se emite código
            Some(Ok(BuiltinPlace::Tileset0)) | Some(Ok(BuiltinPlace::Tilemap0)) => (),

            Some(Ok(BuiltinPlace::TilemapCell { x, y })) => {
                let index = self.tilemap_index(x, y);
                let result = self.eval(value);

                self.body.push(Instruction::StoreIndirect {
                    base: sm83::TILEMAP0,
                    index,
                    stride: 1,
                    src: result,
                    width: Width::Byte,
                });
            }

            Some(Ok(BuiltinPlace::OamField { index, field })) => {
                let index = self.eval(index);
                let result = self.eval(value);

                self.body.push(Instruction::StoreIndirect {
                    base: sm83::OAM + field.offset(),
                    index,
                    stride: sm83::OAM_STRIDE,
                    src: result,
                    width: Width::Byte,
                });
            }

            Some(_) => unreachable!("invalid hardware store after analysis"),

            None => match self.lookup(place.base().val()) {
                Symbol::Int { addr } => {
                    let result = self.eval(value);
                    self.body.push(Instruction::Store {
                        addr,
                        src: result,
                        width: Width::Word,
                    });
                }

                Symbol::List { addr, .. } => {
                    let index = match place.path() {
                        [only] => match only.val() {
                            Selector::Index(index) => self.eval(index),
                            Selector::Attr(_) => unreachable!("list attribute after analysis"),
                        },
                        _ => unreachable!("bad list access after analysis"),
                    };

                    let result = self.eval(value);
                    self.body.push(Instruction::StoreIndirect {
                        base: addr,
                        index,
                        stride: 2,
                        src: result,
                        width: Width::Word,
                    });
                }

                _ => unreachable!("invalid assignment after analysis"),
            },
        }
    }

    fn eval(&mut self, expr: &Located<Expr>) -> Local {
        match expr.val() {
            Expr::Integer(value) => {
                let result = self.temp();
                self.body.push(Instruction::Const(result, *value as u16));
                result
            }

            Expr::Str(_) => unreachable!("string literal after analysis"),

            Expr::Read(place) => self.read(place),

            Expr::Call(call) => self
                .call(call, true)
                .expect("valueless call in expression"),

            Expr::Unary { op, operand } => match op {
                UnaryOp::Plus => self.eval(operand),

                UnaryOp::Minus => {
                    let source = self.eval(operand);
                    let result = self.temp();
                    self.body.push(Instruction::UnOp {
                        dst: result,
                        op: ir::UnOp::Neg,
                        src: source,
                    });
                    result
                }

                UnaryOp::BitNot => {
                    let source = self.eval(operand);
                    let result = self.temp();
                    self.body.push(Instruction::UnOp {
                        dst: result,
                        op: ir::UnOp::BitNot,
                        src: source,
                    });
                    result
                }

                // `not x` es exactamente `x == 0`
                UnaryOp::Not => {
                    let source = self.eval(operand);
                    let zero = self.temp();
                    self.body.push(Instruction::Const(zero, 0));

                    let result = self.temp();
                    self.body.push(Instruction::BinOp {
                        dst: result,
                        op: ir::BinOp::Eq,
                        lhs: source,
                        rhs: zero,
                    });
                    result
                }
            },

            Expr::Binary { op, lhs, rhs } => match op {
                // El objetivo no tiene instrucción de multiplicación
                BinaryOp::Mul => {
                    let lhs = self.eval(lhs);
                    let rhs = self.eval(rhs);
                    let result = self.temp();

                    self.body.push(Instruction::Call {
                        dst: Some(result),
                        target: Target::Mul,
                        args: vec![lhs, rhs],
                    });
                    result
                }

                // Los operadores lógicos normalizan cada operando a
                // 0/1 y luego aplican la operación de bits
                BinaryOp::And => self.logical(lhs, rhs, ir::BinOp::BitAnd),
                BinaryOp::Or => self.logical(lhs, rhs, ir::BinOp::BitOr),
                BinaryOp::Xor => self.logical(lhs, rhs, ir::BinOp::BitXor),

                op => {
                    let lhs = self.eval(lhs);
                    let rhs = self.eval(rhs);
                    let result = self.temp();

                    self.body.push(Instruction::BinOp {
                        dst: result,
                        op: direct_op(*op),
                        lhs,
                        rhs,
                    });
                    result
                }
            },
        }
    }

    fn logical(
        &mut self,
        lhs: &Located<Expr>,
        rhs: &Located<Expr>,
        op: ir::BinOp,
    ) -> Local {
        let lhs = self.eval(lhs);
        let rhs = self.eval(rhs);

        let zero = self.temp();
        self.body.push(Instruction::Const(zero, 0));

        let left = self.temp();
        self.body.push(Instruction::BinOp {
            dst: left,
            op: ir::BinOp::Ne,
            lhs,
            rhs: zero,
        });

        let right = self.temp();
        self.body.push(Instruction::BinOp {
            dst: right,
            op: ir::BinOp::Ne,
            lhs: rhs,
            rhs: zero,
        });

        let result = self.temp();
        self.body.push(Instruction::BinOp {
            dst: result,
            op,
            lhs: left,
            rhs: right,
        });
        result
    }

    fn read(&mut self, place: &Place) -> Local {
        match builtin_place(place) {
            Some(Ok(BuiltinPlace::Input(index))) => {
                let result = self.temp();
                self.body.push(Instruction::Load {
                    dst: result,
                    addr: sm83::button_mirror(index),
                    width: Width::Word,
                });
                result
            }

            Some(Ok(BuiltinPlace::OamField { index, field })) => {
                let index = self.eval(index);
                let result = self.temp();
                self.body.push(Instruction::LoadIndirect {
                    dst: result,
                    base: sm83::OAM + field.offset(),
                    index,
                    stride: sm83::OAM_STRIDE,
                    width: Width::Byte,
                });
                result
            }

            Some(Ok(BuiltinPlace::TilemapCell { x, y })) => {
                let index = self.tilemap_index(x, y);
                let result = self.temp();
                self.body.push(Instruction::LoadIndirect {
                    dst: result,
                    base: sm83::TILEMAP0,
                    index,
                    stride: 1,
                    width: Width::Byte,
                });
                result
            }

            Some(_) => unreachable!("invalid hardware read after analysis"),

            None => match self.lookup(place.base().val()) {
                Symbol::Int { addr } => {
                    let result = self.temp();
                    self.body.push(Instruction::Load {
                        dst: result,
                        addr,
                        width: Width::Word,
                    });
                    result
                }

                Symbol::List { addr, .. } => {
                    let index = match place.path() {
                        [only] => match only.val() {
                            Selector::Index(index) => self.eval(index),
                            Selector::Attr(_) => unreachable!("list attribute after analysis"),
                        },
                        _ => unreachable!("bad list access after analysis"),
                    };

                    let result = self.temp();
                    self.body.push(Instruction::LoadIndirect {
                        dst: result,
                        base: addr,
                        index,
                        stride: 2,
                        width: Width::Word,
                    });
                    result
                }

                // Un sprite leído como valor es su índice de tile
                Symbol::Asset(asset) => {
                    let tile = match (asset.kind, asset.tile) {
                        (AssetKind::Sprite, Some(tile)) => tile as u16,
                        _ => unreachable!("non-sprite asset read after analysis"),
                    };

                    let result = self.temp();
                    self.body.push(Instruction::Const(result, tile));
                    result
                }

                _ => unreachable!("invalid read after analysis"),
            },
        }
    }

    /// Índice lineal de una celda de tilemap: `x * 32 + y`.
    fn tilemap_index(&mut self, x: &Located<Expr>, y: &Located<Expr>) -> Local {
        let x = self.eval(x);

        let shift = self.temp();
        self.body.push(Instruction::Const(shift, 5));

        let row = self.temp();
        self.body.push(Instruction::BinOp {
            dst: row,
            op: ir::BinOp::Shl,
            lhs: x,
            rhs: shift,
        });

        let y = self.eval(y);
        let index = self.temp();
        self.body.push(Instruction::BinOp {
            dst: index,
            op: ir::BinOp::Add,
            lhs: row,
            rhs: y,
        });

        index
    }

    fn call(&mut self, call: &Call, wants_value: bool) -> Option<Local> {
        let place = call.target().val();

        match builtin_place(place) {
            Some(Ok(BuiltinPlace::Control(op))) => {
                self.body.push(Instruction::Call {
                    dst: None,
                    target: Target::Runtime(op.runtime_label()),
                    args: Vec::new(),
                });
                None
            }

            None => {
                let sig = match self.lookup(place.base().val()) {
                    Symbol::Proc(sig) => sig,
                    _ => unreachable!("call to non-procedure after analysis"),
                };

                let args: Vec<Local> = call
                    .arguments()
                    .iter()
                    .map(|argument| self.eval(argument))
                    .collect();

                let dst = if wants_value { Some(self.temp()) } else { None };
                self.body.push(Instruction::Call {
                    dst,
                    target: Target::User(sig),
                    args,
                });
                dst
            }

            Some(_) => unreachable!("invalid call target after analysis"),
        }
    }

    fn temp(&mut self) -> Local {
        let local = Local(self.locals);
        self.locals += 1;
        self.max_locals = self.max_locals.max(self.locals);

        local
    }

    fn label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;

        label
    }
}

fn direct_op(op: BinaryOp) -> ir::BinOp {
    match op {
        BinaryOp::Add => ir::BinOp::Add,
        BinaryOp::Sub => ir::BinOp::Sub,
        BinaryOp::Shl => ir::BinOp::Shl,
        BinaryOp::Shr => ir::BinOp::Shr,
        BinaryOp::Lt => ir::BinOp::Lt,
        BinaryOp::Gt => ir::BinOp::Gt,
        BinaryOp::Le => ir::BinOp::Le,
        BinaryOp::Ge => ir::BinOp::Ge,
        BinaryOp::Eq => ir::BinOp::Eq,
        BinaryOp::Ne => ir::BinOp::Ne,
        BinaryOp::BitAnd => ir::BinOp::BitAnd,
        BinaryOp::BitXor => ir::BinOp::BitXor,
        BinaryOp::BitOr => ir::BinOp::BitOr,

        BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
            unreachable!("indirect operator in direct lowering")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn build(input: &str) -> Program {
        let (start, stream) = source::consume(input.as_bytes(), "<test>");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .expect("lexing failed");
        let ast = parse::parse(tokens, start).expect("parsing failed");
        let analysis = ast.resolve().expect("analysis failed");

        lower(&ast, &analysis)
    }

    #[test]
    fn every_procedure_is_well_formed() {
        let program = build(
            "int n = 0;\n\
             loop (n < 4) { if (n == 2) { n = n + 2; } else { n = n + 1; } }\n\
             procedure int sq(int x) { return x * x; }\n\
             int r = sq(7);",
        );

        for procedure in &program.procedures {
            procedure.verify().expect("malformed procedure");
        }
    }

    #[test]
    fn entry_comes_first_and_is_labeled() {
        let program = build("int a = 5; procedure f() { }");
        assert_eq!(program.procedures[0].sig.label, "__entry");
        assert_eq!(program.procedures[1].sig.label, "user_f");
    }

    #[test]
    fn loops_emit_one_back_edge() {
        let program = build("int n = 0; loop (n < 4) { n = n + 1; }");
        let entry = &program.procedures[0];

        let jumps = entry
            .body
            .iter()
            .filter(|instruction| matches!(instruction, Instruction::Jump(_)))
            .count();
        assert_eq!(jumps, 1);

        let head = entry
            .body
            .iter()
            .find_map(|instruction| match instruction {
                Instruction::SetLabel(label) => Some(*label),
                _ => None,
            })
            .unwrap();

        assert!(entry
            .body
            .iter()
            .any(|instruction| matches!(instruction, Instruction::Jump(label) if *label == head)));
    }

    #[test]
    fn multiplication_becomes_a_runtime_call() {
        let program = build("int r = 6 * 7;");
        let entry = &program.procedures[0];

        assert!(entry.body.iter().any(|instruction| matches!(
            instruction,
            Instruction::Call {
                target: Target::Mul,
                ..
            }
        )));
    }

    #[test]
    fn logical_operators_normalize_operands() {
        let program = build("int x = 2 and 1;");
        let entry = &program.procedures[0];

        let normalizations = entry
            .body
            .iter()
            .filter(|instruction| {
                matches!(
                    instruction,
                    Instruction::BinOp {
                        op: ir::BinOp::Ne,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(normalizations, 2);

        assert!(entry.body.iter().any(|instruction| matches!(
            instruction,
            Instruction::BinOp {
                op: ir::BinOp::BitAnd,
                ..
            }
        )));
    }

    #[test]
    fn oam_stores_are_byte_wide_and_offset() {
        let program = build("display.oam[0].x = 16;");
        let entry = &program.procedures[0];

        assert!(entry.body.iter().any(|instruction| matches!(
            instruction,
            Instruction::StoreIndirect {
                base: 0xFE01,
                stride: 4,
                width: Width::Byte,
                ..
            }
        )));
    }

    #[test]
    fn tilemap_cells_use_row_major_addressing() {
        let program = build("display.tilemap0[2][3] = 5;");
        let entry = &program.procedures[0];

        assert!(entry.body.iter().any(|instruction| matches!(
            instruction,
            Instruction::StoreIndirect {
                base: 0x9800,
                stride: 1,
                width: Width::Byte,
                ..
            }
        )));
    }

    #[test]
    fn sprite_reads_become_tile_constants() {
        let program = build("sprite pengu = \"pengu.2bpp\"; display.oam[0].tile = pengu;");
        let entry = &program.procedures[0];

        // El índice de ranura y el índice de tile son constantes 0
        let zero_consts = entry
            .body
            .iter()
            .filter(|instruction| matches!(instruction, Instruction::Const(_, 0)))
            .count();
        assert_eq!(zero_consts, 2);
    }

    #[test]
    fn startup_copies_cover_bound_assets() {
        let program = build(
            "sprite s = \"s.2bpp\";\n\
             tileset t = \"t.2bpp\";\n\
             tilemap m = \"m.map\";\n\
             display.tileset0 = t;\n\
             display.tilemap0 = m;",
        );

        let targets: Vec<u16> = program.startup.iter().map(|copy| copy.vram).collect();
        assert_eq!(targets, vec![0x8000, 0x9000, 0x9800]);
    }

    #[test]
    fn shadowing_resolves_in_declaration_order() {
        let program = build("int x = 1; procedure f() { x = 2; int x; x = 3; }");
        let proc = &program.procedures[1];

        let stores: Vec<u16> = proc
            .body
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Store { addr, .. } => Some(*addr),
                _ => None,
            })
            .collect();

        assert_eq!(stores.len(), 2);
        assert_ne!(stores[0], stores[1], "global and shadowing local share a slot");
    }

    #[test]
    fn arguments_map_to_parameter_slots() {
        let program = build("procedure int add(int a, int b) { return a + b; } int r = add(1, 2);");

        let sig = match program.procedures[1].sig.label.as_str() {
            "user_add" => &program.procedures[1].sig,
            _ => panic!("unexpected procedure order"),
        };
        assert_eq!(sig.params.len(), 2);
        assert_ne!(sig.params[0], sig.params[1]);

        let entry = &program.procedures[0];
        assert!(entry.body.iter().any(|instruction| matches!(
            instruction,
            Instruction::Call {
                target: Target::User(_),
                dst: Some(_),
                ..
            }
        )));
    }
}
