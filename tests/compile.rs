use penguin::driver;

use std::io::Cursor;

fn compile(source: &str) -> String {
    let assembly =
        driver::compile(Cursor::new(source), "<test>", None).expect("compilation failed");
    String::from_utf8(assembly).expect("emitted assembly is not UTF-8")
}

fn classes(source: &str) -> Vec<&'static str> {
    driver::compile(Cursor::new(source), "<test>", None)
        .err()
        .expect("compilation succeeded unexpectedly")
        .iter()
        .map(|diagnostic| diagnostic.class())
        .collect()
}

#[test]
fn arithmetic_stores_and_adds() {
    let asm = compile("int a = 5; int b = a + 3;");

    assert!(asm.contains("ld a, $05"));
    assert!(asm.contains("ld a, $03"));
    assert!(asm.contains("add hl, de"));
    assert!(asm.contains("SECTION \"__entry\", ROM0"));
}

#[test]
fn counting_loop_has_one_back_edge() {
    let asm = compile("int n = 0; loop (n < 4) { n = n + 1; }");

    // La cabecera del ciclo es la primera etiqueta del procedimiento
    let back_edges = asm.matches("jp .L0").count();
    assert_eq!(back_edges, 1);
    assert!(asm.contains("jp z, .L1"));
}

#[test]
fn procedures_and_multiplication() {
    let asm = compile("procedure int sq(int x) { return x * x; } int r = sq(7);");

    assert!(asm.contains("SECTION \"user_sq\", ROM0"));
    assert!(asm.contains("call user_sq"));
    assert!(asm.contains("call __mul_u16"));
    assert!(asm.contains("__mul_u16:"));
}

#[test]
fn oam_position_store_hits_the_x_field() {
    let asm = compile("display.oam[0].x = 16;");
    assert!(asm.contains("ld de, $FE01"));
}

#[test]
fn string_initializer_for_int_is_rejected() {
    assert!(classes("int x = \"hello\";").contains(&"type-mismatch"));
}

#[test]
fn missing_argument_is_an_arity_mismatch() {
    assert!(classes("procedure foo(int a) { return; } foo();").contains(&"arity-mismatch"));
}

#[test]
fn empty_program_is_a_parse_error() {
    assert!(classes("").contains(&"parse-error"));
    assert!(classes("// nothing here\n").contains(&"parse-error"));
}

#[test]
fn degenerate_loops_compile() {
    // Cuerpo alcanzable pero omitido
    compile("loop (0) { display.oam[0].x = 1; }");

    // Ciclo infinito idiomático
    let asm = compile("loop (1) { control.waitVBlank(); }");
    assert!(asm.contains("call PenguinWaitVBlank"));
}

#[test]
fn top_level_without_executable_statements_is_legal() {
    let asm = compile("procedure helper() { }");
    assert!(asm.contains("call __entry"));
    assert!(asm.contains("PenguinDone:"));
}

#[test]
fn shadowing_is_scoped() {
    compile("int a = 1; if (a) { int a = 2; a = 3; }");
    assert!(classes("int a = 1; int a = 2;").contains(&"redeclaration"));
}

#[test]
fn reserved_namespaces_cannot_be_rebound() {
    assert!(classes("int input = 3;").contains(&"redeclaration"));
}

#[test]
fn whole_game_skeleton_compiles() {
    let asm = compile(
        "tileset bg = \"assets/bg.2bpp\";\n\
         tilemap level = \"assets/level.map\";\n\
         sprite pengu = \"assets/pengu.2bpp\";\n\
         display.tileset0 = bg;\n\
         display.tilemap0 = level;\n\
         display.oam[0].tile = pengu;\n\
         display.oam[0].x = 16;\n\
         display.oam[0].y = 16;\n\
         int dx = 0;\n\
         loop (1) {\n\
             control.waitVBlank();\n\
             control.updateInput();\n\
             if (input.Right) {\n\
                 dx = dx + 1;\n\
             }\n\
             if (input.Left and not (dx == 0)) {\n\
                 dx = dx - 1;\n\
             }\n\
             display.oam[0].x = dx;\n\
         }",
    );

    assert!(asm.contains("INCBIN \"assets/bg.2bpp\""));
    assert!(asm.contains("INCBIN \"assets/level.map\""));
    assert!(asm.contains("INCBIN \"assets/pengu.2bpp\""));
    assert!(asm.contains("call PenguinMemCopy"));
    assert!(asm.contains("call PenguinUpdateInput"));
    assert!(asm.contains("ldh [rP1], a"));
    assert!(asm.contains("jp PenguinDone"));
}

#[test]
fn list_programs_compile_end_to_end() {
    let asm = compile(
        "list heights = [3, 1, 4, 1, 5];\n\
         int i = 0;\n\
         int total = 0;\n\
         loop (i < 5) {\n\
             total = total + heights[i];\n\
             i = i + 1;\n\
         }",
    );

    // Acceso indexado de palabras: stride 2, lectura de dos bytes
    assert!(asm.contains("ld a, [hli]"));
}

#[test]
fn diagnostics_accumulate_within_a_phase() {
    // Dos errores sintácticos en un mismo archivo
    let found = classes("int a = ; int b = ;");
    assert!(found.len() >= 2);

    // Dos errores semánticos en un mismo archivo
    let found = classes("int x = y; int z = w;");
    assert_eq!(found, vec!["unknown-name", "unknown-name"]);
}
