//! El driver del compilador.
//!
//! Encadena las fases y es el dueño del sink de diagnósticos. Cada
//! fase corre hasta el final acumulando sus propios errores; el
//! driver solo corta entre fases: si la fase actual produjo al menos
//! un error, la siguiente no se ejecuta. El texto ensamblador se
//! genera completo en memoria, por lo cual un fallo a mitad de
//! generación nunca deja un archivo de salida a medias.

use std::{io::BufRead, path::Path};

use crate::{
    error::{Diagnostic, Diagnostics, Severity},
    lex::Lexer,
    lower, parse, source, target,
};

/// Compila un programa completo a texto ensamblador RGBDS.
///
/// `asset_root` es el directorio contra el que se verifica la
/// existencia de los archivos de assets; con `None` la verificación
/// se omite.
pub fn compile<R, S>(
    reader: R,
    name: S,
    asset_root: Option<&Path>,
) -> Result<Vec<u8>, Diagnostics>
where
    R: BufRead,
    S: Into<String>,
{
    let (start, stream) = source::consume(reader, name);

    let tokens = Lexer::new(start.clone(), stream)
        .try_exhaustive()
        .map_err(Diagnostics::from)?;

    let ast = parse::parse(tokens, start).map_err(Diagnostics::from)?;

    let analysis = ast.resolve().map_err(Diagnostics::from)?;

    // Todo asset debe corresponder a exactamente un archivo en disco
    // antes de que el ensamblador encuentre sus directivas INCBIN
    if let Some(root) = asset_root {
        let mut diagnostics = Diagnostics::default();

        for (asset, site) in analysis.assets.iter().zip(analysis.asset_sites.iter()) {
            if !root.join(asset.path.as_ref()).is_file() {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "asset-not-found",
                    format!("Asset file not found: {}", asset.path),
                    site.clone(),
                ));
            }
        }

        if diagnostics.has_errors() {
            return Err(diagnostics);
        }
    }

    let program = lower::lower(&ast, &analysis);

    let mut output = Vec::new();
    match target::emit(&program, &mut output) {
        Ok(()) => Ok(output),

        Err(error) => {
            let mut diagnostics = Diagnostics::default();
            diagnostics.push(Diagnostic::bare(
                Severity::Error,
                "ice",
                error.to_string(),
            ));

            Err(diagnostics)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(input: &str) -> Result<Vec<u8>, Diagnostics> {
        compile(Cursor::new(input), "<test>", None)
    }

    #[test]
    fn clean_programs_compile() {
        let assembly = run("int a = 5; int b = a + 3;").expect("compilation failed");
        assert!(!assembly.is_empty());
    }

    #[test]
    fn lexical_errors_stop_the_pipeline() {
        let diagnostics = run("int $ = 5;").unwrap_err();
        assert!(diagnostics.has_errors());
        assert!(diagnostics.iter().all(|d| d.class() == "lex-error"));
    }

    #[test]
    fn parse_errors_stop_before_analysis() {
        let diagnostics = run("int a = ;").unwrap_err();
        assert!(diagnostics.iter().any(|d| d.class() == "parse-error"));
    }

    #[test]
    fn semantic_errors_stop_before_emission() {
        let diagnostics = run("int a = b;").unwrap_err();
        assert!(diagnostics.iter().any(|d| d.class() == "unknown-name"));
    }

    #[test]
    fn missing_assets_are_reported_when_rooted() {
        let diagnostics = compile(
            Cursor::new("sprite s = \"definitely/not/here.2bpp\";"),
            "<test>",
            Some(Path::new(".")),
        )
        .unwrap_err();

        assert!(diagnostics.iter().any(|d| d.class() == "asset-not-found"));
    }

    #[test]
    fn diagnostics_render_source_excerpts() {
        let diagnostics = run("int a = \"hello\";").unwrap_err();
        let rendered = diagnostics.to_string();

        assert!(rendered.contains("error[type-mismatch]"));
        assert!(rendered.contains("int a = \"hello\";"));
        assert!(rendered.contains("Build failed with 1 error"));
    }
}
