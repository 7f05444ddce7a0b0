//! Acumulación y despliegue de diagnósticos.
//!
//! Cada fase del compilador acumula sus errores en vez de abortar
//! en el primero. El driver reúne todo en una colección
//! [`Diagnostics`] que sabe renderizar extractos del código fuente
//! con subrayado de columnas.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

/// Severidad de un diagnóstico.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Display for Severity {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => fmt.write_str("error"),
            Severity::Warning => fmt.write_str("warning"),
            Severity::Note => fmt.write_str("note"),
        }
    }
}

/// Error de fase que conoce su clase de diagnóstico.
///
/// Los enums de error de cada fase implementan este trait para
/// clasificarse dentro del vocabulario fijo de clases (`lex-error`,
/// `type-mismatch`, `ice`, etcétera).
pub trait Classify: Error {
    /// Clase de diagnóstico de este error.
    fn class(&self) -> &'static str;

    /// Severidad; todo error de fase es [`Severity::Error`] salvo
    /// que se indique lo contrario.
    fn severity(&self) -> Severity {
        Severity::Error
    }

    /// Ubicación secundaria relacionada, si existe.
    fn related(&self) -> Option<&Location> {
        None
    }
}

/// Un diagnóstico individual ya clasificado.
#[derive(Debug)]
pub struct Diagnostic {
    severity: Severity,
    class: &'static str,
    message: String,
    primary: Option<Location>,
    secondary: Option<Location>,
}

impl Diagnostic {
    /// Construye un diagnóstico arbitrario.
    pub fn new(severity: Severity, class: &'static str, message: String, primary: Location) -> Self {
        Diagnostic {
            severity,
            class,
            message,
            primary: Some(primary),
            secondary: None,
        }
    }

    /// Construye un diagnóstico sin ubicación, como un error interno
    /// del compilador.
    pub fn bare(severity: Severity, class: &'static str, message: String) -> Self {
        Diagnostic {
            severity,
            class,
            message,
            primary: None,
            secondary: None,
        }
    }

    /// Agrega una ubicación secundaria.
    pub fn with_secondary(mut self, secondary: Location) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Severidad del diagnóstico.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Clase del diagnóstico.
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// Mensaje para el usuario.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Ubicación principal, si el diagnóstico tiene una.
    pub fn location(&self) -> Option<&Location> {
        self.primary.as_ref()
    }
}

impl<E: Classify> From<Located<E>> for Diagnostic {
    fn from(error: Located<E>) -> Self {
        let (location, error) = error.split();
        Diagnostic {
            severity: error.severity(),
            class: error.class(),
            message: error.to_string(),
            secondary: error.related().cloned(),
            primary: Some(location),
        }
    }
}

/// Colección de diagnósticos de una ejecución del compilador.
#[derive(Default, Debug)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Agrega un diagnóstico.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    /// Agrega todos los errores de una fase.
    pub fn extend<E: Classify>(&mut self, errors: Vec<Located<E>>) {
        self.0.extend(errors.into_iter().map(Diagnostic::from));
    }

    /// Determina si hay al menos un diagnóstico de severidad error.
    pub fn has_errors(&self) -> bool {
        self.0
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    /// Determina si hay un error interno del compilador.
    pub fn has_ice(&self) -> bool {
        self.0.iter().any(|diagnostic| diagnostic.class == "ice")
    }

    /// Cantidad de diagnósticos acumulados.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Determina si no se acumuló ningún diagnóstico.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Itera sobre los diagnósticos en orden de inserción.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl<E: Classify> From<Located<E>> for Diagnostics {
    fn from(error: Located<E>) -> Self {
        Diagnostics(vec![Diagnostic::from(error)])
    }
}

impl<E: Classify> From<Vec<Located<E>>> for Diagnostics {
    fn from(errors: Vec<Located<E>>) -> Self {
        Diagnostics(errors.into_iter().map(Diagnostic::from).collect())
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics(diagnostics) = self;
        if diagnostics.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for diagnostic in diagnostics {
            writeln!(
                fmt,
                "{}[{}]: {}",
                diagnostic.severity, diagnostic.class, diagnostic.message
            )?;

            if let Some(primary) = &diagnostic.primary {
                write_excerpt(fmt, primary)?;
            }

            if let Some(secondary) = &diagnostic.secondary {
                writeln!(fmt, "note: related location follows")?;
                write_excerpt(fmt, secondary)?;
            }

            writeln!(fmt)?;
        }

        let errors = diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
            .count();

        let error_or_errors = if errors == 1 { "error" } else { "errors" };
        writeln!(fmt, "Build failed with {} {}", errors, error_or_errors)
    }
}

/// Renderiza el extracto de código fuente de una ubicación.
fn write_excerpt(fmt: &mut fmt::Formatter<'_>, location: &Location) -> fmt::Result {
    writeln!(fmt, " --> {}", location)?;

    let digits = location.end().line().to_string().chars().count();
    writeln!(fmt, "{:digits$} |", "", digits = digits)?;

    for line_number in location.start().line()..=location.end().line() {
        let written = location.source().with_line(line_number, |line| {
            writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)
        });

        if let Some(result) = written {
            result?;
        }
    }

    // El subrayado de columnas solo tiene sentido dentro de una línea
    if location.start().line() == location.end().line() {
        let (from, to) = (location.start().column(), location.end().column() - 1);
        let min = from.min(to);
        let max = from.max(to);

        let skip = (min - 1) as usize;
        let highlight = (max - min + 1) as usize;

        writeln!(
            fmt,
            "{:digits$} | {:skip$}{:^<highlight$}",
            "",
            "",
            "",
            digits = digits,
            skip = skip,
            highlight = highlight
        )?;
    }

    Ok(())
}
