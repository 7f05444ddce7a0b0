macro_rules! emit {
    ($cx:expr, $($format:tt)*) => {{
        write!($cx.output, "\t")?;
        writeln!($cx.output, $($format)*)
    }};
}
