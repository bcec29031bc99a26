//! Textual rendering of tensors driven by a small format language.
//!
//! | directive | output                                              |
//! |-----------|-----------------------------------------------------|
//! | `%i`      | leading only: write to the instrumentation sink     |
//! | `%d`      | element data, nested brackets per dimension         |
//! | `%s`      | signature: rank, dtype, element count, shape, strides, type |
//! | `%t`      | compact type string, e.g. `8x16x1xfloat`            |
//! | `%e`      | stop; nothing after it is written                   |
//!
//! Any other character is copied verbatim. A format without any recognized
//! directive prints a newline, the signature, the data and a newline.

use std::ffi::{c_char, CStr};
use std::io::{self, Write};

use half::f16;
use tracing::warn;

use crate::alloc::Allocator;
use crate::config::RuntimeConfig;
use crate::dtype::{DType, Element};
use crate::shape::{self, DimsDisplay};
use crate::Tensor;

/// Deepest rank whose data can be printed.
pub const MAX_PRINT_RANK: usize = 6;

/// Where rendered text goes.
pub struct Sinks<'a> {
    pub out: &'a mut dyn Write,
    pub instrument: &'a mut dyn Write,
}

/// Print to stdout, or to the configured instrumentation sink for `%i` formats.
pub fn print<A: Allocator>(format: &str, tensor: &Tensor<A>) -> io::Result<()> {
    let config = RuntimeConfig::from_env();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if format.starts_with("%i") {
        let mut instrument = config.instrument_sink()?;
        let mut sinks = Sinks { out: &mut out, instrument: &mut instrument };
        print_to(&mut sinks, format, tensor)?;
        return instrument.flush();
    }
    let mut unused = io::sink();
    let mut sinks = Sinks { out: &mut out, instrument: &mut unused };
    print_to(&mut sinks, format, tensor)?;
    out.flush()
}

/// Render `tensor` according to `format` into `sinks`.
pub fn print_to<A: Allocator>(
    sinks: &mut Sinks<'_>,
    format: &str,
    tensor: &Tensor<A>,
) -> io::Result<()> {
    let (w, format): (&mut dyn Write, &str) = match format.strip_prefix("%i") {
        Some(rest) => (&mut *sinks.instrument, rest),
        None => (&mut *sinks.out, format),
    };

    let mut recognized = false;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            write!(w, "{c}")?;
            continue;
        }
        match chars.next() {
            Some('d') => {
                recognized = true;
                write_data(w, tensor)?;
            }
            Some('s') => {
                recognized = true;
                write_signature(w, tensor)?;
            }
            Some('t') => {
                recognized = true;
                write!(w, "{}", tensor.type_string())?;
            }
            Some('e') => return Ok(()),
            Some(other) => {
                warn!(directive = %other, "unknown print directive");
                write!(w, "<unknown print directive %{other}>")?;
            }
            // A trailing '%' is plain text.
            None => write!(w, "%")?,
        }
    }

    if !recognized {
        writeln!(w)?;
        write_signature(w, tensor)?;
        write_data(w, tensor)?;
        writeln!(w)?;
    }
    Ok(())
}

/// Signature line, e.g.
/// `rank = 1, dtype = float, elements = 2, shape = [2], strides = [1], type = 2xfloat`.
pub fn signature<A: Allocator>(tensor: &Tensor<A>) -> String {
    format!(
        "rank = {}, dtype = {}, elements = {}, shape = {}, strides = {}, type = {}",
        tensor.rank(),
        tensor.dtype(),
        shape::shape_product(tensor.shape()),
        DimsDisplay(tensor.shape()),
        DimsDisplay(tensor.strides()),
        tensor.type_string(),
    )
}

fn write_signature<A: Allocator>(w: &mut dyn Write, tensor: &Tensor<A>) -> io::Result<()> {
    writeln!(w, "{}", signature(tensor))
}

/// Element data as nested brackets, following the stored strides.
///
/// # Panics
///
/// If the rank exceeds [`MAX_PRINT_RANK`].
pub fn write_data<A: Allocator>(w: &mut dyn Write, tensor: &Tensor<A>) -> io::Result<()> {
    assert!(
        tensor.rank() <= MAX_PRINT_RANK,
        "printing data of rank {} is not implemented (max {MAX_PRINT_RANK})",
        tensor.rank()
    );
    match tensor.dtype() {
        DType::Bool => write_nested(w, tensor, 0, 0, &mut typed::<bool, A>),
        DType::U8 => write_nested(w, tensor, 0, 0, &mut typed::<u8, A>),
        DType::I8 => write_nested(w, tensor, 0, 0, &mut typed::<i8, A>),
        DType::U16 => write_nested(w, tensor, 0, 0, &mut typed::<u16, A>),
        DType::I16 => write_nested(w, tensor, 0, 0, &mut typed::<i16, A>),
        DType::U32 => write_nested(w, tensor, 0, 0, &mut typed::<u32, A>),
        DType::I32 => write_nested(w, tensor, 0, 0, &mut typed::<i32, A>),
        DType::U64 => write_nested(w, tensor, 0, 0, &mut typed::<u64, A>),
        DType::I64 => write_nested(w, tensor, 0, 0, &mut typed::<i64, A>),
        DType::F16 => write_nested(w, tensor, 0, 0, &mut typed::<f16, A>),
        DType::F32 => write_nested(w, tensor, 0, 0, &mut typed::<f32, A>),
        DType::F64 => write_nested(w, tensor, 0, 0, &mut typed::<f64, A>),
        DType::String => write_nested(w, tensor, 0, 0, &mut string::<A>),
        DType::Undefined => write!(w, "<data of undefined type>"),
    }
}

type WriteElem<'f, A> = dyn FnMut(&mut dyn Write, &Tensor<A>, i64) -> io::Result<()> + 'f;

/// One level of the bracketed rendering; `depth == rank` writes a single element.
fn write_nested<A: Allocator>(
    w: &mut dyn Write,
    tensor: &Tensor<A>,
    depth: usize,
    offset: i64,
    elem: &mut WriteElem<'_, A>,
) -> io::Result<()> {
    if depth == tensor.rank() {
        return elem(w, tensor, offset);
    }
    let extent = tensor.shape()[depth];
    let stride = tensor.strides()[depth];
    write!(w, "[")?;
    for i in 0..extent {
        if i > 0 {
            write!(w, ", ")?;
        }
        write_nested(w, tensor, depth + 1, offset + i * stride, elem)?;
    }
    write!(w, "]")
}

fn typed<T: Element, A: Allocator>(
    w: &mut dyn Write,
    tensor: &Tensor<A>,
    offset: i64,
) -> io::Result<()> {
    tensor.read_at::<T>(offset).write_elem(w)
}

fn string<A: Allocator>(w: &mut dyn Write, tensor: &Tensor<A>, offset: i64) -> io::Result<()> {
    let ptr = tensor.read_at::<*const c_char>(offset);
    if ptr.is_null() {
        return write!(w, "(null)");
    }
    // SAFETY: string tensors hold pointers to NUL-terminated data per the
    // constructor contract.
    let text = unsafe { CStr::from_ptr(ptr) };
    write!(w, "{}", text.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(format: &str, tensor: &Tensor) -> (String, String) {
        let mut out = Vec::new();
        let mut instrument = Vec::new();
        let mut sinks = Sinks { out: &mut out, instrument: &mut instrument };
        print_to(&mut sinks, format, tensor).unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(instrument).unwrap())
    }

    fn pair() -> Tensor {
        Tensor::from_data(&[1.0f32, 2.0], &[2]).unwrap()
    }

    const PAIR_SIGNATURE: &str =
        "rank = 1, dtype = float, elements = 2, shape = [2], strides = [1], type = 2xfloat\n";

    #[test]
    fn test_signature_then_data() {
        let (out, _) = render("%s%d", &pair());
        assert_eq!(out, format!("{PAIR_SIGNATURE}[1.0, 2.0]"));
    }

    #[test]
    fn test_end_directive_stops_output() {
        let (out, _) = render("before %t%e rest", &pair());
        assert_eq!(out, "before 2xfloat");
        let (out, _) = render("%e rest", &pair());
        assert_eq!(out, "");
    }

    #[test]
    fn test_default_layout() {
        let (out, _) = render("x = ", &pair());
        assert_eq!(out, format!("x = \n{PAIR_SIGNATURE}[1.0, 2.0]\n"));
    }

    #[test]
    fn test_unknown_directive_continues() {
        let (out, _) = render("%q%t", &pair());
        assert_eq!(out, "<unknown print directive %q>2xfloat");
    }

    #[test]
    fn test_instrumentation_marker() {
        let (out, instrument) = render("%i%t;", &pair());
        assert_eq!(out, "");
        assert_eq!(instrument, "2xfloat;");
    }

    #[test]
    fn test_nested_rendering() {
        let t = Tensor::from_data(&[1i32, 2, 3, 4, 5, 6], &[2, 1, 3]).unwrap();
        let (out, _) = render("%d", &t);
        assert_eq!(out, "[[[1, 2, 3]], [[4, 5, 6]]]");
    }

    #[test]
    fn test_scalar_and_empty() {
        let s = Tensor::from_data(&[7u64], &[]).unwrap();
        assert_eq!(render("%d", &s).0, "7");
        let e = Tensor::with_shape::<f32>(&[2, 0]).unwrap();
        assert_eq!(render("%d", &e).0, "[[], []]");
    }

    #[test]
    fn test_strided_view_rendering() {
        let mut t = Tensor::from_data(&[1i8, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        t.set_shape(&[3, 2]);
        t.set_strides(&[1, 3]);
        assert_eq!(render("%d", &t).0, "[[1, 4], [2, 5], [3, 6]]");
    }

    #[test]
    fn test_half_and_bool() {
        let h = Tensor::from_data(&[f16::from_f32(0.5), f16::from_f32(-2.0)], &[2]).unwrap();
        assert_eq!(render("%d", &h).0, "[0.5, -2.0]");
        let mut b = Tensor::with_shape::<bool>(&[2]).unwrap();
        b.as_mut_slice::<bool>()[1] = true;
        assert_eq!(render("%d", &b).0, "[false, true]");
    }

    #[test]
    fn test_string_elements() {
        let words = [c"alpha".as_ptr(), std::ptr::null(), c"beta".as_ptr()];
        let t = Tensor::with_shape::<*const c_char>(&[3]).unwrap();
        for (i, p) in words.iter().enumerate() {
            unsafe { t.data_ptr().cast::<*const c_char>().add(i).write(*p) };
        }
        assert_eq!(t.dtype(), DType::String);
        assert_eq!(render("%d", &t).0, "[alpha, (null), beta]");
    }

    #[test]
    fn test_rank_six_prints() {
        let t = Tensor::from_data(&[3i16], &[1, 1, 1, 1, 1, 1]).unwrap();
        assert_eq!(render("%d", &t).0, "[[[[[[3]]]]]]");
    }

    #[test]
    #[should_panic(expected = "rank 7 is not implemented")]
    fn test_rank_seven_is_fatal() {
        let t = Tensor::from_data(&[3i16], &[1, 1, 1, 1, 1, 1, 1]).unwrap();
        render("%d", &t);
    }

    #[test]
    fn test_undefined_data() {
        let t = Tensor::create_untyped(0).unwrap();
        assert_eq!(render("%d", &t).0, "<data of undefined type>");
    }
}
