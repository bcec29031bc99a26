use std::any::TypeId;
use std::ffi::c_char;
use std::fmt;
use std::io;

use half::f16;

use crate::RuntimeError;

/// Element types a runtime tensor can carry.
///
/// Discriminants are the ONNX element codes, which is what compiled
/// routines read out of the `dtype` field.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Not yet resolved; the tensor carries no typed data.
    Undefined = 0,
    F32 = 1,
    U8 = 2,
    I8 = 3,
    U16 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    /// Pointers to NUL-terminated character data.
    String = 8,
    Bool = 9,
    F16 = 10,
    F64 = 11,
    U32 = 12,
    U64 = 13,
}

impl DType {
    pub const ALL: [DType; 14] = [
        DType::Undefined,
        DType::F32,
        DType::U8,
        DType::I8,
        DType::U16,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::String,
        DType::Bool,
        DType::F16,
        DType::F64,
        DType::U32,
        DType::U64,
    ];

    /// Size in bytes of a single element. `Undefined` has no size.
    pub fn size(&self) -> usize {
        match self {
            DType::Undefined => 0,
            DType::U8 | DType::I8 | DType::Bool => 1,
            DType::U16 | DType::I16 | DType::F16 => 2,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F64 | DType::I64 | DType::U64 => 8,
            DType::String => std::mem::size_of::<*const c_char>(),
        }
    }

    /// Name used in type strings, e.g. the `float` in `8x16x1xfloat`.
    pub fn name(&self) -> &'static str {
        match self {
            DType::Undefined => "undefined",
            DType::F32 => "float",
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::String => "string",
            DType::Bool => "bool",
            DType::F16 => "float16",
            DType::F64 => "double",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DType::U8
                | DType::I8
                | DType::U16
                | DType::I16
                | DType::I32
                | DType::I64
                | DType::U32
                | DType::U64
        )
    }
}

impl TryFrom<i32> for DType {
    type Error = RuntimeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        DType::ALL
            .into_iter()
            .find(|d| *d as i32 == code)
            .ok_or(RuntimeError::UnknownDType(code))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Rust type that can be read out of (and written into) a tensor buffer.
pub trait Element: Copy + 'static {
    const DTYPE: DType;

    /// Widen to `f64` for tolerance comparison. Booleans map to 0 and 1.
    fn to_f64(self) -> f64;

    /// Write the element in its natural textual form.
    fn write_elem(self, w: &mut dyn io::Write) -> io::Result<()>;
}

macro_rules! impl_integer_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn write_elem(self, w: &mut dyn io::Write) -> io::Result<()> {
                    write!(w, "{self}")
                }
            }
        )*
    };
}

impl_integer_element!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }

    fn write_elem(self, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "{self}")
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn write_elem(self, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "{self:?}")
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn to_f64(self) -> f64 {
        self
    }

    fn write_elem(self, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "{self:?}")
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }

    // Widened to f32 so half values print like every other float.
    fn write_elem(self, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "{:?}", self.to_f32())
    }
}

/// Map a Rust type to its element type, or `Undefined` when there is no mapping.
pub fn dtype_of<T: 'static>() -> DType {
    let id = TypeId::of::<T>();
    let known = [
        (TypeId::of::<bool>(), DType::Bool),
        (TypeId::of::<u8>(), DType::U8),
        (TypeId::of::<i8>(), DType::I8),
        (TypeId::of::<u16>(), DType::U16),
        (TypeId::of::<i16>(), DType::I16),
        (TypeId::of::<i32>(), DType::I32),
        (TypeId::of::<i64>(), DType::I64),
        (TypeId::of::<u32>(), DType::U32),
        (TypeId::of::<u64>(), DType::U64),
        (TypeId::of::<f16>(), DType::F16),
        (TypeId::of::<f32>(), DType::F32),
        (TypeId::of::<f64>(), DType::F64),
        (TypeId::of::<*const c_char>(), DType::String),
        (TypeId::of::<*mut c_char>(), DType::String),
    ];
    known
        .into_iter()
        .find(|(k, _)| *k == id)
        .map(|(_, d)| d)
        .unwrap_or(DType::Undefined)
}
