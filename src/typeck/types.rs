use std::fmt;

/// What an opaque handle is known to hold. Only selects container fast paths;
/// the representation is always `mp_obj_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerHint {
    Unknown,
    Sequence,
    Mapping,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceType {
    MachineInt,
    MachineFloat,
    Boolean,
    Text,
    OpaqueHandle(ContainerHint),
    FixedTuple(Vec<SourceType>),
    UserClass(String),
}

impl SourceType {
    pub fn opaque() -> Self {
        SourceType::OpaqueHandle(ContainerHint::Unknown)
    }

    pub fn sequence() -> Self {
        SourceType::OpaqueHandle(ContainerHint::Sequence)
    }

    /// Int, float and bool: values that live unboxed in native code.
    pub fn is_machine(&self) -> bool {
        matches!(self, SourceType::MachineInt | SourceType::MachineFloat | SourceType::Boolean)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SourceType::MachineInt | SourceType::MachineFloat | SourceType::Boolean)
    }

    pub fn container_hint(&self) -> ContainerHint {
        match self {
            SourceType::OpaqueHandle(hint) => *hint,
            _ => ContainerHint::Unknown,
        }
    }

    pub fn c_type(&self) -> CType {
        match self {
            SourceType::MachineInt => CType::Int,
            SourceType::MachineFloat => CType::Float,
            SourceType::Boolean => CType::Bool,
            SourceType::FixedTuple(elems) => match RTuple::from_elements(elems) {
                Some(shape) => CType::RTuple(shape),
                None => CType::Obj,
            },
            SourceType::Text | SourceType::OpaqueHandle(_) | SourceType::UserClass(_) => CType::Obj,
        }
    }

    /// Least type holding both. Int widens to float, bool to int; anything else
    /// that disagrees becomes an unknown handle.
    pub fn join(&self, other: &SourceType) -> SourceType {
        use SourceType::*;
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (MachineInt, Boolean) | (Boolean, MachineInt) => MachineInt,
            (MachineFloat, MachineInt | Boolean) | (MachineInt | Boolean, MachineFloat) => MachineFloat,
            _ => SourceType::opaque(),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::MachineInt => write!(f, "int"),
            SourceType::MachineFloat => write!(f, "float"),
            SourceType::Boolean => write!(f, "bool"),
            SourceType::Text => write!(f, "str"),
            SourceType::OpaqueHandle(ContainerHint::Unknown) => write!(f, "object"),
            SourceType::OpaqueHandle(ContainerHint::Sequence) => write!(f, "list"),
            SourceType::OpaqueHandle(ContainerHint::Mapping) => write!(f, "dict"),
            SourceType::OpaqueHandle(ContainerHint::Set) => write!(f, "set"),
            SourceType::FixedTuple(elems) => {
                write!(f, "tuple[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            SourceType::UserClass(name) => write!(f, "{name}"),
        }
    }
}

/// Declared result of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    /// `-> None`
    Nothing,
    Value(SourceType),
}

impl ReturnType {
    pub fn c_type(&self) -> CType {
        match self {
            ReturnType::Nothing => CType::Void,
            ReturnType::Value(ty) => ty.c_type(),
        }
    }

    pub fn source_type(&self) -> Option<&SourceType> {
        match self {
            ReturnType::Nothing => None,
            ReturnType::Value(ty) => Some(ty),
        }
    }
}

/// Unboxed element kinds an rtuple record may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Int,
    Float,
    Bool,
}

impl Scalar {
    pub fn tag(self) -> &'static str {
        match self {
            Scalar::Int => "int",
            Scalar::Float => "float",
            Scalar::Bool => "bool",
        }
    }

    pub fn c_type(self) -> CType {
        match self {
            Scalar::Int => CType::Int,
            Scalar::Float => CType::Float,
            Scalar::Bool => CType::Bool,
        }
    }
}

/// Structural shape of an unboxed fixed tuple. Equal shapes share one C record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RTuple {
    pub elems: Vec<Scalar>,
}

impl RTuple {
    pub fn from_elements(elems: &[SourceType]) -> Option<Self> {
        if elems.is_empty() {
            return None;
        }
        let scalars = elems
            .iter()
            .map(|e| match e {
                SourceType::MachineInt => Some(Scalar::Int),
                SourceType::MachineFloat => Some(Scalar::Float),
                SourceType::Boolean => Some(Scalar::Bool),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(RTuple { elems: scalars })
    }

    pub fn shape(&self) -> String {
        self.elems.iter().map(|s| s.tag()).collect::<Vec<_>>().join("_")
    }

    pub fn c_name(&self) -> String {
        format!("rtuple_{}_t", self.shape())
    }

    pub fn box_fn(&self) -> String {
        format!("rtuple_{}_box", self.shape())
    }

    pub fn unbox_fn(&self) -> String {
        format!("rtuple_{}_unbox", self.shape())
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }
}

/// C-level representation of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    Obj,
    Int,
    Float,
    Bool,
    Void,
    RTuple(RTuple),
}

impl CType {
    pub fn c_name(&self) -> String {
        match self {
            CType::Obj => "mp_obj_t".to_string(),
            CType::Int => "mp_int_t".to_string(),
            CType::Float => "mp_float_t".to_string(),
            CType::Bool => "bool".to_string(),
            CType::Void => "void".to_string(),
            CType::RTuple(shape) => shape.c_name(),
        }
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self, CType::Obj)
    }

    /// Initial value for a declared local of this type.
    pub fn zero(&self) -> String {
        match self {
            CType::Obj => "mp_const_none".to_string(),
            CType::Int => "0".to_string(),
            CType::Float => "0.0".to_string(),
            CType::Bool => "false".to_string(),
            CType::Void => String::new(),
            CType::RTuple(_) => "{0}".to_string(),
        }
    }

    /// C expression boxing `expr` (already of this type) into an `mp_obj_t`.
    pub fn box_expr(&self, expr: &str) -> String {
        match self {
            CType::Obj => expr.to_string(),
            CType::Int => format!("mp_obj_new_int({expr})"),
            CType::Float => format!("mp_obj_new_float({expr})"),
            CType::Bool => format!("mp_obj_new_bool({expr})"),
            CType::Void => "mp_const_none".to_string(),
            CType::RTuple(shape) => format!("{}({expr})", shape.box_fn()),
        }
    }

    /// C expression converting the handle `expr` into this type, raising on mismatch.
    pub fn unbox_expr(&self, expr: &str) -> String {
        match self {
            CType::Obj | CType::Void => expr.to_string(),
            CType::Int => format!("mp_obj_get_int({expr})"),
            CType::Float => format!("mp_get_float_checked({expr})"),
            CType::Bool => format!("mp_obj_is_true({expr})"),
            CType::RTuple(shape) => format!("{}({expr})", shape.unbox_fn()),
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.c_name())
    }
}
