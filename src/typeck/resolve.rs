use std::collections::HashSet;

use crate::diagnostics::CompileError;
use crate::parser::ast::TypeExpr;
use crate::span::{Span, Spanned};
use super::types::{ContainerHint, ReturnType, SourceType};

/// Names that resolve to a generic handle without naming a user class.
const OPAQUE_BUILTINS: &[&str] = &[
    "object", "Any", "tuple", "Tuple", "bytes", "bytearray", "memoryview", "range", "complex",
    "Callable", "Iterator", "Iterable", "Generator", "Sequence", "Type", "type", "Optional",
    "Union", "Final", "ClassVar", "None", "Exception", "BaseException", "NoReturn",
];

/// Subscriptable generics whose arguments are checked but do not change the result.
const OPAQUE_GENERICS: &[&str] = &[
    "Optional", "Union", "Callable", "Iterator", "Iterable", "Generator", "Sequence", "Type",
    "type", "ClassVar",
];

/// Maps annotations to source types against the set of classes declared in the unit.
pub struct TypeResolver<'a> {
    classes: &'a HashSet<String>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(classes: &'a HashSet<String>) -> Self {
        Self { classes }
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.classes.contains(name)
    }

    /// Resolve an optional annotation; an absent one is a generic handle.
    pub fn resolve_opt(&self, ty: Option<&Spanned<TypeExpr>>) -> Result<SourceType, CompileError> {
        match ty {
            Some(ty) => self.resolve(ty),
            None => Ok(SourceType::opaque()),
        }
    }

    pub fn resolve(&self, ty: &Spanned<TypeExpr>) -> Result<SourceType, CompileError> {
        match &ty.node {
            TypeExpr::Named(name) => self.resolve_name(name, ty.span),
            TypeExpr::Qualified { module, name } => {
                if module == "typing" || module == "typing_extensions" {
                    self.resolve_name(name, ty.span)
                } else {
                    Ok(SourceType::opaque())
                }
            }
            TypeExpr::Forward(text) => {
                let name = text.trim();
                let name = name.rsplit('.').next().unwrap_or(name);
                self.resolve_name(name, ty.span)
            }
            TypeExpr::Generic { base, args } => self.resolve_generic(base, args, ty.span),
            TypeExpr::Union(members) => {
                for member in members {
                    self.resolve(member)?;
                }
                Ok(SourceType::opaque())
            }
            TypeExpr::NoneType | TypeExpr::Other => Ok(SourceType::opaque()),
        }
    }

    /// Return position: `None` means the function returns nothing; absence means a handle.
    pub fn resolve_return(&self, ty: Option<&Spanned<TypeExpr>>) -> Result<ReturnType, CompileError> {
        match ty {
            Some(Spanned { node: TypeExpr::NoneType, .. }) => Ok(ReturnType::Nothing),
            Some(ty) => Ok(ReturnType::Value(self.resolve(ty)?)),
            None => Ok(ReturnType::Value(SourceType::opaque())),
        }
    }

    fn resolve_name(&self, name: &str, span: Span) -> Result<SourceType, CompileError> {
        let ty = match name {
            "int" => SourceType::MachineInt,
            "float" => SourceType::MachineFloat,
            "bool" => SourceType::Boolean,
            "str" => SourceType::Text,
            "list" | "List" => SourceType::OpaqueHandle(ContainerHint::Sequence),
            "dict" | "Dict" => SourceType::OpaqueHandle(ContainerHint::Mapping),
            "set" | "Set" | "frozenset" | "FrozenSet" => SourceType::OpaqueHandle(ContainerHint::Set),
            _ if self.classes.contains(name) => SourceType::UserClass(name.to_string()),
            _ if OPAQUE_BUILTINS.contains(&name) => SourceType::opaque(),
            _ if looks_like_user_type(name) => {
                return Err(CompileError::resolution(format!("unknown type '{name}'"), span));
            }
            _ => SourceType::opaque(),
        };
        Ok(ty)
    }

    fn resolve_generic(
        &self,
        base: &str,
        args: &[Spanned<TypeExpr>],
        span: Span,
    ) -> Result<SourceType, CompileError> {
        match base {
            "list" | "List" | "dict" | "Dict" | "set" | "Set" | "frozenset" | "FrozenSet" => {
                for arg in args {
                    self.resolve(arg)?;
                }
                self.resolve_name(base, span)
            }
            "tuple" | "Tuple" => {
                let open_ended = args.iter().any(|a| matches!(a.node, TypeExpr::Other));
                let elems = args.iter().map(|a| self.resolve(a)).collect::<Result<Vec<_>, _>>()?;
                if elems.is_empty() || open_ended {
                    Ok(SourceType::opaque())
                } else {
                    Ok(SourceType::FixedTuple(elems))
                }
            }
            "Final" => match args {
                [inner] => self.resolve(inner),
                _ => Ok(SourceType::opaque()),
            },
            _ if OPAQUE_GENERICS.contains(&base) => {
                for arg in args {
                    self.resolve(arg)?;
                }
                Ok(SourceType::opaque())
            }
            _ => Err(CompileError::resolution(format!("unknown generic type '{base}'"), span)),
        }
    }
}

/// A capitalised identifier that is not a known builtin names a user type.
fn looks_like_user_type(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_with(classes: &[&str], ty: TypeExpr) -> Result<SourceType, CompileError> {
        let set: HashSet<String> = classes.iter().map(|s| s.to_string()).collect();
        TypeResolver::new(&set).resolve(&Spanned::dummy(ty))
    }

    fn resolve(ty: TypeExpr) -> Result<SourceType, CompileError> {
        resolve_with(&[], ty)
    }

    fn named(n: &str) -> TypeExpr {
        TypeExpr::Named(n.to_string())
    }

    fn generic(base: &str, args: Vec<TypeExpr>) -> TypeExpr {
        TypeExpr::Generic { base: base.to_string(), args: args.into_iter().map(Spanned::dummy).collect() }
    }

    #[test]
    fn primitives() {
        assert_eq!(resolve(named("int")).unwrap(), SourceType::MachineInt);
        assert_eq!(resolve(named("float")).unwrap(), SourceType::MachineFloat);
        assert_eq!(resolve(named("bool")).unwrap(), SourceType::Boolean);
        assert_eq!(resolve(named("str")).unwrap(), SourceType::Text);
    }

    #[test]
    fn containers_carry_hints() {
        assert_eq!(resolve(generic("list", vec![named("int")])).unwrap(), SourceType::sequence());
        assert_eq!(
            resolve(generic("Dict", vec![named("str"), named("int")])).unwrap(),
            SourceType::OpaqueHandle(ContainerHint::Mapping)
        );
        assert_eq!(resolve(named("set")).unwrap(), SourceType::OpaqueHandle(ContainerHint::Set));
    }

    #[test]
    fn fixed_tuple() {
        let ty = resolve(generic("tuple", vec![named("int"), named("int")])).unwrap();
        assert_eq!(ty, SourceType::FixedTuple(vec![SourceType::MachineInt, SourceType::MachineInt]));
    }

    #[test]
    fn bare_and_open_tuples_are_opaque() {
        assert_eq!(resolve(named("tuple")).unwrap(), SourceType::opaque());
        assert_eq!(resolve(generic("tuple", vec![named("int"), TypeExpr::Other])).unwrap(), SourceType::opaque());
    }

    #[test]
    fn optional_and_union_are_opaque() {
        assert_eq!(resolve(generic("Optional", vec![named("int")])).unwrap(), SourceType::opaque());
        let union = TypeExpr::Union(vec![Spanned::dummy(named("int")), Spanned::dummy(TypeExpr::NoneType)]);
        assert_eq!(resolve(union).unwrap(), SourceType::opaque());
    }

    #[test]
    fn declared_class_and_forward_reference() {
        assert_eq!(resolve_with(&["Node"], named("Node")).unwrap(), SourceType::UserClass("Node".into()));
        assert_eq!(
            resolve_with(&["Node"], TypeExpr::Forward("Node".into())).unwrap(),
            SourceType::UserClass("Node".into())
        );
    }

    #[test]
    fn unknown_capitalised_name_is_resolution_error() {
        let err = resolve(named("Vector")).unwrap_err();
        assert!(matches!(err, CompileError::Resolution { .. }));
        assert!(err.to_string().contains("unknown type 'Vector'"));
    }

    #[test]
    fn unknown_class_inside_container_is_error() {
        assert!(resolve(generic("list", vec![named("Widget")])).is_err());
    }

    #[test]
    fn unknown_generic_is_error() {
        assert!(resolve(generic("deque", vec![named("int")])).is_err());
    }

    #[test]
    fn unrecognised_lowercase_name_is_opaque() {
        assert_eq!(resolve(named("whatever")).unwrap(), SourceType::opaque());
    }

    #[test]
    fn typing_qualified_names() {
        let ty = TypeExpr::Qualified { module: "typing".into(), name: "List".into() };
        assert_eq!(resolve(ty).unwrap(), SourceType::sequence());
    }

    #[test]
    fn return_none_means_nothing() {
        let set = HashSet::new();
        let r = TypeResolver::new(&set);
        assert_eq!(r.resolve_return(Some(&Spanned::dummy(TypeExpr::NoneType))).unwrap(), ReturnType::Nothing);
        assert_eq!(r.resolve_return(None).unwrap(), ReturnType::Value(SourceType::opaque()));
    }
}
