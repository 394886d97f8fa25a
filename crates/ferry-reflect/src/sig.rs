//! Type signatures
//!
//! A [`TypeSig`] names a static host type structurally. Signatures are
//! hashable and cheap to compare, so they key every per-type cache in the
//! engine. They parse from and display as a compact text syntax:
//!
//! ```text
//! int  string  object  void           primitives, any, void
//! Contoso.Point                       named type
//! Contoso.Box<int>                    generic instantiation
//! int[]  int?                         array, nullable
//! List<T>  Set<T>  Map<K,V>  Iterable<T>
//! Task  Task<string>                  futures
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{HostError, HostResult};

/// Primitive host types (`string` included)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Char => "char",
            Self::I8 => "sbyte",
            Self::U8 => "byte",
            Self::I16 => "short",
            Self::U16 => "ushort",
            Self::I32 => "int",
            Self::U32 => "uint",
            Self::I64 => "long",
            Self::U64 => "ulong",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::String => "string",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" | "boolean" => Self::Bool,
            "char" => Self::Char,
            "sbyte" | "i8" => Self::I8,
            "byte" | "u8" => Self::U8,
            "short" | "i16" => Self::I16,
            "ushort" | "u16" => Self::U16,
            "int" | "i32" => Self::I32,
            "uint" | "u32" => Self::U32,
            "long" | "i64" => Self::I64,
            "ulong" | "u64" => Self::U64,
            "float" | "f32" => Self::F32,
            "double" | "f64" => Self::F64,
            "string" => Self::String,
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::U8 | Self::I16 | Self::U16 | Self::I32 | Self::U32 | Self::I64 | Self::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Inclusive range of an integer type, as `f64`
    pub fn integer_range(self) -> Option<(f64, f64)> {
        Some(match self {
            Self::I8 => (i8::MIN as f64, i8::MAX as f64),
            Self::U8 => (0.0, u8::MAX as f64),
            Self::I16 => (i16::MIN as f64, i16::MAX as f64),
            Self::U16 => (0.0, u16::MAX as f64),
            Self::I32 => (i32::MIN as f64, i32::MAX as f64),
            Self::U32 => (0.0, u32::MAX as f64),
            Self::I64 => (i64::MIN as f64, i64::MAX as f64),
            Self::U64 => (0.0, u64::MAX as f64),
            _ => return None,
        })
    }
}

/// Kinds of collection interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    List,
    Set,
    Map,
    Iterable,
}

impl CollectionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::List => "List",
            Self::Set => "Set",
            Self::Map => "Map",
            Self::Iterable => "Iterable",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "List" | "IList" | "ICollection" => Self::List,
            "Set" | "ISet" | "HashSet" => Self::Set,
            "Map" | "Dictionary" | "IDictionary" => Self::Map,
            "Iterable" | "IEnumerable" => Self::Iterable,
            _ => return None,
        })
    }

    /// Number of type arguments
    pub fn arity(self) -> usize {
        match self {
            Self::Map => 2,
            _ => 1,
        }
    }
}

/// Structural signature of a static host type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    Void,
    /// Dynamically typed (`object`)
    Any,
    Primitive(PrimitiveType),
    /// A registered type, by full name
    Named(Arc<str>),
    /// Instantiation of a generic definition
    Generic {
        definition: Arc<str>,
        args: Vec<TypeSig>,
    },
    /// Unbound generic parameter
    Param(Arc<str>),
    Array(Box<TypeSig>),
    Nullable(Box<TypeSig>),
    Collection(CollectionKind, Vec<TypeSig>),
    /// Asynchronous result; `Void` for a result-less future
    Future(Box<TypeSig>),
}

impl TypeSig {
    pub fn named(name: impl AsRef<str>) -> Self {
        TypeSig::Named(Arc::from(name.as_ref()))
    }

    pub fn param(name: impl AsRef<str>) -> Self {
        TypeSig::Param(Arc::from(name.as_ref()))
    }

    pub fn generic(definition: impl AsRef<str>, args: Vec<TypeSig>) -> Self {
        TypeSig::Generic {
            definition: Arc::from(definition.as_ref()),
            args,
        }
    }

    pub fn array(elem: TypeSig) -> Self {
        TypeSig::Array(Box::new(elem))
    }

    pub fn nullable(inner: TypeSig) -> Self {
        match inner {
            already @ TypeSig::Nullable(_) => already,
            inner => TypeSig::Nullable(Box::new(inner)),
        }
    }

    pub fn list(elem: TypeSig) -> Self {
        TypeSig::Collection(CollectionKind::List, vec![elem])
    }

    pub fn set(elem: TypeSig) -> Self {
        TypeSig::Collection(CollectionKind::Set, vec![elem])
    }

    pub fn map(key: TypeSig, value: TypeSig) -> Self {
        TypeSig::Collection(CollectionKind::Map, vec![key, value])
    }

    pub fn iterable(elem: TypeSig) -> Self {
        TypeSig::Collection(CollectionKind::Iterable, vec![elem])
    }

    pub fn future(result: TypeSig) -> Self {
        TypeSig::Future(Box::new(result))
    }

    pub const fn int() -> Self {
        TypeSig::Primitive(PrimitiveType::I32)
    }

    pub const fn double() -> Self {
        TypeSig::Primitive(PrimitiveType::F64)
    }

    pub const fn string() -> Self {
        TypeSig::Primitive(PrimitiveType::String)
    }

    pub const fn bool() -> Self {
        TypeSig::Primitive(PrimitiveType::Bool)
    }

    pub fn parse(text: &str) -> HostResult<Self> {
        Parser::new(text, &[]).parse_all()
    }

    /// Parse with an explicit set of generic parameter names in scope
    pub fn parse_with_params(text: &str, params: &[&str]) -> HostResult<Self> {
        Parser::new(text, params).parse_all()
    }

    /// Full name of a named type or the definition of a generic instantiation
    pub fn type_name(&self) -> Option<&str> {
        match self {
            TypeSig::Named(name) => Some(name),
            TypeSig::Generic { definition, .. } => Some(definition),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            TypeSig::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Whether the signature mentions an unbound parameter
    pub fn is_open(&self) -> bool {
        match self {
            TypeSig::Param(_) => true,
            TypeSig::Generic { args, .. } | TypeSig::Collection(_, args) => {
                args.iter().any(TypeSig::is_open)
            }
            TypeSig::Array(inner) | TypeSig::Nullable(inner) | TypeSig::Future(inner) => {
                inner.is_open()
            }
            _ => false,
        }
    }

    /// Replace generic parameters by their bindings
    pub fn substitute(&self, bindings: &HashMap<Arc<str>, TypeSig>) -> TypeSig {
        match self {
            TypeSig::Param(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            TypeSig::Generic { definition, args } => TypeSig::Generic {
                definition: definition.clone(),
                args: args.iter().map(|a| a.substitute(bindings)).collect(),
            },
            TypeSig::Collection(kind, args) => {
                TypeSig::Collection(*kind, args.iter().map(|a| a.substitute(bindings)).collect())
            }
            TypeSig::Array(inner) => TypeSig::Array(Box::new(inner.substitute(bindings))),
            TypeSig::Nullable(inner) => TypeSig::Nullable(Box::new(inner.substitute(bindings))),
            TypeSig::Future(inner) => TypeSig::Future(Box::new(inner.substitute(bindings))),
            other => other.clone(),
        }
    }

    /// Named types referenced by this signature (used to export dependencies)
    pub fn referenced_types(&self) -> SmallVec<[TypeSig; 4]> {
        let mut out = SmallVec::new();
        self.collect_referenced(&mut out);
        out
    }

    fn collect_referenced(&self, out: &mut SmallVec<[TypeSig; 4]>) {
        match self {
            TypeSig::Named(_) => out.push(self.clone()),
            TypeSig::Generic { args, .. } => {
                out.push(self.clone());
                for arg in args {
                    arg.collect_referenced(out);
                }
            }
            TypeSig::Collection(_, args) => {
                for arg in args {
                    arg.collect_referenced(out);
                }
            }
            TypeSig::Array(inner) | TypeSig::Nullable(inner) | TypeSig::Future(inner) => {
                inner.collect_referenced(out)
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, args: &[TypeSig]) -> fmt::Result {
            write!(f, "<")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")
        }

        match self {
            TypeSig::Void => write!(f, "void"),
            TypeSig::Any => write!(f, "object"),
            TypeSig::Primitive(p) => write!(f, "{}", p.name()),
            TypeSig::Named(name) | TypeSig::Param(name) => write!(f, "{}", name),
            TypeSig::Generic { definition, args } => {
                write!(f, "{}", definition)?;
                list(f, args)
            }
            TypeSig::Array(inner) => write!(f, "{}[]", inner),
            TypeSig::Nullable(inner) => write!(f, "{}?", inner),
            TypeSig::Collection(kind, args) => {
                write!(f, "{}", kind.name())?;
                list(f, args)
            }
            TypeSig::Future(inner) => match inner.as_ref() {
                TypeSig::Void => write!(f, "Task"),
                result => write!(f, "Task<{}>", result),
            },
        }
    }
}

impl FromStr for TypeSig {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeSig::parse(s)
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    params: &'a [&'a str],
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, params: &'a [&'a str]) -> Self {
        Self {
            text,
            pos: 0,
            params,
        }
    }

    fn error(&self, reason: impl Into<String>) -> HostError {
        HostError::InvalidSignature {
            text: self.text.to_string(),
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.text[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn parse_all(mut self) -> HostResult<TypeSig> {
        let sig = self.parse_sig()?;
        self.skip_ws();
        if self.pos != self.text.len() {
            return Err(self.error(format!("unexpected input at offset {}", self.pos)));
        }
        Ok(sig)
    }

    fn parse_sig(&mut self) -> HostResult<TypeSig> {
        let mut sig = self.parse_base()?;
        loop {
            if self.eat("[]") {
                sig = TypeSig::array(sig);
            } else if self.eat("?") {
                sig = TypeSig::nullable(sig);
            } else {
                return Ok(sig);
            }
        }
    }

    fn ident(&mut self) -> HostResult<&'a str> {
        self.skip_ws();
        let start = self.pos;
        let rest = &self.text[start..];
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '`'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error(format!("expected a type name at offset {}", start)));
        }
        self.pos += len;
        Ok(&self.text[start..start + len])
    }

    fn parse_base(&mut self) -> HostResult<TypeSig> {
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.eat("<") {
            loop {
                args.push(self.parse_sig()?);
                if self.eat(">") {
                    break;
                }
                if !self.eat(",") {
                    return Err(self.error("expected ',' or '>'"));
                }
            }
        }

        if args.is_empty() {
            return Ok(match name {
                "void" => TypeSig::Void,
                "object" | "any" => TypeSig::Any,
                "Task" | "Future" => TypeSig::future(TypeSig::Void),
                _ => match PrimitiveType::from_name(name) {
                    Some(p) => TypeSig::Primitive(p),
                    None if self.is_param(name) => TypeSig::param(name),
                    None => TypeSig::named(name),
                },
            });
        }

        if matches!(name, "Task" | "Future") {
            return match <[TypeSig; 1]>::try_from(args) {
                Ok([result]) => Ok(TypeSig::future(result)),
                Err(_) => Err(self.error("Task takes one type argument")),
            };
        }
        if let Some(kind) = CollectionKind::from_name(name) {
            if args.len() != kind.arity() {
                return Err(self.error(format!(
                    "{} takes {} type argument(s)",
                    kind.name(),
                    kind.arity()
                )));
            }
            return Ok(TypeSig::Collection(kind, args));
        }
        Ok(TypeSig::generic(name, args))
    }

    fn is_param(&self, name: &str) -> bool {
        if self.params.contains(&name) {
            return true;
        }
        // `T`, `U`, `TKey`, `TValue`
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(first), None) => first.is_ascii_uppercase(),
            (Some('T'), Some(second)) => second.is_ascii_uppercase() && !name.contains('.'),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives_and_suffixes() {
        assert_eq!(TypeSig::parse("int").unwrap(), TypeSig::int());
        assert_eq!(TypeSig::parse("int[]").unwrap(), TypeSig::array(TypeSig::int()));
        assert_eq!(TypeSig::parse("int?").unwrap(), TypeSig::nullable(TypeSig::int()));
        assert_eq!(
            TypeSig::parse("string[]?").unwrap(),
            TypeSig::nullable(TypeSig::array(TypeSig::string()))
        );
    }

    #[test]
    fn test_parse_collections_and_futures() {
        assert_eq!(
            TypeSig::parse("Map<string, List<int>>").unwrap(),
            TypeSig::map(TypeSig::string(), TypeSig::list(TypeSig::int()))
        );
        assert_eq!(TypeSig::parse("Task").unwrap(), TypeSig::future(TypeSig::Void));
        assert_eq!(
            TypeSig::parse("Task<Contoso.Point>").unwrap(),
            TypeSig::future(TypeSig::named("Contoso.Point"))
        );
    }

    #[test]
    fn test_parse_generics_and_params() {
        let sig = TypeSig::parse("Contoso.Box<T>").unwrap();
        assert_eq!(sig, TypeSig::generic("Contoso.Box", vec![TypeSig::param("T")]));
        assert!(sig.is_open());
        assert_eq!(TypeSig::parse("TimeSpan").unwrap(), TypeSig::named("TimeSpan"));
        assert_eq!(
            TypeSig::parse_with_params("Item", &["Item"]).unwrap(),
            TypeSig::param("Item")
        );
    }

    #[test]
    fn test_display_matches_parse() {
        for text in ["int", "Contoso.Box<int>", "List<string>", "Map<string,double>", "Task<int[]>", "long?", "object"] {
            let sig = TypeSig::parse(text).unwrap();
            assert_eq!(sig.to_string(), text);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(TypeSig::parse("").is_err());
        assert!(TypeSig::parse("List<int").is_err());
        assert!(TypeSig::parse("Map<int>").is_err());
        assert!(TypeSig::parse("int int").is_err());
    }

    #[test]
    fn test_substitute() {
        let mut bindings = HashMap::new();
        bindings.insert(Arc::<str>::from("T"), TypeSig::string());
        let sig = TypeSig::parse("List<T>[]").unwrap().substitute(&bindings);
        assert_eq!(sig, TypeSig::array(TypeSig::list(TypeSig::string())));
    }

    #[test]
    fn test_referenced_types() {
        let sig = TypeSig::parse("Map<string, Contoso.Point[]>").unwrap();
        let refs = sig.referenced_types();
        assert_eq!(refs.as_slice(), &[TypeSig::named("Contoso.Point")]);
    }
}
