//! Overload resolution
//!
//! An [`OverloadDescriptor`] groups the callables sharing one simple name on
//! one type. Each call is matched against the candidates in three tiers:
//!
//! 1. same arity, every argument an exact match;
//! 2. same arity, every argument exact or widening;
//! 3. fewer arguments, the missing trailing parameters all have defaults
//!    and the given arguments match exactly or by widening.
//!
//! The first non-empty tier decides. Two matches in the deciding tier is an
//! ambiguity, never a silent pick.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use ferry_reflect::{CollectionKind, ConstructorInfo, HostValue, MethodInfo, ParamInfo, PrimitiveType, TypeDef, TypeSig};
use ferry_script::{JsPromise, Realm, ScriptResult, Value};
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::convert::{Converter, integer_from_f64};
use crate::error::{MarshalError, MarshalResult};
use crate::marshaller::Marshaller;
use crate::registry::unwrap_slot;
use crate::shape::Shape;

/// Kind of member a descriptor resolves over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    StaticMethod,
    Constructor,
    Extension,
}

/// How well one argument fits one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchLevel {
    Exact,
    Widening,
}

#[derive(Clone)]
enum Callable {
    Method(MethodInfo),
    Constructor(ConstructorInfo),
}

/// Converters for one candidate, compiled on first selection
struct CallAdapter {
    params: Vec<Arc<Converter>>,
    returns: Arc<Converter>,
}

/// One callable of an overload set
pub struct OverloadCandidate {
    declaring: Arc<TypeDef>,
    callable: Callable,
    signature: String,
    shapes: OnceCell<Vec<Shape>>,
    adapter: OnceCell<CallAdapter>,
}

impl OverloadCandidate {
    pub fn method(declaring: Arc<TypeDef>, method: MethodInfo) -> Self {
        let signature = method.signature();
        Self::new(declaring, Callable::Method(method), signature)
    }

    pub fn constructor(declaring: Arc<TypeDef>, ctor: ConstructorInfo) -> Self {
        let signature = ctor.signature();
        Self::new(declaring, Callable::Constructor(ctor), signature)
    }

    fn new(declaring: Arc<TypeDef>, callable: Callable, signature: String) -> Self {
        Self {
            declaring,
            callable,
            signature,
            shapes: OnceCell::new(),
            adapter: OnceCell::new(),
        }
    }

    /// `Name(int,string)` or `.ctor(int)`
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn declaring(&self) -> &Arc<TypeDef> {
        &self.declaring
    }

    pub fn params(&self) -> &[ParamInfo] {
        match &self.callable {
            Callable::Method(method) => &method.params,
            Callable::Constructor(ctor) => &ctor.params,
        }
    }

    /// Result type; a constructor returns its declaring type
    pub fn returns(&self) -> TypeSig {
        match &self.callable {
            Callable::Method(method) => method.returns.clone(),
            Callable::Constructor(_) => self.declaring.sig(),
        }
    }

    /// Parameter shapes; not cached while a parameter type is unresolvable
    fn shapes(&self, m: &Marshaller) -> MarshalResult<&[Shape]> {
        self.shapes
            .get_or_try_init(|| {
                self.params()
                    .iter()
                    .map(|p| Shape::classify(m.universe(), &p.ty))
                    .collect()
            })
            .map(Vec::as_slice)
    }

    fn adapter(&self, m: &Marshaller) -> MarshalResult<&CallAdapter> {
        self.adapter.get_or_try_init(|| {
            let params = self
                .params()
                .iter()
                .map(|p| m.get_converter(&p.ty))
                .collect::<MarshalResult<Vec<_>>>()?;
            let returns = m.get_converter(&self.returns())?;
            m.stats().adapters_compiled.fetch_add(1, Ordering::Relaxed);
            debug!(ty = %self.declaring.full_name, member = %self.signature, "compiled call adapter");
            Ok(CallAdapter { params, returns })
        })
    }

    /// Worst match level over the given arguments, `None` if any fails
    fn match_args(&self, m: &Marshaller, args: &[Value]) -> Option<MatchLevel> {
        let shapes = self.shapes(m).ok()?;
        let params = self.params();
        let mut level = MatchLevel::Exact;
        for (i, arg) in args.iter().enumerate() {
            level = level.max(match_arg(m, arg, &params[i].ty, &shapes[i])?);
        }
        Some(level)
    }
}

/// Match one script argument against one parameter
pub fn match_arg(m: &Marshaller, value: &Value, sig: &TypeSig, shape: &Shape) -> Option<MatchLevel> {
    use MatchLevel::{Exact, Widening};

    if let Shape::Any = shape {
        return Some(Widening);
    }
    if let Shape::Optional(inner) = shape {
        if value.is_nullish() {
            return Some(Exact);
        }
        let inner_shape = Shape::classify(m.universe(), inner).ok()?;
        return match_arg(m, value, inner, &inner_shape);
    }

    match value {
        Value::Undefined | Value::Null => match shape {
            Shape::Primitive(PrimitiveType::String)
            | Shape::Reference(_)
            | Shape::Interface(_)
            | Shape::Collection(..) => Some(Widening),
            _ => None,
        },
        Value::Bool(_) => matches!(shape, Shape::Primitive(PrimitiveType::Bool)).then_some(Exact),
        Value::Number(n) => match shape {
            Shape::Primitive(PrimitiveType::F64) => Some(Exact),
            Shape::Primitive(PrimitiveType::F32) => Some(Widening),
            Shape::Primitive(p) if p.is_integer() => {
                (n.fract() == 0.0 && integer_from_f64(*p, *n).is_some()).then_some(Widening)
            }
            Shape::Enum(_) => (n.is_finite() && n.fract() == 0.0).then_some(Widening),
            _ => None,
        },
        Value::String(s) => match shape {
            Shape::Primitive(PrimitiveType::String) => Some(Exact),
            Shape::Primitive(PrimitiveType::Char) => (s.chars().count() == 1).then_some(Widening),
            Shape::Enum(ty) => ty.enum_member(s).map(|_| Widening),
            _ => None,
        },
        Value::Object(object) => {
            if let Some(host) = unwrap_slot(value) {
                return match (host, shape) {
                    (HostValue::Object(o), Shape::Reference(_) | Shape::Interface(_)) => {
                        m.universe().is_assignable(&o.type_def(), sig).then_some(Exact)
                    }
                    (HostValue::List(_), Shape::Collection(CollectionKind::List | CollectionKind::Iterable, _))
                    | (HostValue::Set(_), Shape::Collection(CollectionKind::Set | CollectionKind::Iterable, _))
                    | (HostValue::Map(_), Shape::Collection(CollectionKind::Map, _))
                    | (HostValue::Iterable(_), Shape::Collection(CollectionKind::Iterable, _))
                    | (HostValue::Future(_), Shape::Future(_)) => Some(Exact),
                    _ => None,
                };
            }
            if JsPromise::from_object(object).is_some() {
                return matches!(shape, Shape::Future(_)).then_some(Exact);
            }
            if object.is_array() {
                return match shape {
                    Shape::Array(_) => Some(Exact),
                    Shape::Collection(CollectionKind::List | CollectionKind::Set | CollectionKind::Iterable, _) => {
                        Some(Widening)
                    }
                    _ => None,
                };
            }
            if object.is_function() {
                return None;
            }
            match shape {
                Shape::Struct(_) | Shape::Interface(_) | Shape::Collection(CollectionKind::Map, _) => Some(Widening),
                _ => None,
            }
        }
    }
}

/// Resolver over the candidates sharing one name
pub struct OverloadDescriptor {
    owner: Arc<str>,
    name: String,
    candidates: Vec<OverloadCandidate>,
}

impl OverloadDescriptor {
    pub fn build(owner: Arc<str>, name: impl Into<String>, candidates: Vec<OverloadCandidate>) -> Self {
        Self {
            owner,
            name: name.into(),
            candidates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[OverloadCandidate] {
        &self.candidates
    }

    /// Pick the candidate for `args`
    pub fn resolve(&self, m: &Marshaller, args: &[Value]) -> MarshalResult<&OverloadCandidate> {
        let mut exact = Vec::new();
        let mut widening = Vec::new();
        let mut defaults = Vec::new();

        for candidate in &self.candidates {
            let params = candidate.params();
            if args.len() == params.len() {
                match candidate.match_args(m, args) {
                    Some(MatchLevel::Exact) => exact.push(candidate),
                    Some(MatchLevel::Widening) => widening.push(candidate),
                    None => {}
                }
            } else if args.len() < params.len()
                && params[args.len()..].iter().all(|p| p.default.is_some())
                && candidate.match_args(m, args).is_some()
            {
                defaults.push(candidate);
            }
        }

        for tier in [exact, widening, defaults] {
            match tier.as_slice() {
                [] => continue,
                [single] => return Ok(single),
                ambiguous => {
                    return Err(MarshalError::AmbiguousOverload {
                        name: self.name.clone(),
                        candidates: ambiguous.iter().map(|c| c.signature.clone()).collect(),
                    });
                }
            }
        }
        Err(MarshalError::NoMatchingOverload {
            name: self.name.clone(),
            args: args.iter().map(Value::type_name).collect::<Vec<_>>().join(", "),
        })
    }

    /// Resolve, convert arguments, call and convert the result back
    pub fn invoke(&self, m: &Marshaller, realm: &Realm, this: Option<&HostValue>, args: &[Value]) -> MarshalResult<Value> {
        let candidate = self.resolve(m, args)?;
        let adapter = candidate.adapter(m)?;
        trace!(ty = %self.owner, member = %candidate.signature, "invoke");

        let mut host_args = Vec::with_capacity(adapter.params.len());
        for (converter, arg) in adapter.params.iter().zip(args) {
            host_args.push(converter.to_host(m, realm, arg)?);
        }
        for param in &candidate.params()[args.len()..] {
            host_args.push(param.default.clone().unwrap_or(HostValue::Null));
        }

        let universe = m.universe();
        let result = match &candidate.callable {
            Callable::Method(method) => {
                let receiver = if method.is_static && !method.is_extension() { None } else { this };
                universe.invoke_method(&candidate.declaring, method, receiver, &host_args)?
            }
            Callable::Constructor(ctor) => universe.construct(&candidate.declaring, ctor, &host_args)?,
        };
        adapter.returns.to_script(m, realm, &result)
    }

    /// [`invoke`](Self::invoke) for script callers: failures become
    /// `TypeError`s carrying the member as a host frame
    pub fn invoke_script(
        &self,
        m: &Marshaller,
        realm: &Realm,
        this: Option<&HostValue>,
        args: &[Value],
    ) -> ScriptResult<Value> {
        self.invoke(m, realm, this, args)
            .map_err(|err| err.into_script_error(format!("{}.{}", self.owner, self.name)))
    }
}

impl std::fmt::Debug for OverloadDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signatures: Vec<&str> = self.candidates.iter().map(|c| c.signature()).collect();
        f.debug_struct("OverloadDescriptor")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("candidates", &signatures)
            .finish()
    }
}
