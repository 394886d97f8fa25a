//! Overload resolution and extension method tests

use std::sync::Arc;

use ferry::{MarshalConfig, MarshalError, Marshaller, MemberKind};
use ferry_reflect::{HostError, HostInstance, HostValue, ParamInfo, TypeBuilder, TypeSig, TypeUniverse};
use ferry_script::{Realm, Value};

fn number(args: &[HostValue], index: usize) -> f64 {
    args.get(index).and_then(HostValue::as_f64).unwrap_or_default()
}

fn calc_universe() -> Arc<TypeUniverse> {
    let universe = TypeUniverse::new();
    universe.register(
        TypeBuilder::static_class("Contoso.Calc")
            .static_method("F", vec![ParamInfo::new("x", TypeSig::int())], TypeSig::string(), |_, _| {
                Ok(HostValue::string("int"))
            })
            .static_method("F", vec![ParamInfo::new("x", TypeSig::string())], TypeSig::string(), |_, _| {
                Ok(HostValue::string("string"))
            })
            .static_method("G", vec![ParamInfo::new("x", TypeSig::int())], TypeSig::int(), |_, _| {
                Ok(HostValue::I32(32))
            })
            .static_method(
                "G",
                vec![ParamInfo::new("x", TypeSig::parse("long").unwrap())],
                TypeSig::int(),
                |_, _| Ok(HostValue::I32(64)),
            )
            .static_method("K", vec![ParamInfo::new("x", TypeSig::int())], TypeSig::string(), |_, _| {
                Ok(HostValue::string("int"))
            })
            .static_method("K", vec![ParamInfo::new("x", TypeSig::double())], TypeSig::string(), |_, _| {
                Ok(HostValue::string("double"))
            })
            .static_method(
                "Scale",
                vec![ParamInfo::new("x", TypeSig::double())],
                TypeSig::double(),
                |_, args| Ok(HostValue::F64(number(args, 0))),
            )
            .static_method(
                "Scale",
                vec![
                    ParamInfo::new("x", TypeSig::double()),
                    ParamInfo::optional("factor", TypeSig::double(), HostValue::F64(2.0)),
                ],
                TypeSig::double(),
                |_, args| Ok(HostValue::F64(number(args, 0) * number(args, 1))),
            )
            .static_method(
                "Pad",
                vec![
                    ParamInfo::new("text", TypeSig::string()),
                    ParamInfo::optional("width", TypeSig::int(), HostValue::I32(4)),
                ],
                TypeSig::string(),
                |_, args| {
                    let text = match args.first() {
                        Some(HostValue::String(s)) => s.to_string(),
                        _ => return Err(HostError::type_mismatch("string", "other")),
                    };
                    let width = number(args, 1) as usize;
                    Ok(HostValue::string(format!("{:>width$}", text, width = width)))
                },
            )
            .build(),
    );
    Arc::new(universe)
}

fn call(m: &Marshaller, realm: &Realm, name: &str, args: &[Value]) -> Result<Value, MarshalError> {
    let calc = m.universe().get("Contoso.Calc").unwrap();
    m.descriptor(&calc, name, MemberKind::StaticMethod)?
        .invoke(m, realm, None, args)
}

#[test]
fn test_dispatch_by_argument_type() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    let by_int = call(&m, &realm, "F", &[Value::from(5)]).unwrap();
    assert_eq!(by_int.as_str(), Some("int"));
    let by_string = call(&m, &realm, "F", &[Value::from("five")]).unwrap();
    assert_eq!(by_string.as_str(), Some("string"));
}

#[test]
fn test_equal_widening_matches_are_ambiguous() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    match call(&m, &realm, "G", &[Value::from(5)]) {
        Err(MarshalError::AmbiguousOverload { name, candidates }) => {
            assert_eq!(name, "G");
            assert_eq!(candidates.len(), 2);
            assert!(candidates.iter().any(|c| c == "G(int)"));
            assert!(candidates.iter().any(|c| c == "G(long)"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_exact_match_beats_widening() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    let picked = call(&m, &realm, "K", &[Value::from(5)]).unwrap();
    assert_eq!(picked.as_str(), Some("double"));
}

#[test]
fn test_full_arity_beats_defaults() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    let one = call(&m, &realm, "Scale", &[Value::from(1.5)]).unwrap();
    assert_eq!(one.as_number(), Some(1.5));
    let two = call(&m, &realm, "Scale", &[Value::from(1.5), Value::from(3)]).unwrap();
    assert_eq!(two.as_number(), Some(4.5));
}

#[test]
fn test_missing_trailing_argument_takes_default() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    let padded = call(&m, &realm, "Pad", &[Value::from("ab")]).unwrap();
    assert_eq!(padded.as_str(), Some("  ab"));
    let wide = call(&m, &realm, "Pad", &[Value::from("ab"), Value::from(6)]).unwrap();
    assert_eq!(wide.as_str(), Some("    ab"));
}

#[test]
fn test_no_candidate_accepts_arguments() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    let err = call(&m, &realm, "F", &[Value::from(true)]).unwrap_err();
    assert!(matches!(err, MarshalError::NoMatchingOverload { .. }), "{err}");
    let err = call(&m, &realm, "F", &[]).unwrap_err();
    assert!(matches!(err, MarshalError::NoMatchingOverload { .. }), "{err}");
}

#[test]
fn test_descriptor_is_cached() {
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());
    let calc = m.universe().get("Contoso.Calc").unwrap();

    let first = m.descriptor(&calc, "K", MemberKind::StaticMethod).unwrap();
    let second = m.descriptor(&calc, "K", MemberKind::StaticMethod).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.candidates().len(), 2);
    assert!(m.descriptor(&calc, "Missing", MemberKind::StaticMethod).is_err());
}

#[test]
fn test_adapter_compiles_once_per_candidate() {
    let realm = Realm::new();
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());

    for _ in 0..3 {
        call(&m, &realm, "F", &[Value::from("x")]).unwrap();
    }
    assert_eq!(m.stats().snapshot().adapters_compiled, 1);
    call(&m, &realm, "F", &[Value::from(1)]).unwrap();
    assert_eq!(m.stats().snapshot().adapters_compiled, 2);
}

#[test]
fn test_ambiguity_surfaces_as_type_error() {
    let realm = Realm::new();
    let universe = calc_universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    m.register_types(&universe.types());

    let namespace = m.get_namespace(&realm, "Contoso").unwrap();
    let calc = namespace.get(&realm, "Calc").unwrap();
    let calc = calc.as_object().unwrap();

    let err = calc.call_method(&realm, "G", &[Value::from(5)]).unwrap_err();
    let exception = err.as_exception().expect("script exception");
    assert_eq!(exception.name, "TypeError");
    assert!(exception.message.contains("ambiguous"), "{}", exception.message);
    assert!(exception.stack.iter().any(|frame| frame == "Contoso.Calc.G"));

    let ok = calc.call_method(&realm, "K", &[Value::from(5)]).unwrap();
    assert_eq!(ok.as_str(), Some("double"));
}

// ---------------------------------------------------------------------------
// Extension methods
// ---------------------------------------------------------------------------

fn widget_universe() -> Arc<TypeUniverse> {
    let universe = TypeUniverse::new();
    universe.register(
        TypeBuilder::class("Contoso.Widget")
            .field("Name", TypeSig::string())
            .field_constructor(vec![ParamInfo::new("Name", TypeSig::string())])
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Gadget")
            .base(TypeSig::named("Contoso.Widget"))
            .field_constructor(vec![ParamInfo::new("Name", TypeSig::string())])
            .build(),
    );
    Arc::new(universe)
}

fn describe_extension(universe: &TypeUniverse) -> Arc<ferry_reflect::TypeDef> {
    universe.register(
        TypeBuilder::static_class("Contoso.WidgetExtensions")
            .extension_method(
                "Describe",
                TypeSig::named("Contoso.Widget"),
                vec![ParamInfo::optional("prefix", TypeSig::string(), HostValue::string("widget"))],
                TypeSig::string(),
                |ctx, args| {
                    let HostValue::Object(this) = ctx.this()? else {
                        return Err(HostError::type_mismatch("Contoso.Widget", "value"));
                    };
                    let name = this.get_field("Name")?;
                    let prefix = match args.first() {
                        Some(HostValue::String(p)) => p.to_string(),
                        _ => String::new(),
                    };
                    let name = match name {
                        HostValue::String(n) => n.to_string(),
                        _ => String::new(),
                    };
                    Ok(HostValue::string(format!("{}:{}", prefix, name)))
                },
            )
            .build(),
    )
}

#[test]
fn test_extension_registration_is_idempotent() {
    let realm = Realm::new();
    let universe = widget_universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    describe_extension(&universe);
    m.register_types(&universe.types());

    let methods = universe.extension_methods();
    m.register_extension_methods(&realm, &methods);
    m.register_extension_methods(&realm, &methods);

    let widget = universe.get("Contoso.Widget").unwrap();
    let descriptor = m.descriptor(&widget, "Describe", MemberKind::Extension).unwrap();
    assert_eq!(descriptor.candidates().len(), 1);
}

#[test]
fn test_extension_reaches_already_exported_derived_type() {
    let realm = Realm::new();
    let universe = widget_universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    m.register_types(&universe.types());

    let namespace = m.get_namespace(&realm, "Contoso").unwrap();
    let gadget_ctor = namespace.get(&realm, "Gadget").unwrap();
    let gadget_ctor = gadget_ctor.as_object().unwrap();
    let gadget = gadget_ctor.construct(&realm, &[Value::from("g1")]).unwrap();
    let gadget = gadget.as_object().unwrap();
    assert!(gadget.get(&realm, "Describe").unwrap().is_undefined());

    let extensions = describe_extension(&universe);
    m.register_types(std::slice::from_ref(&extensions));
    m.register_extension_methods(&realm, &universe.extension_methods());

    let described = gadget.call_method(&realm, "Describe", &[]).unwrap();
    assert_eq!(described.as_str(), Some("widget:g1"));
    let described = gadget.call_method(&realm, "Describe", &[Value::from("gadget")]).unwrap();
    assert_eq!(described.as_str(), Some("gadget:g1"));
}

#[test]
fn test_extension_on_types_exported_later() {
    let realm = Realm::new();
    let universe = widget_universe();
    describe_extension(&universe);
    let m = Marshaller::new(universe.clone(), MarshalConfig::default().with_eager_export(true));
    m.register_types(&universe.types());
    m.register_extension_methods(&realm, &universe.extension_methods());

    let widget_ctor = m
        .get_or_export_type(&realm, &TypeSig::named("Contoso.Widget"), false)
        .unwrap();
    let widget = widget_ctor.construct(&realm, &[Value::from("w")]).unwrap();
    let described = widget
        .as_object()
        .unwrap()
        .call_method(&realm, "Describe", &[])
        .unwrap();
    assert_eq!(described.as_str(), Some("widget:w"));

    // Host instances created outside the realm get the same members.
    let instance = HostInstance::with_fields(
        universe.get("Contoso.Widget").unwrap(),
        [("Name".to_string(), HostValue::string("h"))],
    )
    .into_ref();
    let projected = m
        .to_script(&realm, &TypeSig::named("Contoso.Widget"), &HostValue::Object(instance))
        .unwrap();
    let described = projected
        .as_object()
        .unwrap()
        .call_method(&realm, "Describe", &[Value::from("host")])
        .unwrap();
    assert_eq!(described.as_str(), Some("host:h"));
}

fn shape_universe() -> Arc<TypeUniverse> {
    let universe = TypeUniverse::new();
    universe.register(TypeBuilder::interface("Contoso.IShape").build());
    universe.register(
        TypeBuilder::class("Contoso.Circle")
            .implements(TypeSig::named("Contoso.IShape"))
            .field("Name", TypeSig::string())
            .field_constructor(vec![ParamInfo::new("Name", TypeSig::string())])
            .build(),
    );
    universe.register(
        TypeBuilder::static_class("Contoso.ShapeExtensions")
            .extension_method(
                "Describe",
                TypeSig::named("Contoso.IShape"),
                vec![],
                TypeSig::string(),
                |ctx, _| match ctx.this()? {
                    HostValue::Object(this) => this.get_field("Name"),
                    _ => Err(HostError::type_mismatch("Contoso.IShape", "value")),
                },
            )
            .build(),
    );
    Arc::new(universe)
}

fn describe_circle(m: &Marshaller, realm: &Realm) -> Option<String> {
    let circle_ctor = m
        .get_or_export_type(realm, &TypeSig::named("Contoso.Circle"), false)
        .unwrap();
    let circle = circle_ctor.construct(realm, &[Value::from("c")]).unwrap();
    let described = circle
        .as_object()
        .unwrap()
        .call_method(realm, "Describe", &[])
        .unwrap();
    described.as_str().map(str::to_string)
}

#[test]
fn test_interface_extension_reaches_class_exported_later() {
    let realm = Realm::new();
    let universe = shape_universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    m.register_types(&universe.types());
    m.register_extension_methods(&realm, &universe.extension_methods());

    assert_eq!(describe_circle(&m, &realm).as_deref(), Some("c"));
}

#[test]
fn test_interface_extension_reaches_class_exported_earlier() {
    let realm = Realm::new();
    let universe = shape_universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    m.register_types(&universe.types());
    m.get_or_export_type(&realm, &TypeSig::named("Contoso.Circle"), false)
        .unwrap();
    m.register_extension_methods(&realm, &universe.extension_methods());

    assert_eq!(describe_circle(&m, &realm).as_deref(), Some("c"));
}

#[test]
fn test_concurrent_descriptor_requests_share_one_descriptor() {
    let m = Marshaller::new(calc_universe(), MarshalConfig::default());
    let calc = m.universe().get("Contoso.Calc").unwrap();

    let threads = 8;
    let barrier = Arc::new(std::sync::Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let (m, calc, barrier) = (m.clone(), calc.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                m.descriptor(&calc, "F", MemberKind::StaticMethod).unwrap()
            })
        })
        .collect();
    let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(descriptors.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(descriptors[0].candidates().len(), 2);
}
