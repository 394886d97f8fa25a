//! Type projection tests: namespaces, deferred members, enums, generics

use std::sync::Arc;

use ferry::{MarshalConfig, Marshaller, MemberNaming, TypeSlot};
use ferry_reflect::{
    CallContext, HostError, HostInstance, HostResult, HostValue, ParamInfo, PrimitiveType, TypeBuilder, TypeSig,
    TypeUniverse,
};
use ferry_script::{JsObject, Property, Realm, Value};

fn append(ctx: &CallContext<'_>, args: &[HostValue]) -> HostResult<HostValue> {
    let HostValue::Object(this) = ctx.this()? else {
        return Err(HostError::type_mismatch("Contoso.Node", "value"));
    };
    let next = args.first().cloned().unwrap_or_default();
    this.set_field("Next", next.clone())?;
    Ok(next)
}

fn universe() -> Arc<TypeUniverse> {
    let universe = TypeUniverse::new();
    universe.register(
        TypeBuilder::class("Contoso.Node")
            .field("Label", TypeSig::string())
            .field("Next", TypeSig::named("Contoso.Node"))
            .method(
                "Append",
                vec![ParamInfo::new("next", TypeSig::named("Contoso.Node"))],
                TypeSig::named("Contoso.Node"),
                append,
            )
            .field_constructor(vec![ParamInfo::new("label", TypeSig::string())])
            .build(),
    );
    universe.register(
        TypeBuilder::enumeration("Contoso.Color", PrimitiveType::I32)
            .variant("Red", 1)
            .variant("Green", 2)
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Box")
            .generic_params(&["T"])
            .field("Value", TypeSig::param("T"))
            .field_constructor(vec![ParamInfo::new("value", TypeSig::param("T"))])
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Shapes.Circle")
            .field("Radius", TypeSig::double())
            .field_constructor(vec![ParamInfo::new("radius", TypeSig::double())])
            .build(),
    );
    Arc::new(universe)
}

fn marshaller(config: MarshalConfig) -> (Arc<TypeUniverse>, Arc<Marshaller>) {
    let universe = universe();
    let m = Marshaller::new(universe.clone(), config);
    m.register_types(&universe.types());
    (universe, m)
}

fn object(value: Value) -> JsObject {
    value.as_object().cloned().expect("object")
}

fn prototype(ctor: &JsObject, realm: &Realm) -> JsObject {
    object(ctor.get(realm, "prototype").unwrap())
}

#[test]
fn test_namespaces_export_on_demand() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default());

    let root = m.get_namespace(&realm, "").unwrap();
    assert!(root.ptr_eq(&m.get_namespace(&realm, "").unwrap()));
    assert_eq!(m.stats().snapshot().types_exported, 0);

    let contoso = object(root.get(&realm, "Contoso").unwrap());
    let shapes = object(contoso.get(&realm, "Shapes").unwrap());
    assert!(shapes.ptr_eq(&m.get_namespace(&realm, "Contoso.Shapes").unwrap()));
    assert_eq!(m.stats().snapshot().types_exported, 0);

    let first = object(shapes.get(&realm, "Circle").unwrap());
    let second = object(shapes.get(&realm, "Circle").unwrap());
    assert!(first.ptr_eq(&second));
    assert_eq!(m.stats().snapshot().types_exported, 1);

    assert!(contoso.get(&realm, "Nope").unwrap().is_undefined());
    assert!(m.get_namespace(&realm, "Fabrikam").is_err());
}

#[test]
fn test_type_projection_is_tagged_with_its_type() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default());

    let circle = m
        .get_or_export_type(&realm, &TypeSig::named("Contoso.Shapes.Circle"), false)
        .unwrap();
    let slot = circle.internal_as::<TypeSlot>().expect("type slot");
    assert_eq!(slot.0, TypeSig::named("Contoso.Shapes.Circle"));

    let instance = object(circle.construct(&realm, &[Value::from(2.5)]).unwrap());
    assert_eq!(instance.get(&realm, "Radius").unwrap().as_number(), Some(2.5));
    assert!(circle.call(&realm, &Value::Undefined, &[]).is_err());
}

#[test]
fn test_self_referencing_type_defers_members() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default());

    let node = m.get_or_export_type(&realm, &TypeSig::named("Contoso.Node"), false).unwrap();
    let proto = prototype(&node, &realm);
    assert!(matches!(proto.get_own_property("Append"), Some(Property::Accessor { .. })));
    assert!(matches!(proto.get_own_property("Next"), Some(Property::Accessor { .. })));

    let first = object(node.construct(&realm, &[Value::from("a")]).unwrap());
    let second = object(node.construct(&realm, &[Value::from("b")]).unwrap());

    first.set(&realm, "Next", Value::Object(second.clone())).unwrap();
    let next = object(first.get(&realm, "Next").unwrap());
    assert!(next.ptr_eq(&second));
    assert_eq!(next.get(&realm, "Label").unwrap().as_str(), Some("b"));

    // First access replaced the placeholder with the method itself.
    let appended = object(second.call_method(&realm, "Append", &[Value::Object(first.clone())]).unwrap());
    assert!(appended.ptr_eq(&first));
    assert!(matches!(proto.get_own_property("Append"), Some(Property::Data { .. })));
    assert!(second.get(&realm, "Next").unwrap().as_object().unwrap().ptr_eq(&first));
}

#[test]
fn test_eager_export_materializes_members() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default().with_eager_export(true));

    let node = m.get_or_export_type(&realm, &TypeSig::named("Contoso.Node"), false).unwrap();
    let proto = prototype(&node, &realm);
    match proto.get_own_property("Append") {
        Some(Property::Data { value, .. }) => assert!(value.is_function()),
        _ => panic!("Append should be a method"),
    }
    assert!(matches!(proto.get_own_property("Next"), Some(Property::Accessor { .. })));
}

#[test]
fn test_enum_projection_is_frozen() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default());

    let contoso = m.get_namespace(&realm, "Contoso").unwrap();
    let color = object(contoso.get(&realm, "Color").unwrap());
    assert!(color.is_frozen());
    assert_eq!(color.get(&realm, "Green").unwrap().as_number(), Some(2.0));
    assert_eq!(color.get(&realm, "Red").unwrap().as_number(), Some(1.0));
}

#[test]
fn test_unavailable_member_throws_on_access() {
    let realm = Realm::new();
    let universe = universe();
    universe.register(
        TypeBuilder::class("Contoso.Holder")
            .field("Label", TypeSig::string())
            .field("Ghost", TypeSig::named("Contoso.Missing"))
            .build(),
    );
    let m = Marshaller::new(universe.clone(), MarshalConfig::default().with_eager_export(true));
    m.register_types(&universe.types());

    let holder = m.get_or_export_type(&realm, &TypeSig::named("Contoso.Holder"), false).unwrap();
    let instance = HostInstance::with_fields(
        universe.get("Contoso.Holder").unwrap(),
        [("Label".to_string(), HostValue::string("kept"))],
    )
    .into_ref();
    let projected = m
        .to_script(&realm, &TypeSig::named("Contoso.Holder"), &HostValue::Object(instance))
        .unwrap();
    let projected = object(projected);

    assert_eq!(projected.get(&realm, "Label").unwrap().as_str(), Some("kept"));
    let err = projected.get(&realm, "Ghost").unwrap_err();
    let exception = err.as_exception().expect("script exception");
    assert_eq!(exception.name, "TypeError");
    assert!(
        exception.message.contains("member Contoso.Holder.Ghost is unavailable"),
        "{}",
        exception.message
    );
    assert!(prototype(&holder, &realm).has_own("Ghost"));
}

#[test]
fn test_unavailable_type_recovers_after_registration() {
    let realm = Realm::new();
    let (universe, m) = marshaller(MarshalConfig::default());
    let late = TypeSig::named("Contoso.Late");

    assert!(m.get_or_export_type(&realm, &late, false).is_err());
    universe.register(TypeBuilder::class("Contoso.Late").build());
    m.register_types(&[universe.get("Contoso.Late").unwrap()]);

    let contoso = m.get_namespace(&realm, "Contoso").unwrap();
    assert!(contoso.get(&realm, "Late").unwrap().as_object().is_some());
}

#[test]
fn test_generic_maker_closes_definitions() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default());

    let contoso = m.get_namespace(&realm, "Contoso").unwrap();
    let maker = object(contoso.get(&realm, "Box").unwrap());
    assert!(maker.is_function());

    let box_int = object(maker.call(&realm, &Value::Undefined, &[Value::from("int")]).unwrap());
    let again = object(maker.call(&realm, &Value::Undefined, &[Value::from("int")]).unwrap());
    assert!(box_int.ptr_eq(&again));

    let boxed = object(box_int.construct(&realm, &[Value::from(5)]).unwrap());
    assert_eq!(boxed.get(&realm, "Value").unwrap().as_number(), Some(5.0));

    // A type projection works as a type argument.
    let node = contoso.get(&realm, "Node").unwrap();
    let box_node = object(maker.call(&realm, &Value::Undefined, &[node]).unwrap());
    assert!(!box_node.ptr_eq(&box_int));
    let slot = box_node.internal_as::<TypeSlot>().unwrap();
    assert_eq!(
        slot.0,
        TypeSig::generic("Contoso.Box", vec![TypeSig::named("Contoso.Node")])
    );

    let err = maker.call(&realm, &Value::Undefined, &[]).unwrap_err();
    assert!(err.to_string().contains("expects 1 type argument"), "{err}");
    assert!(maker.call(&realm, &Value::Undefined, &[Value::from(3)]).is_err());
}

#[test]
fn test_camel_case_member_naming() {
    let realm = Realm::new();
    let (_, m) = marshaller(MarshalConfig::default().with_member_naming(MemberNaming::CamelCase));

    let circle = m
        .get_or_export_type(&realm, &TypeSig::named("Contoso.Shapes.Circle"), false)
        .unwrap();
    let instance = object(circle.construct(&realm, &[Value::from(1.0)]).unwrap());
    assert_eq!(instance.get(&realm, "radius").unwrap().as_number(), Some(1.0));
    assert!(instance.get(&realm, "Radius").unwrap().is_undefined());
}
