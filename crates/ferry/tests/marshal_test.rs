//! Integration tests for the conversion engine and the wrapper registry

use std::sync::{Arc, Barrier};

use ferry::{MarshalConfig, MarshalError, Marshaller};
use ferry_reflect::{
    EnumValue, HostInstance, HostList, HostValue, PrimitiveType, StructValue, TypeBuilder, TypeSig, TypeUniverse,
    VecList, object_addr,
};
use ferry_script::{Realm, Value};

fn universe() -> Arc<TypeUniverse> {
    let universe = TypeUniverse::new();
    universe.register(
        TypeBuilder::struct_type("Contoso.Point")
            .field("X", TypeSig::double())
            .field("Y", TypeSig::double())
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Widget")
            .field("Name", TypeSig::string())
            .build(),
    );
    universe.register(
        TypeBuilder::enumeration("Contoso.Color", PrimitiveType::I32)
            .variant("Red", 1)
            .variant("Green", 2)
            .build(),
    );
    Arc::new(universe)
}

fn sig(text: &str) -> TypeSig {
    TypeSig::parse(text).unwrap()
}

#[test]
fn test_primitive_round_trip() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());

    let cases = vec![
        ("int", HostValue::I32(42)),
        ("long", HostValue::I64(-7)),
        ("byte", HostValue::U8(255)),
        ("double", HostValue::F64(1.5)),
        ("bool", HostValue::Bool(true)),
        ("string", HostValue::string("héllo")),
        ("char", HostValue::Char('x')),
        ("int?", HostValue::Null),
        ("int?", HostValue::I32(3)),
        (
            "Contoso.Color",
            HostValue::Enum(EnumValue {
                ty: Arc::from("Contoso.Color"),
                value: 2,
            }),
        ),
    ];
    for (text, value) in cases {
        let ty = sig(text);
        let script = m.to_script(&realm, &ty, &value).unwrap();
        let back = m.to_host(&realm, &ty, &script).unwrap();
        assert_eq!(back, value, "round trip through {}", text);
    }
}

#[test]
fn test_integer_conversion_rejects_out_of_range() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());

    let err = m.to_host(&realm, &sig("byte"), &Value::from(300)).unwrap_err();
    assert!(matches!(err, MarshalError::TypeMismatch { .. }));
    assert_eq!(m.to_host(&realm, &sig("int"), &Value::from(2.9)).unwrap(), HostValue::I32(2));
}

#[test]
fn test_enum_accepts_member_name() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());

    let value = m.to_host(&realm, &sig("Contoso.Color"), &Value::from("Red")).unwrap();
    assert!(matches!(value, HostValue::Enum(EnumValue { value: 1, .. })));
}

#[test]
fn test_struct_conversions_are_independent_copies() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let point = HostValue::Struct(
        StructValue::new("Contoso.Point")
            .with("X", HostValue::F64(1.0))
            .with("Y", HostValue::F64(2.0)),
    );

    let first = m.to_script(&realm, &sig("Contoso.Point"), &point).unwrap();
    let second = m.to_script(&realm, &sig("Contoso.Point"), &point).unwrap();
    let (first, second) = (first.as_object().unwrap(), second.as_object().unwrap());
    assert!(!first.ptr_eq(second));

    first.set(&realm, "X", Value::from(10.0)).unwrap();
    assert_eq!(second.get(&realm, "X").unwrap().as_number(), Some(1.0));

    let changed = m
        .to_host(&realm, &sig("Contoso.Point"), &Value::Object(first.clone()))
        .unwrap();
    assert_eq!(changed.as_struct().unwrap().get("X"), Some(&HostValue::F64(10.0)));
    let unchanged = m
        .to_host(&realm, &sig("Contoso.Point"), &Value::Object(second.clone()))
        .unwrap();
    assert_eq!(unchanged, point);
}

#[test]
fn test_missing_struct_fields_take_defaults() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let partial = realm.create_object();
    partial.define_value("X", Value::from(4.0));

    let value = m
        .to_host(&realm, &sig("Contoso.Point"), &Value::Object(partial))
        .unwrap();
    assert_eq!(value.as_struct().unwrap().get("Y"), Some(&HostValue::F64(0.0)));
}

#[test]
fn test_reference_identity_is_preserved() {
    let realm = Realm::new();
    let universe = universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    let widget = universe.get("Contoso.Widget").unwrap();
    let instance = HostInstance::with_fields(widget, [("Name".to_string(), HostValue::string("w1"))]).into_ref();
    let host = HostValue::Object(instance.clone());

    let first = m.to_script(&realm, &sig("Contoso.Widget"), &host).unwrap();
    let second = m.to_script(&realm, &sig("Contoso.Widget"), &host).unwrap();
    assert!(first.as_object().unwrap().ptr_eq(second.as_object().unwrap()));
    assert_eq!(m.stats().snapshot().wrappers_created, 1);

    match m.to_host(&realm, &sig("Contoso.Widget"), &first).unwrap() {
        HostValue::Object(back) => assert_eq!(object_addr(&back), object_addr(&instance)),
        other => panic!("unexpected {other:?}"),
    }

    // The projection reads through to the instance.
    let name = first.as_object().unwrap().get(&realm, "Name").unwrap();
    assert_eq!(name.as_str(), Some("w1"));
}

#[test]
fn test_script_object_returns_as_itself() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let object = realm.create_object();
    object.define_value("tag", Value::from("mine"));

    let host = m.to_host(&realm, &TypeSig::Any, &Value::Object(object.clone())).unwrap();
    assert!(matches!(host, HostValue::Object(_)));
    let back = m.to_script(&realm, &TypeSig::Any, &host).unwrap();
    assert!(back.as_object().unwrap().ptr_eq(&object));
}

#[test]
fn test_array_collection_round_trip() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let array = realm.create_array(vec![Value::from(1), Value::from(2), Value::from(3)]);

    let host = m
        .to_host(&realm, &sig("List<int>"), &Value::Object(array.clone()))
        .unwrap();
    let HostValue::List(list) = &host else {
        panic!("expected a list, got {}", host.kind_name());
    };
    assert_eq!(list.len().unwrap(), 3);
    assert_eq!(
        list.snapshot().unwrap(),
        vec![HostValue::I32(1), HostValue::I32(2), HostValue::I32(3)]
    );

    let back = m.to_script(&realm, &sig("List<int>"), &host).unwrap();
    assert!(back.as_object().unwrap().ptr_eq(&array));
    let numbers: Vec<f64> = array
        .array_values()
        .unwrap()
        .iter()
        .filter_map(Value::as_number)
        .collect();
    assert_eq!(numbers, vec![1.0, 2.0, 3.0]);

    // Host writes go through to the script array.
    list.push(HostValue::I32(4)).unwrap();
    assert_eq!(array.array_len(), Some(4));
}

#[test]
fn test_array_copy_round_trip() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let array = realm.create_array(vec![Value::from("a"), Value::from("b"), Value::from("c")]);

    let host = m
        .to_host(&realm, &sig("string[]"), &Value::Object(array.clone()))
        .unwrap();
    assert_eq!(
        host,
        HostValue::Array(vec![HostValue::string("a"), HostValue::string("b"), HostValue::string("c")])
    );
    let back = m.to_script(&realm, &sig("string[]"), &host).unwrap();
    let back = back.as_object().unwrap();
    assert!(!back.ptr_eq(&array));
    assert_eq!(back.array_len(), Some(3));
}

#[test]
fn test_host_list_projects_as_live_view() {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let list: Arc<dyn HostList> = Arc::new(VecList::new(vec![HostValue::I32(5), HostValue::I32(6)]));

    let view = m
        .to_script(&realm, &sig("List<int>"), &HostValue::List(list.clone()))
        .unwrap();
    let object = view.as_object().unwrap();
    assert_eq!(object.get(&realm, "length").unwrap().as_number(), Some(2.0));
    assert_eq!(object.get(&realm, "1").unwrap().as_number(), Some(6.0));

    list.push(HostValue::I32(7)).unwrap();
    assert_eq!(object.get(&realm, "length").unwrap().as_number(), Some(3.0));

    match m.to_host(&realm, &sig("List<int>"), &view).unwrap() {
        HostValue::List(back) => assert!(std::ptr::addr_eq(Arc::as_ptr(&back), Arc::as_ptr(&list))),
        other => panic!("unexpected {}", other.kind_name()),
    }
}

#[test]
fn test_concurrent_first_requests_build_once() {
    let m = Marshaller::new(universe(), MarshalConfig::default());
    m.get_converter(&TypeSig::double()).unwrap();
    assert_eq!(m.stats().snapshot().converters_built, 1);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let m = m.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                m.get_converter(&TypeSig::named("Contoso.Point")).unwrap()
            })
        })
        .collect();
    let converters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(converters.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(m.stats().snapshot().converters_built, 2);
    assert_eq!(m.converter_count(), 2);
}

#[test]
fn test_failed_build_is_retried_after_registration() {
    let universe = universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    let late = TypeSig::named("Contoso.Late");

    assert!(m.get_converter(&late).is_err());
    assert_eq!(m.converter_count(), 0);

    universe.register(TypeBuilder::class("Contoso.Late").build());
    let converter = m.get_converter(&late).unwrap();
    assert_eq!(converter.sig(), &late);
}

#[test]
fn test_member_failure_names_the_member() {
    let universe = universe();
    universe.register(
        TypeBuilder::struct_type("Contoso.Broken")
            .field("Inner", TypeSig::named("Contoso.Missing"))
            .build(),
    );
    let m = Marshaller::new(universe, MarshalConfig::default());

    match m.get_converter(&TypeSig::named("Contoso.Broken")) {
        Err(MarshalError::MemberFailure { ty, member, .. }) => {
            assert_eq!(ty, "Contoso.Broken");
            assert_eq!(member, "Inner");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_sweep_drops_dead_instances() {
    let realm = Realm::new();
    let universe = universe();
    let m = Marshaller::new(universe.clone(), MarshalConfig::default());
    let widget = universe.get("Contoso.Widget").unwrap();

    let projection = {
        let instance = HostInstance::new(widget).into_ref();
        m.to_script(&realm, &sig("Contoso.Widget"), &HostValue::Object(instance))
            .unwrap()
    };
    assert_eq!(m.wrappers().len(), 1);
    assert_eq!(m.sweep(&realm), 0);

    drop(projection);
    assert_eq!(m.sweep(&realm), 1);
    assert!(m.wrappers().is_empty());
}
