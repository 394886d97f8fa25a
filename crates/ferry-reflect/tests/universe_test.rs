//! Integration tests for the reflection provider

use std::sync::Arc;

use ferry_reflect::{
    HostError, HostObject, HostValue, ParamInfo, StructValue, TypeBuilder, TypeSig,
    TypeUniverse,
};

fn universe() -> TypeUniverse {
    let universe = TypeUniverse::new();
    universe.register(
        TypeBuilder::interface("Contoso.IShape")
            .abstract_method("Area", vec![], TypeSig::double())
            .build(),
    );
    universe.register(
        TypeBuilder::struct_type("Contoso.Point")
            .field("X", TypeSig::double())
            .field("Y", TypeSig::double())
            .field_constructor(vec![
                ParamInfo::new("x", TypeSig::double()),
                ParamInfo::new("y", TypeSig::double()),
            ])
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Shape")
            .field("Name", TypeSig::string())
            .property("Name", TypeSig::string())
            .method("Describe", vec![], TypeSig::string(), |ctx, _| {
                Ok(HostValue::string(format!("shape of {}", ctx.declaring.name)))
            })
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Square")
            .base(TypeSig::named("Contoso.Shape"))
            .implements(TypeSig::named("Contoso.IShape"))
            .field("Side", TypeSig::double())
            .method("Area", vec![], TypeSig::double(), |ctx, _| {
                let this = ctx.this()?.as_object().cloned().ok_or(HostError::Cancelled)?;
                let side = this.get_field("Side")?.as_f64().unwrap_or(0.0);
                Ok(HostValue::F64(side * side))
            })
            .method(
                "Scale",
                vec![ParamInfo::optional("factor", TypeSig::double(), HostValue::F64(2.0))],
                TypeSig::double(),
                |ctx, args| {
                    let this = ctx.this()?.as_object().cloned().ok_or(HostError::Cancelled)?;
                    let side = this.get_field("Side")?.as_f64().unwrap_or(0.0);
                    Ok(HostValue::F64(side * args[0].as_f64().unwrap_or(1.0)))
                },
            )
            .field_constructor(vec![ParamInfo::new("side", TypeSig::double())])
            .build(),
    );
    universe.register(
        TypeBuilder::class("Contoso.Box")
            .generic_params(&["T"])
            .field("Value", TypeSig::param("T"))
            .build(),
    );
    universe
}

#[test]
fn test_resolve_named_and_unknown() {
    let universe = universe();
    assert!(universe.resolve(&TypeSig::named("Contoso.Point")).is_ok());
    assert!(matches!(
        universe.resolve(&TypeSig::named("Contoso.Missing")),
        Err(HostError::UnknownType(_))
    ));
}

#[test]
fn test_generic_instantiation_is_memoized() {
    let universe = universe();
    let sig = TypeSig::parse("Contoso.Box<int>").unwrap();
    let a = universe.resolve(&sig).unwrap();
    let b = universe.resolve(&sig).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.fields[0].ty, TypeSig::int());
    assert!(universe.resolve(&TypeSig::parse("Contoso.Box<int,int>").unwrap()).is_err());
}

#[test]
fn test_assignability_through_base_and_interfaces() {
    let universe = universe();
    let square = universe.get("Contoso.Square").unwrap();
    assert!(universe.is_assignable(&square, &TypeSig::named("Contoso.Shape")));
    assert!(universe.is_assignable(&square, &TypeSig::named("Contoso.IShape")));
    assert!(universe.is_assignable(&square, &TypeSig::Any));
    assert!(!universe.is_assignable(&square, &TypeSig::named("Contoso.Point")));
}

#[test]
fn test_call_method_with_inheritance_and_defaults() {
    let universe = universe();
    let square_ty = universe.get("Contoso.Square").unwrap();
    let ctor = square_ty.constructors[0].clone();
    let square = universe.construct(&square_ty, &ctor, &[HostValue::F64(3.0)]).unwrap();

    assert_eq!(universe.call_method(&square, "Area", &[]).unwrap(), HostValue::F64(9.0));
    assert_eq!(universe.call_method(&square, "Scale", &[]).unwrap(), HostValue::F64(6.0));
    assert_eq!(
        universe.call_method(&square, "Describe", &[]).unwrap(),
        HostValue::from("shape of Shape")
    );
    assert!(matches!(
        universe.call_method(&square, "Rotate", &[]),
        Err(HostError::MissingMember { .. })
    ));
}

#[test]
fn test_field_backed_property() {
    let universe = universe();
    let ty = universe.get("Contoso.Square").unwrap();
    let square = HostValue::Object(universe.new_instance(&ty).into_ref());
    universe
        .set_property(&square, "Name", HostValue::from("sq"))
        .unwrap();
    assert_eq!(universe.get_property(&square, "Name").unwrap(), HostValue::from("sq"));
}

#[test]
fn test_struct_defaults_and_field_constructor() {
    let universe = universe();
    let default = universe.default_value(&TypeSig::named("Contoso.Point"));
    assert_eq!(
        default,
        HostValue::Struct(
            StructValue::new("Contoso.Point")
                .with("X", HostValue::F64(0.0))
                .with("Y", HostValue::F64(0.0))
        )
    );

    let ty = universe.get("Contoso.Point").unwrap();
    let ctor = ty.constructors[0].clone();
    let point = universe
        .construct(&ty, &ctor, &[HostValue::F64(1.0), HostValue::F64(2.0)])
        .unwrap();
    assert_eq!(point.as_struct().unwrap().get("Y"), Some(&HostValue::F64(2.0)));
}

#[test]
fn test_namespaces_include_prefixes() {
    let universe = TypeUniverse::new();
    universe.register(TypeBuilder::class("Contoso.Geometry.Shapes.Circle").build());
    let namespaces = universe.namespaces();
    assert!(namespaces.contains("Contoso"));
    assert!(namespaces.contains("Contoso.Geometry"));
    assert!(namespaces.contains("Contoso.Geometry.Shapes"));
}
