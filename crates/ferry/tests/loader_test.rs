//! Module loader tests against manifests on disk

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ferry::{Host, HostLoader, LoaderConfig, MarshalError, ModuleImage};
use ferry_reflect::TypeUniverse;
use ferry_script::Value;
use tempfile::TempDir;

fn write_manifest(dir: &Path, name: &str, references: &[&str], types: &str) {
    let references = serde_json::to_string(references).unwrap();
    let text = format!(r#"{{ "name": "{name}", "version": "1.0.0", "references": {references}, "types": {types} }}"#);
    fs::write(dir.join(format!("{name}.module.json")), text).unwrap();
}

fn empty_module(dir: &Path, name: &str, references: &[&str]) {
    write_manifest(dir, name, references, "[]");
}

fn loader(base: &Path) -> HostLoader {
    HostLoader::new(LoaderConfig::new(base), Arc::new(TypeUniverse::new()))
}

const SHAPES: &str = r#"[
    {
        "name": "Contoso.Shapes.Square",
        "kind": "class",
        "members": [
            { "kind": "field", "name": "Side", "type": "double" },
            { "kind": "constructor", "params": [{ "name": "Side", "type": "double" }] }
        ]
    }
]"#;

#[test]
fn test_load_by_path_registers_types() {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path(), "Contoso.Shapes", &[], SHAPES);
    let loader = loader(dir.path());

    let module = loader
        .load_module(dir.path().join("Contoso.Shapes.module.json").to_str().unwrap())
        .unwrap();
    assert_eq!(module.name, "Contoso.Shapes");
    assert_eq!(module.version.as_deref(), Some("1.0.0"));
    assert_eq!(module.types.len(), 1);
    assert!(loader.universe().contains("Contoso.Shapes.Square"));
    assert_eq!(module.path, Some(fs::canonicalize(dir.path().join("Contoso.Shapes.module.json")).unwrap()));
}

#[test]
fn test_loading_is_idempotent_by_path_and_name() {
    let dir = TempDir::new().unwrap();
    empty_module(dir.path(), "Contoso.Core", &[]);
    let loader = loader(dir.path());

    let by_name = loader.load_module("Contoso.Core").unwrap();
    let by_relative_path = loader.load_module("Contoso.Core.module.json").unwrap();
    let by_absolute_path = loader
        .load_module(dir.path().join("Contoso.Core.module.json").to_str().unwrap())
        .unwrap();

    assert!(Arc::ptr_eq(&by_name, &by_relative_path));
    assert!(Arc::ptr_eq(&by_name, &by_absolute_path));
    assert_eq!(loader.modules().len(), 1);
}

#[test]
fn test_references_resolve_through_search_paths() {
    let base = TempDir::new().unwrap();
    let libs = TempDir::new().unwrap();
    empty_module(base.path(), "Contoso.App", &["Contoso.Core"]);
    empty_module(libs.path(), "Contoso.Core", &[]);

    let loader = HostLoader::new(
        LoaderConfig::new(base.path()).search_path(libs.path()),
        Arc::new(TypeUniverse::new()),
    );
    loader.load_module("Contoso.App").unwrap();

    let core = loader.module("Contoso.Core").expect("dependency loaded");
    assert_eq!(core.path.as_deref().and_then(Path::parent), Some(fs::canonicalize(libs.path()).unwrap().as_path()));
}

#[test]
fn test_resolve_hook_supplies_missing_module() {
    let base = TempDir::new().unwrap();
    let vendor = TempDir::new().unwrap();
    empty_module(base.path(), "Contoso.App", &["Fabrikam.Charts"]);
    empty_module(vendor.path(), "Fabrikam.Charts", &[]);

    let loader = loader(base.path());
    let vendor_dir = vendor.path().to_path_buf();
    loader.add_resolve_hook(move |request| {
        assert_eq!(request.requester.as_deref(), Some("Contoso.App"));
        Some(vendor_dir.join(format!("{}.module.json", request.name)))
    });

    loader.load_module("Contoso.App").unwrap();
    assert!(loader.module("Fabrikam.Charts").is_some());
}

#[test]
fn test_requester_directory_is_the_last_resort() {
    let base = TempDir::new().unwrap();
    let plugin = TempDir::new().unwrap();
    empty_module(plugin.path(), "Contoso.Plugin", &["Contoso.PluginSupport"]);
    empty_module(plugin.path(), "Contoso.PluginSupport", &[]);
    let plugin_path = plugin.path().join("Contoso.Plugin.module.json");

    let loader = loader(base.path());
    loader.load_module(plugin_path.to_str().unwrap()).unwrap();
    assert!(loader.module("Contoso.PluginSupport").is_some());

    let strict = HostLoader::new(
        LoaderConfig::new(base.path()).with_probe_requester_dir(false),
        Arc::new(TypeUniverse::new()),
    );
    let err = strict.load_module(plugin_path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, MarshalError::ModuleNotFound { ref name, .. } if name == "Contoso.PluginSupport"));
}

#[test]
fn test_missing_module_is_reported() {
    let base = TempDir::new().unwrap();
    let loader = loader(base.path());

    match loader.load_module("Contoso.Nowhere") {
        Err(MarshalError::ModuleNotFound { name, requester }) => {
            assert_eq!(name, "Contoso.Nowhere");
            assert!(requester.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(loader.load_module("missing/Contoso.Nowhere.module.json").is_err());
}

#[test]
fn test_reference_cycles_terminate() {
    let dir = TempDir::new().unwrap();
    empty_module(dir.path(), "Contoso.A", &["Contoso.B"]);
    empty_module(dir.path(), "Contoso.B", &["Contoso.A"]);
    let loader = loader(dir.path());

    loader.load_module("Contoso.A").unwrap();
    assert_eq!(loader.modules().len(), 2);
}

#[test]
fn test_malformed_manifest_is_invalid_module() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Contoso.Bad.module.json"), "{ not json").unwrap();
    let loader = loader(dir.path());

    assert!(matches!(
        loader.load_module("Contoso.Bad"),
        Err(MarshalError::InvalidModule { .. })
    ));
}

#[test]
fn test_loaded_module_is_visible_to_scripts() {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path(), "Contoso.Shapes", &[], SHAPES);
    let host = Host::builder()
        .loader_config(LoaderConfig::new(dir.path()))
        .build()
        .unwrap();

    host.load_module("Contoso.Shapes").unwrap();

    let side = host
        .run(|_, realm| {
            let root = realm.global().get(realm, "host")?;
            let mut current = root;
            for part in ["Contoso", "Shapes", "Square"] {
                let next = match current.as_object() {
                    Some(object) => object.get(realm, part)?,
                    None => Value::Undefined,
                };
                current = next;
            }
            let square = match current.as_object() {
                Some(ctor) => ctor.construct(realm, &[Value::from(3.0)])?,
                None => return Ok(None),
            };
            Ok(square
                .as_object()
                .map(|s| s.get(realm, "Side"))
                .transpose()?
                .and_then(|v| v.as_number()))
        })
        .unwrap();
    assert_eq!(side, Some(3.0));
}

#[test]
fn test_registered_image_satisfies_file_references() {
    let dir = TempDir::new().unwrap();
    empty_module(dir.path(), "Contoso.App", &["Contoso.Runtime"]);
    let loader = loader(dir.path());

    loader.register_module(ModuleImage::new("Contoso.Runtime")).unwrap();
    let app = loader.load_module("Contoso.App").unwrap();
    assert_eq!(app.references, vec!["Contoso.Runtime".to_string()]);
}
