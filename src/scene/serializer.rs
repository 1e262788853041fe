//! 场景文件读写
//!
//! 格式：
//!
//! ```json
//! {
//!   "SceneName": "Demo",
//!   "Objects": [{
//!     "Type": "Entity",
//!     "Name": "Cube",
//!     "Transform": [
//!       { "Position": [{ "x": 0 }, { "y": 0 }, { "z": 0 }] },
//!       { "Rotation": [{ "x": 0 }, { "y": 0 }, { "z": 0 }] },
//!       { "Scale":    [{ "x": 1 }, { "y": 1 }, { "z": 1 }] }
//!     ],
//!     "Components": [
//!       { "MeshRenderer": [{ "Model": "..." }, { "MaterialType": "PBR", "Albedo": "...", ... }] },
//!       { "LuaScript": [{ "FilePath": "NONE" }] },
//!       { "EditorSelection": [{ "Mode": "OFF" }] }
//!     ]
//!   }]
//! }
//! ```
//!
//! 读取时数组中的小对象会被合并，所以 `[{"x":1,"y":2,"z":3}]` 与逐轴写法等价。
//! 组件按键名查找，不依赖位置。整个文件解析成功后才返回场景。

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::core::error::SceneError;
use crate::core::math::Vector3;
use crate::scene::component::{
    Component, ComponentKind, EditorSelection, LuaScript, Material, MeshRenderer, NONE_SENTINEL,
    OFF_SENTINEL,
};
use crate::scene::transform::Transform;
use crate::scene::Scene;

const ENTITY_TYPE: &str = "Entity";

pub fn load_scene(path: impl AsRef<Path>) -> Result<Scene, SceneError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to read scene file");
        SceneError::FileNotFound(path.to_path_buf())
    })?;

    let scene = parse_scene(&text).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Scene load aborted");
        e
    })?;

    tracing::info!(
        path = %path.display(),
        scene = scene.name(),
        entities = scene.len(),
        "Scene loaded"
    );
    Ok(scene)
}

pub fn parse_scene(text: &str) -> Result<Scene, SceneError> {
    let document: Value = serde_json::from_str(text)?;
    let root = document
        .as_object()
        .ok_or_else(|| SceneError::invalid("document", "expected an object"))?;

    let name = root
        .get("SceneName")
        .and_then(Value::as_str)
        .ok_or_else(|| SceneError::invalid("SceneName", "missing or not a string"))?;

    let objects = root
        .get("Objects")
        .and_then(Value::as_array)
        .ok_or_else(|| SceneError::invalid("Objects", "missing or not an array"))?;

    // 先在临时场景里构建，全部成功后才交给调用方
    let mut scene = Scene::new(name);
    for (index, object) in objects.iter().enumerate() {
        load_object(&mut scene, index, object)?;
    }
    Ok(scene)
}

fn load_object(scene: &mut Scene, index: usize, object: &Value) -> Result<(), SceneError> {
    let context = format!("Objects[{index}]");
    let object = object
        .as_object()
        .ok_or_else(|| SceneError::invalid(&context, "expected an object"))?;

    match string_field(object, "Type") {
        Some(ENTITY_TYPE) => {}
        other => {
            tracing::warn!(object = index, object_type = ?other, "Skipping scene object that is not an entity");
            return Ok(());
        }
    }

    let name = string_field(object, "Name")
        .ok_or_else(|| SceneError::invalid(&context, "missing Name"))?
        .to_string();

    let transform = match object.get("Transform") {
        Some(value) => parse_transform(value, &context)?,
        None => Transform::default(),
    };

    let components = match object.get("Components") {
        Some(value) => parse_components(value, &context)?,
        None => Vec::new(),
    };

    let entity = scene.spawn(name);
    entity.transform = transform;
    for component in components {
        entity.add_component(component);
    }
    Ok(())
}

fn parse_transform(value: &Value, context: &str) -> Result<Transform, SceneError> {
    let parts = value
        .as_array()
        .ok_or_else(|| SceneError::invalid(context, "Transform is not an array"))?;
    let lookup = |key: &str| parts.iter().find_map(|part| part.get(key));

    let defaults = Transform::default();
    let axis = |key: &str, fallback: Vector3| -> Result<Vector3, SceneError> {
        match lookup(key) {
            Some(value) => parse_vector(value, fallback, &format!("{context}.{key}")),
            None => Ok(fallback),
        }
    };

    Ok(Transform {
        position: axis("Position", defaults.position)?,
        rotation: axis("Rotation", defaults.rotation)?,
        scale: axis("Scale", defaults.scale)?,
    })
}

fn parse_vector(value: &Value, fallback: Vector3, context: &str) -> Result<Vector3, SceneError> {
    let fields = merge_entries(value, context)?;
    let mut result = fallback;
    for (i, name) in ["x", "y", "z"].into_iter().enumerate() {
        if let Some(v) = fields.get(name) {
            result[i] = v
                .as_f64()
                .ok_or_else(|| SceneError::invalid(context, format!("'{name}' is not a number")))?
                as f32;
        }
    }
    Ok(result)
}

/// 把 `[{..}, {..}]` 或单个对象合并成一个键值表
fn merge_entries(value: &Value, context: &str) -> Result<Map<String, Value>, SceneError> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Array(items) => {
            let mut merged = Map::new();
            for item in items {
                let map = item
                    .as_object()
                    .ok_or_else(|| SceneError::invalid(context, "expected an array of objects"))?;
                merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Ok(merged)
        }
        _ => Err(SceneError::invalid(context, "expected an object or array")),
    }
}

fn parse_components(value: &Value, context: &str) -> Result<Vec<Component>, SceneError> {
    let entries = value
        .as_array()
        .ok_or_else(|| SceneError::invalid(context, "Components is not an array"))?;
    let lookup = |kind: ComponentKind| entries.iter().find_map(|entry| entry.get(kind.key()));

    let mut components = Vec::new();

    if let Some(value) = lookup(ComponentKind::MeshRenderer) {
        let fields = merge_entries(value, &format!("{context}.MeshRenderer"))?;
        let model = string_or(&fields, "Model", NONE_SENTINEL);
        if model != NONE_SENTINEL {
            let defaults = Material::default();
            let material = Material {
                material_type: string_or(&fields, "MaterialType", &defaults.material_type),
                albedo: string_or(&fields, "Albedo", &defaults.albedo),
                normal: string_or(&fields, "Normal", &defaults.normal),
                metallic: string_or(&fields, "Metallic", &defaults.metallic),
                roughness: string_or(&fields, "Roughness", &defaults.roughness),
            };
            components.push(Component::MeshRenderer(MeshRenderer { model, material }));
        }
    }

    if let Some(value) = lookup(ComponentKind::LuaScript) {
        let fields = merge_entries(value, &format!("{context}.LuaScript"))?;
        let path = string_or(&fields, "FilePath", NONE_SENTINEL);
        if path != NONE_SENTINEL {
            components.push(Component::LuaScript(LuaScript { path }));
        }
    }

    if let Some(value) = lookup(ComponentKind::EditorSelection) {
        let fields = merge_entries(value, &format!("{context}.EditorSelection"))?;
        let mode = string_or(&fields, "Mode", OFF_SENTINEL);
        if mode != OFF_SENTINEL {
            components.push(Component::EditorSelection(EditorSelection::new(mode)));
        }
    }

    Ok(components)
}

fn string_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn string_or(map: &Map<String, Value>, key: &str, fallback: &str) -> String {
    string_field(map, key).unwrap_or(fallback).to_string()
}

pub fn to_json(scene: &Scene) -> Value {
    let objects: Vec<Value> = scene.entities().iter().map(|entity| {
        let t = &entity.transform;

        let mesh = match entity.component(ComponentKind::MeshRenderer) {
            Some(Component::MeshRenderer(mesh)) => json!([
                { "Model": mesh.model },
                {
                    "MaterialType": mesh.material.material_type,
                    "Albedo": mesh.material.albedo,
                    "Normal": mesh.material.normal,
                    "Metallic": mesh.material.metallic,
                    "Roughness": mesh.material.roughness,
                }
            ]),
            _ => json!([{ "Model": NONE_SENTINEL }]),
        };
        let script = match entity.component(ComponentKind::LuaScript) {
            Some(Component::LuaScript(script)) => json!([{ "FilePath": script.path }]),
            _ => json!([{ "FilePath": NONE_SENTINEL }]),
        };
        let selection = match entity.component(ComponentKind::EditorSelection) {
            Some(Component::EditorSelection(selection)) => json!([{ "Mode": selection.mode }]),
            _ => json!([{ "Mode": OFF_SENTINEL }]),
        };

        json!({
            "Type": ENTITY_TYPE,
            "Name": entity.name,
            "Transform": [
                { "Position": vector_json(&t.position) },
                { "Rotation": vector_json(&t.rotation) },
                { "Scale": vector_json(&t.scale) },
            ],
            "Components": [
                { "MeshRenderer": mesh },
                { "LuaScript": script },
                { "EditorSelection": selection },
            ],
        })
    }).collect();

    json!({
        "SceneName": scene.name(),
        "Objects": objects,
    })
}

fn vector_json(v: &Vector3) -> Value {
    json!([{ "x": v.x }, { "y": v.y }, { "z": v.z }])
}

pub fn to_json_string(scene: &Scene) -> Result<String, SceneError> {
    Ok(serde_json::to_string_pretty(&to_json(scene))?)
}

pub fn write_scene(scene: &Scene, path: impl AsRef<Path>) -> Result<(), SceneError> {
    let path = path.as_ref();
    let text = to_json_string(scene)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    tracing::info!(path = %path.display(), entities = scene.len(), "Scene written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE: &str = r#"{
        "SceneName": "Sample",
        "Objects": [
            {
                "Type": "Entity",
                "Name": "Floor",
                "Transform": [
                    { "Position": [{ "x": 1.5 }, { "y": -2 }, { "z": 3 }] },
                    { "Rotation": [{ "x": 0, "y": 45, "z": 0 }] },
                    { "Scale": [{ "x": 10 }, { "y": 1 }, { "z": 10 }] }
                ],
                "Components": [
                    { "MeshRenderer": [{ "Model": "models/floor.obj" }, { "MaterialType": "PBR", "Albedo": "tex/a.png" }] },
                    { "LuaScript": [{ "FilePath": "NONE" }] },
                    { "EditorSelection": [{ "Mode": "OFF" }] }
                ]
            },
            {
                "Type": "Entity",
                "Name": "Scripted",
                "Transform": [
                    { "Position": [{ "x": 0 }, { "y": 0 }, { "z": 0 }] },
                    { "Rotation": [{ "x": 0 }, { "y": 0 }, { "z": 0 }] },
                    { "Scale": [{ "x": 1 }, { "y": 1 }, { "z": 1 }] }
                ],
                "Components": [
                    { "MeshRenderer": [{ "Model": "NONE" }] },
                    { "LuaScript": [{ "FilePath": "scripts/spin.lua" }] },
                    { "EditorSelection": [{ "Mode": "DEFAULT" }] }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let scene = parse_scene(SAMPLE).unwrap();
        assert_eq!(scene.name(), "Sample");
        assert_eq!(scene.len(), 2);

        let floor = &scene.entities()[0];
        assert_eq!(floor.name, "Floor");
        assert_eq!(floor.tag, "Untagged");
        assert_relative_eq!(floor.transform.position, Vector3::new(1.5, -2.0, 3.0));
        assert_relative_eq!(floor.transform.rotation, Vector3::new(0.0, 45.0, 0.0));
        assert!(floor.has(ComponentKind::MeshRenderer));
        assert!(!floor.has(ComponentKind::LuaScript));
        assert!(!floor.has(ComponentKind::EditorSelection));
        match floor.component(ComponentKind::MeshRenderer) {
            Some(Component::MeshRenderer(mesh)) => {
                assert_eq!(mesh.material.albedo, "tex/a.png");
                assert_eq!(mesh.material.normal, NONE_SENTINEL);
            }
            other => panic!("unexpected {other:?}"),
        }

        let scripted = &scene.entities()[1];
        assert_ne!(scripted.id(), floor.id());
        assert!(!scripted.has(ComponentKind::MeshRenderer));
        assert!(scripted.has(ComponentKind::LuaScript));
        assert!(scripted.has(ComponentKind::EditorSelection));
    }

    #[test]
    fn test_components_found_by_key() {
        let text = r#"{
            "SceneName": "Reordered",
            "Objects": [{
                "Type": "Entity",
                "Name": "A",
                "Components": [
                    { "EditorSelection": [{ "Mode": "DEFAULT" }] },
                    { "MeshRenderer": [{ "Model": "cube" }] }
                ]
            }]
        }"#;
        let scene = parse_scene(text).unwrap();
        let entity = &scene.entities()[0];
        assert!(entity.has(ComponentKind::MeshRenderer));
        assert!(entity.has(ComponentKind::EditorSelection));
        assert_eq!(entity.transform, Transform::default());
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(matches!(parse_scene("{ not json"), Err(SceneError::Json(_))));
        assert!(matches!(
            parse_scene(r#"{"Objects": []}"#),
            Err(SceneError::Invalid { .. })
        ));
        let bad_axis = r#"{"SceneName": "x", "Objects": [{"Type": "Entity", "Name": "a",
            "Transform": [{"Position": [{"x": "one"}]}]}]}"#;
        assert!(matches!(parse_scene(bad_axis), Err(SceneError::Invalid { .. })));
    }

    #[test]
    fn test_non_entity_objects_are_skipped() {
        let text = r#"{
            "SceneName": "Mixed",
            "Objects": [
                { "Type": "Light", "Name": "Sun" },
                { "Name": "Untyped" },
                { "Type": "Entity", "Name": "Kept" }
            ]
        }"#;
        let scene = parse_scene(text).unwrap();
        assert_eq!(scene.len(), 1);
        assert_eq!(scene.entities()[0].name, "Kept");

        // 被跳过的对象内容不参与校验，但 JSON 本身必须合法
        let odd = r#"{"SceneName": "x", "Objects": [{"Type": 7, "Transform": "bogus"}]}"#;
        assert_eq!(parse_scene(odd).unwrap().len(), 0);
        assert!(matches!(
            parse_scene(r#"{"SceneName": "x", "Objects": [{"Type": "Light",]}"#),
            Err(SceneError::Json(_))
        ));
    }

    #[test]
    fn test_sentinel_edit_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.json");

        let mut scene = parse_scene(SAMPLE).unwrap();
        let id = scene.entities()[1].id();
        let scripted = scene.entity_mut(id).unwrap();
        for component in scripted.components_mut() {
            if let Component::LuaScript(script) = component {
                script.path = NONE_SENTINEL.to_string();
            }
        }
        assert_eq!(scripted.prune_unset_components(), vec![ComponentKind::LuaScript]);
        assert!(!scripted.has(ComponentKind::LuaScript));

        write_scene(&scene, &path).unwrap();
        let reloaded = load_scene(&path).unwrap();
        for (a, b) in scene.entities().iter().zip(reloaded.entities()) {
            assert_eq!(a.components(), b.components());
        }
    }

    #[test]
    fn test_writer_emits_sentinels_and_real_values() {
        let mut scene = Scene::new("Out");
        let entity = scene.spawn("Empty");
        entity.transform = Transform::from_position(Vector3::new(1.0, 2.0, 3.0))
            .with_rotation(Vector3::new(4.0, 5.0, 6.0));
        entity.add_component(Component::EditorSelection(EditorSelection::new("GIZMO")));

        let value = to_json(&scene);
        let object = &value["Objects"][0];
        assert_eq!(object["Transform"][1]["Rotation"][1]["y"], json!(5.0));
        assert_eq!(object["Components"][0]["MeshRenderer"][0]["Model"], json!("NONE"));
        assert_eq!(object["Components"][1]["LuaScript"][0]["FilePath"], json!("NONE"));
        assert_eq!(object["Components"][2]["EditorSelection"][0]["Mode"], json!("GIZMO"));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenes").join("sample.json");

        let original = parse_scene(SAMPLE).unwrap();
        write_scene(&original, &path).unwrap();
        let reloaded = load_scene(&path).unwrap();

        assert_eq!(reloaded.name(), original.name());
        assert_eq!(reloaded.len(), original.len());
        for (a, b) in original.entities().iter().zip(reloaded.entities()) {
            assert_eq!(a.name, b.name);
            assert_relative_eq!(a.transform.position, b.transform.position, epsilon = 1e-5);
            assert_relative_eq!(a.transform.rotation, b.transform.rotation, epsilon = 1e-5);
            assert_relative_eq!(a.transform.scale, b.transform.scale, epsilon = 1e-5);
            for kind in [
                ComponentKind::MeshRenderer,
                ComponentKind::LuaScript,
                ComponentKind::EditorSelection,
            ] {
                assert_eq!(a.has(kind), b.has(kind));
            }
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_scene(dir.path().join("nope.json"));
        assert!(matches!(result, Err(SceneError::FileNotFound(_))));
    }
}
