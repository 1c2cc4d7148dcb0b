// 工具参数 JSON Schema 清洗
// Gemini 的 functionDeclarations 只接受 OpenAPI 子集: 不支持 $ref / anyOf / 约束字段等
use serde_json::{json, Map, Value};

const MAX_REF_DEPTH: usize = 8;

/// Constraints moved into the description as hints
const CONSTRAINT_KEYS: &[&str] = &[
    "minLength",
    "maxLength",
    "pattern",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "format",
    "default",
];

/// Keys dropped outright
const DROPPED_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$comment",
    "additionalProperties",
    "patternProperties",
    "propertyNames",
    "unevaluatedProperties",
    "title",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
    "if",
    "then",
    "else",
    "not",
    "contentEncoding",
    "contentMediaType",
];

/// Clean a tool parameter schema in place.
pub fn clean_json_schema(schema: &mut Value) {
    let defs = collect_defs(schema);
    clean_node(schema, &defs, 0);
}

fn collect_defs(schema: &Value) -> Map<String, Value> {
    let mut defs = Map::new();
    for key in ["$defs", "definitions"] {
        if let Some(Value::Object(map)) = schema.get(key) {
            for (k, v) in map {
                defs.insert(k.clone(), v.clone());
            }
        }
    }
    defs
}

fn clean_node(node: &mut Value, defs: &Map<String, Value>, depth: usize) {
    if depth > MAX_REF_DEPTH {
        *node = json!({ "type": "string" });
        return;
    }
    let Some(obj) = node.as_object_mut() else {
        return;
    };

    // 1. $ref
    if let Some(reference) = obj.remove("$ref") {
        let name = reference
            .as_str()
            .and_then(|r| r.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        let description = obj.remove("description");
        match defs.get(&name) {
            Some(resolved) => {
                *node = resolved.clone();
                if let (Some(desc), Some(target)) = (description, node.as_object_mut()) {
                    target.insert("description".to_string(), desc);
                }
                clean_node(node, defs, depth + 1);
            }
            None => {
                *node = json!({ "type": "string", "description": format!("See: {}", name) });
            }
        }
        return;
    }

    obj.remove("$defs");
    obj.remove("definitions");

    // 2. allOf: merge every branch
    if let Some(Value::Array(branches)) = obj.remove("allOf") {
        for mut branch in branches {
            clean_node(&mut branch, defs, depth + 1);
            if let Value::Object(branch) = branch {
                merge_into(obj, branch);
            }
        }
    }

    // 3. anyOf / oneOf: collapse to one branch
    for key in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = obj.remove(key) {
            let collapsed = collapse_union(branches, defs, depth);
            if let Value::Object(branch) = collapsed {
                merge_into(obj, branch);
            }
        }
    }

    // 4. type unions and case
    if let Some(t) = obj.get_mut("type") {
        normalize_type(t);
    }
    if let Some(c) = obj.remove("const") {
        obj.insert("enum".to_string(), json!([c]));
    }

    // 5. constraints -> description hints
    let hints: Vec<String> = CONSTRAINT_KEYS
        .iter()
        .filter_map(|k| obj.remove(*k).map(|v| format!("{}: {}", k, hint_value(&v))))
        .collect();
    if !hints.is_empty() {
        let joined = hints.join(", ");
        let description = match obj.get("description").and_then(Value::as_str) {
            Some(d) if !d.is_empty() => format!("{} ({})", d, joined),
            _ => format!("({})", joined),
        };
        obj.insert("description".to_string(), json!(description));
    }

    for key in DROPPED_KEYS {
        obj.remove(*key);
    }

    // 6. children
    if let Some(Value::Object(props)) = obj.get_mut("properties") {
        for v in props.values_mut() {
            clean_node(v, defs, depth + 1);
        }
    }
    let tuple_head = match obj.get("items") {
        Some(Value::Array(tuple)) => Some(tuple.first().cloned().unwrap_or_else(|| json!({ "type": "string" }))),
        _ => None,
    };
    if let Some(head) = tuple_head {
        obj.insert("items".to_string(), head);
    }
    if let Some(items) = obj.get_mut("items") {
        clean_node(items, defs, depth + 1);
    }

    // 7. required must name declared properties
    let declared: Vec<String> = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();
    if let Some(Value::Array(required)) = obj.get_mut("required") {
        required.retain(|r| r.as_str().is_some_and(|s| declared.iter().any(|d| d == s)));
    }
    if obj
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(Vec::is_empty)
    {
        obj.remove("required");
    }

    if !obj.contains_key("type") && obj.contains_key("properties") {
        obj.insert("type".to_string(), json!("object"));
    }
}

fn collapse_union(branches: Vec<Value>, defs: &Map<String, Value>, depth: usize) -> Value {
    let consts: Option<Vec<Value>> = branches.iter().map(|b| b.get("const").cloned()).collect();
    if let Some(values) = consts.filter(|v| !v.is_empty()) {
        return json!({ "type": "string", "enum": values });
    }

    let chosen = branches
        .into_iter()
        .find(|b| b.get("type").and_then(Value::as_str) != Some("null"));
    match chosen {
        Some(mut branch) => {
            clean_node(&mut branch, defs, depth + 1);
            branch
        }
        None => json!({ "type": "string" }),
    }
}

/// Existing keys on the target win, except properties/required which are unioned
fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(&key) {
            None => {
                target.insert(key, value);
            }
            Some(Value::Object(existing)) if key == "properties" => {
                if let Value::Object(incoming) = value {
                    for (k, v) in incoming {
                        existing.entry(k).or_insert(v);
                    }
                }
            }
            Some(Value::Array(existing)) if key == "required" => {
                if let Value::Array(incoming) = value {
                    for r in incoming {
                        if !existing.contains(&r) {
                            existing.push(r);
                        }
                    }
                }
            }
            Some(_) => {}
        }
    }
}

fn normalize_type(t: &mut Value) {
    if let Value::Array(types) = t {
        let picked = types
            .iter()
            .filter_map(Value::as_str)
            .find(|s| *s != "null")
            .unwrap_or("string")
            .to_string();
        *t = json!(picked);
    }
    if let Value::String(s) = t {
        *s = s.to_lowercase();
    }
}

fn hint_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Clean every tool declaration in a request body: Gemini
/// `tools[].functionDeclarations[].parameters` (renaming `parametersJsonSchema`)
/// and Anthropic `tools[].input_schema`. Returns how many schemas were cleaned.
pub fn clean_tool_declarations(body: &mut Value) -> usize {
    let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
        return 0;
    };
    let mut cleaned = 0;

    for tool in tools.iter_mut() {
        if let Some(schema) = tool.get_mut("input_schema") {
            clean_json_schema(schema);
            cleaned += 1;
        }
        let Some(decls) = tool.get_mut("functionDeclarations").and_then(Value::as_array_mut) else {
            continue;
        };
        for decl in decls.iter_mut() {
            let Some(decl) = decl.as_object_mut() else {
                continue;
            };
            // Gemini CLI 使用 parametersJsonSchema，而标准 Gemini API 使用 parameters
            if let Some(mut params) = decl.remove("parametersJsonSchema") {
                clean_json_schema(&mut params);
                decl.insert("parameters".to_string(), params);
                cleaned += 1;
            } else if let Some(params) = decl.get_mut("parameters") {
                clean_json_schema(params);
                cleaned += 1;
            }
        }
    }
    cleaned
}
