use cdrl_engine::digester::XmlConfigDigester;
use cdrl_engine::{ConfigError, FsResourceLoader, MapResourceLoader};
use std::io::Write;

const NS: &str = "https://www.smooks.org/xsd/smooks-2.0.xsd";

fn list(body: &str) -> String {
    format!(
        r#"<smooks-resource-list xmlns="{}">{}</smooks-resource-list>"#,
        NS, body
    )
}

#[test]
fn should_digest_imported_configs_in_order() {
    let mut loader = MapResourceLoader::new();
    loader.add(
        "configs/readers.cdrl",
        list(r#"<resource-config selector="imported"/>"#),
    );
    let root = list(
        r#"<resource-config selector="first"/>
           <import file="readers.cdrl"/>
           <resource-config selector="last"/>"#,
    );

    let seq = XmlConfigDigester::new()
        .digest(&root, "configs/root.cdrl", &loader)
        .unwrap();
    let selectors: Vec<&str> = seq.iter().map(|c| c.selector()).collect();
    assert_eq!(selectors, vec!["first", "imported", "last"]);
}

#[test]
fn should_resolve_imports_relative_to_importing_file() {
    let mut loader = MapResourceLoader::new();
    loader.add(
        "configs/nested/inner.cdrl",
        list(r#"<resource-config selector="inner"/>"#),
    );
    loader.add(
        "configs/nested/outer.cdrl",
        list(r#"<import file="inner.cdrl"/>"#),
    );
    let root = list(r#"<import file="nested/outer.cdrl"/>"#);

    let seq = XmlConfigDigester::new()
        .digest(&root, "configs/root.cdrl", &loader)
        .unwrap();
    assert_eq!(seq.len(), 1);
    assert_eq!(seq.get(0).unwrap().selector(), "inner");
}

#[test]
fn should_detect_import_cycle() {
    let mut loader = MapResourceLoader::new();
    loader.add("a.xml", list(r#"<import file="b.xml"/>"#));
    loader.add("b.xml", list(r#"<import file="a.xml"/>"#));
    let root = list(r#"<import file="a.xml"/>"#);

    let err = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap_err();
    match err {
        ConfigError::ImportCycle { uri, config_path } => {
            assert!(uri.contains("a.xml"), "cycle message names a.xml: {}", uri);
            assert_eq!(config_path, "/[root]/[a.xml]/[b.xml]");
        }
        other => panic!("expected ImportCycle, got {:?}", other),
    }
}

#[test]
fn should_detect_cycle_across_distinct_spellings() {
    let mut loader = MapResourceLoader::new();
    loader.add("a.xml", list(r#"<import file="./a.xml"/>"#));
    let root = list(r#"<import file="a.xml"/>"#);

    let err = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap_err();
    assert!(matches!(err, ConfigError::ImportCycle { .. }));
}

#[test]
fn should_substitute_import_parameters_before_digestion() {
    let mut loader = MapResourceLoader::new();
    loader.add(
        "child.cdrl",
        list(r#"<resource-config selector="order"><param name="endpoint">@ns@</param></resource-config>"#),
    );
    let root = list(
        r#"<import file="child.cdrl">
             <param name="ns">http://x</param>
           </import>"#,
    );

    let seq = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap();
    assert_eq!(
        seq.get(0).unwrap().parameters.first("endpoint").unwrap().as_str(),
        "http://x"
    );
}

#[test]
fn should_substitute_markup_valued_import_parameters() {
    let mut loader = MapResourceLoader::new();
    // The parameter's serialized child markup lands in the imported text.
    loader.add(
        "child.cdrl",
        list(r#"@extra@"#),
    );
    let root = list(
        r#"<import file="child.cdrl">
             <param name="extra"><resource-config selector="spliced"/></param>
           </import>"#,
    );

    let seq = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap();
    assert_eq!(seq.get(0).unwrap().selector(), "spliced");
}

#[test]
fn should_wrap_unreadable_import_as_io_failure() {
    let root = list(r#"<import file="missing.cdrl"/>"#);
    let err = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &MapResourceLoader::new())
        .unwrap_err();
    match err {
        ConfigError::ImportIo { uri, config_path, .. } => {
            assert_eq!(uri, "missing.cdrl");
            assert_eq!(config_path, "/[root]/[missing.cdrl]");
        }
        other => panic!("expected ImportIo, got {:?}", other),
    }
}

#[test]
fn should_annotate_errors_with_nested_config_path() {
    let mut loader = MapResourceLoader::new();
    loader.add("a.xml", list(r#"<import file="b.xml"/>"#));
    loader.add("b.xml", list(r#"<unknown-element/>"#));
    let root = list(r#"<import file="a.xml"/>"#);

    let err = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap_err();
    match err {
        ConfigError::SchemaInvalid { config_path, .. } => {
            assert_eq!(config_path, "/[root]/[a.xml]/[b.xml]");
        }
        other => panic!("expected SchemaInvalid, got {:?}", other),
    }
}

#[test]
fn should_resolve_condition_id_refs_through_parent_frames() {
    let mut loader = MapResourceLoader::new();
    loader.add(
        "imported.cdrl",
        list(
            r#"<resource-config selector="order">
                 <condition idRef="web-only"/>
               </resource-config>"#,
        ),
    );
    let root = list(
        r#"<conditions>
             <condition id="web-only">channel == 'web'</condition>
           </conditions>
           <import file="imported.cdrl"/>"#,
    );

    let seq = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap();
    let condition = seq.get(0).unwrap().condition.as_ref().unwrap();
    assert_eq!(condition.expression(), "channel == 'web'");
}

#[test]
fn should_not_leak_imported_conditions_into_later_siblings() {
    let mut loader = MapResourceLoader::new();
    loader.add(
        "defines.cdrl",
        list(
            r#"<conditions><condition id="inner">channel == 'web'</condition></conditions>
               <resource-config selector="order"/>"#,
        ),
    );
    // The imported frame died with its file; the idRef below has no binding.
    let root = list(
        r#"<import file="defines.cdrl"/>
           <resource-config selector="item"><condition idRef="inner"/></resource-config>"#,
    );

    let err = XmlConfigDigester::new()
        .digest(&root, "root.cdrl", &loader)
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownConditionIdRef { .. }));
}

#[test]
fn should_load_imports_from_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let imported = dir.path().join("imported.cdrl");
    let mut file = std::fs::File::create(&imported).unwrap();
    write!(file, "{}", list(r#"<resource-config selector="fs-order"/>"#)).unwrap();

    let root = list(r#"<import file="imported.cdrl"/>"#);
    let base = format!("{}/root.cdrl", dir.path().display());

    let seq = XmlConfigDigester::new()
        .digest(&root, &base, &FsResourceLoader::new())
        .unwrap();
    assert_eq!(seq.get(0).unwrap().selector(), "fs-order");
}
