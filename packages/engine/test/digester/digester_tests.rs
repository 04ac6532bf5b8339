use cdrl_engine::digester::{DigestMode, XmlConfigDigester};
use cdrl_engine::selector::SelectorStep;
use cdrl_engine::{ConfigError, MapResourceLoader};

fn digest(source: &str) -> Result<cdrl_engine::ResourceConfigSeq, ConfigError> {
    XmlConfigDigester::new().digest(source, "root.cdrl", &MapResourceLoader::new())
}

const NS: &str = "https://www.smooks.org/xsd/smooks-2.0.xsd";

#[test]
fn should_digest_simple_resource_config() {
    let seq = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <resource-config selector="order"><param name="x">1</param></resource-config>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap();

    assert_eq!(seq.len(), 1);
    let config = seq.get(0).unwrap();
    let path = config.selector_path.as_ref().unwrap();
    assert_eq!(path.steps.len(), 1);
    match &path.steps[0] {
        SelectorStep::Element(e) => assert_eq!(e.name.local_name(), Some("order")),
        other => panic!("expected element step, got {:?}", other),
    }
    assert_eq!(config.parameters.first("x").unwrap().as_str(), "1");
}

#[test]
fn should_reject_unsupported_default_namespace() {
    let err = digest(r#"<smooks-resource-list xmlns="urn:not-smooks"/>"#).unwrap_err();
    match err {
        ConfigError::UnsupportedNamespace { namespace, .. } => {
            assert_eq!(namespace, "urn:not-smooks");
        }
        other => panic!("expected UnsupportedNamespace, got {:?}", other),
    }
    assert!(digest("<smooks-resource-list/>").is_err());
}

#[test]
fn should_fail_on_empty_configuration() {
    let err = digest(&format!(r#"<smooks-resource-list xmlns="{}"/>"#, NS)).unwrap_err();
    match err {
        ConfigError::EmptyConfiguration { config_path } => {
            assert_eq!(config_path, "/[root]");
        }
        other => panic!("expected EmptyConfiguration, got {:?}", other),
    }
}

#[test]
fn should_surface_malformed_xml_as_schema_error() {
    let err = digest("<smooks-resource-list").unwrap_err();
    assert!(matches!(err, ConfigError::SchemaInvalid { .. }));
}

#[test]
fn should_collect_global_parameters_under_sentinel_resource() {
    let seq = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <params>
               <param name="stream.filter.type">SAX NG</param>
               <param name="inputType">input.stream</param>
             </params>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap();

    assert_eq!(seq.len(), 1);
    let globals = seq.get(0).unwrap();
    assert_eq!(globals.selector(), "global-parameters");
    assert_eq!(
        globals.parameters.first("stream.filter.type").unwrap().as_str(),
        "SAX NG"
    );
    assert_eq!(globals.parameters.len(), 2);
}

#[test]
fn should_reject_duplicate_condition_id_in_same_frame() {
    let err = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <conditions>
               <condition id="c1">channel == 'web'</condition>
               <condition id="c1">channel == 'batch'</condition>
             </conditions>
             <resource-config selector="order"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap_err();

    match err {
        ConfigError::DuplicateConditionId { id, config_path } => {
            assert_eq!(id, "c1");
            assert_eq!(config_path, "/[root]");
        }
        other => panic!("expected DuplicateConditionId, got {:?}", other),
    }
}

#[test]
fn should_reject_empty_condition_expression() {
    let err = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <conditions><condition id="c1"></condition></conditions>
             <resource-config selector="order"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap_err();
    assert!(matches!(err, ConfigError::EmptyConditionExpression { .. }));
}

#[test]
fn should_attach_condition_by_id_ref() {
    let seq = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <conditions>
               <condition id="web-only">channel == 'web'</condition>
             </conditions>
             <resource-config selector="order">
               <condition idRef="web-only"/>
             </resource-config>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap();

    let condition = seq.get(0).unwrap().condition.as_ref().unwrap();
    assert_eq!(condition.expression(), "channel == 'web'");
}

#[test]
fn should_fail_unknown_condition_id_ref() {
    let err = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <resource-config selector="order">
               <condition idRef="missing"/>
             </resource-config>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap_err();
    match err {
        ConfigError::UnknownConditionIdRef { id_ref, .. } => assert_eq!(id_ref, "missing"),
        other => panic!("expected UnknownConditionIdRef, got {:?}", other),
    }
}

#[test]
fn should_apply_document_defaults_to_resource_configs() {
    let seq = digest(&format!(
        r#"<smooks-resource-list xmlns="{}"
                 default-target-profile="mobile" default-condition-ref="gate">
             <conditions><condition id="gate">enabled == 'true'</condition></conditions>
             <resource-config selector="order"/>
             <resource-config selector="item" target-profile="desktop"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap();

    let first = seq.get(0).unwrap();
    assert_eq!(first.target_profile.as_deref(), Some("mobile"));
    assert_eq!(
        first.condition.as_ref().unwrap().expression(),
        "enabled == 'true'"
    );
    let second = seq.get(1).unwrap();
    assert_eq!(second.target_profile.as_deref(), Some("desktop"));
}

#[test]
fn should_digest_profiles_into_store() {
    let seq = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <profiles>
               <profile base-profile="mobile" sub-profiles="webkit, small-screen"/>
             </profiles>
             <resource-config selector="order"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap();

    let profiles = seq.profiles().get("mobile").unwrap();
    assert!(profiles.is_member("webkit"));
    assert!(profiles.is_member("small-screen"));
    assert!(!profiles.is_member("gecko"));
}

#[test]
fn should_digest_reader_with_repeated_sax_handlers() {
    let seq = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <reader class="com.acme.CsvDriver">
               <handlers>
                 <handler class="com.acme.HandlerOne"/>
                 <handler class="com.acme.HandlerTwo"/>
               </handlers>
               <features>
                 <setOn feature="http://xml.org/sax/features/validation"/>
                 <setOff feature="http://xml.org/sax/features/namespaces"/>
               </features>
               <params>
                 <param name="separator" type="String">;</param>
               </params>
             </reader>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap();

    let reader = seq.get(0).unwrap();
    assert_eq!(reader.selector(), "org.xml.sax.driver");
    assert_eq!(reader.resource_locator.as_deref(), Some("com.acme.CsvDriver"));

    let handlers: Vec<&str> = reader
        .parameters
        .values("sax-handler")
        .iter()
        .map(|p| p.as_str())
        .collect();
    assert_eq!(handlers, vec!["com.acme.HandlerOne", "com.acme.HandlerTwo"]);
    assert_eq!(
        reader.parameters.first("feature-on").unwrap().as_str(),
        "http://xml.org/sax/features/validation"
    );
    assert_eq!(
        reader.parameters.first("feature-off").unwrap().as_str(),
        "http://xml.org/sax/features/namespaces"
    );
    assert_eq!(reader.parameters.first("separator").unwrap().as_str(), ";");
    assert_eq!(
        reader.parameters.first("separator").unwrap().param_type.as_deref(),
        Some("String")
    );
}

#[test]
fn should_fail_unknown_resource_config_factory() {
    let err = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <resource-config selector="order" factory="com.acme.MissingFactory"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap_err();
    match err {
        ConfigError::FactoryInstantiation {
            class_name,
            config_path,
            ..
        } => {
            assert_eq!(class_name, "com.acme.MissingFactory");
            assert_eq!(config_path, "/[root]");
        }
        other => panic!("expected FactoryInstantiation, got {:?}", other),
    }
}

#[test]
fn should_annotate_duplicate_profile_with_config_path() {
    let err = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <profiles>
               <profile base-profile="mobile" sub-profiles="webkit"/>
               <profile base-profile="mobile" sub-profiles="gecko"/>
             </profiles>
             <resource-config selector="order"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap_err();

    match err {
        ConfigError::DuplicateProfile {
            base_profile,
            config_path,
        } => {
            assert_eq!(base_profile, "mobile");
            assert_eq!(config_path, "/[root]");
        }
        other => panic!("expected DuplicateProfile, got {:?}", other),
    }
}

#[test]
fn should_annotate_invalid_selector_with_config_path() {
    let err = digest(&format!(
        r#"<smooks-resource-list xmlns="{}">
             <resource-config selector="order//item"/>
           </smooks-resource-list>"#,
        NS
    ))
    .unwrap_err();

    match err {
        ConfigError::InvalidSelectorSyntax {
            selector,
            config_path,
            ..
        } => {
            assert_eq!(selector, "order//item");
            assert_eq!(config_path, "/[root]");
        }
        other => panic!("expected InvalidSelectorSyntax, got {:?}", other),
    }
}

#[test]
fn should_reject_unknown_element_in_extension_mode() {
    let source = format!(
        r#"<smooks-resource-list xmlns="{}">
             <profiles><profile base-profile="mobile"/></profiles>
             <resource-config selector="order"/>
           </smooks-resource-list>"#,
        NS
    );
    let err = XmlConfigDigester::new()
        .digest_in_mode(&source, "ext.xml", &MapResourceLoader::new(), DigestMode::Extension)
        .unwrap_err();
    match err {
        ConfigError::IllegalExtensionElement { element, .. } => assert_eq!(element, "profiles"),
        other => panic!("expected IllegalExtensionElement, got {:?}", other),
    }
}

#[test]
fn should_digest_same_source_identically_twice() {
    let source = format!(
        r#"<smooks-resource-list xmlns="{}">
             <resource-config selector="order"><param name="x">1</param></resource-config>
             <resource-config selector="order/item"><param name="y">2</param></resource-config>
           </smooks-resource-list>"#,
        NS
    );
    let first = digest(&source).unwrap();
    let second = digest(&source).unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.selector(), b.selector());
        assert_eq!(a.parameters, b.parameters);
        assert_eq!(a.target_profile, b.target_profile);
    }
}
