use chrono::NaiveDate;
use ul4::ul4on;
use ul4::Arguments;
use ul4::CompileOptions;
use ul4::Error;
use ul4::Template;
use ul4::Value;
use ul4::Whitespace;

#[test]
fn test_template_round_trip_renders_identically() {
    let source = "<?ul4 list(items, sep=', ')?>\
        <?for (i, item) in enumerate(items)?><?if i?><?print sep?><?end if?>\
        <?print item.upper()?><?end for?>";
    let template = Template::compile(source).unwrap();
    let loaded = Template::loads(&template.dumps().unwrap()).unwrap();

    assert_eq!(loaded, template);
    assert_eq!(loaded.name(), Some("list"));
    let args = || Arguments::new().arg(vec![Value::str("a"), Value::str("b")]);
    assert_eq!(loaded.renders(args()).unwrap(), template.renders(args()).unwrap());
    assert_eq!(loaded.renders(args()).unwrap(), "A, B");
}

#[test]
fn test_round_trip_keeps_whitespace_and_delimiters() {
    let options = CompileOptions::default()
        .with_whitespace(Whitespace::Smart)
        .with_delimiters("{{", "}}");
    let template = Template::compile_with("{{if 1}}\n\tx\n{{end if}}\n", &options).unwrap();
    let loaded = Template::loads(&template.dumps().unwrap()).unwrap();
    assert_eq!(loaded.whitespace(), Whitespace::Smart);
    assert_eq!(loaded.startdelim(), "{{");
    assert_eq!(loaded.renders(()).unwrap(), template.renders(()).unwrap());
}

#[test]
fn test_closures_from_loaded_templates() {
    let source = "<?code x = 1?><?def f?><?print x?><?end def?><?code x = 2?><?render f()?>";
    let template = Template::compile(source).unwrap();
    let dump = ul4on::dumps(&Value::Template(template), Some("  ")).unwrap();
    let Value::Template(loaded) = ul4on::loads(&dump).unwrap() else {
        panic!("expected a template");
    };
    assert_eq!(loaded.renders(()).unwrap(), "1");
}

#[test]
fn test_values_inside_containers() {
    let date = NaiveDate::from_ymd_opt(2025, 12, 24).unwrap();
    let template = Template::compile("<?print 1?>").unwrap();
    let value = Value::list(vec![
        Value::Date(date),
        Value::Template(template.clone()),
        Value::Template(template),
        Value::Slice(None, Some(3)),
    ]);
    let loaded = ul4on::loads(&ul4on::dumps(&value, None).unwrap()).unwrap();
    let Value::List(items) = &loaded else {
        panic!("expected a list");
    };
    let items = items.borrow();
    assert_eq!(items[0], Value::Date(date));
    let (Value::Template(a), Value::Template(b)) = (&items[1], &items[2]) else {
        panic!("expected templates");
    };
    assert!(a.ptr_eq(b));
    assert_eq!(items[3], Value::Slice(None, Some(3)));
}

#[test]
fn test_builtins_use_the_same_format() {
    let template = Template::compile("<?print fromul4on(asul4on([1, 'a', None, {'k': True}]))?>").unwrap();
    assert_eq!(template.renders(()).unwrap(), "[1, 'a', None, {'k': True}]");
}

#[test]
fn test_version_mismatch_is_rejected() {
    let dump = "O S'de.livinglogic.ul4.template' S'1' n S'x' S'keep' S'<?' S'?>' n n n n L ] )";
    let err = Template::loads(dump).unwrap_err();
    assert_eq!(
        err,
        Error::VersionMismatch {
            expected: ul4on::VERSION.to_string(),
            found: "1".to_string(),
        }
    );
}

#[test]
fn test_legacy_dump_recompiles_source() {
    let dump = "O S'de.livinglogic.ul4.template' n S'legacy' S'<?for i in range(3)?><?print i?><?end for?>' S'keep' S'<?' S'?>' )";
    let template = Template::loads(dump).unwrap();
    assert_eq!(template.name(), Some("legacy"));
    assert_eq!(template.renders(()).unwrap(), "012");
}

#[test]
fn test_loads_requires_a_template() {
    let err = Template::loads("L i1 ]").unwrap_err();
    assert!(matches!(err, Error::Ul4on { .. }));
}
