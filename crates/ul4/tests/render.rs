use ul4::Arguments;
use ul4::CompileOptions;
use ul4::Template;
use ul4::Value;
use ul4::Vars;
use ul4::Whitespace;

fn render(source: &str) -> String {
    Template::compile(source).unwrap().renders(()).unwrap()
}

fn render_smart(source: &str) -> String {
    let options = CompileOptions::default().with_whitespace(Whitespace::Smart);
    Template::compile_with(source, &options)
        .unwrap()
        .renders(())
        .unwrap()
}

mod statements {
    use super::*;

    #[test]
    fn test_loop_unpacking() {
        let source = "<?for (a, b) in [[1, 2], [3, 4]]?><?print a?>-<?print b?>;<?end for?>";
        assert_eq!(render(source), "1-2;3-4;");
    }

    #[test]
    fn test_loop_control() {
        let source = "<?for i in range(10)?>\
            <?if i == 1?><?continue?><?elif i == 4?><?break?><?end if?>\
            <?print i?><?end for?>";
        assert_eq!(render(source), "023");
    }

    #[test]
    fn test_while_and_augmented_assignment() {
        let source = "<?code n = 3?><?while n?><?print n?><?code n -= 1?><?end while?>";
        assert_eq!(render(source), "321");
    }

    #[test]
    fn test_item_and_attribute_assignment() {
        let source = "<?code d = {}?><?code d['a'] = 1?><?code d.b = 2?><?code d['a'] += 10?><?print d?>";
        assert_eq!(render(source), "{'a': 11, 'b': 2}");
    }

    #[test]
    fn test_undefined_prints_nothing() {
        assert_eq!(render("[<?print missing?>]"), "[]");
        assert_eq!(render("<?if missing?>yes<?else?>no<?end if?>"), "no");
        assert_eq!(render("<?print isdefined({}.a)?>"), "False");
    }

    #[test]
    fn test_printx_escapes() {
        assert_eq!(render("<?printx '<a & b>'?>"), "&lt;a &amp; b&gt;");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(render("<?print [x * x for x in range(5) if x % 2]?>"), "[1, 9]");
        assert_eq!(render("<?print {x: len(x) for x in ['a', 'bb']}?>"), "{'a': 1, 'bb': 2}");
        assert_eq!(render("<?print sum(x for x in [1, 2, 3])?>"), "6");
    }

    #[test]
    fn test_comprehension_variables_do_not_leak() {
        assert_eq!(render("<?code x = 'outer'?><?code y = [x for x in 'ab']?><?print x?>"), "outer");
    }
}

mod templates {
    use super::*;

    #[test]
    fn test_closure_snapshot() {
        let source = "<?code x = 1?><?def f?><?print x?><?end def?><?code x = 2?><?render f()?>";
        assert_eq!(render(source), "1");
    }

    #[test]
    fn test_local_template_recursion() {
        let source = "<?def fac(n)?><?return 1 if n < 2 else n * fac(n - 1)?><?end def?><?print fac(5)?>";
        assert_eq!(render(source), "120");
    }

    #[test]
    fn test_local_default_is_evaluated_per_call() {
        let source = "<?code base = 1?><?def f(x=base)?><?print x?><?end def?><?render f()?><?render f(x=2)?>";
        assert_eq!(render(source), "12");
    }

    #[test]
    fn test_call_in_expression_writes_output() {
        let source = "<?def t?>x<?return 1?><?end def?><?print t()?>";
        assert_eq!(render(source), "x1");
    }

    #[test]
    fn test_renderx_escapes_callee_output() {
        let source = "<?def t?><b><?print '<'?></b><?end def?><?renderx t()?>";
        assert_eq!(render(source), "&lt;b&gt;&lt;&lt;/b&gt;");
    }

    #[test]
    fn test_renders_method() {
        let source = "<?def t(x)?><<?print x?>><?end def?><?code s = t.renders(x='a')?><?print s.upper()?>";
        assert_eq!(render(source), "<A>");
    }

    #[test]
    fn test_renderblock_twice() {
        let source = "<?def box(content)?>[<?render content()?>]<?end def?>\
            <?renderblock box()?>a<?end renderblock?>\
            <?renderblock box()?>b<?end renderblock?>";
        assert_eq!(render(source), "[a][b]");
    }

    #[test]
    fn test_renderblocks_collects_variables() {
        let source = "<?def page(title, body)?><?print title?>:<?render body()?><?end def?>\
            <?renderblocks page()?><?code title = 'T'?><?def body?>B<?end def?><?end renderblocks?>";
        assert_eq!(render(source), "T:B");
    }

    #[test]
    fn test_smart_render_indents_callee() {
        let source = "<?def line(x)?>\n\t<?print x?>\n<?end def?>\n<ul>\n\t<?render line(1)?>\n\t<?render line(2)?>\n</ul>\n";
        assert_eq!(render_smart(source), "<ul>\n\t1\n\t2\n</ul>\n");
    }
}

mod embedding {
    use super::*;

    #[test]
    fn test_arguments_and_globals() {
        let template = Template::compile("<?ul4 page(name)?><?print site?>/<?print name?>").unwrap();
        let globals = Vars::from([("site".to_string(), Value::str("ul4"))]);
        let output = template
            .renders_with_globals(Arguments::new().kwarg("name", "home"), &globals)
            .unwrap();
        assert_eq!(output, "ul4/home");
    }

    #[test]
    fn test_locals_shadow_globals() {
        let template = Template::compile("<?code site = 'local'?><?print site?>").unwrap();
        let globals = Vars::from([("site".to_string(), Value::str("global"))]);
        assert_eq!(template.renders_with_globals((), &globals).unwrap(), "local");
    }

    #[test]
    fn test_call_returns_value() {
        let template = Template::compile("<?ul4 add(a, b=2)?>ignored<?return a + b?>").unwrap();
        assert_eq!(template.call(Arguments::new().arg(1)).unwrap(), Value::Int(3));
        assert_eq!(template.call(Arguments::new().arg(1).arg(5)).unwrap(), Value::Int(6));
    }

    #[test]
    fn test_call_without_return_is_none() {
        let template = Template::compile("text").unwrap();
        assert_eq!(template.call(()).unwrap(), Value::None);
    }

    #[test]
    fn test_render_streams_into_writer() {
        let template = Template::compile("<?for i in range(3)?><?print i?><?end for?>").unwrap();
        let mut output = String::from(">");
        template.render(&mut output, ()).unwrap();
        assert_eq!(output, ">012");
    }

    #[test]
    fn test_template_passed_as_argument() {
        let inner = Template::compile("<?ul4 inner(x)?>(<?print x?>)").unwrap();
        let outer = Template::compile("<?ul4 outer(t)?><?render t(x=1)?><?print t.name?>").unwrap();
        let output = outer.renders(Arguments::new().kwarg("t", inner)).unwrap();
        assert_eq!(output, "(1)inner");
    }
}

mod whitespace {
    use super::*;

    fn render_strip(source: &str) -> String {
        let options = CompileOptions::default().with_whitespace(Whitespace::Strip);
        Template::compile_with(source, &options)
            .unwrap()
            .renders(())
            .unwrap()
    }

    #[test]
    fn test_strip_is_idempotent() {
        let sources = [
            "  a\n  <?code x = 'X'?><?print x?>\n  b\n",
            "<?for i in range(3)?>\n\t<?print i?>\n<?end for?>\n",
            "\t<ul>\n\t\t<li>x</li>\n\t</ul>",
            "<?if True?>\n    yes\n<?else?>\n    no\n<?end if?>",
            "<?def row(v)?>\n\t<td><?print v?></td>\n<?end def?>\n<tr>\n\t<?render row(1)?>\n\t<?render row(2)?>\n</tr>\n",
        ];
        for source in sources {
            let once = render_strip(source);
            assert_eq!(render_strip(&once), once, "stripping {source:?} twice changed the output");
        }
        assert_eq!(render_strip(sources[1]), "012\n");
    }
}
