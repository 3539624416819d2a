use ul4::Error;
use ul4::Template;
use ul4::Undefined;

mod compile {
    use super::*;

    #[test]
    fn test_break_in_def_inside_loop() {
        let err = Template::compile("<?for x in y?><?def f?><?break?><?end def?><?end for?>").unwrap_err();
        assert!(matches!(err.root(), Error::LoopControlOutsideLoop { kind: "break", .. }));
        assert_eq!(err.code(), "U101");
        let location = err.locations()[0];
        assert_eq!(location.template_name(), Some("f"));
        assert_eq!(location.tag(), "<?break?>");
    }

    #[test]
    fn test_spans_point_at_the_tag() {
        let source = "abc\n<?end for?>";
        let err = Template::compile(source).unwrap_err();
        let span = err.span().unwrap();
        assert_eq!(&source[span.start_usize()..span.end_usize()], "<?end for?>");
    }

    #[test]
    fn test_unterminated_ignore() {
        let err = Template::compile("<?ignore?>never closed").unwrap_err();
        assert!(matches!(err.root(), Error::UnterminatedIgnore { .. }));
    }

    #[test]
    fn test_unknown_keywords_are_text() {
        let template = Template::compile("<?xml version='1.0'?><?php echo ?>").unwrap();
        assert_eq!(template.renders(()).unwrap(), "<?xml version='1.0'?><?php echo ?>");
    }
}

mod runtime {
    use super::*;

    #[test]
    fn test_undefined_loop_container_is_decorated() {
        let err = Template::compile("a<?for x in nope?><?print x?><?end for?>")
            .unwrap()
            .renders(())
            .unwrap_err();
        assert!(matches!(err.root(), Error::NotIterable(_)));
        let locations = err.locations();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].tag(), "<?for x in nope?>");
    }

    #[test]
    fn test_every_frame_adds_a_location() {
        let source = "<?def inner?><?print 1 / 0?><?end def?><?def outer?><?render inner()?><?end def?><?render outer()?>";
        let err = Template::compile(source).unwrap().renders(()).unwrap_err();
        assert_eq!(err.root(), &Error::ZeroDivision);
        let tags: Vec<_> = err.locations().iter().map(|l| l.tag().to_string()).collect();
        assert_eq!(tags, ["<?print 1 / 0?>", "<?render inner()?>", "<?render outer()?>"]);
        assert_eq!(err.locations()[0].template_name(), Some("inner"));
    }

    #[test]
    fn test_undefined_raises_when_used() {
        let template = Template::compile("<?print missing + 1?>").unwrap();
        let err = template.renders(()).unwrap_err();
        assert!(matches!(err.root(), Error::Undefined(Undefined::Variable(name)) if &**name == "missing"));
    }

    #[test]
    fn test_attribute_of_undefined() {
        let err = Template::compile("<?print missing.attr?>")
            .unwrap()
            .renders(())
            .unwrap_err();
        assert!(matches!(err.root(), Error::Undefined(_)));
    }

    #[test]
    fn test_control_flow_is_not_an_error() {
        let template = Template::compile("<?def f?><?for x in [1]?><?return x?><?end for?><?end def?><?print f()?>").unwrap();
        assert_eq!(template.renders(()).unwrap(), "1");
    }

    #[test]
    fn test_huge_repetition_fails_instead_of_allocating() {
        let dead = Template::compile("<?if False?><?print 'ab' * 9223372036854775807?><?end if?>").unwrap();
        assert_eq!(dead.renders(()).unwrap(), "");

        let live = Template::compile("<?code n = 9223372036854775807?><?print 'ab' * n?>").unwrap();
        let err = live.renders(()).unwrap_err();
        assert_eq!(err.root(), &Error::Overflow);
        assert_eq!(err.locations()[0].tag(), "<?print 'ab' * n?>");
    }

    #[test]
    fn test_report_lists_locations() {
        let template = Template::compile("<?ul4 page?>\n<?print 1 // 0?>").unwrap();
        let report = template.renders(()).unwrap_err().report();
        assert!(report.starts_with("division by zero"));
        assert!(report.contains("<?print 1 // 0?>"));
    }
}
