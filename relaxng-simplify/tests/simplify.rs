// End-to-end checks of the simplification pipeline, including the
// idempotence property: running the pipeline on its own output must leave
// the tree unchanged.

use relaxng_simplify::loader::MapLoader;
use relaxng_simplify::tree::Tree;
use relaxng_simplify::{compile_rng_text, parse, pipeline};
use url::Url;

const RNG: &str = r#"xmlns="http://relaxng.org/ns/structure/1.0""#;

fn base() -> Url {
    Url::parse("memory:/main.rng").unwrap()
}

fn assert_idempotent(schema: &str, loader: &MapLoader) {
    let mut tree = Tree::new();
    let root = parse::parse_into(&mut tree, schema).unwrap();
    let mut warnings = Vec::new();
    let first = pipeline::simplify(&mut tree, root, &base(), loader, &mut warnings)
        .expect("first pipeline run");
    let snapshot = tree.clone();
    let mut warnings = Vec::new();
    let second = pipeline::simplify(&mut tree, first, &base(), loader, &mut warnings)
        .expect("second pipeline run");
    assert!(
        Tree::semantic_eq(&snapshot, first, &tree, second),
        "pipeline output changed on re-run"
    );
    assert!(warnings.is_empty(), "re-run produced warnings: {warnings:?}");
}

#[test]
fn idempotent_on_simple_schema() {
    assert_idempotent(
        &format!(r#"<element name="a" {RNG}><empty/></element>"#),
        &MapLoader::new(),
    );
}

#[test]
fn idempotent_on_shorthand_heavy_schema() {
    assert_idempotent(
        &format!(
            r#"<element name="doc" ns="urn:doc" {RNG}>
                 <optional><attribute name="version"><data type="string"/></attribute></optional>
                 <zeroOrMore>
                   <element name="item">
                     <mixed><optional><element name="note"><text/></element></optional></mixed>
                   </element>
                 </zeroOrMore>
               </element>"#
        ),
        &MapLoader::new(),
    );
}

#[test]
fn idempotent_on_grammar_with_includes() {
    let loader = MapLoader::new().add(
        "memory:/lib.rng",
        &format!(
            r#"<grammar {RNG}>
                 <define name="item"><element name="item"><text/></element></define>
               </grammar>"#
        ),
    );
    assert_idempotent(
        &format!(
            r#"<grammar {RNG}>
                 <include href="lib.rng"/>
                 <start><element name="doc"><zeroOrMore><ref name="item"/></zeroOrMore></element></start>
               </grammar>"#
        ),
        &loader,
    );
}

#[test]
fn compiled_grammar_round_trips_through_json() {
    let schema = format!(
        r#"<element name="doc" {RNG}>
             <choice>
               <element><anyName><except><name ns="">secret</name></except></anyName><text/></element>
               <list><oneOrMore><value type="token">x</value></oneOrMore></list>
             </choice>
           </element>"#
    );
    let compiled = compile_rng_text(&schema, &base(), &MapLoader::new()).unwrap();
    let json = relaxng_grammar::write_grammar_json(&compiled.grammar);
    let back = relaxng_grammar::read_grammar_json(&json).unwrap();
    assert_eq!(compiled.grammar, back);
    assert_eq!(json, relaxng_grammar::write_grammar_json(&back));
}

#[test]
fn warnings_surface_dropped_defines() {
    let schema = format!(
        r#"<grammar {RNG}>
             <start><ref name="a"/></start>
             <define name="a"><element name="a"><empty/></element></define>
             <define name="orphan"><element name="o"><empty/></element></define>
           </grammar>"#
    );
    let compiled = compile_rng_text(&schema, &base(), &MapLoader::new()).unwrap();
    assert_eq!(compiled.warnings.len(), 1);
    assert!(compiled.warnings[0].contains("orphan"));
}
