// SPDX-License-Identifier: PMPL-1.0-or-later

//! Parser structure and the print/re-parse round trip.

use cursive0::sema::symbols::collect;
use cursive0::source::load_source;
use cursive0::syntax::ast::{Item, PatternNode};
use cursive0::syntax::parser::parse_module;
use cursive0::syntax::pretty::print_module;

fn parse(text: &str) -> cursive0::syntax::parser::ParseResult {
    let loaded = load_source("t.cursive", text.as_bytes());
    parse_module(&loaded.source.unwrap(), "app")
}

#[test]
fn parses_a_full_item_mix() {
    let text = r#"
pub record Point implements Bitcopy {
    pub x: i32
    pub y: i32
    procedure sum(const self) -> i32 { self.x + self.y }
}

enum Shape {
    Dot,
    Line(i32, i32),
}

modal Door {
    id: i32
    state Open {
        transition close(self) -> Door@Closed { Door::Closed { id: self.id } }
    }
    state Closed {
    }
}

class Drawable {
    procedure draw(const self) -> i32
}

type Pair = (i32, i32)

static LIMIT: i32 = 64

procedure main() -> i32 { 0 }
"#;
    let result = parse(text);
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    let kinds: Vec<&str> = result
        .module
        .items
        .iter()
        .map(|i| match i {
            Item::Record(_) => "record",
            Item::Enum(_) => "enum",
            Item::Modal(_) => "modal",
            Item::Class(_) => "class",
            Item::TypeAlias(_) => "type",
            Item::Static(_) => "static",
            Item::Procedure(_) => "procedure",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["record", "enum", "modal", "class", "type", "static", "procedure"]
    );
}

#[test]
fn parses_pointer_states_and_contracts() {
    let result = parse(
        "procedure get(p: Ptr<i32>@Valid) -> i32 |= *p >= 0 => @result >= 0 { *p }\n",
    );
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    let Item::Procedure(proc) = &result.module.items[0] else {
        panic!("expected a procedure");
    };
    let contract = proc.contract.as_ref().expect("contract expected");
    assert!(contract.pre.is_some());
    assert!(contract.post.is_some());
}

#[test]
fn parses_match_with_ranges_and_wildcard() {
    let result = parse(
        "procedure f(x: u8) -> i32 { match x { 0 => 1, 1..=9 => 2, _ => 3 } }\n",
    );
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
    let Item::Procedure(proc) = &result.module.items[0] else {
        panic!("expected a procedure");
    };
    let body = proc.body.as_ref().unwrap();
    let tail = body.tail.as_ref().expect("match tail");
    let cursive0::syntax::ast::ExprNode::Match { arms, .. } = &tail.node else {
        panic!("expected a match");
    };
    assert_eq!(arms.len(), 3);
    assert!(matches!(arms[1].pattern.node, PatternNode::Range { .. }));
    assert!(matches!(arms[2].pattern.node, PatternNode::Wildcard));
}

#[test]
fn parses_concurrency_surface() {
    let text = r#"
procedure work(d: unique i32) {
    parallel {
        { let a = 1 },
        { let b = 2 },
    }
    #(write d) {
        let c = 3
    }
}
"#;
    let result = parse(text);
    assert!(!result.diags.has_error(), "{:?}", result.diags.ordered());
}

#[test]
fn parse_error_recovers_to_next_item() {
    let result = parse("procedure ???\nprocedure ok() -> i32 { 0 }\n");
    assert!(result.diags.has_error());
    assert!(result
        .module
        .items
        .iter()
        .any(|i| matches!(i, Item::Procedure(p) if p.name == "ok")));
}

#[test]
fn print_then_reparse_preserves_sigma_contribution() {
    let text = r#"
pub record Point implements Bitcopy {
    pub x: i32
    pub y: i32
    procedure sum(const self) -> i32 { self.x + self.y }
}

enum Shape {
    Dot,
    Line(i32, i32),
}

type Pair = (i32, i32)

static LIMIT: i32 = 64

procedure main() -> i32 { let p: Point = Point { x: 1, y: 2 }\np.sum() }
"#;
    let first = parse(text);
    assert!(!first.diags.has_error(), "{:?}", first.diags.ordered());
    let printed = print_module(&first.module);
    let second = parse(&printed);
    assert!(
        !second.diags.has_error(),
        "reparse of printed module failed: {:?}\n{printed}",
        second.diags.ordered()
    );

    let sigma_a = collect("app", vec![first.module]).sigma;
    let sigma_b = collect("app", vec![second.module]).sigma;
    let keys_a: Vec<&String> = sigma_a.decls.keys().collect();
    let keys_b: Vec<&String> = sigma_b.decls.keys().collect();
    assert_eq!(keys_a, keys_b);
}
