//! Property tests over generated C.

#[path = "../integration/common/mod.rs"]
mod common;

use common::{c_function, compile_ok};
use ember::codegen::containers::{dict_capacity, next_capacity, reallocations};
use proptest::prelude::*;

// ── range loops ──

/// `len(range(start, stop, step))`.
fn python_range_len(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    }
}

/// Comparison character and per-iteration advance of `for (i = a; ...)`.
fn loop_header(f: &str) -> (char, i64) {
    let line = f.lines().find(|l| l.contains("for (i = a; ")).unwrap_or_else(|| panic!("no range loop in:\n{f}"));
    let parts: Vec<&str> = line.trim().split("; ").collect();
    let cmp = parts[1].chars().nth(2).unwrap();
    let advance = parts[2].trim_end_matches(") {");
    let step = match advance {
        "i++" => 1,
        "i--" => -1,
        other if other.starts_with("i += ") => other["i += ".len()..].parse().unwrap(),
        other if other.starts_with("i -= ") => -other["i -= ".len()..].parse::<i64>().unwrap(),
        other => panic!("unexpected advance {other}"),
    };
    (cmp, step)
}

/// Iterations of the emitted loop header when run with `a` and `b`.
fn c_trip_count(cmp: char, step: i64, a: i64, b: i64) -> i64 {
    let mut i = a;
    let mut trips = 0;
    while if cmp == '<' { i < b } else { i > b } {
        trips += 1;
        i += step;
        assert!(trips <= 1_000, "runaway loop");
    }
    trips
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn range_loop_runs_len_range_times(
        a in -40i64..40,
        b in -40i64..40,
        step in prop_oneof![-7i64..=-1, 1i64..=7],
    ) {
        let src = format!(
            "def f(a: int, b: int) -> int:\n    s = 0\n    for i in range(a, b, {step}):\n        s += 1\n    return s\n"
        );
        let c = compile_ok(&src);
        let (cmp, advance) = loop_header(c_function(&c, "m_f"));
        prop_assert_eq!(advance, step);
        prop_assert_eq!(c_trip_count(cmp, advance, a, b), python_range_len(a, b, step));
    }
}

// ── container growth ──

proptest! {
    #[test]
    fn appends_reallocate_logarithmically(n in 1usize..200_000) {
        let bound = (n as f64).ln() / 1.5f64.ln();
        prop_assert!(reallocations(n) as f64 <= bound.ceil() + 1.0);
    }

    #[test]
    fn growth_always_makes_room(cap in 0usize..1_000_000) {
        prop_assert!(next_capacity(cap) > cap);
    }

    #[test]
    fn dict_capacity_keeps_load_at_most_half(n in 0usize..10_000) {
        prop_assert!(dict_capacity(n) >= 2 * n);
        prop_assert!(dict_capacity(n) >= 4);
    }
}

// ── structural well-formedness ──

#[derive(Debug, Clone)]
enum Stmt {
    Add(i64),
    If(i64, Vec<Stmt>),
    For(i64, Vec<Stmt>),
    While(i64, Vec<Stmt>),
    Try(Vec<Stmt>),
}

fn stmt_strategy() -> impl Strategy<Value = Stmt> {
    let leaf = (0i64..10).prop_map(Stmt::Add);
    leaf.prop_recursive(4, 24, 3, |inner| {
        let block = prop::collection::vec(inner, 0..3);
        prop_oneof![
            (0i64..10, block.clone()).prop_map(|(k, b)| Stmt::If(k, b)),
            (1i64..5, block.clone()).prop_map(|(k, b)| Stmt::For(k, b)),
            (0i64..10, block.clone()).prop_map(|(k, b)| Stmt::While(k, b)),
            block.prop_map(Stmt::Try),
        ]
    })
}

fn render_block(out: &mut String, body: &[Stmt], depth: usize) {
    let pad = "    ".repeat(depth);
    if body.is_empty() {
        out.push_str(&format!("{pad}pass\n"));
    }
    for stmt in body {
        match stmt {
            Stmt::Add(k) => out.push_str(&format!("{pad}s += {k}\n")),
            Stmt::If(k, b) => {
                out.push_str(&format!("{pad}if s > {k}:\n"));
                render_block(out, b, depth + 1);
            }
            Stmt::For(k, b) => {
                out.push_str(&format!("{pad}for i{depth} in range({k}):\n"));
                render_block(out, b, depth + 1);
            }
            Stmt::While(k, b) => {
                out.push_str(&format!("{pad}while s < {k}:\n"));
                out.push_str(&format!("{pad}    s += 1\n"));
                render_block(out, b, depth + 1);
            }
            Stmt::Try(b) => {
                out.push_str(&format!("{pad}try:\n"));
                render_block(out, b, depth + 1);
                out.push_str(&format!("{pad}except ValueError:\n"));
                out.push_str(&format!("{pad}    s = 0\n"));
            }
        }
    }
}

fn balanced(text: &str, open: char, close: char) -> bool {
    let mut depth = 0i64;
    for ch in text.chars() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn nested_control_flow_emits_balanced_c(body in prop::collection::vec(stmt_strategy(), 1..4)) {
        let mut src = String::from("def f() -> int:\n    s = 0\n");
        render_block(&mut src, &body, 1);
        src.push_str("    return s\n");
        let c = compile_ok(&src);
        let f = c_function(&c, "m_f");
        prop_assert!(balanced(f, '{', '}'), "unbalanced braces:\n{}", f);
        prop_assert!(balanced(f, '(', ')'), "unbalanced parentheses:\n{}", f);
        prop_assert!(f.trim_end().ends_with('}'), "function body is not closed:\n{}", f);
    }
}
