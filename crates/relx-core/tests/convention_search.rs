//! Search tests with small, purpose-built registries.
//!
//! Each test registers only the rules and convertlets it needs, so the plans it
//! expects follow from the registrations alone.
//!
//! ## What These Tests Verify
//! - A converter is inserted exactly where a parent requires a convention its child
//!   group does not offer, and never between equal conventions
//! - Multi-hop conversions follow the registered graph
//! - Exact cost ties go to the earlier inserted expression
//! - Broken cost inputs and row-type-changing rules are rejected
//! - Rewrites that prove two groups equivalent merge them
//! - Code generation dispatches converters to convertlets and everything else to
//!   the implementor of the node's convention

use relx_core::catalog::InMemoryCatalog;
use relx_core::codegen::{CodeGenerator, CodegenContext, RelImplementor};
use relx_core::convention::Convention;
use relx_core::convertlet::Convertlet;
use relx_core::cost::{Cost, CostModel, DefaultCostModel};
use relx_core::error::{CodegenError, ConfigurationError, OptimizationError};
use relx_core::expr::*;
use relx_core::fragment::{CodeBlock, CodeExpr, ExecutableFragment, Fragment, IterPlan, Stmt};
use relx_core::memo::{GroupId, Memo, MemoExpr, PhysicalPlan, PlanNode};
use relx_core::pattern::Pattern;
use relx_core::registry::{Registry, RegistryBuilder};
use relx_core::rule::{OptContext, Rule, RuleResult, RuleType};
use relx_core::search::{Goal, SearchConfig, VolcanoSearch};
use relx_core::stats::Statistics;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Implements one logical operator kind in `convention`, requiring the same
/// convention of every child.
struct Implement {
    name: &'static str,
    kind: OpKind,
    convention: Convention,
}

fn implement(name: &'static str, kind: OpKind, convention: Convention) -> Arc<dyn Rule> {
    Arc::new(Implement { name, kind, convention })
}

impl Rule for Implement {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        let arity = match self.kind {
            OpKind::Values | OpKind::Scan => 0,
            OpKind::Join => 2,
            _ => 1,
        };
        Pattern::logical(self.kind, arity)
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        vec![RuleResult::physical(expr.op.clone(), self.convention, &expr.children)]
    }
}

/// Replaces a filter by a projection of a different row type.
struct RetypingRule;

impl Rule for RetypingRule {
    fn name(&self) -> &str {
        "Retyping"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        vec![RuleResult::Substitution(
            Operator::Project {
                exprs: vec![Expr::lit("x")],
                row_type: RowType::new(vec![Field::new("label", DataType::Utf8)]),
            },
            expr.children.clone(),
        )]
    }
}

/// `Filter(TRUE)` over a group is that group.
struct RemoveTrueFilter;

impl Rule for RemoveTrueFilter {
    fn name(&self) -> &str {
        "RemoveTrueFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Vec<RuleResult> {
        let Operator::Filter {
            predicate: Expr::Literal(ScalarValue::Bool(true)),
        } = &expr.op
        else {
            return vec![];
        };
        let child = memo.group(expr.children[0]);
        child
            .exprs
            .iter()
            .map(|&e| memo.expr(e))
            .filter(|e| e.is_logical())
            .map(|e| RuleResult::Substitution(e.op.clone(), e.children.clone()))
            .collect()
    }
}

/// Prices `per_row` per row and bridges iterator pipelines into a cursor loop.
struct Bridge {
    from: Convention,
    to: Convention,
    per_row: f64,
}

fn bridge(from: Convention, to: Convention, per_row: f64) -> Arc<dyn Convertlet> {
    Arc::new(Bridge { from, to, per_row })
}

impl Convertlet for Bridge {
    fn from(&self) -> Convention {
        self.from
    }

    fn to(&self) -> Convention {
        self.to
    }

    fn estimated_cost(&self, _row_type: &RowType, rows: f64) -> Cost {
        Cost::new(rows * self.per_row)
    }

    fn realize(&self, child: Fragment, _row_type: &RowType, cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        match (child, self.to) {
            (Fragment::Iterator(source), Convention::COMPILED) => {
                let cursor = cx.fresh();
                let row = cx.fresh();
                Ok(Fragment::Code(CodeBlock::new(
                    vec![
                        Stmt::Open { cursor, source },
                        Stmt::While {
                            cond: CodeExpr::HasNext(cursor),
                            body: vec![
                                Stmt::Let {
                                    var: row,
                                    value: CodeExpr::Next(cursor),
                                },
                                Stmt::Splice,
                            ],
                        },
                    ],
                    CodeExpr::Var(row),
                )))
            }
            (other, _) => Ok(other),
        }
    }
}

struct ValuesImplementor;

impl RelImplementor for ValuesImplementor {
    fn convention(&self) -> Convention {
        Convention::ITERATOR
    }

    fn implement(&self, node: &PlanNode, _inputs: Vec<Fragment>, _cx: &mut CodegenContext) -> Result<Fragment, CodegenError> {
        match &node.op {
            Operator::Values { rows, .. } => Ok(Fragment::Iterator(IterPlan::Values { rows: rows.clone() })),
            op => Err(CodegenError::Unsupported {
                kind: op.kind(),
                convention: Convention::ITERATOR,
            }),
        }
    }
}

/// Every operator costs its input row count, whatever the convention.
struct UniformCost;

impl CostModel for UniformCost {
    fn compute_cost(&self, _op: &Operator, _convention: Convention, input_stats: &[&Statistics], children_costs: &[Cost]) -> Cost {
        let rows = input_stats.first().map_or(0.0, |s| s.row_count);
        Cost::new(children_costs.iter().map(|c| c.total).sum::<f64>() + rows)
    }
}

fn registry(rules: Vec<Arc<dyn Rule>>, convertlets: Vec<Arc<dyn Convertlet>>) -> Arc<Registry> {
    let mut builder = RegistryBuilder::with_builtin_conventions();
    for convertlet in convertlets {
        builder.register_convertlet(convertlet).unwrap();
    }
    for rule in rules {
        builder.register_rule(rule).unwrap();
    }
    builder.build().unwrap()
}

fn values(memo: &mut Memo, n: i64) -> GroupId {
    memo.add_logical(
        Operator::Values {
            row_type: RowType::new(vec![Field::new("x", DataType::Int64)]),
            rows: (1..=n).map(|v| vec![ScalarValue::Int64(v)]).collect(),
        },
        vec![],
    )
    .unwrap()
}

fn filter(memo: &mut Memo, predicate: Expr, input: GroupId) -> GroupId {
    memo.add_logical(Operator::Filter { predicate }, vec![input]).unwrap()
}

fn x_positive() -> Expr {
    Expr::binary(BinaryOp::Gt, Expr::col("x", 0), Expr::lit(0))
}

fn run(memo: Memo, root: GroupId, goal: Convention, registry: &Arc<Registry>) -> Result<PhysicalPlan, OptimizationError> {
    relx_core::optimize(memo, root, &Goal::new(goal), Arc::clone(registry), Arc::new(InMemoryCatalog::new()))
}

fn converters(plan: &PhysicalPlan) -> Vec<(Convention, Convention)> {
    plan.nodes()
        .into_iter()
        .filter_map(|n| match n.op {
            Operator::Converter { from } => Some((from, n.convention)),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[test]
fn test_converter_bridges_mismatched_child() {
    let registry = registry(
        vec![
            implement("ValuesIter", OpKind::Values, Convention::ITERATOR),
            implement("FilterCompiled", OpKind::Filter, Convention::COMPILED),
        ],
        vec![bridge(Convention::ITERATOR, Convention::COMPILED, 0.1)],
    );
    let mut memo = Memo::new();
    let input = values(&mut memo, 3);
    let root = filter(&mut memo, x_positive(), input);

    let plan = run(memo, root, Convention::COMPILED, &registry).unwrap();
    println!("{}", plan.explain());
    let root = plan.root();
    assert!(matches!(root.op, Operator::Filter { .. }));
    assert_eq!(root.convention, Convention::COMPILED);
    let converter = &root.children[0];
    assert_eq!(converter.op, Operator::Converter { from: Convention::ITERATOR });
    assert_eq!(converter.children[0].convention, Convention::ITERATOR);
    assert_eq!(converters(&plan), vec![(Convention::ITERATOR, Convention::COMPILED)]);
}

#[test]
fn test_no_converter_when_conventions_agree() {
    let registry = registry(
        vec![
            implement("ValuesIter", OpKind::Values, Convention::ITERATOR),
            implement("FilterIter", OpKind::Filter, Convention::ITERATOR),
        ],
        vec![bridge(Convention::ITERATOR, Convention::COMPILED, 0.1)],
    );
    let mut memo = Memo::new();
    let input = values(&mut memo, 3);
    let root = filter(&mut memo, x_positive(), input);

    let plan = run(memo, root, Convention::ITERATOR, &registry).unwrap();
    assert!(converters(&plan).is_empty(), "{}", plan.explain());
}

#[test]
fn test_conversion_chains_through_intermediate_convention() {
    let registry = registry(
        vec![implement("ValuesFederated", OpKind::Values, Convention::FEDERATED)],
        vec![
            bridge(Convention::FEDERATED, Convention::ITERATOR, 2.0),
            bridge(Convention::ITERATOR, Convention::COMPILED, 0.1),
        ],
    );
    let mut memo = Memo::new();
    let root = values(&mut memo, 4);

    let plan = run(memo, root, Convention::COMPILED, &registry).unwrap();
    assert_eq!(
        converters(&plan),
        vec![
            (Convention::ITERATOR, Convention::COMPILED),
            (Convention::FEDERATED, Convention::ITERATOR),
        ]
    );
}

#[test]
fn test_missing_conversion_path_is_unsatisfiable() {
    let registry = registry(vec![implement("ValuesIter", OpKind::Values, Convention::ITERATOR)], vec![]);
    let mut memo = Memo::new();
    let root = values(&mut memo, 1);

    let err = run(memo, root, Convention::COMPILED, &registry).unwrap_err();
    assert_eq!(
        err,
        OptimizationError::UnsatisfiableConvention {
            operator: "Values".to_string(),
            required: Convention::COMPILED,
        }
    );
}

#[test]
fn test_cost_tie_goes_to_earlier_expression() {
    let registry = registry(
        vec![
            implement("ValuesIter", OpKind::Values, Convention::ITERATOR),
            implement("ValuesCompiled", OpKind::Values, Convention::COMPILED),
        ],
        vec![bridge(Convention::ITERATOR, Convention::COMPILED, 0.0)],
    );
    let mut memo = Memo::new();
    let root = values(&mut memo, 3);

    // Values<COMPILED> and Converter(Values<ITERATOR>) both cost 3.
    let mut search = VolcanoSearch::new(
        memo,
        registry,
        Arc::new(UniformCost),
        Arc::new(InMemoryCatalog::new()),
        SearchConfig::default(),
    );
    let plan = search.optimize(root, &Goal::new(Convention::COMPILED)).unwrap();
    assert!(matches!(plan.root().op, Operator::Values { .. }), "{}", plan.explain());
    assert_eq!(plan.cost().total, 3.0);
}

#[test]
fn test_negative_conversion_cost_is_rejected() {
    let registry = registry(
        vec![implement("ValuesIter", OpKind::Values, Convention::ITERATOR)],
        vec![bridge(Convention::ITERATOR, Convention::COMPILED, -1.0)],
    );
    let mut memo = Memo::new();
    let root = values(&mut memo, 3);

    let err = run(memo, root, Convention::COMPILED, &registry).unwrap_err();
    assert!(matches!(err, OptimizationError::NonMonotonicCost { .. }), "{err:?}");
}

#[test]
fn test_rule_changing_row_type_is_rejected() {
    let registry = registry(
        vec![
            Arc::new(RetypingRule) as Arc<dyn Rule>,
            implement("ValuesIter", OpKind::Values, Convention::ITERATOR),
        ],
        vec![],
    );
    let mut memo = Memo::new();
    let input = values(&mut memo, 3);
    let root = filter(&mut memo, x_positive(), input);

    let err = run(memo, root, Convention::ITERATOR, &registry).unwrap_err();
    assert!(
        matches!(&err, OptimizationError::RowTypeMismatch { rule, .. } if rule == "Retyping"),
        "{err:?}"
    );
}

#[test]
fn test_equivalent_rewrite_merges_groups() {
    let registry = registry(
        vec![
            Arc::new(RemoveTrueFilter) as Arc<dyn Rule>,
            implement("ValuesIter", OpKind::Values, Convention::ITERATOR),
            implement("FilterIter", OpKind::Filter, Convention::ITERATOR),
        ],
        vec![],
    );
    let mut memo = Memo::new();
    let input = values(&mut memo, 5);
    let positive = filter(&mut memo, x_positive(), input);
    let root = filter(&mut memo, Expr::lit(true), positive);

    let mut search = VolcanoSearch::new(
        memo,
        registry,
        Arc::new(DefaultCostModel::default()),
        Arc::new(InMemoryCatalog::new()),
        SearchConfig::default(),
    );
    let plan = search.optimize(root, &Goal::new(Convention::ITERATOR)).unwrap();
    assert!(search.memo.merges() >= 1);
    assert_eq!(search.memo.find(root), search.memo.find(positive));

    // The redundant filter is gone from the chosen plan.
    let filters = plan
        .nodes()
        .into_iter()
        .filter(|n| matches!(n.op, Operator::Filter { .. }))
        .count();
    assert_eq!(filters, 1, "{}", plan.explain());
}

#[test]
fn test_plan_serializes_to_json() {
    let registry = registry(
        vec![implement("ValuesIter", OpKind::Values, Convention::ITERATOR)],
        vec![bridge(Convention::ITERATOR, Convention::COMPILED, 0.1)],
    );
    let mut memo = Memo::new();
    let root = values(&mut memo, 2);
    let plan = run(memo, root, Convention::COMPILED, &registry).unwrap();

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["truncated"], serde_json::json!(false));
    assert_eq!(json["root"]["convention"], serde_json::json!("COMPILED"));
    assert_eq!(json["root"]["children"][0]["convention"], serde_json::json!("ITERATOR"));
}

// ---------------------------------------------------------------------------
// Registry and code generation
// ---------------------------------------------------------------------------

#[test]
fn test_implementor_for_unknown_convention_fails_build() {
    struct Gpu;
    impl RelImplementor for Gpu {
        fn convention(&self) -> Convention {
            Convention::new("GPU")
        }
        fn implement(&self, node: &PlanNode, _: Vec<Fragment>, _: &mut CodegenContext) -> Result<Fragment, CodegenError> {
            Err(CodegenError::Unsupported {
                kind: node.op.kind(),
                convention: self.convention(),
            })
        }
    }

    let mut builder = RegistryBuilder::with_builtin_conventions();
    builder.register_implementor(Arc::new(Gpu)).unwrap();
    assert_eq!(
        builder.build().err(),
        Some(ConfigurationError::UnknownConvention("GPU".to_string()))
    );
}

#[test]
fn test_codegen_without_implementor_fails() {
    let registry = registry(vec![implement("ValuesIter", OpKind::Values, Convention::ITERATOR)], vec![]);
    let mut memo = Memo::new();
    let root = values(&mut memo, 2);
    let plan = run(memo, root, Convention::ITERATOR, &registry).unwrap();

    let err = CodeGenerator::new(registry).generate(&plan).unwrap_err();
    assert_eq!(err, CodegenError::MissingImplementor(Convention::ITERATOR));
}

#[test]
fn test_codegen_closes_program_at_root() {
    let mut builder = RegistryBuilder::with_builtin_conventions();
    builder
        .register_rule(implement("ValuesIter", OpKind::Values, Convention::ITERATOR))
        .unwrap()
        .register_convertlet(bridge(Convention::ITERATOR, Convention::COMPILED, 0.1))
        .unwrap()
        .register_implementor(Arc::new(ValuesImplementor))
        .unwrap();
    let registry = builder.build().unwrap();

    let mut memo = Memo::new();
    let root = values(&mut memo, 2);
    let plan = run(memo, root, Convention::COMPILED, &registry).unwrap();
    let fragment = CodeGenerator::new(registry).generate(&plan).unwrap();

    let ExecutableFragment::Program(stmts) = &fragment else {
        panic!("expected a program, got {fragment:?}");
    };
    assert!(matches!(stmts[0], Stmt::Open { .. }));
    let text = fragment.to_string();
    assert!(text.contains("open v0 = Values[2 rows]"), "{text}");
    assert!(text.contains("emit v1"), "{text}");
    assert!(!text.contains("<hole>"), "{text}");
}
