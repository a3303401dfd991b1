use std::fmt::Write;

use clap::Parser;
use expression_model::{ExpressionArena, ExpressionsModel, Node, NodeId, NumberKind};
use log::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "exprs",
    version,
    about = "Parse, evaluate and inspect arithmetic expressions",
    long_about = "exprs parses one or more expressions separated by `;`, then prints\n\
        each expression with its value and its tree, followed by every variable.\n\n\
        EXAMPLES:\n\
        \n  exprs 'a = 2; a * (3 + 4)'\n\
        \n  exprs --type double 'r = 1.5' '3.14159 * r ^ 2'"
)]
struct Cli {
    /// Increase verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Numeric kind of every number (int, float or double)
    #[arg(long = "type", value_name = "KIND", default_value = "int")]
    kind: NumberKind,

    /// Expressions to parse; separate arguments are separate expressions
    #[arg(value_name = "EXPRESSION", required = true)]
    expressions: Vec<String>,
}

fn run_cli() -> i32 {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder().filter_level(level).init();

    let mut model = ExpressionsModel::with_kind(cli.kind);
    let separator = model.separator().to_string();
    let text = cli.expressions.join(separator.as_str());
    let outcome = model.parse(&text);
    print!("{}", report(&model));
    match outcome {
        Ok(_) => 0,
        Err(error) => {
            eprintln!("error: {error}");
            1
        }
    }
}

/// Every expression with its value and tree, then every variable.
fn report(model: &ExpressionsModel) -> String {
    let arena = model.arena();
    let mut out = String::new();
    for id in model.all_expressions() {
        let _ = write!(out, "{}", arena.display(*id));
        let is_assignment = arena.node(*id).is_ok_and(Node::is_assignment);
        if !is_assignment {
            if let Ok(Some(value)) = arena.try_value(*id) {
                let _ = write!(out, " = {value}");
            }
        }
        out.push('\n');
        write_tree(arena, *id, 1, &mut out);
    }
    let variables = model.variables();
    if !variables.is_empty() {
        out.push_str("variables:\n");
    }
    for (name, value) in variables {
        let _ = match value {
            Some(value) => writeln!(out, "  {name} = {value}"),
            None => writeln!(out, "  {name} = <no value>"),
        };
    }
    out
}

fn write_tree(arena: &ExpressionArena, id: NodeId, depth: usize, out: &mut String) {
    let Ok(node) = arena.node(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let _ = match node {
        Node::Binary { rule, .. } => writeln!(out, "{indent}{rule}"),
        _ => writeln!(out, "{indent}{}", arena.display(id)),
    };
    for child in node.children() {
        write_tree(arena, child, depth + 1, out);
    }
}

fn main() {
    std::process::exit(run_cli());
}
