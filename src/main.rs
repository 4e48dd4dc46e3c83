//! PolyLower Command Line Interface
//!
//! Usage:
//!   polylower [OPTIONS]
//!   polylower --help
//!
//! Examples:
//!   polylower --demo matmul                  # Lower a matrix multiply
//!   polylower --demo cache --emit groups     # Show the fused loop nest before passes
//!   polylower --demo gpu --target gpu        # Map bound loops to GPU indices
//!   polylower --demo inline --emit graph -v  # Computation graph in DOT format

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use polylower::ir::expr::{Expr, GpuAxis, Var};
use polylower::ir::tensor::{ReduceKind, Tensor};
use polylower::ir::types::Type;
use polylower::lower::LowerImpl;
use polylower::poly::build_group_ast;
use polylower::{LowerOptions, Target};
use std::fs;
use std::path::PathBuf;

/// PolyLower - lowering of tensor computations to loop nests
#[derive(Parser, Debug)]
#[command(name = "polylower")]
#[command(author = "PolyLower Contributors")]
#[command(version)]
#[command(about = "Lowers tensor computations to loop-nest functions", long_about = None)]
struct Cli {
    /// Built-in computation to lower
    #[arg(long, default_value = "matmul")]
    demo: Demo,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Device the lowered function targets
    #[arg(short, long, default_value = "host")]
    target: TargetArg,

    /// What to emit
    #[arg(long, default_value = "func")]
    emit: EmitKind,

    /// Keep inlined tensors as graph nodes
    #[arg(long)]
    keep_inline: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Demo {
    /// C[i, j] = sum_k A[i, k] * B[k, j], vectorized and unrolled
    Matmul,
    /// Three-point stencil whose producer is computed at the consumer
    Cache,
    /// B[i, j] = A[i, j] * alpha with a scalar argument
    Elementwise,
    /// Chain of elementwise stages with the middle one inlined
    Inline,
    /// Elementwise kernel with loops bound to block and thread indices
    Gpu,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    /// Plain host loops
    Host,
    /// GPU kernel
    Gpu,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Host => Target::Host,
            TargetArg::Gpu => Target::Gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// The lowered function
    Func,
    /// Computation graph (DOT format)
    Graph,
    /// Loop nest of every schedule group before the passes
    Groups,
    /// All stages (for debugging)
    All,
}

/// One function to lower: name, tensor arguments, scalar arguments.
struct Computation {
    name: &'static str,
    tensors: Vec<Tensor>,
    scalars: Vec<Var>,
}

fn build_demo(demo: Demo) -> Result<Computation> {
    let f32_ = Type::float(32);
    let computation = match demo {
        Demo::Matmul => {
            let a = Tensor::placeholder("A", &[64, 32], f32_);
            let b = Tensor::placeholder("B", &[32, 64], f32_);
            let c = Tensor::reduce("C", &[64, 64], ReduceKind::Sum, &[32], |ax, rk| {
                let lhs = a.at(vec![ax[0].clone(), rk[0].clone()])?;
                let rhs = b.at(vec![rk[0].clone(), ax[1].clone()])?;
                Expr::mul(lhs, rhs)
            })?;
            c.vectorize(1, 8);
            c.unroll(2);
            Computation { name: "matmul", tensors: vec![a, b, c], scalars: vec![] }
        }
        Demo::Cache => {
            let a = Tensor::placeholder("A", &[65, 64], f32_);
            let p = Tensor::compute("P", &[65, 64], |ax| Expr::mul(a.at(ax.to_vec())?, Expr::float(0.5)))?;
            let c = Tensor::compute("C", &[64, 64], |ax| {
                let next = Expr::add(ax[0].clone(), Expr::int(1))?;
                Expr::add(p.at(ax.to_vec())?, p.at(vec![next, ax[1].clone()])?)
            })?;
            p.compute_at(&c, 0);
            Computation { name: "stencil", tensors: vec![a, c], scalars: vec![] }
        }
        Demo::Elementwise => {
            let alpha = Var::new("alpha", f32_);
            let a = Tensor::placeholder("A", &[32, 32], f32_);
            let b = Tensor::compute("B", &[32, 32], |ax| Expr::mul(a.at(ax.to_vec())?, alpha.to_expr()))?;
            Computation { name: "scale", tensors: vec![a, b], scalars: vec![alpha] }
        }
        Demo::Inline => {
            let a = Tensor::placeholder("A", &[32], f32_);
            let b = Tensor::compute("B", &[32], |ax| Expr::add(a.at(ax.to_vec())?, Expr::float(1.0)))?;
            let c = Tensor::compute("C", &[32], |ax| Expr::mul(b.at(ax.to_vec())?, b.at(ax.to_vec())?))?;
            b.compute_inline();
            Computation { name: "square_plus_one", tensors: vec![a, c], scalars: vec![] }
        }
        Demo::Gpu => {
            let a = Tensor::placeholder("A", &[128, 256], f32_);
            let b = Tensor::compute("B", &[128, 256], |ax| Expr::max(a.at(ax.to_vec())?, Expr::float(0.0)))?;
            b.bind(0, GpuAxis::BlockX);
            b.bind(1, GpuAxis::ThreadX);
            Computation { name: "relu", tensors: vec![a, b], scalars: vec![] }
        }
    };
    Ok(computation)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("PolyLower v{}", polylower::VERSION);
    debug!("Demo: {:?}, target: {:?}", cli.demo, cli.target);

    let computation = build_demo(cli.demo).context("Failed to build demo computation")?;
    let options = LowerOptions::default()
        .with_target(cli.target.into())
        .with_hide_inline(!cli.keep_inline);
    let lower = LowerImpl::new(computation.name, &computation.tensors, &computation.scalars, &[], options)
        .with_context(|| format!("Invalid arguments for {}", computation.name))?;

    let mut sections = Vec::new();
    if matches!(cli.emit, EmitKind::Graph | EmitKind::All) {
        let graph = lower.comp_graph().context("Failed to build computation graph")?;
        sections.push(graph.to_dot());
    }
    if matches!(cli.emit, EmitKind::Groups | EmitKind::All) {
        let graph = lower.comp_graph().context("Failed to build computation graph")?;
        let schedule = lower.schedule(&graph).context("Failed to schedule")?;
        for group in &schedule.groups {
            let ast = build_group_ast(group).context("Failed to generate loop nest")?;
            sections.push(format!("// group {} [{}]\n{}", group.id, group.tuples().join(", "), ast));
        }
    }
    if matches!(cli.emit, EmitKind::Func | EmitKind::All) {
        info!("Lowering {}...", computation.name);
        match lower.lower() {
            Ok(func) => sections.push(func.to_string()),
            Err(e) => {
                error!("Lowering failed: {}", e);
                return Err(e.into());
            }
        }
    }

    write_output(&cli.output, &sections.join("\n\n"))
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
